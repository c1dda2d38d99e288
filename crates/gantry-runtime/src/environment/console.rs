//! Console channel with output fan-out.
//!
//! One backend read loop (the relay) feeds a broadcast channel; every
//! subscriber gets its own queue so a slow reader cannot stall the others or
//! the backend. Dropping the session's sender is what tells subscribers the
//! console closed.

use futures_util::{Stream, StreamExt};
use gantry_core::{ConsoleInput, ConsoleOutput, ConsoleStreams, EnvironmentError, EnvironmentEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::broadcaster::EventBroadcaster;

/// An attached console.
struct Session {
    generation: u64,
    output: Option<ConsoleOutput>,
    input: Arc<dyn ConsoleInput>,
    sender: broadcast::Sender<String>,
}

struct RelayTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Bidirectional console bridge for one environment.
pub struct ConsoleChannel {
    environment: Arc<str>,
    buffer: usize,
    generation: AtomicU64,
    session: Arc<Mutex<Option<Session>>>,
    relay: tokio::sync::Mutex<Option<RelayTask>>,
    send_lock: tokio::sync::Mutex<()>,
    events: EventBroadcaster,
}

impl ConsoleChannel {
    pub fn new(environment: Arc<str>, buffer: usize, events: EventBroadcaster) -> Self {
        Self {
            environment,
            buffer,
            generation: AtomicU64::new(0),
            session: Arc::new(Mutex::new(None)),
            relay: tokio::sync::Mutex::new(None),
            send_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Install a freshly attached backend console.
    pub fn attach(&self, streams: ConsoleStreams) -> Result<(), EnvironmentError> {
        let mut slot = self.session.lock().unwrap();
        if slot.is_some() {
            return Err(EnvironmentError::AlreadyAttached);
        }

        let (sender, _) = broadcast::channel(self.buffer);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *slot = Some(Session {
            generation,
            output: Some(streams.output),
            input: streams.input,
            sender,
        });
        debug!(environment = %self.environment, generation, "Console attached");
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    /// Register a new output subscriber. Only output produced from now on is delivered.
    pub fn subscribe(&self) -> Result<ConsoleSubscriber, EnvironmentError> {
        let slot = self.session.lock().unwrap();
        let session = slot.as_ref().ok_or(EnvironmentError::NotAttached)?;
        Ok(ConsoleSubscriber::new(session.sender.subscribe()))
    }

    /// Number of live subscribers on the current session.
    pub fn subscriber_count(&self) -> usize {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |s| s.sender.receiver_count())
    }

    /// Start relaying backend output to subscribers. Idempotent.
    pub async fn follow(&self) -> Result<(), EnvironmentError> {
        let mut relay = self.relay.lock().await;
        if relay.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return Ok(());
        }

        let (generation, output, sender) = {
            let mut slot = self.session.lock().unwrap();
            let session = slot.as_mut().ok_or(EnvironmentError::NotAttached)?;
            match session.output.take() {
                Some(output) => (session.generation, output, session.sender.clone()),
                // The relay for this session already ran to completion.
                None => return Ok(()),
            }
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(relay_output(
            self.environment.clone(),
            generation,
            output,
            sender,
            self.session.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        *relay = Some(RelayTask { cancel, handle });
        Ok(())
    }

    /// Write one line to the backend input. Concurrent sends are serialized.
    pub async fn send(&self, line: &str) -> Result<(), EnvironmentError> {
        let _ordered = self.send_lock.lock().await;
        let input = {
            let slot = self.session.lock().unwrap();
            slot.as_ref()
                .map(|s| s.input.clone())
                .ok_or(EnvironmentError::NotAttached)?
        };
        trace!(environment = %self.environment, %line, "Sending console command");
        input.write_line(line).await.map_err(EnvironmentError::from)
    }

    /// Stop the relay, wait for it to exit, and close the channel.
    ///
    /// Returns true if a session was detached by this call.
    pub async fn detach(&self) -> bool {
        let task = self.relay.lock().await.take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(environment = %self.environment, error = %e, "Console relay task failed");
            }
        }

        let detached = self.session.lock().unwrap().take().is_some();
        if detached {
            debug!(environment = %self.environment, "Console detached");
            self.events.broadcast(EnvironmentEvent::ConsoleDetached);
        }
        detached
    }
}

impl Drop for ConsoleChannel {
    fn drop(&mut self) {
        if let Some(task) = self.relay.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn relay_output(
    environment: Arc<str>,
    generation: u64,
    mut output: ConsoleOutput,
    sender: broadcast::Sender<String>,
    session: Arc<Mutex<Option<Session>>>,
    events: EventBroadcaster,
    cancel: CancellationToken,
) {
    debug!(environment = %environment, generation, "Console relay started");
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(environment = %environment, "Console relay cancelled");
                break;
            }
            next = output.next() => match next {
                Some(line) => {
                    // No subscribers is fine; output is not replayed.
                    let _ = sender.send(line);
                }
                None => {
                    debug!(environment = %environment, "Backend console output ended");
                    let detached = {
                        let mut slot = session.lock().unwrap();
                        let current = slot.as_ref().is_some_and(|s| s.generation == generation);
                        if current {
                            slot.take();
                        }
                        current
                    };
                    if detached {
                        events.broadcast(EnvironmentEvent::ConsoleDetached);
                    }
                    break;
                }
            }
        }
    }
    debug!(environment = %environment, generation, "Console relay task exiting");
}

/// Receiving end of the console fan-out.
///
/// Dropping the subscriber unsubscribes it.
pub struct ConsoleSubscriber {
    rx: broadcast::Receiver<String>,
    missed: u64,
}

impl ConsoleSubscriber {
    const fn new(rx: broadcast::Receiver<String>) -> Self {
        Self { rx, missed: 0 }
    }

    /// Next output line, or `None` once the console has been detached.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(line) => return Some(line),
                Err(RecvError::Closed) => return None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Console subscriber fell behind, skipping lines");
                    self.missed += skipped;
                }
            }
        }
    }

    /// Lines skipped because this subscriber fell behind.
    pub const fn missed(&self) -> u64 {
        self.missed
    }

    /// Consume the subscriber as a stream of lines.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        let mut subscriber = self;
        async_stream::stream! {
            while let Some(line) = subscriber.recv().await {
                yield line;
            }
        }
    }
}
