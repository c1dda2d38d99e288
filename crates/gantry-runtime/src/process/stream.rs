//! Child output plumbing (non-UTF8-safe).
//!
//! Game servers happily print non-UTF8 bytes. `BufReader::lines()` would end
//! the reader on the first invalid sequence, so lines are read as bytes and
//! decoded lossily.
//!
//! Both pipes feed one queue; the pump appends each line to the log sink and
//! fans it out to attached consoles.

use std::sync::{Arc, Mutex};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Fan-out sender shared between the pump and `attach`. Cleared once the
/// child's output has ended so new attaches fail.
pub type OutputSlot = Arc<Mutex<Option<broadcast::Sender<String>>>>;

pub fn spawn_stream_reader(
    stream: impl AsyncRead + Unpin + Send + 'static,
    environment: Arc<str>,
    stream_type: &'static str,
    lines: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                        if buf.last() == Some(&b'\r') {
                            buf.pop();
                        }
                    }

                    let line = String::from_utf8_lossy(&buf).into_owned();
                    trace!(environment = %environment, %stream_type, "{}", line);
                    if lines.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(environment = %environment, %stream_type, error = %e, "Output reader exiting due to read error");
                    break;
                }
            }
        }

        debug!(environment = %environment, %stream_type, "Output reader task exiting");
    })
}

/// Drain `lines` into the log sink and the console fan-out.
///
/// Runs until every reader has hung up, then clears `slot`.
pub fn spawn_output_pump(
    environment: Arc<str>,
    mut lines: mpsc::Receiver<String>,
    mut sink: File,
    fanout: broadcast::Sender<String>,
    slot: OutputSlot,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sink_failed = false;

        while let Some(line) = lines.recv().await {
            if !sink_failed {
                let mut record = line.clone().into_bytes();
                record.push(b'\n');
                // Flush per line so a tail read sees everything already fanned out.
                let written = match sink.write_all(&record).await {
                    Ok(()) => sink.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    warn!(environment = %environment, error = %e, "Log sink write failed, no longer persisting output");
                    sink_failed = true;
                }
            }

            // Nobody attached is fine; output is persisted above.
            let _ = fanout.send(line);
        }

        if let Err(e) = sink.flush().await {
            warn!(environment = %environment, error = %e, "Failed to flush log sink");
        }
        slot.lock().unwrap().take();
        debug!(environment = %environment, "Output pump exiting");
    })
}
