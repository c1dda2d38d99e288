//! Serialized writer for a child's stdin.

use async_trait::async_trait;
use gantry_core::{ConsoleInput, DriverError};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Queued writes before `write_line` waits for the writer.
const QUEUE_DEPTH: usize = 64;

struct WriteRequest {
    line: String,
    done: oneshot::Sender<io::Result<()>>,
}

/// Console input backed by a single writer task.
///
/// Every line goes through one queue, so concurrent callers are written in
/// the order they were queued and never interleave.
pub struct StdinWriter {
    requests: mpsc::Sender<WriteRequest>,
}

impl StdinWriter {
    pub fn spawn(stdin: ChildStdin, environment: Arc<str>) -> (Arc<Self>, JoinHandle<()>) {
        let (requests, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(write_loop(stdin, rx, environment));
        (Arc::new(Self { requests }), handle)
    }
}

#[async_trait]
impl ConsoleInput for StdinWriter {
    async fn write_line(&self, line: &str) -> Result<(), DriverError> {
        let (done, result) = oneshot::channel();
        self.requests
            .send(WriteRequest {
                line: line.to_string(),
                done,
            })
            .await
            .map_err(|_| DriverError::Input("stdin writer has exited".to_string()))?;

        result
            .await
            .map_err(|_| DriverError::Input("stdin writer has exited".to_string()))?
            .map_err(|e| DriverError::Input(e.to_string()))
    }
}

async fn write_loop(
    mut stdin: ChildStdin,
    mut requests: mpsc::Receiver<WriteRequest>,
    environment: Arc<str>,
) {
    while let Some(request) = requests.recv().await {
        let result = write_one(&mut stdin, &request.line).await;
        let failed = result.is_err();
        let _ = request.done.send(result);
        if failed {
            break;
        }
    }
    debug!(environment = %environment, "Stdin writer exiting");
}

async fn write_one(stdin: &mut ChildStdin, line: &str) -> io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}
