//! Tail reader for append-only log sinks.
//!
//! Reads a log file backwards in fixed-size chunks until enough complete lines
//! have been collected, then returns them oldest first.

use gantry_core::EnvironmentError;
use std::io::{ErrorKind, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Bytes read from the sink per backward step
const CHUNK_SIZE: usize = 8 * 1024;

/// Read the tail of the log sink at `path`.
///
/// Collects complete lines from the end until their combined length
/// (newlines excluded) reaches `budget` bytes or the start of the file is
/// reached. A sink shorter than `budget` yields everything it holds.
pub async fn read_log_tail(path: &Path, budget: u64) -> Result<Vec<String>, EnvironmentError> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(EnvironmentError::LogNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    if budget == 0 {
        return Ok(Vec::new());
    }

    let len = file.metadata().await?.len();
    let mut pos = len;
    let mut chunks: Vec<Vec<u8>> = Vec::new();
    let mut tally = LineTally::default();

    while pos > 0 {
        let step = usize::try_from(pos).map_or(CHUNK_SIZE, |left| left.min(CHUNK_SIZE));
        pos -= step as u64;

        let mut chunk = vec![0u8; step];
        file.seek(SeekFrom::Start(pos)).await?;
        file.read_exact(&mut chunk).await?;
        tally.prepend(&chunk, pos == 0);
        chunks.push(chunk);

        if tally.complete >= budget {
            break;
        }
    }

    let buf: Vec<u8> = chunks.into_iter().rev().flatten().collect();
    let lines = split_lines(&buf, pos == 0);
    debug!(
        path = %path.display(),
        budget,
        bytes_read = buf.len(),
        lines = lines.len(),
        "Read log tail"
    );
    Ok(lines)
}

/// Running count of line bytes seen while reading backwards.
///
/// Newlines and carriage returns are not counted.
#[derive(Debug, Default)]
struct LineTally {
    /// Bytes in lines known to be complete.
    complete: u64,
    /// Bytes before the earliest newline read so far.
    fragment: u64,
}

impl LineTally {
    /// Account for `chunk`, which precedes everything read so far.
    fn prepend(&mut self, chunk: &[u8], at_start: bool) {
        match chunk.iter().position(|&b| b == b'\n') {
            Some(first) => {
                self.complete += content_len(&chunk[first + 1..]) + self.fragment;
                self.fragment = content_len(&chunk[..first]);
            }
            None => self.fragment += content_len(chunk),
        }
        if at_start {
            self.complete += self.fragment;
            self.fragment = 0;
        }
    }
}

fn content_len(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b != b'\n' && b != b'\r').count() as u64
}

/// Split `buf` into lines, dropping the leading fragment unless `at_start`.
fn split_lines(buf: &[u8], at_start: bool) -> Vec<String> {
    let body = if at_start {
        buf
    } else {
        match buf.iter().position(|&b| b == b'\n') {
            Some(i) => &buf[i + 1..],
            None => return Vec::new(),
        }
    };

    if body.is_empty() {
        return Vec::new();
    }

    let text = String::from_utf8_lossy(body);
    let text = text.strip_suffix('\n').unwrap_or(&text);
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}
