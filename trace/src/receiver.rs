use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::conf::{Conf, LOCAL_FILE_PATH_KEY, SPAN_RECEIVER_KEY};
use crate::net_receiver::NetReceiver;
use crate::span::Span;

/// Counters describing what a receiver has done with the spans it was given.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
pub struct ReceiverStats {
    /// Spans offered via submit.
    pub submitted: u64,
    /// Spans discarded because the buffer was full or the receiver closed.
    pub dropped: u64,
    /// Spans successfully handed to the destination.
    pub sent: u64,
    /// Batches discarded after exhausting their send attempts.
    pub send_failures: u64,
    /// Flush cycles performed by the background worker.
    pub flushes: u64,
}

/// SpanReceiver consumes completed spans.
///
/// submit must be safe for concurrent use and must return quickly; a
/// receiver that does significant work per span should do it on its own
/// background thread. Failures inside a receiver are logged, never
/// surfaced to the submitting thread.
pub trait SpanReceiver: Send + Sync {
    /// Accepts ownership of a completed span.
    fn submit(&self, span: Span);

    /// Drains buffered spans within a bounded time and releases resources.
    /// Further submissions are silently discarded. Idempotent.
    fn shutdown(&self) {}

    /// A snapshot of this receiver's counters.
    fn stats(&self) -> ReceiverStats {
        ReceiverStats::default()
    }
}

/// NoopReceiver discards every span.
pub struct NoopReceiver;

impl SpanReceiver for NoopReceiver {
    fn submit(&self, _span: Span) {}
}

/// LocalFileReceiver appends one JSON object per span to a local file.
pub struct LocalFileReceiver {
    path: PathBuf,
    file: Mutex<std::fs::File>,
    stats: Mutex<ReceiverStats>,
}

impl LocalFileReceiver {
    /// Opens (or creates) the file at `path` for appending.
    pub fn new(path: &str) -> std::io::Result<LocalFileReceiver> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LocalFileReceiver {
            path: PathBuf::from(path),
            file: Mutex::new(file),
            stats: Mutex::new(ReceiverStats::default()),
        })
    }
}

impl SpanReceiver for LocalFileReceiver {
    fn submit(&self, span: Span) {
        let mut stats = self.stats.lock().unwrap();
        stats.submitted += 1;
        let mut line = match serde_json::to_string(&span) {
            Ok(line) => line,
            Err(e) => {
                stats.dropped += 1;
                warn!("failed to serialize span {}: {}", span.span_id(), e);
                return;
            }
        };
        line.push('\n');
        let mut file = self.file.lock().unwrap();
        match file.write_all(line.as_bytes()) {
            Ok(()) => stats.sent += 1,
            Err(e) => {
                stats.dropped += 1;
                warn!("failed to append span to {:?}: {}", self.path, e);
            }
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.file.lock().unwrap().flush() {
            warn!("failed to flush {:?}: {}", self.path, e);
        }
    }

    fn stats(&self) -> ReceiverStats {
        *self.stats.lock().unwrap()
    }
}

/// from_conf resolves the receiver named by the `span.receiver` key.
///
/// Recoverable misconfiguration (an unknown kind, a missing path or
/// address) falls back to the no-op receiver with a warning rather than
/// failing: tracing must never break the host application.
pub fn from_conf(conf: &Conf) -> Arc<dyn SpanReceiver> {
    match conf.get(SPAN_RECEIVER_KEY) {
        None | Some("noop") => Arc::new(NoopReceiver),
        Some("local.file") => match conf.get(LOCAL_FILE_PATH_KEY) {
            Some(path) => match LocalFileReceiver::new(path) {
                Ok(rcv) => Arc::new(rcv),
                Err(e) => {
                    warn!("cannot open span file {:?}: {}; using noop receiver", path, e);
                    Arc::new(NoopReceiver)
                }
            },
            None => {
                warn!(
                    "span.receiver=local.file but {:?} is unset; using noop receiver",
                    LOCAL_FILE_PATH_KEY
                );
                Arc::new(NoopReceiver)
            }
        },
        Some("collector") => match NetReceiver::from_conf(conf) {
            Ok(rcv) => Arc::new(rcv),
            Err(e) => {
                warn!("cannot start collector receiver: {}; using noop receiver", e);
                Arc::new(NoopReceiver)
            }
        },
        Some(other) => {
            warn!("unknown span receiver kind {:?}; using noop receiver", other);
            Arc::new(NoopReceiver)
        }
    }
}
