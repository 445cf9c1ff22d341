//! Log conduit
//!
//! Carries the ordered log of one build from its single producer to any number
//! of observers:
//! - The write end (`LogWriter`) is owned by the pipeline executor and is the
//!   only thing that can append or close
//! - The read side (`LogConduit`) is a cloneable handle kept by the intake
//!   layer; every `subscribe()` call yields an independent `LogSubscriber`
//!
//! The conduit keeps a bounded ring of the most recent lines. Subscribers
//! start at the oldest retained line, so one attached before the build starts
//! sees everything and one attached later gets the retained history replayed
//! before following live. Appending never waits on a subscriber: once the ring
//! is full the oldest line is evicted, and a subscriber that had not read it
//! yet is told how many lines it missed.

use chrono::{DateTime, Utc};
use dockyard_core::domain::log::{LogKind, LogLine};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

/// Default number of lines retained per build
pub const DEFAULT_CAPACITY: usize = 512;

/// Creates a conduit retaining at most `capacity` lines
///
/// Returns the write end for the producer and the read side for observers.
pub fn conduit(capacity: usize) -> (LogWriter, LogConduit) {
    let (changes, _) = watch::channel(0u64);
    let shared = Arc::new(Shared {
        state: Mutex::new(ConduitState {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            first_seq: 0,
            next_seq: 0,
            closed_at: None,
        }),
        capacity: capacity.max(1),
        changes,
    });

    (
        LogWriter {
            shared: Arc::clone(&shared),
            closed: false,
        },
        LogConduit { shared },
    )
}

/// Error returned by `LogSubscriber::recv`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The subscriber fell behind the retained window and this many lines
    /// were evicted before it could read them
    #[error("subscriber lagged behind by {0} lines")]
    Lagged(u64),
}

struct ConduitState {
    lines: VecDeque<LogLine>,
    /// Sequence number of `lines[0]`
    first_seq: u64,
    next_seq: u64,
    closed_at: Option<DateTime<Utc>>,
}

struct Shared {
    state: Mutex<ConduitState>,
    capacity: usize,
    /// Bumped after every append and on close to wake subscribers
    changes: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConduitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

/// Producer end of a conduit
///
/// Closing consumes the writer, so no line can follow the close. Dropping a
/// writer that was not closed explicitly closes the conduit, which keeps
/// end-of-stream observable on every exit path.
pub struct LogWriter {
    shared: Arc<Shared>,
    closed: bool,
}

impl LogWriter {
    /// Appends an informational line
    pub fn info(&self, message: impl Into<String>) -> u64 {
        self.push(LogKind::Info, message.into())
    }

    /// Appends a success marker and closes the conduit
    pub fn complete(mut self, message: impl Into<String>) {
        self.push(LogKind::Terminal, message.into());
        self.finish();
    }

    /// Appends an error line and closes the conduit
    pub fn fail(mut self, message: impl Into<String>) {
        self.push(LogKind::Error, message.into());
        self.finish();
    }

    /// Closes the conduit without a final marker
    pub fn close(mut self) {
        self.finish();
    }

    fn push(&self, kind: LogKind, message: String) -> u64 {
        let seq = {
            let mut state = self.shared.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.lines.push_back(LogLine {
                seq,
                timestamp: Utc::now(),
                kind,
                message,
            });
            if state.lines.len() > self.shared.capacity {
                state.lines.pop_front();
                state.first_seq += 1;
            }
            seq
        };
        self.shared.notify();
        seq
    }

    fn finish(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.lock().closed_at = Some(Utc::now());
        self.shared.notify();
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Read side of a conduit
#[derive(Clone)]
pub struct LogConduit {
    shared: Arc<Shared>,
}

impl LogConduit {
    /// Creates a subscriber starting at the oldest retained line
    pub fn subscribe(&self) -> LogSubscriber {
        let changes = self.shared.changes.subscribe();
        let cursor = self.shared.lock().first_seq;
        LogSubscriber {
            shared: Arc::clone(&self.shared),
            cursor,
            changes,
        }
    }

    /// When the conduit was closed, if it has been
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().closed_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at().is_some()
    }

    /// Total number of lines ever written, including evicted ones
    pub fn written(&self) -> u64 {
        self.shared.lock().next_seq
    }
}

/// Independent reader over a conduit
pub struct LogSubscriber {
    shared: Arc<Shared>,
    cursor: u64,
    changes: watch::Receiver<u64>,
}

impl LogSubscriber {
    /// Waits for the next line
    ///
    /// Returns `Ok(None)` once every line has been delivered and the conduit
    /// is closed; every later call returns `Ok(None)` again.
    pub async fn recv(&mut self) -> Result<Option<LogLine>, RecvError> {
        loop {
            // Mark the current version as seen before inspecting the state so
            // an append racing with this check still wakes `changed()` below.
            let _ = self.changes.borrow_and_update();

            if let Some(ready) = self.poll_next() {
                return ready;
            }

            // The sender lives in `Shared`, which this subscriber keeps alive.
            let _ = self.changes.changed().await;
        }
    }

    /// Returns the next line if one is available without waiting
    pub fn try_recv(&mut self) -> Result<Option<LogLine>, RecvError> {
        self.poll_next().unwrap_or(Ok(None))
    }

    /// `None` means nothing is available yet and the conduit is still open
    fn poll_next(&mut self) -> Option<Result<Option<LogLine>, RecvError>> {
        let state = self.shared.lock();

        if self.cursor < state.first_seq {
            let missed = state.first_seq - self.cursor;
            self.cursor = state.first_seq;
            return Some(Err(RecvError::Lagged(missed)));
        }

        if self.cursor < state.next_seq {
            let index = (self.cursor - state.first_seq) as usize;
            let line = state.lines[index].clone();
            self.cursor += 1;
            return Some(Ok(Some(line)));
        }

        state.closed_at.map(|_| Ok(None))
    }

    /// Collects every remaining line until the conduit closes, skipping over
    /// any lag
    pub async fn collect(mut self) -> Vec<LogLine> {
        let mut lines = Vec::new();
        loop {
            match self.recv().await {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => return lines,
                Err(RecvError::Lagged(_)) => continue,
            }
        }
    }
}
