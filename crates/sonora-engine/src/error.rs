//! Per-thread record of the most recent failed call.

use std::collections::HashMap;
use std::panic::Location;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use sonora_graph::{ErrorKind, Result};

/// Threads with a pending record. Past this, the thread that failed longest
/// ago loses its record.
const MAX_THREADS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

#[derive(Debug, Default)]
struct Records {
    entries: HashMap<ThreadId, (u64, ErrorRecord)>,
    sequence: u64,
}

impl Records {
    fn insert(&mut self, thread: ThreadId, record: ErrorRecord) {
        if self.entries.len() >= MAX_THREADS && !self.entries.contains_key(&thread) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (sequence, _))| *sequence)
                .map(|(thread, _)| *thread);
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.sequence += 1;
        self.entries.insert(thread, (self.sequence, record));
    }
}

/// Owned by a simulation; every failing public call records into it for the
/// thread that made the call. Only a bounded number of threads keep a record
/// at once; threads that exit without clearing theirs are evicted oldest
/// first.
#[derive(Debug, Default)]
pub struct ErrorContext {
    records: Mutex<Records>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `result` if it is an error and hands it back unchanged.
    #[track_caller]
    pub fn capture<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let location = Location::caller();
            tracing::debug!(%err, file = location.file(), line = location.line(), "call failed");
            self.records.lock().insert(
                thread::current().id(),
                ErrorRecord {
                    kind: err.kind(),
                    message: err.to_string(),
                    file: location.file(),
                    line: location.line(),
                },
            );
        }
        result
    }

    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.records
            .lock()
            .entries
            .get(&thread::current().id())
            .map(|(_, record)| record.clone())
    }

    pub fn clear(&self) {
        self.records.lock().entries.remove(&thread::current().id());
    }
}
