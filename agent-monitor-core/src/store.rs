//! Bounded in-memory event history with running tallies
//!
//! [`EventStore::append`] is the only mutation. Under one lock it:
//! 1. pushes the event, evicting the oldest entries past [`MAX_EVENTS`]
//! 2. bumps the lifetime tool tally (`unknown` when `tool_name` is absent)
//! 3. records `tool_input.file_path` for `Read` (read set) and `Edit`/`Write` (written set)
//! 4. adopts the event's `transcript_path` when that file exists
//!
//! Tallies and file sets only ever grow; eviction touches the event list alone.

use crate::event::{Event, UNKNOWN_TOOL};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Maximum number of events retained in memory
pub const MAX_EVENTS: usize = 1000;

/// Number of events served by the recent-events query
pub const SNAPSHOT_LIMIT: usize = 200;

/// Aggregate counters served by `/api/stats`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub tool_counts: BTreeMap<String, u64>,
    /// Sorted, distinct
    pub files_read: Vec<String>,
    /// Sorted, distinct
    pub files_written: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    events: VecDeque<Arc<Event>>,
    tool_counts: BTreeMap<String, u64>,
    files_read: BTreeSet<String>,
    files_written: BTreeSet<String>,
    transcript_path: Option<PathBuf>,
}

/// Process-wide event history.
#[derive(Debug)]
pub struct EventStore {
    inner: Mutex<StoreInner>,
    capacity: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a store retaining [`MAX_EVENTS`] events.
    pub fn new() -> Self {
        Self::with_capacity(MAX_EVENTS)
    }

    /// Create a store with a custom retention cap (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an event.
    ///
    /// The transcript file check happens before the lock is taken.
    pub fn append(&self, event: Arc<Event>) {
        self.append_then(event, |_| ());
    }

    /// Record an event, then run `then` before releasing the lock.
    ///
    /// Ingestion publishes from `then`, so viewers receive events in exactly
    /// the order they were appended. `then` must not block or touch the store.
    pub fn append_then<R>(&self, event: Arc<Event>, then: impl FnOnce(&Arc<Event>) -> R) -> R {
        let transcript = event
            .transcript_path()
            .map(PathBuf::from)
            .filter(|p| p.is_file());

        let tool = event.tool_name().unwrap_or(UNKNOWN_TOOL).to_string();
        let file_path = event.tool_input_file_path().map(str::to_string);

        let mut inner = self.lock();

        inner.events.push_back(Arc::clone(&event));
        while inner.events.len() > self.capacity {
            inner.events.pop_front();
        }

        if let Some(path) = file_path {
            match tool.as_str() {
                "Read" => {
                    inner.files_read.insert(path);
                }
                "Edit" | "Write" => {
                    inner.files_written.insert(path);
                }
                _ => {}
            }
        }

        *inner.tool_counts.entry(tool).or_insert(0) += 1;

        if let Some(path) = transcript {
            if inner.transcript_path.as_ref() != Some(&path) {
                tracing::info!(path = %path.display(), "Transcript discovered");
                inner.transcript_path = Some(path);
            }
        }

        then(&event)
    }

    /// The most recent `limit` events, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<Arc<Event>> {
        let inner = self.lock();
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }

    /// Tool tallies and file sets.
    pub fn stats(&self) -> Stats {
        let inner = self.lock();
        Stats {
            tool_counts: inner.tool_counts.clone(),
            files_read: inner.files_read.iter().cloned().collect(),
            files_written: inner.files_written.iter().cloned().collect(),
        }
    }

    /// Transcript file most recently announced by an event, if any.
    pub fn transcript_path(&self) -> Option<PathBuf> {
        self.lock().transcript_path.clone()
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retention cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
