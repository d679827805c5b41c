//! Views derived from the agent's JSONL transcript
//!
//! The transcript is an append-only file, one JSON object per line, whose
//! path arrives in hook events (see [`EventStore::transcript_path`]). Two
//! independent views are computed from it:
//!
//! - [`UsageTotals`]: token counters summed over every line with `message.usage`
//! - [`Conversation`]: user/assistant text, superseded by `uuid`, sorted by `timestamp`
//!
//! Each view sits behind its own [`TranscriptCache`].
//!
//! # Refresh policy
//!
//! - Within `ttl` of the last check the cached value is returned as-is,
//!   even if the file has changed since.
//! - Past `ttl` the file is stat'ed; an unchanged mtime keeps the cached value.
//! - A changed mtime (or a different path) triggers a full re-parse from byte 0.
//! - Any open/stat/read failure falls back to the previous value
//!   ([`CacheState::Stale`]), or [`CacheState::Unavailable`] if none was ever parsed.
//!
//! # Error Handling
//!
//! Lines that are blank or fail to decode are skipped; parsing continues.
//! A read error ends the parse and the cache keeps its previous value.
//!
//! [`EventStore::transcript_path`]: crate::store::EventStore::transcript_path

mod conversation;
mod usage;

pub use conversation::{Conversation, ConversationEntry};
pub use usage::UsageTotals;

use crate::error::Result;
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

/// Minimum interval between file checks
pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

/// A view computed by folding transcript lines in file order.
pub trait TranscriptView: Default + Send + Sync + 'static {
    /// Short name used in log fields
    const KIND: &'static str;

    /// Fold one decoded line into the view.
    fn ingest_line(&mut self, record: &Value);

    /// Called once after the last line.
    fn finish(&mut self) {}
}

/// Parse a whole transcript file into `V`.
///
/// Bad lines are skipped; failing to open or read the file is an error.
pub fn parse_file<V: TranscriptView>(path: &Path) -> Result<V> {
    let file = File::open(path)?;
    Ok(parse_reader(BufReader::new(file))?)
}

/// Parse transcript lines from any reader.
///
/// Lines that are blank, not UTF-8, or not JSON are skipped. The first read
/// error aborts the parse so a half-read file never replaces a good view.
pub fn parse_reader<V: TranscriptView, R: BufRead>(mut reader: R) -> io::Result<V> {
    let mut view = V::default();
    let mut skipped = 0usize;
    let mut line = Vec::new();
    let mut number = 0usize;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        number += 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Value>(&line) {
            Ok(record) => view.ingest_line(&record),
            Err(e) => {
                tracing::debug!(kind = V::KIND, line = number, error = %e, "Skipping undecodable transcript line");
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        tracing::debug!(kind = V::KIND, skipped, "Transcript lines skipped");
    }

    view.finish();
    Ok(view)
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheState<V> {
    /// Current as of the refresh policy (within TTL, unchanged mtime, or just parsed)
    Fresh(Arc<V>),
    /// Last good value, served because the file could not be read
    Stale(Arc<V>),
    /// No transcript known, or nothing has ever parsed
    Unavailable,
}

impl<V> CacheState<V> {
    /// The value, whether fresh or stale
    pub fn value(&self) -> Option<&Arc<V>> {
        match self {
            CacheState::Fresh(v) | CacheState::Stale(v) => Some(v),
            CacheState::Unavailable => None,
        }
    }

    pub fn into_value(self) -> Option<Arc<V>> {
        match self {
            CacheState::Fresh(v) | CacheState::Stale(v) => Some(v),
            CacheState::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, CacheState::Unavailable)
    }
}

struct CacheSlot<V> {
    path: PathBuf,
    value: Arc<V>,
    modified: SystemTime,
    checked_at: Instant,
}

/// TTL + mtime cache over one transcript view.
///
/// The lock is held across check-and-reparse, so concurrent readers wait for
/// an in-flight parse instead of starting their own.
pub struct TranscriptCache<V> {
    slot: Mutex<Option<CacheSlot<V>>>,
    ttl: Duration,
}

impl<V> std::fmt::Debug for TranscriptCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<V: TranscriptView> Default for TranscriptCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: TranscriptView> TranscriptCache<V> {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CacheSlot<V>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the view for `path`, refreshing per the policy in the module docs.
    ///
    /// `None` means no transcript has been discovered; the filesystem is not touched.
    /// Blocking: call from a blocking context.
    pub fn get(&self, path: Option<&Path>) -> CacheState<V> {
        let Some(path) = path else {
            return CacheState::Unavailable;
        };

        let mut slot = self.lock();
        let now = Instant::now();

        if let Some(cached) = slot.as_mut().filter(|s| s.path == path) {
            if now.duration_since(cached.checked_at) < self.ttl {
                return CacheState::Fresh(Arc::clone(&cached.value));
            }
            cached.checked_at = now;
        }

        let modified = match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(e) => return Self::fallback(slot.as_ref(), path, &e),
        };

        if let Some(cached) = slot.as_ref().filter(|s| s.path == path) {
            if cached.modified == modified {
                return CacheState::Fresh(Arc::clone(&cached.value));
            }
        }

        match parse_file::<V>(path) {
            Ok(value) => {
                tracing::debug!(kind = V::KIND, path = %path.display(), "Transcript view refreshed");
                let value = Arc::new(value);
                *slot = Some(CacheSlot {
                    path: path.to_path_buf(),
                    value: Arc::clone(&value),
                    modified,
                    checked_at: now,
                });
                CacheState::Fresh(value)
            }
            Err(e) => Self::fallback(slot.as_ref(), path, &e),
        }
    }

    fn fallback(
        slot: Option<&CacheSlot<V>>,
        path: &Path,
        error: &dyn std::fmt::Display,
    ) -> CacheState<V> {
        tracing::debug!(kind = V::KIND, path = %path.display(), error = %error, "Transcript unreadable");
        match slot {
            Some(cached) => CacheState::Stale(Arc::clone(&cached.value)),
            None => CacheState::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut file = File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    fn bump_mtime(path: &Path, secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(secs))
            .unwrap();
    }

    const TEN: &str = r#"{"message":{"usage":{"input_tokens":10}}}"#;
    const FIVE: &str = r#"{"message":{"usage":{"input_tokens":5,"output_tokens":2}}}"#;

    #[test]
    fn test_no_path_is_unavailable() {
        let cache: TranscriptCache<UsageTotals> = TranscriptCache::new();
        assert_eq!(cache.get(None), CacheState::Unavailable);
    }

    #[test]
    fn test_missing_file_without_history_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::ZERO);

        let state = cache.get(Some(&dir.path().join("nope.jsonl")));
        assert_eq!(state, CacheState::Unavailable);
        assert!(!state.is_available());
    }

    #[test]
    fn test_within_ttl_returns_cached_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[TEN]);

        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::from_secs(60));
        let first = cache.get(Some(&path)).into_value().unwrap();
        assert_eq!(first.input_tokens, 10);

        write_lines(&path, &[TEN, FIVE]);
        bump_mtime(&path, 10);

        let second = cache.get(Some(&path)).into_value().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            serde_json::to_string(&*first).unwrap(),
            serde_json::to_string(&*second).unwrap()
        );
    }

    #[test]
    fn test_past_ttl_reparses_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[TEN]);

        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::ZERO);
        assert_eq!(cache.get(Some(&path)).into_value().unwrap().input_tokens, 10);

        write_lines(&path, &[TEN, FIVE]);
        bump_mtime(&path, 10);

        let refreshed = cache.get(Some(&path)).into_value().unwrap();
        assert_eq!(refreshed.input_tokens, 15);
        assert_eq!(refreshed.api_messages, 2);
    }

    #[test]
    fn test_unchanged_mtime_keeps_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[TEN]);
        bump_mtime(&path, 0);

        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::ZERO);
        let first = cache.get(Some(&path)).into_value().unwrap();
        let second = cache.get(Some(&path)).into_value().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unreadable_file_falls_back_to_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[TEN]);

        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::ZERO);
        assert!(matches!(cache.get(Some(&path)), CacheState::Fresh(_)));

        std::fs::remove_file(&path).unwrap();
        match cache.get(Some(&path)) {
            CacheState::Stale(v) => assert_eq!(v.input_tokens, 10),
            other => panic!("expected stale value, got {other:?}"),
        }
    }

    #[test]
    fn test_path_turned_directory_falls_back_to_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        write_lines(&path, &[TEN]);

        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::ZERO);
        assert!(matches!(cache.get(Some(&path)), CacheState::Fresh(_)));

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        File::open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        // Run on a thread so a stuck read fails the test instead of hanging it
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(cache.get(Some(&path)));
        });

        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(CacheState::Stale(v)) => assert_eq!(v.input_tokens, 10),
            Ok(other) => panic!("expected stale value, got {other:?}"),
            Err(_) => panic!("refresh did not return"),
        }
    }

    #[test]
    fn test_directory_without_history_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::ZERO);
        assert_eq!(cache.get(Some(dir.path())), CacheState::Unavailable);
    }

    #[test]
    fn test_read_error_aborts_parse() {
        struct FailAfterFirstLine(Option<&'static [u8]>);

        impl io::Read for FailAfterFirstLine {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.take() {
                    Some(bytes) => {
                        buf[..bytes.len()].copy_from_slice(bytes);
                        Ok(bytes.len())
                    }
                    None => Err(io::Error::other("disk went away")),
                }
            }
        }

        let first_line: &'static [u8] = b"{\"message\":{\"usage\":{}}}\n";
        let reader = BufReader::new(FailAfterFirstLine(Some(first_line)));
        let result: io::Result<UsageTotals> = parse_reader(reader);
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_non_utf8_line_is_skipped() {
        let mut input = format!("{TEN}\n").into_bytes();
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(format!("{FIVE}\n").as_bytes());

        let totals: UsageTotals = parse_reader(input.as_slice()).unwrap();
        assert_eq!(totals.input_tokens, 15);
        assert_eq!(totals.api_messages, 2);
    }

    #[test]
    fn test_path_change_forces_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jsonl");
        let b = dir.path().join("b.jsonl");
        write_lines(&a, &[TEN]);
        write_lines(&b, &[FIVE]);

        let cache: TranscriptCache<UsageTotals> = TranscriptCache::with_ttl(Duration::from_secs(60));
        assert_eq!(cache.get(Some(&a)).into_value().unwrap().input_tokens, 10);
        assert_eq!(cache.get(Some(&b)).into_value().unwrap().input_tokens, 5);
    }

    #[test]
    fn test_parse_reader_skips_garbage() {
        let input = format!("{TEN}\nnot json\n\n{{\"truncated\": \n{FIVE}\n");
        let totals: UsageTotals = parse_reader(input.as_bytes()).unwrap();
        assert_eq!(totals.input_tokens, 15);
        assert_eq!(totals.output_tokens, 2);
        assert_eq!(totals.api_messages, 2);
    }
}
