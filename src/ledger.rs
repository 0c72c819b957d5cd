//! Append-only usage ledger.
//!
//! Every successful sign-in appends one [`UsageEvent`] to a JSON Lines file.
//! The file is only ever appended to, except for a reset, which swaps in a
//! new file with a single rename and is therefore all-or-nothing.
//!
//! ## Concurrency
//!
//! Sign-ins and report cycles usually run in different processes, so the
//! ledger file is the only shared state. Every operation takes an exclusive
//! advisory lock on a sidecar `<ledger>.lock` file, then reopens and re-reads
//! the ledger from disk:
//!
//! ```text
//! record / snapshot / reset / reset_delivered
//!   └─> flock(<ledger>.lock) ─> open <ledger> ─> read ─> append | rename
//! ```
//!
//! Nothing about the file is cached between operations, so a process never
//! works from a stale length or appends into a file that a reset in another
//! process has already renamed away. Within one process an `RwLock` orders
//! callers before they contend for the file lock.
//!
//! ## Crash safety
//!
//! A crash during an append can leave a torn final line. The next operation
//! to take the lock truncates it away, so the event is either fully recorded
//! or not at all. A crash during a reset leaves either the old file or the
//! new one in place, never a mix.

use crate::error::{LatexGateError, Result, ResultExt as _};
use crate::gate::Identifier;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt as _;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read as _, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tempfile::NamedTempFile;

/// Default ledger file name inside the data directory.
pub const LEDGER_FILE_NAME: &str = "usage_ledger.jsonl";

/// Suffix of the sidecar file used for cross-process locking.
pub const LOCK_FILE_SUFFIX: &str = ".lock";

/// One access to the tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub identifier: Identifier,
    pub timestamp: DateTime<Utc>,
}

/// In-process state. The file itself is never cached.
#[derive(Debug, Default)]
struct LocalState {
    /// Latest timestamp handed out by this process, kept across resets.
    last_timestamp: Option<DateTime<Utc>>,
}

/// The ledger file opened under the cross-process lock.
///
/// Dropping it closes the lock file, which releases the lock.
struct LockedLedger {
    file: File,
    /// Length of the file up to the last complete line.
    committed_bytes: u64,
    events: Vec<UsageEvent>,
    _lock: File,
}

/// File-backed, append-only ledger of [`UsageEvent`]s.
#[derive(Debug)]
pub struct UsageLedger {
    path: PathBuf,
    lock_path: PathBuf,
    local: RwLock<LocalState>,
}

impl UsageLedger {
    /// Open the ledger at `path`, creating it (and its directory) if needed.
    ///
    /// Any torn trailing line is repaired and every complete line is
    /// checked.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the file cannot be created or
    /// read, or if a complete line in it is not a valid event.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).storage_context(|| {
                format!("Failed to create ledger directory {}", parent.display())
            })?;
        }

        let mut lock_name = OsString::from(path.as_os_str());
        lock_name.push(LOCK_FILE_SUFFIX);

        let ledger = Self {
            lock_path: PathBuf::from(lock_name),
            path,
            local: RwLock::new(LocalState::default()),
        };

        let locked = ledger.lock_and_load()?;
        tracing::debug!(
            path = %ledger.path.display(),
            events = locked.events.len(),
            "Opened usage ledger"
        );
        drop(locked);
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event for `identifier`, timestamped now.
    ///
    /// Timestamps never go backwards: if the clock steps back, the event gets
    /// the previous event's timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the event could not be durably
    /// written. In that case nothing was recorded.
    pub fn record(&self, identifier: &Identifier) -> Result<UsageEvent> {
        let mut local = self.write_local()?;
        let mut locked = self.lock_and_load()?;

        let now = Utc::now();
        let timestamp = [
            local.last_timestamp,
            locked.events.last().map(|e| e.timestamp),
        ]
        .into_iter()
        .flatten()
        .fold(now, Ord::max);
        let event = UsageEvent {
            identifier: identifier.clone(),
            timestamp,
        };

        let mut line = serde_json::to_vec(&event)
            .storage_context(|| "Failed to encode usage event".to_owned())?;
        line.push(b'\n');

        append_or_rollback(&mut locked.file, locked.committed_bytes, &line).map_err(|err| {
            LatexGateError::Storage(format!(
                "Failed to append usage event to {}: {err}",
                self.path.display()
            ))
        })?;
        drop(locked);

        local.last_timestamp = Some(timestamp);
        tracing::info!(identifier = %identifier, %timestamp, "Recorded usage event");
        Ok(event)
    }

    /// Full ledger contents in insertion order, as currently on disk.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the file cannot be read or
    /// contains an invalid line.
    pub fn snapshot(&self) -> Result<Vec<UsageEvent>> {
        let local = self.read_local()?;
        let locked = self.lock_and_load()?;
        drop(local);
        Ok(locked.events)
    }

    /// Number of events currently recorded.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the ledger cannot be read.
    pub fn len(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }

    /// Whether the ledger holds no events.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the ledger cannot be read.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomically replace the ledger with an empty one.
    ///
    /// Resetting an empty ledger is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the replacement could not be
    /// written. The previous contents are then left untouched.
    pub fn reset(&self) -> Result<()> {
        let _local = self.write_local()?;
        let LockedLedger {
            file, events, _lock, ..
        } = self.lock_and_load()?;
        drop(file);
        if events.is_empty() {
            return Ok(());
        }
        self.replace_contents(&[])?;
        tracing::info!(path = %self.path.display(), "Usage ledger reset");
        Ok(())
    }

    /// Atomically remove the events in `delivered` from the front of the
    /// ledger, keeping anything recorded after that snapshot was taken, by
    /// this process or any other.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the ledger no longer starts with
    /// `delivered` (it was reset by someone else) or if the replacement could
    /// not be written. The ledger is unchanged in both cases.
    pub fn reset_delivered(&self, delivered: &[UsageEvent]) -> Result<()> {
        let _local = self.write_local()?;
        let LockedLedger {
            file, events, _lock, ..
        } = self.lock_and_load()?;
        // Windows refuses to rename over a file that is still open.
        drop(file);

        let Some(remaining) = events.strip_prefix(delivered) else {
            return Err(LatexGateError::Storage(
                "Ledger changed underneath the delivered snapshot; refusing to reset".to_owned(),
            ));
        };

        if delivered.is_empty() {
            return Ok(());
        }

        self.replace_contents(remaining)?;
        tracing::info!(
            delivered = delivered.len(),
            retained = remaining.len(),
            "Usage ledger rotated after delivery"
        );
        Ok(())
    }

    /// Take the cross-process lock, then open and parse the ledger.
    fn lock_and_load(&self) -> Result<LockedLedger> {
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .storage_context(|| format!("Failed to open lock file {}", self.lock_path.display()))?;
        lock.lock_exclusive()
            .storage_context(|| format!("Failed to lock {}", self.lock_path.display()))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .storage_context(|| format!("Failed to open ledger {}", self.path.display()))?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .storage_context(|| format!("Failed to read ledger {}", self.path.display()))?;

        let complete_len = raw
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |pos| pos + 1);
        if complete_len < raw.len() {
            tracing::warn!(
                path = %self.path.display(),
                discarded_bytes = raw.len() - complete_len,
                "Discarding torn trailing ledger line"
            );
            file.set_len(complete_len as u64)
                .storage_context(|| "Failed to repair torn ledger line".to_owned())?;
            file.sync_data()
                .storage_context(|| "Failed to sync repaired ledger".to_owned())?;
        }

        let events = parse_events(raw.get(..complete_len).unwrap_or_default())?;
        Ok(LockedLedger {
            file,
            committed_bytes: complete_len as u64,
            events,
            _lock: lock,
        })
    }

    /// Write `events` to a temp file next to the ledger and rename it over
    /// the ledger. The caller holds both locks and no open ledger handle.
    fn replace_contents(&self, events: &[UsageEvent]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp = NamedTempFile::new_in(dir)
            .storage_context(|| format!("Failed to create temp ledger in {}", dir.display()))?;

        let mut bytes = Vec::new();
        for event in events {
            serde_json::to_writer(&mut bytes, event)
                .storage_context(|| "Failed to encode usage event".to_owned())?;
            bytes.push(b'\n');
        }
        temp.write_all(&bytes)
            .storage_context(|| "Failed to write temp ledger".to_owned())?;
        temp.as_file()
            .sync_all()
            .storage_context(|| "Failed to sync temp ledger".to_owned())?;

        temp.persist(&self.path)
            .storage_context(|| format!("Failed to replace ledger {}", self.path.display()))?;
        sync_dir(dir);
        Ok(())
    }

    fn read_local(&self) -> Result<RwLockReadGuard<'_, LocalState>> {
        self.local
            .read()
            .map_err(|_poisoned| LatexGateError::Storage("Ledger lock poisoned".to_owned()))
    }

    fn write_local(&self) -> Result<RwLockWriteGuard<'_, LocalState>> {
        self.local
            .write()
            .map_err(|_poisoned| LatexGateError::Storage("Ledger lock poisoned".to_owned()))
    }
}

/// Storage an event line can be appended to and cut back from.
trait AppendTarget: Write + Seek {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append `line` at `committed`. On failure, cut the target back to
/// `committed` so no partial line is left behind.
fn append_or_rollback<T: AppendTarget>(target: &mut T, committed: u64, line: &[u8]) -> io::Result<()> {
    let written = target
        .seek(SeekFrom::Start(committed))
        .and_then(|_| target.write_all(line))
        .and_then(|()| target.sync());

    if let Err(err) = written {
        if let Err(rollback) = target.truncate_to(committed) {
            tracing::error!(error = %rollback, "Failed to roll back partial ledger append");
        }
        return Err(err);
    }
    Ok(())
}

fn parse_events(raw: &[u8]) -> Result<Vec<UsageEvent>> {
    raw.split(|&b| b == b'\n')
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(index, line)| {
            serde_json::from_slice(line).storage_context(|| {
                format!("Corrupt ledger entry at line {}", index + 1)
            })
        })
        .collect()
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::warn!(dir = %dir.display(), error = %err, "Failed to sync ledger directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn id(token: &str) -> Identifier {
        Identifier::parse(token, 5).unwrap()
    }

    fn open_temp() -> (TempDir, UsageLedger) {
        let dir = TempDir::new().unwrap();
        let ledger = UsageLedger::open(dir.path().join(LEDGER_FILE_NAME)).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_record_then_snapshot_preserves_order() {
        let (_dir, ledger) = open_temp();
        let ids = ["12345", "67890", "12345", "54321", "98765"];
        for token in ids {
            ledger.record(&id(token)).unwrap();
        }

        let events = ledger.snapshot().unwrap();
        assert_eq!(events.len(), ids.len());
        for (event, token) in events.iter().zip(ids) {
            assert_eq!(event.identifier.as_str(), token);
        }
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(ledger.len().unwrap(), ids.len());
    }

    #[test]
    fn test_snapshot_does_not_mutate() {
        let (_dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();
        let first = ledger.snapshot().unwrap();
        let second = ledger.snapshot().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reset_empties_and_is_idempotent() {
        let (_dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();
        ledger.record(&id("67890")).unwrap();

        ledger.reset().unwrap();
        assert!(ledger.snapshot().unwrap().is_empty());

        ledger.reset().unwrap();
        assert!(ledger.is_empty().unwrap());

        // Still appendable after the file was swapped.
        ledger.record(&id("54321")).unwrap();
        assert_eq!(ledger.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_events_survive_reopen() {
        let (dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();
        ledger.record(&id("67890")).unwrap();
        let before = ledger.snapshot().unwrap();
        drop(ledger);

        let reopened = UsageLedger::open(dir.path().join(LEDGER_FILE_NAME)).unwrap();
        assert_eq!(reopened.snapshot().unwrap(), before);
    }

    #[test]
    fn test_open_discards_torn_trailing_line() {
        let (dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();
        drop(ledger);

        let path = dir.path().join(LEDGER_FILE_NAME);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"identifier":"678"#).unwrap();
        drop(file);

        let reopened = UsageLedger::open(&path).unwrap();
        let events = reopened.snapshot().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identifier.as_str(), "12345");

        reopened.record(&id("67890")).unwrap();
        assert_eq!(reopened.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn test_open_rejects_corrupt_complete_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        fs::write(&path, "not json\n").unwrap();

        let err = UsageLedger::open(&path).unwrap_err();
        assert!(matches!(err, LatexGateError::Storage(_)));
    }

    #[test]
    fn test_reset_delivered_keeps_later_events() {
        let (_dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();
        ledger.record(&id("67890")).unwrap();
        let delivered = ledger.snapshot().unwrap();

        let late = ledger.record(&id("54321")).unwrap();

        ledger.reset_delivered(&delivered).unwrap();
        assert_eq!(ledger.snapshot().unwrap(), vec![late]);
    }

    #[test]
    fn test_reset_delivered_refuses_foreign_reset() {
        let (_dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();
        let delivered = ledger.snapshot().unwrap();

        ledger.reset().unwrap();
        ledger.record(&id("67890")).unwrap();

        assert!(ledger.reset_delivered(&delivered).is_err());
        assert_eq!(ledger.snapshot().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_records_are_all_kept() {
        let (_dir, ledger) = open_temp();
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = ["12345", "67890", "54321", "98765"]
            .into_iter()
            .map(|token| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        ledger.record(&id(token)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = ledger.snapshot().unwrap();
        assert_eq!(events.len(), 100);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_concurrent_reset_never_tears_records() {
        let (_dir, ledger) = open_temp();
        let ledger = Arc::new(ledger);

        let writer = {
            let ledger = Arc::clone(&ledger);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    ledger.record(&id("12345")).unwrap();
                }
            })
        };
        for _ in 0..10 {
            ledger.reset().unwrap();
            // Every snapshot parses cleanly, whatever it contains.
            ledger.snapshot().unwrap();
        }
        writer.join().unwrap();

        let events = ledger.snapshot().unwrap();
        assert!(events.len() <= 50);
        assert_eq!(ledger.len().unwrap(), events.len());
    }

    #[test]
    fn test_second_handle_sees_records_from_first() {
        let (dir, reporter) = open_temp();
        let recorder = UsageLedger::open(dir.path().join(LEDGER_FILE_NAME)).unwrap();

        recorder.record(&id("12345")).unwrap();
        let seen = reporter.snapshot().unwrap();
        assert_eq!(seen.len(), 1, "record from another handle must be visible");

        recorder.record(&id("67890")).unwrap();
        reporter.reset_delivered(&seen).unwrap();

        let remaining = recorder.snapshot().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].identifier.as_str(), "67890");
    }

    #[test]
    fn test_record_after_foreign_reset_lands_in_new_file() {
        let (dir, first) = open_temp();
        let second = UsageLedger::open(dir.path().join(LEDGER_FILE_NAME)).unwrap();
        first.record(&id("12345")).unwrap();

        second.reset().unwrap();
        first.record(&id("67890")).unwrap();

        let events = second.snapshot().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identifier.as_str(), "67890");
    }

    #[test]
    fn test_handles_on_separate_threads_keep_every_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        UsageLedger::open(&path).unwrap();

        let handles: Vec<_> = ["12345", "67890", "54321"]
            .into_iter()
            .map(|token| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let ledger = UsageLedger::open(path).unwrap();
                    for _ in 0..20 {
                        ledger.record(&id(token)).unwrap();
                    }
                })
            })
            .collect();
        let rotator = {
            let path = path.clone();
            std::thread::spawn(move || {
                let ledger = UsageLedger::open(path).unwrap();
                let mut rotated = 0;
                for _ in 0..10 {
                    let snapshot = ledger.snapshot().unwrap();
                    ledger.reset_delivered(&snapshot).unwrap();
                    rotated += snapshot.len();
                }
                rotated
            })
        };
        for handle in handles {
            handle.join().unwrap();
        }
        let rotated = rotator.join().unwrap();

        let left = UsageLedger::open(&path).unwrap().len().unwrap();
        assert_eq!(rotated + left, 60, "no record may be lost to a rotation");
    }

    /// Accepts `capacity` bytes, then fails every write.
    struct FullDevice {
        data: io::Cursor<Vec<u8>>,
        capacity: usize,
    }

    impl Write for FullDevice {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity.saturating_sub(self.data.get_ref().len());
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::StorageFull, "device full"));
            }
            let n = room.min(buf.len());
            self.data.write(&buf[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FullDevice {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl AppendTarget for FullDevice {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.get_mut().truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_partial_line() {
        let committed = b"{\"identifier\":\"12345\"}\n".to_vec();
        let committed_len = committed.len() as u64;
        let mut device = FullDevice {
            data: io::Cursor::new(committed.clone()),
            capacity: committed.len() + 5,
        };

        let err = append_or_rollback(&mut device, committed_len, b"{\"identifier\":\"67890\"}\n")
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::StorageFull);
        assert_eq!(device.data.get_ref(), &committed);
    }

    #[cfg(unix)]
    #[test]
    fn test_record_reports_storage_error_and_records_nothing() {
        let (dir, ledger) = open_temp();
        ledger.record(&id("12345")).unwrap();

        let path = dir.path().join(LEDGER_FILE_NAME);
        let parked = dir.path().join("parked.jsonl");
        fs::rename(&path, &parked).unwrap();
        fs::create_dir(&path).unwrap();

        let err = ledger.record(&id("67890")).unwrap_err();
        assert!(matches!(err, LatexGateError::Storage(_)), "got {err:?}");

        fs::remove_dir(&path).unwrap();
        fs::rename(&parked, &path).unwrap();
        assert_eq!(ledger.len().unwrap(), 1);

        let reopened = UsageLedger::open(&path).unwrap();
        let events = reopened.snapshot().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identifier.as_str(), "12345");
    }
}
