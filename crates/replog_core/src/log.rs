//! A rotating, purgeable log spread over several files.
//!
//! ```text
//! <log_dir>/
//! ├─ 1_2.log      # sealed: keys 1..=2, read-only
//! ├─ 3_4.log      # sealed: keys 3..=4, read-only
//! └─ head.log     # head: every append lands here
//! ```
//!
//! Sealed files are named after their lowest and highest key, using the
//! codec's key tokens. When the head file crosses a rotation threshold it is
//! sealed in place (renamed, same handle) and a new empty head file is
//! created, so cursors reading the old head carry on into the new one.

use crate::clock::{Clock, SystemClock};
use crate::codec::{RecordCodec, RecordOf};
use crate::config::LogConfig;
use crate::cursor::{KeyMatchingStrategy, LogCursor, PositionStrategy};
use crate::error::{ChangelogError, ChangelogResult};
use crate::log_file::LogFile;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the head file inside a log directory.
pub const HEAD_FILE_NAME: &str = "head.log";

/// Extension shared by every log file.
pub const LOG_FILE_SUFFIX: &str = ".log";

/// Separates the low and high key tokens in a sealed file name.
pub const TOKEN_SEPARATOR: char = '_';

/// Notified after the head file of a log has been sealed.
pub trait RotationObserver: Send + Sync + fmt::Debug {
    /// Called with the log directory and the rotation time in milliseconds.
    fn log_rotated(&self, log_path: &Path, rotated_at_millis: u64);
}

pub(crate) struct LogState<C: RecordCodec> {
    sealed: BTreeMap<C::Key, Arc<LogFile<C>>>,
    head: Arc<LogFile<C>>,
    last_rotation: u64,
    closed: bool,
}

impl<C: RecordCodec> LogState<C> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn oldest_file(&self) -> Arc<LogFile<C>> {
        Arc::clone(self.sealed.values().next().unwrap_or(&self.head))
    }

    fn files_in_order(&self) -> Vec<Arc<LogFile<C>>> {
        self.sealed
            .values()
            .chain(std::iter::once(&self.head))
            .cloned()
            .collect()
    }

    /// Returns the file that follows `file`, or `None` for the head file.
    pub(crate) fn next_file_after(&self, file: &Arc<LogFile<C>>) -> Option<Arc<LogFile<C>>> {
        if Arc::ptr_eq(file, &self.head) {
            return None;
        }
        let mut files = self.sealed.values();
        files.position(|sealed| Arc::ptr_eq(sealed, file))?;
        let next = files.next().unwrap_or(&self.head);
        (!Arc::ptr_eq(next, file)).then(|| Arc::clone(next))
    }

    fn find_log_file_for(
        &self,
        key: &C::Key,
        matching: KeyMatchingStrategy,
    ) -> ChangelogResult<Arc<LogFile<C>>> {
        let Some((_, floor)) = self.sealed.range(..key).next_back() else {
            return Ok(self.oldest_file());
        };
        let candidate = self
            .sealed
            .range(key..)
            .next()
            .map_or(&self.head, |(_, file)| file);

        if matching == KeyMatchingStrategy::LessThanOrEqualToKey {
            let starts_above = candidate
                .oldest_record()?
                .is_none_or(|oldest| oldest.key() > key);
            if starts_above {
                return Ok(Arc::clone(floor));
            }
        }
        Ok(Arc::clone(candidate))
    }

    fn oldest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        self.oldest_file().oldest_record()
    }

    fn newest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        if let Some(record) = self.head.newest_record()? {
            return Ok(Some(record));
        }
        match self.sealed.values().next_back() {
            Some(file) => file.newest_record(),
            None => Ok(None),
        }
    }

    fn breaks_key_ordering(&self, record: &RecordOf<C>) -> ChangelogResult<bool> {
        if self.head.append_would_break_key_ordering(record) {
            return Ok(true);
        }
        if !self.head.is_empty()? {
            return Ok(false);
        }
        Ok(self
            .sealed
            .keys()
            .next_back()
            .is_some_and(|newest| record.key() <= newest))
    }
}

pub(crate) struct LogShared<C: RecordCodec> {
    pub(crate) path: PathBuf,
    codec: Arc<C>,
    config: LogConfig,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn RotationObserver>>,
    pub(crate) state: RwLock<LogState<C>>,
    handles: AtomicUsize,
    pub(crate) open_cursors: AtomicUsize,
}

impl<C: RecordCodec> LogShared<C> {
    pub(crate) fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    fn ensure_open(&self, state: &LogState<C>) -> ChangelogResult<()> {
        if state.closed {
            return Err(ChangelogError::log_closed(&self.path));
        }
        Ok(())
    }

    fn must_rotate(&self, state: &LogState<C>) -> ChangelogResult<bool> {
        if state.head.is_empty()? {
            return Ok(false);
        }

        let policy = &self.config.rotation;
        let elapsed = u128::from(self.clock.now_millis().saturating_sub(state.last_rotation));
        if !policy.min_rotation_interval.is_zero()
            && elapsed < policy.min_rotation_interval.as_millis()
        {
            return Ok(false);
        }

        let size = state.head.size_in_bytes()?;
        if size > policy.max_file_size {
            debug!(path = %self.path.display(), size, "rotating log due to size");
            return Ok(true);
        }
        if !policy.rotation_interval.is_zero() && elapsed > policy.rotation_interval.as_millis() {
            debug!(path = %self.path.display(), elapsed_ms = %elapsed, "rotating log due to time");
            return Ok(true);
        }
        Ok(false)
    }

    fn rotate(&self, state: &mut LogState<C>) -> ChangelogResult<()> {
        let head = Arc::clone(&state.head);
        let (Some(oldest), Some(newest)) = (head.oldest_record()?, head.newest_record()?) else {
            return Ok(());
        };

        let name = format!(
            "{}{TOKEN_SEPARATOR}{}{LOG_FILE_SUFFIX}",
            self.codec.key_to_token(oldest.key()),
            self.codec.key_to_token(newest.key()),
        );
        head.seal(&self.path.join(&name))?;
        let (high, _) = newest.into_parts();
        state.sealed.insert(high, head);

        state.head = Arc::new(self.create_head()?);
        let now = self.clock.now_millis();
        state.last_rotation = now;
        if let Some(observer) = &self.observer {
            observer.log_rotated(&self.path, now);
        }
        debug!(path = %self.path.display(), sealed = %name, "rotated log");
        Ok(())
    }

    fn create_head(&self) -> ChangelogResult<LogFile<C>> {
        LogFile::create_appendable(
            &self.path.join(HEAD_FILE_NAME),
            Arc::clone(&self.codec),
            self.config.block_size,
            self.config.sync_on_append,
        )
    }

    fn close(&self) -> ChangelogResult<()> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let open = self.open_cursors.load(Ordering::SeqCst);
        if open > 0 {
            warn!(path = %self.path.display(), cursors = open, "closing log with open cursors");
        }
        state.head.sync()
    }
}

/// A multi-file changelog.
///
/// Handles are cheap to clone and share one log. The log is closed when the
/// last handle is dropped or [`Log::close`] is called on any handle.
///
/// # Example
///
/// ```rust,no_run
/// use replog_core::{Cursor, IntCodec, Log, LogConfig, Record};
/// use std::path::Path;
///
/// let log = Log::open(Path::new("changelog"), IntCodec, LogConfig::default())?;
/// log.append(&Record::new(1, 100))?;
///
/// let mut cursor = log.cursor()?;
/// while cursor.next()? {
///     println!("{:?}", cursor.record());
/// }
/// # Ok::<(), replog_core::ChangelogError>(())
/// ```
pub struct Log<C: RecordCodec> {
    shared: Arc<LogShared<C>>,
}

impl<C: RecordCodec> Log<C> {
    /// Opens or creates the log in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the directory cannot
    /// be created, or the head file cannot be repaired.
    pub fn open(path: &Path, codec: C, config: LogConfig) -> ChangelogResult<Self> {
        Self::open_with_clock(path, codec, config, Arc::new(SystemClock))
    }

    /// Opens the log with an explicit time source for rotation decisions.
    pub fn open_with_clock(
        path: &Path,
        codec: C,
        config: LogConfig,
        clock: Arc<dyn Clock>,
    ) -> ChangelogResult<Self> {
        Self::open_shared(path, Arc::new(codec), config, clock, None, None)
    }

    pub(crate) fn open_shared(
        path: &Path,
        codec: Arc<C>,
        config: LogConfig,
        clock: Arc<dyn Clock>,
        observer: Option<Arc<dyn RotationObserver>>,
        last_rotation: Option<u64>,
    ) -> ChangelogResult<Self> {
        config.validate()?;
        fs::create_dir_all(path)?;

        let mut sealed = BTreeMap::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name == HEAD_FILE_NAME {
                continue;
            }
            let Some((low, high)) = name
                .strip_suffix(LOG_FILE_SUFFIX)
                .and_then(|stem| stem.split_once(TOKEN_SEPARATOR))
            else {
                continue;
            };
            let high = match (codec.key_from_token(low), codec.key_from_token(high)) {
                (Ok(_), Ok(high)) => high,
                _ => {
                    warn!(file = name, "ignoring log file with unparsable key range");
                    continue;
                }
            };
            let file =
                LogFile::open_read_only(&entry.path(), Arc::clone(&codec), config.block_size)?;
            sealed.insert(high, Arc::new(file));
        }

        let head = LogFile::create_appendable(
            &path.join(HEAD_FILE_NAME),
            Arc::clone(&codec),
            config.block_size,
            config.sync_on_append,
        )?;
        let last_rotation = last_rotation.unwrap_or_else(|| clock.now_millis());
        debug!(path = %path.display(), sealed = sealed.len(), "opened log");

        let shared = Arc::new(LogShared {
            path: path.to_path_buf(),
            codec,
            config,
            clock,
            observer,
            state: RwLock::new(LogState {
                sealed,
                head: Arc::new(head),
                last_rotation,
                closed: false,
            }),
            handles: AtomicUsize::new(0),
            open_cursors: AtomicUsize::new(0),
        });
        Ok(Self::from_shared(shared))
    }

    pub(crate) fn from_shared(shared: Arc<LogShared<C>>) -> Self {
        shared.handles.fetch_add(1, Ordering::SeqCst);
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<LogShared<C>> {
        &self.shared
    }

    /// Returns the log directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Appends a record to the head file, rotating first if a threshold has
    /// been crossed.
    ///
    /// A record whose key does not follow the newest key is dropped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::InvalidOperation`] if the key is not below
    /// the codec's maximum key, [`ChangelogError::LogClosed`] after close, or
    /// a storage error.
    pub fn append(&self, record: &RecordOf<C>) -> ChangelogResult<()> {
        let shared = &self.shared;
        if record.key() >= &shared.codec.max_key() {
            return Err(ChangelogError::invalid_operation(format!(
                "key {:?} is not below the maximum key",
                record.key()
            )));
        }

        {
            let state = shared.state.read();
            shared.ensure_open(&state)?;
            if !shared.must_rotate(&state)? {
                if state.breaks_key_ordering(record)? {
                    warn!(
                        path = %shared.path.display(),
                        key = ?record.key(),
                        "ignoring append that would break key ordering"
                    );
                    return Ok(());
                }
                return state.head.append(record);
            }
        }

        let mut state = shared.state.write();
        shared.ensure_open(&state)?;
        if state.breaks_key_ordering(record)? {
            warn!(
                path = %shared.path.display(),
                key = ?record.key(),
                "ignoring append that would break key ordering"
            );
            return Ok(());
        }
        if shared.must_rotate(&state)? {
            shared.rotate(&mut state)?;
        }
        state.head.append(record)
    }

    /// Returns a cursor positioned before the first record of the log.
    pub fn cursor(&self) -> ChangelogResult<LogCursor<C>> {
        self.cursor_from(
            None,
            KeyMatchingStrategy::GreaterThanOrEqualToKey,
            PositionStrategy::OnMatchingKey,
        )
    }

    /// Returns a cursor positioned around `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::LogClosed`] after close, or an error if the
    /// seek fails.
    pub fn cursor_at(
        &self,
        key: &C::Key,
        matching: KeyMatchingStrategy,
        position: PositionStrategy,
    ) -> ChangelogResult<LogCursor<C>> {
        self.cursor_from(Some(key), matching, position)
    }

    /// Returns a cursor positioned around `key`, or before the first record
    /// when `key` is `None`.
    ///
    /// An [`KeyMatchingStrategy::EqualToKey`] cursor that finds no match is
    /// returned exhausted. Any other cursor stays live and sees later appends.
    pub fn cursor_from(
        &self,
        key: Option<&C::Key>,
        matching: KeyMatchingStrategy,
        position: PositionStrategy,
    ) -> ChangelogResult<LogCursor<C>> {
        let state = self.shared.state.read();
        self.shared.ensure_open(&state)?;

        let Some(key) = key else {
            let file = state.oldest_file();
            let reader = file.reader();
            return Ok(LogCursor::reading(Arc::clone(&self.shared), file, reader));
        };

        let file = state.find_log_file_for(key, matching)?;
        let mut reader = file.reader();
        let (found, _) = reader.seek_to_record(key, matching, position)?;
        if !found && matching == KeyMatchingStrategy::EqualToKey {
            return Ok(LogCursor::exhausted(Arc::clone(&self.shared)));
        }
        Ok(LogCursor::reading(Arc::clone(&self.shared), file, reader))
    }

    /// Returns the first record of the log.
    pub fn oldest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        self.shared.state.read().oldest_record()
    }

    /// Returns the last record of the log.
    ///
    /// Falls back to the newest sealed file while the head file is empty.
    pub fn newest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        self.shared.state.read().newest_record()
    }

    /// Returns the number of records across all files.
    pub fn number_of_records(&self) -> ChangelogResult<u64> {
        let files = self.shared.state.read().files_in_order();
        files.iter().map(|file| file.number_of_records()).sum()
    }

    /// Returns the number of files, head included.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.shared.state.read().sealed.len() + 1
    }

    /// Deletes every sealed file whose keys are all less than or equal to
    /// `key` and returns the oldest remaining record.
    ///
    /// The head file is never purged. Cursors still reading a deleted file
    /// fail their next advance with [`ChangelogError::CursorAborted`].
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::UndeletableFiles`] if a purged file could not
    /// be removed, or a storage error.
    pub fn purge_up_to(&self, key: &C::Key) -> ChangelogResult<Option<RecordOf<C>>> {
        let mut state = self.shared.state.write();
        self.shared.ensure_open(&state)?;

        let doomed: Vec<(C::Key, Arc<LogFile<C>>)> = state
            .sealed
            .range(..=key)
            .map(|(high, file)| (high.clone(), Arc::clone(file)))
            .collect();
        let mut undeletable = Vec::new();
        for (high, file) in &doomed {
            // an undeleted file stays tracked so a later purge retries it
            match file.delete() {
                Ok(()) => {
                    state.sealed.remove(high);
                }
                Err(err) => {
                    let path = file.path();
                    warn!(path = %path.display(), error = %err, "could not delete purged log file");
                    undeletable.push(file.path());
                }
            }
        }
        if !doomed.is_empty() {
            debug!(
                path = %self.shared.path.display(),
                files = doomed.len() - undeletable.len(),
                up_to = ?key,
                "purged log files"
            );
        }

        if !undeletable.is_empty() {
            return Err(ChangelogError::UndeletableFiles { paths: undeletable });
        }
        state.oldest_record()
    }

    /// Deletes every record of the log.
    ///
    /// Every open cursor on the log is aborted, including cursors reading the
    /// head file. Files that cannot be removed stay in the log, and their
    /// cursors keep reading them.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::UndeletableFiles`] if a file could not be
    /// removed, or an error if the new head file cannot be created.
    pub fn clear(&self) -> ChangelogResult<()> {
        let mut state = self.shared.state.write();
        self.shared.ensure_open(&state)?;

        let mut undeletable = Vec::new();
        let mut deleted = 0usize;
        let sealed = std::mem::take(&mut state.sealed);
        for (high, file) in sealed {
            match file.delete() {
                Ok(()) => deleted += 1,
                Err(err) => {
                    let path = file.path();
                    warn!(path = %path.display(), error = %err, "could not delete cleared log file");
                    undeletable.push(file.path());
                    state.sealed.insert(high, file);
                }
            }
        }

        match state.head.delete() {
            Ok(()) => {
                deleted += 1;
                state.head = Arc::new(self.shared.create_head()?);
            }
            Err(err) => {
                let path = state.head.path();
                warn!(path = %path.display(), error = %err, "could not delete cleared head file");
                undeletable.push(state.head.path());
            }
        }

        debug!(path = %self.shared.path.display(), files = deleted, "cleared log");
        if !undeletable.is_empty() {
            return Err(ChangelogError::UndeletableFiles { paths: undeletable });
        }
        Ok(())
    }

    /// Syncs the head file to durable storage.
    pub fn sync_to_file_system(&self) -> ChangelogResult<()> {
        self.shared.state.read().head.sync()
    }

    /// Returns the key of the last record whose mapped value is at most
    /// `limit`, or `None` if the first record already exceeds it.
    ///
    /// `mapper` must be non-decreasing over the log, for instance a
    /// timestamp carried in the value. Files are searched by their first
    /// record, then the block index of the chosen file.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read.
    pub fn find_boundary_key_from_record<T, F>(
        &self,
        mapper: F,
        limit: T,
    ) -> ChangelogResult<Option<C::Key>>
    where
        T: PartialOrd,
        F: Fn(&C::Value) -> T,
    {
        let files = self.shared.state.read().files_in_order();
        let within = |record: &RecordOf<C>| mapper(record.value()) <= limit;

        let (mut low, mut high) = (0usize, files.len());
        while low < high {
            let middle = low + (high - low) / 2;
            let starts_within = files[middle]
                .oldest_record()?
                .is_some_and(|record| within(&record));
            if starts_within {
                low = middle + 1;
            } else {
                high = middle;
            }
        }
        let Some(file) = low.checked_sub(1).map(|index| &files[index]) else {
            return Ok(None);
        };

        let mut reader = file.reader();
        let start = reader.find_last_matching(within)?.unwrap_or(0);
        reader.set_position(start);

        let mut boundary = None;
        while let Some(record) = reader.read_record()? {
            if !within(&record) {
                break;
            }
            boundary = Some(record.into_parts().0);
        }
        Ok(boundary)
    }

    /// Writes each file as text into `out_dir`, one `<file name>.txt` per
    /// file, and returns the paths written.
    pub fn dump_as_text_files(&self, out_dir: &Path) -> ChangelogResult<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)?;
        let files = self.shared.state.read().files_in_order();

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let path = file.path();
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| HEAD_FILE_NAME.to_string());
            let target = out_dir.join(format!("{name}.txt"));

            let mut out = BufWriter::new(File::create(&target)?);
            file.dump_as_text(&mut out)?;
            out.flush()?;
            written.push(target);
        }
        Ok(written)
    }

    /// Closes the log for every handle.
    pub fn close(&self) -> ChangelogResult<()> {
        self.shared.close()
    }

    /// Returns true once the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl<C: RecordCodec> Clone for Log<C> {
    fn clone(&self) -> Self {
        Self::from_shared(Arc::clone(&self.shared))
    }
}

impl<C: RecordCodec> Drop for Log<C> {
    fn drop(&mut self) {
        if self.shared.handles.fetch_sub(1, Ordering::SeqCst) == 1 {
            if let Err(err) = self.shared.close() {
                warn!(path = %self.shared.path.display(), error = %err, "failed to close log");
            }
        }
    }
}

impl<C: RecordCodec> fmt::Debug for Log<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Log")
            .field("path", &self.shared.path)
            .field("config", &self.shared.config)
            .field("files", &self.file_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{IntCodec, Record};
    use crate::cursor::Cursor;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Int records are 12 bytes on disk: each file holds two.
    fn two_per_file() -> LogConfig {
        LogConfig::new().block_size(1024).max_file_size(20)
    }

    fn append_range(log: &Log<IntCodec>, keys: std::ops::RangeInclusive<u32>) {
        for key in keys {
            log.append(&Record::new(key, key * 10)).unwrap();
        }
    }

    fn drain(cursor: &mut LogCursor<IntCodec>) -> Vec<u32> {
        let mut keys = Vec::new();
        while cursor.next().unwrap() {
            keys.push(*cursor.record().unwrap().key());
        }
        keys
    }

    #[test]
    fn rotates_every_two_records() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=10);

        assert_eq!(log.file_count(), 5);
        for name in ["1_2.log", "3_4.log", "5_6.log", "7_8.log", HEAD_FILE_NAME] {
            assert!(dir.path().join(name).exists(), "{name}");
        }
        assert_eq!(drain(&mut log.cursor().unwrap()), (1..=10).collect::<Vec<_>>());
        assert_eq!(log.number_of_records().unwrap(), 10);
        assert_eq!(log.oldest_record().unwrap(), Some(Record::new(1, 10)));
        assert_eq!(log.newest_record().unwrap(), Some(Record::new(10, 100)));
    }

    #[test]
    fn open_cursor_follows_rotations() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=10);

        let mut early = log.cursor().unwrap();
        let mut in_head = log.cursor().unwrap();
        assert_eq!(drain(&mut in_head), (1..=10).collect::<Vec<_>>());

        append_range(&log, 11..=20);
        assert_eq!(drain(&mut early), (1..=20).collect::<Vec<_>>());
        assert_eq!(drain(&mut in_head), (11..=20).collect::<Vec<_>>());
    }

    #[test]
    fn empty_head_falls_back_to_sealed_newest() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=2);
        log.close().unwrap();
        drop(log);

        // head.log is empty after reopening a log whose head was just rotated
        fs::rename(dir.path().join(HEAD_FILE_NAME), dir.path().join("1_2.log")).unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        assert_eq!(log.file_count(), 2);
        assert_eq!(log.newest_record().unwrap(), Some(Record::new(2, 20)));
    }

    #[test]
    fn out_of_order_appends_are_ignored() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=3);

        // head holds only key 3; key 2 lives in a sealed file
        log.append(&Record::new(2, 0)).unwrap();
        log.append(&Record::new(3, 0)).unwrap();
        assert_eq!(drain(&mut log.cursor().unwrap()), vec![1, 2, 3]);
    }

    #[test]
    fn max_key_is_rejected() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, LogConfig::default()).unwrap();
        assert!(matches!(
            log.append(&Record::new(u32::MAX, 0)),
            Err(ChangelogError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn time_based_rotation() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let config = LogConfig::new().rotation_interval(Duration::from_secs(1));
        let log = Log::open_with_clock(dir.path(), IntCodec, config, clock.clone()).unwrap();

        append_range(&log, 1..=2);
        assert_eq!(log.file_count(), 1);

        clock.advance(Duration::from_millis(1001));
        log.append(&Record::new(3, 30)).unwrap();
        assert_eq!(log.file_count(), 2);
        assert!(dir.path().join("1_2.log").exists());

        log.append(&Record::new(4, 40)).unwrap();
        assert_eq!(log.file_count(), 2);
    }

    #[test]
    fn min_rotation_interval_holds_back_size_rotation() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let config = LogConfig::new()
            .max_file_size(1)
            .min_rotation_interval(Duration::from_secs(10));
        let log = Log::open_with_clock(dir.path(), IntCodec, config, clock.clone()).unwrap();

        append_range(&log, 1..=3);
        assert_eq!(log.file_count(), 1);

        clock.advance(Duration::from_secs(10));
        log.append(&Record::new(4, 40)).unwrap();
        assert_eq!(log.file_count(), 2);
        assert!(dir.path().join("1_3.log").exists());
    }

    #[test]
    fn purge_below_oldest_changes_nothing() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=10);

        let mut cursor = log.cursor().unwrap();
        assert!(cursor.next().unwrap());

        assert_eq!(log.purge_up_to(&0).unwrap(), Some(Record::new(1, 10)));
        assert_eq!(log.file_count(), 5);
        assert_eq!(drain(&mut cursor), (2..=10).collect::<Vec<_>>());
    }

    #[test]
    fn purge_removes_whole_files_and_aborts_their_cursors() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=10);

        let mut stale = log.cursor().unwrap();
        assert!(stale.next().unwrap());
        let mut safe = log
            .cursor_at(&6, KeyMatchingStrategy::EqualToKey, PositionStrategy::OnMatchingKey)
            .unwrap();

        // 5_6.log still holds key 6 > 5
        assert_eq!(log.purge_up_to(&5).unwrap(), Some(Record::new(5, 50)));
        assert_eq!(log.file_count(), 3);
        assert!(!dir.path().join("1_2.log").exists());
        assert!(!dir.path().join("3_4.log").exists());

        assert!(matches!(stale.next(), Err(ChangelogError::CursorAborted { .. })));
        assert!(stale.is_aborted());
        assert!(!stale.next().unwrap());

        assert_eq!(drain(&mut safe), (6..=10).collect::<Vec<_>>());
        assert_eq!(drain(&mut log.cursor().unwrap()), (5..=10).collect::<Vec<_>>());
    }

    #[test]
    fn purge_never_touches_head() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=3);

        assert_eq!(log.purge_up_to(&100).unwrap(), Some(Record::new(3, 30)));
        assert_eq!(log.file_count(), 1);
        assert_eq!(drain(&mut log.cursor().unwrap()), vec![3]);
    }

    #[test]
    fn clear_aborts_every_cursor() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=5);

        let mut sealed_reader = log.cursor().unwrap();
        let mut head_reader = log
            .cursor_at(&5, KeyMatchingStrategy::EqualToKey, PositionStrategy::OnMatchingKey)
            .unwrap();

        log.clear().unwrap();
        assert_eq!(log.file_count(), 1);
        assert_eq!(log.oldest_record().unwrap(), None);
        assert!(sealed_reader.next().unwrap_err().is_cursor_aborted());
        assert!(head_reader.next().unwrap_err().is_cursor_aborted());

        append_range(&log, 1..=2);
        assert_eq!(drain(&mut log.cursor().unwrap()), vec![1, 2]);
    }

    /// Replaces a sealed file with a non-empty directory of the same name,
    /// so removing it fails while open handles keep reading the old file.
    fn block_deletion(path: &Path) {
        fs::remove_file(path).unwrap();
        fs::create_dir(path).unwrap();
        fs::write(path.join("occupied"), b"x").unwrap();
    }

    #[test]
    fn failed_purge_keeps_file_and_retries() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=5);
        let mut reader = log.cursor().unwrap();
        assert!(reader.next().unwrap());

        let blocked = dir.path().join("1_2.log");
        block_deletion(&blocked);
        match log.purge_up_to(&2) {
            Err(ChangelogError::UndeletableFiles { paths }) => {
                assert_eq!(paths, vec![blocked.clone()]);
            }
            other => panic!("expected undeletable files, got {other:?}"),
        }
        assert_eq!(log.file_count(), 3);
        assert_eq!(log.oldest_record().unwrap(), Some(Record::new(1, 10)));
        assert_eq!(drain(&mut reader), vec![2, 3, 4, 5]);

        fs::remove_dir_all(&blocked).unwrap();
        assert_eq!(log.purge_up_to(&2).unwrap(), Some(Record::new(3, 30)));
        assert_eq!(log.file_count(), 2);
        assert_eq!(drain(&mut log.cursor().unwrap()), vec![3, 4, 5]);
    }

    #[test]
    fn failed_clear_keeps_undeleted_files() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=5);
        let mut blocked_reader = log.cursor().unwrap();
        let mut head_reader = log
            .cursor_at(&5, KeyMatchingStrategy::EqualToKey, PositionStrategy::OnMatchingKey)
            .unwrap();

        let blocked = dir.path().join("1_2.log");
        block_deletion(&blocked);
        assert!(matches!(log.clear(), Err(ChangelogError::UndeletableFiles { .. })));
        assert_eq!(log.file_count(), 2);
        assert!(!dir.path().join("3_4.log").exists());
        assert!(head_reader.next().unwrap_err().is_cursor_aborted());
        assert_eq!(drain(&mut blocked_reader), vec![1, 2]);
        assert_eq!(drain(&mut log.cursor().unwrap()), vec![1, 2]);
    }

    #[test]
    fn log_cursor_close_twice_then_drop() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=3);
        let open_cursors = || log.shared().open_cursors.load(Ordering::SeqCst);

        let mut cursor = log.cursor().unwrap();
        let other = log.cursor().unwrap();
        assert_eq!(open_cursors(), 2);
        assert!(cursor.next().unwrap());

        cursor.close();
        cursor.close();
        assert_eq!(open_cursors(), 1);
        assert!(!cursor.next().unwrap());
        assert!(cursor.record().is_none());

        drop(cursor);
        assert_eq!(open_cursors(), 1);
        drop(other);
        assert_eq!(open_cursors(), 0);
    }

    #[test]
    fn reopen_restores_sealed_files() {
        let dir = tempdir().unwrap();
        {
            let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
            append_range(&log, 1..=7);
        }
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        assert_eq!(log.file_count(), 4);
        append_range(&log, 8..=9);
        assert_eq!(drain(&mut log.cursor().unwrap()), (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn cursors_seek_across_files() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        for key in (10..=100).step_by(10) {
            log.append(&Record::new(key, key)).unwrap();
        }

        let seek = |key: u32, matching, position| {
            drain(&mut log.cursor_at(&key, matching, position).unwrap())
        };
        use KeyMatchingStrategy::*;
        use PositionStrategy::*;

        assert_eq!(seek(50, EqualToKey, OnMatchingKey), vec![50, 60, 70, 80, 90, 100]);
        assert_eq!(seek(40, EqualToKey, AfterMatchingKey), vec![50, 60, 70, 80, 90, 100]);
        assert!(seek(45, EqualToKey, OnMatchingKey).is_empty());
        assert_eq!(seek(45, GreaterThanOrEqualToKey, OnMatchingKey), vec![50, 60, 70, 80, 90, 100]);
        assert_eq!(
            seek(45, LessThanOrEqualToKey, OnMatchingKey),
            vec![40, 50, 60, 70, 80, 90, 100]
        );
        assert_eq!(seek(45, LessThanOrEqualToKey, AfterMatchingKey), vec![50, 60, 70, 80, 90, 100]);
        assert_eq!(seek(5, LessThanOrEqualToKey, OnMatchingKey).len(), 10);
        assert!(seek(500, GreaterThanOrEqualToKey, OnMatchingKey).is_empty());
        assert!(seek(500, LessThanOrEqualToKey, AfterMatchingKey).is_empty());
        assert_eq!(seek(500, LessThanOrEqualToKey, OnMatchingKey), vec![100]);
    }

    #[test]
    fn greater_or_equal_cursor_past_the_end_sees_later_appends() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, two_per_file()).unwrap();
        append_range(&log, 1..=3);

        let mut cursor = log
            .cursor_at(
                &4,
                KeyMatchingStrategy::GreaterThanOrEqualToKey,
                PositionStrategy::OnMatchingKey,
            )
            .unwrap();
        assert!(!cursor.next().unwrap());

        append_range(&log, 4..=6);
        assert_eq!(drain(&mut cursor), vec![4, 5, 6]);
    }

    #[test]
    fn boundary_key_search() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, LogConfig::new().block_size(16).max_file_size(60))
            .unwrap();
        append_range(&log, 1..=20);
        assert!(log.file_count() > 2);

        let boundary =
            |limit: u32| log.find_boundary_key_from_record(|value| *value, limit).unwrap();
        assert_eq!(boundary(5), None);
        assert_eq!(boundary(10), Some(1));
        assert_eq!(boundary(55), Some(5));
        assert_eq!(boundary(120), Some(12));
        assert_eq!(boundary(10_000), Some(20));
    }

    #[test]
    fn closed_log_rejects_operations() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, LogConfig::default()).unwrap();
        let other = log.clone();
        append_range(&log, 1..=2);
        let mut cursor = log.cursor().unwrap();

        other.close().unwrap();
        assert!(log.is_closed());
        assert!(matches!(log.append(&Record::new(3, 3)), Err(ChangelogError::LogClosed { .. })));
        assert!(matches!(cursor.next(), Err(ChangelogError::LogClosed { .. })));
        assert!(log.cursor().is_err());
    }

    #[test]
    fn last_handle_drop_closes() {
        let dir = tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, LogConfig::default()).unwrap();
        let shared = Arc::clone(log.shared());
        let copy = log.clone();

        drop(log);
        assert!(!shared.is_closed());
        drop(copy);
        assert!(shared.is_closed());
    }
}
