//! One physical file of a log.
//!
//! A [`LogFile`] is either appendable (the head file of a log, repaired on
//! open) or read-only (a sealed file, or a second handle on a file another
//! handle writes). Appends go straight to disk, so a read-only handle on the
//! same path sees every record as soon as `append` returns.

use crate::block::recovery::recover;
use crate::block::{self, BlockLogReader, BlockLogWriter, SharedBackend};
use crate::codec::{RecordCodec, RecordOf};
use crate::cursor::{KeyMatchingStrategy, LogFileCursor, PositionStrategy};
use crate::error::{ChangelogError, ChangelogResult};
use parking_lot::{Mutex, RwLock};
use replog_storage::FileBackend;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct WriterState<C: RecordCodec> {
    writer: BlockLogWriter<C>,
    oldest: Option<RecordOf<C>>,
    newest: Option<RecordOf<C>>,
    records: u64,
}

/// Bounds of a read-only file, valid while its size is unchanged.
struct CachedBounds<C: RecordCodec> {
    size: u64,
    oldest: Option<RecordOf<C>>,
    newest: Option<RecordOf<C>>,
}

/// A log file bound to one path.
pub struct LogFile<C: RecordCodec> {
    path: RwLock<PathBuf>,
    backend: SharedBackend,
    codec: Arc<C>,
    block_size: u64,
    sync_on_append: bool,
    writer: Mutex<Option<WriterState<C>>>,
    bounds: Mutex<Option<CachedBounds<C>>>,
    purged: AtomicBool,
}

impl<C: RecordCodec> LogFile<C> {
    /// Opens or creates an appendable file, cutting back a torn tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, a record before the
    /// tail is corrupt, or the repair fails.
    pub fn create_appendable(
        path: &Path,
        codec: Arc<C>,
        block_size: usize,
        sync_on_append: bool,
    ) -> ChangelogResult<Self> {
        let block_size = block_size as u64;
        let backend = block::share(FileBackend::open(path)?);
        let report = recover(&backend, &codec, block_size)?;
        if report.records > 0 || report.truncated_bytes > 0 {
            debug!(
                path = %path.display(),
                records = report.records,
                size = report.valid_end,
                truncated = report.truncated_bytes,
                "reopened log file for append"
            );
        }

        let writer = BlockLogWriter::new(Arc::clone(&backend), Arc::clone(&codec), block_size);
        Ok(Self {
            path: RwLock::new(path.to_path_buf()),
            backend,
            codec,
            block_size,
            sync_on_append,
            writer: Mutex::new(Some(WriterState {
                writer,
                oldest: report.oldest,
                newest: report.newest,
                records: report.records,
            })),
            bounds: Mutex::new(None),
            purged: AtomicBool::new(false),
        })
    }

    /// Opens an existing file for reading only.
    pub fn open_read_only(path: &Path, codec: Arc<C>, block_size: usize) -> ChangelogResult<Self> {
        let backend = block::share(FileBackend::open_read_only(path)?);
        Ok(Self {
            path: RwLock::new(path.to_path_buf()),
            backend,
            codec,
            block_size: block_size as u64,
            sync_on_append: false,
            writer: Mutex::new(None),
            bounds: Mutex::new(None),
            purged: AtomicBool::new(false),
        })
    }

    /// Returns the current path of the file.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.path.read().clone()
    }

    /// Returns whether records can be appended through this handle.
    #[must_use]
    pub fn is_appendable(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Appends a record.
    ///
    /// A record whose key is not greater than the newest key is dropped with
    /// a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is read-only or the write fails.
    pub fn append(&self, record: &RecordOf<C>) -> ChangelogResult<()> {
        let mut guard = self.writer.lock();
        let state = guard.as_mut().ok_or_else(|| {
            ChangelogError::invalid_operation(format!(
                "log file {} is read-only",
                self.path.read().display()
            ))
        })?;

        if let Some(newest) = &state.newest {
            if record.key() <= newest.key() {
                warn!(
                    path = %self.path.read().display(),
                    key = ?record.key(),
                    newest = ?newest.key(),
                    "ignoring append that would break key ordering"
                );
                return Ok(());
            }
        }

        state.writer.append(record)?;
        if self.sync_on_append {
            state.writer.sync()?;
        }

        if state.oldest.is_none() {
            state.oldest = Some(record.clone());
        }
        state.newest = Some(record.clone());
        state.records += 1;
        Ok(())
    }

    /// Returns true if appending `record` would not keep keys increasing.
    #[must_use]
    pub fn append_would_break_key_ordering(&self, record: &RecordOf<C>) -> bool {
        self.writer
            .lock()
            .as_ref()
            .and_then(|state| state.newest.as_ref())
            .is_some_and(|newest| record.key() <= newest.key())
    }

    /// Returns the first record of the file.
    pub fn oldest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        if let Some(state) = self.writer.lock().as_ref() {
            return Ok(state.oldest.clone());
        }
        Ok(self.read_only_bounds()?.0)
    }

    /// Returns the last record of the file.
    pub fn newest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        if let Some(state) = self.writer.lock().as_ref() {
            return Ok(state.newest.clone());
        }
        Ok(self.read_only_bounds()?.1)
    }

    fn read_only_bounds(&self) -> ChangelogResult<(Option<RecordOf<C>>, Option<RecordOf<C>>)> {
        let reader = self.reader();
        let size = reader.file_size()?;

        let mut cache = self.bounds.lock();
        if let Some(cached) = cache.as_ref().filter(|cached| cached.size == size) {
            return Ok((cached.oldest.clone(), cached.newest.clone()));
        }

        let oldest = reader.oldest_record()?;
        let newest = reader.newest_record()?;
        *cache = Some(CachedBounds {
            size,
            oldest: oldest.clone(),
            newest: newest.clone(),
        });
        Ok((oldest, newest))
    }

    /// Returns true if the file holds no record.
    pub fn is_empty(&self) -> ChangelogResult<bool> {
        if let Some(state) = self.writer.lock().as_ref() {
            return Ok(state.records == 0);
        }
        Ok(self.size_in_bytes()? == 0)
    }

    /// Returns the size of the file in bytes.
    pub fn size_in_bytes(&self) -> ChangelogResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Returns the number of records in the file.
    ///
    /// Counted incrementally for an appendable file, by a scan otherwise.
    pub fn number_of_records(&self) -> ChangelogResult<u64> {
        if let Some(state) = self.writer.lock().as_ref() {
            return Ok(state.records);
        }
        self.reader().count_records()
    }

    /// Returns a reader positioned at the start of the file.
    #[must_use]
    pub fn reader(&self) -> BlockLogReader<C> {
        BlockLogReader::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.codec),
            self.block_size,
        )
    }

    /// Returns a cursor positioned before the first record.
    #[must_use]
    pub fn cursor(self: &Arc<Self>) -> LogFileCursor<C> {
        LogFileCursor::reading(Arc::clone(self), self.reader())
    }

    /// Returns a cursor positioned around `key`.
    ///
    /// An [`KeyMatchingStrategy::EqualToKey`] cursor that finds no match is
    /// returned exhausted.
    pub fn cursor_at(
        self: &Arc<Self>,
        key: &C::Key,
        matching: KeyMatchingStrategy,
        position: PositionStrategy,
    ) -> ChangelogResult<LogFileCursor<C>> {
        let mut reader = self.reader();
        let (found, _) = reader.seek_to_record(key, matching, position)?;
        if !found && matching == KeyMatchingStrategy::EqualToKey {
            return Ok(LogFileCursor::exhausted());
        }
        Ok(LogFileCursor::reading(Arc::clone(self), reader))
    }

    /// Makes the file read-only and renames it to `new_path`.
    ///
    /// The same handle stays valid: cursors reading it keep their position.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync or the rename fails. The file is still
    /// appendable in that case.
    pub fn seal(&self, new_path: &Path) -> ChangelogResult<()> {
        let mut guard = self.writer.lock();
        if let Some(state) = guard.as_mut() {
            state.writer.sync()?;
        }

        let mut path = self.path.write();
        fs::rename(&*path, new_path)?;
        debug!(from = %path.display(), to = %new_path.display(), "sealed log file");
        *path = new_path.to_path_buf();

        if let Some(state) = guard.take() {
            *self.bounds.lock() = Some(CachedBounds {
                size: self.backend.read().size()?,
                oldest: state.oldest,
                newest: state.newest,
            });
        }
        Ok(())
    }

    /// Syncs appended records to durable storage.
    pub fn sync(&self) -> ChangelogResult<()> {
        if let Some(state) = self.writer.lock().as_mut() {
            state.writer.sync()?;
        }
        Ok(())
    }

    /// Marks the file purged. Cursors on it abort on their next advance.
    pub fn mark_purged(&self) {
        self.purged.store(true, Ordering::SeqCst);
    }

    /// Returns whether the file has been purged.
    #[must_use]
    pub fn is_purged(&self) -> bool {
        self.purged.load(Ordering::SeqCst)
    }

    /// Removes the file from disk and marks it purged.
    ///
    /// A file that cannot be removed is left unmarked, so its cursors keep
    /// reading it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn delete(&self) -> ChangelogResult<()> {
        let path = self.path.read();
        match fs::remove_file(&*path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.mark_purged();
        Ok(())
    }

    /// Writes every record as one `key value` line.
    pub fn dump_as_text(&self, out: &mut dyn Write) -> ChangelogResult<()> {
        let mut reader = self.reader();
        while let Some(record) = reader.read_record()? {
            writeln!(out, "{:?} {:?}", record.key(), record.value())?;
        }
        Ok(())
    }
}

impl<C: RecordCodec> fmt::Debug for LogFile<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let appendable = self.is_appendable();
        f.debug_struct("LogFile")
            .field("path", &self.path())
            .field("block_size", &self.block_size)
            .field("appendable", &appendable)
            .field("purged", &self.is_purged())
            .finish()
    }
}
