//! Forward-only cursors over a log file or a whole log.
//!
//! Cursors are pull based: `next()` reads at most one record and never
//! blocks waiting for more. Returning `false` at the end of the head file is
//! not final, a later `next()` sees records appended in between.

use crate::block::BlockLogReader;
use crate::codec::{RecordCodec, RecordOf};
use crate::error::{ChangelogError, ChangelogResult};
use crate::log::LogShared;
use crate::log_file::LogFile;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Which record a positioned cursor matches against the requested key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyMatchingStrategy {
    /// Only a record with exactly the key.
    EqualToKey,
    /// The smallest key greater than or equal to the key.
    GreaterThanOrEqualToKey,
    /// The greatest key less than or equal to the key.
    LessThanOrEqualToKey,
}

/// Where a positioned cursor lands relative to the matched record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionStrategy {
    /// The first `next()` returns the matched record.
    OnMatchingKey,
    /// The first `next()` returns the record after the match.
    AfterMatchingKey,
}

/// A forward-only iterator over stored records.
pub trait Cursor {
    /// Record type produced.
    type Item;

    /// Advances to the next record, returning whether one is available.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::CursorAborted`] if the data under the cursor
    /// was purged, or a storage error if a read fails.
    fn next(&mut self) -> ChangelogResult<bool>;

    /// Returns the current record, if the last `next()` returned true.
    fn record(&self) -> Option<&Self::Item>;

    /// Releases the cursor. Safe to call more than once.
    fn close(&mut self);
}

enum CursorState<C: RecordCodec> {
    Reading {
        file: Arc<LogFile<C>>,
        reader: BlockLogReader<C>,
    },
    Exhausted,
    Aborted,
    Closed,
}

impl<C: RecordCodec> CursorState<C> {
    fn name(&self) -> &'static str {
        match self {
            Self::Reading { .. } => "reading",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
            Self::Closed => "closed",
        }
    }
}

/// A cursor over a single [`LogFile`].
pub struct LogFileCursor<C: RecordCodec> {
    state: CursorState<C>,
    current: Option<RecordOf<C>>,
}

impl<C: RecordCodec> LogFileCursor<C> {
    pub(crate) fn reading(file: Arc<LogFile<C>>, reader: BlockLogReader<C>) -> Self {
        Self {
            state: CursorState::Reading { file, reader },
            current: None,
        }
    }

    pub(crate) fn exhausted() -> Self {
        Self {
            state: CursorState::Exhausted,
            current: None,
        }
    }
}

impl<C: RecordCodec> Cursor for LogFileCursor<C> {
    type Item = RecordOf<C>;

    fn next(&mut self) -> ChangelogResult<bool> {
        let CursorState::Reading { file, reader } = &mut self.state else {
            self.current = None;
            return Ok(false);
        };
        if file.is_purged() {
            let path = file.path();
            self.state = CursorState::Aborted;
            self.current = None;
            return Err(ChangelogError::cursor_aborted(path));
        }
        self.current = reader.read_record()?;
        Ok(self.current.is_some())
    }

    fn record(&self) -> Option<&RecordOf<C>> {
        self.current.as_ref()
    }

    fn close(&mut self) {
        self.state = CursorState::Closed;
        self.current = None;
    }
}

impl<C: RecordCodec> fmt::Debug for LogFileCursor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogFileCursor")
            .field("state", &self.state.name())
            .field("current", &self.current)
            .finish()
    }
}

/// A cursor over a whole [`crate::Log`].
///
/// Reads the files of the log in key order. When the current file runs out
/// and a later file exists, the cursor moves on to it, so a rotation while
/// the cursor is open is invisible to the caller.
pub struct LogCursor<C: RecordCodec> {
    shared: Arc<LogShared<C>>,
    state: CursorState<C>,
    current: Option<RecordOf<C>>,
}

impl<C: RecordCodec> LogCursor<C> {
    pub(crate) fn reading(
        shared: Arc<LogShared<C>>,
        file: Arc<LogFile<C>>,
        reader: BlockLogReader<C>,
    ) -> Self {
        Self::with_state(shared, CursorState::Reading { file, reader })
    }

    pub(crate) fn exhausted(shared: Arc<LogShared<C>>) -> Self {
        Self::with_state(shared, CursorState::Exhausted)
    }

    fn with_state(shared: Arc<LogShared<C>>, state: CursorState<C>) -> Self {
        shared.open_cursors.fetch_add(1, Ordering::SeqCst);
        Self {
            shared,
            state,
            current: None,
        }
    }

    /// Returns true once the cursor has hit a purged file.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self.state, CursorState::Aborted)
    }
}

impl<C: RecordCodec> Cursor for LogCursor<C> {
    type Item = RecordOf<C>;

    fn next(&mut self) -> ChangelogResult<bool> {
        if !matches!(self.state, CursorState::Reading { .. }) {
            self.current = None;
            return Ok(false);
        }

        // Held for the whole step: a rotation or purge cannot run between
        // reading the end of a file and looking up the file after it.
        let shared = Arc::clone(&self.shared);
        let log = shared.state.read();
        if log.is_closed() {
            return Err(ChangelogError::log_closed(&shared.path));
        }

        loop {
            let CursorState::Reading { file, reader } = &mut self.state else {
                return Ok(false);
            };
            if file.is_purged() {
                let path = file.path();
                self.state = CursorState::Aborted;
                self.current = None;
                return Err(ChangelogError::cursor_aborted(path));
            }
            if let Some(record) = reader.read_record()? {
                self.current = Some(record);
                return Ok(true);
            }
            match log.next_file_after(file) {
                Some(next) => {
                    *reader = next.reader();
                    *file = next;
                }
                None => {
                    self.current = None;
                    return Ok(false);
                }
            }
        }
    }

    fn record(&self) -> Option<&RecordOf<C>> {
        self.current.as_ref()
    }

    fn close(&mut self) {
        if matches!(self.state, CursorState::Closed) {
            return;
        }
        self.state = CursorState::Closed;
        self.current = None;
        self.shared.open_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<C: RecordCodec> Drop for LogCursor<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: RecordCodec> fmt::Debug for LogCursor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCursor")
            .field("log", &self.shared.path)
            .field("state", &self.state.name())
            .field("current", &self.current)
            .finish()
    }
}
