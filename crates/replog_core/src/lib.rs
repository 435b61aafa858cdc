//! # replog core
//!
//! An append-only, block-framed changelog for replication.
//!
//! This crate provides:
//! - Block framing with boundary markers for binary search by key
//! - Log files that repair a torn tail when reopened for append
//! - A multi-file log that rotates its head file by size or age and purges
//!   old files
//! - Cursors that follow rotations and abort when their file is purged
//! - An environment that locks a changelog root and shares open logs
//! - Replica records keyed by CSN and the replica cursor
//!
//! ## Example
//!
//! ```rust
//! use replog_core::{
//!     Cursor, IntCodec, KeyMatchingStrategy, Log, LogConfig, PositionStrategy, Record,
//! };
//!
//! let dir = tempfile::tempdir()?;
//! let log = Log::open(dir.path(), IntCodec, LogConfig::default())?;
//! for key in 1..=3 {
//!     log.append(&Record::new(key, key * 100))?;
//! }
//!
//! let mut cursor = log.cursor_at(
//!     &2,
//!     KeyMatchingStrategy::GreaterThanOrEqualToKey,
//!     PositionStrategy::OnMatchingKey,
//! )?;
//! assert!(cursor.next()?);
//! assert_eq!(cursor.record(), Some(&Record::new(2, 200)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod block;
mod clock;
mod codec;
mod config;
mod cursor;
mod env;
mod error;
mod log;
mod log_file;
mod replica;

pub use block::{physical_len, BlockLogReader, MARKER_SIZE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{CodecError, CodecResult, IntCodec, Record, RecordCodec, RecordOf, StringCodec};
pub use config::{LogConfig, RotationPolicy, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_FILE_SIZE};
pub use cursor::{Cursor, KeyMatchingStrategy, LogCursor, LogFileCursor, PositionStrategy};
pub use env::ChangelogEnvironment;
pub use error::{ChangelogError, ChangelogResult};
pub use log::{Log, RotationObserver, HEAD_FILE_NAME, LOG_FILE_SUFFIX, TOKEN_SEPARATOR};
pub use log_file::LogFile;
pub use replica::{Csn, ReplicaCursor, UpdateMsg, UpdateMsgCodec};
