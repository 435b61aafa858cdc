//! # replog storage
//!
//! Byte-store backends underneath the replog changelog engine.
//!
//! A backend knows nothing about records, blocks or boundary markers. It
//! stores bytes at offsets, appends at the end and can be cut back to a
//! shorter length. The block framing in `replog_core` owns every byte of
//! interpretation.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - one OS file, opened read/write or read-only
//! - [`InMemoryBackend`] - a growable buffer for tests
//!
//! ## Example
//!
//! ```rust
//! use replog_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"head record").unwrap();
//! assert_eq!(backend.read_at(offset, 4).unwrap(), b"head");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
