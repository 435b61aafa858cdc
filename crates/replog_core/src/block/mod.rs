//! Block framing of records inside one log file.
//!
//! ## Stored record
//!
//! ```text
//! ┌──────────────────┬───────────────────────────┐
//! │ length: u32 (BE) │ payload: [u8; length]     │
//! └──────────────────┴───────────────────────────┘
//! ```
//!
//! ## Boundary markers
//!
//! The file is cut into blocks of `block_size` bytes. Whenever a stored byte
//! lands on a non-zero multiple of the block size, a 4-byte big-endian marker
//! is written there first. The marker holds the distance from the boundary to
//! the first record that starts after it:
//!
//! - `4` when a record starts right at the boundary
//! - otherwise the distance to the end of the record that straddles it
//!
//! A reader that lands on any boundary can therefore find a legal record
//! start without scanning from the beginning of the file, which is what the
//! block-index binary search relies on.

mod reader;
pub(crate) mod recovery;
mod writer;

pub use reader::BlockLogReader;
pub(crate) use writer::BlockLogWriter;

use crate::error::{ChangelogError, ChangelogResult};
use parking_lot::RwLock;
use replog_storage::StorageBackend;
use std::sync::Arc;

/// Size of a boundary marker in bytes.
pub const MARKER_SIZE: usize = 4;

/// Size of the record length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// A backend shared by the writer and every reader of one file.
pub(crate) type SharedBackend = Arc<RwLock<Box<dyn StorageBackend>>>;

const MARKER_LEN: u64 = MARKER_SIZE as u64;

/// Wraps a backend so a writer and readers can share it.
pub(crate) fn share(backend: impl StorageBackend + 'static) -> SharedBackend {
    let boxed: Box<dyn StorageBackend> = Box::new(backend);
    Arc::new(RwLock::new(boxed))
}

#[inline]
fn is_boundary(position: u64, block_size: u64) -> bool {
    position != 0 && position % block_size == 0
}

/// Returns the number of bytes `len` logical bytes occupy on disk when the
/// first of them is stored at `position`.
#[must_use]
pub fn physical_len(position: u64, len: u64, block_size: u64) -> u64 {
    // logical bytes that fit before the first boundary the record meets
    let before_boundary = if is_boundary(position, block_size) {
        0
    } else {
        block_size - position % block_size
    };
    if len <= before_boundary {
        return len;
    }
    // every later block holds a marker, then block_size - MARKER_LEN bytes
    let markers = (len - before_boundary).div_ceil(block_size - MARKER_LEN);
    len + markers * MARKER_LEN
}

/// Lays out `logical` bytes for storage at `position`, splicing in markers.
pub(crate) fn frame(position: u64, logical: &[u8], block_size: u64) -> ChangelogResult<Vec<u8>> {
    let total = logical.len() as u64;
    let end = position + physical_len(position, total, block_size);
    let mut out = Vec::with_capacity(usize::try_from(end - position).unwrap_or(logical.len()));

    let mut pos = position;
    let mut consumed = 0usize;
    while consumed < logical.len() {
        if is_boundary(pos, block_size) {
            let distance = if pos == position { MARKER_LEN } else { end - pos };
            let marker = u32::try_from(distance).map_err(|_| {
                ChangelogError::invalid_operation(format!(
                    "record spanning {distance} bytes past a boundary is too large"
                ))
            })?;
            out.extend_from_slice(&marker.to_be_bytes());
            pos += MARKER_LEN;
        }
        let room = usize::try_from(block_size - pos % block_size).unwrap_or(usize::MAX);
        let chunk = room.min(logical.len() - consumed);
        out.extend_from_slice(&logical[consumed..consumed + chunk]);
        consumed += chunk;
        pos += chunk as u64;
    }
    Ok(out)
}

/// Removes the markers from `raw`, which was read starting at `position`.
fn strip_markers(position: u64, raw: &[u8], block_size: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pos = position;
    let mut index = 0usize;
    while index < raw.len() {
        if is_boundary(pos, block_size) {
            index += MARKER_SIZE;
            pos += MARKER_LEN;
            continue;
        }
        let room = usize::try_from(block_size - pos % block_size).unwrap_or(usize::MAX);
        let chunk = room.min(raw.len() - index);
        out.extend_from_slice(&raw[index..index + chunk]);
        index += chunk;
        pos += chunk as u64;
    }
    out
}
