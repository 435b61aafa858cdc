//! Tail repair for files opened for writing.
//!
//! A crash can leave the last record of the head file half written: cut in
//! the length prefix, in the payload, or with a payload that does not decode.
//! Before a writer is handed out, the file is scanned from the start and cut
//! back to the end of the last complete record.

use super::{BlockLogReader, SharedBackend};
use crate::codec::{Record, RecordCodec, RecordOf};
use crate::error::{ChangelogError, ChangelogResult};
use std::sync::Arc;
use tracing::warn;

/// Outcome of scanning a file before appending to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecoveryReport<K, V> {
    /// End of the last complete record. The file is this long afterwards.
    pub(crate) valid_end: u64,
    /// Number of complete records.
    pub(crate) records: u64,
    /// First complete record.
    pub(crate) oldest: Option<Record<K, V>>,
    /// Last complete record.
    pub(crate) newest: Option<Record<K, V>>,
    /// Bytes cut from the tail.
    pub(crate) truncated_bytes: u64,
}

/// Scans the file behind `backend` and truncates a torn last record.
///
/// # Errors
///
/// Returns [`ChangelogError::Corruption`] when a record that is not the last
/// one fails to decode, or an error if a read or the truncation fails.
pub(crate) fn recover<C: RecordCodec>(
    backend: &SharedBackend,
    codec: &Arc<C>,
    block_size: u64,
) -> ChangelogResult<RecoveryReport<C::Key, C::Value>> {
    let reader = BlockLogReader::new(Arc::clone(backend), Arc::clone(codec), block_size);
    let size = reader.file_size()?;

    let mut position = 0;
    let mut records = 0;
    let mut oldest: Option<RecordOf<C>> = None;
    let mut newest: Option<RecordOf<C>> = None;

    while let Some((payload, next)) = reader.read_payload_at(position, size)? {
        match codec.decode(&payload) {
            Ok(record) => {
                if oldest.is_none() {
                    oldest = Some(record.clone());
                }
                newest = Some(record);
                records += 1;
                position = next;
            }
            Err(err) if next >= size => {
                warn!(offset = position, error = %err, "undecodable last record");
                break;
            }
            Err(err) => {
                return Err(ChangelogError::corruption(format!(
                    "undecodable record at offset {position} followed by {} bytes: {err}",
                    size - next
                )));
            }
        }
    }

    let truncated_bytes = size - position;
    if truncated_bytes > 0 {
        warn!(
            valid_end = position,
            truncated_bytes, "truncating incomplete tail of log file"
        );
        backend.write().truncate(position)?;
    }

    Ok(RecoveryReport {
        valid_end: position,
        records,
        oldest,
        newest,
        truncated_bytes,
    })
}
