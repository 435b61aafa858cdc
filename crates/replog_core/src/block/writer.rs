//! Appends framed records to a file.

use super::{frame, SharedBackend, LENGTH_PREFIX_SIZE};
use crate::codec::{RecordCodec, RecordOf};
use crate::error::{ChangelogError, ChangelogResult};
use std::sync::Arc;

/// Appends records to one file, splicing in boundary markers.
///
/// Each record is written with a single backend append, so a reader on the
/// same file never observes half of one record followed by part of another.
pub(crate) struct BlockLogWriter<C: RecordCodec> {
    backend: SharedBackend,
    codec: Arc<C>,
    block_size: u64,
}

impl<C: RecordCodec> BlockLogWriter<C> {
    /// Creates a writer appending at the current end of `backend`.
    pub(crate) fn new(backend: SharedBackend, codec: Arc<C>, block_size: u64) -> Self {
        Self {
            backend,
            codec,
            block_size,
        }
    }

    /// Appends a record and returns the new end of file.
    pub(crate) fn append(&mut self, record: &RecordOf<C>) -> ChangelogResult<u64> {
        let payload = self.codec.encode(record);
        let length = u32::try_from(payload.len()).map_err(|_| {
            ChangelogError::invalid_operation(format!(
                "record payload of {} bytes is too large",
                payload.len()
            ))
        })?;

        let mut logical = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        logical.extend_from_slice(&length.to_be_bytes());
        logical.extend_from_slice(&payload);

        let mut backend = self.backend.write();
        let position = backend.size()?;
        let framed = frame(position, &logical, self.block_size)?;
        let offset = backend.append(&framed)?;
        Ok(offset + framed.len() as u64)
    }

    /// Syncs written bytes to durable storage.
    pub(crate) fn sync(&mut self) -> ChangelogResult<()> {
        let mut backend = self.backend.write();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::share;
    use crate::codec::{IntCodec, Record};
    use replog_storage::InMemoryBackend;

    fn int_writer(block_size: u64) -> (SharedBackend, BlockLogWriter<IntCodec>) {
        let backend = share(InMemoryBackend::new());
        let writer = BlockLogWriter::new(Arc::clone(&backend), Arc::new(IntCodec), block_size);
        (backend, writer)
    }

    #[test]
    fn one_record_file_sizes() {
        for (block_size, expected) in [(12, 12), (10, 16), (7, 20), (5, 40)] {
            let (backend, mut writer) = int_writer(block_size);
            let end = writer.append(&Record::new(1, 1)).unwrap();
            assert_eq!(end, expected, "block size {block_size}");
            assert_eq!(backend.read().size().unwrap(), expected);
        }
    }

    #[test]
    fn appends_continue_at_end_of_file() {
        let (backend, mut writer) = int_writer(10);
        assert_eq!(writer.append(&Record::new(1, 10)).unwrap(), 16);
        // second record starts at 16 and crosses the boundaries at 20 and 30
        assert_eq!(writer.append(&Record::new(2, 20)).unwrap(), 36);

        let marker = |offset| {
            let raw = backend.read().read_at(offset, 4).unwrap();
            u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
        };
        assert_eq!(marker(10), 6);
        assert_eq!(marker(20), 16);
        assert_eq!(marker(30), 6);
    }
}
