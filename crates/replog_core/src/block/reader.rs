//! Sequential reads and block-index seeks over a framed file.

use super::{
    physical_len, strip_markers, SharedBackend, LENGTH_PREFIX_SIZE, MARKER_LEN, MARKER_SIZE,
};
use crate::codec::{RecordCodec, RecordOf};
use crate::cursor::{KeyMatchingStrategy, PositionStrategy};
use crate::error::{ChangelogError, ChangelogResult};
use std::cmp::Ordering;
use std::sync::Arc;

/// Reads records from one file, starting at a byte position.
///
/// A record whose bytes are not all on disk yet reads as "no record", so a
/// reader parked at the end of a file that is still being appended to picks
/// up new records on a later call.
pub struct BlockLogReader<C: RecordCodec> {
    backend: SharedBackend,
    codec: Arc<C>,
    block_size: u64,
    position: u64,
}

impl<C: RecordCodec> BlockLogReader<C> {
    /// Creates a reader positioned at the start of the file.
    pub(crate) fn new(backend: SharedBackend, codec: Arc<C>, block_size: u64) -> Self {
        Self {
            backend,
            codec,
            block_size,
            position: 0,
        }
    }

    /// Returns the byte position the next read starts from.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Moves the reader to a record start previously returned by this reader.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    /// Returns the current size of the underlying file.
    pub fn file_size(&self) -> ChangelogResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Reads the next record and advances past it.
    ///
    /// Returns `None` at the end of the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the payload cannot be decoded.
    pub fn read_record(&mut self) -> ChangelogResult<Option<RecordOf<C>>> {
        let size = self.file_size()?;
        match self.read_record_at(self.position, size)? {
            Some((record, next)) => {
                self.position = next;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Positions the reader according to `matching` and `position` around
    /// `key`, returning whether a match was found and the matched record.
    ///
    /// The block index narrows the search to the last block whose first
    /// record is below `key`; the rest is a forward scan.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails or a payload cannot be decoded.
    pub fn seek_to_record(
        &mut self,
        key: &C::Key,
        matching: KeyMatchingStrategy,
        position: PositionStrategy,
    ) -> ChangelogResult<(bool, Option<RecordOf<C>>)> {
        let start = self
            .find_last_matching(|record| record.key() < key)?
            .unwrap_or(0);
        self.position = start;
        self.position_to_key_sequentially(key, matching, position)
    }

    fn position_to_key_sequentially(
        &mut self,
        key: &C::Key,
        matching: KeyMatchingStrategy,
        position: PositionStrategy,
    ) -> ChangelogResult<(bool, Option<RecordOf<C>>)> {
        let mut previous: Option<(RecordOf<C>, u64)> = None;
        loop {
            let start = self.position;
            let Some(record) = self.read_record()? else {
                // end of file
                if matching == KeyMatchingStrategy::LessThanOrEqualToKey {
                    if let Some((record, record_start)) = previous {
                        if position == PositionStrategy::OnMatchingKey {
                            self.position = record_start;
                        }
                        return Ok((true, Some(record)));
                    }
                }
                return Ok((false, None));
            };

            match record.key().cmp(key) {
                Ordering::Less => previous = Some((record, start)),
                Ordering::Equal => {
                    if position == PositionStrategy::OnMatchingKey {
                        self.position = start;
                    }
                    return Ok((true, Some(record)));
                }
                Ordering::Greater => match matching {
                    KeyMatchingStrategy::EqualToKey => return Ok((false, None)),
                    KeyMatchingStrategy::GreaterThanOrEqualToKey => {
                        if position == PositionStrategy::OnMatchingKey {
                            self.position = start;
                        }
                        return Ok((true, Some(record)));
                    }
                    KeyMatchingStrategy::LessThanOrEqualToKey => {
                        return Ok(match previous {
                            Some((previous, previous_start)) => {
                                self.position = match position {
                                    PositionStrategy::OnMatchingKey => previous_start,
                                    PositionStrategy::AfterMatchingKey => start,
                                };
                                (true, Some(previous))
                            }
                            None => {
                                // key below everything: usable from the first record
                                self.position = start;
                                (position == PositionStrategy::AfterMatchingKey, None)
                            }
                        });
                    }
                },
            }
        }
    }

    /// Returns the first record of the file.
    pub fn oldest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        let size = self.file_size()?;
        Ok(self.read_record_at(0, size)?.map(|(record, _)| record))
    }

    /// Returns the last complete record of the file.
    ///
    /// Only the last block holding a record start is scanned.
    pub fn newest_record(&self) -> ChangelogResult<Option<RecordOf<C>>> {
        let Some(start) = self.find_last_matching(|_| true)? else {
            return Ok(None);
        };
        let size = self.file_size()?;
        let mut position = start;
        let mut newest = None;
        while let Some((record, next)) = self.read_record_at(position, size)? {
            newest = Some(record);
            position = next;
        }
        Ok(newest)
    }

    /// Counts the complete records in the file.
    pub fn count_records(&self) -> ChangelogResult<u64> {
        let size = self.file_size()?;
        let mut position = 0;
        let mut count = 0;
        while let Some((_, next)) = self.read_record_at(position, size)? {
            count += 1;
            position = next;
        }
        Ok(count)
    }

    /// Binary-searches the blocks for the last one whose first record
    /// satisfies `predicate`, returning that record's start position.
    ///
    /// `predicate` must be monotone over the file: true for a prefix of the
    /// records and false afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if a read fails, a marker is damaged or a payload
    /// cannot be decoded.
    pub fn find_last_matching<P>(&self, predicate: P) -> ChangelogResult<Option<u64>>
    where
        P: Fn(&RecordOf<C>) -> bool,
    {
        let size = self.file_size()?;
        let blocks = if size == 0 {
            0
        } else {
            (size - 1) / self.block_size + 1
        };

        let (mut low, mut high) = (0u64, blocks);
        let mut found = None;
        while low < high {
            let middle = low + (high - low) / 2;
            match self.first_record_in_block(middle, size)? {
                Some((record, start)) if predicate(&record) => {
                    found = Some(start);
                    low = middle + 1;
                }
                _ => high = middle,
            }
        }
        Ok(found)
    }

    fn first_record_in_block(
        &self,
        block: u64,
        size: u64,
    ) -> ChangelogResult<Option<(RecordOf<C>, u64)>> {
        let Some(start) = self.first_record_start(block, size)? else {
            return Ok(None);
        };
        Ok(self
            .read_record_at(start, size)?
            .map(|(record, _)| (record, start)))
    }

    fn first_record_start(&self, block: u64, size: u64) -> ChangelogResult<Option<u64>> {
        if block == 0 {
            return Ok((size > 0).then_some(0));
        }
        let boundary = block * self.block_size;
        if boundary + MARKER_LEN > size {
            return Ok(None);
        }

        let raw = self.backend.read().read_at(boundary, MARKER_SIZE)?;
        let distance = u64::from(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]));
        if distance < MARKER_LEN {
            return Err(ChangelogError::corruption(format!(
                "boundary marker at offset {boundary} holds {distance}"
            )));
        }

        let start = boundary + distance;
        Ok((start < size).then_some(start))
    }

    /// Reads and decodes the record stored at `position`, returning it with
    /// the position of the following record.
    pub(crate) fn read_record_at(
        &self,
        position: u64,
        size: u64,
    ) -> ChangelogResult<Option<(RecordOf<C>, u64)>> {
        match self.read_payload_at(position, size)? {
            Some((payload, next)) => Ok(Some((self.codec.decode(&payload)?, next))),
            None => Ok(None),
        }
    }

    /// Reads the undecoded payload stored at `position`.
    pub(crate) fn read_payload_at(
        &self,
        position: u64,
        size: u64,
    ) -> ChangelogResult<Option<(Vec<u8>, u64)>> {
        let Some((prefix, after_prefix)) =
            self.read_logical(position, LENGTH_PREFIX_SIZE as u64, size)?
        else {
            return Ok(None);
        };
        let length = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        self.read_logical(after_prefix, u64::from(length), size)
    }

    fn read_logical(
        &self,
        position: u64,
        len: u64,
        size: u64,
    ) -> ChangelogResult<Option<(Vec<u8>, u64)>> {
        let stored = physical_len(position, len, self.block_size);
        let end = position + stored;
        if end > size {
            return Ok(None);
        }
        if stored == 0 {
            return Ok(Some((Vec::new(), end)));
        }

        let stored = usize::try_from(stored).map_err(|_| {
            ChangelogError::corruption(format!("record at offset {position} is too large"))
        })?;
        let raw = self.backend.read().read_at(position, stored)?;
        Ok(Some((strip_markers(position, &raw, self.block_size), end)))
    }
}
