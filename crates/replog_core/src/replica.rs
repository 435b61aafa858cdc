//! Replication-specific records and the replica cursor.
//!
//! A replica changelog is keyed by [`Csn`]. When a replica goes offline the
//! replication layer remembers the CSN at which it did, and readers of that
//! replica's changelog should learn about it once they have caught up with
//! every real change. [`ReplicaCursor`] does this by yielding one synthetic
//! [`UpdateMsg::ReplicaOffline`] record after the last real one.

use crate::codec::{CodecError, CodecResult, Record, RecordCodec};
use crate::cursor::Cursor;
use crate::error::ChangelogResult;
use std::fmt;

/// A change sequence number: the identity and order of a replicated change.
///
/// Ordered by timestamp, then sequence number, then server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Csn {
    /// Milliseconds since the Unix epoch on the originating server.
    pub timestamp: u64,
    /// Disambiguates changes made in the same millisecond.
    pub seqnum: u32,
    /// Originating server.
    pub server_id: u16,
}

impl Csn {
    /// Encoded size in bytes.
    pub const SIZE: usize = 14;

    /// Length of the hex token.
    pub const TOKEN_LEN: usize = 28;

    /// Greater than every CSN a server can generate.
    pub const MAX: Self = Self {
        timestamp: u64::MAX,
        seqnum: u32::MAX,
        server_id: u16::MAX,
    };

    /// Creates a CSN.
    #[must_use]
    pub const fn new(timestamp: u64, seqnum: u32, server_id: u16) -> Self {
        Self {
            timestamp,
            seqnum,
            server_id,
        }
    }

    /// Returns the big-endian encoding.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..8].copy_from_slice(&self.timestamp.to_be_bytes());
        bytes[8..12].copy_from_slice(&self.seqnum.to_be_bytes());
        bytes[12..].copy_from_slice(&self.server_id.to_be_bytes());
        bytes
    }

    /// Decodes the first [`Csn::SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Truncated`] if fewer bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let bytes: &[u8; Self::SIZE] = bytes
            .get(..Self::SIZE)
            .and_then(|prefix| prefix.try_into().ok())
            .ok_or(CodecError::Truncated {
                needed: Self::SIZE,
                available: bytes.len(),
            })?;

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&bytes[..8]);
        let mut seqnum = [0u8; 4];
        seqnum.copy_from_slice(&bytes[8..12]);
        Ok(Self {
            timestamp: u64::from_be_bytes(timestamp),
            seqnum: u32::from_be_bytes(seqnum),
            server_id: u16::from_be_bytes([bytes[12], bytes[13]]),
        })
    }

    /// Parses the token produced by `Display`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidToken`] unless `token` is 28 hex digits.
    pub fn parse(token: &str) -> CodecResult<Self> {
        let invalid = || CodecError::InvalidToken(token.to_string());
        if token.len() != Self::TOKEN_LEN || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        Ok(Self {
            timestamp: u64::from_str_radix(&token[..16], 16).map_err(|_| invalid())?,
            seqnum: u32::from_str_radix(&token[16..24], 16).map_err(|_| invalid())?,
            server_id: u16::from_str_radix(&token[24..], 16).map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}{:08x}{:04x}",
            self.timestamp, self.seqnum, self.server_id
        )
    }
}

/// A record of a replica changelog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateMsg {
    /// A replicated change with its opaque encoded operation.
    Change {
        /// Identity of the change.
        csn: Csn,
        /// Encoded operation.
        payload: Vec<u8>,
    },
    /// The replica went offline at `csn`.
    ReplicaOffline {
        /// Time the replica went offline.
        csn: Csn,
    },
}

impl UpdateMsg {
    const CHANGE_TAG: u8 = 1;
    const OFFLINE_TAG: u8 = 2;

    /// Returns the CSN of the message.
    #[must_use]
    pub fn csn(&self) -> Csn {
        match self {
            Self::Change { csn, .. } | Self::ReplicaOffline { csn } => *csn,
        }
    }

    /// Returns true for the synthetic offline marker.
    #[must_use]
    pub fn is_replica_offline(&self) -> bool {
        matches!(self, Self::ReplicaOffline { .. })
    }

    /// Wraps the message in a record keyed by its CSN.
    #[must_use]
    pub fn into_record(self) -> Record<Csn, Self> {
        Record::new(self.csn(), self)
    }
}

/// Codec for replica changelogs: a tag byte, the 14-byte CSN, then the
/// change payload.
///
/// The key of a stored record is the CSN of its message.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateMsgCodec;

impl RecordCodec for UpdateMsgCodec {
    type Key = Csn;
    type Value = UpdateMsg;

    fn encode(&self, record: &Record<Csn, UpdateMsg>) -> Vec<u8> {
        let (tag, payload): (u8, &[u8]) = match record.value() {
            UpdateMsg::Change { payload, .. } => (UpdateMsg::CHANGE_TAG, payload),
            UpdateMsg::ReplicaOffline { .. } => (UpdateMsg::OFFLINE_TAG, &[]),
        };
        let mut bytes = Vec::with_capacity(1 + Csn::SIZE + payload.len());
        bytes.push(tag);
        bytes.extend_from_slice(&record.key().to_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Record<Csn, UpdateMsg>> {
        let (&tag, rest) = bytes.split_first().ok_or(CodecError::Truncated {
            needed: 1 + Csn::SIZE,
            available: 0,
        })?;
        let csn = Csn::from_bytes(rest).map_err(|_| CodecError::Truncated {
            needed: 1 + Csn::SIZE,
            available: bytes.len(),
        })?;
        let payload = &rest[Csn::SIZE..];

        let msg = match tag {
            UpdateMsg::CHANGE_TAG => UpdateMsg::Change {
                csn,
                payload: payload.to_vec(),
            },
            UpdateMsg::OFFLINE_TAG if payload.is_empty() => UpdateMsg::ReplicaOffline { csn },
            UpdateMsg::OFFLINE_TAG => {
                return Err(CodecError::Invalid(format!(
                    "replica offline message carries {} payload bytes",
                    payload.len()
                )))
            }
            other => return Err(CodecError::Invalid(format!("unknown message tag {other}"))),
        };
        Ok(Record::new(csn, msg))
    }

    fn key_to_token(&self, key: &Csn) -> String {
        key.to_string()
    }

    fn key_from_token(&self, token: &str) -> CodecResult<Csn> {
        Csn::parse(token)
    }

    fn max_key(&self) -> Csn {
        Csn::MAX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicaState {
    Delegating,
    Offline,
    Exhausted,
}

/// Cursor over one replica's changelog that ends with the replica's offline
/// marker.
///
/// Every record of the delegate is passed through. Once the delegate has no
/// more records, an offline CSN newer than the last record returned (or any
/// offline CSN if nothing was returned) is yielded once as an
/// [`UpdateMsg::ReplicaOffline`] record, and the cursor is exhausted for
/// good. While no offline CSN applies the cursor stays live, like its
/// delegate.
pub struct ReplicaCursor<D> {
    delegate: D,
    offline_csn: Option<Csn>,
    last_csn: Option<Csn>,
    offline_record: Option<Record<Csn, UpdateMsg>>,
    state: ReplicaState,
}

impl<D> ReplicaCursor<D>
where
    D: Cursor<Item = Record<Csn, UpdateMsg>>,
{
    /// Wraps `delegate`, with the CSN at which the replica went offline if
    /// it is offline.
    pub fn new(delegate: D, offline_csn: Option<Csn>) -> Self {
        Self {
            delegate,
            offline_csn,
            last_csn: None,
            offline_record: None,
            state: ReplicaState::Delegating,
        }
    }

    /// Replaces the offline CSN, for a replica that went offline or came
    /// back while the cursor was open. Has no effect once the marker has
    /// been yielded.
    pub fn set_offline_csn(&mut self, csn: Option<Csn>) {
        self.offline_csn = csn;
    }

    /// Returns the offline CSN that would still be yielded, if any.
    #[must_use]
    pub fn offline_csn(&self) -> Option<Csn> {
        match self.state {
            ReplicaState::Delegating => self.pending_offline_csn(),
            ReplicaState::Offline | ReplicaState::Exhausted => None,
        }
    }

    fn pending_offline_csn(&self) -> Option<Csn> {
        let offline = self.offline_csn?;
        match self.last_csn {
            Some(last) if offline <= last => None,
            _ => Some(offline),
        }
    }
}

impl<D> Cursor for ReplicaCursor<D>
where
    D: Cursor<Item = Record<Csn, UpdateMsg>>,
{
    type Item = Record<Csn, UpdateMsg>;

    fn next(&mut self) -> ChangelogResult<bool> {
        match self.state {
            ReplicaState::Delegating => {}
            ReplicaState::Offline => {
                self.state = ReplicaState::Exhausted;
                self.offline_record = None;
                return Ok(false);
            }
            ReplicaState::Exhausted => return Ok(false),
        }

        if self.delegate.next()? {
            self.last_csn = self.delegate.record().map(|record| *record.key());
            return Ok(true);
        }

        match self.pending_offline_csn() {
            Some(csn) => {
                self.offline_record = Some(UpdateMsg::ReplicaOffline { csn }.into_record());
                self.state = ReplicaState::Offline;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn record(&self) -> Option<&Self::Item> {
        match self.state {
            ReplicaState::Delegating => self.delegate.record(),
            ReplicaState::Offline => self.offline_record.as_ref(),
            ReplicaState::Exhausted => None,
        }
    }

    fn close(&mut self) {
        self.delegate.close();
        self.offline_record = None;
        self.state = ReplicaState::Exhausted;
    }
}

impl<D: fmt::Debug> fmt::Debug for ReplicaCursor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaCursor")
            .field("delegate", &self.delegate)
            .field("offline_csn", &self.offline_csn)
            .field("last_csn", &self.last_csn)
            .field("state", &self.state)
            .finish()
    }
}
