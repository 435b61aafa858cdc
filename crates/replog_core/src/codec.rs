//! Records and the codec contract that turns them into payload bytes.
//!
//! The engine never interprets a payload itself. Each log is instantiated
//! with a [`RecordCodec`] that converts records to and from bytes and keys to
//! and from the tokens used in sealed file names.

use std::fmt::Debug;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while decoding payloads or file name tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload ended before a complete record was read.
    #[error("payload truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },

    /// The payload is complete but malformed.
    #[error("invalid payload: {0}")]
    Invalid(String),

    /// A file name token does not map back to a key.
    #[error("invalid key token: {0:?}")]
    InvalidToken(String),
}

/// An immutable key/value pair stored in a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<K, V> {
    key: K,
    value: V,
}

impl<K, V> Record<K, V> {
    /// Creates a record.
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }

    /// Returns the key.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Splits the record into its key and value.
    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

/// The record type handled by codec `C`.
pub type RecordOf<C> = Record<<C as RecordCodec>::Key, <C as RecordCodec>::Value>;

/// Converts records of one key/value type to and from bytes.
///
/// Key order is storage order: a log only accepts appends in increasing key
/// order, and [`RecordCodec::max_key`] must compare greater than every key
/// ever appended since it names the head file's range.
pub trait RecordCodec: Send + Sync + 'static {
    /// Key type.
    type Key: Ord + Clone + Debug + Send + Sync;
    /// Value type.
    type Value: Clone + Debug + Send + Sync;

    /// Encodes a record into a payload.
    fn encode(&self, record: &Record<Self::Key, Self::Value>) -> Vec<u8>;

    /// Decodes a payload produced by [`RecordCodec::encode`].
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the payload is truncated or malformed.
    fn decode(&self, payload: &[u8]) -> CodecResult<Record<Self::Key, Self::Value>>;

    /// Maps a key to a file name token. Tokens never contain `_`.
    fn key_to_token(&self, key: &Self::Key) -> String;

    /// Maps a file name token back to its key.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidToken`] if the token was not produced by
    /// [`RecordCodec::key_to_token`].
    fn key_from_token(&self, token: &str) -> CodecResult<Self::Key>;

    /// Returns the sentinel key greater than any stored key.
    fn max_key(&self) -> Self::Key;
}

/// Codec for `u32` keys with `u32` values, stored as 8 big-endian bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct IntCodec;

impl IntCodec {
    const PAYLOAD_SIZE: usize = 8;
}

impl RecordCodec for IntCodec {
    type Key = u32;
    type Value = u32;

    fn encode(&self, record: &Record<u32, u32>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(Self::PAYLOAD_SIZE);
        payload.extend_from_slice(&record.key().to_be_bytes());
        payload.extend_from_slice(&record.value().to_be_bytes());
        payload
    }

    fn decode(&self, payload: &[u8]) -> CodecResult<Record<u32, u32>> {
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(CodecError::Truncated {
                needed: Self::PAYLOAD_SIZE,
                available: payload.len(),
            });
        }
        if payload.len() > Self::PAYLOAD_SIZE {
            return Err(CodecError::Invalid(format!(
                "expected {} bytes, got {}",
                Self::PAYLOAD_SIZE,
                payload.len()
            )));
        }
        let key = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let value = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        Ok(Record::new(key, value))
    }

    fn key_to_token(&self, key: &u32) -> String {
        key.to_string()
    }

    fn key_from_token(&self, token: &str) -> CodecResult<u32> {
        token
            .parse()
            .map_err(|_| CodecError::InvalidToken(token.to_string()))
    }

    fn max_key(&self) -> u32 {
        u32::MAX
    }
}

/// Codec for utf-8 string keys and values, stored as `key 0x00 value`.
///
/// File name tokens are the hex encoding of the key bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl StringCodec {
    const SEPARATOR: u8 = 0x00;
}

impl RecordCodec for StringCodec {
    type Key = String;
    type Value = String;

    fn encode(&self, record: &Record<String, String>) -> Vec<u8> {
        let mut payload = Vec::with_capacity(record.key().len() + record.value().len() + 1);
        payload.extend_from_slice(record.key().as_bytes());
        payload.push(Self::SEPARATOR);
        payload.extend_from_slice(record.value().as_bytes());
        payload
    }

    fn decode(&self, payload: &[u8]) -> CodecResult<Record<String, String>> {
        let separator = payload
            .iter()
            .position(|&b| b == Self::SEPARATOR)
            .ok_or(CodecError::Truncated {
                needed: payload.len() + 1,
                available: payload.len(),
            })?;

        let key = std::str::from_utf8(&payload[..separator])
            .map_err(|e| CodecError::Invalid(format!("key is not utf-8: {e}")))?;
        let value = std::str::from_utf8(&payload[separator + 1..])
            .map_err(|e| CodecError::Invalid(format!("value is not utf-8: {e}")))?;

        Ok(Record::new(key.to_string(), value.to_string()))
    }

    fn key_to_token(&self, key: &String) -> String {
        key.bytes().map(|b| format!("{b:02x}")).collect()
    }

    fn key_from_token(&self, token: &str) -> CodecResult<String> {
        let invalid = || CodecError::InvalidToken(token.to_string());
        if token.len() % 2 != 0 {
            return Err(invalid());
        }
        let bytes = (0..token.len())
            .step_by(2)
            .map(|i| {
                token
                    .get(i..i + 2)
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                    .ok_or_else(invalid)
            })
            .collect::<CodecResult<Vec<u8>>>()?;
        String::from_utf8(bytes).map_err(|_| invalid())
    }

    fn max_key(&self) -> String {
        char::MAX.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_codec_payload_is_eight_bytes() {
        let codec = IntCodec;
        let payload = codec.encode(&Record::new(0x0102_0304, 7));
        assert_eq!(payload, vec![1, 2, 3, 4, 0, 0, 0, 7]);
        assert_eq!(codec.decode(&payload).unwrap(), Record::new(0x0102_0304, 7));
    }

    #[test]
    fn int_codec_rejects_wrong_lengths() {
        let codec = IntCodec;
        assert_eq!(
            codec.decode(&[1, 2, 3]),
            Err(CodecError::Truncated {
                needed: 8,
                available: 3
            })
        );
        assert!(matches!(codec.decode(&[0; 9]), Err(CodecError::Invalid(_))));
    }

    #[test]
    fn int_codec_tokens() {
        let codec = IntCodec;
        assert_eq!(codec.key_to_token(&42), "42");
        assert_eq!(codec.key_from_token("42").unwrap(), 42);
        assert!(codec.key_from_token("x").is_err());
    }

    #[test]
    fn string_codec_splits_on_separator() {
        let codec = StringCodec;
        let record = Record::new("key1".to_string(), "value1".to_string());
        let payload = codec.encode(&record);
        assert_eq!(payload, b"key1\0value1");
        assert_eq!(codec.decode(&payload).unwrap(), record);
    }

    #[test]
    fn string_codec_without_separator_is_truncated() {
        assert!(matches!(
            StringCodec.decode(b"key1"),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn string_codec_tokens_avoid_separator() {
        let codec = StringCodec;
        let key = "a_b".to_string();
        let token = codec.key_to_token(&key);
        assert_eq!(token, "615f62");
        assert!(!token.contains('_'));
        assert_eq!(codec.key_from_token(&token).unwrap(), key);
        assert!(codec.key_from_token("6").is_err());
        assert!(codec.key_from_token("zz").is_err());
    }

    #[test]
    fn max_keys_sort_last() {
        assert!("zzzz".to_string() < StringCodec.max_key());
        assert!(u32::MAX - 1 < IntCodec.max_key());
    }
}
