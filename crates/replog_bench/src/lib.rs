//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::Rng;
use replog_core::{Csn, Log, LogConfig, UpdateMsg, UpdateMsgCodec};
use tempfile::TempDir;

/// Generate random payload bytes of the specified size.
pub fn random_payload(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Build the change record with CSN timestamp `timestamp`.
pub fn change(timestamp: u64, payload: Vec<u8>) -> replog_core::Record<Csn, UpdateMsg> {
    UpdateMsg::Change {
        csn: Csn::new(timestamp, 0, 1),
        payload,
    }
    .into_record()
}

/// Open a replica log in a fresh temporary directory.
pub fn empty_log(config: LogConfig) -> (TempDir, Log<UpdateMsgCodec>) {
    let dir = tempfile::tempdir().unwrap();
    let log = Log::open(dir.path(), UpdateMsgCodec, config).unwrap();
    (dir, log)
}

/// Open a replica log holding `count` changes with timestamps `1..=count`.
pub fn populated_log(
    count: u64,
    payload_size: usize,
    config: LogConfig,
) -> (TempDir, Log<UpdateMsgCodec>) {
    let (dir, log) = empty_log(config);
    let payload = random_payload(payload_size);
    for timestamp in 1..=count {
        log.append(&change(timestamp, payload.clone())).unwrap();
    }
    (dir, log)
}
