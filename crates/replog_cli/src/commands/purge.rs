//! Purge command implementation.

use super::{log_files, parse_key, CliResult};
use replog_core::{Log, LogConfig, RecordCodec, LOG_FILE_SUFFIX, TOKEN_SEPARATOR};
use std::path::Path;
use tracing::info;

/// Runs the purge command.
///
/// With `dry_run` the sealed files that would go are listed and nothing is
/// opened for writing.
pub fn run<C: RecordCodec + Clone>(
    path: &Path,
    codec: C,
    block_size: usize,
    up_to: &str,
    dry_run: bool,
) -> CliResult<()> {
    let key = parse_key(&codec, up_to)?;

    if dry_run {
        let doomed = purgeable_files(path, &codec, &key)?;
        println!("Would delete {} file(s):", doomed.len());
        for name in doomed {
            println!("  {name}");
        }
        return Ok(());
    }

    let config = LogConfig::new().block_size(block_size).max_file_size(u64::MAX);
    let log = Log::open(path, codec.clone(), config)?;
    let before = log.file_count();
    let oldest = log.purge_up_to(&key)?;
    let deleted = before - log.file_count();
    info!(deleted, "purged log");

    println!("Deleted {deleted} file(s)");
    match oldest {
        Some(record) => println!("Oldest key is now {}", codec.key_to_token(record.key())),
        None => println!("Log is empty"),
    }
    Ok(())
}

/// Names of the sealed files whose highest key is at most `key`.
pub fn purgeable_files<C: RecordCodec>(
    path: &Path,
    codec: &C,
    key: &C::Key,
) -> CliResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in log_files(path, codec)? {
        if !entry.sealed {
            continue;
        }
        let high = entry
            .name
            .strip_suffix(LOG_FILE_SUFFIX)
            .and_then(|stem| stem.split_once(TOKEN_SEPARATOR))
            .and_then(|(_, high)| codec.key_from_token(high).ok());
        if high.is_some_and(|high| &high <= key) {
            names.push(entry.name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replog_core::{IntCodec, Record};

    fn write_log(dir: &Path) {
        let log = Log::open(dir, IntCodec, LogConfig::new().max_file_size(20)).unwrap();
        for key in 1..=7 {
            log.append(&Record::new(key, key)).unwrap();
        }
    }

    #[test]
    fn dry_run_lists_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path());

        assert_eq!(
            purgeable_files(dir.path(), &IntCodec, &5).unwrap(),
            ["1_2.log", "3_4.log"]
        );
        run(dir.path(), IntCodec, replog_core::DEFAULT_BLOCK_SIZE, "5", true).unwrap();
        assert!(dir.path().join("1_2.log").exists());
    }

    #[test]
    fn purge_deletes_sealed_files() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path());

        run(dir.path(), IntCodec, replog_core::DEFAULT_BLOCK_SIZE, "5", false).unwrap();
        assert!(!dir.path().join("1_2.log").exists());
        assert!(!dir.path().join("3_4.log").exists());
        assert!(dir.path().join("5_6.log").exists());
    }

    #[test]
    fn bad_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path());
        assert!(run(dir.path(), IntCodec, replog_core::DEFAULT_BLOCK_SIZE, "five", false).is_err());
    }
}
