//! Dump command implementation.

use super::{parse_key, CliError, CliResult, OutputFormat};
use replog_core::{Cursor, KeyMatchingStrategy, Log, LogConfig, PositionStrategy, RecordCodec};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Options of the dump command.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Block size the log was written with.
    pub block_size: usize,
    /// Key token to start at.
    pub from: Option<String>,
    /// Maximum number of records.
    pub limit: Option<usize>,
    /// Directory for per-file text dumps.
    pub out_dir: Option<PathBuf>,
    /// Output format for records printed to stdout.
    pub format: OutputFormat,
}

/// A record as printed.
#[derive(Debug, Serialize)]
pub struct DumpedRecord {
    /// Key token.
    pub key: String,
    /// Debug rendering of the value.
    pub value: String,
}

/// Runs the dump command.
///
/// The log is opened for writing, so a torn head file tail is repaired.
pub fn run<C: RecordCodec + Clone>(path: &Path, codec: C, options: &DumpOptions) -> CliResult<()> {
    if !path.is_dir() {
        return Err(CliError::NoLog(path.to_path_buf()));
    }
    let config = LogConfig::new()
        .block_size(options.block_size)
        .max_file_size(u64::MAX);
    let from = options
        .from
        .as_deref()
        .map(|token| parse_key(&codec, token))
        .transpose()?;
    let log = Log::open(path, codec.clone(), config)?;

    if let Some(out_dir) = &options.out_dir {
        let written = log.dump_as_text_files(out_dir)?;
        info!(files = written.len(), out_dir = %out_dir.display(), "dumped log files");
        for file in written {
            println!("{}", file.display());
        }
        return Ok(());
    }

    let records = collect(&log, &codec, from.as_ref(), options.limit)?;
    let mut out = io::stdout().lock();
    match options.format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&records)?)?,
        OutputFormat::Text => {
            for record in &records {
                writeln!(out, "{} {}", record.key, record.value)?;
            }
        }
    }
    Ok(())
}

/// Reads up to `limit` records starting at `from`.
pub fn collect<C: RecordCodec>(
    log: &Log<C>,
    codec: &C,
    from: Option<&C::Key>,
    limit: Option<usize>,
) -> CliResult<Vec<DumpedRecord>> {
    let mut cursor = log.cursor_from(
        from,
        KeyMatchingStrategy::GreaterThanOrEqualToKey,
        PositionStrategy::OnMatchingKey,
    )?;

    let limit = limit.unwrap_or(usize::MAX);
    let mut records = Vec::new();
    while records.len() < limit && cursor.next()? {
        if let Some(record) = cursor.record() {
            records.push(DumpedRecord {
                key: codec.key_to_token(record.key()),
                value: format!("{:?}", record.value()),
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replog_core::{IntCodec, Record};

    #[test]
    fn collects_from_key_with_limit() {
        let dir = tempfile::tempdir().unwrap();
        let log = Log::open(dir.path(), IntCodec, LogConfig::new().max_file_size(20)).unwrap();
        for key in (10..=80).step_by(10) {
            log.append(&Record::new(key, key + 1)).unwrap();
        }

        let records = collect(&log, &IntCodec, Some(&25), Some(3)).unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["30", "40", "50"]);
        assert_eq!(records[0].value, "31");

        assert_eq!(collect(&log, &IntCodec, None, None).unwrap().len(), 8);
    }

    #[test]
    fn writes_text_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = Log::open(dir.path(), IntCodec, LogConfig::new().max_file_size(20)).unwrap();
            for key in 1..=3 {
                log.append(&Record::new(key, key)).unwrap();
            }
        }
        let out = tempfile::tempdir().unwrap();
        let options = DumpOptions {
            block_size: replog_core::DEFAULT_BLOCK_SIZE,
            from: None,
            limit: None,
            out_dir: Some(out.path().to_path_buf()),
            format: OutputFormat::Text,
        };

        run(dir.path(), IntCodec, &options).unwrap();
        let sealed = std::fs::read_to_string(out.path().join("1_2.log.txt")).unwrap();
        assert_eq!(sealed, "1 1\n2 2\n");
        assert!(out.path().join("head.log.txt").exists());
    }
}
