//! Verify command implementation.

use super::{log_files, CliResult};
use replog_core::{LogFile, RecordCodec, LOG_FILE_SUFFIX, TOKEN_SEPARATOR};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Number of files checked.
    pub files_checked: usize,
    /// Number of records read.
    pub records_checked: u64,
    /// Damage that the log will not repair by itself.
    pub problems: Vec<String>,
    /// Findings that are repaired when the log is next opened.
    pub warnings: Vec<String>,
}

impl VerifyReport {
    /// Returns true if no problem was found.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Runs the verify command. Files are opened read-only.
///
/// Every record of every file is decoded. Keys must increase across the
/// whole log, sealed file names must match their first and last keys, and
/// only the head file may end with an incomplete record.
pub fn run<C: RecordCodec>(path: &Path, codec: C, block_size: usize) -> CliResult<VerifyReport> {
    let codec = Arc::new(codec);
    let mut report = VerifyReport::default();
    let mut previous: Option<C::Key> = None;

    for entry in log_files(path, codec.as_ref())? {
        debug!(file = %entry.name, "verifying log file");
        report.files_checked += 1;

        let file = LogFile::open_read_only(&entry.path, Arc::clone(&codec), block_size)?;
        let mut reader = file.reader();
        let mut first = None;
        let mut last = None;
        loop {
            match reader.read_record() {
                Ok(Some(record)) => {
                    report.records_checked += 1;
                    let (key, _) = record.into_parts();
                    if previous.as_ref().is_some_and(|previous| &key <= previous) {
                        report.problems.push(format!(
                            "{}: key {} is out of order",
                            entry.name,
                            codec.key_to_token(&key)
                        ));
                    }
                    if first.is_none() {
                        first = Some(key.clone());
                    }
                    previous = Some(key.clone());
                    last = Some(key);
                }
                Ok(None) => break,
                Err(err) => {
                    report.problems.push(format!(
                        "{}: unreadable record at offset {}: {err}",
                        entry.name,
                        reader.position()
                    ));
                    break;
                }
            }
        }

        let tail = file.size_in_bytes()?.saturating_sub(reader.position());
        if tail > 0 {
            let finding = format!("{}: {tail} trailing byte(s) after the last record", entry.name);
            if entry.sealed {
                report.problems.push(finding);
            } else {
                report.warnings.push(finding);
            }
        }

        if entry.sealed {
            match (first, last) {
                (Some(first), Some(last)) => {
                    let expected = format!(
                        "{}{TOKEN_SEPARATOR}{}{LOG_FILE_SUFFIX}",
                        codec.key_to_token(&first),
                        codec.key_to_token(&last)
                    );
                    if expected != entry.name {
                        report.problems.push(format!(
                            "{}: holds keys of {expected}",
                            entry.name
                        ));
                    }
                }
                _ => report
                    .problems
                    .push(format!("{}: sealed file holds no record", entry.name)),
            }
        }
    }
    Ok(report)
}

/// Prints the report.
pub fn print(report: &VerifyReport) {
    println!(
        "Checked {} file(s), {} record(s)",
        report.files_checked, report.records_checked
    );
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    for problem in &report.problems {
        println!("  error: {problem}");
    }
    println!();
    if report.is_ok() {
        println!("✓ Log verification passed");
    } else {
        println!("✗ Log verification failed");
    }
}
