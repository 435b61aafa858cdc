//! Inspect command implementation.

use super::{log_files, CliResult, OutputFormat};
use replog_core::{LogFile, RecordCodec};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Log directory.
    pub path: String,
    /// Block size used to read the files.
    pub block_size: usize,
    /// Files in key order, head file last.
    pub files: Vec<FileInfo>,
    /// Records across all files.
    pub total_records: u64,
    /// Bytes across all files.
    pub total_size: u64,
}

/// Statistics for a single log file.
#[derive(Debug, Serialize)]
pub struct FileInfo {
    /// File name.
    pub name: String,
    /// Whether the file is sealed.
    pub sealed: bool,
    /// Size in bytes.
    pub size: u64,
    /// Number of records.
    pub records: u64,
    /// Token of the first key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_key: Option<String>,
    /// Token of the last key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_key: Option<String>,
}

/// Runs the inspect command. Files are opened read-only.
pub fn run<C: RecordCodec>(path: &Path, codec: C, block_size: usize) -> CliResult<InspectReport> {
    let codec = Arc::new(codec);
    let mut report = InspectReport {
        path: path.display().to_string(),
        block_size,
        files: Vec::new(),
        total_records: 0,
        total_size: 0,
    };

    for entry in log_files(path, codec.as_ref())? {
        let file = LogFile::open_read_only(&entry.path, Arc::clone(&codec), block_size)?;
        let info = FileInfo {
            name: entry.name,
            sealed: entry.sealed,
            size: file.size_in_bytes()?,
            records: file.number_of_records()?,
            oldest_key: file.oldest_record()?.map(|r| codec.key_to_token(r.key())),
            newest_key: file.newest_record()?.map(|r| codec.key_to_token(r.key())),
        };
        report.total_records += info.records;
        report.total_size += info.size;
        report.files.push(info);
    }
    Ok(report)
}

/// Prints the report in the requested format.
pub fn print(report: &InspectReport, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print_text_output(report),
    }
    Ok(())
}

fn print_text_output(report: &InspectReport) {
    println!("Log: {}", report.path);
    println!("Block size: {} bytes", report.block_size);
    println!();
    println!("{:<40} {:>12} {:>10}  range", "file", "size", "records");
    for file in &report.files {
        let range = match (&file.oldest_key, &file.newest_key) {
            (Some(oldest), Some(newest)) => format!("{oldest} .. {newest}"),
            _ => "(empty)".to_string(),
        };
        println!(
            "{:<40} {:>12} {:>10}  {}",
            file.name, file.size, file.records, range
        );
    }
    println!();
    println!(
        "{} file(s), {} record(s), {} bytes",
        report.files.len(),
        report.total_records,
        report.total_size
    );
}
