//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod purge;
pub mod verify;

use clap::ValueEnum;
use replog_core::{
    ChangelogError, CodecError, RecordCodec, HEAD_FILE_NAME, LOG_FILE_SUFFIX, TOKEN_SEPARATOR,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory holds no log file.
    #[error("no log found at {}", .0.display())]
    NoLog(PathBuf),

    /// A key token given on the command line does not parse.
    #[error("invalid key {token:?}: {source}")]
    InvalidKey {
        /// Token as given.
        token: String,
        /// Why it was rejected.
        source: CodecError,
    },

    /// Verification found problems.
    #[error("verification failed with {problems} problem(s)")]
    VerificationFailed {
        /// Number of problems found.
        problems: usize,
    },

    /// Changelog engine error.
    #[error(transparent)]
    Changelog(#[from] ChangelogError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Record codecs the CLI can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CodecKind {
    /// Replica update messages keyed by CSN
    Update,
    /// `u32` keys and values
    Int,
    /// utf-8 keys and values
    String,
}

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Runs `$body` with `$codec` bound to the codec selected by `$kind`.
macro_rules! with_codec {
    ($kind:expr, $codec:ident => $body:expr) => {
        match $kind {
            $crate::commands::CodecKind::Update => {
                let $codec = replog_core::UpdateMsgCodec;
                $body
            }
            $crate::commands::CodecKind::Int => {
                let $codec = replog_core::IntCodec;
                $body
            }
            $crate::commands::CodecKind::String => {
                let $codec = replog_core::StringCodec;
                $body
            }
        }
    };
}
pub(crate) use with_codec;

/// A log file found in a log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileEntry {
    /// Path of the file.
    pub path: PathBuf,
    /// File name.
    pub name: String,
    /// Whether this is a sealed file rather than the head file.
    pub sealed: bool,
}

/// Lists the log files of `dir` in key order, head file last.
///
/// Files whose names do not parse with `codec` are skipped, as the log
/// itself skips them.
pub fn log_files<C: RecordCodec>(dir: &Path, codec: &C) -> CliResult<Vec<LogFileEntry>> {
    if !dir.is_dir() {
        return Err(CliError::NoLog(dir.to_path_buf()));
    }

    let mut sealed = BTreeMap::new();
    let mut head = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name == HEAD_FILE_NAME {
            head = Some(LogFileEntry {
                path: entry.path(),
                name,
                sealed: false,
            });
            continue;
        }
        let high = name
            .strip_suffix(LOG_FILE_SUFFIX)
            .and_then(|stem| stem.split_once(TOKEN_SEPARATOR))
            .and_then(|(_, high)| codec.key_from_token(high).ok());
        if let Some(high) = high {
            sealed.insert(
                high,
                LogFileEntry {
                    path: entry.path(),
                    name,
                    sealed: true,
                },
            );
        }
    }

    let files: Vec<_> = sealed.into_values().chain(head).collect();
    if files.is_empty() {
        return Err(CliError::NoLog(dir.to_path_buf()));
    }
    Ok(files)
}

/// Parses a key token given on the command line.
pub fn parse_key<C: RecordCodec>(codec: &C, token: &str) -> CliResult<C::Key> {
    codec
        .key_from_token(token)
        .map_err(|source| CliError::InvalidKey {
            token: token.to_string(),
            source,
        })
}
