//! The changelog environment: one root directory holding several logs.
//!
//! ```text
//! <root>/
//! ├─ LOCK                      # exclusive advisory lock
//! ├─ <name>/                   # one directory per log
//! │  ├─ head.log
//! │  ├─ <low>_<high>.log
//! │  └─ rotationtime<ms>.ms    # last rotation time
//! └─ ...
//! ```

use crate::clock::{Clock, SystemClock};
use crate::codec::RecordCodec;
use crate::config::LogConfig;
use crate::error::{ChangelogError, ChangelogResult};
use crate::log::{Log, LogShared, RotationObserver};
use fs2::FileExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Lock file name inside the root directory.
const LOCK_FILE: &str = "LOCK";

const ROTATION_TIME_PREFIX: &str = "rotationtime";
const ROTATION_TIME_SUFFIX: &str = ".ms";

type SharedSlot = Weak<dyn Any + Send + Sync>;

/// Owns a changelog root directory and hands out the logs inside it.
///
/// Only one environment may hold a root at a time, across processes.
/// Opening the same log name twice while a handle is alive returns the same
/// log.
pub struct ChangelogEnvironment {
    root: PathBuf,
    config: LogConfig,
    clock: Arc<dyn Clock>,
    logs: Mutex<HashMap<PathBuf, SharedSlot>>,
    _lock_file: File,
}

impl ChangelogEnvironment {
    /// Opens the environment rooted at `root`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::EnvironmentLocked`] if another environment
    /// holds the root, [`ChangelogError::InvalidConfig`] for an invalid
    /// configuration, or an I/O error.
    pub fn open(root: &Path, config: LogConfig) -> ChangelogResult<Self> {
        Self::open_with_clock(root, config, Arc::new(SystemClock))
    }

    /// Opens the environment with an explicit time source.
    pub fn open_with_clock(
        root: &Path,
        config: LogConfig,
        clock: Arc<dyn Clock>,
    ) -> ChangelogResult<Self> {
        config.validate()?;
        fs::create_dir_all(root)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(ChangelogError::EnvironmentLocked {
                path: root.to_path_buf(),
            });
        }
        debug!(root = %root.display(), "opened changelog environment");

        Ok(Self {
            root: root.to_path_buf(),
            config,
            clock,
            logs: Mutex::new(HashMap::new()),
            _lock_file: lock_file,
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the configuration shared by every log.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Opens the log called `name`, or returns the already open one.
    ///
    /// The last rotation time recorded in the log directory is restored, so
    /// time-based rotation carries on across restarts.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::InvalidOperation`] if `name` is not a plain
    /// directory name or the open log uses another codec type, or an error if
    /// the log cannot be opened.
    pub fn open_log<C: RecordCodec>(&self, name: &str, codec: C) -> ChangelogResult<Log<C>> {
        validate_name(name)?;
        let path = self.root.join(name);

        let mut logs = self.logs.lock();
        if let Some(any) = logs.get(&path).and_then(Weak::upgrade) {
            let shared = any.downcast::<LogShared<C>>().map_err(|_| {
                ChangelogError::invalid_operation(format!(
                    "log {name} is already open with another codec"
                ))
            })?;
            if !shared.is_closed() {
                return Ok(Log::from_shared(shared));
            }
        }

        let last_rotation = read_rotation_time(&path)?;
        let observer: Arc<dyn RotationObserver> = Arc::new(RotationTimeRecorder);
        let log = Log::open_shared(
            &path,
            Arc::new(codec),
            self.config.clone(),
            Arc::clone(&self.clock),
            Some(observer),
            last_rotation,
        )?;

        let any: Arc<dyn Any + Send + Sync> = Arc::clone(log.shared()) as _;
        logs.retain(|_, slot| slot.strong_count() > 0);
        logs.insert(path, Arc::downgrade(&any));
        Ok(log)
    }

    /// Returns the names of the log directories under the root.
    pub fn log_names(&self) -> ChangelogResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl std::fmt::Debug for ChangelogEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangelogEnvironment")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("open_logs", &self.logs.lock().len())
            .finish()
    }
}

fn validate_name(name: &str) -> ChangelogResult<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && name != LOCK_FILE;
    if plain {
        Ok(())
    } else {
        Err(ChangelogError::invalid_operation(format!(
            "invalid log name {name:?}"
        )))
    }
}

fn rotation_time_from_name(name: &str) -> Option<u64> {
    name.strip_prefix(ROTATION_TIME_PREFIX)?
        .strip_suffix(ROTATION_TIME_SUFFIX)?
        .parse()
        .ok()
}

/// Returns the newest rotation time recorded in `log_dir`.
fn read_rotation_time(log_dir: &Path) -> ChangelogResult<Option<u64>> {
    if !log_dir.exists() {
        return Ok(None);
    }
    let mut newest = None;
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        if let Some(millis) = entry.file_name().to_str().and_then(rotation_time_from_name) {
            newest = newest.max(Some(millis));
        }
    }
    Ok(newest)
}

/// Records each rotation as an empty `rotationtime<ms>.ms` file.
#[derive(Debug)]
struct RotationTimeRecorder;

impl RotationTimeRecorder {
    fn record(log_path: &Path, millis: u64) -> std::io::Result<()> {
        let name = format!("{ROTATION_TIME_PREFIX}{millis}{ROTATION_TIME_SUFFIX}");
        File::create(log_path.join(&name))?;

        for entry in fs::read_dir(log_path)? {
            let entry = entry?;
            let Some(other) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if other != name && rotation_time_from_name(&other).is_some() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

impl RotationObserver for RotationTimeRecorder {
    fn log_rotated(&self, log_path: &Path, rotated_at_millis: u64) {
        if let Err(err) = Self::record(log_path, rotated_at_millis) {
            warn!(
                path = %log_path.display(),
                error = %err,
                "could not record log rotation time"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{IntCodec, Record, StringCodec};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn second_environment_is_locked_out() {
        let dir = tempdir().unwrap();
        let env = ChangelogEnvironment::open(dir.path(), LogConfig::default()).unwrap();

        assert!(matches!(
            ChangelogEnvironment::open(dir.path(), LogConfig::default()),
            Err(ChangelogError::EnvironmentLocked { .. })
        ));

        drop(env);
        assert!(ChangelogEnvironment::open(dir.path(), LogConfig::default()).is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            ChangelogEnvironment::open(dir.path(), LogConfig::new().block_size(2)),
            Err(ChangelogError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn same_name_shares_one_log() {
        let dir = tempdir().unwrap();
        let env = ChangelogEnvironment::open(dir.path(), LogConfig::default()).unwrap();

        let first = env.open_log("dc=example", IntCodec).unwrap();
        let second = env.open_log("dc=example", IntCodec).unwrap();
        first.append(&Record::new(1, 1)).unwrap();
        assert_eq!(second.newest_record().unwrap(), Some(Record::new(1, 1)));
        assert!(Arc::ptr_eq(first.shared(), second.shared()));

        let other = env.open_log("dc=other", IntCodec).unwrap();
        assert_eq!(other.newest_record().unwrap(), None);
        assert_eq!(env.log_names().unwrap(), ["dc=example", "dc=other"]);
    }

    #[test]
    fn codec_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let env = ChangelogEnvironment::open(dir.path(), LogConfig::default()).unwrap();
        let _log = env.open_log("replica", IntCodec).unwrap();

        assert!(matches!(
            env.open_log("replica", StringCodec),
            Err(ChangelogError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn closed_log_is_reopened() {
        let dir = tempdir().unwrap();
        let env = ChangelogEnvironment::open(dir.path(), LogConfig::default()).unwrap();

        let log = env.open_log("replica", IntCodec).unwrap();
        log.append(&Record::new(1, 1)).unwrap();
        log.close().unwrap();

        let reopened = env.open_log("replica", IntCodec).unwrap();
        assert!(!reopened.is_closed());
        assert_eq!(reopened.number_of_records().unwrap(), 1);
    }

    #[test]
    fn path_like_names_are_rejected() {
        let dir = tempdir().unwrap();
        let env = ChangelogEnvironment::open(dir.path(), LogConfig::default()).unwrap();
        for name in ["", ".", "..", "a/b", "LOCK"] {
            assert!(env.open_log(name, IntCodec).is_err(), "{name:?}");
        }
    }

    #[test]
    fn rotation_time_survives_reopen() {
        let dir = tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(1_000));
        let config = LogConfig::new().rotation_interval(Duration::from_secs(60));

        {
            let env =
                ChangelogEnvironment::open_with_clock(dir.path(), config.clone(), clock.clone())
                    .unwrap();
            let log = env.open_log("replica", IntCodec).unwrap();
            log.append(&Record::new(1, 1)).unwrap();
            clock.advance(Duration::from_secs(61));
            log.append(&Record::new(2, 2)).unwrap();
            assert_eq!(log.file_count(), 2);
        }

        let log_dir = dir.path().join("replica");
        assert!(log_dir.join("rotationtime62000.ms").exists());
        assert_eq!(read_rotation_time(&log_dir).unwrap(), Some(62_000));

        // 30s after the recorded rotation: a fresh clock base would rotate
        clock.set(92_000);
        let env = ChangelogEnvironment::open_with_clock(dir.path(), config, clock.clone()).unwrap();
        let log = env.open_log("replica", IntCodec).unwrap();
        log.append(&Record::new(3, 3)).unwrap();
        assert_eq!(log.file_count(), 2);

        clock.advance(Duration::from_secs(31));
        log.append(&Record::new(4, 4)).unwrap();
        assert_eq!(log.file_count(), 3);
    }

    #[test]
    fn recorder_keeps_only_the_latest_time() {
        let dir = tempdir().unwrap();
        RotationTimeRecorder.log_rotated(dir.path(), 5);
        RotationTimeRecorder.log_rotated(dir.path(), 7);

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["rotationtime7.ms"]);
        assert_eq!(rotation_time_from_name("rotationtime12.ms"), Some(12));
        assert_eq!(rotation_time_from_name("rotationtimex.ms"), None);
    }
}
