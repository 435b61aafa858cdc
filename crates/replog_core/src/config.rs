//! Log configuration.

use crate::block::MARKER_SIZE;
use crate::error::{ChangelogError, ChangelogResult};
use std::time::Duration;

/// Default distance between boundary markers.
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Default head file size that triggers a rotation.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// When the head file of a log is sealed and replaced.
///
/// The size threshold and the two time thresholds are independent. A zero
/// interval disables the corresponding time check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the head file is strictly larger than this.
    pub max_file_size: u64,

    /// Rotate once more than this has elapsed since the last rotation.
    pub rotation_interval: Duration,

    /// Never rotate sooner than this after the last rotation.
    pub min_rotation_interval: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            rotation_interval: Duration::ZERO,     // disabled
            min_rotation_interval: Duration::ZERO, // disabled
        }
    }
}

/// Configuration shared by the files of a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Distance in bytes between boundary markers.
    pub block_size: usize,

    /// Rotation thresholds.
    pub rotation: RotationPolicy,

    /// Whether to sync the head file after every append.
    pub sync_on_append: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            rotation: RotationPolicy::default(),
            sync_on_append: false,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size.
    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the head file size that triggers a rotation.
    #[must_use]
    pub const fn max_file_size(mut self, size: u64) -> Self {
        self.rotation.max_file_size = size;
        self
    }

    /// Sets the time-based rotation interval.
    #[must_use]
    pub const fn rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation.rotation_interval = interval;
        self
    }

    /// Sets the minimum time between two rotations.
    #[must_use]
    pub const fn min_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation.min_rotation_interval = interval;
        self
    }

    /// Sets whether to sync after every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Checks that the configuration can be used to open a log.
    ///
    /// # Errors
    ///
    /// Returns [`ChangelogError::InvalidConfig`] if the block size cannot hold
    /// a boundary marker plus data, does not fit a marker value, or the size
    /// threshold is zero.
    pub fn validate(&self) -> ChangelogResult<()> {
        if self.block_size <= MARKER_SIZE {
            return Err(ChangelogError::invalid_config(format!(
                "block size must be greater than {MARKER_SIZE} bytes, got {}",
                self.block_size
            )));
        }
        if u32::try_from(self.block_size).is_err() {
            return Err(ChangelogError::invalid_config(format!(
                "block size {} does not fit in a boundary marker",
                self.block_size
            )));
        }
        if self.rotation.max_file_size == 0 {
            return Err(ChangelogError::invalid_config(
                "max file size must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = LogConfig::default();
        assert_eq!(config.block_size, 256 * 1024);
        assert_eq!(config.rotation.max_file_size, 100 * 1024 * 1024);
        assert!(config.rotation.rotation_interval.is_zero());
        assert!(config.rotation.min_rotation_interval.is_zero());
        assert!(!config.sync_on_append);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = LogConfig::new()
            .block_size(64)
            .max_file_size(1024)
            .rotation_interval(Duration::from_secs(60))
            .min_rotation_interval(Duration::from_secs(5))
            .sync_on_append(true);

        assert_eq!(config.block_size, 64);
        assert_eq!(config.rotation.max_file_size, 1024);
        assert_eq!(config.rotation.rotation_interval, Duration::from_secs(60));
        assert_eq!(config.rotation.min_rotation_interval, Duration::from_secs(5));
        assert!(config.sync_on_append);
    }

    #[test]
    fn block_size_must_exceed_marker() {
        assert!(matches!(
            LogConfig::new().block_size(4).validate(),
            Err(ChangelogError::InvalidConfig { .. })
        ));
        assert!(LogConfig::new().block_size(5).validate().is_ok());
    }

    #[test]
    fn zero_file_size_rejected() {
        assert!(LogConfig::new().max_file_size(0).validate().is_err());
    }
}
