//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over one OS file.
///
/// # Visibility
///
/// Writes go straight to the file with `write_all`, without a user-space
/// buffer, and `size()` asks the file system every time. A reader holding a
/// separate `FileBackend` on the same path therefore sees an append as soon as
/// the writer's `append` returns.
///
/// # Durability
///
/// - `flush()` calls `File::flush()`
/// - `sync()` calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use replog_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut writer = FileBackend::open(Path::new("head.log")).unwrap();
/// writer.append(b"record").unwrap();
///
/// let reader = FileBackend::open_read_only(Path::new("head.log")).unwrap();
/// assert_eq!(reader.size().unwrap(), 6);
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    read_only: bool,
}

impl FileBackend {
    /// Opens or creates a file for reading and appending.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            read_only: false,
        })
    }

    /// Opens an existing file for reading only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            read_only: true,
        })
    }

    /// Returns the path the file was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether this handle rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly(self.path.display().to_string()));
        }
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        let size = file.metadata()?.len();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.ensure_writable()?;
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;

        if !data.is_empty() {
            file.write_all(data)?;
        }

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.lock().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.ensure_writable()?;
        let file = self.file.lock();
        let size = file.metadata()?.len();

        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        file.set_len(new_size)?;
        file.sync_all()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("head.log");

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert!(!backend.is_read_only());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("head.log");
        let mut backend = FileBackend::open(&path).unwrap();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("head.log")).unwrap();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 5),
            Err(StorageError::ReadPastEnd { size: 5, .. })
        ));
    }

    #[test]
    fn read_only_handle_sees_appends_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("head.log");
        let mut writer = FileBackend::open(&path).unwrap();
        let reader = FileBackend::open_read_only(&path).unwrap();

        for i in 0..10u8 {
            writer.append(&[i]).unwrap();
            assert_eq!(reader.size().unwrap(), u64::from(i) + 1);
            assert_eq!(reader.read_at(u64::from(i), 1).unwrap(), vec![i]);
        }
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("head.log");
        FileBackend::open(&path).unwrap().append(b"abc").unwrap();

        let mut reader = FileBackend::open_read_only(&path).unwrap();
        assert!(matches!(reader.append(b"x"), Err(StorageError::ReadOnly(_))));
        assert!(matches!(reader.truncate(0), Err(StorageError::ReadOnly(_))));
        assert!(reader.sync().is_ok());
    }

    #[test]
    fn read_only_open_of_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(FileBackend::open_read_only(&dir.path().join("missing.log")).is_err());
    }

    #[test]
    fn file_truncate_drops_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("head.log");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"complete|torn").unwrap();

        backend.truncate(8).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(backend.append(b"!").unwrap(), 8);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"complete!");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { requested: 100, .. })
        ));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("head.log");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"persistent data").unwrap();
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 15);
        assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
        assert_eq!(backend.path(), path);
    }
}
