//! Journal file on local disk.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Open handle plus the length the backend has accounted for.
#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

/// A journal stored in one file.
///
/// The owning process holds an exclusive advisory lock on `<file>.lock` for
/// as long as the backend lives; a second open fails with
/// [`StorageError::Locked`] instead of interleaving records.
///
/// `flush` hands buffered bytes to the OS and `sync` waits for the disk.
/// `replace` builds the new contents in `<file>.tmp`, syncs it, renames it
/// into place and keeps writing through the same handle, so the backend
/// never points at an unlinked file.
///
/// ```no_run
/// use fieldpulse_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut journal = FileBackend::open(Path::new("positions.journal")).unwrap();
/// journal.append(b"record").unwrap();
/// journal.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
    _lock: File,
}

impl FileBackend {
    /// Opens the journal at `path`, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// [`StorageError::Locked`] while another process has the journal
    /// open; I/O errors from opening either file.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling(path, ".lock"))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle { file, len }),
            _lock: lock,
        })
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), plus directory creation failures.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Location of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        let size = handle.len;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut buffer = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if !data.is_empty() {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            handle.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(self.handle.get_mut().file.flush()?)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(self.handle.get_mut().file.sync_all()?)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if new_size > handle.len {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: handle.len,
            });
        }

        handle.file.set_len(new_size)?;
        handle.file.sync_all()?;
        handle.len = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        let tmp_path = sibling(&self.path, ".tmp");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(data)?;
        tmp.sync_all()?;

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        // `tmp` is now the journal itself.
        *self.handle.get_mut() = Handle {
            file: tmp,
            len: data.len() as u64,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn journal() -> (TempDir, PathBuf, FileBackend) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.journal");
        let backend = FileBackend::open(&path).unwrap();
        (dir, path, backend)
    }

    #[test]
    fn open_creates_an_empty_journal() {
        let (_dir, path, backend) = journal();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
        assert_eq!(backend.path(), path);
        assert!(backend.read_at(0, 0).unwrap().is_empty());
    }

    #[test]
    fn appends_report_their_offsets() {
        let (_dir, _path, mut backend) = journal();

        assert_eq!(backend.append(b"FPJR").unwrap(), 0);
        assert_eq!(backend.append(b"").unwrap(), 4);
        assert_eq!(backend.append(b"-rec").unwrap(), 4);
        assert_eq!(backend.read_at(2, 4).unwrap(), b"JR-r");
        assert!(matches!(
            backend.read_at(6, 3),
            Err(StorageError::ReadPastEnd { size: 8, .. })
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        let (_dir, path, mut backend) = journal();
        backend.append(b"pending fixes").unwrap();
        backend.sync().unwrap();
        drop(backend);

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_at(0, 13).unwrap(), b"pending fixes");
    }

    #[test]
    fn second_open_is_locked() {
        let (_dir, path, _backend) = journal();
        assert!(matches!(
            FileBackend::open(&path),
            Err(StorageError::Locked { .. })
        ));
    }

    #[test]
    fn truncate_cuts_a_torn_tail() {
        let (_dir, path, mut backend) = journal();
        backend.append(b"complete|torn").unwrap();

        backend.truncate(8).unwrap();
        assert_eq!(backend.size().unwrap(), 8);
        assert_eq!(fs::metadata(&path).unwrap().len(), 8);
        assert!(matches!(
            backend.truncate(9),
            Err(StorageError::InvalidTruncate { requested: 9, size: 8 })
        ));
    }

    #[test]
    fn writes_after_replace_land_in_the_live_file() {
        let (_dir, path, mut backend) = journal();
        backend.append(b"a long journal with dead records").unwrap();

        backend.replace(b"live").unwrap();
        assert_eq!(backend.size().unwrap(), 4);
        assert_eq!(backend.append(b"+more").unwrap(), 4);
        backend.sync().unwrap();

        // Visible on disk while the backend is still open.
        assert_eq!(fs::read(&path).unwrap(), b"live+more");
        assert_eq!(backend.read_at(0, 9).unwrap(), b"live+more");
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[test]
    fn failed_replace_keeps_the_old_journal() {
        let (_dir, path, mut backend) = journal();
        backend.append(b"kept").unwrap();

        // A directory in the way makes the temporary file impossible.
        fs::create_dir(sibling(&path, ".tmp")).unwrap();
        assert!(backend.replace(b"new").is_err());

        assert_eq!(backend.append(b"+1").unwrap(), 4);
        backend.sync().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"kept+1");
    }

    #[test]
    fn parent_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("var").join("fieldpulse").join("positions.journal");

        let backend = FileBackend::open_with_create_dirs(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 0);
        assert!(path.exists());
    }
}
