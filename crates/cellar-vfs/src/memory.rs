use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use cellar_error::{CellarError, Result};
use cellar_types::PageShift;

use crate::traits::{BlockAccessFile, RandomAccessFile, Vfs};

/// Shared storage for one file in the memory VFS.
///
/// Multiple handles opened on the same path share the same byte vector.
type FileStorage = Arc<Mutex<Vec<u8>>>;

#[derive(Debug, Default)]
struct MemoryVfsInner {
    files: HashMap<PathBuf, FileStorage>,
}

/// An in-memory VFS for testing and ephemeral stores.
///
/// All files are byte vectors held in memory with no persistence. Cloning
/// the VFS shares the same file namespace, so several pools or handles can
/// observe the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryVfs {
    inner: Arc<Mutex<MemoryVfsInner>>,
}

impl MemoryVfs {
    /// Create a new empty in-memory VFS.
    pub fn new() -> Self {
        Self::default()
    }

    fn open_storage(
        &self,
        path: &Path,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(FileStorage, u64)> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.files.get(path) {
            if error_if_exists {
                return Err(CellarError::CannotOpen {
                    path: path.to_path_buf(),
                });
            }
            let size = existing.lock().len() as u64;
            return Ok((Arc::clone(existing), size));
        }
        if !create_if_missing && !error_if_exists {
            return Err(CellarError::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        let storage: FileStorage = Arc::new(Mutex::new(Vec::new()));
        inner.files.insert(path.to_path_buf(), Arc::clone(&storage));
        Ok((storage, 0))
    }
}

impl Vfs for MemoryVfs {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open_block_access(
        &self,
        path: &Path,
        block_shift: PageShift,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(Box<dyn BlockAccessFile>, u64)> {
        let (storage, size) = self.open_storage(path, create_if_missing, error_if_exists)?;
        let file = MemoryFile {
            storage,
            block_size: block_shift.page_size() as u64,
        };
        Ok((Box::new(file), size))
    }

    fn open_random_access(
        &self,
        path: &Path,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(Box<dyn RandomAccessFile>, u64)> {
        let (storage, size) = self.open_storage(path, create_if_missing, error_if_exists)?;
        let file = MemoryFile {
            storage,
            block_size: 1,
        };
        Ok((Box::new(file), size))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        match self.inner.lock().files.remove(path) {
            Some(_) => Ok(()),
            None => Err(CellarError::StoreNotFound {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// A file handle in the memory VFS.
///
/// Serves as both the block-access and random-access flavor; `block_size` is
/// 1 for random-access handles.
#[derive(Debug)]
struct MemoryFile {
    storage: FileStorage,
    block_size: u64,
}

impl MemoryFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.storage.lock();
        let offset = usize::try_from(offset).map_err(|_| short_read(buf.len(), 0))?;
        let end = offset + buf.len();
        if end > data.len() {
            let available = data.len().saturating_sub(offset);
            return Err(short_read(buf.len(), available));
        }
        buf.copy_from_slice(&data[offset..end]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut data = self.storage.lock();
        let offset = usize::try_from(offset)
            .map_err(|_| CellarError::internal("file offset exceeds address space"))?;
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(())
    }
}

fn short_read(expected: usize, actual: usize) -> CellarError {
    CellarError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("short read: expected {expected} bytes, got {actual}"),
    ))
}

impl BlockAccessFile for MemoryFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(offset % self.block_size, 0);
        debug_assert_eq!(buf.len() as u64 % self.block_size, 0);
        self.read_at(offset, buf)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        debug_assert_eq!(offset % self.block_size, 0);
        debug_assert_eq!(buf.len() as u64 % self.block_size, 0);
        self.write_at(buf, offset)
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RandomAccessFile for MemoryFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_at(offset, buf)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.write_at(buf, offset)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
