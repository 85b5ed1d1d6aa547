use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use cellar_error::{CellarError, Result};
use cellar_types::PageShift;

use crate::traits::{BlockAccessFile, RandomAccessFile, Vfs};

/// A VFS backed by the local filesystem.
///
/// Uses positional reads and writes (`pread`/`pwrite` family) so no seek
/// state is carried between calls, and no user-space buffering, which suits
/// the block-granular access pattern of store data files.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixVfs;

impl UnixVfs {
    /// Create a Unix VFS.
    pub fn new() -> Self {
        Self
    }

    fn open_file(
        path: &Path,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(File, u64)> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        if error_if_exists {
            options.create_new(true);
        } else if create_if_missing {
            options.create(true);
        }

        let file = options.open(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CellarError::StoreNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                CellarError::CannotOpen {
                    path: path.to_path_buf(),
                }
            }
        })?;
        let size = file.metadata().map_err(CellarError::Io)?.len();
        Ok((file, size))
    }
}

impl Vfs for UnixVfs {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn open_block_access(
        &self,
        path: &Path,
        block_shift: PageShift,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(Box<dyn BlockAccessFile>, u64)> {
        let (file, size) = Self::open_file(path, create_if_missing, error_if_exists)?;
        let file = UnixFile {
            file,
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
        let (file, size) = Self::open_file(path, create_if_missing, error_if_exists)?;
        let file = UnixFile {
            file,
            block_size: 1,
        };
        Ok((Box::new(file), size))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                CellarError::StoreNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                CellarError::Io(err)
            }
        })
    }
}

/// A file handle backed by a local file descriptor.
#[derive(Debug)]
struct UnixFile {
    file: File,
    block_size: u64,
}

impl BlockAccessFile for UnixFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(offset % self.block_size, 0);
        debug_assert_eq!(buf.len() as u64 % self.block_size, 0);
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        debug_assert_eq!(offset % self.block_size, 0);
        debug_assert_eq!(buf.len() as u64 % self.block_size, 0);
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // Positional writes are unbuffered; the descriptor closes on drop.
        Ok(())
    }
}

impl RandomAccessFile for UnixFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
