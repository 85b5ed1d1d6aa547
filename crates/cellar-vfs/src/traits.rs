use std::path::Path;

use cellar_error::Result;
use cellar_types::PageShift;

/// A virtual filesystem implementation.
///
/// Abstracts the platform services the storage engine needs: opening store
/// data files for block access, opening log files for random access, and
/// deleting files. Different backends can be plugged in — real files,
/// in-memory storage for tests, or embedder-provided implementations.
pub trait Vfs: Send + Sync {
    /// The name of this VFS (e.g. "unix", "memory").
    fn name(&self) -> &'static str;

    /// Open a file for block-granular access.
    ///
    /// Used for store data files. The block size is `1 << block_shift`; all
    /// subsequent reads and writes on the returned handle use offsets and
    /// lengths that are multiples of it.
    ///
    /// Returns the opened file and its current size in bytes.
    fn open_block_access(
        &self,
        path: &Path,
        block_shift: PageShift,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(Box<dyn BlockAccessFile>, u64)>;

    /// Open a file without any assumptions on the access pattern.
    ///
    /// Used for store log files.
    ///
    /// Returns the opened file and its current size in bytes.
    fn open_random_access(
        &self,
        path: &Path,
        create_if_missing: bool,
        error_if_exists: bool,
    ) -> Result<(Box<dyn RandomAccessFile>, u64)>;

    /// Delete a file from the filesystem.
    fn delete_file(&self, path: &Path) -> Result<()>;
}

/// Interface for accessing a file via block-granular I/O.
///
/// The block size is the store page size, fixed when the file is opened.
/// Implementations may rely on offsets and lengths being block multiples to
/// forward calls directly to the operating system without buffering.
///
/// Implementations must not call back into the page pool; the pool invokes
/// these methods with its own bookkeeping mid-update.
pub trait BlockAccessFile: Send {
    /// Read `buf.len()` bytes starting at byte offset `offset`.
    ///
    /// Both `offset` and `buf.len()` are multiples of the block size. A read
    /// that cannot supply every requested byte is an error.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` starting at byte offset `offset`.
    ///
    /// Both `offset` and `buf.len()` are multiples of the block size.
    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    /// Flush any cached data to persistent storage.
    ///
    /// After a successful return, previously written data survives a system
    /// crash or power failure.
    fn sync(&mut self) -> Result<()>;

    /// Close the file.
    ///
    /// The handle must not be used afterwards.
    fn close(&mut self) -> Result<()>;
}

/// File I/O interface without alignment assumptions.
///
/// Used for transaction log files. Implementations are encouraged to buffer;
/// any buffering must obey [`flush`](Self::flush) and [`sync`](Self::sync).
pub trait RandomAccessFile: Send {
    /// Read `buf.len()` bytes starting at byte offset `offset`.
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` starting at byte offset `offset`.
    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    /// Push application-level buffers to the operating system.
    ///
    /// After a successful return, the data survives an application crash but
    /// not necessarily an OS crash or power failure.
    fn flush(&mut self) -> Result<()>;

    /// Flush any cached data to persistent storage.
    fn sync(&mut self) -> Result<()>;

    /// Close the file.
    fn close(&mut self) -> Result<()>;
}
