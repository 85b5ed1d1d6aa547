//! Virtual filesystem layer for the cellar storage engine.
//!
//! The page pool and the store layer never touch the operating system
//! directly; all file access goes through the [`Vfs`] trait and the two file
//! handle traits it produces:
//!
//! - [`BlockAccessFile`] — block-granular I/O on store data files. Offsets
//!   and lengths are always multiples of the block size the file was opened
//!   with, which lets implementations proxy straight to positional I/O
//!   without buffering.
//! - [`RandomAccessFile`] — byte-granular I/O for store log files, with an
//!   extra [`flush`](RandomAccessFile::flush) level between "handed to the
//!   OS" and "durable on media".
//!
//! Two implementations ship with the crate: [`MemoryVfs`] for tests and
//! in-memory stores, and [`UnixVfs`] backed by positional file I/O. The
//! [`fault`] module provides an error-injecting wrapper used by failure
//! tests.

pub mod fault;
mod memory;
mod traits;
#[cfg(unix)]
mod unix;

pub use memory::MemoryVfs;
pub use traits::{BlockAccessFile, RandomAccessFile, Vfs};
#[cfg(unix)]
pub use unix::UnixVfs;

use std::sync::Arc;

/// The VFS used when a pool is built without an explicit one.
#[cfg(unix)]
pub fn default_vfs() -> Arc<dyn Vfs> {
    Arc::new(UnixVfs::new())
}

/// The VFS used when a pool is built without an explicit one.
#[cfg(not(unix))]
pub fn default_vfs() -> Arc<dyn Vfs> {
    Arc::new(MemoryVfs::new())
}
