//! Fault injection for I/O failure tests.
//!
//! [`BlockAccessFileWrapper`] forwards calls to an inner file until its
//! [`FaultHandle`] is armed, after which every I/O call fails with the
//! configured error kind without touching the inner file. The handle stays
//! with the test while the wrapper is boxed away inside a store.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use cellar_error::Result;

use crate::traits::BlockAccessFile;

/// Remote control for a [`BlockAccessFileWrapper`].
#[derive(Debug, Clone, Default)]
pub struct FaultHandle {
    error: Arc<Mutex<Option<io::ErrorKind>>>,
}

impl FaultHandle {
    /// Make every subsequent I/O call on the wrapped file fail.
    pub fn fail_with(&self, kind: io::ErrorKind) {
        *self.error.lock() = Some(kind);
    }

    /// Stop injecting errors; calls are forwarded again.
    pub fn clear(&self) {
        *self.error.lock() = None;
    }

    fn check(&self) -> Result<()> {
        match *self.error.lock() {
            Some(kind) => Err(io::Error::new(kind, "injected I/O fault").into()),
            None => Ok(()),
        }
    }
}

/// A [`BlockAccessFile`] wrapper that can be switched into a failing state.
pub struct BlockAccessFileWrapper {
    inner: Box<dyn BlockAccessFile>,
    handle: FaultHandle,
}

impl BlockAccessFileWrapper {
    /// Wrap a file, returning the wrapper and the handle that controls it.
    pub fn new(inner: Box<dyn BlockAccessFile>) -> (Self, FaultHandle) {
        let handle = FaultHandle::default();
        let wrapper = Self {
            inner,
            handle: handle.clone(),
        };
        (wrapper, handle)
    }
}

impl BlockAccessFile for BlockAccessFileWrapper {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.handle.check()?;
        self.inner.read(offset, buf)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.handle.check()?;
        self.inner.write(buf, offset)
    }

    fn sync(&mut self) -> Result<()> {
        self.handle.check()?;
        self.inner.sync()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
