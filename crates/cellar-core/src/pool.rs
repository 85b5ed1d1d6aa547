//! The resource pool: the top-level object embedders create.
//!
//! A `Pool` owns one page pool, the VFS used to open files, and the set of
//! stores opened through it. Dropping the pool closes every store that is
//! still open, in the spirit of a clean process shutdown.

use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use cellar_error::{CellarError, Result};
use cellar_pool::PagePool;
use cellar_types::{PageShift, PoolOptions, StoreOptions};
use cellar_vfs::Vfs;

use crate::store::{Store, StoreInner};

/// State shared between the pool facade, its stores, and page guards.
pub(crate) struct PoolShared {
    /// The page pool. All operations lock this mutex for their full
    /// duration; no sub-operation is long enough to merit finer locking.
    pub(crate) pool: Mutex<PagePool>,
    pub(crate) vfs: Arc<dyn Vfs>,
    pub(crate) page_shift: PageShift,
    /// Stores opened through this pool, for close-all on shutdown.
    pub(crate) stores: Mutex<Vec<Weak<StoreInner>>>,
}

/// A resource pool: page cache plus the stores sharing it.
pub struct Pool {
    shared: Arc<PoolShared>,
}

/// Point-in-time page pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Entries allocated so far (never exceeds the configured capacity).
    pub allocated_pages: usize,
    /// Allocated entries currently on the free list.
    pub unused_pages: usize,
    /// Entries pinned by stores, guards, and transactions.
    pub pinned_pages: usize,
}

impl Pool {
    /// Create a pool using the platform default VFS.
    pub fn new(options: PoolOptions) -> Result<Self> {
        Self::with_vfs(options, cellar_vfs::default_vfs())
    }

    /// Create a pool over an explicit VFS.
    pub fn with_vfs(options: PoolOptions, vfs: Arc<dyn Vfs>) -> Result<Self> {
        if options.page_pool_size == 0 {
            return Err(CellarError::InvalidConfig {
                what: "page_pool_size",
                value: "0".to_owned(),
            });
        }
        debug!(
            page_shift = options.page_shift.get(),
            page_pool_size = options.page_pool_size,
            vfs = vfs.name(),
            "created resource pool"
        );
        Ok(Self {
            shared: Arc::new(PoolShared {
                pool: Mutex::new(PagePool::new(options.page_shift, options.page_pool_size)),
                vfs,
                page_shift: options.page_shift,
                stores: Mutex::new(Vec::new()),
            }),
        })
    }

    /// The page size shared by every store in this pool.
    pub fn page_size(&self) -> usize {
        self.shared.page_shift.page_size()
    }

    /// The base-2 log of the page size.
    pub fn page_shift(&self) -> PageShift {
        self.shared.page_shift
    }

    /// Maximum number of pages the page pool will cache.
    pub fn page_pool_size(&self) -> usize {
        self.shared.pool.lock().page_capacity()
    }

    /// Current page pool counters.
    pub fn stats(&self) -> PoolStats {
        let pool = self.shared.pool.lock();
        PoolStats {
            allocated_pages: pool.allocated_pages(),
            unused_pages: pool.unused_pages(),
            pinned_pages: pool.pinned_pages(),
        }
    }

    /// Open (or create, per `options`) the store at `path`.
    ///
    /// The store's log file is opened alongside the data file, with `.log`
    /// appended to the path.
    pub fn open_store(&self, path: &Path, options: StoreOptions) -> Result<Store> {
        Store::open(Arc::clone(&self.shared), path, options)
    }

    /// Close every store still open in this pool.
    ///
    /// Errors from individual stores are reported after all of them have
    /// been closed; the first one wins.
    pub fn close(&self) -> Result<()> {
        let stores: Vec<_> = self.shared.stores.lock().drain(..).collect();
        let mut first_err = None;
        for weak in stores {
            let Some(store) = weak.upgrade() else {
                continue;
            };
            match store.close() {
                // Already closed by hand or by an error cascade.
                Ok(()) | Err(CellarError::AlreadyClosed) => {}
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("page_size", &self.page_size())
            .field("stats", &stats)
            .finish_non_exhaustive()
    }
}
