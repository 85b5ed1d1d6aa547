//! A store: one data file of fixed-size pages plus its log, served through
//! the shared page pool.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use cellar_error::{CellarError, Result};
use cellar_pool::{PagePool, StoreState};
use cellar_types::{FetchMode, PageId, PageShift, StoreId, StoreOptions};

use crate::guard::PageGuard;
use crate::header::StoreHeader;
use crate::pool::PoolShared;
use crate::txn::Transaction;

/// Mutable store metadata kept in memory between header flushes.
///
/// Lock order: the store's `meta` mutex is always acquired before the pool
/// mutex.
pub(crate) struct StoreMeta {
    pub(crate) header: StoreHeader,
    /// True when the in-memory header differs from page 0 on disk.
    pub(crate) header_dirty: bool,
    /// Append position in the log file.
    pub(crate) log_offset: u64,
    /// Monotonic counter stamped on commit records.
    pub(crate) commit_seq: u64,
}

pub(crate) struct StoreInner {
    pub(crate) shared: Arc<PoolShared>,
    pub(crate) id: StoreId,
    path: PathBuf,
    pub(crate) meta: Mutex<StoreMeta>,
}

/// Handle to an open store. Cheap to clone; all clones share one store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open or create the store at `path`, registering it with the pool.
    pub(crate) fn open(
        shared: Arc<PoolShared>,
        path: &Path,
        options: StoreOptions,
    ) -> Result<Store> {
        let page_shift = shared.page_shift;
        let (data_file, data_size) = shared.vfs.open_block_access(
            path,
            page_shift,
            options.create_if_missing,
            options.error_if_exists,
        )?;
        let log_path = log_file_path(path);
        let (log_file, log_size) = shared.vfs.open_random_access(&log_path, true, false)?;

        let mut pool = shared.pool.lock();
        let id = pool.register_store(data_file, log_file);

        let header = if data_size == 0 {
            match Self::bootstrap(&mut pool, id, page_shift) {
                Ok(header) => {
                    debug!(store = id.get(), path = %path.display(), "bootstrapped new store");
                    header
                }
                Err(err) => {
                    let _ = pool.close_store(id);
                    return Err(err);
                }
            }
        } else {
            match Self::recover(&mut pool, id, page_shift) {
                Ok(header) => {
                    debug!(
                        store = id.get(),
                        path = %path.display(),
                        pages = header.page_count,
                        "recovered store"
                    );
                    header
                }
                Err(err) => {
                    let _ = pool.close_store(id);
                    return Err(err);
                }
            }
        };
        drop(pool);

        let inner = Arc::new(StoreInner {
            shared: Arc::clone(&shared),
            id,
            path: path.to_path_buf(),
            meta: Mutex::new(StoreMeta {
                header,
                header_dirty: false,
                log_offset: log_size,
                commit_seq: 0,
            }),
        });
        shared.stores.lock().push(Arc::downgrade(&inner));
        Ok(Store { inner })
    }

    /// Write the initial on-disk structures for a brand new store.
    fn bootstrap(
        pool: &mut PagePool,
        id: StoreId,
        page_shift: PageShift,
    ) -> Result<StoreHeader> {
        let header = StoreHeader::new(page_shift);
        write_header(pool, id, &header)?;
        pool.sync_store(id)?;
        Ok(header)
    }

    /// Read and validate the header of an existing store.
    fn recover(
        pool: &mut PagePool,
        id: StoreId,
        page_shift: PageShift,
    ) -> Result<StoreHeader> {
        let handle = pool.store_page(id, PageId::HEADER, FetchMode::FetchPageData)?;
        let header = StoreHeader::deserialize(pool.page_data(handle));
        pool.unpin_store_page(handle);
        let header = header?;

        if header.page_shift != page_shift {
            return Err(CellarError::InvalidConfig {
                what: "page_shift",
                value: format!(
                    "store uses {}, pool uses {}",
                    header.page_shift, page_shift
                ),
            });
        }
        Ok(header)
    }

    /// Filesystem path of the store's data file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of pages in the data file, header page included.
    pub fn page_count(&self) -> u64 {
        self.inner.meta.lock().header.page_count
    }

    /// True once the store has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.pool.lock().is_store_closed(self.inner.id)
    }

    /// Fetch a page and pin it for reading.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard> {
        let handle = self
            .inner
            .shared
            .pool
            .lock()
            .store_page(self.inner.id, page_id, FetchMode::FetchPageData)?;
        Ok(PageGuard::new(self.clone(), handle, page_id))
    }

    /// Pin a page without reading it; the caller promises to overwrite.
    ///
    /// The returned guard leases a dirty entry with unspecified contents.
    pub fn overwrite_page(&self, page_id: PageId) -> Result<PageGuard> {
        let handle = self
            .inner
            .shared
            .pool
            .lock()
            .store_page(self.inner.id, page_id, FetchMode::IgnorePageData)?;
        Ok(PageGuard::new(self.clone(), handle, page_id))
    }

    /// Begin a transaction on this store.
    pub fn begin(&self) -> Result<Transaction> {
        let mut meta = self.inner.meta.lock();
        {
            let mut pool = self.inner.shared.pool.lock();
            if pool.store_state(self.inner.id) != StoreState::Open {
                return Err(CellarError::AlreadyClosed);
            }
            // A failed commit can leave the in-memory header ahead of disk;
            // reconcile before snapshotting so rollback restores the
            // on-disk state.
            flush_header(&mut pool, self.inner.id, &mut meta)?;
        }
        Ok(Transaction::new(self.clone(), meta.header))
    }

    /// Flush the store's data file to persistent storage.
    pub fn sync(&self) -> Result<()> {
        self.inner.shared.pool.lock().sync_store(self.inner.id)
    }

    /// Close the store.
    ///
    /// Flushes the in-memory header if needed, then unassigns every pool
    /// entry the store still holds (writing dirty ones back) and closes the
    /// files. A second close reports [`CellarError::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    pub(crate) fn shared(&self) -> &PoolShared {
        &self.inner.shared
    }

    pub(crate) fn id(&self) -> StoreId {
        self.inner.id
    }

    pub(crate) fn lock_meta(&self) -> MutexGuard<'_, StoreMeta> {
        self.inner.meta.lock()
    }
}

impl StoreInner {
    pub(crate) fn close(&self) -> Result<()> {
        let mut meta = self.meta.lock();
        let mut pool = self.shared.pool.lock();

        // Flushing may itself fail and cascade into a close; prefer
        // reporting that error over the redundant AlreadyClosed.
        let flush_result = flush_header(&mut pool, self.id, &mut meta);
        match pool.close_store(self.id) {
            Ok(()) => flush_result,
            Err(close_err) => {
                if flush_result.is_err() {
                    flush_result
                } else {
                    Err(close_err)
                }
            }
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("path", &self.inner.path)
            .finish_non_exhaustive()
    }
}

/// Overwrite page 0 with `header` and push it to disk.
pub(crate) fn write_header(pool: &mut PagePool, id: StoreId, header: &StoreHeader) -> Result<()> {
    let handle = pool.store_page(id, PageId::HEADER, FetchMode::IgnorePageData)?;
    let data = pool.page_data_mut(handle);
    data.fill(0);
    header.serialize(data);
    pool.mark_dirty(handle, true);
    pool.unpin_and_write_store_page(handle)
}

/// Write the header out if the in-memory copy has diverged from disk.
pub(crate) fn flush_header(
    pool: &mut PagePool,
    id: StoreId,
    meta: &mut StoreMeta,
) -> Result<()> {
    if !meta.header_dirty {
        return Ok(());
    }
    write_header(pool, id, &meta.header)?;
    meta.header_dirty = false;
    Ok(())
}

/// The log file lives next to the data file, with `.log` appended.
pub(crate) fn log_file_path(store_path: &Path) -> PathBuf {
    let mut path = OsString::from(store_path.as_os_str());
    path.push(".log");
    PathBuf::from(path)
}
