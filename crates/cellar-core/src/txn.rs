//! Transactions: the pin-holding page-edit scope of a store.
//!
//! A transaction pins every page it writes until it resolves. Commit writes
//! the pages back, applies queued page frees, flushes the header, syncs the
//! data file, and appends a commit record to the store's log. Rollback
//! purges the written pages from the cache (so later reads refetch from
//! disk) and restores the header snapshot taken at begin.
//!
//! Transactions provide no isolation from each other; callers coordinate
//! access the same way they serialize pool operations.

use tracing::{debug, trace};

use cellar_error::{CellarError, Result};
use cellar_pool::EntryHandle;
use cellar_types::{FetchMode, PageId};

use crate::freelist;
use crate::header::StoreHeader;
use crate::store::{flush_header, Store};

/// Magic prefix of a log commit record.
const COMMIT_MAGIC: &[u8; 8] = b"CLCOMMIT";

/// Size of a log commit record: magic plus commit sequence number.
const COMMIT_RECORD_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

/// An in-flight unit of work against one store.
///
/// Obtained from [`Store::begin`]. Must resolve through
/// [`commit`](Self::commit) or [`rollback`](Self::rollback); a transaction
/// dropped while active rolls back.
pub struct Transaction {
    store: Store,
    state: TxnState,
    /// The header as of `begin`, restored on rollback.
    snapshot: StoreHeader,
    /// Pages written by this transaction, pinned until it resolves.
    write_set: Vec<(PageId, EntryHandle)>,
    /// Pages allocated by this transaction; they read as zeros until
    /// written.
    allocated: Vec<PageId>,
    /// Page frees queued until commit.
    freed: Vec<PageId>,
}

impl Transaction {
    pub(crate) fn new(store: Store, snapshot: StoreHeader) -> Self {
        Self {
            store,
            state: TxnState::Active,
            snapshot,
            write_set: Vec::new(),
            allocated: Vec::new(),
            freed: Vec::new(),
        }
    }

    /// True until the transaction commits or rolls back.
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CellarError::TransactionClosed)
        }
    }

    /// Allocate a data page, reusing the store's free-page chain before
    /// growing the file.
    ///
    /// The allocation becomes permanent on commit; rollback returns it.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        self.ensure_active()?;
        let mut meta = self.store.lock_meta();
        let mut pool = self.store.shared().pool.lock();

        let page_id = freelist::allocate_page_id(&mut pool, &mut meta.header, self.store.id())?;
        meta.header_dirty = true;
        self.allocated.push(page_id);
        trace!(store = self.store.id().get(), page = page_id.get(), "allocated page");
        Ok(page_id)
    }

    /// Queue a page to be freed when this transaction commits.
    ///
    /// If the transaction rolls back, the page is not freed.
    pub fn free_page(&mut self, page_id: PageId) -> Result<()> {
        self.ensure_active()?;
        let meta = self.store.lock_meta();
        if page_id.get() == 0 || page_id.get() >= meta.header.page_count {
            return Err(CellarError::internal(format!(
                "cannot free page {page_id} of a {}-page store",
                meta.header.page_count
            )));
        }
        drop(meta);
        self.freed.push(page_id);
        Ok(())
    }

    /// Read a page through the transaction.
    ///
    /// Pages this transaction has written are read from their pinned
    /// entries; anything else is fetched and released immediately. The
    /// closure must not call back into the store or pool.
    pub fn read_page<R>(&mut self, page_id: PageId, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.ensure_active()?;
        let mut pool = self.store.shared().pool.lock();

        if let Some(&(_, handle)) = self.write_set.iter().find(|(id, _)| *id == page_id) {
            return Ok(f(pool.page_data(handle)));
        }

        let handle = pool.store_page(self.store.id(), page_id, FetchMode::FetchPageData)?;
        let result = f(pool.page_data(handle));
        pool.unpin_store_page(handle);
        Ok(result)
    }

    /// Mutate a page, pinning it for the rest of the transaction.
    ///
    /// Pages allocated by this transaction start zeroed; everything else is
    /// read from the store before the closure runs. The closure must not
    /// call back into the store or pool.
    pub fn write_page<R>(
        &mut self,
        page_id: PageId,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        self.ensure_active()?;
        let mut pool = self.store.shared().pool.lock();

        let handle = if let Some(&(_, handle)) =
            self.write_set.iter().find(|(id, _)| *id == page_id)
        {
            handle
        } else {
            let fresh = self.allocated.contains(&page_id);
            let mode = if fresh {
                FetchMode::IgnorePageData
            } else {
                FetchMode::FetchPageData
            };
            let handle = pool.store_page(self.store.id(), page_id, mode)?;
            if fresh {
                pool.page_data_mut(handle).fill(0);
            }
            self.write_set.push((page_id, handle));
            handle
        };

        let result = f(pool.page_data_mut(handle));
        pool.mark_dirty(handle, true);
        Ok(result)
    }

    /// Make the transaction's effects durable.
    ///
    /// Writes every page in the write set back to the store, applies queued
    /// frees, flushes the header, syncs the data file, then appends a
    /// commit record to the log. An I/O failure leaves the store closed and
    /// is returned; a failed commit cannot be retried, and the on-disk
    /// header is never updated by one.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TxnState::Committed;

        let store = self.store.clone();
        let mut meta = store.lock_meta();
        let mut pool = store.shared().pool.lock();

        let mut first_err: Option<CellarError> = None;
        for (_, handle) in self.write_set.drain(..) {
            let result = if pool.entry_owner(handle).is_some() {
                pool.unpin_and_write_store_page(handle)
            } else {
                // The store closed underneath us; the pin still needs
                // releasing.
                pool.unpin_unassigned_page(handle);
                Ok(())
            };
            if let Err(err) = result {
                first_err.get_or_insert(err);
            }
        }
        if let Some(err) = first_err {
            meta.header = self.snapshot;
            meta.header_dirty = false;
            return Err(err);
        }

        for page_id in self.freed.drain(..) {
            freelist::release_page_id(&mut pool, &mut meta.header, store.id(), page_id)?;
            meta.header_dirty = true;
        }

        flush_header(&mut pool, store.id(), &mut meta)?;
        pool.sync_store(store.id())?;

        meta.commit_seq += 1;
        let mut record = [0u8; COMMIT_RECORD_SIZE];
        record[..8].copy_from_slice(COMMIT_MAGIC);
        record[8..].copy_from_slice(&meta.commit_seq.to_le_bytes());
        let offset = meta.log_offset;
        let log = pool.store_log_mut(store.id())?;
        log.write(&record, offset)?;
        log.flush()?;
        meta.log_offset += COMMIT_RECORD_SIZE as u64;

        debug!(
            store = store.id().get(),
            commit_seq = meta.commit_seq,
            "committed transaction"
        );
        Ok(())
    }

    /// Discard the transaction's effects.
    ///
    /// Written pages are purged from the cache so later reads refetch the
    /// on-disk bytes, allocations are returned, and queued frees are
    /// dropped.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.abort_inner();
        Ok(())
    }

    fn abort_inner(&mut self) {
        self.state = TxnState::Aborted;

        let store = self.store.clone();
        let mut meta = store.lock_meta();
        let mut pool = store.shared().pool.lock();

        for (_, handle) in self.write_set.drain(..) {
            if pool.entry_owner(handle).is_some() {
                // Nothing was written; dropping the assignment discards the
                // buffered modifications.
                pool.mark_dirty(handle, false);
                pool.unassign_page_from_store(handle);
            }
            pool.unpin_unassigned_page(handle);
        }

        meta.header = self.snapshot;
        meta.header_dirty = false;
        self.allocated.clear();
        self.freed.clear();
        debug!(store = store.id().get(), "rolled back transaction");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            self.abort_inner();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state)
            .field("written_pages", &self.write_set.len())
            .field("allocated_pages", &self.allocated.len())
            .field("freed_pages", &self.freed.len())
            .finish_non_exhaustive()
    }
}
