//! Pinned-page leases handed out by [`Store`](crate::Store).

use cellar_error::Result;
use cellar_pool::EntryHandle;
use cellar_types::PageId;

use crate::store::Store;

/// A lease on a pinned page pool entry.
///
/// While the guard lives, the entry cannot be evicted. Guards must be
/// released explicitly with [`unpin`](Self::unpin) or
/// [`unpin_and_write`](Self::unpin_and_write); dropping an unreleased guard
/// is a pin leak and traps in debug builds (release builds fall back to a
/// best-effort unpin).
pub struct PageGuard {
    store: Store,
    handle: EntryHandle,
    page_id: PageId,
    released: bool,
}

impl PageGuard {
    pub(crate) fn new(store: Store, handle: EntryHandle, page_id: PageId) -> Self {
        Self {
            store,
            handle,
            page_id,
            released: false,
        }
    }

    /// The store page this guard leases.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Read the page contents.
    ///
    /// The closure runs with the pool borrowed, so it must not call back
    /// into the store or pool.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let pool = self.store.shared().pool.lock();
        f(pool.page_data(self.handle))
    }

    /// Mutate the page contents and mark the entry dirty.
    ///
    /// The closure runs with the pool borrowed, so it must not call back
    /// into the store or pool.
    pub fn with_data_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut pool = self.store.shared().pool.lock();
        let result = f(pool.page_data_mut(self.handle));
        pool.mark_dirty(self.handle, true);
        result
    }

    /// Change the entry's dirtiness without touching the contents.
    pub fn mark_dirty(&mut self, dirty: bool) {
        self.store.shared().pool.lock().mark_dirty(self.handle, dirty);
    }

    /// True if the leased entry is dirty.
    pub fn is_dirty(&self) -> bool {
        self.store.shared().pool.lock().is_dirty(self.handle)
    }

    /// Release the lease; a dirty page stays cached for later write-back.
    pub fn unpin(mut self) {
        let _ = self.release(false);
    }

    /// Release the lease, writing the page back first if it is dirty.
    pub fn unpin_and_write(mut self) -> Result<()> {
        self.release(true)
    }

    fn release(&mut self, write: bool) -> Result<()> {
        self.released = true;
        let mut pool = self.store.shared().pool.lock();
        // The entry can lose its assignment underneath the guard when the
        // store closes (e.g. a write-back failure cascaded).
        if pool.entry_owner(self.handle).is_some() {
            if write {
                pool.unpin_and_write_store_page(self.handle)
            } else {
                pool.unpin_store_page(self.handle);
                Ok(())
            }
        } else {
            pool.unpin_unassigned_page(self.handle);
            Ok(())
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if !self.released {
            debug_assert!(
                std::thread::panicking(),
                "page guard for page {} dropped without an explicit unpin",
                self.page_id
            );
            let _ = self.release(false);
        }
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}
