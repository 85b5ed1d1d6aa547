//! The page pool: a bounded buffer cache between in-memory consumers and
//! the block-addressable files backing each store.
//!
//! The pool simultaneously enforces a bounded memory budget, LRU eviction,
//! pin counts that override eviction, write-back of dirty pages on eviction,
//! an identity map from `(store, page)` to the live entry caching it, and
//! the cascading behavior required when I/O fails or a store closes.
//!
//! All operations run to completion before the next begins; the pool is
//! single-threaded and callers serialize access (the `cellar-core` façade
//! wraps it in one mutex). Store file implementations must never call back
//! into the pool.

use std::collections::HashMap;

use tracing::{debug, trace, warn};

use cellar_error::{CellarError, Result};
use cellar_types::{FetchMode, PageId, PageShift, StoreId};
use cellar_vfs::{BlockAccessFile, RandomAccessFile};

use crate::list::{EntryHandle, EntryList, ListId, PoolLink};
use crate::page::{EntryArena, UNFETCHED_FILL};
use crate::store::{PoolStore, StoreState};

/// Manages buffers used as scratch pad and cache for store data pages.
pub struct PagePool {
    page_shift: PageShift,
    page_size: usize,
    page_capacity: usize,
    /// Every entry ever allocated; entries live as long as the pool.
    arena: EntryArena,
    /// Unassigned, unpinned entries, kept as a stack so the most recently
    /// freed slot is reused first.
    free_list: EntryList<PoolLink>,
    /// Assigned, unpinned entries ordered least to most recently unpinned.
    /// Eviction pops the front.
    lru_list: EntryList<PoolLink>,
    /// `(store, page) → entry` for every page currently cached.
    page_map: HashMap<(StoreId, PageId), EntryHandle>,
    /// Stores registered with this pool, indexed by [`StoreId`]. Slots are
    /// never reused; closed stores stay behind to fail fast.
    stores: Vec<PoolStore>,
}

impl PagePool {
    /// Set up a page pool. Entry memory is allocated on demand.
    pub fn new(page_shift: PageShift, page_capacity: usize) -> Self {
        assert!(page_capacity >= 1, "page_capacity must be at least 1");
        let page_size = page_shift.page_size();
        Self {
            page_shift,
            page_size,
            page_capacity,
            arena: EntryArena::new(page_size),
            free_list: EntryList::new(ListId::Free),
            lru_list: EntryList::new(ListId::Lru),
            page_map: HashMap::new(),
            stores: Vec::new(),
        }
    }

    /// The base-2 log of the pool's page size.
    pub fn page_shift(&self) -> PageShift {
        self.page_shift
    }

    /// Size of a page. Guaranteed to be a power of two.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maximum number of entries this pool may hold.
    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    /// Total number of entries allocated for this pool.
    pub fn allocated_pages(&self) -> usize {
        self.arena.len()
    }

    /// Number of allocated entries currently unused (on the free list).
    ///
    /// Entries become unused when a store closes or experiences I/O errors;
    /// they are kept so future demand is met without new allocations.
    pub fn unused_pages(&self) -> usize {
        self.free_list.len()
    }

    /// Number of assigned entries eligible for eviction (on the LRU list).
    pub fn lru_pages(&self) -> usize {
        self.lru_list.len()
    }

    /// Number of entries pinned by running consumers.
    ///
    /// Only unpinned entries can be evicted to meet demand for new pages;
    /// when every entry is pinned, allocation fails with
    /// [`CellarError::PoolFull`].
    pub fn pinned_pages(&self) -> usize {
        self.arena.len() - self.free_list.len() - self.lru_list.len()
    }

    // --- Store registry ---

    /// Register a store with this pool, handing over its file handles.
    ///
    /// The returned id keys the pool's identity map and is only meaningful
    /// within this pool.
    pub fn register_store(
        &mut self,
        data_file: Box<dyn BlockAccessFile>,
        log_file: Box<dyn RandomAccessFile>,
    ) -> StoreId {
        let id = StoreId::new(u32::try_from(self.stores.len()).expect("store table overflow"));
        self.stores
            .push(PoolStore::new(id, data_file, log_file, self.page_shift));
        debug!(store = id.get(), "registered store");
        id
    }

    /// The close-state of a registered store.
    pub fn store_state(&self, store_id: StoreId) -> StoreState {
        self.store_ref(store_id).state()
    }

    /// True once the store has fully closed.
    pub fn is_store_closed(&self, store_id: StoreId) -> bool {
        self.store_ref(store_id).state() == StoreState::Closed
    }

    /// Number of entries currently assigned to a store.
    pub fn assigned_pages(&self, store_id: StoreId) -> usize {
        self.store_ref(store_id).assigned_pages()
    }

    /// True if `(store, page)` is present in the identity map.
    pub fn contains_page(&self, store_id: StoreId, page_id: PageId) -> bool {
        self.page_map.contains_key(&(store_id, page_id))
    }

    /// Flush a store's data file to persistent storage.
    pub fn sync_store(&mut self, store_id: StoreId) -> Result<()> {
        let store = self.store_open_mut(store_id)?;
        store.sync()
    }

    /// The store's log file, for the transaction layer.
    pub fn store_log_mut(&mut self, store_id: StoreId) -> Result<&mut dyn RandomAccessFile> {
        let store = self.store_open_mut(store_id)?;
        Ok(store.log_file_mut())
    }

    // --- Entry access ---

    /// The page data cached by an entry.
    pub fn page_data(&self, handle: EntryHandle) -> &[u8] {
        self.arena.entry(handle).data()
    }

    /// The page data cached by an entry, writable.
    ///
    /// Mutating the buffer does not mark the entry dirty; callers pair this
    /// with [`mark_dirty`](Self::mark_dirty).
    pub fn page_data_mut(&mut self, handle: EntryHandle) -> &mut [u8] {
        self.arena.entry_mut(handle).data_mut()
    }

    /// Change an entry's dirtiness. The entry must be assigned.
    pub fn mark_dirty(&mut self, handle: EntryHandle, dirty: bool) {
        self.arena.entry_mut(handle).mark_dirty(dirty);
    }

    /// True if the entry's buffer differs from the on-disk page.
    pub fn is_dirty(&self, handle: EntryHandle) -> bool {
        self.arena.entry(handle).is_dirty()
    }

    /// The `(store, page)` identity of an entry, or `None` while unassigned.
    pub fn entry_owner(&self, handle: EntryHandle) -> Option<(StoreId, PageId)> {
        self.arena.entry(handle).owner()
    }

    // --- Page operations ---

    /// Fetch a page from a store and pin it.
    ///
    /// The caller owns a pin on the returned entry and must remove it with
    /// [`unpin_store_page`](Self::unpin_store_page) (or the write-back
    /// variant) after use.
    ///
    /// With [`FetchMode::IgnorePageData`] the returned entry is dirty and
    /// its contents are unspecified; the caller promises to overwrite them.
    pub fn store_page(
        &mut self,
        store_id: StoreId,
        page_id: PageId,
        fetch_mode: FetchMode,
    ) -> Result<EntryHandle> {
        if self.store_ref(store_id).state() != StoreState::Open {
            return Err(CellarError::AlreadyClosed);
        }

        if let Some(&handle) = self.page_map.get(&(store_id, page_id)) {
            debug_assert_eq!(
                self.arena.entry(handle).owner(),
                Some((store_id, page_id))
            );
            self.pin_store_page(handle);
            return Ok(handle);
        }

        let Some(handle) = self.alloc_page() else {
            trace!(
                store = store_id.get(),
                page = page_id.get(),
                "pool full fetching page"
            );
            return Err(CellarError::PoolFull);
        };

        self.assign_page_to_store(handle, store_id, page_id, fetch_mode)?;
        self.page_map.insert((store_id, page_id), handle);
        Ok(handle)
    }

    /// Release a pin obtained from [`store_page`](Self::store_page).
    ///
    /// When the last pin drops, the entry moves to the most-recently-used
    /// end of the LRU list; it stays in the identity map and a later
    /// `store_page` for the same `(store, page)` returns the same entry.
    /// The caller must not use the entry after releasing its pin, even
    /// though the buffer may remain readable for a while.
    pub fn unpin_store_page(&mut self, handle: EntryHandle) {
        let entry = self.arena.entry_mut(handle);
        debug_assert!(entry.owner().is_some());

        entry.unpin();
        if entry.is_unpinned() {
            self.lru_list.push_back(&mut self.arena, handle);
        }
    }

    /// Release a pin, writing the entry back first if it is dirty.
    ///
    /// Batching writes by leaving dirty pages in the LRU is usually better;
    /// this is for callers that need the page on disk now. A write failure
    /// closes the store (which unassigns this entry along with the rest) and
    /// is returned to the caller; the pin is released either way.
    pub fn unpin_and_write_store_page(&mut self, handle: EntryHandle) -> Result<()> {
        let entry = self.arena.entry(handle);
        debug_assert!(entry.owner().is_some());
        debug_assert!(!entry.is_unpinned());

        let mut result = Ok(());
        if entry.is_dirty() {
            let (store_id, page_id) = entry.owner().expect("asserted assigned above");
            match self.write_entry(handle) {
                Ok(()) => self.arena.entry_mut(handle).mark_dirty(false),
                Err(err) => {
                    warn!(
                        store = store_id.get(),
                        page = page_id.get(),
                        error = %err,
                        "write-back failed; closing store"
                    );
                    let _ = self.close_store(store_id);
                    result = Err(err);
                }
            }
        }

        // A failed write-back closed the store and unassigned this entry.
        if self.arena.entry(handle).owner().is_some() {
            self.unpin_store_page(handle);
        } else {
            self.unpin_unassigned_page(handle);
        }
        result
    }

    /// Add a pin to an entry that is caching a store page.
    ///
    /// Re-pinning an entry that was resting in the LRU list removes it from
    /// the list; the allocator must not grab a pinned entry.
    pub fn pin_store_page(&mut self, handle: EntryHandle) {
        let entry = self.arena.entry(handle);
        debug_assert!(entry.owner().is_some());

        if entry.is_unpinned() {
            debug_assert!(self.lru_list.contains(&self.arena, handle));
            self.lru_list.remove(&mut self.arena, handle);
        }
        self.arena.entry_mut(handle).pin();
    }

    /// Pin every entry assigned to a store.
    ///
    /// Afterwards the store's assigned list is stable as long as the store
    /// fetches no new pages.
    pub fn pin_store_pages(&mut self, store_id: StoreId) {
        let handles = self.store_ref(store_id).assigned_handles(&self.arena);
        for handle in handles {
            self.pin_store_page(handle);
        }
    }

    /// Allocate a pinned, unassigned entry.
    ///
    /// Source preference: the free list (a stack, so the most recently freed
    /// slot is reused first), then the LRU head (the least recently used
    /// assigned entry, evicted with write-back), then a fresh allocation
    /// while under capacity. Returns `None` when all entries are pinned and
    /// the pool is at capacity.
    pub fn alloc_page(&mut self) -> Option<EntryHandle> {
        if !self.free_list.is_empty() {
            let handle = self.free_list.pop_front(&mut self.arena)?;
            let entry = self.arena.entry_mut(handle);
            debug_assert!(entry.owner().is_none());
            debug_assert!(!entry.is_dirty());
            entry.pin();
            return Some(handle);
        }

        if !self.lru_list.is_empty() {
            let handle = self.lru_list.pop_front(&mut self.arena)?;
            let entry = self.arena.entry_mut(handle);
            debug_assert!(entry.owner().is_some());
            entry.pin();
            self.unassign_page_from_store(handle);
            return Some(handle);
        }

        if self.arena.len() < self.page_capacity {
            let handle = self.arena.alloc();
            trace!(allocated = self.arena.len(), "allocated pool entry");
            return Some(handle);
        }

        None
    }

    /// Release a pin on an unassigned entry.
    ///
    /// When the last pin drops, the entry is pushed on the free-list head.
    pub fn unpin_unassigned_page(&mut self, handle: EntryHandle) {
        let entry = self.arena.entry_mut(handle);
        debug_assert!(entry.owner().is_none());

        entry.unpin();
        if entry.is_unpinned() {
            self.free_list.push_front(&mut self.arena, handle);
        }
    }

    /// Assign a pinned, unassigned entry to cache `(store, page)`.
    ///
    /// On fetch failure the entry is rolled back to unassigned and returned
    /// to the free list, so the pool's invariants hold even under repeated
    /// partial failures; the error is propagated. On success the caller
    /// (normally [`store_page`](Self::store_page)) inserts the identity-map
    /// record.
    pub fn assign_page_to_store(
        &mut self,
        handle: EntryHandle,
        store_id: StoreId,
        page_id: PageId,
        fetch_mode: FetchMode,
    ) -> Result<()> {
        debug_assert!(!self.page_map.contains_key(&(store_id, page_id)));
        debug_assert_eq!(self.store_ref(store_id).state(), StoreState::Open);

        let Self { arena, stores, .. } = self;
        arena.entry_mut(handle).assign(store_id, page_id);
        stores[store_id.as_usize()].page_assigned(arena, handle);

        match self.fetch_store_page(handle, fetch_mode) {
            Ok(()) => Ok(()),
            Err(err) => {
                let Self { arena, stores, .. } = self;
                stores[store_id.as_usize()].page_unassigned(arena, handle);
                arena.entry_mut(handle).unassign();
                self.unpin_unassigned_page(handle);
                Err(err)
            }
        }
    }

    /// Free up an entry that is currently caching a store page.
    ///
    /// Dirty entries are written back first; the dirty flag clears whether
    /// or not the write succeeds, because a failed write is surfaced by
    /// closing the store rather than by leaving the entry half-unassigned.
    /// The identity-map record, if any, is removed. The entry stays pinned
    /// by the caller.
    pub fn unassign_page_from_store(&mut self, handle: EntryHandle) {
        let entry = self.arena.entry(handle);
        debug_assert!(!entry.is_unpinned());
        let (store_id, page_id) = entry.owner().expect("entry is assigned");

        self.page_map.remove(&(store_id, page_id));

        let write_status = if entry.is_dirty() {
            let status = self.write_entry(handle);
            self.arena.entry_mut(handle).mark_dirty(false);
            status
        } else {
            Ok(())
        };

        let Self { arena, stores, .. } = self;
        stores[store_id.as_usize()].page_unassigned(arena, handle);
        arena.entry_mut(handle).unassign();

        if let Err(err) = write_status {
            warn!(
                store = store_id.get(),
                page = page_id.get(),
                error = %err,
                "write-back failed during unassign; closing store"
            );
            let _ = self.close_store(store_id);
        }
    }

    /// Populate an assigned entry according to `fetch_mode`.
    ///
    /// `FetchPageData` reads through the store; `IgnorePageData` marks the
    /// entry dirty instead, and in debug builds fills the buffer with a
    /// recognizable pattern so uses of unwritten data stand out.
    pub fn fetch_store_page(&mut self, handle: EntryHandle, fetch_mode: FetchMode) -> Result<()> {
        let (store_id, page_id) = self
            .arena
            .entry(handle)
            .owner()
            .expect("entry is assigned");

        match fetch_mode {
            FetchMode::FetchPageData => {
                let Self { arena, stores, .. } = self;
                let entry = arena.entry_mut(handle);
                debug_assert!(!entry.is_dirty());
                stores[store_id.as_usize()].read_page(page_id, entry.data_mut())
            }
            FetchMode::IgnorePageData => {
                let entry = self.arena.entry_mut(handle);
                entry.mark_dirty(true);
                if cfg!(debug_assertions) {
                    entry.data_mut().fill(UNFETCHED_FILL);
                }
                Ok(())
            }
        }
    }

    /// Close a store: `Open → Closing → Closed`.
    ///
    /// Walks the store's assigned list unassigning every entry, writing
    /// dirty ones back best-effort (write failures during close are ignored;
    /// the store is terminating anyway), then closes the store's files.
    /// Subsequent operations against the store fail with
    /// [`CellarError::AlreadyClosed`], as does a second `close_store`.
    pub fn close_store(&mut self, store_id: StoreId) -> Result<()> {
        let store = self.store_mut(store_id);
        if store.state() != StoreState::Open {
            return Err(CellarError::AlreadyClosed);
        }
        store.set_state(StoreState::Closing);
        debug!(store = store_id.get(), "closing store");

        while let Some(handle) = self.store_ref(store_id).first_assigned() {
            let entry = self.arena.entry(handle);
            if entry.is_unpinned() {
                self.lru_list.remove(&mut self.arena, handle);
            }
            self.arena.entry_mut(handle).pin();
            // Write failures inside cascade to close_store, which now
            // reports AlreadyClosed and is ignored.
            self.unassign_page_from_store(handle);
            self.unpin_unassigned_page(handle);
        }

        let store = self.store_mut(store_id);
        store.set_state(StoreState::Closed);
        if let Err(err) = store.close_files() {
            warn!(store = store_id.get(), error = %err, "error closing store files");
        }
        Ok(())
    }

    // --- Internal helpers ---

    /// Write an entry's buffer back through its store.
    fn write_entry(&mut self, handle: EntryHandle) -> Result<()> {
        let Self { arena, stores, .. } = self;
        let entry = arena.entry(handle);
        let (store_id, page_id) = entry.owner().expect("entry is assigned");
        stores[store_id.as_usize()].write_page(page_id, entry.data())
    }

    fn store_ref(&self, store_id: StoreId) -> &PoolStore {
        &self.stores[store_id.as_usize()]
    }

    fn store_mut(&mut self, store_id: StoreId) -> &mut PoolStore {
        &mut self.stores[store_id.as_usize()]
    }

    fn store_open_mut(&mut self, store_id: StoreId) -> Result<&mut PoolStore> {
        let store = &mut self.stores[store_id.as_usize()];
        if store.state() == StoreState::Open {
            Ok(store)
        } else {
            Err(CellarError::AlreadyClosed)
        }
    }
}

impl Drop for PagePool {
    fn drop(&mut self) {
        // Destroying the pool with pins outstanding means some consumer
        // still holds a lease. Tolerated while unwinding from a panic so the
        // original failure is the one reported.
        if !std::thread::panicking() {
            debug_assert_eq!(self.pinned_pages(), 0, "page pool dropped with pinned entries");
        }
    }
}

impl std::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePool")
            .field("page_size", &self.page_size)
            .field("page_capacity", &self.page_capacity)
            .field("allocated", &self.arena.len())
            .field("unused", &self.free_list.len())
            .field("lru", &self.lru_list.len())
            .field("stores", &self.stores.len())
            .finish()
    }
}
