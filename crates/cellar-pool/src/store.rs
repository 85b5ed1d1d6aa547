//! The pool-side record for one registered store.
//!
//! The pool resolves a [`StoreId`] to a [`PoolStore`], which owns the
//! store's file handles and the list of pool entries currently assigned to
//! it. Entries themselves carry only the `(StoreId, PageId)` identity, which
//! keeps the entry, store, and pool modules free of reference cycles.

use cellar_error::Result;
use cellar_types::{PageId, PageShift, StoreId};
use cellar_vfs::{BlockAccessFile, RandomAccessFile};

use crate::list::{EntryHandle, EntryList, ListId, StoreLink};
use crate::page::EntryArena;

/// Close-state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// The store accepts page operations.
    Open,
    /// The store is flushing its assigned entries; operations fail fast.
    Closing,
    /// The store's files are closed.
    Closed,
}

/// Per-store view the pool operates through.
pub(crate) struct PoolStore {
    data_file: Box<dyn BlockAccessFile>,
    log_file: Box<dyn RandomAccessFile>,
    page_shift: PageShift,
    /// Pool entries assigned to this store, so they can be unassigned when
    /// the store closes.
    pages: EntryList<StoreLink>,
    state: StoreState,
}

impl PoolStore {
    pub(crate) fn new(
        id: StoreId,
        data_file: Box<dyn BlockAccessFile>,
        log_file: Box<dyn RandomAccessFile>,
        page_shift: PageShift,
    ) -> Self {
        Self {
            data_file,
            log_file,
            page_shift,
            pages: EntryList::new(ListId::Store(id)),
            state: StoreState::Open,
        }
    }

    pub(crate) fn state(&self) -> StoreState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: StoreState) {
        self.state = state;
    }

    /// Read page `page_id` into `buf`.
    ///
    /// `buf` must be exactly one page; the entry buffer always is.
    pub(crate) fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_shift.page_size());
        self.data_file.read(page_id.file_offset(self.page_shift), buf)
    }

    /// Write `buf` as page `page_id`.
    pub(crate) fn write_page(&mut self, page_id: PageId, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.page_shift.page_size());
        self.data_file.write(buf, page_id.file_offset(self.page_shift))
    }

    /// Flush the data file to persistent storage.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.data_file.sync()
    }

    /// Close both file handles. Used once, at the end of the close walk.
    pub(crate) fn close_files(&mut self) -> Result<()> {
        self.data_file.close()?;
        self.log_file.close()?;
        Ok(())
    }

    pub(crate) fn log_file_mut(&mut self) -> &mut dyn RandomAccessFile {
        &mut *self.log_file
    }

    /// Attach an entry to this store's assigned list.
    ///
    /// Called by the pool immediately after the entry's `assign`.
    pub(crate) fn page_assigned(&mut self, arena: &mut EntryArena, handle: EntryHandle) {
        self.pages.push_back(arena, handle);
    }

    /// Detach an entry from this store's assigned list.
    ///
    /// Calls must pair with [`page_assigned`](Self::page_assigned); the pool
    /// invokes this immediately before the entry's `unassign`.
    pub(crate) fn page_unassigned(&mut self, arena: &mut EntryArena, handle: EntryHandle) {
        self.pages.remove(arena, handle);
    }

    /// The entry at the front of the assigned list, if any.
    pub(crate) fn first_assigned(&self) -> Option<EntryHandle> {
        self.pages.front()
    }

    /// Number of entries currently assigned to this store.
    pub(crate) fn assigned_pages(&self) -> usize {
        self.pages.len()
    }

    /// Handles of every assigned entry, front to back.
    pub(crate) fn assigned_handles(&self, arena: &EntryArena) -> Vec<EntryHandle> {
        self.pages.iter(arena).collect()
    }
}

impl std::fmt::Debug for PoolStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolStore")
            .field("state", &self.state)
            .field("assigned_pages", &self.pages.len())
            .field("page_shift", &self.page_shift)
            .finish_non_exhaustive()
    }
}
