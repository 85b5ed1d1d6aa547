//! Page pool entries: a page-sized buffer plus its control block.
//!
//! Although most of the system only cares about the store page cached in the
//! buffer, each buffer travels with a control block — identity, pin count,
//! dirty flag, and the two embedded list nodes. Entries belong to the same
//! [`EntryArena`] for their entire lifetime, and their buffers never change
//! address once allocated.

use cellar_types::{PageId, StoreId};

use crate::list::{EntryHandle, ListNode};

/// Byte written over an entry's buffer when page data is deliberately not
/// fetched, so reads of unwritten data stand out in a debugger. Debug builds
/// only.
pub(crate) const UNFETCHED_FILL: u8 = 0xCD;

/// A page-sized, page-aligned heap buffer.
///
/// Alignment comes from over-allocating a `Vec<u8>` and carving out the
/// first aligned sub-range, so no `unsafe` is involved. The backing
/// allocation is stable: moving the `PageBuf` value moves only the handle,
/// never the bytes.
#[derive(Debug)]
pub(crate) struct PageBuf {
    backing: Vec<u8>,
    offset: usize,
    len: usize,
}

impl PageBuf {
    /// Allocate a zero-filled buffer of `page_size` bytes aligned to
    /// `page_size`.
    pub(crate) fn new(page_size: usize) -> Self {
        debug_assert!(page_size.is_power_of_two());

        // Over-allocate by page_size - 1 bytes so an aligned sub-range of
        // page_size bytes always exists.
        let backing = vec![0u8; page_size + page_size - 1];
        let misalignment = backing.as_ptr() as usize & (page_size - 1);
        let offset = if misalignment == 0 {
            0
        } else {
            page_size - misalignment
        };
        debug_assert_eq!((backing.as_ptr() as usize + offset) & (page_size - 1), 0);

        Self {
            backing,
            offset,
            len: page_size,
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.backing[self.offset..self.offset + self.len]
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.backing[self.offset..self.offset + self.len]
    }
}

/// Control block for one page pool entry.
///
/// The entry does not notify its store when it is assigned or unassigned;
/// the pool must immediately invoke the store-side hook after calling
/// [`assign`](Self::assign) or [`unassign`](Self::unassign). Keeping the
/// notification out of the entry avoids a dependency cycle between the entry
/// and store modules, and is part of the contract between pool and entry.
#[derive(Debug)]
pub(crate) struct PageEntry {
    buf: PageBuf,
    pool_node: ListNode,
    store_node: ListNode,
    /// `None` while the entry is unassigned.
    owner: Option<(StoreId, PageId)>,
    /// Works like a reference count; the entry is evictable only at zero.
    pin_count: usize,
    dirty: bool,
}

impl PageEntry {
    /// Create an entry with one pin on it, owned by the caller.
    fn new(page_size: usize) -> Self {
        Self {
            buf: PageBuf::new(page_size),
            pool_node: ListNode::new(),
            store_node: ListNode::new(),
            owner: None,
            pin_count: 1,
            dirty: false,
        }
    }

    /// The `(store, page)` identity, or `None` while unassigned.
    pub(crate) fn owner(&self) -> Option<(StoreId, PageId)> {
        self.owner
    }

    /// True if the entry's contents can be replaced.
    pub(crate) fn is_unpinned(&self) -> bool {
        self.pin_count == 0
    }

    /// True if the buffer was modified since the page was read or written.
    pub(crate) fn is_dirty(&self) -> bool {
        debug_assert!(!self.dirty || self.owner.is_some());
        self.dirty
    }

    /// Increment the pin count.
    pub(crate) fn pin(&mut self) {
        debug_assert_ne!(self.pin_count, usize::MAX, "pin count leak");
        self.pin_count += 1;
    }

    /// Decrement the pin count.
    pub(crate) fn unpin(&mut self) {
        debug_assert_ne!(self.pin_count, 0);
        self.pin_count -= 1;
    }

    /// Record that this entry now caches `page_id` of `store`.
    ///
    /// The entry must be pinned and out of every list, so the allocator
    /// cannot grab it while the page data is being loaded. The caller must
    /// immediately notify the store's `page_assigned` hook.
    pub(crate) fn assign(&mut self, store: StoreId, page_id: PageId) {
        debug_assert!(self.owner.is_none());
        debug_assert!(self.pool_node.owner().is_none());
        debug_assert!(self.store_node.owner().is_none());
        debug_assert_ne!(self.pin_count, 0);
        debug_assert!(!self.dirty);

        self.owner = Some((store, page_id));
    }

    /// Record that this entry no longer caches a store page.
    ///
    /// The entry must be pinned (it was caching a page until now) and must
    /// already be off the store's assigned list; the pool notifies the
    /// store's `page_unassigned` hook before calling this.
    pub(crate) fn unassign(&mut self) {
        debug_assert_ne!(self.pin_count, 0);
        debug_assert!(self.owner.is_some());
        debug_assert!(self.pool_node.owner().is_none());
        debug_assert!(self.store_node.owner().is_none());

        self.owner = None;
        self.dirty = false;
    }

    /// Change the entry's dirtiness. The entry must be assigned.
    pub(crate) fn mark_dirty(&mut self, dirty: bool) {
        debug_assert!(self.owner.is_some());
        self.dirty = dirty;
    }

    /// The cached page data.
    ///
    /// Well-defined regardless of assignment; only meaningful while the
    /// entry is assigned and populated.
    pub(crate) fn data(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// The cached page data, writable.
    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    pub(crate) fn pool_node(&self) -> &ListNode {
        &self.pool_node
    }

    pub(crate) fn pool_node_mut(&mut self) -> &mut ListNode {
        &mut self.pool_node
    }

    pub(crate) fn store_node(&self) -> &ListNode {
        &self.store_node
    }

    pub(crate) fn store_node_mut(&mut self) -> &mut ListNode {
        &mut self.store_node
    }
}

/// Owns every entry of one page pool.
///
/// Entries are created on demand and live until the arena is dropped, so
/// handles are never invalidated.
#[derive(Debug)]
pub(crate) struct EntryArena {
    page_size: usize,
    slots: Vec<PageEntry>,
}

impl EntryArena {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            page_size,
            slots: Vec::new(),
        }
    }

    /// Number of entries ever allocated.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Allocate a fresh entry. The entry starts with one pin, owned by the
    /// caller.
    pub(crate) fn alloc(&mut self) -> EntryHandle {
        let handle = EntryHandle::from_index(self.slots.len());
        self.slots.push(PageEntry::new(self.page_size));
        handle
    }

    pub(crate) fn entry(&self, handle: EntryHandle) -> &PageEntry {
        &self.slots[handle.index()]
    }

    pub(crate) fn entry_mut(&mut self, handle: EntryHandle) -> &mut PageEntry {
        &mut self.slots[handle.index()]
    }
}
