//! Free-page tracking for a store's data file.
//!
//! Pages that become empty cannot be returned to the filesystem, because a
//! store's data file is a contiguous run of pages. Instead their ids go on a
//! LIFO chain threaded through the free pages themselves: the header records
//! the head page id, and the first eight bytes of each free page hold the id
//! of the next one (0 terminates the chain, since page 0 always holds the
//! header).
//!
//! Allocation prefers the chain and grows the file only when it is empty.

use cellar_error::Result;
use cellar_pool::PagePool;
use cellar_types::{FetchMode, PageId, StoreId};

use crate::header::StoreHeader;

/// Allocate a page id, reusing the free chain before growing the file.
///
/// Only the in-memory header changes; the caller owns flushing it. The
/// returned id is never 0.
pub(crate) fn allocate_page_id(
    pool: &mut PagePool,
    header: &mut StoreHeader,
    store: StoreId,
) -> Result<PageId> {
    if header.free_list_head != 0 {
        let head = PageId::new(header.free_list_head);
        let handle = pool.store_page(store, head, FetchMode::FetchPageData)?;
        let next = u64::from_le_bytes(pool.page_data(handle)[..8].try_into().expect("8 bytes"));
        pool.unpin_store_page(handle);

        header.free_list_head = next;
        return Ok(head);
    }

    let id = header.page_count;
    header.page_count += 1;
    Ok(PageId::new(id))
}

/// Push a page id onto the free chain.
///
/// The page's previous contents are abandoned; its first eight bytes now
/// link to the rest of the chain. The link is written through to the data
/// file immediately, while the in-memory header update is the caller's to
/// flush.
pub(crate) fn release_page_id(
    pool: &mut PagePool,
    header: &mut StoreHeader,
    store: StoreId,
    page_id: PageId,
) -> Result<()> {
    debug_assert_ne!(page_id.get(), 0, "the header page cannot be freed");
    debug_assert!(page_id.get() < header.page_count);

    let handle = pool.store_page(store, page_id, FetchMode::IgnorePageData)?;
    let data = pool.page_data_mut(handle);
    data[..8].copy_from_slice(&header.free_list_head.to_le_bytes());
    pool.mark_dirty(handle, true);
    pool.unpin_and_write_store_page(handle)?;

    header.free_list_head = page_id.get();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_types::PageShift;
    use cellar_vfs::{MemoryVfs, Vfs};
    use std::path::Path;

    fn pool_with_store() -> (PagePool, StoreId) {
        let vfs = MemoryVfs::new();
        let mut pool = PagePool::new(PageShift::DEFAULT, 4);
        let (data, _) = vfs
            .open_block_access(Path::new("freelist.cellar"), PageShift::DEFAULT, true, false)
            .unwrap();
        let (log, _) = vfs
            .open_random_access(Path::new("freelist.cellar.log"), true, false)
            .unwrap();
        let store = pool.register_store(data, log);
        (pool, store)
    }

    #[test]
    fn grows_when_chain_is_empty() {
        let (mut pool, store) = pool_with_store();
        let mut header = StoreHeader::new(PageShift::DEFAULT);

        assert_eq!(allocate_page_id(&mut pool, &mut header, store).unwrap(), PageId::new(1));
        assert_eq!(allocate_page_id(&mut pool, &mut header, store).unwrap(), PageId::new(2));
        assert_eq!(header.page_count, 3);
        assert_eq!(header.free_list_head, 0);

        pool.close_store(store).unwrap();
    }

    #[test]
    fn freed_pages_are_reused_lifo() {
        let (mut pool, store) = pool_with_store();
        let mut header = StoreHeader::new(PageShift::DEFAULT);

        let a = allocate_page_id(&mut pool, &mut header, store).unwrap();
        let b = allocate_page_id(&mut pool, &mut header, store).unwrap();
        let c = allocate_page_id(&mut pool, &mut header, store).unwrap();

        release_page_id(&mut pool, &mut header, store, a).unwrap();
        release_page_id(&mut pool, &mut header, store, c).unwrap();
        assert_eq!(header.free_list_head, c.get());

        // Most recently freed comes back first; the file does not grow.
        assert_eq!(allocate_page_id(&mut pool, &mut header, store).unwrap(), c);
        assert_eq!(allocate_page_id(&mut pool, &mut header, store).unwrap(), a);
        assert_eq!(header.free_list_head, 0);
        assert_eq!(header.page_count, 4);

        // Chain exhausted: the next allocation grows again.
        let d = allocate_page_id(&mut pool, &mut header, store).unwrap();
        assert_eq!(d, PageId::new(4));
        assert_eq!(header.page_count, 5);

        let _ = b;
        pool.close_store(store).unwrap();
    }

    #[test]
    fn chain_survives_cache_eviction() {
        let vfs = MemoryVfs::new();
        let mut pool = PagePool::new(PageShift::DEFAULT, 4);
        let open = |pool: &mut PagePool| {
            let (data, _) = vfs
                .open_block_access(Path::new("chain.cellar"), PageShift::DEFAULT, true, false)
                .unwrap();
            let (log, _) = vfs
                .open_random_access(Path::new("chain.cellar.log"), true, false)
                .unwrap();
            pool.register_store(data, log)
        };

        let store = open(&mut pool);
        let mut header = StoreHeader::new(PageShift::DEFAULT);
        let a = allocate_page_id(&mut pool, &mut header, store).unwrap();
        let b = allocate_page_id(&mut pool, &mut header, store).unwrap();
        release_page_id(&mut pool, &mut header, store, a).unwrap();
        release_page_id(&mut pool, &mut header, store, b).unwrap();

        // Closing the store flushes the cache; only the data file survives.
        pool.close_store(store).unwrap();

        // A fresh store over the same bytes walks the chain from disk.
        let reopened = open(&mut pool);
        assert_eq!(allocate_page_id(&mut pool, &mut header, reopened).unwrap(), b);
        assert_eq!(allocate_page_id(&mut pool, &mut header, reopened).unwrap(), a);
        assert_eq!(header.free_list_head, 0);

        pool.close_store(reopened).unwrap();
    }
}
