//! Store lifecycle: bootstrap, recovery, header validation, and close.

use std::path::Path;
use std::sync::Arc;

use cellar_core::{Pool, StoreHeader};
use cellar_error::CellarError;
use cellar_types::{PageId, PageShift, PoolOptions, StoreOptions};
use cellar_vfs::{BlockAccessFile, MemoryVfs, Vfs};

const SHIFT: PageShift = PageShift::DEFAULT;
const PAGE_SIZE: usize = 4096;

fn pool_over(vfs: &MemoryVfs, capacity: usize) -> Pool {
    let options = PoolOptions {
        page_shift: SHIFT,
        page_pool_size: capacity,
    };
    Pool::with_vfs(options, Arc::new(vfs.clone())).unwrap()
}

fn create_options() -> StoreOptions {
    StoreOptions {
        create_if_missing: true,
        ..StoreOptions::default()
    }
}

#[test]
fn bootstrap_writes_header_page() {
    let vfs = MemoryVfs::new();
    let pool = pool_over(&vfs, 8);

    let store = pool
        .open_store(Path::new("new.cellar"), create_options())
        .unwrap();
    assert_eq!(store.page_count(), 1);
    store.close().unwrap();

    // The header page is on disk, magic first.
    let (mut raw, size) = vfs
        .open_block_access(Path::new("new.cellar"), SHIFT, false, false)
        .unwrap();
    assert_eq!(size, PAGE_SIZE as u64);
    let mut page = vec![0u8; PAGE_SIZE];
    raw.read(0, &mut page).unwrap();
    assert_eq!(&page[0..8], b"CellarDB");
    let header = StoreHeader::deserialize(&page).unwrap();
    assert_eq!(header.page_count, 1);
    assert_eq!(header.free_list_head, 0);
    assert_eq!(header.page_shift, SHIFT);
}

#[test]
fn reopen_recovers_header() {
    let vfs = MemoryVfs::new();
    {
        let pool = pool_over(&vfs, 8);
        let store = pool
            .open_store(Path::new("persist.cellar"), create_options())
            .unwrap();

        let mut txn = store.begin().unwrap();
        let page = txn.allocate_page().unwrap();
        txn.write_page(page, |data| data.fill(0x2A)).unwrap();
        txn.commit().unwrap();
        assert_eq!(store.page_count(), 2);

        store.close().unwrap();
    }

    // A second pool over the same files sees the grown store.
    let pool = pool_over(&vfs, 8);
    let store = pool
        .open_store(Path::new("persist.cellar"), StoreOptions::default())
        .unwrap();
    assert_eq!(store.page_count(), 2);

    let guard = store.fetch_page(PageId::new(1)).unwrap();
    guard.with_data(|data| assert!(data.iter().all(|&b| b == 0x2A)));
    guard.unpin();

    store.close().unwrap();
}

#[test]
fn corrupt_header_is_rejected() {
    let vfs = MemoryVfs::new();
    {
        let (mut raw, _) = vfs
            .open_block_access(Path::new("garbage.cellar"), SHIFT, true, false)
            .unwrap();
        raw.write(&vec![0xFF_u8; PAGE_SIZE], 0).unwrap();
    }

    let pool = pool_over(&vfs, 8);
    let result = pool.open_store(Path::new("garbage.cellar"), StoreOptions::default());
    assert!(matches!(result, Err(CellarError::Corrupt { .. })));

    // The failed open leaves nothing pinned.
    assert_eq!(pool.stats().pinned_pages, 0);
}

#[test]
fn page_shift_mismatch_is_rejected() {
    let vfs = MemoryVfs::new();
    {
        let pool = pool_over(&vfs, 8);
        let store = pool
            .open_store(Path::new("small-pages.cellar"), create_options())
            .unwrap();
        // Grow the file past one 8 KiB page so the mismatched reopen gets
        // far enough to validate the header rather than hit a short read.
        let mut txn = store.begin().unwrap();
        let page = txn.allocate_page().unwrap();
        txn.write_page(page, |data| data.fill(0xAB)).unwrap();
        txn.commit().unwrap();
        store.close().unwrap();
    }

    let options = PoolOptions {
        page_shift: PageShift::new(13).unwrap(),
        page_pool_size: 8,
    };
    let pool = Pool::with_vfs(options, Arc::new(vfs.clone())).unwrap();
    let result = pool.open_store(Path::new("small-pages.cellar"), StoreOptions::default());
    assert!(matches!(result, Err(CellarError::InvalidConfig { .. })));
}

#[test]
fn error_if_exists_honored() {
    let vfs = MemoryVfs::new();
    let pool = pool_over(&vfs, 8);
    let store = pool
        .open_store(Path::new("only-once.cellar"), create_options())
        .unwrap();
    store.close().unwrap();

    let exclusive = StoreOptions {
        create_if_missing: true,
        error_if_exists: true,
    };
    let result = pool.open_store(Path::new("only-once.cellar"), exclusive);
    assert!(matches!(result, Err(CellarError::CannotOpen { .. })));
}

#[test]
fn close_is_fail_fast_afterwards() {
    let vfs = MemoryVfs::new();
    let pool = pool_over(&vfs, 8);
    let store = pool
        .open_store(Path::new("closed.cellar"), create_options())
        .unwrap();

    assert!(!store.is_closed());
    store.close().unwrap();
    assert!(store.is_closed());

    assert!(matches!(store.close(), Err(CellarError::AlreadyClosed)));
    assert!(matches!(
        store.fetch_page(PageId::HEADER),
        Err(CellarError::AlreadyClosed)
    ));
    assert!(matches!(store.begin(), Err(CellarError::AlreadyClosed)));
}

#[test]
fn close_writes_dirty_pages_back() {
    let vfs = MemoryVfs::new();
    let pool = pool_over(&vfs, 8);
    let store = pool
        .open_store(Path::new("flush.cellar"), create_options())
        .unwrap();

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| data.fill(0x77)).unwrap();
    txn.commit().unwrap();

    // Leave a dirty page resting in the LRU, then close.
    let mut guard = store.fetch_page(page).unwrap();
    guard.with_data_mut(|data| data[0] = 0x78);
    guard.unpin();
    store.close().unwrap();

    let (mut raw, _) = vfs
        .open_block_access(Path::new("flush.cellar"), SHIFT, false, false)
        .unwrap();
    let mut bytes = vec![0u8; PAGE_SIZE];
    raw.read(page.file_offset(SHIFT), &mut bytes).unwrap();
    assert_eq!(bytes[0], 0x78);
    assert!(bytes[1..].iter().all(|&b| b == 0x77));
}

#[test]
fn guard_write_read_roundtrip() {
    let vfs = MemoryVfs::new();
    let pool = pool_over(&vfs, 8);
    let store = pool
        .open_store(Path::new("guards.cellar"), create_options())
        .unwrap();

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.commit().unwrap();

    let mut guard = store.overwrite_page(page).unwrap();
    assert!(guard.is_dirty());
    guard.with_data_mut(|data| {
        data.fill(0);
        data[..4].copy_from_slice(b"leaf");
    });
    guard.unpin_and_write().unwrap();

    let guard = store.fetch_page(page).unwrap();
    assert_eq!(guard.page_id(), page);
    guard.with_data(|data| assert_eq!(&data[..4], b"leaf"));
    guard.unpin();

    store.close().unwrap();
}

#[test]
fn log_file_is_created_next_to_the_store() {
    let vfs = MemoryVfs::new();
    let pool = pool_over(&vfs, 8);
    let store = pool
        .open_store(Path::new("with-log.cellar"), create_options())
        .unwrap();
    store.close().unwrap();
    drop(pool);

    // Deleting proves the file exists.
    vfs.delete_file(Path::new("with-log.cellar.log")).unwrap();
}

#[cfg(unix)]
#[test]
fn works_on_real_files() {
    use cellar_vfs::UnixVfs;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.cellar");
    let options = PoolOptions {
        page_shift: SHIFT,
        page_pool_size: 4,
    };

    {
        let pool = Pool::with_vfs(options, Arc::new(UnixVfs::new())).unwrap();
        let store = pool.open_store(&path, create_options()).unwrap();
        let mut txn = store.begin().unwrap();
        let page = txn.allocate_page().unwrap();
        txn.write_page(page, |data| data.fill(0x11)).unwrap();
        txn.commit().unwrap();
        store.close().unwrap();
    }

    let pool = Pool::with_vfs(options, Arc::new(UnixVfs::new())).unwrap();
    let store = pool.open_store(&path, StoreOptions::default()).unwrap();
    assert_eq!(store.page_count(), 2);
    let guard = store.fetch_page(PageId::new(1)).unwrap();
    guard.with_data(|data| assert!(data.iter().all(|&b| b == 0x11)));
    guard.unpin();
    store.close().unwrap();
}
