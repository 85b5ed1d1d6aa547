//! Transaction semantics: commit durability, rollback, page allocation and
//! reuse, and failure cascades.

use std::path::Path;
use std::sync::Arc;

use cellar_core::{Pool, Store};
use cellar_error::CellarError;
use cellar_types::{PageId, PageShift, PoolOptions, StoreOptions};
use cellar_vfs::{MemoryVfs, RandomAccessFile, Vfs};

const SHIFT: PageShift = PageShift::DEFAULT;

fn open_store(vfs: &MemoryVfs, name: &str, capacity: usize) -> (Pool, Store) {
    let options = PoolOptions {
        page_shift: SHIFT,
        page_pool_size: capacity,
    };
    let pool = Pool::with_vfs(options, Arc::new(vfs.clone())).unwrap();
    let store = pool
        .open_store(
            Path::new(name),
            StoreOptions {
                create_if_missing: true,
                ..StoreOptions::default()
            },
        )
        .unwrap();
    (pool, store)
}

#[test]
fn commit_makes_writes_visible_and_durable() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "commit.cellar", 8);

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| data[..5].copy_from_slice(b"hello"))
        .unwrap();

    // The transaction reads its own writes.
    txn.read_page(page, |data| assert_eq!(&data[..5], b"hello"))
        .unwrap();
    txn.commit().unwrap();

    // Visible outside the transaction afterwards.
    let guard = store.fetch_page(page).unwrap();
    guard.with_data(|data| assert_eq!(&data[..5], b"hello"));
    guard.unpin();

    store.close().unwrap();
}

#[test]
fn commit_appends_log_record() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "log-rec.cellar", 8);

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| data.fill(1)).unwrap();
    txn.commit().unwrap();
    store.close().unwrap();

    let (mut log, size) = vfs
        .open_random_access(Path::new("log-rec.cellar.log"), false, false)
        .unwrap();
    assert_eq!(size, 16);
    let mut record = [0u8; 16];
    log.read(0, &mut record).unwrap();
    assert_eq!(&record[..8], b"CLCOMMIT");
    assert_eq!(u64::from_le_bytes(record[8..].try_into().unwrap()), 1);
}

#[test]
fn rollback_discards_buffered_writes() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "rollback.cellar", 8);

    // Establish a committed page of 0x10 bytes.
    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| data.fill(0x10)).unwrap();
    txn.commit().unwrap();

    // Mutate it and roll the transaction back.
    let mut txn = store.begin().unwrap();
    txn.write_page(page, |data| data.fill(0x66)).unwrap();
    txn.rollback().unwrap();

    // The cache serves the on-disk bytes, not the discarded write.
    let guard = store.fetch_page(page).unwrap();
    guard.with_data(|data| assert!(data.iter().all(|&b| b == 0x10)));
    guard.unpin();

    store.close().unwrap();
}

#[test]
fn rollback_returns_allocations() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "undo-alloc.cellar", 8);

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    assert_eq!(page, PageId::new(1));
    txn.write_page(page, |data| data.fill(9)).unwrap();
    txn.rollback().unwrap();
    assert_eq!(store.page_count(), 1);

    // The same id comes back on the next allocation.
    let mut txn = store.begin().unwrap();
    assert_eq!(txn.allocate_page().unwrap(), page);
    txn.commit().unwrap();

    store.close().unwrap();
}

#[test]
fn dropping_an_active_transaction_aborts_it() {
    let vfs = MemoryVfs::new();
    let (pool, store) = open_store(&vfs, "drop-abort.cellar", 8);

    {
        let mut txn = store.begin().unwrap();
        let page = txn.allocate_page().unwrap();
        txn.write_page(page, |data| data.fill(3)).unwrap();
        // No commit.
    }
    assert_eq!(store.page_count(), 1);
    assert_eq!(pool.stats().pinned_pages, 0);

    store.close().unwrap();
}

#[test]
fn finished_transactions_reject_further_work() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "finished.cellar", 8);

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| data.fill(1)).unwrap();
    txn.commit().unwrap();
    assert!(!txn.is_active());

    assert!(matches!(
        txn.commit(),
        Err(CellarError::TransactionClosed)
    ));
    assert!(matches!(
        txn.rollback(),
        Err(CellarError::TransactionClosed)
    ));
    assert!(matches!(
        txn.allocate_page(),
        Err(CellarError::TransactionClosed)
    ));
    assert!(matches!(
        txn.write_page(page, |_| ()),
        Err(CellarError::TransactionClosed)
    ));

    store.close().unwrap();
}

#[test]
fn freed_pages_are_reused_after_commit() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "free-reuse.cellar", 8);

    let mut txn = store.begin().unwrap();
    let a = txn.allocate_page().unwrap();
    let b = txn.allocate_page().unwrap();
    txn.write_page(a, |data| data.fill(1)).unwrap();
    txn.write_page(b, |data| data.fill(2)).unwrap();
    txn.commit().unwrap();
    assert_eq!(store.page_count(), 3);

    let mut txn = store.begin().unwrap();
    txn.free_page(a).unwrap();
    txn.commit().unwrap();

    // The freed page is recycled instead of growing the file.
    let mut txn = store.begin().unwrap();
    assert_eq!(txn.allocate_page().unwrap(), a);
    txn.commit().unwrap();
    assert_eq!(store.page_count(), 3);

    store.close().unwrap();
}

#[test]
fn freeing_the_header_page_is_refused() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "free-header.cellar", 8);

    let mut txn = store.begin().unwrap();
    assert!(txn.free_page(PageId::HEADER).is_err());
    assert!(txn.free_page(PageId::new(99)).is_err());
    txn.rollback().unwrap();

    store.close().unwrap();
}

#[test]
fn allocated_pages_start_zeroed() {
    let vfs = MemoryVfs::new();
    let (_pool, store) = open_store(&vfs, "zeroed.cellar", 8);

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| {
        assert!(data.iter().all(|&b| b == 0));
        data[0] = 0xEE;
    })
    .unwrap();
    txn.commit().unwrap();

    store.close().unwrap();
}

#[test]
fn commit_after_store_close_fails_and_releases_pins() {
    let vfs = MemoryVfs::new();
    let (pool, store) = open_store(&vfs, "mid-close.cellar", 8);

    let mut txn = store.begin().unwrap();
    let page = txn.allocate_page().unwrap();
    txn.write_page(page, |data| data.fill(5)).unwrap();

    // Closing the store unassigns the transaction's pinned page; commit
    // then has nowhere to write its header and reports the closed store.
    store.close().unwrap();
    assert!(txn.commit().is_err());
    assert_eq!(pool.stats().pinned_pages, 0);
}
