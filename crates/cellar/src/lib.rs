//! Cellar: an embedded key/value storage engine organized around a
//! fixed-size page abstraction.
//!
//! The engine's centerpiece is a bounded page pool that caches store pages
//! in memory, evicts in LRU order, honors pins, and writes dirty pages back
//! on eviction. Stores share the pool; transactions pin the pages they
//! touch.
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use cellar::{MemoryVfs, Pool, PoolOptions, StoreOptions};
//!
//! # fn main() -> cellar::Result<()> {
//! let pool = Pool::with_vfs(PoolOptions::default(), Arc::new(MemoryVfs::new()))?;
//! let store = pool.open_store(
//!     Path::new("example.cellar"),
//!     StoreOptions { create_if_missing: true, ..StoreOptions::default() },
//! )?;
//!
//! let mut txn = store.begin()?;
//! let page = txn.allocate_page()?;
//! txn.write_page(page, |data| data[..5].copy_from_slice(b"tuple"))?;
//! txn.commit()?;
//!
//! let guard = store.fetch_page(page)?;
//! guard.with_data(|data| assert_eq!(&data[..5], b"tuple"));
//! guard.unpin();
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub use cellar_core::{PageGuard, Pool, PoolStats, Store, StoreHeader, Transaction};
pub use cellar_error::{CellarError, Result, StatusCode};
pub use cellar_pool::{EntryHandle, PagePool, StoreState};
pub use cellar_types::{FetchMode, PageId, PageShift, PoolOptions, StoreId, StoreOptions};
pub use cellar_vfs::{default_vfs, BlockAccessFile, MemoryVfs, RandomAccessFile, Vfs};
#[cfg(unix)]
pub use cellar_vfs::UnixVfs;
