//! Stores, transactions, and the resource pool facade of the cellar
//! storage engine.
//!
//! This crate is deliberately thin glue around `cellar-pool`: the
//! [`Pool`] owns the page pool and the VFS, a [`Store`] is one data file
//! plus its log served through the pool, and a [`Transaction`] is the
//! pin-holding scope in which pages are read, written, allocated, and
//! freed.

mod freelist;
mod guard;
mod header;
mod pool;
mod store;
mod txn;

pub use guard::PageGuard;
pub use header::StoreHeader;
pub use pool::{Pool, PoolStats};
pub use store::Store;
pub use txn::Transaction;
