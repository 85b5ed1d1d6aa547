//! Error types for the cellar storage engine.
//!
//! The error surface is deliberately small: a handful of structured variants
//! for the conditions callers can act on, plus a stable numeric
//! [`StatusCode`] mapping for embedders that speak a C-style boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for cellar operations.
#[derive(Error, Debug)]
pub enum CellarError {
    /// Store file not found.
    #[error("store not found: '{path}'")]
    StoreNotFound {
        /// Path of the missing store file.
        path: PathBuf,
    },

    /// Unable to open a store or log file.
    #[error("unable to open file: '{path}'")]
    CannotOpen {
        /// Path that failed to open.
        path: PathBuf,
    },

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Disk I/O error while reading a store page.
    #[error("disk I/O error reading page {page}")]
    IoRead {
        /// Page id that could not be read.
        page: u64,
    },

    /// Disk I/O error while writing a store page.
    #[error("disk I/O error writing page {page}")]
    IoWrite {
        /// Page id that could not be written.
        page: u64,
    },

    /// The page pool has no free or evictable entry left.
    ///
    /// Recoverable: release pins elsewhere and retry.
    #[error("page pool is full")]
    PoolFull,

    /// Operation against a store that is closing or closed.
    #[error("store is already closed")]
    AlreadyClosed,

    /// Store file failed validation.
    #[error("store file is corrupt: {detail}")]
    Corrupt {
        /// What failed to validate.
        detail: String,
    },

    /// A configuration value was out of range.
    #[error("{what} out of range: {value}")]
    InvalidConfig {
        /// Name of the offending parameter.
        what: &'static str,
        /// The rejected value, rendered for display.
        value: String,
    },

    /// The store has no free page and the data file cannot grow further.
    #[error("store is full")]
    StoreFull,

    /// Operation on a transaction that was already committed or aborted.
    #[error("transaction is no longer active")]
    TransactionClosed,

    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable status codes surfaced at the embedder boundary.
///
/// The numeric values are part of the public contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatusCode {
    /// Operation completed and all invariants hold.
    Ok = 0,
    /// The desired key or file was not found.
    NotFound = 1,
    /// Generic I/O error.
    IoError = 2,
    /// The page pool could not supply an entry.
    PoolFull = 3,
    /// The target store is closing or closed.
    AlreadyClosed = 4,
    /// A file failed format validation.
    Corrupt = 5,
}

impl CellarError {
    /// Map this error to its boundary status code.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::StoreNotFound { .. } => StatusCode::NotFound,
            Self::CannotOpen { .. }
            | Self::Io(_)
            | Self::IoRead { .. }
            | Self::IoWrite { .. }
            | Self::StoreFull => StatusCode::IoError,
            Self::PoolFull => StatusCode::PoolFull,
            Self::AlreadyClosed | Self::TransactionClosed => StatusCode::AlreadyClosed,
            Self::Corrupt { .. } => StatusCode::Corrupt,
            Self::InvalidConfig { .. } | Self::Internal(_) => StatusCode::IoError,
        }
    }

    /// Whether the caller can retry after releasing resources.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PoolFull)
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a corruption error.
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }
}

/// Result type alias using [`CellarError`].
pub type Result<T> = std::result::Result<T, CellarError>;
