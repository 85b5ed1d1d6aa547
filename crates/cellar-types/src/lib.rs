//! Identifier and configuration types shared across the cellar crates.

use std::fmt;

/// A page number inside a store's data file.
///
/// Page ids are 0-based: page `i` occupies the byte range
/// `[i << page_shift, (i + 1) << page_shift)` of the data file. Page 0 holds
/// the store header, so dynamically allocated pages always have nonzero ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageId(u64);

impl PageId {
    /// The store header page.
    pub const HEADER: Self = Self(0);

    /// Create a page id from a raw index.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw page index.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Byte offset of this page in a file of `1 << page_shift`-byte pages.
    #[inline]
    pub const fn file_offset(self, page_shift: PageShift) -> u64 {
        self.0 << page_shift.get()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifies a store registered with a page pool.
///
/// Store ids are minted by the pool when a store is registered and are only
/// meaningful within that pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct StoreId(u32);

impl StoreId {
    /// Create a store id from a raw index.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw index.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// The index as a `usize`, for table lookups.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The base-2 logarithm of a page size.
///
/// Valid shifts are 9 through 24 inclusive, so page sizes range from 512
/// bytes to 16 MiB and are always powers of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageShift(u8);

impl PageShift {
    /// Smallest supported shift (512-byte pages).
    pub const MIN: Self = Self(9);

    /// Default shift (4096-byte pages).
    pub const DEFAULT: Self = Self(12);

    /// Largest supported shift (16 MiB pages).
    pub const MAX: Self = Self(24);

    /// Create a page shift, validating the `[9, 24]` range.
    pub const fn new(shift: u8) -> Option<Self> {
        if shift >= Self::MIN.0 && shift <= Self::MAX.0 {
            Some(Self(shift))
        } else {
            None
        }
    }

    /// Get the raw shift value.
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// The page size in bytes, `1 << shift`.
    #[inline]
    pub const fn page_size(self) -> usize {
        1_usize << self.0
    }
}

impl Default for PageShift {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for PageShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Desired outcome when a requested store page is not already pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Read the missing page from the store's data file.
    ///
    /// The correct choice for callers who use the page's current contents,
    /// which is almost all the time.
    FetchPageData,

    /// Skip the read; the caller promises to overwrite the page.
    ///
    /// The returned entry is marked dirty, and in debug builds its buffer is
    /// filled with a recognizable pattern so uses of unwritten data stand
    /// out.
    IgnorePageData,
}

/// Configuration for a resource pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Base-2 log of the page size used by every store in the pool.
    pub page_shift: PageShift,
    /// Maximum number of entries the page pool may hold.
    pub page_pool_size: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            page_shift: PageShift::DEFAULT,
            page_pool_size: 64,
        }
    }
}

/// Configuration for opening a store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Create the store file if it does not exist.
    pub create_if_missing: bool,
    /// Fail if the store file already exists.
    pub error_if_exists: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_shift_range() {
        assert!(PageShift::new(8).is_none());
        assert!(PageShift::new(9).is_some());
        assert!(PageShift::new(24).is_some());
        assert!(PageShift::new(25).is_none());
    }

    #[test]
    fn page_shift_size() {
        assert_eq!(PageShift::MIN.page_size(), 512);
        assert_eq!(PageShift::DEFAULT.page_size(), 4096);
        assert_eq!(PageShift::MAX.page_size(), 16 << 20);
        assert!(PageShift::DEFAULT.page_size().is_power_of_two());
    }

    #[test]
    fn page_id_offsets() {
        let shift = PageShift::DEFAULT;
        assert_eq!(PageId::HEADER.file_offset(shift), 0);
        assert_eq!(PageId::new(1).file_offset(shift), 4096);
        assert_eq!(PageId::new(100).file_offset(shift), 100 * 4096);

        let small = PageShift::new(9).unwrap();
        assert_eq!(PageId::new(100).file_offset(small), 100 * 512);
    }

    #[test]
    fn store_id_roundtrip() {
        let id = StoreId::new(7);
        assert_eq!(id.get(), 7);
        assert_eq!(id.as_usize(), 7);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn default_options() {
        let options = PoolOptions::default();
        assert_eq!(options.page_shift, PageShift::DEFAULT);
        assert_eq!(options.page_pool_size, 64);

        let store = StoreOptions::default();
        assert!(!store.create_if_missing);
        assert!(!store.error_if_exists);
    }
}
