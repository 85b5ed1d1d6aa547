//! On-disk store header, occupying the start of page 0.
//!
//! The header format:
//!
//! ```text
//!  0: 8-byte global magic number - "CellarDB"
//!  8: 8-byte store magic number  - "CLStore "
//! 16: 8-byte format version number - 0
//! 24: 8-byte number of pages in the store data file
//! 32: 8-byte page id of the head of the free-page list (0 = empty list)
//! 40: 1-byte page shift (log2 of the page size)
//! 41: 7-byte padding - reserved for future expansion, must be zero
//! ```
//!
//! All integers are little-endian. The version number stays at 0 until the
//! format stabilizes; readers reject anything else.

use cellar_error::{CellarError, Result};
use cellar_types::PageShift;

/// Magic number tagging all cellar files, "CellarDB" in little-endian.
pub const GLOBAL_MAGIC: u64 = u64::from_le_bytes(*b"CellarDB");

/// Magic number tagging cellar store files, "CLStore " in little-endian.
pub const STORE_MAGIC: u64 = u64::from_le_bytes(*b"CLStore ");

/// Metadata stored in the data file's header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    /// Base-2 log of the store's page size.
    pub page_shift: PageShift,
    /// Number of pages in the data file, header page included.
    pub page_count: u64,
    /// Page id of the first free page, or 0 when the free list is empty.
    ///
    /// Page 0 always holds this header, so it can never be on the free list
    /// and doubles as the empty sentinel.
    pub free_list_head: u64,
}

impl StoreHeader {
    /// Size of a serialized store header, in bytes.
    pub const SIZE: usize = 48;

    /// Header for a freshly bootstrapped store: one page (this header) and
    /// an empty free list.
    pub fn new(page_shift: PageShift) -> Self {
        Self {
            page_shift,
            page_count: 1,
            free_list_head: 0,
        }
    }

    /// Store this header into the front of a page buffer.
    pub fn serialize(&self, to: &mut [u8]) {
        debug_assert!(to.len() >= Self::SIZE);

        to[0..8].copy_from_slice(&GLOBAL_MAGIC.to_le_bytes());
        to[8..16].copy_from_slice(&STORE_MAGIC.to_le_bytes());
        to[16..24].copy_from_slice(&0u64.to_le_bytes());
        to[24..32].copy_from_slice(&self.page_count.to_le_bytes());
        to[32..40].copy_from_slice(&self.free_list_head.to_le_bytes());
        // Sets bytes 40..48 to zero before the shift lands in byte 40.
        to[40..48].copy_from_slice(&0u64.to_le_bytes());
        to[40] = self.page_shift.get();
    }

    /// Load a header from the front of a page buffer, validating magic
    /// numbers, the format version, and the page shift.
    pub fn deserialize(from: &[u8]) -> Result<Self> {
        if from.len() < Self::SIZE {
            return Err(CellarError::corrupt("header page is truncated"));
        }

        let read_u64 = |at: usize| u64::from_le_bytes(from[at..at + 8].try_into().expect("8 bytes"));

        if read_u64(0) != GLOBAL_MAGIC {
            return Err(CellarError::corrupt("bad global magic number"));
        }
        if read_u64(8) != STORE_MAGIC {
            return Err(CellarError::corrupt("bad store magic number"));
        }
        let version = read_u64(16);
        if version != 0 {
            return Err(CellarError::corrupt(format!(
                "unsupported format version {version}"
            )));
        }

        let page_count = read_u64(24);
        let free_list_head = read_u64(32);
        if free_list_head != 0 && free_list_head >= page_count {
            return Err(CellarError::corrupt(format!(
                "free list head {free_list_head} outside {page_count}-page store"
            )));
        }

        let Some(page_shift) = PageShift::new(from[40]) else {
            return Err(CellarError::corrupt(format!(
                "page shift {} out of range",
                from[40]
            )));
        };

        Ok(Self {
            page_shift,
            page_count,
            free_list_head,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let header = StoreHeader {
            page_shift: PageShift::DEFAULT,
            page_count: 17,
            free_list_head: 5,
        };

        let mut page = vec![0u8; 4096];
        header.serialize(&mut page);
        let loaded = StoreHeader::deserialize(&page).unwrap();
        assert_eq!(loaded, header);
    }

    #[test]
    fn fresh_header() {
        let header = StoreHeader::new(PageShift::DEFAULT);
        assert_eq!(header.page_count, 1);
        assert_eq!(header.free_list_head, 0);
    }

    #[test]
    fn magic_bytes_are_readable_on_disk() {
        let mut page = vec![0u8; 4096];
        StoreHeader::new(PageShift::DEFAULT).serialize(&mut page);
        assert_eq!(&page[0..8], b"CellarDB");
        assert_eq!(&page[8..16], b"CLStore ");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut page = vec![0u8; 4096];
        StoreHeader::new(PageShift::DEFAULT).serialize(&mut page);
        page[0] ^= 0xFF;
        assert!(matches!(
            StoreHeader::deserialize(&page),
            Err(CellarError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_wrong_version() {
        let mut page = vec![0u8; 4096];
        StoreHeader::new(PageShift::DEFAULT).serialize(&mut page);
        page[16] = 1;
        assert!(matches!(
            StoreHeader::deserialize(&page),
            Err(CellarError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_shift() {
        let mut page = vec![0u8; 4096];
        StoreHeader::new(PageShift::DEFAULT).serialize(&mut page);
        page[40] = 31;
        assert!(matches!(
            StoreHeader::deserialize(&page),
            Err(CellarError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_free_list_head_outside_store() {
        let header = StoreHeader {
            page_shift: PageShift::DEFAULT,
            page_count: 4,
            free_list_head: 9,
        };
        let mut page = vec![0u8; 4096];
        header.serialize(&mut page);
        assert!(matches!(
            StoreHeader::deserialize(&page),
            Err(CellarError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let buf = vec![0u8; 16];
        assert!(StoreHeader::deserialize(&buf).is_err());
    }
}
