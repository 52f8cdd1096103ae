//! Page identifiers and sizing for micadb storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// A full page worth of bytes.
pub type PageData = [u8; PAGE_SIZE];

/// Unique identifier for a page within the data file.
///
/// Pages are numbered from zero; page zero is reserved for the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

/// Sentinel id meaning "no page". Never returned by allocation.
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// The well-known header page holding `<index name, root page id>` records.
pub const HEADER_PAGE_ID: PageId = PageId(0);

impl PageId {
    /// Returns true if this id refers to an actual page.
    pub fn is_valid(&self) -> bool {
        *self != INVALID_PAGE_ID
    }

    /// Byte offset of this page in the data file.
    pub fn file_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(0).is_valid());
        assert!(PageId(12345).is_valid());
        assert!(!INVALID_PAGE_ID.is_valid());
    }

    #[test]
    fn test_header_page_is_page_zero() {
        assert_eq!(HEADER_PAGE_ID, PageId(0));
    }

    #[test]
    fn test_file_offset() {
        assert_eq!(PageId(0).file_offset(), 0);
        assert_eq!(PageId(3).file_offset(), 3 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(7).to_string(), "page:7");
        assert_eq!(INVALID_PAGE_ID.to_string(), "page:invalid");
    }

    #[test]
    fn test_page_id_ordering() {
        assert!(PageId(1) < PageId(2));
        assert!(PageId(2) < INVALID_PAGE_ID);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(42);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
