//! Configuration structures for micadb.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the single paged data file.
    pub data_path: PathBuf,
    /// Page size in bytes.
    pub page_size: usize,
    /// Buffer pool size in number of frames.
    pub buffer_pool_pages: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./data/mica.db"),
            page_size: PAGE_SIZE,
            buffer_pool_pages: 1024, // 4 MB with 4 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * self.page_size
    }
}

/// Sizing parameters for a B+Tree index.
///
/// Both sizes count entries; they must fit the on-page layout for the chosen
/// key and value widths (the tree constructor checks this).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum number of entries in a leaf page.
    pub leaf_max_size: u32,
    /// Maximum number of children in an internal page, excluding the
    /// sentinel slot.
    pub internal_max_size: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            leaf_max_size: 128,
            internal_max_size: 128,
        }
    }
}
