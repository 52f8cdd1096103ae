//! Disk manager contract consumed by the buffer pool.

use crate::error::{MicaError, Result};
use crate::page::{PageData, PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Page-granular I/O backend.
///
/// Pages are exactly `PAGE_SIZE` bytes. Implementations do not cache and give
/// no ordering guarantees beyond per-call completion. Page zero is reserved
/// for the header page and is never handed out by `allocate_page`.
pub trait DiskManager: Send + Sync {
    /// Reads the given page into `buf`. A page that was allocated but never
    /// written reads as zeros.
    fn read_page(&self, page_id: PageId, buf: &mut PageData) -> Result<()>;

    /// Writes `buf` to the given page.
    fn write_page(&self, page_id: PageId, buf: &PageData) -> Result<()>;

    /// Allocates a fresh page and returns its id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns a page to the allocator for reuse. Unknown ids are ignored.
    fn deallocate_page(&self, page_id: PageId);
}

/// In-memory disk manager for tests and development.
///
/// Stores pages in a map and counts physical writes, so tests can observe
/// which writes the buffer pool actually issues and which it elides.
pub struct MemoryDiskManager {
    inner: Mutex<MemoryDiskInner>,
    next_page_id: AtomicU32,
    write_count: AtomicU64,
}

struct MemoryDiskInner {
    pages: HashMap<PageId, Box<PageData>>,
    free_pages: Vec<PageId>,
}

impl MemoryDiskManager {
    /// Creates an empty in-memory disk.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryDiskInner {
                pages: HashMap::new(),
                free_pages: Vec::new(),
            }),
            // Page zero is the header page and always implicitly exists.
            next_page_id: AtomicU32::new(1),
            write_count: AtomicU64::new(0),
        }
    }

    /// Number of `write_page` calls that reached this disk.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Acquire)
    }

    /// Number of pages that have ever been written.
    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

impl Default for MemoryDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut PageData) -> Result<()> {
        if !page_id.is_valid() {
            return Err(MicaError::InvalidPageId(page_id));
        }
        let inner = self.inner.lock();
        match inner.pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(&data[..]),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &PageData) -> Result<()> {
        if !page_id.is_valid() {
            return Err(MicaError::InvalidPageId(page_id));
        }
        let mut inner = self.inner.lock();
        let data = inner
            .pages
            .entry(page_id)
            .or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        data.copy_from_slice(buf);
        self.write_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        if let Some(page_id) = inner.free_pages.pop() {
            return Ok(page_id);
        }
        drop(inner);
        Ok(PageId(self.next_page_id.fetch_add(1, Ordering::AcqRel)))
    }

    fn deallocate_page(&self, page_id: PageId) {
        if !page_id.is_valid() || page_id.0 == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        inner.pages.remove(&page_id);
        inner.free_pages.push(page_id);
    }
}
