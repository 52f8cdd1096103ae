//! Buffer frame management.

use mica_common::page::{PageData, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the buffer pool holding one resident page.
///
/// Each frame carries the page bytes plus the bookkeeping the pool needs
/// (pin count, dirty flag, resident page id) and the page latch used by
/// index crabbing. The latch is separate from the byte buffer's lock: a
/// thread that holds the latch on one page can still briefly read or write
/// *another* page's bytes (child reparenting during splits) without taking
/// that page's latch.
pub struct BufferFrame {
    /// Frame identifier, stable for the pool's lifetime.
    frame_id: FrameId,
    /// The page currently bound to this frame (INVALID_PAGE_ID when free).
    page_id: AtomicU32,
    /// Number of outstanding borrows of this frame.
    pin_count: AtomicU32,
    /// Whether the resident bytes differ from disk.
    is_dirty: AtomicBool,
    /// Page latch taken by tree operations (read for lookups, write for
    /// structural changes). Held across multiple byte accesses.
    latch: RwLock<()>,
    /// Page bytes. Lock held only for the duration of a single copy in or
    /// out, never across a latch acquisition.
    data: RwLock<Box<PageData>>,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID.0),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            latch: RwLock::new(()),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page currently bound to this frame (possibly invalid).
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Acquire))
    }

    /// Binds the frame to a page id.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count, returning the previous value.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrements the pin count, returning the new value. Unpinning a frame
    /// that is not pinned is a caller contract breach and aborts.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "pin count underflow");
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// The page latch. Guards are held by tree operations across their
    /// whole critical section; the pool itself never takes it.
    #[inline]
    pub fn latch(&self) -> &RwLock<()> {
        &self.latch
    }

    /// Reads the page bytes.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<PageData>> {
        self.data.read()
    }

    /// Writes the page bytes.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<PageData>> {
        self.data.write()
    }

    /// Resets the frame to its unbound state.
    #[inline]
    pub fn reset(&self) {
        self.page_id.store(INVALID_PAGE_ID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
