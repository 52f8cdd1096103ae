//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{LruReplacer, Replacer};
use mica_common::disk::DiskManager;
use mica_common::error::{MicaError, Result};
use mica_common::page::{PageData, PageId, INVALID_PAGE_ID};
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::sync::Arc;
use tracing::{debug, trace};

/// Buffer pool manager.
///
/// Owns a fixed array of frames, the page table mapping resident page ids to
/// frames, a free list, and the LRU replacer. All state transitions happen
/// under one pool latch; the latch is never held while waiting on a page
/// latch.
///
/// Write-back policy: dirty pages are written on eviction and on explicit
/// flush. `unpin_page` leaves the page dirty in the pool. Every write to disk
/// is gated on a per-frame content fingerprint: if the page bytes hash to the
/// same value as at the last write, the write is elided.
pub struct BufferPoolManager {
    /// Number of frames.
    pool_size: usize,
    /// Frame array; stable addresses for the pool's lifetime.
    frames: Vec<BufferFrame>,
    /// Disk backend.
    disk: Arc<dyn DiskManager>,
    /// State protected by the pool latch.
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    page_table: PageTable,
    free_list: Vec<FrameId>,
    replacer: LruReplacer,
    /// Content hash of each frame's bytes at the time of its last disk
    /// write. Tracked per frame, not per page id; a rebound frame corrects
    /// itself on the first mismatch.
    fingerprints: Vec<u64>,
}

fn content_hash(data: &PageData) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write(data);
    hasher.finish()
}

impl BufferPoolManager {
    /// Creates a buffer pool with `pool_size` frames over the given disk.
    pub fn new(pool_size: usize, disk: Arc<dyn DiskManager>) -> Self {
        assert!(pool_size > 0, "buffer pool needs at least one frame");

        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..pool_size).rev().map(|i| FrameId(i as u32)).collect();
        let zero_hash = content_hash(&[0u8; mica_common::page::PAGE_SIZE]);

        Self {
            pool_size,
            frames,
            disk,
            inner: Mutex::new(PoolInner {
                page_table: PageTable::new(pool_size),
                free_list,
                replacer: LruReplacer::new(pool_size),
                fingerprints: vec![zero_hash; pool_size],
            }),
        }
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of frames on the free list.
    pub fn free_frame_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Number of resident pages.
    pub fn resident_page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Fetches a page, reading it from disk if not resident. The returned
    /// frame is pinned; the caller must balance with exactly one
    /// `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        assert!(page_id.is_valid(), "fetch of the invalid page id");
        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.page_id() == page_id {
                frame.pin();
                inner.replacer.pin(frame_id);
                return Ok(frame);
            }
            // Stale mapping left behind by a rebind.
            inner.page_table.remove(page_id);
        }

        debug!(page = %page_id, "buffer pool miss, loading from disk");
        let frame_id = self.take_victim(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];
        self.evict_resident(&mut inner, frame)?;

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut **data) {
                drop(data);
                frame.reset();
                inner.free_list.push(frame_id);
                return Err(e);
            }
        }
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        Ok(frame)
    }

    /// Decrements a page's pin count, OR-ing `is_dirty` into its dirty bit.
    /// When the count reaches zero the frame becomes evictable. Returns false
    /// only if the page was resident but not pinned on entry.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(frame_id) = inner.page_table.get(page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.page_id() != page_id {
            inner.page_table.remove(page_id);
            return true;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.pin_count() == 0 {
            return false;
        }
        if frame.unpin() == 0 {
            inner.replacer.unpin(frame_id);
        }
        true
    }

    /// Flushes a resident page to disk (content-hash gated) and clears its
    /// dirty bit. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(frame_id) = inner.page_table.get(page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.page_id() != page_id {
            return Ok(false);
        }
        self.write_back(&mut inner, frame)?;
        frame.set_dirty(false);
        Ok(true)
    }

    /// Allocates a fresh page on disk and binds it to a frame. The returned
    /// frame is pinned and zero-filled. Fails with `BufferPoolFull` if no
    /// frame is evictable.
    pub fn new_page(&self) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        let frame_id = self.take_victim(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];
        self.evict_resident(&mut inner, frame)?;

        let page_id = match self.disk.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                frame.reset();
                inner.free_list.push(frame_id);
                return Err(e);
            }
        };
        frame.write_data().fill(0);
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);
        trace!(page = %page_id, frame = %frame_id, "bound new page");
        Ok(frame)
    }

    /// Deallocates a page on disk and frees its frame if resident. Returns
    /// false if the page is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut inner = self.inner.lock();
        self.disk.deallocate_page(page_id);

        let Some(frame_id) = inner.page_table.get(page_id) else {
            return true;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.page_id() != page_id {
            inner.page_table.remove(page_id);
            return true;
        }
        if frame.pin_count() != 0 {
            return false;
        }
        inner.page_table.remove(page_id);
        frame.set_page_id(INVALID_PAGE_ID);
        frame.set_dirty(false);
        inner.replacer.pin(frame_id);
        inner.free_list.push(frame_id);
        true
    }

    /// Flushes every resident page (content-hash gated).
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let resident: Vec<FrameId> = inner.page_table.iter().map(|(_, f)| f).collect();
        for frame_id in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.page_id().is_valid() {
                self.write_back(&mut inner, frame)?;
                frame.set_dirty(false);
            }
        }
        Ok(())
    }

    /// Returns a snapshot of pool occupancy.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for (_, frame_id) in inner.page_table.iter() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }
        BufferPoolStats {
            total_frames: self.pool_size,
            free_frames: inner.free_list.len(),
            resident_pages: inner.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }

    /// Picks a frame to (re)use: free list first, then the replacer.
    fn take_victim(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop() {
            return Ok(frame_id);
        }
        let Some(frame_id) = inner.replacer.victim() else {
            return Err(MicaError::BufferPoolFull);
        };
        let frame = &self.frames[frame_id.0 as usize];
        assert_eq!(frame.pin_count(), 0, "replacer produced a pinned victim");
        Ok(frame_id)
    }

    /// Unbinds the page currently held by `frame`, writing it back if dirty.
    fn evict_resident(&self, inner: &mut PoolInner, frame: &BufferFrame) -> Result<()> {
        let old_page_id = frame.page_id();
        if !old_page_id.is_valid() {
            return Ok(());
        }
        inner.page_table.remove(old_page_id);
        if frame.is_dirty() {
            self.write_back(inner, frame)?;
            frame.set_dirty(false);
        }
        trace!(page = %old_page_id, frame = %frame.frame_id(), "evicted page");
        Ok(())
    }

    /// Writes the frame's bytes to disk unless they hash to the fingerprint
    /// recorded at the last write.
    fn write_back(&self, inner: &mut PoolInner, frame: &BufferFrame) -> Result<()> {
        let data = frame.read_data();
        let hash = content_hash(&**data);
        let slot = frame.frame_id().0 as usize;
        if hash == inner.fingerprints[slot] {
            trace!(page = %frame.page_id(), "write elided, content unchanged");
            return Ok(());
        }
        self.disk.write_page(frame.page_id(), &**data)?;
        inner.fingerprints[slot] = hash;
        Ok(())
    }
}

/// Occupancy snapshot of the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub resident_pages: usize,
    pub pinned_frames: usize,
    pub dirty_frames: usize,
}
