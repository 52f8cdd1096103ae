//! Per-operation bookkeeping for tree descents.

use mica_buffer::BufferFrame;
use mica_common::page::PageId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashSet;

/// A page latch held by an operation.
pub(crate) enum PageLatch<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// One latched, pinned page tracked by a transaction.
pub(crate) struct LatchedPage<'a> {
    pub page_id: PageId,
    pub frame: &'a BufferFrame,
    /// Dropped when the transaction releases the page.
    _latch: PageLatch<'a>,
}

/// The root-id latch, held in the mode of the enclosing operation.
enum RootLatch<'a> {
    Read(RwLockReadGuard<'a, PageId>),
    Write(RwLockWriteGuard<'a, PageId>),
}

/// Tracks everything a single tree operation holds: the ordered set of
/// latched pages (each also pinned in the buffer pool), the set of pages
/// scheduled for deletion on release, and the root-id latch with its
/// re-entry depth.
///
/// The depth counter is what makes nested descents safe: `insert` acquires
/// the root latch before checking for the empty tree, and the leaf search it
/// delegates to acquires it again. Only the first acquisition takes the
/// lock; release is idempotent once the descent proves the operation local.
pub struct Transaction<'a> {
    pages: Vec<LatchedPage<'a>>,
    deleted: HashSet<PageId>,
    root_latch: Option<RootLatch<'a>>,
    root_depth: u32,
}

impl<'a> Transaction<'a> {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            deleted: HashSet::new(),
            root_latch: None,
            root_depth: 0,
        }
    }

    /// Appends a latched page to the ordered page set.
    pub(crate) fn add_page(&mut self, page_id: PageId, frame: &'a BufferFrame, latch: PageLatch<'a>) {
        self.pages.push(LatchedPage {
            page_id,
            frame,
            _latch: latch,
        });
    }

    /// Looks up a page the operation already holds.
    pub(crate) fn find_frame(&self, page_id: PageId) -> Option<&'a BufferFrame> {
        self.pages
            .iter()
            .find(|p| p.page_id == page_id)
            .map(|p| p.frame)
    }

    /// Takes the page set, leaving the transaction empty. Dropping the
    /// returned entries releases their latches.
    pub(crate) fn drain_pages(&mut self) -> Vec<LatchedPage<'a>> {
        std::mem::take(&mut self.pages)
    }

    pub(crate) fn has_pages(&self) -> bool {
        !self.pages.is_empty()
    }

    /// Schedules a page for deletion when the operation releases.
    pub(crate) fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.insert(page_id);
    }

    pub(crate) fn take_deleted(&mut self, page_id: PageId) -> bool {
        self.deleted.remove(&page_id)
    }

    pub(crate) fn deleted_is_empty(&self) -> bool {
        self.deleted.is_empty()
    }

    /// Acquires the root-id latch, or just bumps the re-entry depth if this
    /// operation already holds it.
    pub(crate) fn acquire_root(&mut self, root: &'a RwLock<PageId>, exclusive: bool) {
        if self.root_depth == 0 {
            debug_assert!(self.root_latch.is_none());
            self.root_latch = Some(if exclusive {
                RootLatch::Write(root.write())
            } else {
                RootLatch::Read(root.read())
            });
        } else {
            debug_assert_eq!(
                matches!(self.root_latch, Some(RootLatch::Write(_))),
                exclusive,
                "root latch re-entered in a different mode"
            );
        }
        self.root_depth += 1;
    }

    /// Fully releases the root-id latch. Idempotent: descents release it as
    /// soon as a node proves safe, and the operation-level release runs
    /// unconditionally afterwards.
    pub(crate) fn release_root(&mut self) {
        self.root_depth = 0;
        self.root_latch = None;
    }

    pub(crate) fn holds_root(&self) -> bool {
        self.root_latch.is_some()
    }

    /// The root page id as seen under the held latch.
    pub(crate) fn root_page_id(&self) -> PageId {
        match &self.root_latch {
            Some(RootLatch::Read(guard)) => **guard,
            Some(RootLatch::Write(guard)) => **guard,
            None => panic!("root page id read without the root latch"),
        }
    }

    /// Updates the root page id through the exclusively held latch.
    pub(crate) fn set_root_page_id(&mut self, page_id: PageId) {
        match &mut self.root_latch {
            Some(RootLatch::Write(guard)) => **guard = page_id,
            _ => panic!("root page id written without the exclusive root latch"),
        }
    }
}

impl<'a> Default for Transaction<'a> {
    fn default() -> Self {
        Self::new()
    }
}
