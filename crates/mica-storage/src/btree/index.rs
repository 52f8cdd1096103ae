//! B+Tree index with latch-crabbing concurrency.

use super::iterator::TreeIterator;
use super::page::{self, InternalPage, InternalPageRef, LeafPage, LeafPageRef, NodeHeader};
use super::transaction::{PageLatch, Transaction};
use crate::header::HeaderPage;
use mica_buffer::{BufferFrame, BufferPoolManager};
use mica_common::error::Result;
use mica_common::page::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use mica_common::types::{IndexKey, IndexValue, KeyComparator};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, trace};

/// What a descent intends to do at the leaf; decides latch modes and when a
/// node is safe enough to release its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccessMode {
    Read,
    Insert,
    Delete,
}

impl AccessMode {
    fn is_write(self) -> bool {
        !matches!(self, AccessMode::Read)
    }
}

/// Disk-resident B+Tree keyed by `K`, storing `V`, ordered by `C`.
///
/// All node access goes through the buffer pool: pages are borrowed strictly
/// between fetch and unpin, with pin counts as the borrow counters. Each
/// operation latches its descent path crab-wise, releasing ancestors as soon
/// as the current node cannot propagate a split or merge upward. The root
/// page id lives under its own reader-writer latch and is mirrored into the
/// header-page directory whenever it changes.
pub struct BPlusTree<K, V, C> {
    index_name: String,
    /// The root-id latch; the lock is also the storage for the id.
    root: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    /// Stored as the configured size minus one; a leaf splits when it
    /// reaches `leaf_max_size + 1` entries after an insert.
    leaf_max_size: u32,
    internal_max_size: u32,
    _marker: PhantomData<(K, V)>,
}

impl<K: IndexKey, V: IndexValue, C: KeyComparator<K>> BPlusTree<K, V, C> {
    /// Creates an empty tree. `leaf_max_size` and `internal_max_size` count
    /// entries as configured by the caller; both must fit the page layout.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Self {
        assert!(leaf_max_size >= 2, "leaf_max_size must be at least 2");
        assert!(internal_max_size >= 2, "internal_max_size must be at least 2");
        assert!(
            leaf_max_size as usize <= LeafPage::<K, V>::capacity(),
            "leaf_max_size does not fit the page layout"
        );
        assert!(
            internal_max_size as usize + 1 <= InternalPage::<K>::capacity(),
            "internal_max_size does not fit the page layout"
        );
        Self {
            index_name: index_name.into(),
            root: RwLock::new(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size: leaf_max_size - 1,
            internal_max_size,
            _marker: PhantomData,
        }
    }

    /// Opens a tree whose root page id was previously persisted in the
    /// header-page directory under `index_name`. Falls back to the empty
    /// tree when no record exists.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let tree = Self::new(index_name, bpm, comparator, leaf_max_size, internal_max_size);
        let frame = tree.bpm.fetch_page(HEADER_PAGE_ID)?;
        let recorded = {
            let mut data = frame.write_data();
            HeaderPage::new(&mut data[..]).get_root_id(&tree.index_name)
        };
        tree.bpm.unpin_page(HEADER_PAGE_ID, false);
        if let Some(root_id) = recorded {
            *tree.root.write() = root_id;
        }
        Ok(tree)
    }

    /// Returns true if the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Current root page id (for inspection; INVALID when empty).
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Point lookup. Duplicate keys are unsupported, so at most one value
    /// can match.
    pub fn get_value<'t>(&'t self, key: &K, txn: &mut Transaction<'t>) -> Result<Option<V>> {
        let result = self.get_value_inner(key, txn);
        self.release_pages(txn, false);
        result
    }

    fn get_value_inner<'t>(&'t self, key: &K, txn: &mut Transaction<'t>) -> Result<Option<V>> {
        let Some(leaf_frame) = self.find_leaf(Some(key), AccessMode::Read, txn)? else {
            return Ok(None);
        };
        let data = leaf_frame.read_data();
        Ok(LeafPageRef::<K, V>::new(&data[..]).lookup(key, &self.comparator))
    }

    /// Inserts a key/value pair. Returns `Ok(false)` if the key already
    /// exists.
    pub fn insert<'t>(&'t self, key: &K, value: &V, txn: &mut Transaction<'t>) -> Result<bool> {
        let result = self.insert_inner(key, value, txn);
        self.release_pages(txn, true);
        result
    }

    fn insert_inner<'t>(&'t self, key: &K, value: &V, txn: &mut Transaction<'t>) -> Result<bool> {
        txn.acquire_root(&self.root, true);
        if !txn.root_page_id().is_valid() {
            self.start_new_tree(key, value, txn)?;
            return Ok(true);
        }
        self.insert_into_leaf(key, value, txn)
    }

    /// Removes a key if present. Absent keys are a silent no-op.
    pub fn remove<'t>(&'t self, key: &K, txn: &mut Transaction<'t>) -> Result<()> {
        let result = self.remove_inner(key, txn);
        self.release_pages(txn, true);
        result
    }

    fn remove_inner<'t>(&'t self, key: &K, txn: &mut Transaction<'t>) -> Result<()> {
        let Some(leaf_frame) = self.find_leaf(Some(key), AccessMode::Delete, txn)? else {
            return Ok(());
        };
        let (new_size, min_size) = {
            let mut data = leaf_frame.write_data();
            let new_size = {
                let mut leaf = LeafPage::<K, V>::new(&mut data[..]);
                leaf.remove_and_delete_record(key, &self.comparator)
            };
            (new_size, page::read_header(&data[..]).min_size() as usize)
        };
        if new_size < min_size {
            self.coalesce_or_redistribute(leaf_frame, txn)?;
        }
        Ok(())
    }

    /// Scans the whole tree in key order.
    pub fn iter<'t>(&'t self) -> Result<TreeIterator<'t, K, V>> {
        self.scan_from(None)
    }

    /// Scans forward from the first key `>= key`.
    pub fn iter_from<'t>(&'t self, key: &K) -> Result<TreeIterator<'t, K, V>> {
        self.scan_from(Some(key))
    }

    // -- descent ----------------------------------------------------------

    /// Whether a node can absorb the pending mutation without propagating
    /// to its parent.
    fn is_safe(&self, header: &NodeHeader, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Read => true,
            AccessMode::Insert => {
                if header.is_leaf() {
                    header.size < header.max_size.saturating_sub(1)
                } else {
                    header.size < header.max_size
                }
            }
            AccessMode::Delete => header.size > header.min_size(),
        }
    }

    /// Fetches and latches a page for the crabbing descent. When descending
    /// from `previous` onto a node that is safe (or on any read), every
    /// latch held so far — including the root-id latch — is released before
    /// the new page joins the transaction.
    fn crab_fetch<'t>(
        &'t self,
        page_id: PageId,
        mode: AccessMode,
        previous: Option<PageId>,
        txn: &mut Transaction<'t>,
    ) -> Result<&'t BufferFrame> {
        let frame = self.bpm.fetch_page(page_id)?;
        let latch = if mode.is_write() {
            PageLatch::Write(frame.latch().write())
        } else {
            PageLatch::Read(frame.latch().read())
        };
        if previous.is_some() {
            let header = page::read_header(&frame.read_data()[..]);
            if !mode.is_write() || self.is_safe(&header, mode) {
                self.release_pages(txn, mode.is_write());
            }
        }
        txn.add_page(page_id, frame, latch);
        Ok(frame)
    }

    /// Descends to the leaf responsible for `key` (the leftmost leaf when
    /// `key` is None). Returns None iff the tree is empty. The leaf's latch
    /// and every still-unsafe ancestor remain tracked in the transaction.
    fn find_leaf<'t>(
        &'t self,
        key: Option<&K>,
        mode: AccessMode,
        txn: &mut Transaction<'t>,
    ) -> Result<Option<&'t BufferFrame>> {
        debug_assert!(!txn.has_pages(), "descent started on a non-empty transaction");
        txn.acquire_root(&self.root, mode.is_write());
        let root_id = txn.root_page_id();
        if !root_id.is_valid() {
            return Ok(None);
        }

        let mut frame = self.crab_fetch(root_id, mode, None, txn)?;
        loop {
            let (is_leaf, current, child) = {
                let data = frame.read_data();
                let header = page::read_header(&data[..]);
                if header.is_leaf() {
                    (true, header.page_id, INVALID_PAGE_ID)
                } else {
                    let node = InternalPageRef::<K>::new(&data[..]);
                    let child = match key {
                        Some(k) => node.lookup(k, &self.comparator),
                        None => node.child_at(0),
                    };
                    (false, header.page_id, child)
                }
            };
            if is_leaf {
                return Ok(Some(frame));
            }
            frame = self.crab_fetch(child, mode, Some(current), txn)?;
        }
    }

    /// Releases everything the operation still holds: the root-id latch,
    /// then each tracked page in order (unlatch, unpin, and delete the ones
    /// scheduled for deletion).
    fn release_pages(&self, txn: &mut Transaction<'_>, write: bool) {
        txn.release_root();
        for page in txn.drain_pages() {
            let page_id = page.page_id;
            drop(page); // releases the latch
            self.bpm.unpin_page(page_id, write);
            if txn.take_deleted(page_id) {
                self.bpm.delete_page(page_id);
            }
        }
        debug_assert!(txn.deleted_is_empty(), "deleted page never released");
    }

    // -- insert -----------------------------------------------------------

    fn start_new_tree(&self, key: &K, value: &V, txn: &mut Transaction<'_>) -> Result<()> {
        let frame = self.bpm.new_page()?;
        let page_id = frame.page_id();
        {
            let mut data = frame.write_data();
            let mut leaf = LeafPage::<K, V>::new(&mut data[..]);
            leaf.init(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        txn.set_root_page_id(page_id);
        self.update_root_page_id(page_id, true)?;
        self.bpm.unpin_page(page_id, true);
        debug!(root = %page_id, "started new tree");
        Ok(())
    }

    fn insert_into_leaf<'t>(
        &'t self,
        key: &K,
        value: &V,
        txn: &mut Transaction<'t>,
    ) -> Result<bool> {
        let leaf_frame = self
            .find_leaf(Some(key), AccessMode::Insert, txn)?
            .expect("insert descent found no leaf under the held root latch");

        let (new_size, duplicate) = {
            let mut data = leaf_frame.write_data();
            let mut leaf = LeafPage::<K, V>::new(&mut data[..]);
            if leaf.lookup(key, &self.comparator).is_some() {
                (leaf.size(), true)
            } else {
                (leaf.insert(key, value, &self.comparator), false)
            }
        };
        if duplicate {
            return Ok(false);
        }
        if new_size == self.leaf_max_size as usize + 1 {
            self.split_leaf(leaf_frame, txn)?;
        }
        Ok(true)
    }

    fn split_leaf<'t>(&'t self, leaf_frame: &'t BufferFrame, txn: &mut Transaction<'t>) -> Result<()> {
        let new_frame = self.bpm.new_page()?;
        let new_page_id = new_frame.page_id();
        txn.add_page(
            new_page_id,
            new_frame,
            PageLatch::Write(new_frame.latch().write()),
        );

        let promoted = {
            let mut donor_data = leaf_frame.write_data();
            let mut recipient_data = new_frame.write_data();
            let mut donor = LeafPage::<K, V>::new(&mut donor_data[..]);
            let mut recipient = LeafPage::<K, V>::new(&mut recipient_data[..]);
            recipient.init(new_page_id, donor.parent_page_id(), self.leaf_max_size);
            donor.move_half_to(&mut recipient);
            recipient.key_at(0)
        };
        trace!(left = %leaf_frame.page_id(), right = %new_page_id, "split leaf");
        self.insert_into_parent(leaf_frame, promoted, new_frame, txn)
    }

    /// Hooks a freshly split-off sibling into the tree: either grows a new
    /// root or inserts the separator into the (still latched) parent,
    /// splitting it in turn when it overflows.
    fn insert_into_parent<'t>(
        &'t self,
        old_frame: &'t BufferFrame,
        key: K,
        new_frame: &'t BufferFrame,
        txn: &mut Transaction<'t>,
    ) -> Result<()> {
        let old_header = page::read_header(&old_frame.read_data()[..]);
        let new_page_id = new_frame.page_id();

        if old_header.is_root() {
            debug_assert!(txn.holds_root(), "root split without the root-id latch");
            let root_frame = self.bpm.new_page()?;
            let root_id = root_frame.page_id();
            {
                let mut data = root_frame.write_data();
                let mut root = InternalPage::<K>::new(&mut data[..]);
                root.init(root_id, INVALID_PAGE_ID, self.internal_max_size);
                root.populate_new_root(old_header.page_id, &key, new_page_id);
            }
            page::set_parent_page_id(&mut old_frame.write_data()[..], root_id);
            page::set_parent_page_id(&mut new_frame.write_data()[..], root_id);

            txn.set_root_page_id(root_id);
            self.update_root_page_id(root_id, false)?;
            self.bpm.unpin_page(root_id, true);
            debug!(root = %root_id, "root split, tree grew a level");
            return Ok(());
        }

        let parent_id = old_header.parent_page_id;
        let parent_frame = txn
            .find_frame(parent_id)
            .expect("parent must stay latched while a split can propagate");
        let parent_size = {
            let mut data = parent_frame.write_data();
            let mut parent = InternalPage::<K>::new(&mut data[..]);
            parent.insert_node_after(old_header.page_id, &key, new_page_id)
        };
        page::set_parent_page_id(&mut new_frame.write_data()[..], parent_id);

        if parent_size == self.internal_max_size as usize + 1 {
            let sibling_frame = self.bpm.new_page()?;
            let sibling_id = sibling_frame.page_id();
            txn.add_page(
                sibling_id,
                sibling_frame,
                PageLatch::Write(sibling_frame.latch().write()),
            );

            let promoted = {
                let mut donor_data = parent_frame.write_data();
                let mut recipient_data = sibling_frame.write_data();
                let mut donor = InternalPage::<K>::new(&mut donor_data[..]);
                let mut recipient = InternalPage::<K>::new(&mut recipient_data[..]);
                recipient.init(sibling_id, donor.parent_page_id(), self.internal_max_size);
                donor.move_half_to(&mut recipient, &self.bpm)?;
                recipient.key_at(0)
            };
            trace!(left = %parent_id, right = %sibling_id, "split internal node");
            self.insert_into_parent(parent_frame, promoted, sibling_frame, txn)?;
        }
        Ok(())
    }

    // -- delete -----------------------------------------------------------

    /// Restores the minimum-occupancy invariant of an underfull node by
    /// merging it with a sibling or borrowing a single entry.
    fn coalesce_or_redistribute<'t>(
        &'t self,
        frame: &'t BufferFrame,
        txn: &mut Transaction<'t>,
    ) -> Result<()> {
        let header = page::read_header(&frame.read_data()[..]);
        if header.is_root() {
            if self.adjust_root(frame, &header, txn)? {
                txn.mark_deleted(header.page_id);
            }
            return Ok(());
        }

        let parent_frame = txn
            .find_frame(header.parent_page_id)
            .expect("parent must stay latched while a merge can propagate");
        let (node_index, sibling_id) = {
            let data = parent_frame.read_data();
            let parent = InternalPageRef::<K>::new(&data[..]);
            let index = parent
                .child_index(header.page_id)
                .expect("underfull node missing from its parent");
            // Prefer the left sibling; the leftmost child borrows right.
            let sibling_index = if index == 0 { 1 } else { index - 1 };
            (index, parent.child_at(sibling_index))
        };
        let node_is_leftmost = node_index == 0;

        // The sibling joins the transaction through the crabbing fetch path
        // so it is unlatched and unpinned with everything else.
        let sibling_frame = self.crab_fetch(sibling_id, AccessMode::Delete, None, txn)?;
        let sibling_header = page::read_header(&sibling_frame.read_data()[..]);

        if header.size + sibling_header.size <= header.max_size {
            let (left_frame, right_frame) = if node_is_leftmost {
                (frame, sibling_frame)
            } else {
                (sibling_frame, frame)
            };
            self.coalesce(left_frame, right_frame, parent_frame, txn)
        } else {
            self.redistribute(sibling_frame, frame, node_is_leftmost, &header)
        }
    }

    /// Merges `right_frame` into `left_frame`, drops the separator from the
    /// parent, and rebalances the parent if it underflows in turn.
    fn coalesce<'t>(
        &'t self,
        left_frame: &'t BufferFrame,
        right_frame: &'t BufferFrame,
        parent_frame: &'t BufferFrame,
        txn: &mut Transaction<'t>,
    ) -> Result<()> {
        let right_id = right_frame.page_id();
        let (remove_index, middle_key) = {
            let data = parent_frame.read_data();
            let parent = InternalPageRef::<K>::new(&data[..]);
            let index = parent
                .child_index(right_id)
                .expect("merged node missing from its parent");
            (index, parent.key_at(index))
        };

        let merging_leaves = page::read_header(&left_frame.read_data()[..]).is_leaf();
        {
            let mut right_data = right_frame.write_data();
            let mut left_data = left_frame.write_data();
            if merging_leaves {
                let mut right = LeafPage::<K, V>::new(&mut right_data[..]);
                let mut left = LeafPage::<K, V>::new(&mut left_data[..]);
                right.move_all_to(&mut left);
            } else {
                let mut right = InternalPage::<K>::new(&mut right_data[..]);
                let mut left = InternalPage::<K>::new(&mut left_data[..]);
                right.move_all_to(&mut left, &middle_key, &self.bpm)?;
            }
        }
        txn.mark_deleted(right_id);
        trace!(left = %left_frame.page_id(), right = %right_id, "coalesced siblings");

        let (parent_size, parent_min) = {
            let mut data = parent_frame.write_data();
            InternalPage::<K>::new(&mut data[..]).remove(remove_index);
            let parent_header = page::read_header(&data[..]);
            (parent_header.size, parent_header.min_size())
        };
        // Underfull by the same definition the descent used: a parent at
        // exactly min_size was safe, so its own ancestors are already
        // unlatched and must not be touched.
        if parent_size < parent_min {
            self.coalesce_or_redistribute(parent_frame, txn)?;
        }
        Ok(())
    }

    /// Moves one entry from `sibling_frame` into `node_frame`. The page
    /// routines refresh the separator key in the shared parent.
    fn redistribute(
        &self,
        sibling_frame: &BufferFrame,
        node_frame: &BufferFrame,
        node_is_leftmost: bool,
        node_header: &NodeHeader,
    ) -> Result<()> {
        trace!(
            node = %node_frame.page_id(),
            sibling = %sibling_frame.page_id(),
            "redistributing one entry"
        );
        let mut sibling_data = sibling_frame.write_data();
        let mut node_data = node_frame.write_data();
        if node_header.is_leaf() {
            let mut sibling = LeafPage::<K, V>::new(&mut sibling_data[..]);
            let mut node = LeafPage::<K, V>::new(&mut node_data[..]);
            if node_is_leftmost {
                sibling.move_first_to_end_of(&mut node, &self.bpm)
            } else {
                sibling.move_last_to_front_of(&mut node, &self.bpm)
            }
        } else {
            let mut sibling = InternalPage::<K>::new(&mut sibling_data[..]);
            let mut node = InternalPage::<K>::new(&mut node_data[..]);
            if node_is_leftmost {
                sibling.move_first_to_end_of(&mut node, &self.bpm)
            } else {
                sibling.move_last_to_front_of(&mut node, &self.bpm)
            }
        }
    }

    /// Shrinks the tree when the root underflows: an empty root leaf ends
    /// the tree, an internal root with one child hands the root to it.
    /// Returns true when the old root page should be deleted.
    fn adjust_root<'t>(
        &'t self,
        root_frame: &'t BufferFrame,
        header: &NodeHeader,
        txn: &mut Transaction<'t>,
    ) -> Result<bool> {
        if header.is_leaf() {
            if header.size == 0 {
                txn.set_root_page_id(INVALID_PAGE_ID);
                self.update_root_page_id(INVALID_PAGE_ID, false)?;
                debug!("last entry removed, tree is empty");
                return Ok(true);
            }
            return Ok(false);
        }

        if header.size == 1 {
            let child = {
                let mut data = root_frame.write_data();
                InternalPage::<K>::new(&mut data[..]).remove_and_return_only_child()
            };
            txn.set_root_page_id(child);
            self.update_root_page_id(child, false)?;

            let child_frame = self.bpm.fetch_page(child)?;
            page::set_parent_page_id(&mut child_frame.write_data()[..], INVALID_PAGE_ID);
            self.bpm.unpin_page(child, true);
            debug!(root = %child, "root collapsed onto its only child");
            return Ok(true);
        }
        Ok(false)
    }

    // -- persistence ------------------------------------------------------

    /// Mirrors the root page id into the header-page directory. With
    /// `insert_record` a fresh record is created for this index name,
    /// otherwise the existing record is updated; either way a missing
    /// counterpart falls back to the other operation.
    fn update_root_page_id(&self, root_page_id: PageId, insert_record: bool) -> Result<()> {
        let frame = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut data = frame.write_data();
            let mut directory = HeaderPage::new(&mut data[..]);
            let updated = if insert_record {
                directory.insert_record(&self.index_name, root_page_id)
                    || directory.update_record(&self.index_name, root_page_id)
            } else {
                directory.update_record(&self.index_name, root_page_id)
                    || directory.insert_record(&self.index_name, root_page_id)
            };
            assert!(updated, "header page directory is full");
        }
        self.bpm.unpin_page(HEADER_PAGE_ID, true);
        Ok(())
    }

    // -- iteration --------------------------------------------------------

    fn scan_from<'t>(&'t self, key: Option<&K>) -> Result<TreeIterator<'t, K, V>> {
        let root_guard = self.root.read();
        let root_id = *root_guard;
        if !root_id.is_valid() {
            return Ok(TreeIterator::empty(&self.bpm));
        }

        let mut frame = self.bpm.fetch_page(root_id)?;
        let mut latch = frame.latch().read();
        loop {
            let child = {
                let data = frame.read_data();
                if page::read_header(&data[..]).is_leaf() {
                    break;
                }
                let node = InternalPageRef::<K>::new(&data[..]);
                match key {
                    Some(k) => node.lookup(k, &self.comparator),
                    None => node.child_at(0),
                }
            };
            let next_frame = match self.bpm.fetch_page(child) {
                Ok(f) => f,
                Err(e) => {
                    let current = frame.page_id();
                    drop(latch);
                    self.bpm.unpin_page(current, false);
                    return Err(e);
                }
            };
            let next_latch = next_frame.latch().read();
            let previous = frame.page_id();
            drop(latch);
            self.bpm.unpin_page(previous, false);
            frame = next_frame;
            latch = next_latch;
        }
        drop(root_guard);

        let index = {
            let data = frame.read_data();
            match key {
                Some(k) => LeafPageRef::<K, V>::new(&data[..]).key_index(k, &self.comparator),
                None => 0,
            }
        };
        Ok(TreeIterator::new(&self.bpm, frame, latch, index))
    }
}
