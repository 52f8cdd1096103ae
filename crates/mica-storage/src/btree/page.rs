//! On-page layouts for B+Tree nodes.
//!
//! Every node begins with a 24-byte common header:
//!
//! ```text
//! +----------------+ 0
//! | page_type: u32 | 4
//! | lsn: u32       | 8
//! | size: u32      | 12
//! | max_size: u32  | 16
//! | parent: u32    | 20
//! | page_id: u32   | 24
//! +----------------+
//! ```
//!
//! A leaf follows with `next_page_id: u32` and then the sorted array of
//! `(key, value)` slots. An internal page follows directly with the sorted
//! array of `(key, child_page_id)` slots; slot 0's key position mirrors the
//! separator stored for this node in its parent (the root, which has no
//! separator, keeps a default key there). The mirror is what lets the
//! single-entry redistribution routines read the separator locally.
//!
//! `size` may transiently reach `max_size + 1` between an insert and the
//! split it triggers, so the slot array is sized for `max_size + 1` entries.

use mica_buffer::BufferPoolManager;
use mica_common::error::Result;
use mica_common::page::{PageId, INVALID_PAGE_ID, PAGE_SIZE};
use mica_common::types::{IndexKey, IndexValue, KeyComparator};
use std::cmp::Ordering;
use std::marker::PhantomData;

pub(crate) const NODE_HEADER_SIZE: usize = 24;
const LEAF_ENTRIES_OFFSET: usize = NODE_HEADER_SIZE + 4;
const INTERNAL_ENTRIES_OFFSET: usize = NODE_HEADER_SIZE;

const OFF_PAGE_TYPE: usize = 0;
const OFF_LSN: usize = 4;
const OFF_SIZE: usize = 8;
const OFF_MAX_SIZE: usize = 12;
const OFF_PARENT: usize = 16;
const OFF_PAGE_ID: usize = 20;
const OFF_NEXT: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeType {
    Leaf,
    Internal,
}

impl NodeType {
    fn encode(self) -> u32 {
        match self {
            NodeType::Leaf => 1,
            NodeType::Internal => 2,
        }
    }

    fn decode(raw: u32) -> Self {
        match raw {
            1 => NodeType::Leaf,
            2 => NodeType::Internal,
            other => panic!("not a tree page (page_type = {other})"),
        }
    }
}

/// Decoded common header of a tree node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeHeader {
    pub page_type: NodeType,
    #[allow(dead_code)]
    pub lsn: u32,
    pub size: u32,
    pub max_size: u32,
    pub parent_page_id: PageId,
    pub page_id: PageId,
}

impl NodeHeader {
    pub fn is_leaf(&self) -> bool {
        self.page_type == NodeType::Leaf
    }

    pub fn is_root(&self) -> bool {
        !self.parent_page_id.is_valid()
    }

    /// Minimum occupancy of this node. The root's lower bound is one entry
    /// (leaf) or two children (internal); below that the tree shrinks.
    pub fn min_size(&self) -> u32 {
        if self.is_root() {
            return match self.page_type {
                NodeType::Leaf => 1,
                NodeType::Internal => 2,
            };
        }
        match self.page_type {
            NodeType::Leaf => (self.max_size + 1) / 2,
            NodeType::Internal => (self.max_size + 1) / 2 + 1,
        }
    }
}

fn get_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn put_u32(data: &mut [u8], off: usize, v: u32) {
    data[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

/// Reads the common header from a node page.
pub(crate) fn read_header(data: &[u8]) -> NodeHeader {
    NodeHeader {
        page_type: NodeType::decode(get_u32(data, OFF_PAGE_TYPE)),
        lsn: get_u32(data, OFF_LSN),
        size: get_u32(data, OFF_SIZE),
        max_size: get_u32(data, OFF_MAX_SIZE),
        parent_page_id: PageId(get_u32(data, OFF_PARENT)),
        page_id: PageId(get_u32(data, OFF_PAGE_ID)),
    }
}

/// Rewrites a node's parent pointer in place.
pub(crate) fn set_parent_page_id(data: &mut [u8], parent: PageId) {
    put_u32(data, OFF_PARENT, parent.0);
}

/// Fetches `child` and rebinds its parent pointer to `new_parent`.
///
/// The child is not latched: callers hold write latches on every node whose
/// children they move, so nothing can be descending into the child.
fn reparent_child(bpm: &BufferPoolManager, child: PageId, new_parent: PageId) -> Result<()> {
    let frame = bpm.fetch_page(child)?;
    set_parent_page_id(&mut frame.write_data()[..], new_parent);
    bpm.unpin_page(child, true);
    Ok(())
}

/// Rewrites the separator key stored for `child_id` in `parent_id`.
fn update_parent_separator<K: IndexKey>(
    bpm: &BufferPoolManager,
    parent_id: PageId,
    child_id: PageId,
    key: &K,
) -> Result<()> {
    let frame = bpm.fetch_page(parent_id)?;
    {
        let mut data = frame.write_data();
        let mut parent = InternalPage::<K>::new(&mut data[..]);
        let idx = parent
            .child_index(child_id)
            .expect("redistributed node missing from its parent");
        parent.set_key_at(idx, key);
    }
    bpm.unpin_page(parent_id, true);
    Ok(())
}

fn write_header(
    data: &mut [u8],
    page_type: NodeType,
    page_id: PageId,
    parent: PageId,
    max_size: u32,
) {
    put_u32(data, OFF_PAGE_TYPE, page_type.encode());
    put_u32(data, OFF_LSN, 0);
    put_u32(data, OFF_SIZE, 0);
    put_u32(data, OFF_MAX_SIZE, max_size);
    put_u32(data, OFF_PARENT, parent.0);
    put_u32(data, OFF_PAGE_ID, page_id.0);
}

// ---------------------------------------------------------------------------
// Internal pages
// ---------------------------------------------------------------------------

/// Mutable view over an internal node's bytes.
pub(crate) struct InternalPage<'a, K> {
    data: &'a mut [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalPage<'a, K> {
    const ENTRY_SIZE: usize = K::SIZE + 4;

    /// Number of `(key, child)` slots the layout can hold, including the
    /// transient overflow slot.
    pub fn capacity() -> usize {
        (PAGE_SIZE - INTERNAL_ENTRIES_OFFSET) / Self::ENTRY_SIZE
    }

    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(data.len() >= PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Formats a fresh internal node in place.
    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: u32) {
        assert!(
            max_size as usize + 1 <= Self::capacity(),
            "internal max_size {} exceeds page capacity {}",
            max_size,
            Self::capacity() - 1
        );
        write_header(self.data, NodeType::Internal, page_id, parent, max_size);
    }

    fn entry_offset(index: usize) -> usize {
        INTERNAL_ENTRIES_OFFSET + index * Self::ENTRY_SIZE
    }

    pub fn size(&self) -> usize {
        get_u32(self.data, OFF_SIZE) as usize
    }

    fn set_size(&mut self, size: usize) {
        put_u32(self.data, OFF_SIZE, size as u32);
    }

    pub fn max_size(&self) -> usize {
        get_u32(self.data, OFF_MAX_SIZE) as usize
    }

    pub fn page_id(&self) -> PageId {
        PageId(get_u32(self.data, OFF_PAGE_ID))
    }

    pub fn parent_page_id(&self) -> PageId {
        PageId(get_u32(self.data, OFF_PARENT))
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::read_from(&self.data[Self::entry_offset(index)..])
    }

    pub fn set_key_at(&mut self, index: usize, key: &K) {
        debug_assert!(index < self.size());
        key.write_to(&mut self.data[Self::entry_offset(index)..]);
    }

    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        PageId(get_u32(self.data, Self::entry_offset(index) + K::SIZE))
    }

    fn write_entry(&mut self, index: usize, key: &K, child: PageId) {
        let off = Self::entry_offset(index);
        key.write_to(&mut self.data[off..]);
        put_u32(self.data, off + K::SIZE, child.0);
    }

    /// Index of the slot whose child is `child`, if any.
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }

    /// Returns the child covering `key`: the last slot whose key compares
    /// `<= key`, ignoring slot 0's sentinel position.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        debug_assert!(self.size() > 1);
        let mut lo = 1;
        let mut hi = self.size() - 1;
        // Find the first slot whose key is > key; its left neighbor covers.
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(&self.key_at(mid), key) != Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid - 1;
            }
        }
        self.child_at(lo - 1)
    }

    /// Sets up a brand-new root after the old root split: slot 0 keeps the
    /// old root, slot 1 carries the promoted key and the new sibling.
    pub fn populate_new_root(&mut self, old_child: PageId, key: &K, new_child: PageId) {
        self.set_size(2);
        self.write_entry(0, &K::default(), old_child);
        self.write_entry(1, key, new_child);
    }

    /// Inserts `(key, new_child)` immediately after the slot holding
    /// `old_child`. Returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &K, new_child: PageId) -> usize {
        let idx = self
            .child_index(old_child)
            .expect("split child missing from its parent")
            + 1;
        let size = self.size();
        self.data.copy_within(
            Self::entry_offset(idx)..Self::entry_offset(size),
            Self::entry_offset(idx) + Self::ENTRY_SIZE,
        );
        self.write_entry(idx, key, new_child);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes the slot at `index`, keeping the array dense.
    pub fn remove(&mut self, index: usize) {
        let size = self.size();
        debug_assert!(index < size);
        self.data.copy_within(
            Self::entry_offset(index + 1)..Self::entry_offset(size),
            Self::entry_offset(index),
        );
        self.set_size(size - 1);
    }

    /// Collapses a single-child root: returns the child and empties the node.
    pub fn remove_and_return_only_child(&mut self) -> PageId {
        debug_assert_eq!(self.size(), 1);
        let child = self.child_at(0);
        self.set_size(0);
        child
    }

    /// Moves the upper half of a full node (`max_size + 1` entries) into the
    /// freshly initialised `recipient`, adopting the moved children. For odd
    /// totals the larger half lands on the recipient.
    pub fn move_half_to(
        &mut self,
        recipient: &mut InternalPage<'_, K>,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let total = self.max_size() + 1;
        debug_assert_eq!(self.size(), total);
        let copy_idx = total / 2;
        let moved = total - copy_idx;

        recipient.data[Self::entry_offset(0)..Self::entry_offset(moved)]
            .copy_from_slice(&self.data[Self::entry_offset(copy_idx)..Self::entry_offset(total)]);
        recipient.set_size(moved);
        self.set_size(copy_idx);

        let new_parent = recipient.page_id();
        for i in 0..moved {
            reparent_child(bpm, recipient.child_at(i), new_parent)?;
        }
        Ok(())
    }

    /// Appends every entry to `recipient` during a merge. `middle_key` (the
    /// separator from the parent) replaces the sentinel key of the first
    /// moved slot. Moved children are adopted by the recipient.
    pub fn move_all_to(
        &mut self,
        recipient: &mut InternalPage<'_, K>,
        middle_key: &K,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let start = recipient.size();
        let moved = self.size();
        debug_assert!(start + moved <= recipient.max_size());

        recipient.data[Self::entry_offset(start)..Self::entry_offset(start + moved)]
            .copy_from_slice(&self.data[Self::entry_offset(0)..Self::entry_offset(moved)]);
        recipient.set_size(start + moved);
        recipient.set_key_at(start, middle_key);
        self.set_size(0);

        let new_parent = recipient.page_id();
        for i in start..start + moved {
            reparent_child(bpm, recipient.child_at(i), new_parent)?;
        }
        Ok(())
    }

    /// Moves this node's first entry to the end of its left sibling
    /// `recipient` and refreshes the separator the parent keeps for this
    /// node. Slot 0's key mirrors that separator, so the moved entry carries
    /// exactly the key the recipient needs.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut InternalPage<'_, K>,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let moved_key = self.key_at(0);
        let moved_child = self.child_at(0);
        let size = self.size();
        self.data.copy_within(
            Self::entry_offset(1)..Self::entry_offset(size),
            Self::entry_offset(0),
        );
        self.set_size(size - 1);

        recipient.copy_last_from(&moved_key, moved_child, bpm)?;

        let new_separator = self.key_at(0);
        update_parent_separator(bpm, self.parent_page_id(), self.page_id(), &new_separator)
    }

    fn copy_last_from(&mut self, key: &K, child: PageId, bpm: &BufferPoolManager) -> Result<()> {
        let size = self.size();
        debug_assert!(size < self.max_size() + 1);
        self.write_entry(size, key, child);
        self.set_size(size + 1);
        reparent_child(bpm, child, self.page_id())
    }

    /// Moves this node's last entry to the front of its right sibling
    /// `recipient` and refreshes the separator the parent keeps for the
    /// recipient.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut InternalPage<'_, K>,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let size = self.size();
        let key = self.key_at(size - 1);
        let child = self.child_at(size - 1);
        self.set_size(size - 1);
        recipient.copy_first_from(&key, child, bpm)
    }

    fn copy_first_from(&mut self, key: &K, child: PageId, bpm: &BufferPoolManager) -> Result<()> {
        let size = self.size();
        debug_assert!(size < self.max_size() + 1);
        self.data.copy_within(
            Self::entry_offset(0)..Self::entry_offset(size),
            Self::entry_offset(1),
        );
        self.set_size(size + 1);
        self.write_entry(0, key, child);

        reparent_child(bpm, child, self.page_id())?;
        update_parent_separator(bpm, self.parent_page_id(), self.page_id(), key)
    }
}

/// Read-only view over an internal node's bytes.
pub(crate) struct InternalPageRef<'a, K> {
    data: &'a [u8],
    _marker: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalPageRef<'a, K> {
    const ENTRY_SIZE: usize = K::SIZE + 4;

    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(data.len() >= PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn entry_offset(index: usize) -> usize {
        INTERNAL_ENTRIES_OFFSET + index * Self::ENTRY_SIZE
    }

    pub fn size(&self) -> usize {
        get_u32(self.data, OFF_SIZE) as usize
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::read_from(&self.data[Self::entry_offset(index)..])
    }

    pub fn child_at(&self, index: usize) -> PageId {
        debug_assert!(index < self.size());
        PageId(get_u32(self.data, Self::entry_offset(index) + K::SIZE))
    }

    /// Index of the slot whose child is `child`, if any.
    pub fn child_index(&self, child: PageId) -> Option<usize> {
        (0..self.size()).find(|&i| self.child_at(i) == child)
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> PageId {
        debug_assert!(self.size() > 1);
        let mut lo = 1;
        let mut hi = self.size() - 1;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(&self.key_at(mid), key) != Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid - 1;
            }
        }
        self.child_at(lo - 1)
    }
}

// ---------------------------------------------------------------------------
// Leaf pages
// ---------------------------------------------------------------------------

/// Mutable view over a leaf node's bytes.
pub(crate) struct LeafPage<'a, K, V> {
    data: &'a mut [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> LeafPage<'a, K, V> {
    const ENTRY_SIZE: usize = K::SIZE + V::SIZE;

    /// Number of `(key, value)` slots the layout can hold, including the
    /// transient overflow slot.
    pub fn capacity() -> usize {
        (PAGE_SIZE - LEAF_ENTRIES_OFFSET) / Self::ENTRY_SIZE
    }

    pub fn new(data: &'a mut [u8]) -> Self {
        debug_assert!(data.len() >= PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    /// Formats a fresh leaf in place.
    pub fn init(&mut self, page_id: PageId, parent: PageId, max_size: u32) {
        assert!(
            max_size as usize + 1 <= Self::capacity(),
            "leaf max_size {} exceeds page capacity {}",
            max_size,
            Self::capacity() - 1
        );
        write_header(self.data, NodeType::Leaf, page_id, parent, max_size);
        put_u32(self.data, OFF_NEXT, INVALID_PAGE_ID.0);
    }

    fn entry_offset(index: usize) -> usize {
        LEAF_ENTRIES_OFFSET + index * Self::ENTRY_SIZE
    }

    pub fn size(&self) -> usize {
        get_u32(self.data, OFF_SIZE) as usize
    }

    fn set_size(&mut self, size: usize) {
        put_u32(self.data, OFF_SIZE, size as u32);
    }

    pub fn max_size(&self) -> usize {
        get_u32(self.data, OFF_MAX_SIZE) as usize
    }

    pub fn page_id(&self) -> PageId {
        PageId(get_u32(self.data, OFF_PAGE_ID))
    }

    pub fn parent_page_id(&self) -> PageId {
        PageId(get_u32(self.data, OFF_PARENT))
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(get_u32(self.data, OFF_NEXT))
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        put_u32(self.data, OFF_NEXT, next.0);
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::read_from(&self.data[Self::entry_offset(index)..])
    }

    pub fn item(&self, index: usize) -> (K, V) {
        debug_assert!(index < self.size());
        let off = Self::entry_offset(index);
        (
            K::read_from(&self.data[off..]),
            V::read_from(&self.data[off + K::SIZE..]),
        )
    }

    fn write_entry(&mut self, index: usize, key: &K, value: &V) {
        let off = Self::entry_offset(index);
        key.write_to(&mut self.data[off..]);
        value.write_to(&mut self.data[off + K::SIZE..]);
    }

    /// First index whose key compares `>= key`; `size()` if none does.
    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(&self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Point lookup.
    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        let idx = self.key_index(key, comparator);
        if idx < self.size() && comparator.compare(&self.key_at(idx), key) == Ordering::Equal {
            Some(self.item(idx).1)
        } else {
            None
        }
    }

    /// Sorted insert; the caller has already ruled out duplicates. Returns
    /// the new size.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: &K, value: &V, comparator: &C) -> usize {
        let idx = self.key_index(key, comparator);
        let size = self.size();
        self.data.copy_within(
            Self::entry_offset(idx)..Self::entry_offset(size),
            Self::entry_offset(idx) + Self::ENTRY_SIZE,
        );
        self.write_entry(idx, key, value);
        self.set_size(size + 1);
        size + 1
    }

    /// Removes `key` if present. Returns the size after the operation.
    pub fn remove_and_delete_record<C: KeyComparator<K>>(
        &mut self,
        key: &K,
        comparator: &C,
    ) -> usize {
        let idx = self.key_index(key, comparator);
        let size = self.size();
        if idx >= size || comparator.compare(&self.key_at(idx), key) != Ordering::Equal {
            return size;
        }
        self.data.copy_within(
            Self::entry_offset(idx + 1)..Self::entry_offset(size),
            Self::entry_offset(idx),
        );
        self.set_size(size - 1);
        size - 1
    }

    /// Moves the upper half of a full leaf (`max_size + 1` entries) into the
    /// freshly initialised `recipient` and links it into the sibling chain.
    /// For odd totals the larger half lands on the recipient.
    pub fn move_half_to(&mut self, recipient: &mut LeafPage<'_, K, V>) {
        let total = self.max_size() + 1;
        debug_assert_eq!(self.size(), total);
        let copy_idx = total / 2;
        let moved = total - copy_idx;

        recipient.data[Self::entry_offset(0)..Self::entry_offset(moved)]
            .copy_from_slice(&self.data[Self::entry_offset(copy_idx)..Self::entry_offset(total)]);
        recipient.set_size(moved);
        self.set_size(copy_idx);

        recipient.set_next_page_id(self.next_page_id());
        self.set_next_page_id(recipient.page_id());
    }

    /// Appends every entry to the left sibling `recipient` during a merge
    /// and unlinks this leaf from the sibling chain. Leaves are fully keyed,
    /// so no separator needs to be spliced in.
    pub fn move_all_to(&mut self, recipient: &mut LeafPage<'_, K, V>) {
        let start = recipient.size();
        let moved = self.size();
        debug_assert!(start + moved <= recipient.max_size());

        recipient.data[Self::entry_offset(start)..Self::entry_offset(start + moved)]
            .copy_from_slice(&self.data[Self::entry_offset(0)..Self::entry_offset(moved)]);
        recipient.set_size(start + moved);
        recipient.set_next_page_id(self.next_page_id());
        self.set_size(0);
    }

    /// Moves this leaf's first entry to the end of its left sibling
    /// `recipient` and refreshes the separator the parent keeps for this
    /// leaf.
    pub fn move_first_to_end_of(
        &mut self,
        recipient: &mut LeafPage<'_, K, V>,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let (key, value) = self.item(0);
        let size = self.size();
        self.data.copy_within(
            Self::entry_offset(1)..Self::entry_offset(size),
            Self::entry_offset(0),
        );
        self.set_size(size - 1);

        recipient.copy_last_from(&key, &value);

        let new_separator = self.key_at(0);
        update_parent_separator(bpm, self.parent_page_id(), self.page_id(), &new_separator)
    }

    fn copy_last_from(&mut self, key: &K, value: &V) {
        let size = self.size();
        debug_assert!(size < self.max_size() + 1);
        self.write_entry(size, key, value);
        self.set_size(size + 1);
    }

    /// Moves this leaf's last entry to the front of its right sibling
    /// `recipient` and refreshes the separator the parent keeps for the
    /// recipient.
    pub fn move_last_to_front_of(
        &mut self,
        recipient: &mut LeafPage<'_, K, V>,
        bpm: &BufferPoolManager,
    ) -> Result<()> {
        let size = self.size();
        let (key, value) = self.item(size - 1);
        self.set_size(size - 1);

        recipient.copy_first_from(&key, &value);

        update_parent_separator(bpm, recipient.parent_page_id(), recipient.page_id(), &key)
    }

    fn copy_first_from(&mut self, key: &K, value: &V) {
        let size = self.size();
        debug_assert!(size < self.max_size() + 1);
        self.data.copy_within(
            Self::entry_offset(0)..Self::entry_offset(size),
            Self::entry_offset(1),
        );
        self.set_size(size + 1);
        self.write_entry(0, key, value);
    }
}

/// Read-only view over a leaf node's bytes.
pub(crate) struct LeafPageRef<'a, K, V> {
    data: &'a [u8],
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> LeafPageRef<'a, K, V> {
    const ENTRY_SIZE: usize = K::SIZE + V::SIZE;

    pub fn new(data: &'a [u8]) -> Self {
        debug_assert!(data.len() >= PAGE_SIZE);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn entry_offset(index: usize) -> usize {
        LEAF_ENTRIES_OFFSET + index * Self::ENTRY_SIZE
    }

    pub fn size(&self) -> usize {
        get_u32(self.data, OFF_SIZE) as usize
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(get_u32(self.data, OFF_NEXT))
    }

    pub fn key_at(&self, index: usize) -> K {
        debug_assert!(index < self.size());
        K::read_from(&self.data[Self::entry_offset(index)..])
    }

    pub fn item(&self, index: usize) -> (K, V) {
        debug_assert!(index < self.size());
        let off = Self::entry_offset(index);
        (
            K::read_from(&self.data[off..]),
            V::read_from(&self.data[off + K::SIZE..]),
        )
    }

    pub fn key_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        let mut lo = 0;
        let mut hi = self.size();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if comparator.compare(&self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn lookup<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> Option<V> {
        let idx = self.key_index(key, comparator);
        if idx < self.size() && comparator.compare(&self.key_at(idx), key) == Ordering::Equal {
            Some(self.item(idx).1)
        } else {
            None
        }
    }
}
