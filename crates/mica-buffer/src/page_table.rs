//! Page table mapping resident page ids to frame ids.

use crate::frame::FrameId;
use mica_common::page::PageId;
use std::collections::HashMap;

/// Map from page id to the frame holding it.
///
/// Mutated only while the buffer pool latch is held, so the table itself
/// needs no synchronization. At most one frame per page id.
pub struct PageTable {
    map: HashMap<PageId, FrameId>,
}

impl PageTable {
    /// Creates a table sized for the pool's frame count.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }

    /// Looks up the frame holding `page_id`.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.map.get(&page_id).copied()
    }

    /// Installs a mapping, replacing any previous one for this page id.
    #[inline]
    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) {
        self.map.insert(page_id, frame_id);
    }

    /// Removes a mapping, returning the frame it pointed at.
    #[inline]
    pub fn remove(&mut self, page_id: PageId) -> Option<FrameId> {
        self.map.remove(&page_id)
    }

    /// Returns true if the page is resident.
    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.map.contains_key(&page_id)
    }

    /// Number of resident pages.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no page is resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over all `(page_id, frame_id)` entries.
    pub fn iter(&self) -> impl Iterator<Item = (PageId, FrameId)> + '_ {
        self.map.iter().map(|(&p, &f)| (p, f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut table = PageTable::new(8);
        table.insert(PageId(5), FrameId(2));

        assert_eq!(table.get(PageId(5)), Some(FrameId(2)));
        assert!(table.contains(PageId(5)));
        assert_eq!(table.len(), 1);

        assert_eq!(table.remove(PageId(5)), Some(FrameId(2)));
        assert!(table.is_empty());
        assert_eq!(table.remove(PageId(5)), None);
    }

    #[test]
    fn test_insert_replaces_existing() {
        let mut table = PageTable::new(8);
        table.insert(PageId(1), FrameId(0));
        table.insert(PageId(1), FrameId(3));

        assert_eq!(table.get(PageId(1)), Some(FrameId(3)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_iter() {
        let mut table = PageTable::new(8);
        table.insert(PageId(1), FrameId(0));
        table.insert(PageId(2), FrameId(1));

        let mut entries: Vec<_> = table.iter().collect();
        entries.sort();
        assert_eq!(entries, vec![(PageId(1), FrameId(0)), (PageId(2), FrameId(1))]);
    }
}
