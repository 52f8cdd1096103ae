//! Forward scan over the leaf chain.

use super::page::LeafPageRef;
use mica_buffer::{BufferFrame, BufferPoolManager};
use mica_common::types::{IndexKey, IndexValue};
use parking_lot::RwLockReadGuard;
use std::marker::PhantomData;

/// Iterator over `(key, value)` pairs in key order.
///
/// Holds a shared latch and a pin on the current leaf; advancing past a
/// leaf's last entry releases it before latching the next leaf in the
/// sibling chain, so a scan never holds two leaf latches at once.
pub struct TreeIterator<'a, K, V> {
    bpm: &'a BufferPoolManager,
    frame: Option<&'a BufferFrame>,
    latch: Option<RwLockReadGuard<'a, ()>>,
    index: usize,
    _marker: PhantomData<(K, V)>,
}

impl<'a, K: IndexKey, V: IndexValue> TreeIterator<'a, K, V> {
    pub(crate) fn new(
        bpm: &'a BufferPoolManager,
        frame: &'a BufferFrame,
        latch: RwLockReadGuard<'a, ()>,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            frame: Some(frame),
            latch: Some(latch),
            index,
            _marker: PhantomData,
        }
    }

    pub(crate) fn empty(bpm: &'a BufferPoolManager) -> Self {
        Self {
            bpm,
            frame: None,
            latch: None,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// True when no leaf is held or the position has run past the current
    /// leaf's last entry.
    pub fn is_end(&self) -> bool {
        match self.frame {
            None => true,
            Some(frame) => {
                let data = frame.read_data();
                self.index >= LeafPageRef::<K, V>::new(&data[..]).size()
            }
        }
    }

    fn release_current(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.latch = None;
            self.bpm.unpin_page(frame.page_id(), false);
        }
    }
}

impl<'a, K: IndexKey, V: IndexValue> Iterator for TreeIterator<'a, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let frame = self.frame?;
            let (size, next_id) = {
                let data = frame.read_data();
                let leaf = LeafPageRef::<K, V>::new(&data[..]);
                (leaf.size(), leaf.next_page_id())
            };

            if self.index < size {
                let item = {
                    let data = frame.read_data();
                    LeafPageRef::<K, V>::new(&data[..]).item(self.index)
                };
                self.index += 1;
                return Some(item);
            }

            // Off the end of this leaf: release it, then follow the chain.
            self.release_current();
            if !next_id.is_valid() {
                return None;
            }
            let Ok(next_frame) = self.bpm.fetch_page(next_id) else {
                return None;
            };
            let next_latch = next_frame.latch().read();
            self.frame = Some(next_frame);
            self.latch = Some(next_latch);
            self.index = 0;
        }
    }
}

impl<'a, K, V> Drop for TreeIterator<'a, K, V> {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            self.latch = None;
            self.bpm.unpin_page(frame.page_id(), false);
        }
    }
}
