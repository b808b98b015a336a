//! Per-core pools of pre-mapped pages
//!
//! Pages in a pool carry their device address recorded on the page itself,
//! so attaching one to a descriptor needs no mapping call. Each core owns a
//! read pool and a write pool; the read pool feeds inbound transfers and the
//! write pool outbound ones.

use std::collections::LinkedList;

use crate::memory::PageFrame;

/// LIFO list of mapped pages
///
/// Batches are spliced in with a constant-time append.
#[derive(Debug, Default)]
pub struct PagePool {
    pages: LinkedList<PageFrame>,
}

impl PagePool {
    pub const fn new() -> Self {
        Self {
            pages: LinkedList::new(),
        }
    }

    /// Take the most recently returned page
    #[inline]
    pub fn take(&mut self) -> Option<PageFrame> {
        self.pages.pop_back()
    }

    /// Return one page
    #[inline]
    pub fn put(&mut self, page: PageFrame) {
        self.pages.push_back(page);
    }

    /// Splice a batch of pages into the pool
    #[inline]
    pub fn return_many(&mut self, batch: &mut LinkedList<PageFrame>) {
        self.pages.append(batch);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Remove every page
    pub fn drain(&mut self) -> LinkedList<PageFrame> {
        std::mem::take(&mut self.pages)
    }
}

/// The read and write pools of one core
#[derive(Debug, Default)]
pub struct CorePools {
    pub read: PagePool,
    pub write: PagePool,
}

impl CorePools {
    pub const fn new() -> Self {
        Self {
            read: PagePool::new(),
            write: PagePool::new(),
        }
    }

    /// Pool serving transfers in the given direction
    #[inline]
    pub fn for_write(&mut self, is_write: bool) -> &mut PagePool {
        if is_write {
            &mut self.write
        } else {
            &mut self.read
        }
    }

    /// Total pages across both pools
    #[inline]
    pub fn len(&self) -> usize {
        self.read.len() + self.write.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
