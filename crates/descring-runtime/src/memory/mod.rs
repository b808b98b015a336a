//! Page frames backing I/O buffers
//!
//! A `PageFrame` owns one page-sized, page-aligned block of anonymous
//! memory plus the per-page bookkeeping the pools and the page cache need:
//! the logical file index, the device address recorded while the page
//! sits outside a descriptor, and a few state flags.
//!
//! Platform backends provide the raw allocation.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as backend;
    } else {
        mod fallback;
        use fallback as backend;
    }
}

use core::fmt;
use core::ptr::NonNull;

use descring_core::constants::PAGE_SIZE;
use descring_core::error::MemoryError;

use crate::collab::DmaAddr;

/// Page state bits
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(u8);

impl PageFlags {
    /// Contents are valid
    pub const UPTODATE: u8 = 1 << 0;
    /// Contents match the on-disk block
    pub const MAPPED_TO_DISK: u8 = 1 << 1;
    /// Page is locked for I/O
    pub const LOCKED: u8 = 1 << 2;
    /// Cache refused the page; it goes back to the pool
    pub const REUSE: u8 = 1 << 3;

    #[inline]
    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageFlags({:#06b})", self.0)
    }
}

/// One page of I/O buffer memory
pub struct PageFrame {
    ptr: NonNull<u8>,
    index: u64,
    dma: Option<DmaAddr>,
    flags: PageFlags,
}

// Safety: the frame exclusively owns its allocation
unsafe impl Send for PageFrame {}

impl PageFrame {
    /// Allocate a zeroed page
    pub fn alloc() -> Result<Self, MemoryError> {
        let ptr = backend::alloc_page()?;
        Ok(Self {
            ptr,
            index: 0,
            dma: None,
            flags: PageFlags::default(),
        })
    }

    /// Host address of the page
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: we own PAGE_SIZE bytes at ptr
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), PAGE_SIZE) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: we own PAGE_SIZE bytes at ptr, and &mut self is exclusive
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), PAGE_SIZE) }
    }

    /// Logical offset (in pages) of the data this page holds
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub fn set_index(&mut self, index: u64) {
        self.index = index;
    }

    /// Device address recorded on the page while it is not attached
    #[inline]
    pub fn dma(&self) -> Option<DmaAddr> {
        self.dma
    }

    /// Record a device address on the page
    #[inline]
    pub fn stash_dma(&mut self, addr: DmaAddr) {
        self.dma = Some(addr);
    }

    /// Remove and return the recorded device address
    #[inline]
    pub fn take_dma(&mut self) -> Option<DmaAddr> {
        self.dma.take()
    }

    #[inline]
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    #[inline]
    pub fn test_flag(&self, bit: u8) -> bool {
        self.flags.contains(bit)
    }

    #[inline]
    pub fn set_flag(&mut self, bit: u8) {
        self.flags.0 |= bit;
    }

    #[inline]
    pub fn clear_flag(&mut self, bit: u8) {
        self.flags.0 &= !bit;
    }

    /// Forget the I/O state a failed request left behind
    pub(crate) fn scrub(&mut self) {
        self.clear_flag(PageFlags::UPTODATE | PageFlags::MAPPED_TO_DISK | PageFlags::LOCKED);
        self.index = 0;
    }
}

impl Drop for PageFrame {
    fn drop(&mut self) {
        if backend::free_page(self.ptr).is_err() {
            descring_core::kerror!("page {:#x}: release failed", self.addr());
        }
    }
}

impl fmt::Debug for PageFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFrame")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("index", &self.index)
            .field("dma", &self.dma)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_aligned_and_zeroed() {
        let mut page = PageFrame::alloc().unwrap();
        assert_eq!(page.addr() % PAGE_SIZE, 0);
        assert!(page.as_slice().iter().all(|b| *b == 0));

        page.as_mut_slice()[PAGE_SIZE - 1] = 0xab;
        assert_eq!(page.as_slice()[PAGE_SIZE - 1], 0xab);
    }

    #[test]
    fn test_dma_stash_and_take() {
        let mut page = PageFrame::alloc().unwrap();
        assert_eq!(page.dma(), None);
        page.stash_dma(DmaAddr(0x1000));
        assert_eq!(page.take_dma(), Some(DmaAddr(0x1000)));
        assert_eq!(page.take_dma(), None);
    }

    #[test]
    fn test_scrub_keeps_reuse() {
        let mut page = PageFrame::alloc().unwrap();
        page.set_index(77);
        page.set_flag(PageFlags::UPTODATE | PageFlags::LOCKED | PageFlags::REUSE);
        page.scrub();
        assert_eq!(page.index(), 0);
        assert!(!page.test_flag(PageFlags::UPTODATE));
        assert!(!page.test_flag(PageFlags::LOCKED));
        assert!(page.test_flag(PageFlags::REUSE));
    }
}
