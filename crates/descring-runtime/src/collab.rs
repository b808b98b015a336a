//! External collaborators of the descriptor system
//!
//! The allocator never talks to hardware or to a filesystem directly.
//! Device address translation, the page cache, and request submission are
//! reached through the traits below, so a driver plugs in its own and tests
//! plug in fakes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::memory::PageFrame;

/// Device-visible address of a mapped page
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DmaAddr(pub u64);

impl DmaAddr {
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DmaAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DmaAddr({:#x})", self.0)
    }
}

/// Transfer direction a page is mapped for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapDirection {
    /// Device writes into the page (reads)
    FromDevice,
    /// Device reads from the page (writes)
    ToDevice,
}

impl MapDirection {
    #[inline]
    pub fn for_write(is_write: bool) -> Self {
        if is_write {
            MapDirection::ToDevice
        } else {
            MapDirection::FromDevice
        }
    }
}

/// Translates pages into device addresses
pub trait DeviceMapper: Send + Sync {
    /// Map a page for device access; `Err` carries an errno-style code
    fn map(&self, page: &PageFrame, dir: MapDirection) -> Result<DmaAddr, i32>;

    /// Release a mapping created by `map`
    fn unmap(&self, addr: DmaAddr, dir: MapDirection);
}

/// Why the page cache refused a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRejection {
    /// A page already exists at that index
    AlreadyPresent,
    /// Any other failure (errno-style code)
    Other(i32),
}

/// A page handed back by a failed cache insertion
pub struct CacheInsertError {
    pub page: PageFrame,
    pub reason: CacheRejection,
}

impl fmt::Debug for CacheInsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheInsertError")
            .field("index", &self.page.index())
            .field("reason", &self.reason)
            .finish()
    }
}

/// Page cache that can take ownership of filled pages
pub trait PageCache: Send + Sync {
    /// Insert `page` at `index`; on failure the page comes back to the caller
    fn insert(&self, index: u64, page: PageFrame) -> Result<(), CacheInsertError>;
}

/// Submits a descriptor chain to the device
pub trait IoSubmitter {
    /// Submit the chain headed by `head`; `Err` carries an errno-style code
    fn submit(&self, head: descring_core::SlotTag) -> Result<(), i32>;
}

/// Identity mapper: the device address is the host address
///
/// Suitable for tests and for devices that share the host address space.
#[derive(Debug, Default)]
pub struct HostMapper {
    maps: AtomicU64,
    unmaps: AtomicU64,
}

impl HostMapper {
    pub const fn new() -> Self {
        Self {
            maps: AtomicU64::new(0),
            unmaps: AtomicU64::new(0),
        }
    }

    /// Mappings created so far
    pub fn maps(&self) -> u64 {
        self.maps.load(Ordering::Relaxed)
    }

    /// Mappings released so far
    pub fn unmaps(&self) -> u64 {
        self.unmaps.load(Ordering::Relaxed)
    }

    /// Mappings currently outstanding
    pub fn live(&self) -> u64 {
        self.maps().saturating_sub(self.unmaps())
    }
}

impl DeviceMapper for HostMapper {
    fn map(&self, page: &PageFrame, _dir: MapDirection) -> Result<DmaAddr, i32> {
        self.maps.fetch_add(1, Ordering::Relaxed);
        Ok(DmaAddr(page.addr() as u64))
    }

    fn unmap(&self, _addr: DmaAddr, _dir: MapDirection) {
        self.unmaps.fetch_add(1, Ordering::Relaxed);
    }
}
