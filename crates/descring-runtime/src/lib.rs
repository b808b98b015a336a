//! # descring-runtime
//!
//! Platform code and the allocation engine for the per-core descriptor
//! rings.
//!
//! This crate provides:
//! - Page frames backing I/O buffers (mmap / global allocator)
//! - Parking primitives (futex on Linux, Condvar elsewhere)
//! - Per-core pre-mapped buffer pools
//! - Descriptor ring allocation with blocking reuse
//! - Lazy and final completion lists, reclamation, page-cache hand-off
//! - Per-core reclamation worker threads
//! - Bootstrap and teardown (`DescSystem`), per-core handles (`CoreContext`)

pub mod cache;
pub mod collab;
pub mod config;
pub mod desc;
pub mod memory;
pub mod parking;
pub mod pool;
pub mod stats;
pub mod system;

mod completion;
mod lists;
mod reclaim;
mod ring;
mod worker;

#[cfg(test)]
mod scenarios;

// Re-exports
pub use cache::CacheReport;
pub use collab::{
    CacheInsertError, CacheRejection, DeviceMapper, DmaAddr, HostMapper, IoSubmitter,
    MapDirection, PageCache,
};
pub use config::{ConfigError, DescConfig};
pub use desc::{AttachError, AttachFailure, DescVec, Disposition, EndIo, IoDesc, IoStatus};
pub use memory::{PageFlags, PageFrame};
pub use parking::{ParkToken, Parking, PlatformParking};
pub use pool::PagePool;
pub use ring::WaitReason;
pub use stats::StatsSnapshot;
pub use system::{CoreContext, DescSystem};
pub use worker::JobTicket;
