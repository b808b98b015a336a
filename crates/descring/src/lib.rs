//! # descring - Per-core I/O descriptor rings
//!
//! Allocation, completion and reclamation of block-I/O request
//! descriptors for a multi-core host talking to a storage device.
//!
//! ## Features
//!
//! - **Per-core rings**: each core allocates only from its own fixed ring;
//!   an allocator that finds the next slot busy waits for that same slot
//! - **Pre-mapped buffer pools**: pages keep their device address across
//!   reuse, so a recycled buffer is never mapped twice
//! - **Deferred reclamation**: completions are queued on a lazy
//!   (same core) or final (cross core) list and stripped in batches by a
//!   per-core worker thread or by a blocked allocator
//! - **Cache hand-off**: completed read buffers can move into a page cache
//!   instead of returning to the pool
//! - **Error path**: a chain refused by the device releases every buffer
//!   back to the pool in one batch
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use descring::prelude::*;
//!
//! let sys = DescSystem::init(DescConfig::from_env(), Arc::new(HostMapper::new()))?;
//! let ctx = sys.context(0);
//!
//! let desc = ctx.allocate(4)?;
//! desc.set_sector(2048);
//! desc.fill_from_pool(4, 0);
//! let tag = desc.into_tag();
//!
//! // ... the device completes the request ...
//! ctx.end_io(tag, IoStatus::Ok);
//!
//! sys.shutdown();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Block layer / driver                    │
//! │        allocate(), fill_from_pool(), submit(), end_io()     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Per-core descriptor rings                   │
//! │      slot state flags, blocking reuse, parked allocators    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │ Lazy list │      │Final list │      │  Reclaim  │
//!    │ same core │      │cross core │      │  worker   │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │             Per-core read / write page pools            │
//!    │        pages mapped once, device address stashed        │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use descring_core::{
    CommandId,
    CoreId,
    DescError,
    DescFlags,
    DescResult,
    MemoryError,
    SlotIndex,
    SlotStatus,
    SlotTag,
    StateError,
    TagTable,
    Transition,
};
pub use descring_core::constants;

// Re-export the logging macros
pub use descring_core::{kerror, kwarn, kinfo, kdebug, ktrace, kbug};
pub use descring_core::kprint::{LogLevel, init as init_logging, set_log_level};

// Re-export env utilities
pub use descring_core::{env_get, env_get_bool, env_get_opt};

// Re-export runtime types
pub use descring_runtime::{
    AttachError,
    AttachFailure,
    CacheInsertError,
    CacheRejection,
    CacheReport,
    ConfigError,
    CoreContext,
    DescConfig,
    DescSystem,
    DescVec,
    DeviceMapper,
    Disposition,
    DmaAddr,
    EndIo,
    HostMapper,
    IoDesc,
    IoStatus,
    IoSubmitter,
    JobTicket,
    MapDirection,
    PageCache,
    PageFlags,
    PageFrame,
    StatsSnapshot,
    WaitReason,
};

/// Items most users need
pub mod prelude {
    pub use crate::{
        CoreContext, CoreId, DescConfig, DescError, DescResult, DescSystem, DeviceMapper,
        HostMapper, IoDesc, IoStatus, IoSubmitter, PageCache, PageFrame, SlotTag,
    };
}

/// Bring up a system with configuration taken from `DESCRING_*` environment
/// variables
pub fn init_from_env(mapper: std::sync::Arc<dyn DeviceMapper>) -> DescResult<DescSystem> {
    DescSystem::init(DescConfig::from_env(), mapper)
}
