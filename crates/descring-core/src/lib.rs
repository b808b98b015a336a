//! # descring-core
//!
//! Core types for the per-core I/O descriptor ring.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Page frames, parking, workers and the allocation engine live in
//! `descring-runtime`.
//!
//! ## Modules
//!
//! - `id` - Core, slot and device command identifiers, tag translation table
//! - `state` - Descriptor state flags and the transition function
//! - `error` - Error types
//! - `spinlock` - Short critical-section lock usable from completion context
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{CommandId, CoreId, SlotIndex, SlotTag, TagTable};
pub use state::{DescFlags, SlotStatus, Transition};
pub use error::{DescError, DescResult, MemoryError, StateError};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_opt};

/// Sizing constants
pub mod constants {
    /// Buffer entries stored inline in a descriptor before spilling to the heap
    pub const INLINE_VECS: usize = 4;

    /// Page size of pooled buffers (4 KB)
    pub const PAGE_SIZE: usize = 4096;

    /// Maximum number of cores (rings)
    pub const MAX_CORES: usize = 64;

    /// Addressable command identifiers of the device protocol.
    ///
    /// `ring_capacity * num_cores` may not exceed this.
    pub const TAG_SPACE: usize = 0x8000;
}
