//! Error types for the descriptor ring

use core::fmt;

use crate::id::{CoreId, SlotTag};
pub use crate::state::StateError;

/// Result type for descriptor ring operations
pub type DescResult<T> = Result<T, DescError>;

/// Errors reported to the caller.
///
/// Invariant violations are not represented here: they abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescError {
    /// Heap storage for more than the inline buffer entries could not be
    /// allocated. The slot stays claimed; release it through the error path.
    VecAllocFailed { tag: SlotTag, requested: usize },

    /// A page could not obtain a device-visible address
    MapFailed(i32),

    /// Page allocation or release failed
    MemoryError(MemoryError),

    /// Configuration rejected at bootstrap
    InvalidConfig(&'static str),

    /// The reclamation worker of a core is stopped or its queue is full
    WorkerUnavailable(CoreId),

    /// The device submission collaborator refused the chain
    SubmitFailed(i32),
}

impl fmt::Display for DescError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescError::VecAllocFailed { tag, requested } => {
                write!(f, "cannot allocate {} buffer entries for {}", requested, tag)
            }
            DescError::MapFailed(code) => write!(f, "device mapping failed: {}", code),
            DescError::MemoryError(e) => write!(f, "memory error: {}", e),
            DescError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            DescError::WorkerUnavailable(core) => {
                write!(f, "reclamation worker for {} unavailable", core)
            }
            DescError::SubmitFailed(code) => write!(f, "submission failed: {}", code),
        }
    }
}

impl std::error::Error for DescError {}

/// Page memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// mmap or the allocator returned nothing
    AllocationFailed,

    /// munmap failed
    ReleaseFailed,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AllocationFailed => write!(f, "page allocation failed"),
            MemoryError::ReleaseFailed => write!(f, "page release failed"),
        }
    }
}

impl From<MemoryError> for DescError {
    fn from(e: MemoryError) -> Self {
        DescError::MemoryError(e)
    }
}
