//! Descriptor state flags and transitions
//!
//! A descriptor's state is a small set of orthogonal flags. Every change
//! goes through [`DescFlags::apply`], which rejects the combinations the
//! reuse protocol forbids: `completed` without `busy`, `cached` without
//! `completed`, releasing a slot that is not held, and so on.

use core::fmt;

/// Descriptor flag set
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct DescFlags(u8);

impl DescFlags {
    /// Outbound transfer (device reads host memory)
    pub const WRITE: u8 = 1 << 0;
    /// Slot is owned; set by allocation, cleared by reclamation
    pub const BUSY: u8 = 1 << 1;
    /// Device confirmed the transfer
    pub const COMPLETED: u8 = 1 << 2;
    /// Buffers were handed to the external page cache
    pub const CACHED: u8 = 1 << 3;
    /// Force-unit-access write
    pub const FUA: u8 = 1 << 4;

    const ALL: u8 = Self::WRITE | Self::BUSY | Self::COMPLETED | Self::CACHED | Self::FUA;

    /// Free slot
    pub const EMPTY: DescFlags = DescFlags(0);

    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        DescFlags(bits & Self::ALL)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_write(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    #[inline]
    pub const fn is_busy(self) -> bool {
        self.0 & Self::BUSY != 0
    }

    #[inline]
    pub const fn is_completed(self) -> bool {
        self.0 & Self::COMPLETED != 0
    }

    #[inline]
    pub const fn is_cached(self) -> bool {
        self.0 & Self::CACHED != 0
    }

    #[inline]
    pub const fn is_fua(self) -> bool {
        self.0 & Self::FUA != 0
    }

    /// Classify for the allocator
    #[inline]
    pub const fn status(self) -> SlotStatus {
        match (self.is_busy(), self.is_completed(), self.is_cached()) {
            (false, _, _) => SlotStatus::Free,
            (true, false, _) => SlotStatus::InFlight,
            (true, true, false) => SlotStatus::Completed,
            (true, true, true) => SlotStatus::CompletedCached,
        }
    }

    /// Apply a transition, returning the new flag set.
    ///
    /// Fails without side effects when the transition is illegal from
    /// the current state.
    pub fn apply(self, t: Transition) -> Result<DescFlags, StateError> {
        let reject = Err(StateError { from: self, transition: t });
        let bits = self.0;

        match t {
            Transition::Claim => {
                if self.is_busy() {
                    return reject;
                }
                // Reinitialised in place: nothing survives a reuse
                Ok(DescFlags(Self::BUSY))
            }
            Transition::MarkWrite | Transition::MarkFua => {
                if !self.is_busy() || self.is_completed() {
                    return reject;
                }
                let bit = if t == Transition::MarkWrite { Self::WRITE } else { Self::FUA };
                Ok(DescFlags(bits | bit))
            }
            Transition::Complete => {
                if !self.is_busy() || self.is_completed() {
                    return reject;
                }
                Ok(DescFlags(bits | Self::COMPLETED))
            }
            Transition::Cache => {
                if !self.is_busy() || !self.is_completed() || self.is_cached() {
                    return reject;
                }
                Ok(DescFlags(bits | Self::CACHED))
            }
            Transition::Reclaim => {
                if !self.is_busy() || !self.is_completed() {
                    return reject;
                }
                Ok(DescFlags(bits & !Self::BUSY))
            }
            Transition::AbortRelease => {
                if !self.is_busy() || self.is_completed() || self.is_cached() {
                    return reject;
                }
                Ok(DescFlags(bits & !Self::BUSY))
            }
        }
    }
}

impl fmt::Debug for DescFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.is_write() {
            set.entry(&"WRITE");
        }
        if self.is_busy() {
            set.entry(&"BUSY");
        }
        if self.is_completed() {
            set.entry(&"COMPLETED");
        }
        if self.is_cached() {
            set.entry(&"CACHED");
        }
        if self.is_fua() {
            set.entry(&"FUA");
        }
        set.finish()
    }
}

/// State changes a descriptor goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Allocation takes a free slot
    Claim,
    /// Request is an outbound transfer
    MarkWrite,
    /// Request carries force-unit-access
    MarkFua,
    /// Device confirmed the transfer
    Complete,
    /// Buffers handed to the page cache (only after `Complete`)
    Cache,
    /// Reclamation stripped the buffers; slot becomes reusable
    Reclaim,
    /// Error path: never reached the device
    AbortRelease,
}

/// What the allocator sees when it probes a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Not busy, may be claimed
    Free,
    /// Owned, transfer not confirmed yet
    InFlight,
    /// Transfer confirmed, buffers still with this subsystem
    Completed,
    /// Transfer confirmed and handed to the cache; only reclamation is missing
    CompletedCached,
}

impl SlotStatus {
    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self, SlotStatus::Free)
    }
}

/// Illegal state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateError {
    pub from: DescFlags,
    pub transition: Transition,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal transition {:?} from {:?}", self.transition, self.from)
    }
}

impl std::error::Error for StateError {}
