//! Descriptor identity
//!
//! A descriptor is named by the pair (core, slot index) for its whole
//! lifetime. The device protocol wants a flat command identifier instead;
//! `TagTable` translates between the two.

use core::fmt;

use crate::constants::TAG_SPACE;

/// Identifier of an execution core (one ring, one pair of pools, one worker)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CoreId(u16);

impl CoreId {
    /// Sentinel for "no core"
    pub const NONE: CoreId = CoreId(u16::MAX);

    #[inline]
    pub const fn new(id: u16) -> Self {
        CoreId(id)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Get as usize for indexing
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u16::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<CoreId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<usize> for CoreId {
    #[inline]
    fn from(id: usize) -> Self {
        debug_assert!(id < u16::MAX as usize);
        CoreId(id as u16)
    }
}

impl fmt::Debug for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "CoreId(NONE)")
        } else {
            write!(f, "CoreId({})", self.0)
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Position of a descriptor inside its core's ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SlotIndex(u16);

impl SlotIndex {
    #[inline]
    pub const fn new(index: u16) -> Self {
        SlotIndex(index)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Stable identity of one descriptor slot: owning core plus ring position
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTag {
    core: CoreId,
    index: SlotIndex,
}

impl SlotTag {
    #[inline]
    pub const fn new(core: CoreId, index: SlotIndex) -> Self {
        SlotTag { core, index }
    }

    /// The core whose ring this slot belongs to
    #[inline]
    pub const fn core(self) -> CoreId {
        self.core
    }

    #[inline]
    pub const fn index(self) -> SlotIndex {
        self.index
    }
}

impl fmt::Debug for SlotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotTag({}:{})", self.core.0, self.index.0)
    }
}

impl fmt::Display for SlotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.core, self.index.0)
    }
}

/// Flat identifier the device protocol uses to name an in-flight command
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct CommandId(u16);

impl CommandId {
    #[inline]
    pub const fn new(id: u16) -> Self {
        CommandId(id)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Translation between slot tags and device command identifiers
///
/// Command identifiers are assigned ring by ring: core 0 gets
/// `0..capacity`, core 1 the next block, and so on. Reverse translation
/// is a table lookup.
pub struct TagTable {
    ring_capacity: usize,
    num_cores: usize,
    by_command: Box<[SlotTag]>,
}

impl TagTable {
    /// Build the table for `num_cores` rings of `ring_capacity` slots.
    ///
    /// # Panics
    ///
    /// If the slots do not fit in the device's command identifier space.
    pub fn new(num_cores: usize, ring_capacity: usize) -> Self {
        let total = num_cores
            .checked_mul(ring_capacity)
            .unwrap_or(usize::MAX);
        assert!(
            total <= TAG_SPACE,
            "{} cores x {} slots exceeds the command tag space ({})",
            num_cores,
            ring_capacity,
            TAG_SPACE
        );

        let mut by_command = Vec::with_capacity(total);
        for core in 0..num_cores {
            for index in 0..ring_capacity {
                by_command.push(SlotTag::new(
                    CoreId::new(core as u16),
                    SlotIndex::new(index as u16),
                ));
            }
        }

        Self {
            ring_capacity,
            num_cores,
            by_command: by_command.into_boxed_slice(),
        }
    }

    /// Number of slots across all rings
    #[inline]
    pub fn len(&self) -> usize {
        self.by_command.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_command.is_empty()
    }

    #[inline]
    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    #[inline]
    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    /// Position of a slot in the flat slot array (and its command id)
    #[inline]
    pub fn flat_index(&self, tag: SlotTag) -> usize {
        debug_assert!(tag.core.as_usize() < self.num_cores);
        debug_assert!(tag.index.as_usize() < self.ring_capacity);
        tag.core.as_usize() * self.ring_capacity + tag.index.as_usize()
    }

    /// Device command identifier for a slot
    #[inline]
    pub fn command_id(&self, tag: SlotTag) -> CommandId {
        CommandId(self.flat_index(tag) as u16)
    }

    /// Slot named by a device command identifier
    #[inline]
    pub fn lookup(&self, id: CommandId) -> Option<SlotTag> {
        self.by_command.get(id.0 as usize).copied()
    }

    /// Tag at `index` of `core`'s ring
    #[inline]
    pub fn slot(&self, core: CoreId, index: usize) -> SlotTag {
        debug_assert!(index < self.ring_capacity);
        SlotTag::new(core, SlotIndex::new(index as u16))
    }
}
