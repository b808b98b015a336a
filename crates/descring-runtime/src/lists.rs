//! Deferred completion lists
//!
//! Completions are not reclaimed where they are observed. A descriptor
//! that completes on its owning core before reaching the page cache goes
//! to that core's bounded lazy list; everything else is pushed onto the
//! owner's final list, an intrusive LIFO chain threaded through the
//! slots' `final_next` links. Both are drained wholesale by a reclamation
//! pass.

use std::sync::atomic::Ordering;
use std::sync::{Mutex, PoisonError};

use descring_core::{kbug, CoreId, SlotIndex, SlotTag, SpinLock};

use crate::desc::Slot;

/// Link value marking the end of a final chain
pub(crate) const NO_LINK: u32 = u32::MAX;

#[inline]
pub(crate) fn encode_link(tag: Option<SlotTag>) -> u32 {
    match tag {
        Some(t) => ((t.core().as_u16() as u32) << 16) | t.index().as_usize() as u32,
        None => NO_LINK,
    }
}

#[inline]
pub(crate) fn decode_link(link: u32) -> Option<SlotTag> {
    if link == NO_LINK {
        return None;
    }
    Some(SlotTag::new(
        CoreId::new((link >> 16) as u16),
        SlotIndex::new(link as u16),
    ))
}

/// Bounded list of completions observed on the owning core
///
/// Two buffers of `capacity` entries trade places on every drain, so
/// neither pushing nor draining allocates.
pub(crate) struct LazyList {
    core: CoreId,
    capacity: usize,
    entries: SpinLock<Vec<SlotTag>>,
    /// Entries being retired; held for the whole pass
    batch: Mutex<Vec<SlotTag>>,
}

impl LazyList {
    pub(crate) fn new(core: CoreId, capacity: usize) -> Self {
        Self {
            core,
            capacity,
            entries: SpinLock::new(Vec::with_capacity(capacity)),
            batch: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append a completion, returning the new length
    ///
    /// Overflow is fatal: the list is sized to hold every slot of the ring.
    pub(crate) fn push(&self, tag: SlotTag) -> usize {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            kbug!(
                "lazy list of {} overflowed ({} entries) pushing {}",
                self.core,
                self.capacity,
                tag
            );
        }
        entries.push(tag);
        entries.len()
    }

    /// Detach every entry and run `f` on each, returning how many ran
    ///
    /// A concurrent drain waits until this one has finished its batch.
    pub(crate) fn drain_with(&self, mut f: impl FnMut(SlotTag)) -> usize {
        let mut batch = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        batch.clear();
        std::mem::swap(&mut *self.entries.lock(), &mut *batch);

        let n = batch.len();
        for tag in batch.drain(..) {
            f(tag);
        }
        n
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lock-protected LIFO chain of completions routed to the owning core
pub(crate) struct FinalList {
    head: SpinLock<Option<SlotTag>>,
}

impl FinalList {
    pub(crate) fn new() -> Self {
        Self {
            head: SpinLock::new(None),
        }
    }

    /// Push `slot` at the head
    pub(crate) fn push(&self, slot: &Slot) {
        let mut head = self.head.lock();
        slot.final_next
            .store(encode_link(*head), Ordering::Relaxed);
        *head = Some(slot.tag);
    }

    /// Detach the whole chain, returning its head
    ///
    /// The caller owns the detached chain and walks it with `final_next`.
    pub(crate) fn take(&self) -> Option<SlotTag> {
        self.head.lock().take()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.lock().is_none()
    }

    /// Walk the chain without detaching it
    pub(crate) fn len<'a>(&self, slot_of: impl Fn(SlotTag) -> &'a Slot) -> usize {
        let head = self.head.lock();
        let mut n = 0;
        let mut cur = *head;
        while let Some(tag) = cur {
            n += 1;
            cur = decode_link(slot_of(tag).final_next.load(Ordering::Relaxed));
        }
        n
    }
}
