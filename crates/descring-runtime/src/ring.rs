//! Descriptor ring allocation
//!
//! Each core allocates only from its own ring, probing the slot under the
//! head cursor. A free slot is claimed and the cursor advances; otherwise
//! the allocator waits for that same slot, so reuse within a ring is FIFO
//! by position. There are two ways to wait:
//!
//! - the slot is completed and cached: only a reclamation pass is missing,
//!   so the allocator runs one (inline for its own core, on the listing
//!   core's worker otherwise) and re-probes. If that pass found nothing to
//!   retire, another pass already owns the slot and the allocator parks
//! - anything else: park on the slot until reclamation or a completion
//!   push wakes it
//!
//! Allocation never fails for lack of slots; it waits without timeout.

use descring_core::{ktrace, CoreId, DescResult, SlotStatus, Transition};

use crate::desc::{IoDesc, Slot};
use crate::parking::Parking;
use crate::reclaim::{reclaim_core, ReclaimMode};
use crate::stats::CoreStats;
use crate::system::CoreContext;
use crate::worker::{self, Job};

/// Why an allocator cannot take the slot under the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Park until the slot is freed; `kick` names a core whose pending
    /// reclamation would free it
    SlotFreed { kick: Option<CoreId> },
    /// Completed and cached on `core`'s list; a reclamation pass frees it
    NeedsReclaim(CoreId),
}

/// Result of probing one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    Free,
    Wait(WaitReason),
}

pub(crate) fn probe(slot: &Slot) -> Probe {
    match slot.flags().status() {
        SlotStatus::Free => Probe::Free,
        SlotStatus::InFlight => Probe::Wait(WaitReason::SlotFreed { kick: None }),
        SlotStatus::Completed => Probe::Wait(WaitReason::SlotFreed {
            kick: slot.listed_on(),
        }),
        SlotStatus::CompletedCached => match slot.listed_on() {
            Some(core) => Probe::Wait(WaitReason::NeedsReclaim(core)),
            // Not pushed yet; the push wakes us
            None => Probe::Wait(WaitReason::SlotFreed { kick: None }),
        },
    }
}

impl<'a> CoreContext<'a> {
    /// Take the next descriptor of this core's ring, sized for `nr_vecs`
    /// buffers
    ///
    /// Blocks until the slot under the cursor is free. Fails only if the
    /// buffer vector cannot be allocated; the slot then stays claimed and
    /// must be released with `release_on_submit_failure`.
    pub fn allocate(&self, nr_vecs: usize) -> DescResult<IoDesc<'a>> {
        let cs = self.core_state();

        loop {
            let mut head = cs.cursor.lock();
            let slot = &cs.slots[*head];
            // Taken before probing so a wake after the probe is not lost
            let token = slot.parking.prepare();

            let reason = match probe(slot) {
                Probe::Free => {
                    slot.must_transition(Transition::Claim);
                    *head = (*head + 1) % cs.slots.len();
                    drop(head);

                    CoreStats::bump(&cs.stats.allocations);
                    slot.reinit(nr_vecs)?;
                    return Ok(IoDesc::new(*self, slot));
                }
                Probe::Wait(reason) => reason,
            };
            drop(head);

            match reason {
                WaitReason::NeedsReclaim(core) => {
                    if self.reclaim(core) == 0 {
                        // Another pass holds the detached chain; its retire wakes us
                        CoreStats::bump(&cs.stats.parks);
                        ktrace!("{}: {} held by another pass", self.core(), slot.tag);
                        slot.parking.park(token, None);
                    }
                }
                WaitReason::SlotFreed { kick } => {
                    if let Some(core) = kick {
                        worker::kick(self.shared(), core);
                    }
                    CoreStats::bump(&cs.stats.parks);
                    ktrace!("{}: parking on {}", self.core(), slot.tag);
                    slot.parking.park(token, None);
                }
            }
        }
    }

    /// Run a reclamation pass for `core` and wait for it to finish
    ///
    /// The calling thread runs the pass itself for its own core; another
    /// core's pass is scheduled on that core's worker. Returns the number of
    /// descriptors the pass made reusable.
    pub fn reclaim(&self, core: CoreId) -> usize {
        let shared = self.shared();
        let stats = &self.core_state().stats;

        if core == self.core() {
            CoreStats::bump(&stats.reclaim_waits_inline);
            return reclaim_core(shared, core, ReclaimMode::Recycle);
        }

        CoreStats::bump(&stats.reclaim_waits_remote);
        match worker::schedule_on(shared, core, Job::Reclaim) {
            Ok(ticket) => ticket.wait(),
            Err(e) => {
                ktrace!("{}: {}; reclaiming inline", self.core(), e);
                reclaim_core(shared, core, ReclaimMode::Recycle)
            }
        }
    }
}
