//! Completion handling
//!
//! The device path reports a finished transfer in two steps, both safe
//! from notification context (no parking, no unmapping):
//!
//! - `mark_completed` records the outcome, sets `completed` and runs the
//!   descriptor's callback
//! - `push_completion` routes the descriptor onto a completion list
//!
//! A descriptor owned by the calling core and not yet cached goes to the
//! local lazy list. Anything else (completed on another core, or already
//! handed to the page cache) goes to the owner's final list.

use descring_core::{kbug, ktrace, SlotTag, Transition};

use crate::desc::IoStatus;
use crate::stats::CoreStats;
use crate::system::{CoreContext, DescSystem};
use crate::worker;

impl DescSystem {
    /// Record the device's verdict and run the completion callback
    ///
    /// Fatal unless the descriptor is busy and not yet completed.
    pub fn mark_completed(&self, tag: SlotTag, status: IoStatus) {
        let slot = self.shared().slot(tag);
        let end_io = {
            let mut body = slot.body.lock();
            body.status = status;
            body.end_io.take()
        };

        slot.must_transition(Transition::Complete);

        if let Some(end_io) = end_io {
            end_io(tag, status);
        }
    }

    /// Outcome recorded at completion
    pub fn io_status(&self, tag: SlotTag) -> IoStatus {
        self.shared().slot(tag).body.lock().status
    }
}

impl<'a> CoreContext<'a> {
    /// Queue a completed descriptor for deferred reclamation
    pub fn push_completion(&self, tag: SlotTag) {
        let shared = self.shared();
        let slot = shared.slot(tag);
        let flags = slot.flags();

        if !flags.is_busy() || !flags.is_completed() {
            kbug!("{}: completion pushed in state {:?}", tag, flags);
        }
        if let Some(core) = slot.listed_on() {
            kbug!("{}: already on a completion list of {}", tag, core);
        }

        let local = self.core_state();
        if !flags.is_cached() && tag.core() == self.core() {
            slot.set_listed_on(self.core());
            let len = local.lazy.push(tag);
            CoreStats::bump(&local.stats.lazy_pushes);
            ktrace!("{}: lazy completion ({} pending)", tag, len);

            if len >= shared.config.lazy_kick_threshold {
                worker::kick(shared, self.core());
            }
        } else {
            let owner = tag.core();
            slot.set_listed_on(owner);
            shared.core(owner).finals.push(slot);
            CoreStats::bump(&local.stats.final_pushes);
            ktrace!("{}: final completion from {}", tag, self.core());
        }

        // Parked allocators re-probe: the slot may now be reclaimable
        slot.wake_waiters();
    }

    /// Mark completed and queue for reclamation in one step
    pub fn end_io(&self, tag: SlotTag, status: IoStatus) {
        self.system().mark_completed(tag, status);
        self.push_completion(tag);
    }
}
