//! Reclamation and error-path release
//!
//! A reclamation pass detaches both completion lists of one core and
//! retires every descriptor on them: each buffer goes where its
//! disposition says, and only then is the slot's busy bit cleared and its
//! waiters woken. The error path does the same for a chain that never
//! reached the device, returning every buffer to the pool in one batch.

use std::collections::LinkedList;
use std::sync::atomic::Ordering;

use smallvec::SmallVec;

use descring_core::{kbug, kdebug, kerror, kinfo};
use descring_core::{CoreId, DescError, DescResult, SlotTag, Transition};

use crate::collab::{IoSubmitter, MapDirection};
use crate::desc::{DescVec, Disposition, Slot};
use crate::lists::{decode_link, NO_LINK};
use crate::memory::{PageFlags, PageFrame};
use crate::stats::CoreStats;
use crate::system::{CoreContext, CoreState, Shared};

/// What happens to buffers still owned by the descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReclaimMode {
    /// Pool buffers go back to the pool
    Recycle,
    /// Every buffer is unmapped and freed
    Teardown,
}

/// Retire every descriptor on `core`'s lazy and final lists
///
/// Returns the number of descriptors made reusable. Passes over the same
/// core's lazy list run one at a time.
pub(crate) fn reclaim_core(shared: &Shared, core: CoreId, mode: ReclaimMode) -> usize {
    let cs = shared.core(core);
    let mut reclaimed = cs
        .lazy
        .drain_with(|tag| retire(shared, cs, shared.slot(tag), mode));
    reclaimed += retire_chain(shared, core, cs.finals.take(), mode);

    if reclaimed > 0 {
        kdebug!("{}: reclaimed {} descriptors ({:?})", core, reclaimed, mode);
    }
    reclaimed
}

/// Retire a final chain already detached from `core`'s list
pub(crate) fn retire_chain(
    shared: &Shared,
    core: CoreId,
    head: Option<SlotTag>,
    mode: ReclaimMode,
) -> usize {
    let cs = shared.core(core);
    let mut retired = 0;
    let mut cur = head;
    while let Some(tag) = cur {
        let slot = shared.slot(tag);
        // Read the link before the slot can be reused and pushed again
        cur = decode_link(slot.final_next.swap(NO_LINK, Ordering::Relaxed));
        retire(shared, cs, slot, mode);
        retired += 1;
    }
    retired
}

/// Strip one completed descriptor and make its slot reusable
fn retire(shared: &Shared, cs: &CoreState, slot: &Slot, mode: ReclaimMode) {
    let is_write = slot.flags().is_write();
    let dir = MapDirection::for_write(is_write);
    let mut recycled = LinkedList::new();
    let mut unmapped = 0usize;

    let scratch = {
        let mut body = slot.body.lock();
        for DescVec {
            page,
            dma,
            disposition,
        } in body.vecs.drain(..)
        {
            match (page, disposition, mode) {
                (None, _, _) | (Some(_), Disposition::Cache, _) => {}
                (Some(mut page), Disposition::Pool, ReclaimMode::Recycle) => {
                    page.scrub();
                    page.clear_flag(PageFlags::REUSE);
                    page.stash_dma(dma);
                    recycled.push_back(page);
                }
                (Some(page), _, _) => {
                    shared.mapper.unmap(dma, dir);
                    drop(page);
                    unmapped += 1;
                }
            }
        }
        body.shrink_vecs();
        body.scratch.take()
    };
    // Dropped outside the body lock
    drop(scratch);

    let n = recycled.len() as u64;
    if n > 0 {
        cs.pools
            .with(|pools| pools.for_write(is_write).return_many(&mut recycled));
    }
    if unmapped > 0 {
        shared.pages_left(unmapped);
    }
    CoreStats::add(&cs.stats.pages_recycled, n);
    CoreStats::add(&cs.stats.pages_unmapped, unmapped as u64);

    slot.clear_listed();
    // Busy is cleared last: the slot is free only once its buffers are gone
    slot.must_transition(Transition::Reclaim);
    CoreStats::bump(&cs.stats.reclaimed);
    slot.wake_waiters();
}

/// Unmap and free every page in `core`'s pools
pub(crate) fn free_pools(shared: &Shared, core: CoreId) -> usize {
    let cs = shared.core(core);
    let (read, write) = cs.pools.with(|pools| (pools.read.drain(), pools.write.drain()));
    let mut freed = 0;

    for (pages, dir) in [
        (read, MapDirection::FromDevice),
        (write, MapDirection::ToDevice),
    ] {
        for mut page in pages {
            match page.take_dma() {
                Some(dma) => shared.mapper.unmap(dma, dir),
                None => kerror!("{}: pool page {:#x} has no device address", core, page.addr()),
            }
            freed += 1;
        }
    }

    shared.pages_left(freed);
    CoreStats::add(&cs.stats.pages_unmapped, freed as u64);
    kinfo!("{}: freed {} pool pages", core, freed);
    freed
}

impl<'a> CoreContext<'a> {
    /// Release a chain that failed before reaching the device
    ///
    /// Every buffer of every descriptor in the chain goes back to this
    /// core's pools in one batch, keeping its device address; then each
    /// slot is freed. A descriptor that is not busy, or is already
    /// completed or cached, is a fatal error: this includes releasing the
    /// same chain twice.
    pub fn release_on_submit_failure(&self, head: SlotTag) {
        let shared = self.shared();
        let cs = self.core_state();
        let mut chain: SmallVec<[SlotTag; 8]> = SmallVec::new();
        let mut read: LinkedList<PageFrame> = LinkedList::new();
        let mut write: LinkedList<PageFrame> = LinkedList::new();

        let mut cur = Some(head);
        while let Some(tag) = cur {
            let slot = shared.slot(tag);
            let flags = slot.flags();
            if let Err(e) = flags.apply(Transition::AbortRelease) {
                kbug!("{}: error-path release: {}", tag, e);
            }
            kerror!("{}: releasing unsubmitted descriptor", tag);

            let mut body = slot.body.lock();
            for v in body.vecs.drain(..) {
                if let Some(mut page) = v.page {
                    page.scrub();
                    page.stash_dma(v.dma);
                    if flags.is_write() {
                        write.push_back(page);
                    } else {
                        read.push_back(page);
                    }
                }
            }
            body.shrink_vecs();
            cur = body.chain_next.take();
            let scratch = body.scratch.take();
            drop(body);
            drop(scratch);

            chain.push(tag);
        }

        let pages = read.len() + write.len();
        cs.pools.with(|pools| {
            pools.read.return_many(&mut read);
            pools.write.return_many(&mut write);
        });

        for &tag in &chain {
            let slot = shared.slot(tag);
            slot.must_transition(Transition::AbortRelease);
            slot.wake_waiters();
        }

        CoreStats::bump(&cs.stats.submit_failures);
        kerror!(
            "{}: released {} unsubmitted descriptors, {} pages back to the pool",
            self.core(),
            chain.len(),
            pages
        );
    }

    /// Hand a chain to the device; on refusal release it through the error path
    pub fn submit(&self, submitter: &dyn IoSubmitter, head: SlotTag) -> DescResult<()> {
        match submitter.submit(head) {
            Ok(()) => Ok(()),
            Err(code) => {
                self.release_on_submit_failure(head);
                Err(DescError::SubmitFailed(code))
            }
        }
    }
}
