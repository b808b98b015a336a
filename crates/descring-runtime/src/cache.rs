//! Page-cache hand-off
//!
//! Once a read chain has completed, its pages can be inserted into a page
//! cache instead of being recycled. Each page the cache accepts leaves the
//! descriptor for good; a page the cache already has comes back marked
//! `REUSE` and returns to the pool at reclamation; any other refusal is
//! logged and the page is unmapped and freed at reclamation.

use descring_core::{kdebug, kerror, SlotTag, Transition};

use crate::collab::{CacheInsertError, CacheRejection, PageCache};
use crate::desc::Disposition;
use crate::memory::PageFlags;
use crate::stats::CoreStats;
use crate::system::CoreContext;

/// Per-call summary of a cache hand-off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheReport {
    /// Descriptors marked cached
    pub descriptors: usize,
    /// Descriptors skipped (not completed, freed, or already cached)
    pub skipped: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub errors: usize,
}

impl<'a> CoreContext<'a> {
    /// Insert every page of the chain headed by `head` into `cache`
    ///
    /// Descriptors that are not busy and completed, or that were already
    /// handed off, are skipped. The cached transition is recorded while the
    /// descriptor is still locked, after every page has been dealt with.
    pub fn hand_off_to_cache(&self, cache: &dyn PageCache, head: SlotTag) -> CacheReport {
        let shared = self.shared();
        let stats = &self.core_state().stats;
        let mut report = CacheReport::default();

        let mut cur = Some(head);
        while let Some(tag) = cur {
            let slot = shared.slot(tag);
            let mut body = slot.body.lock();
            cur = body.chain_next;

            let flags = slot.flags();
            if !flags.is_busy() || !flags.is_completed() || flags.is_cached() {
                report.skipped += 1;
                continue;
            }

            for v in body.vecs.iter_mut() {
                if v.disposition != Disposition::Pool {
                    continue;
                }
                let Some(mut page) = v.page.take() else {
                    continue;
                };

                page.stash_dma(v.dma);
                let index = page.index();
                match cache.insert(index, page) {
                    Ok(()) => {
                        v.disposition = Disposition::Cache;
                        report.inserted += 1;
                    }
                    Err(CacheInsertError { mut page, reason }) => {
                        page.take_dma();
                        match reason {
                            CacheRejection::AlreadyPresent => {
                                kdebug!("{}: page {} already cached", tag, index);
                                page.set_flag(PageFlags::REUSE);
                                report.already_present += 1;
                            }
                            CacheRejection::Other(code) => {
                                kerror!(
                                    "{}: page cache insertion of {} failed: {}",
                                    tag,
                                    index,
                                    code
                                );
                                v.disposition = Disposition::Discard;
                                report.errors += 1;
                            }
                        }
                        v.page = Some(page);
                    }
                }
            }

            slot.must_transition(Transition::Cache);
            drop(body);
            slot.wake_waiters();
            report.descriptors += 1;
        }

        // Accepted pages belong to the cache now
        shared.pages_left(report.inserted);
        CoreStats::add(&stats.cache_inserted, report.inserted as u64);
        CoreStats::add(&stats.cache_already_present, report.already_present as u64);
        CoreStats::add(&stats.cache_errors, report.errors as u64);
        report
    }
}
