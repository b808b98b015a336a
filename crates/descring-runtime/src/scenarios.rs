//! End-to-end behaviour of the descriptor system across allocation,
//! completion, reclamation, cache hand-off, error release and teardown.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use descring_core::{CoreId, DescError, SlotStatus, SlotTag};

use crate::collab::{
    CacheInsertError, CacheRejection, DeviceMapper, DmaAddr, HostMapper, IoSubmitter,
    MapDirection, PageCache,
};
use crate::config::DescConfig;
use crate::desc::{AttachFailure, Disposition, IoStatus};
use crate::memory::{PageFlags, PageFrame};
use crate::reclaim::{retire_chain, ReclaimMode};
use crate::system::DescSystem;

const CORE0: CoreId = CoreId::new(0);
const CORE1: CoreId = CoreId::new(1);

fn config(cores: usize, ring: usize, pool_pages: usize) -> DescConfig {
    DescConfig::new()
        .num_cores(cores)
        .ring_capacity(ring)
        .lazy_capacity(ring)
        .read_pool_pages(pool_pages)
        .write_pool_pages(pool_pages)
        .lazy_kick_threshold(usize::MAX)
        // Keep idle workers out of the way unless a test kicks them
        .worker_park_timeout(Duration::from_secs(60))
}

fn system(cores: usize, ring: usize, pool_pages: usize) -> DescSystem {
    DescSystem::init(config(cores, ring, pool_pages), Arc::new(HostMapper::new())).unwrap()
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

fn assert_conserved(sys: &DescSystem) {
    assert_eq!(
        sys.free_pages() + sys.attached_pages(),
        sys.circulating_pages()
    );
}

/// Clears its tag from the live set when the slot is retired
struct LiveMark {
    tag: SlotTag,
    live: Arc<Mutex<HashSet<SlotTag>>>,
    lost: Arc<AtomicUsize>,
}

impl Drop for LiveMark {
    fn drop(&mut self) {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        if !live.remove(&self.tag) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Page cache keyed by index
#[derive(Default)]
struct MapCache {
    pages: Mutex<HashMap<u64, PageFrame>>,
    fail_with: Option<i32>,
}

impl PageCache for MapCache {
    fn insert(&self, index: u64, page: PageFrame) -> Result<(), CacheInsertError> {
        if let Some(code) = self.fail_with {
            return Err(CacheInsertError {
                page,
                reason: CacheRejection::Other(code),
            });
        }
        let mut pages = self.pages.lock().unwrap();
        if pages.contains_key(&index) {
            return Err(CacheInsertError {
                page,
                reason: CacheRejection::AlreadyPresent,
            });
        }
        pages.insert(index, page);
        Ok(())
    }
}

struct RefusingSubmitter(i32);

impl IoSubmitter for RefusingSubmitter {
    fn submit(&self, _head: SlotTag) -> Result<(), i32> {
        Err(self.0)
    }
}

/// Fails every mapping while `failing` is set
#[derive(Default)]
struct SwitchMapper {
    failing: AtomicBool,
    inner: HostMapper,
}

impl DeviceMapper for SwitchMapper {
    fn map(&self, page: &PageFrame, dir: MapDirection) -> Result<DmaAddr, i32> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(-12);
        }
        self.inner.map(page, dir)
    }

    fn unmap(&self, addr: DmaAddr, dir: MapDirection) {
        self.inner.unmap(addr, dir)
    }
}

#[test]
fn test_blocked_allocation_reuses_first_slot() {
    let sys = system(1, 4, 8);
    let ctx = sys.context(0);

    let tags: Vec<SlotTag> = (0..4)
        .map(|_| {
            let desc = ctx.allocate(1).unwrap();
            assert_eq!(desc.fill_from_pool(1, 0), 1);
            desc.into_tag()
        })
        .collect();
    let distinct: HashSet<_> = tags.iter().collect();
    assert_eq!(distinct.len(), 4);
    assert_conserved(&sys);

    thread::scope(|s| {
        let fifth = s.spawn(|| sys.context(0).allocate(1).unwrap().into_tag());

        wait_until(|| sys.waiters(tags[0]) == 1);
        assert!(!fifth.is_finished());

        ctx.end_io(tags[0], IoStatus::Ok);
        ctx.reclaim(CORE0);

        assert_eq!(fifth.join().unwrap(), tags[0]);
    });

    assert!(sys.stats(CORE0).parks >= 1);
    assert_eq!(sys.stats(CORE0).allocations, 5);
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_concurrent_allocations_never_share_a_slot() {
    let sys = DescSystem::init(
        config(1, 8, 16).lazy_kick_threshold(2),
        Arc::new(HostMapper::new()),
    )
    .unwrap();
    let live = Arc::new(Mutex::new(HashSet::new()));
    let lost = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        for thread_id in 0..4u64 {
            let (sys, live, lost) = (&sys, Arc::clone(&live), Arc::clone(&lost));
            s.spawn(move || {
                let ctx = sys.context(0);
                for seq in 0..200u64 {
                    let desc = ctx.allocate(1).unwrap();
                    let tag = desc.tag();
                    // Live from allocation until reclamation drops the mark
                    assert!(live.lock().unwrap().insert(tag), "{} handed out while busy", tag);
                    desc.set_scratch(Box::new(LiveMark {
                        tag,
                        live: Arc::clone(&live),
                        lost: Arc::clone(&lost),
                    }));

                    let stamp = (thread_id << 32) | seq;
                    desc.set_sector(stamp);
                    desc.fill_from_pool(1, seq);
                    thread::yield_now();
                    assert_eq!(desc.sector(), stamp, "{} written by another owner", tag);

                    ctx.end_io(desc.into_tag(), IoStatus::Ok);
                }
            });
        }
    });

    // The worker may still be retiring what it drained
    sys.context(0).reclaim(CORE0);
    wait_until(|| sys.stats(CORE0).reclaimed == 800);
    assert!(live.lock().unwrap().is_empty());
    assert_eq!(lost.load(Ordering::SeqCst), 0);
    assert_eq!(sys.stats(CORE0).allocations, 800);
    assert_eq!(sys.free_pages(), sys.bootstrapped_pages());
    assert_eq!(sys.attached_pages(), 0);
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_buffer_conservation_through_lifecycle() {
    let sys = system(2, 4, 4);
    let ctx = sys.context(1);
    assert_eq!(sys.bootstrapped_pages(), 16);
    assert_conserved(&sys);

    let a = ctx.allocate(2).unwrap();
    assert_eq!(a.fill_from_pool(2, 0), 2);
    let a = a.into_tag();
    assert_conserved(&sys);

    let b = ctx.allocate(3).unwrap();
    b.set_write();
    assert_eq!(b.fill_from_pool(3, 0), 3);
    let b = b.into_tag();
    assert_eq!(sys.pool_pages(CORE1), (2, 1));
    assert_conserved(&sys);

    ctx.end_io(a, IoStatus::Ok);
    assert_conserved(&sys);

    ctx.reclaim(CORE1);
    assert_eq!(sys.pool_pages(CORE1), (4, 1));
    assert_conserved(&sys);

    ctx.release_on_submit_failure(b);
    assert_eq!(sys.pool_pages(CORE1), (4, 4));
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_busy_cleared_only_after_buffers_stripped() {
    let sys = system(1, 8, 16);
    let ctx = sys.context(0);

    let tags: Vec<SlotTag> = (0..8)
        .map(|_| {
            let desc = ctx.allocate(2).unwrap();
            desc.fill_from_pool(2, 0);
            desc.into_tag()
        })
        .collect();
    for &tag in &tags {
        ctx.end_io(tag, IoStatus::Ok);
    }

    let done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                for &tag in &tags {
                    if !sys.slot_flags(tag).is_busy() {
                        assert_eq!(sys.with_vecs(tag, |vecs| vecs.len()), 0);
                    }
                }
            }
        });

        ctx.reclaim(CORE0);
        done.store(true, Ordering::Release);
    });

    for &tag in &tags {
        assert_eq!(sys.slot_status(tag), SlotStatus::Free);
    }
    sys.shutdown();
}

#[test]
#[should_panic(expected = "error-path release")]
fn test_double_release_is_fatal() {
    let sys = system(1, 4, 4);
    let ctx = sys.context(0);
    let tag = ctx.allocate(1).unwrap().into_tag();

    ctx.release_on_submit_failure(tag);
    ctx.release_on_submit_failure(tag);
}

#[test]
fn test_cross_core_cached_completion_lands_on_owner_final_list() {
    let sys = system(2, 4, 4);
    let (ctx_a, ctx_b) = (sys.context(0), sys.context(1));
    let cache = MapCache::default();

    let desc = ctx_a.allocate(2).unwrap();
    assert_eq!(desc.fill_from_pool(2, 10), 2);
    let tag = desc.into_tag();
    let pool_a = sys.pool_pages(CORE0);

    // Device completion observed on core B, which also hands pages to the cache
    sys.mark_completed(tag, IoStatus::Ok);
    let report = ctx_b.hand_off_to_cache(&cache, tag);
    assert_eq!(report.inserted, 2);
    assert!(sys.slot_flags(tag).is_cached());
    assert_eq!(sys.circulating_pages(), sys.bootstrapped_pages() - 2);
    assert_conserved(&sys);
    ctx_b.push_completion(tag);

    assert_eq!(sys.final_len(CORE0), 1);
    assert_eq!(sys.lazy_len(CORE0), 0);
    assert_eq!(sys.lazy_len(CORE1), 0);
    assert_eq!(sys.final_len(CORE1), 0);
    assert_eq!(sys.listed_on(tag), Some(CORE0));
    assert!(sys.slot_flags(tag).is_busy());

    ctx_a.reclaim(CORE0);
    assert!(!sys.slot_flags(tag).is_busy());
    assert_eq!(sys.final_len(CORE0), 0);
    assert_eq!(sys.pool_pages(CORE0), pool_a);
    assert_eq!(cache.pages.lock().unwrap().len(), 2);
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_cross_core_uncached_completion_returns_pages_to_owner() {
    let sys = system(2, 4, 4);
    let desc = sys.context(0).allocate(1).unwrap();
    desc.fill_from_pool(1, 0);
    let tag = desc.into_tag();

    sys.context(1).end_io(tag, IoStatus::Ok);
    assert_eq!(sys.final_len(CORE0), 1);
    assert_eq!(sys.stats(CORE1).final_pushes, 1);

    sys.context(1).reclaim(CORE0);
    assert_eq!(sys.stats(CORE1).reclaim_waits_remote, 1);
    assert_eq!(sys.slot_status(tag), SlotStatus::Free);
    assert_eq!(sys.pool_pages(CORE0), (4, 4));
    sys.shutdown();
}

#[test]
fn test_submit_failure_releases_whole_chain() {
    let sys = system(1, 4, 8);
    let ctx = sys.context(0);

    let descs: Vec<_> = (0..3)
        .map(|_| {
            let desc = ctx.allocate(1).unwrap();
            assert_eq!(desc.fill_from_pool(1, 0), 1);
            desc
        })
        .collect();
    descs[0].set_next(Some(descs[1].tag()));
    descs[1].set_next(Some(descs[2].tag()));
    let tags: Vec<SlotTag> = descs.into_iter().map(|d| d.into_tag()).collect();
    assert_eq!(sys.free_pages(), 13);

    let err = ctx.submit(&RefusingSubmitter(-12), tags[0]).unwrap_err();
    assert_eq!(err, DescError::SubmitFailed(-12));

    assert_eq!(sys.free_pages(), 16);
    for &tag in &tags {
        let flags = sys.slot_flags(tag);
        assert!(!flags.is_busy());
        assert!(!flags.is_completed());
        assert!(!flags.is_cached());
    }
    assert_eq!(sys.stats(CORE0).submit_failures, 1);
    sys.shutdown();
}

#[test]
fn test_cached_slot_reclaimed_inline_by_allocator() {
    let sys = system(1, 1, 2);
    let ctx = sys.context(0);
    let cache = MapCache::default();

    let desc = ctx.allocate(1).unwrap();
    desc.fill_from_pool(1, 3);
    let tag = desc.into_tag();
    sys.mark_completed(tag, IoStatus::Ok);
    ctx.hand_off_to_cache(&cache, tag);
    ctx.push_completion(tag);
    assert_eq!(sys.final_len(CORE0), 1);

    let again = ctx.allocate(1).unwrap();
    assert_eq!(again.tag(), tag);

    let stats = sys.stats(CORE0);
    assert_eq!(stats.reclaim_waits_inline, 1);
    assert_eq!(stats.parks, 0);
    sys.shutdown();
}

#[test]
fn test_waiter_on_completed_slot_is_freed_by_worker() {
    let sys = system(1, 1, 2);
    let ctx = sys.context(0);
    let tag = ctx.allocate(0).unwrap().into_tag();

    thread::scope(|s| {
        let next = s.spawn(|| sys.context(0).allocate(0).unwrap().into_tag());
        wait_until(|| sys.waiters(tag) == 1);

        // No explicit reclaim: the waiter kicks the worker
        ctx.end_io(tag, IoStatus::Ok);
        assert_eq!(next.join().unwrap(), tag);
    });
    assert!(sys.stats(CORE0).kicks >= 1);
    sys.shutdown();
}

#[test]
fn test_kick_threshold_drains_lazy_list() {
    let sys = DescSystem::init(
        config(1, 4, 4).lazy_kick_threshold(2),
        Arc::new(HostMapper::new()),
    )
    .unwrap();
    let ctx = sys.context(0);

    let a = ctx.allocate(0).unwrap().into_tag();
    let b = ctx.allocate(0).unwrap().into_tag();
    ctx.end_io(a, IoStatus::Ok);
    ctx.end_io(b, IoStatus::Ok);

    wait_until(|| sys.slot_status(a).is_free() && sys.slot_status(b).is_free());
    assert_eq!(sys.lazy_len(CORE0), 0);
    assert_eq!(sys.stats(CORE0).kicks, 1);
    sys.shutdown();
}

#[test]
fn test_cache_already_present_and_errors() {
    let mapper = Arc::new(HostMapper::new());
    let sys = DescSystem::init(config(1, 4, 4), mapper.clone()).unwrap();
    let ctx = sys.context(0);

    let cache = MapCache::default();
    cache
        .pages
        .lock()
        .unwrap()
        .insert(5, PageFrame::alloc().unwrap());

    let desc = ctx.allocate(2).unwrap();
    desc.fill_from_pool(2, 5);
    let tag = desc.into_tag();
    sys.mark_completed(tag, IoStatus::Ok);

    let report = ctx.hand_off_to_cache(&cache, tag);
    assert_eq!((report.inserted, report.already_present), (1, 1));
    assert_eq!(sys.circulating_pages(), 7);
    assert_conserved(&sys);
    sys.with_vecs(tag, |vecs| {
        assert_eq!(vecs[0].disposition(), Disposition::Pool);
        assert!(vecs[0].page().unwrap().test_flag(PageFlags::REUSE));
        assert_eq!(vecs[1].disposition(), Disposition::Cache);
        assert!(vecs[1].page().is_none());
    });

    // A second hand-off skips the cached descriptor
    assert_eq!(ctx.hand_off_to_cache(&cache, tag).skipped, 1);

    ctx.push_completion(tag);
    ctx.reclaim(CORE0);
    assert_eq!(sys.pool_pages(CORE0).0, 3);
    assert_eq!(sys.stats(CORE0).cache_already_present, 1);
    assert_conserved(&sys);

    let failing = MapCache {
        fail_with: Some(-5),
        ..MapCache::default()
    };
    let desc = ctx.allocate(1).unwrap();
    desc.fill_from_pool(1, 0);
    let tag = desc.into_tag();
    ctx.end_io(tag, IoStatus::Ok);
    let unmaps = mapper.unmaps();

    assert_eq!(ctx.hand_off_to_cache(&failing, tag).errors, 1);
    assert_conserved(&sys);
    ctx.reclaim(CORE0);
    assert_eq!(mapper.unmaps(), unmaps + 1);
    assert_eq!(sys.pool_pages(CORE0).0, 2);
    // The rejected page was unmapped and left the system
    assert_eq!(sys.circulating_pages(), 6);
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_attach_paths() {
    let mapper = Arc::new(SwitchMapper::default());
    let sys = DescSystem::init(config(1, 4, 2), mapper.clone()).unwrap();
    let ctx = sys.context(0);

    let desc = ctx.allocate(2).unwrap();
    assert_eq!(desc.fill_from_pool(1, 0), 1);
    assert_conserved(&sys);

    // A page from outside the pool is mapped on attach
    desc.add_page(PageFrame::alloc().unwrap()).unwrap();
    assert_eq!(sys.stats(CORE0).pages_introduced, 1);
    assert_eq!(desc.vcnt(), 2);
    assert_eq!(sys.circulating_pages(), 5);
    assert_conserved(&sys);

    let err = desc.add_page(PageFrame::alloc().unwrap()).unwrap_err();
    assert_eq!(err.kind, AttachFailure::Full);

    let other = ctx.allocate(1).unwrap();
    mapper.failing.store(true, Ordering::Relaxed);
    let err = other.add_page(PageFrame::alloc().unwrap()).unwrap_err();
    assert_eq!(err.kind, AttachFailure::MapFailed(-12));
    assert_eq!(other.vcnt(), 0);
    mapper.failing.store(false, Ordering::Relaxed);
    assert_conserved(&sys);

    let tag = desc.into_tag();
    ctx.end_io(tag, IoStatus::Ok);
    ctx.reclaim(CORE0);
    // The introduced page joins the pool
    assert_eq!(sys.pool_pages(CORE0).0, 3);
    assert_eq!(sys.circulating_pages(), 5);
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_page_returned_by_cache_rejoins_circulation() {
    let sys = system(1, 4, 2);
    let ctx = sys.context(0);
    let cache = MapCache::default();

    let desc = ctx.allocate(1).unwrap();
    assert_eq!(desc.fill_from_pool(1, 9), 1);
    let tag = desc.into_tag();
    sys.mark_completed(tag, IoStatus::Ok);
    assert_eq!(ctx.hand_off_to_cache(&cache, tag).inserted, 1);
    ctx.push_completion(tag);
    ctx.reclaim(CORE0);
    assert_eq!(sys.circulating_pages(), 3);
    assert_conserved(&sys);

    // The cache evicts the page; it still carries its device address
    let evicted = cache.pages.lock().unwrap().remove(&9).unwrap();
    assert!(evicted.dma().is_some());
    let desc = ctx.allocate(1).unwrap();
    desc.add_page(evicted).unwrap();
    assert_eq!(sys.stats(CORE0).pages_introduced, 0);
    assert_eq!(sys.circulating_pages(), 4);
    assert_conserved(&sys);

    ctx.end_io(desc.into_tag(), IoStatus::Ok);
    ctx.reclaim(CORE0);
    assert_eq!(sys.pool_pages(CORE0), (2, 2));
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_allocator_parks_while_another_pass_retires_its_slot() {
    let sys = system(1, 1, 2);
    let ctx = sys.context(0);
    let cache = MapCache::default();

    let desc = ctx.allocate(1).unwrap();
    desc.fill_from_pool(1, 3);
    let tag = desc.into_tag();
    sys.mark_completed(tag, IoStatus::Ok);
    ctx.hand_off_to_cache(&cache, tag);
    ctx.push_completion(tag);

    // Detach the chain the way a pass already under way would
    let shared = sys.shared();
    let head = shared.core(CORE0).finals.take();
    assert_eq!(head, Some(tag));

    thread::scope(|s| {
        let next = s.spawn(|| sys.context(0).allocate(1).unwrap().into_tag());

        wait_until(|| sys.waiters(tag) == 1);
        assert_eq!(sys.slot_status(tag), SlotStatus::CompletedCached);
        assert!(sys.stats(CORE0).reclaim_waits_inline >= 1);

        assert_eq!(retire_chain(shared, CORE0, head, ReclaimMode::Recycle), 1);
        assert_eq!(next.join().unwrap(), tag);
    });

    assert!(sys.stats(CORE0).parks >= 1);
    assert_eq!(sys.stats(CORE0).allocations, 2);
    sys.shutdown();
}

#[test]
fn test_write_requests_use_write_pool() {
    let sys = system(1, 4, 3);
    let ctx = sys.context(0);

    let desc = ctx.allocate(2).unwrap();
    desc.add_write_page(PageFrame::alloc().unwrap()).unwrap();
    assert!(desc.flags().is_write());
    assert_eq!(desc.fill_from_pool(1, 0), 1);
    assert_eq!(sys.pool_pages(CORE0), (3, 2));

    let tag = desc.into_tag();
    ctx.end_io(tag, IoStatus::Ok);
    ctx.reclaim(CORE0);
    assert_eq!(sys.pool_pages(CORE0), (3, 4));
    assert_conserved(&sys);
    sys.shutdown();
}

#[test]
fn test_oversized_vector_failure_keeps_slot_claimed() {
    let sys = system(1, 2, 2);
    let ctx = sys.context(0);

    let err = ctx.allocate(usize::MAX).unwrap_err();
    let DescError::VecAllocFailed { tag, requested } = err else {
        panic!("unexpected error {:?}", err);
    };
    assert_eq!(requested, usize::MAX);
    assert!(sys.slot_flags(tag).is_busy());

    ctx.release_on_submit_failure(tag);
    assert!(sys.slot_status(tag).is_free());

    let spilled = ctx.allocate(8).unwrap();
    assert_eq!(spilled.max_vecs(), 8);
    sys.shutdown();
}

#[test]
fn test_end_io_callback_and_command_ids() {
    let sys = system(2, 4, 2);
    let ctx = sys.context(1);
    let calls = Arc::new(AtomicUsize::new(0));

    let desc = ctx.allocate(1).unwrap();
    desc.set_sector(4096);
    desc.set_fua();
    let seen = Arc::clone(&calls);
    desc.set_end_io(move |_, status| {
        assert_eq!(status, IoStatus::Error(-5));
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let cmd = desc.command_id();
    assert_eq!(cmd.as_u16(), 4);
    assert_eq!(sys.tags().lookup(cmd), Some(desc.tag()));

    let tag = desc.into_tag();
    assert_eq!(sys.sector(tag), 4096);
    assert!(sys.slot_flags(tag).is_fua());

    ctx.end_io(tag, IoStatus::Error(-5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(sys.io_status(tag), IoStatus::Error(-5));
    sys.shutdown();
}

#[test]
#[should_panic(expected = "completion pushed")]
fn test_push_before_completion_is_fatal() {
    let sys = system(1, 2, 2);
    let ctx = sys.context(0);
    let tag = ctx.allocate(0).unwrap().into_tag();
    ctx.push_completion(tag);
}

#[test]
fn test_shutdown_unmaps_everything_not_cached() {
    let mapper = Arc::new(HostMapper::new());
    let sys = DescSystem::init(config(2, 4, 4), mapper.clone()).unwrap();
    let cache = MapCache::default();
    assert_eq!(mapper.live(), 16);

    let ctx = sys.context(0);
    let lazy = ctx.allocate(2).unwrap();
    lazy.fill_from_pool(2, 0);
    ctx.end_io(lazy.into_tag(), IoStatus::Ok);

    let cached = ctx.allocate(1).unwrap();
    cached.fill_from_pool(1, 7);
    let cached = cached.into_tag();
    sys.mark_completed(cached, IoStatus::Ok);
    ctx.hand_off_to_cache(&cache, cached);
    sys.context(1).push_completion(cached);

    sys.shutdown();
    // Only the page owned by the cache keeps its mapping
    assert_eq!(mapper.live(), 1);
}

#[test]
fn test_bootstrap_discards_unmappable_pages() {
    let mapper = Arc::new(SwitchMapper::default());
    mapper.failing.store(true, Ordering::Relaxed);

    let sys = DescSystem::init(config(1, 2, 4).map_retry_limit(3), mapper.clone()).unwrap();
    assert_eq!(sys.bootstrapped_pages(), 0);
    assert_eq!(mapper.inner.live(), 0);

    // Without pages the ring still works
    let desc = sys.context(0).allocate(1).unwrap();
    assert_eq!(desc.fill_from_pool(1, 0), 0);
    sys.shutdown();
}

#[test]
fn test_invalid_config_rejected() {
    let err = DescSystem::init(
        config(1, 8, 1).lazy_capacity(4),
        Arc::new(HostMapper::new()),
    )
    .err();
    assert_eq!(
        err,
        Some(DescError::InvalidConfig("lazy_capacity must be >= ring_capacity"))
    );
}

#[test]
#[should_panic(expected = "command tag space")]
fn test_tag_space_exhaustion_is_fatal() {
    let _ = DescSystem::init(config(64, 1024, 0), Arc::new(HostMapper::new()));
}
