//! Bootstrap, teardown and per-core contexts
//!
//! `DescSystem` owns every ring, list and pool, plus the reclamation
//! workers. Callers never reach per-core state through a hidden "current
//! core": they obtain a `CoreContext` for the core they run on and call
//! allocation and completion operations through it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use descring_core::{kinfo, kwarn};
use descring_core::{CoreId, DescFlags, DescResult, SlotStatus, SlotTag, SpinLock, TagTable};

use crate::collab::{DeviceMapper, DmaAddr, MapDirection};
use crate::config::DescConfig;
use crate::desc::{DescVec, Slot};
use crate::lists::{FinalList, LazyList};
use crate::memory::PageFrame;
use crate::parking::Parking;
use crate::pool::{CorePools, PagePool};
use crate::stats::{CoreStats, StatsSnapshot};
use crate::worker::{self, Job, JobQueue, ReclaimWorkers};

/// Everything one core owns
pub(crate) struct CoreState {
    pub(crate) id: CoreId,
    pub(crate) slots: Box<[Slot]>,
    /// Ring head
    pub(crate) cursor: SpinLock<usize>,
    pub(crate) lazy: LazyList,
    pub(crate) finals: FinalList,
    pub(crate) pools: SpinLock<CorePools>,
    pub(crate) jobs: JobQueue,
    pub(crate) stats: CoreStats,
}

impl CoreState {
    fn new(id: CoreId, config: &DescConfig, tags: &TagTable, pools: CorePools) -> Self {
        let slots = (0..config.ring_capacity)
            .map(|index| Slot::new(tags.slot(id, index)))
            .collect();

        Self {
            id,
            slots,
            cursor: SpinLock::new(0),
            lazy: LazyList::new(id, config.lazy_capacity),
            finals: FinalList::new(),
            pools: SpinLock::new(pools),
            jobs: JobQueue::new(),
            stats: CoreStats::default(),
        }
    }
}

/// State shared with the worker threads
pub(crate) struct Shared {
    pub(crate) config: DescConfig,
    pub(crate) tags: TagTable,
    pub(crate) cores: Box<[CoreState]>,
    pub(crate) mapper: Arc<dyn DeviceMapper>,
    pub(crate) shutdown: AtomicBool,
    bootstrapped_pages: usize,
    /// Pages in the pools or attached to descriptors
    circulating: AtomicUsize,
}

impl Shared {
    #[inline]
    pub(crate) fn core(&self, id: CoreId) -> &CoreState {
        &self.cores[id.as_usize()]
    }

    #[inline]
    pub(crate) fn slot(&self, tag: SlotTag) -> &Slot {
        &self.core(tag.core()).slots[tag.index().as_usize()]
    }

    /// Count pages attached from outside the pools
    #[inline]
    pub(crate) fn pages_entered(&self, n: usize) {
        self.circulating.fetch_add(n, Ordering::Relaxed);
    }

    /// Count pages unmapped, dropped or handed to the page cache
    #[inline]
    pub(crate) fn pages_left(&self, n: usize) {
        self.circulating.fetch_sub(n, Ordering::Relaxed);
    }
}

/// Map pages into `pool` until it holds `target`
///
/// A page that fails to map is discarded; after `retry_limit` consecutive
/// failures the pool is left short.
fn fill_pool(
    pool: &mut PagePool,
    target: usize,
    dir: MapDirection,
    mapper: &dyn DeviceMapper,
    retry_limit: usize,
    core: CoreId,
) -> DescResult<()> {
    let mut failures = 0;

    while pool.len() < target {
        let mut page = PageFrame::alloc()?;
        match mapper.map(&page, dir) {
            Ok(dma) => {
                page.stash_dma(dma);
                pool.put(page);
                failures = 0;
            }
            Err(code) => {
                kwarn!("{}: mapping pool page failed ({}), discarding it", core, code);
                drop(page);
                failures += 1;
                if failures >= retry_limit {
                    kwarn!(
                        "{}: {:?} pool left at {} of {} pages",
                        core,
                        dir,
                        pool.len(),
                        target
                    );
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Unmap every page of pools that never went live
fn unmap_pools(all: Vec<CorePools>, mapper: &dyn DeviceMapper) {
    for mut pools in all {
        for (pool, dir) in [
            (&mut pools.read, MapDirection::FromDevice),
            (&mut pools.write, MapDirection::ToDevice),
        ] {
            for mut page in pool.drain() {
                if let Some(dma) = page.take_dma() {
                    mapper.unmap(dma, dir);
                }
            }
        }
    }
}

/// The per-core descriptor rings, pools and reclamation workers
pub struct DescSystem {
    shared: Arc<Shared>,
    workers: Option<ReclaimWorkers>,
}

impl DescSystem {
    /// Allocate every ring and pre-map every pool
    ///
    /// # Panics
    ///
    /// If `num_cores * ring_capacity` exceeds the device's command tag space.
    pub fn init(config: DescConfig, mapper: Arc<dyn DeviceMapper>) -> DescResult<Self> {
        descring_core::kprint::init();
        config.validate()?;

        let tags = TagTable::new(config.num_cores, config.ring_capacity);

        let mut all_pools = Vec::with_capacity(config.num_cores);
        for index in 0..config.num_cores {
            let core = CoreId::from(index);
            let mut pools = CorePools::new();
            let filled = fill_pool(
                &mut pools.read,
                config.read_pool_pages,
                MapDirection::FromDevice,
                &*mapper,
                config.map_retry_limit,
                core,
            )
            .and_then(|()| {
                fill_pool(
                    &mut pools.write,
                    config.write_pool_pages,
                    MapDirection::ToDevice,
                    &*mapper,
                    config.map_retry_limit,
                    core,
                )
            });
            all_pools.push(pools);

            if let Err(e) = filled {
                unmap_pools(all_pools, &*mapper);
                return Err(e);
            }
        }

        let bootstrapped_pages = all_pools.iter().map(CorePools::len).sum();
        let cores: Box<[CoreState]> = all_pools
            .into_iter()
            .enumerate()
            .map(|(index, pools)| {
                let core = CoreId::from(index);
                kinfo!(
                    "{}: ring {} slots, read pool {} pages, write pool {} pages",
                    core,
                    config.ring_capacity,
                    pools.read.len(),
                    pools.write.len()
                );
                CoreState::new(core, &config, &tags, pools)
            })
            .collect();

        let shared = Arc::new(Shared {
            config,
            tags,
            cores,
            mapper,
            shutdown: AtomicBool::new(false),
            bootstrapped_pages,
            circulating: AtomicUsize::new(bootstrapped_pages),
        });

        let workers = ReclaimWorkers::spawn(&shared)?;
        kinfo!(
            "descring: {} cores, {} slots, {} pool pages, {} workers",
            shared.cores.len(),
            shared.tags.len(),
            bootstrapped_pages,
            workers.len()
        );

        Ok(Self {
            shared,
            workers: Some(workers),
        })
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Shared {
        &self.shared
    }

    /// Context for allocating and completing on `core`
    ///
    /// # Panics
    ///
    /// If `core` is not below `num_cores()`.
    pub fn context(&self, core: usize) -> CoreContext<'_> {
        assert!(
            core < self.shared.cores.len(),
            "core {} out of range ({} cores)",
            core,
            self.shared.cores.len()
        );
        CoreContext {
            sys: self,
            core: CoreId::from(core),
        }
    }

    #[inline]
    pub fn num_cores(&self) -> usize {
        self.shared.cores.len()
    }

    #[inline]
    pub fn config(&self) -> &DescConfig {
        &self.shared.config
    }

    /// Slot tag / device command identifier translation
    #[inline]
    pub fn tags(&self) -> &TagTable {
        &self.shared.tags
    }

    #[inline]
    pub fn mapper(&self) -> &dyn DeviceMapper {
        &*self.shared.mapper
    }

    // Diagnostics

    /// Pages sitting in every pool
    pub fn free_pages(&self) -> usize {
        self.shared
            .cores
            .iter()
            .map(|cs| cs.pools.with(|pools| pools.len()))
            .sum()
    }

    /// Pages sitting in `core`'s (read, write) pools
    pub fn pool_pages(&self, core: CoreId) -> (usize, usize) {
        self.shared
            .core(core)
            .pools
            .with(|pools| (pools.read.len(), pools.write.len()))
    }

    /// Pages attached to busy descriptors
    pub fn attached_pages(&self) -> usize {
        self.shared
            .cores
            .iter()
            .flat_map(|cs| cs.slots.iter())
            .filter(|slot| slot.flags().is_busy())
            .map(|slot| {
                slot.body
                    .lock()
                    .vecs
                    .iter()
                    .filter(|v| v.page().is_some())
                    .count()
            })
            .sum()
    }

    /// Pages mapped into the pools at bootstrap
    #[inline]
    pub fn bootstrapped_pages(&self) -> usize {
        self.shared.bootstrapped_pages
    }

    /// Pages the system currently owns, wherever they sit
    ///
    /// Starts at `bootstrapped_pages()`. Pages attached by callers join it;
    /// pages unmapped at reclamation or teardown, pages accepted by the
    /// page cache and pool pages dropped on attach failure leave it. With
    /// no operation in progress it equals `free_pages() + attached_pages()`.
    #[inline]
    pub fn circulating_pages(&self) -> usize {
        self.shared.circulating.load(Ordering::Relaxed)
    }

    pub fn slot_flags(&self, tag: SlotTag) -> DescFlags {
        self.shared.slot(tag).flags()
    }

    pub fn slot_status(&self, tag: SlotTag) -> SlotStatus {
        self.slot_flags(tag).status()
    }

    /// Allocators parked on `tag`
    pub fn waiters(&self, tag: SlotTag) -> usize {
        self.shared.slot(tag).parking.parked_count()
    }

    /// Core whose completion list holds `tag`
    pub fn listed_on(&self, tag: SlotTag) -> Option<CoreId> {
        self.shared.slot(tag).listed_on()
    }

    pub fn lazy_len(&self, core: CoreId) -> usize {
        self.shared.core(core).lazy.len()
    }

    pub fn final_len(&self, core: CoreId) -> usize {
        self.shared
            .core(core)
            .finals
            .len(|tag| self.shared.slot(tag))
    }

    /// Device addresses of `tag`'s buffers, in order
    pub fn dma_addrs(&self, tag: SlotTag) -> Vec<DmaAddr> {
        self.shared
            .slot(tag)
            .body
            .lock()
            .vecs
            .iter()
            .map(|v| v.dma())
            .collect()
    }

    /// Sector recorded on `tag`
    pub fn sector(&self, tag: SlotTag) -> u64 {
        self.shared.slot(tag).body.lock().sector
    }

    /// Run `f` over `tag`'s attached buffers
    pub fn with_vecs<R>(&self, tag: SlotTag, f: impl FnOnce(&mut [DescVec]) -> R) -> R {
        f(&mut self.shared.slot(tag).body.lock().vecs[..])
    }

    pub fn stats(&self, core: CoreId) -> StatsSnapshot {
        self.shared.core(core).stats.snapshot()
    }

    /// Counters summed over every core
    pub fn total_stats(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for cs in self.shared.cores.iter() {
            total.merge(&cs.stats.snapshot());
        }
        total
    }

    /// Run `job` on every core's worker and wait for all of them
    fn run_on_all(&self, job: Job) {
        let tickets: Vec<_> = self
            .shared
            .cores
            .iter()
            .map(|cs| (cs.id, worker::schedule_on(&self.shared, cs.id, job)))
            .collect();

        for (core, ticket) in tickets {
            match ticket {
                Ok(ticket) => ticket.wait(),
                Err(_) => worker::run_job(&self.shared, core, job),
            };
        }
    }

    /// Tear everything down
    ///
    /// First every core drains its completion lists, unmapping and freeing
    /// their buffers; once all cores are done, every pool is unmapped and
    /// freed; then the workers stop.
    pub fn shutdown(mut self) {
        self.run_on_all(Job::Teardown);
        self.run_on_all(Job::FreePools);

        if let Some(workers) = self.workers.take() {
            workers.stop(&self.shared);
        }
        kinfo!("descring: shutdown complete");
    }
}

impl Drop for DescSystem {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            workers.stop(&self.shared);
        }
    }
}

/// Handle for operating on one core's ring, lists and pools
#[derive(Clone, Copy)]
pub struct CoreContext<'a> {
    sys: &'a DescSystem,
    core: CoreId,
}

impl<'a> CoreContext<'a> {
    #[inline]
    pub fn core(&self) -> CoreId {
        self.core
    }

    #[inline]
    pub fn system(&self) -> &'a DescSystem {
        self.sys
    }

    #[inline]
    pub(crate) fn shared(&self) -> &'a Shared {
        &self.sys.shared
    }

    #[inline]
    pub(crate) fn core_state(&self) -> &'a CoreState {
        self.shared().core(self.core)
    }

    #[inline]
    pub(crate) fn stats(&self) -> &'a CoreStats {
        &self.core_state().stats
    }

    /// Counters of this core
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats().snapshot()
    }
}

impl std::fmt::Debug for CoreContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext").field("core", &self.core).finish()
    }
}
