//! Ring stress test - simulated device completing across cores
//!
//! One submitter thread per core allocates descriptors, fills them from the
//! pools and submits them to a simulated device. The device completes each
//! request on the next core, so completions mostly take the cross-core
//! path; some read buffers are handed to a bounded page cache and a few
//! submissions are refused to exercise the error path. Pages the full cache
//! evicts are attached to later read requests, which brings them back into
//! the pools.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use descring::{
    CacheInsertError, CacheRejection, CoreId, DescConfig, DescError, DescSystem, HostMapper,
    IoStatus, IoSubmitter, PageCache, PageFrame, SlotTag,
};

/// Every Nth submission is refused by the device
const REFUSE_EVERY: u64 = 1000;
/// Distinct page indices the workload touches
const INDEX_SPACE: u64 = 512;
const CACHE_CAPACITY: usize = 256;

/// Page cache that evicts an arbitrary entry when full
struct BoundedCache {
    pages: Mutex<HashMap<u64, PageFrame>>,
    /// Evicted pages, still mapped, waiting for a read request
    evicted: Mutex<Vec<PageFrame>>,
    evictions: AtomicU64,
}

impl BoundedCache {
    fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::with_capacity(CACHE_CAPACITY)),
            evicted: Mutex::new(Vec::new()),
            evictions: AtomicU64::new(0),
        }
    }

    fn take_evicted(&self) -> Option<PageFrame> {
        self.evicted.lock().unwrap_or_else(|e| e.into_inner()).pop()
    }

    fn put_evicted(&self, page: PageFrame) {
        self.evicted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(page);
    }

    fn len(&self) -> usize {
        self.pages.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl PageCache for BoundedCache {
    fn insert(&self, index: u64, page: PageFrame) -> Result<(), CacheInsertError> {
        let mut pages = self.pages.lock().unwrap_or_else(|e| e.into_inner());
        if pages.contains_key(&index) {
            return Err(CacheInsertError {
                page,
                reason: CacheRejection::AlreadyPresent,
            });
        }

        if pages.len() >= CACHE_CAPACITY {
            let victim = pages.keys().next().copied();
            if let Some(old) = victim.and_then(|key| pages.remove(&key)) {
                self.put_evicted(old);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        pages.insert(index, page);
        Ok(())
    }
}

/// Forwards chains to the device thread serving the next core
struct DeviceQueue {
    tx: Sender<SlotTag>,
    submitted: AtomicU64,
}

impl IoSubmitter for DeviceQueue {
    fn submit(&self, head: SlotTag) -> Result<(), i32> {
        let n = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        if n % REFUSE_EVERY == 0 {
            return Err(-5);
        }
        self.tx.send(head).map_err(|_| -32)
    }
}

fn main() {
    println!("=== descring Ring Stress Test ===\n");
    descring::init_logging();

    let per_core: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);

    let config = DescConfig::from_env();
    config.print();
    let cores = config.num_cores;

    let mapper = Arc::new(HostMapper::new());
    let sys = match DescSystem::init(config, mapper.clone()) {
        Ok(sys) => sys,
        Err(e) => {
            eprintln!("init failed: {}", e);
            std::process::exit(1);
        }
    };
    let cache = BoundedCache::new();

    println!("\n{} cores x {} requests...", cores, per_core);
    let start = Instant::now();
    let refused = AtomicU64::new(0);
    let short_fills = AtomicU64::new(0);

    thread::scope(|s| {
        let mut queues = Vec::with_capacity(cores);
        for device_core in 0..cores {
            let (tx, rx) = mpsc::channel::<SlotTag>();
            queues.push(tx);

            let sys = &sys;
            let cache = &cache;
            s.spawn(move || {
                let ctx = sys.context(device_core);
                for tag in rx {
                    sys.mark_completed(tag, IoStatus::Ok);
                    if !sys.slot_flags(tag).is_write() && tag.index().as_usize() % 4 == 0 {
                        ctx.hand_off_to_cache(cache, tag);
                    }
                    ctx.push_completion(tag);
                }
            });
        }

        for core in 0..cores {
            let device = DeviceQueue {
                tx: queues[(core + 1) % cores].clone(),
                submitted: AtomicU64::new(0),
            };
            let sys = &sys;
            let cache = &cache;
            let (refused, short_fills) = (&refused, &short_fills);
            s.spawn(move || {
                let ctx = sys.context(core);
                for seq in 0..per_core {
                    let nr = 1 + (seq % 6) as usize;
                    let desc = match ctx.allocate(nr) {
                        Ok(desc) => desc,
                        Err(e) => {
                            eprintln!("{}: {}", ctx.core(), e);
                            if let DescError::VecAllocFailed { tag, .. } = e {
                                ctx.release_on_submit_failure(tag);
                            }
                            continue;
                        }
                    };
                    let first_index = (seq * nr as u64) % INDEX_SPACE;
                    let mut attached = 0;
                    if seq % 3 == 0 {
                        desc.set_write();
                    } else if let Some(mut page) = cache.take_evicted() {
                        page.set_index(first_index);
                        match desc.add_page(page) {
                            Ok(()) => attached += 1,
                            Err(e) => {
                                eprintln!("{}: {}", desc.tag(), e);
                                cache.put_evicted(e.page);
                            }
                        }
                    }
                    desc.set_sector(seq * 8);
                    attached += desc.fill_from_pool(nr - attached, first_index + attached as u64);
                    if attached < nr {
                        short_fills.fetch_add(1, Ordering::Relaxed);
                    }

                    if ctx.submit(&device, desc.into_tag()).is_err() {
                        refused.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }

        // Device threads exit once every submitter has dropped its sender
        drop(queues);
    });

    let run_time = start.elapsed();
    for core in 0..cores {
        sys.context(core).reclaim(CoreId::from(core));
    }

    let total = sys.total_stats();
    let requests = per_core * cores as u64;

    println!("\n=== Per-core ===");
    for core in 0..cores {
        println!("core{}: {}", core, sys.stats(CoreId::from(core)));
    }

    println!("\n=== Results ===");
    println!("Requests:        {}", requests);
    println!("Refused:         {}", refused.load(Ordering::Relaxed));
    println!("Short of pages:  {}", short_fills.load(Ordering::Relaxed));
    println!(
        "Cache:           {} pages held, {} evicted",
        cache.len(),
        cache.evictions.load(Ordering::Relaxed)
    );
    println!(
        "Pages:           {} free + {} attached of {} circulating ({} bootstrapped)",
        sys.free_pages(),
        sys.attached_pages(),
        sys.circulating_pages(),
        sys.bootstrapped_pages()
    );
    println!("Run time:        {:?}", run_time);
    println!(
        "Throughput:      {:.0} requests/sec",
        requests as f64 / run_time.as_secs_f64()
    );
    println!("Totals:          {}", total);

    sys.shutdown();
    let waiting = cache.evicted.lock().map(|p| p.len()).unwrap_or(0);
    println!(
        "Live mappings:   {} (cache {}, evicted awaiting reuse {})",
        mapper.live(),
        cache.len(),
        waiting
    );
    println!("\n=== Stress Test Complete ===");
}
