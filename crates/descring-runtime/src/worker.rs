//! Per-core reclamation workers
//!
//! One OS thread per core drains that core's job queue. Jobs arrive two
//! ways: `schedule_on` queues a job with a ticket the caller blocks on, and
//! `kick` queues a fire-and-forget reclamation pass (deduplicated while one
//! is pending). An idle worker also runs a pass on its own when its park
//! times out with completions waiting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_queue::ArrayQueue;

use descring_core::{kdebug, kerror, CoreId, DescError, DescResult};

use crate::parking::{Parking, PlatformParking};
use crate::reclaim::{free_pools, reclaim_core, ReclaimMode};
use crate::stats::CoreStats;
use crate::system::Shared;

/// Pending jobs per core before `schedule_on` fails
const JOB_QUEUE_DEPTH: usize = 64;

/// Work a reclamation worker performs for its core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    /// Drain both completion lists, recycling buffers into the pool
    Reclaim,
    /// Drain both completion lists, unmapping and freeing every buffer
    Teardown,
    /// Unmap and free every pooled page
    FreePools,
}

struct JobDone {
    finished: AtomicBool,
    /// Descriptors reclaimed or pages freed by the job
    count: AtomicUsize,
    parking: PlatformParking,
}

impl JobDone {
    fn new() -> Self {
        Self {
            finished: AtomicBool::new(false),
            count: AtomicUsize::new(0),
            parking: PlatformParking::new(),
        }
    }

    fn finish(&self, count: usize) {
        self.count.store(count, Ordering::Relaxed);
        self.finished.store(true, Ordering::Release);
        self.parking.wake_all();
    }
}

/// Completion signal of a scheduled job
pub struct JobTicket {
    done: Arc<JobDone>,
}

impl JobTicket {
    /// Block until the job has run, returning what it reclaimed or freed
    pub fn wait(&self) -> usize {
        loop {
            let token = self.done.parking.prepare();
            if self.is_done() {
                return self.done.count.load(Ordering::Relaxed);
            }
            self.done.parking.park(token, None);
        }
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.done.finished.load(Ordering::Acquire)
    }
}

struct Queued {
    job: Job,
    done: Option<Arc<JobDone>>,
}

/// Job queue and idle parking of one core's worker
pub(crate) struct JobQueue {
    queue: ArrayQueue<Queued>,
    parking: PlatformParking,
    kick_pending: AtomicBool,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: ArrayQueue::new(JOB_QUEUE_DEPTH),
            parking: PlatformParking::new(),
            kick_pending: AtomicBool::new(false),
        }
    }
}

/// Queue `job` on `core`'s worker and return a ticket to wait on
pub(crate) fn schedule_on(shared: &Shared, core: CoreId, job: Job) -> DescResult<JobTicket> {
    if shared.shutdown.load(Ordering::Acquire) {
        return Err(DescError::WorkerUnavailable(core));
    }

    let jobs = &shared.core(core).jobs;
    let done = Arc::new(JobDone::new());
    jobs.queue
        .push(Queued {
            job,
            done: Some(Arc::clone(&done)),
        })
        .map_err(|_| DescError::WorkerUnavailable(core))?;
    jobs.parking.wake_one();

    Ok(JobTicket { done })
}

/// Ask `core`'s worker for a reclamation pass without waiting
///
/// Returns `false` if a kick is already pending or the queue is full.
pub(crate) fn kick(shared: &Shared, core: CoreId) -> bool {
    let cs = shared.core(core);
    if cs.jobs.kick_pending.swap(true, Ordering::AcqRel) {
        return false;
    }

    let queued = cs.jobs.queue.push(Queued {
        job: Job::Reclaim,
        done: None,
    });
    if queued.is_err() {
        cs.jobs.kick_pending.store(false, Ordering::Release);
        return false;
    }

    cs.jobs.parking.wake_one();
    CoreStats::bump(&cs.stats.kicks);
    true
}

/// Run `job` for `core` on the calling thread
pub(crate) fn run_job(shared: &Shared, core: CoreId, job: Job) -> usize {
    match job {
        Job::Reclaim => reclaim_core(shared, core, ReclaimMode::Recycle),
        Job::Teardown => reclaim_core(shared, core, ReclaimMode::Teardown),
        Job::FreePools => free_pools(shared, core),
    }
}

fn run_queued(shared: &Shared, core: CoreId, item: Queued) {
    if item.job == Job::Reclaim {
        // Later kicks must queue a fresh pass: this one may drain too early
        shared
            .core(core)
            .jobs
            .kick_pending
            .store(false, Ordering::Release);
    }

    let count = run_job(shared, core, item.job);

    if let Some(done) = item.done {
        done.finish(count);
    }
}

/// Worker thread main loop
fn worker_loop(shared: Arc<Shared>, core: CoreId) {
    let cs = shared.core(core);
    let timeout = shared.config.worker_park_timeout;
    kdebug!("{}: reclamation worker started", core);

    loop {
        let token = cs.jobs.parking.prepare();

        if let Some(item) = cs.jobs.queue.pop() {
            run_queued(&shared, core, item);
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let woken = cs.jobs.parking.park(token, Some(timeout));
        if !woken && (!cs.lazy.is_empty() || !cs.finals.is_empty()) {
            reclaim_core(&shared, core, ReclaimMode::Recycle);
        }
    }

    while let Some(item) = cs.jobs.queue.pop() {
        run_queued(&shared, core, item);
    }
    kdebug!("{}: reclamation worker stopped", core);
}

/// Handles of the per-core worker threads
pub(crate) struct ReclaimWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl ReclaimWorkers {
    /// Start one worker per core
    pub(crate) fn spawn(shared: &Arc<Shared>) -> DescResult<Self> {
        let num_cores = shared.cores.len();
        let mut workers = Self {
            handles: Vec::with_capacity(num_cores),
        };

        for index in 0..num_cores {
            let core = CoreId::from(index);
            let worker_shared = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name(format!("descring-reclaim-{}", index))
                .spawn(move || worker_loop(worker_shared, core));

            match spawned {
                Ok(handle) => workers.handles.push(handle),
                Err(e) => {
                    kerror!("{}: cannot spawn reclamation worker: {}", core, e);
                    workers.stop(shared);
                    return Err(DescError::WorkerUnavailable(core));
                }
            }
        }

        Ok(workers)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and join every worker
    ///
    /// Jobs already queued still run before a worker exits.
    pub(crate) fn stop(self, shared: &Shared) {
        shared.shutdown.store(true, Ordering::Release);
        for cs in shared.cores.iter() {
            cs.jobs.parking.wake_all();
        }
        for handle in self.handles {
            if handle.join().is_err() {
                kerror!("reclamation worker panicked");
            }
        }
    }
}
