//! Job scheduling over a dedicated rayon pool.
//!
//! ## Ordering
//!
//! `schedule` returns a fence that completes after the job body returns.
//! The body only starts once its dependency fence has completed, so chaining
//! fences orders stages and `Fence::combine` expresses "after both".
//!
//! ## Access declarations
//!
//! Every job carries a `JobDesc` naming the buffers it reads and writes.
//! While a job runs its declaration is registered with the `AccessTracker`;
//! a job whose declaration overlaps a running job's writes (or whose writes
//! overlap a running job's reads) is refused, counted as a conflict and
//! logged. That only happens when a fence is missing.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use super::buffer::BufferId;
use super::fence::Fence;
use crate::error::JobError;

/// What a job touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDesc {
    name: &'static str,
    reads: Vec<BufferId>,
    writes: Vec<BufferId>,
}

impl JobDesc {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Replace the shared-access set.
    pub fn reads<I>(mut self, buffers: I) -> Self
    where
        I: IntoIterator<Item = BufferId>,
    {
        self.reads = sanitize(buffers);
        self.reads.retain(|id| !self.writes.contains(id));
        self
    }

    /// Replace the exclusive-access set. A buffer both read and written is
    /// treated as written.
    pub fn writes<I>(mut self, buffers: I) -> Self
    where
        I: IntoIterator<Item = BufferId>,
    {
        self.writes = sanitize(buffers);
        let writes = &self.writes;
        self.reads.retain(|id| !writes.contains(id));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read_buffers(&self) -> &[BufferId] {
        &self.reads
    }

    pub fn write_buffers(&self) -> &[BufferId] {
        &self.writes
    }
}

fn sanitize<I>(buffers: I) -> Vec<BufferId>
where
    I: IntoIterator<Item = BufferId>,
{
    let mut list: Vec<_> = buffers.into_iter().collect();
    list.sort();
    list.dedup();
    list
}

#[derive(Default, Clone, Copy)]
struct Access {
    readers: usize,
    writer: bool,
}

/// Live registry of declared accesses of running jobs.
#[derive(Default)]
pub struct AccessTracker {
    live: Mutex<HashMap<BufferId, Access>>,
}

impl AccessTracker {
    pub fn acquire(&self, desc: &JobDesc) -> Result<(), JobError> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);

        for id in &desc.writes {
            if let Some(access) = live.get(id) {
                if access.writer || access.readers > 0 {
                    return Err(JobError::AccessConflict {
                        job: desc.name,
                        buffer: *id,
                    });
                }
            }
        }
        for id in &desc.reads {
            if live.get(id).is_some_and(|access| access.writer) {
                return Err(JobError::AccessConflict {
                    job: desc.name,
                    buffer: *id,
                });
            }
        }

        for id in &desc.writes {
            live.entry(*id).or_default().writer = true;
        }
        for id in &desc.reads {
            live.entry(*id).or_default().readers += 1;
        }
        Ok(())
    }

    pub fn release(&self, desc: &JobDesc) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &desc.writes {
            live.remove(id);
        }
        for id in &desc.reads {
            if let Some(access) = live.get_mut(id) {
                access.readers = access.readers.saturating_sub(1);
                if access.readers == 0 && !access.writer {
                    live.remove(id);
                }
            }
        }
    }

    /// Buffers currently held by some job.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Scheduler counters since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub scheduled: u64,
    /// Data-parallel jobs skipped because their input was empty.
    pub skipped_empty: u64,
    pub failures: u64,
    pub conflicts: u64,
}

impl JobStats {
    /// Counters accumulated between `earlier` and `self`.
    pub fn since(&self, earlier: &JobStats) -> JobStats {
        JobStats {
            scheduled: self.scheduled - earlier.scheduled,
            skipped_empty: self.skipped_empty - earlier.skipped_empty,
            failures: self.failures - earlier.failures,
            conflicts: self.conflicts - earlier.conflicts,
        }
    }

    /// No job failed or was refused.
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && self.conflicts == 0
    }
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    skipped_empty: AtomicU64,
    failures: AtomicU64,
    conflicts: AtomicU64,
}

/// Runs jobs on a worker pool, ordered by fences.
pub struct JobGraph {
    pool: Arc<ThreadPool>,
    tracker: Arc<AccessTracker>,
    counters: Arc<Counters>,
}

impl JobGraph {
    /// Build the worker pool. `worker_threads == 0` uses rayon's default.
    pub fn new(worker_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|i| format!("sim-worker-{i}"))
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            tracker: Arc::new(AccessTracker::default()),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` once `dependency` completes.
    pub fn schedule<F>(&self, desc: JobDesc, dependency: &Fence, job: F) -> Fence
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);

        let fence = Fence::pending();
        let done = fence.clone();
        let pool = Arc::clone(&self.pool);
        let tracker = Arc::clone(&self.tracker);
        let counters = Arc::clone(&self.counters);

        dependency.on_complete(move || {
            pool.spawn(move || {
                run_job(&desc, job, &tracker, &counters);
                done.signal();
            });
        });
        fence
    }

    /// Schedule a data-parallel job over `len` items. With nothing to process
    /// no job is created and `dependency` is handed back unchanged.
    pub fn schedule_for<F>(&self, desc: JobDesc, len: usize, dependency: &Fence, job: F) -> Fence
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        if len == 0 {
            trace!(job = desc.name(), "empty input, skipped");
            self.counters.skipped_empty.fetch_add(1, Ordering::Relaxed);
            return dependency.clone();
        }
        self.schedule(desc, dependency, job)
    }

    /// Run `f` inside the worker pool from the main thread, blocking until it
    /// returns. Used at rendezvous points for batched external work.
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    pub fn stats(&self) -> JobStats {
        JobStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            skipped_empty: self.counters.skipped_empty.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            conflicts: self.counters.conflicts.load(Ordering::Relaxed),
        }
    }
}

fn run_job<F>(desc: &JobDesc, job: F, tracker: &AccessTracker, counters: &Counters)
where
    F: FnOnce() -> Result<(), JobError>,
{
    if let Err(err) = tracker.acquire(desc) {
        counters.conflicts.fetch_add(1, Ordering::Relaxed);
        error!(job = desc.name(), %err, "job refused");
        return;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|_| Err(JobError::Panicked { job: desc.name() }));
    tracker.release(desc);

    if let Err(err) = outcome {
        counters.failures.fetch_add(1, Ordering::Relaxed);
        error!(job = desc.name(), %err, "job failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::Buffer;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_desc_dedups_and_prefers_writes() {
        let a = Buffer::new("a", 0u8);
        let b = Buffer::new("b", 0u8);
        let desc = JobDesc::new("job")
            .reads([a.id(), a.id(), b.id()])
            .writes([b.id()]);
        assert_eq!(desc.read_buffers(), &[a.id()]);
        assert_eq!(desc.write_buffers(), &[b.id()]);
    }

    #[test]
    fn test_chained_jobs_run_in_order() {
        let graph = JobGraph::new(4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut fence = Fence::completed();
        for step in 0..8 {
            let log = Arc::clone(&log);
            fence = graph.schedule(JobDesc::new("step"), &fence, move || {
                log.lock().unwrap().push(step);
                Ok(())
            });
        }
        fence.complete();
        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_combined_dependency_waits_for_both() {
        let graph = JobGraph::new(4).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let make = |delay: u64| {
            let count = Arc::clone(&count);
            graph.schedule(JobDesc::new("producer"), &Fence::completed(), move || {
                std::thread::sleep(Duration::from_millis(delay));
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        let a = make(5);
        let b = make(30);

        let seen = Arc::new(AtomicUsize::new(0));
        let observer = {
            let count = Arc::clone(&count);
            let seen = Arc::clone(&seen);
            graph.schedule(JobDesc::new("consumer"), &Fence::combine(&[a, b]), move || {
                seen.store(count.load(Ordering::SeqCst), Ordering::SeqCst);
                Ok(())
            })
        };
        observer.complete();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_empty_input_passes_dependency_through() {
        let graph = JobGraph::new(2).unwrap();
        let dep = graph.schedule(JobDesc::new("first"), &Fence::completed(), || Ok(()));
        let skipped = graph.schedule_for(JobDesc::new("empty"), 0, &dep, || {
            panic!("must not run");
        });
        assert!(Fence::ptr_eq(&dep, &skipped));
        skipped.complete();
        let stats = graph.stats();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.skipped_empty, 1);
        assert_eq!(stats.failures, 0);
    }

    #[test]
    fn test_overlapping_writes_are_refused() {
        let graph = JobGraph::new(2).unwrap();
        let shared = Buffer::new("shared", 0u32);
        let (started_tx, started_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();

        let first = graph.schedule(
            JobDesc::new("first").writes([shared.id()]),
            &Fence::completed(),
            move || {
                let _ = started_tx.send(());
                let _ = go_rx.recv_timeout(Duration::from_secs(5));
                Ok(())
            },
        );
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = graph.schedule(
            JobDesc::new("second").reads([shared.id()]),
            &Fence::completed(),
            || Ok(()),
        );
        second.complete();
        go_tx.send(()).unwrap();
        first.complete();

        let stats = graph.stats();
        assert_eq!(stats.conflicts, 1);
        assert!(!stats.is_clean());
    }

    #[test]
    fn test_failing_job_still_signals() {
        let graph = JobGraph::new(2).unwrap();
        let ran_after = Arc::new(AtomicUsize::new(0));

        let failing = graph.schedule(JobDesc::new("boom"), &Fence::completed(), || {
            panic!("job body panicked");
        });
        let erroring = graph.schedule(JobDesc::new("contended"), &failing, || {
            Err(JobError::Contended { buffer: "x" })
        });
        let after = {
            let ran_after = Arc::clone(&ran_after);
            graph.schedule(JobDesc::new("after"), &erroring, move || {
                ran_after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        after.complete();

        assert_eq!(ran_after.load(Ordering::SeqCst), 1);
        assert_eq!(graph.stats().failures, 2);
    }

    #[test]
    fn test_tracker_releases_after_job() {
        let tracker = AccessTracker::default();
        let a = Buffer::new("a", 0u8);
        let read = JobDesc::new("r").reads([a.id()]);
        let write = JobDesc::new("w").writes([a.id()]);

        tracker.acquire(&read).unwrap();
        tracker.acquire(&read).unwrap();
        assert!(tracker.acquire(&write).is_err());
        tracker.release(&read);
        tracker.release(&read);
        assert_eq!(tracker.live_count(), 0);
        assert!(tracker.acquire(&write).is_ok());
    }
}
