//! Scheduler core: worker pool, ready queues, and the dispatch protocol.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────────────────────────────────────────────┐
//!                 │                        System                          │
//!                 │                                                        │
//!  submit ────────┼──► ready queues (lock-free MPMC, one per tier)        │
//!  (any thread)   │        HIGH ──► NORMAL ──► LOW                        │
//!                 │        │                                               │
//!                 │        │    main queue (worker 0 only)                 │
//!                 │        │    per-worker queues (specific-id affinity)   │
//!                 │        ▼                                               │
//!                 │    ┌─────────┬─────────┬─────────┐                     │
//!                 │    │Worker 0 │Worker 1 │Worker N │  claim → run →      │
//!                 │    │ (main)  │         │         │  notify triggers    │
//!                 │    └─────────┴─────────┴─────────┘                     │
//!                 │        ▲                                               │
//!                 │   Parker/Unparker wake, sleeper count, stop flag       │
//!                 └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Dispatch
//!
//! Each worker loops over a fixed claim order: its own per-worker queue,
//! then (for the designated main worker) the MAIN-affinity queue, then the
//! shared tiers from HIGH down to LOW. Priority is advisory: higher tiers
//! are polled first, nothing is preempted. Empty sweeps of the claim order
//! back off with pauses that grow per consecutive miss, yield the
//! timeslice once at the sweep budget, and then park with a bounded
//! timeout so the stop flag is always observed within a millisecond.
//!
//! # Ordering guarantees
//!
//! A completing job walks its trigger fan-out before storing DONE with
//! release ordering; a claiming worker acquires on the state transition to
//! RUNNING. Together with the release/acquire pair inside the queues, every
//! effect of a dependency's run body is visible to any job it enabled.
//!
//! # Shutdown
//!
//! [`System::shutdown`] (also run by `Drop`) closes the submission gate,
//! raises the stop flag, wakes all sleepers, and joins the workers. Workers
//! finish the job they have claimed and exit; jobs still queued are
//! abandoned in their pre-terminal state, observable through their pending
//! counts and triggers. Submission after shutdown is rejected with
//! [`SubmitError::ShuttingDown`] and leaves the job UNSUBMITTED.
//!
//! # Failure policy
//!
//! The hot path is non-failing by contract. Programmer errors (double
//! submission, wiring a live job, affinity naming a worker outside the
//! pool) panic with a diagnostic. A panic that reaches a worker aborts the
//! process: job bodies are non-failing by contract, and swallowing the
//! unwind would leave dependency counts mid-update.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::CachePadded;

use crate::job::{Affinity, Job, JobDefinition, Priority, Step};
use crate::metrics::{MetricsSnapshot, WorkerMetrics};
use crate::trigger::AwaitOutcome;
use crate::worker_id;

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler configuration. [`System::new`] uses the defaults with an
/// explicit worker count; tune the rest through [`System::with_config`].
#[derive(Clone, Copy, Debug)]
pub struct SystemConfig {
    /// Number of worker threads. Fixed for the lifetime of the system.
    pub workers: usize,

    /// Which worker drains the MAIN-affinity queue. Defaults to worker 0.
    pub main_worker: usize,

    /// Empty claim-order sweeps a worker tolerates before parking.
    ///
    /// Each miss pauses a little longer than the last; the budget bounds
    /// how long a worker chases a dispatch burst before it sleeps. Higher
    /// favors latency for bursty frame workloads, lower favors CPU when
    /// the pool is genuinely idle.
    pub idle_sweeps: u32,

    /// Bounded park timeout. Workers re-check the stop flag at least this
    /// often, which is what makes shutdown observable without a wake.
    pub park_timeout: Duration,

    /// Pin each worker to a core (requires the `affinity` feature).
    pub pin_workers: bool,
}

impl SystemConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.workers > 0, "workers must be > 0");
        assert!(
            self.main_worker < self.workers,
            "main_worker {} out of range for {} workers",
            self.main_worker,
            self.workers
        );
        assert!(self.idle_sweeps > 0, "idle_sweeps must be > 0");
        assert!(
            self.park_timeout > Duration::ZERO,
            "park_timeout must be > 0"
        );
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            main_worker: 0,
            idle_sweeps: 24,
            park_timeout: Duration::from_millis(1),
            pin_workers: false,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Rejection returned by the submission paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// Shutdown has been initiated. The job was left UNSUBMITTED.
    ShuttingDown,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShuttingDown => write!(f, "scheduler is shutting down"),
        }
    }
}

impl std::error::Error for SubmitError {}

// ============================================================================
// Shared state
// ============================================================================

/// State shared between the owner and all workers.
///
/// Immutable after construction except the stop/accepting flags and the
/// counters; the queues are internally synchronized.
pub(crate) struct Shared {
    /// One MPMC lock-free queue per priority tier, indexed by
    /// [`Priority::index`].
    ready: [SegQueue<Arc<Job>>; Priority::COUNT],

    /// MAIN-affinity jobs; drained only by `main_worker`.
    main_queue: SegQueue<Arc<Job>>,

    /// Specific-id affinity; consulted by its worker before any shared
    /// queue.
    worker_queues: Vec<SegQueue<Arc<Job>>>,

    /// Submission gate. Cleared at shutdown; checked before any job state
    /// is touched so a rejected job stays UNSUBMITTED.
    accepting: AtomicBool,

    /// Once true, workers exit after draining their current claim.
    stop: AtomicBool,

    /// Jobs currently claimed and executing. Zero again by the time the
    /// workers have been joined.
    running: CachePadded<AtomicUsize>,

    /// Workers currently parked. Lets submitters skip the wake syscall when
    /// nobody is asleep; the bounded park timeout covers the race.
    sleepers: CachePadded<AtomicUsize>,

    unparkers: Vec<Unparker>,
    /// Round-robin cursor for [`Shared::wake_one`].
    next_unpark: AtomicUsize,
    /// Round-robin cursor for worker-set routing.
    set_cursor: AtomicUsize,

    worker_count: usize,
    main_worker: usize,
}

impl Shared {
    fn new(worker_count: usize, main_worker: usize, unparkers: Vec<Unparker>) -> Self {
        Self {
            ready: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
            main_queue: SegQueue::new(),
            worker_queues: (0..worker_count).map(|_| SegQueue::new()).collect(),
            accepting: AtomicBool::new(true),
            stop: AtomicBool::new(false),
            running: CachePadded::new(AtomicUsize::new(0)),
            sleepers: CachePadded::new(AtomicUsize::new(0)),
            unparkers,
            next_unpark: AtomicUsize::new(0),
            set_cursor: AtomicUsize::new(0),
            worker_count,
            main_worker,
        }
    }

    /// Queue-less shared state for exercising routing and the trigger
    /// protocol without live workers.
    #[cfg(test)]
    pub(crate) fn detached(worker_count: usize) -> Arc<Self> {
        Arc::new(Self::new(worker_count, 0, Vec::new()))
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// The single submission path: gate check, UNSUBMITTED→WAITING, and the
    /// immediate WAITING→READY hop for jobs with no pending dependencies.
    pub(crate) fn submit_job(&self, job: &Arc<Job>) -> Result<(), SubmitError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShuttingDown);
        }
        job.begin_submission();
        if job.pending_dependencies() == 0 {
            job.make_ready_from_waiting();
            self.enqueue(Arc::clone(job));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queue routing
    // ------------------------------------------------------------------

    /// Place a READY job on the queue selected by its definition.
    pub(crate) fn enqueue(&self, job: Arc<Job>) {
        let definition = job.definition();
        self.enqueue_with(job, definition.priority, definition.affinity);
    }

    /// Place a READY job at an explicit priority (waiter resumption uses the
    /// priority recorded at await time), keeping its affinity.
    pub(crate) fn enqueue_at(&self, job: Arc<Job>, priority: Priority) {
        let affinity = job.definition().affinity;
        self.enqueue_with(job, priority, affinity);
    }

    fn enqueue_with(&self, job: Arc<Job>, priority: Priority, affinity: Affinity) {
        match affinity {
            Affinity::Any => {
                self.ready[priority.index()].push(job);
                self.wake_one();
            }
            Affinity::Main => {
                self.main_queue.push(job);
                self.wake_worker(self.main_worker);
            }
            Affinity::Worker(id) => {
                assert!(
                    id < self.worker_count,
                    "job affinity names worker {id} but the pool has {} workers",
                    self.worker_count
                );
                self.worker_queues[id].push(job);
                self.wake_worker(id);
            }
            Affinity::WorkerSet(mask) => {
                let id = self.pick_set_member(mask);
                self.worker_queues[id].push(job);
                self.wake_worker(id);
            }
        }
    }

    /// Pick a member of the affinity mask, round-robin across submissions.
    ///
    /// Bits at or above the worker count are ignored; a mask that selects no
    /// live worker is a wiring error.
    fn pick_set_member(&self, mask: u64) -> usize {
        let usable = if self.worker_count >= u64::BITS as usize {
            mask
        } else {
            mask & ((1u64 << self.worker_count) - 1)
        };
        assert!(
            usable != 0,
            "worker-set affinity {mask:#x} selects no worker in a pool of {}",
            self.worker_count
        );
        let nth = self.set_cursor.fetch_add(1, Ordering::Relaxed) as u32 % usable.count_ones();
        let mut bits = usable;
        for _ in 0..nth {
            bits &= bits - 1;
        }
        bits.trailing_zeros() as usize
    }

    /// Claim the next job for `worker`: own queue, MAIN queue (designated
    /// worker only), then the shared tiers from HIGH down.
    pub(crate) fn claim(&self, worker: usize) -> Option<Arc<Job>> {
        if let Some(job) = self.worker_queues[worker].pop() {
            return Some(job);
        }
        if worker == self.main_worker {
            if let Some(job) = self.main_queue.pop() {
                return Some(job);
            }
        }
        for tier in [Priority::High, Priority::Normal, Priority::Low] {
            if let Some(job) = self.ready[tier.index()].pop() {
                return Some(job);
            }
        }
        None
    }

    #[cfg(test)]
    pub(crate) fn pop_any_for_test(&self) -> Option<(Arc<Job>, Priority)> {
        for tier in [Priority::High, Priority::Normal, Priority::Low] {
            if let Some(job) = self.ready[tier.index()].pop() {
                return Some((job, tier));
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Wake discipline
    // ------------------------------------------------------------------

    /// Wake one worker, round-robin, skipping the syscall when no worker is
    /// parked. A worker headed for its park at this instant misses the wake
    /// but re-checks the queues within the bounded timeout.
    fn wake_one(&self) {
        if self.sleepers.load(Ordering::SeqCst) == 0 {
            return;
        }
        let n = self.unparkers.len();
        if n == 0 {
            return;
        }
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % n;
        self.unparkers[idx].unpark();
    }

    /// Targeted wake for MAIN and specific-worker routing.
    fn wake_worker(&self, worker: usize) {
        if let Some(u) = self.unparkers.get(worker) {
            u.unpark();
        }
    }

    fn wake_all(&self) {
        for u in &self.unparkers {
            u.unpark();
        }
    }
}

// ============================================================================
// System
// ============================================================================

/// The scheduler: a fixed pool of workers draining the ready queues.
///
/// Jobs are caller-owned `Arc`s submitted by reference; lambda submissions
/// allocate a transient descriptor the scheduler drops once it is DONE.
/// Dropping the system shuts it down (see the module docs).
pub struct System {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<WorkerMetrics>>,
    snapshot: Option<MetricsSnapshot>,
}

impl System {
    /// Spawn a pool of `workers` threads. Returns once every worker is
    /// running its dispatch loop (workers park until work arrives).
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    pub fn new(workers: usize) -> Self {
        Self::with_config(SystemConfig {
            workers,
            ..SystemConfig::default()
        })
    }

    /// Spawn a pool from an explicit configuration.
    pub fn with_config(cfg: SystemConfig) -> Self {
        cfg.validate();

        let mut parkers = Vec::with_capacity(cfg.workers);
        let mut unparkers = Vec::with_capacity(cfg.workers);
        for _ in 0..cfg.workers {
            let p = Parker::new();
            unparkers.push(p.unparker().clone());
            parkers.push(p);
        }

        let shared = Arc::new(Shared::new(cfg.workers, cfg.main_worker, unparkers));
        let mut threads = Vec::with_capacity(cfg.workers);

        // Spawn in reverse so pop() hands each thread the right parker.
        for worker_id in (0..cfg.workers).rev() {
            let shared = Arc::clone(&shared);
            let parker = parkers.pop().expect("parkers length mismatch");
            let thread_cfg = cfg;

            let th = thread::Builder::new()
                .name(format!("sched-worker-{worker_id}"))
                .spawn(move || {
                    let _abort = AbortOnPanic { worker: worker_id };
                    let _tag = worker_id::WorkerTag::bind(worker_id);

                    #[cfg(feature = "affinity")]
                    if thread_cfg.pin_workers {
                        pin_current_thread(worker_id);
                    }

                    worker_loop(&thread_cfg, &shared, worker_id, parker)
                })
                .expect("failed to spawn worker thread");

            threads.push(th);
        }
        threads.reverse();

        Self {
            shared,
            threads,
            snapshot: None,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Submit a caller-owned job. The job must be freshly constructed or
    /// DONE from a previous cycle, and fully wired.
    ///
    /// # Errors
    ///
    /// [`SubmitError::ShuttingDown`] after shutdown was initiated; the job
    /// is left UNSUBMITTED.
    ///
    /// # Panics
    ///
    /// Panics if the job is already submitted (contract violation).
    pub fn submit(&self, job: &Arc<Job>) -> Result<(), SubmitError> {
        self.shared.submit_job(job)
    }

    /// Submit a one-shot closure as a scheduler-owned job with the default
    /// definition. The descriptor is dropped once the job is DONE.
    pub fn submit_lambda<F>(&self, name: &'static str, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_lambda_with(name, JobDefinition::default(), f)
    }

    /// [`submit_lambda`](Self::submit_lambda) with an explicit definition.
    pub fn submit_lambda_with<F>(
        &self,
        name: &'static str,
        definition: JobDefinition,
        f: F,
    ) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job::once(name, definition, f);
        self.shared.submit_job(&job)
    }

    /// Submit a resumable closure as a scheduler-owned cooperative job. The
    /// body is called once per resumption and reports a [`Step`].
    pub fn submit_async_lambda<F>(&self, name: &'static str, f: F) -> Result<(), SubmitError>
    where
        F: FnMut() -> Step + Send + 'static,
    {
        self.submit_async_lambda_with(name, JobDefinition::default(), f)
    }

    /// [`submit_async_lambda`](Self::submit_async_lambda) with an explicit
    /// definition.
    pub fn submit_async_lambda_with<F>(
        &self,
        name: &'static str,
        definition: JobDefinition,
        f: F,
    ) -> Result<(), SubmitError>
    where
        F: FnMut() -> Step + Send + 'static,
    {
        let job = Job::new_async(name, definition, f);
        self.shared.submit_job(&job)
    }

    /// Close the submission gate, wake and join all workers, and return the
    /// merged metrics. Idempotent; also run by `Drop`.
    ///
    /// Workers finish the job they currently hold. Jobs still queued or
    /// waiting are abandoned in place.
    pub fn shutdown(&mut self) -> MetricsSnapshot {
        if let Some(snapshot) = &self.snapshot {
            return snapshot.clone();
        }

        self.shared.accepting.store(false, Ordering::Release);
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake_all();

        let mut snapshot = MetricsSnapshot {
            workers: self.shared.worker_count,
            ..MetricsSnapshot::default()
        };
        for th in self.threads.drain(..) {
            let metrics = th.join().expect("worker thread terminated abnormally");
            snapshot.merge_worker(&metrics);
        }
        debug_assert_eq!(self.shared.running.load(Ordering::Acquire), 0);

        self.snapshot = Some(snapshot.clone());
        snapshot
    }

    pub(crate) fn shared_handle(&self) -> Arc<Shared> {
        Arc::clone(&self.shared)
    }
}

impl Drop for System {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Worker loop
// ============================================================================

fn worker_loop(
    cfg: &SystemConfig,
    shared: &Shared,
    worker: usize,
    parker: Parker,
) -> WorkerMetrics {
    let mut metrics = WorkerMetrics::default();
    let mut backoff = ClaimBackoff::new();

    loop {
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        match shared.claim(worker) {
            Some(job) => {
                backoff.reset();
                run_job(shared, job, &mut metrics);
            }
            None => {
                if backoff.empty_sweep(cfg.idle_sweeps) {
                    metrics.parks += 1;
                    shared.sleepers.fetch_add(1, Ordering::SeqCst);
                    parker.park_timeout(cfg.park_timeout);
                    shared.sleepers.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }
    }

    metrics
}

/// Drive one claimed job to its next suspension point or to completion.
fn run_job(shared: &Shared, job: Arc<Job>, metrics: &mut WorkerMetrics) {
    job.begin_running();
    shared.running.fetch_add(1, Ordering::AcqRel);
    metrics.jobs_claimed += 1;

    if job.is_async() {
        loop {
            match job.resume_async() {
                Step::Complete => {
                    complete(shared, &job, metrics);
                    break;
                }
                Step::Yield => {
                    // Unconditional re-enqueue on the job's own tier; the
                    // claimant that pops it next is the resumption.
                    metrics.yields += 1;
                    job.suspend();
                    job.resume_to_ready();
                    shared.enqueue(Arc::clone(&job));
                    break;
                }
                Step::Await(trigger) => {
                    metrics.awaits += 1;
                    job.suspend();
                    let priority = job.definition().priority;
                    match trigger.register_waiter(Arc::clone(&job), priority) {
                        AwaitOutcome::Registered => break,
                        AwaitOutcome::ReadyNow => {
                            // Nothing left to wait for in this cycle; resume
                            // without ever leaving the worker.
                            job.resume_running();
                        }
                    }
                }
            }
        }
    } else {
        job.run_sync();
        complete(shared, &job, metrics);
    }

    shared.running.fetch_sub(1, Ordering::AcqRel);
}

/// COMPLETING: walk the trigger fan-out, then DONE under a release store.
fn complete(shared: &Shared, job: &Arc<Job>, metrics: &mut WorkerMetrics) {
    job.begin_completing();
    for trigger in job.notifications() {
        trigger.notify(shared);
    }
    job.finish();
    metrics.jobs_completed += 1;
}

/// Backoff between empty sweeps of a worker's claim order.
///
/// Work arrives in bursts here: one completing job typically enables a
/// handful of successors through its triggers, and those land in the
/// queues within the same dispatch window. So the first misses after a
/// claimed job cost almost nothing (a pause that grows with each
/// consecutive miss), the worker gives up its timeslice exactly once when
/// the sweep budget runs out, and every sweep after that sleeps on the
/// parker until woken or timed out.
struct ClaimBackoff {
    empty_sweeps: u32,
}

impl ClaimBackoff {
    fn new() -> Self {
        Self { empty_sweeps: 0 }
    }

    /// A sweep produced a job; the next miss starts cheap again.
    fn reset(&mut self) {
        self.empty_sweeps = 0;
    }

    /// Record one empty sweep of the claim order. Returns true once the
    /// worker should park instead of re-sweeping.
    fn empty_sweep(&mut self, sweep_budget: u32) -> bool {
        self.empty_sweeps = self.empty_sweeps.saturating_add(1);

        if self.empty_sweeps < sweep_budget {
            // Pause proportional to the miss streak: the first re-sweeps
            // are nearly free, the later ones stop hammering the queues.
            for _ in 0..self.empty_sweeps {
                std::hint::spin_loop();
            }
            return false;
        }

        if self.empty_sweeps == sweep_budget {
            // One timeslice donation on the way down to the parker.
            thread::yield_now();
            return false;
        }

        true
    }
}

/// Aborts the process if a worker unwinds. Job bodies are non-failing by
/// contract; an unwound worker would strand queued jobs and leave trigger
/// counts mid-update, so the only consistent outcome is to stop the world.
struct AbortOnPanic {
    worker: usize,
}

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            eprintln!(
                "worker {} panicked; scheduler state is unrecoverable, aborting",
                self.worker
            );
            std::process::abort();
        }
    }
}

#[cfg(feature = "affinity")]
fn pin_current_thread(worker_id: usize) {
    let cores = match core_affinity::get_core_ids() {
        Some(v) if !v.is_empty() => v,
        _ => {
            eprintln!("WARN: no core ids available for worker {worker_id}, skipping pinning");
            return;
        }
    };
    let core = cores[worker_id % cores.len()];
    if !core_affinity::set_for_current(core) {
        eprintln!("WARN: failed to pin worker {worker_id} to core {:?}", core.id);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Affinity, Complexity, JobState};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn job_with(name: &'static str, definition: JobDefinition) -> Arc<Job> {
        Job::new(name, definition, || {})
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    #[should_panic(expected = "workers must be > 0")]
    fn zero_workers_rejected() {
        let _ = System::new(0);
    }

    #[test]
    #[should_panic(expected = "main_worker")]
    fn main_worker_out_of_range_rejected() {
        let _ = System::with_config(SystemConfig {
            workers: 2,
            main_worker: 2,
            ..SystemConfig::default()
        });
    }

    #[test]
    fn claim_polls_high_tier_first() {
        let shared = Shared::detached(1);
        for (name, priority) in [
            ("low", Priority::Low),
            ("normal", Priority::Normal),
            ("high", Priority::High),
        ] {
            let job = job_with(
                name,
                JobDefinition::default().with_priority(priority),
            );
            shared.enqueue(job);
        }

        let order: Vec<&str> = std::iter::from_fn(|| shared.claim(0))
            .map(|j| j.name())
            .collect();
        assert_eq!(order, ["high", "normal", "low"]);
    }

    #[test]
    fn main_affinity_visible_only_to_main_worker() {
        let shared = Shared::detached(2);
        shared.enqueue(job_with(
            "main-only",
            JobDefinition::default().with_affinity(Affinity::Main),
        ));

        assert!(shared.claim(1).is_none());
        assert_eq!(shared.claim(0).map(|j| j.name()), Some("main-only"));
    }

    #[test]
    fn specific_worker_routing() {
        let shared = Shared::detached(2);
        shared.enqueue(job_with(
            "pinned",
            JobDefinition::default().with_affinity(Affinity::Worker(1)),
        ));

        assert!(shared.claim(0).is_none());
        assert_eq!(shared.claim(1).map(|j| j.name()), Some("pinned"));
    }

    #[test]
    fn worker_set_routing_round_robins_members() {
        let shared = Shared::detached(4);
        for _ in 0..4 {
            shared.enqueue(job_with(
                "masked",
                JobDefinition::default().with_affinity(Affinity::WorkerSet(0b0101)),
            ));
        }

        // Workers 0 and 2 each get two; 1 and 3 see nothing.
        assert_eq!(shared.worker_queues[0].len(), 2);
        assert_eq!(shared.worker_queues[1].len(), 0);
        assert_eq!(shared.worker_queues[2].len(), 2);
        assert_eq!(shared.worker_queues[3].len(), 0);
    }

    #[test]
    #[should_panic(expected = "selects no worker")]
    fn empty_worker_set_rejected() {
        let shared = Shared::detached(2);
        shared.enqueue(job_with(
            "nowhere",
            // Only bits above the pool size.
            JobDefinition::default().with_affinity(Affinity::WorkerSet(0b100)),
        ));
    }

    #[test]
    #[should_panic(expected = "names worker")]
    fn out_of_pool_worker_rejected() {
        let shared = Shared::detached(2);
        shared.enqueue(job_with(
            "nowhere",
            JobDefinition::default().with_affinity(Affinity::Worker(5)),
        ));
    }

    #[test]
    fn submitted_job_with_no_deps_goes_ready() {
        let shared = Shared::detached(1);
        let job = job_with("ready", JobDefinition::default());
        shared.submit_job(&job).unwrap();
        assert_eq!(job.state(), JobState::Ready);
        assert!(shared.pop_any_for_test().is_some());
    }

    #[test]
    fn lambda_executes_on_pool() {
        let sys = System::new(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        sys.submit_lambda("hit", move || {
            h.fetch_add(1, Ordering::Release);
        })
        .unwrap();

        wait_until("lambda completion", || hits.load(Ordering::Acquire) == 1);
    }

    #[test]
    fn shutdown_rejects_submission_and_reports_metrics() {
        let mut sys = System::new(2);
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        sys.submit_lambda("before", move || {
            h.fetch_add(1, Ordering::Release);
        })
        .unwrap();
        wait_until("pre-shutdown job", || hits.load(Ordering::Acquire) == 1);

        let snapshot = sys.shutdown();
        assert_eq!(snapshot.workers, 2);
        assert!(snapshot.jobs_completed >= 1);

        let late = job_with("late", JobDefinition::default());
        assert_eq!(sys.submit(&late), Err(SubmitError::ShuttingDown));
        assert_eq!(late.state(), JobState::Unsubmitted);

        // Idempotent.
        let again = sys.shutdown();
        assert_eq!(again.jobs_completed, snapshot.jobs_completed);
    }

    #[test]
    fn claim_backoff_parks_once_the_sweep_budget_is_spent() {
        let mut backoff = ClaimBackoff::new();
        // Sweeps up to and including the budget stay on the CPU.
        for sweep in 1..=24 {
            assert!(
                !backoff.empty_sweep(24),
                "sweep {sweep} should not park yet"
            );
        }
        // Every sweep past the budget parks.
        assert!(backoff.empty_sweep(24));
        assert!(backoff.empty_sweep(24));

        // A claimed job makes the next miss cheap again.
        backoff.reset();
        assert!(!backoff.empty_sweep(24));
    }

    #[test]
    fn complexity_is_carried_but_ignored_by_dispatch() {
        let shared = Shared::detached(1);
        let job = job_with(
            "heavy",
            JobDefinition::default().with_complexity(Complexity::Heavy),
        );
        shared.enqueue(job);
        let (claimed, tier) = shared.pop_any_for_test().unwrap();
        assert_eq!(claimed.definition().complexity, Complexity::Heavy);
        assert_eq!(tier, Priority::Normal);
    }
}
