//! Job descriptors: the named units of work the scheduler dispatches.
//!
//! A [`Job`] couples a run body with the bookkeeping the scheduler needs to
//! drive it through its lifecycle: a [`JobDefinition`] (complexity, priority,
//! affinity), an atomic pending-dependency count, the list of triggers to
//! notify on completion, and the state machine below.
//!
//! # State machine
//!
//! ```text
//!                      submit                claim            return
//!   UNSUBMITTED ──────────────► WAITING ──► READY ──► RUNNING ──────► COMPLETING ──► DONE
//!        ▲        (pending==0        ▲                 │   ▲                           │
//!        │         skips WAITING)    │                 ▼   │ re-enqueue                │
//!        │                           │             SUSPENDED                           │
//!        │                           └── trigger fire (pending reaches 0)              │
//!        └──────────────────────────── re-submission for the next cycle ◄──────────────┘
//! ```
//!
//! Only WAITING→READY and SUSPENDED→READY enqueue; only READY→RUNNING
//! dequeues. COMPLETING→DONE is a release store so that any observer of
//! DONE also observes every effect of the run body.
//!
//! # Ownership
//!
//! Jobs are reference-counted. Callers construct an `Arc<Job>`, wire it into
//! triggers (wiring clones the `Arc`), submit it, and keep their handle to
//! observe completion or re-submit next cycle. Lambda jobs created through
//! [`System::submit_lambda`](crate::system::System::submit_lambda) are held
//! only by the scheduler and dropped once DONE.
//!
//! # Cooperative (async) jobs
//!
//! An async job's body is a resumable callable returning a [`Step`]: the
//! continuation-object rendition of a coroutine. The body runs until it
//! reports a suspension verdict; the descriptor itself is the resumption
//! token, and the state machine guarantees at most one such token is
//! outstanding (a suspended job sits in exactly one ready queue or waiter
//! list).

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::trigger::Trigger;

// ============================================================================
// Definition
// ============================================================================

/// Cost hint consumed by batch splitters (task groups). Dispatch ignores it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Complexity {
    Light,
    #[default]
    Normal,
    Heavy,
}

/// Advisory queue-selection tier. Higher tiers are polled first; a running
/// job is never preempted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
}

impl Priority {
    /// Number of priority tiers (one ready queue each).
    pub(crate) const COUNT: usize = 3;

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Constraint on which worker(s) may claim a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Affinity {
    /// Any worker.
    #[default]
    Any,
    /// Only the designated main worker.
    Main,
    /// Only the worker with this id.
    Worker(usize),
    /// Any worker whose id bit is set in the mask.
    WorkerSet(u64),
}

/// Per-job dispatch parameters, fixed during the wiring phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobDefinition {
    pub complexity: Complexity,
    pub priority: Priority,
    pub affinity: Affinity,
}

impl JobDefinition {
    pub fn new(complexity: Complexity, priority: Priority, affinity: Affinity) -> Self {
        Self {
            complexity,
            priority,
            affinity,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }
}

// ============================================================================
// Lifecycle state
// ============================================================================

/// Job lifecycle state. See the module docs for the transition diagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Unsubmitted = 0,
    Waiting = 1,
    Ready = 2,
    Running = 3,
    Suspended = 4,
    Completing = 5,
    Done = 6,
}

impl JobState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unsubmitted,
            1 => Self::Waiting,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Suspended,
            5 => Self::Completing,
            6 => Self::Done,
            _ => unreachable!("invalid job state tag {v}"),
        }
    }
}

// ============================================================================
// Suspension verdict
// ============================================================================

/// Verdict returned by an async job body at each resumption.
///
/// This is the suspension-handle contract: `Yield` re-enqueues the job
/// unconditionally on its own priority queue, `Await` parks it on a
/// trigger's waiter list until the trigger fires, and `Complete` ends the
/// job (the body will not be called again for this submission cycle).
pub enum Step {
    /// Suspend and immediately re-enter the ready queue.
    Yield,
    /// Suspend until the trigger fires. If the trigger's remaining count is
    /// already zero at registration, the await completes synchronously and
    /// the body is resumed without leaving the worker.
    Await(Arc<Trigger>),
    /// The body has run to completion.
    Complete,
}

type SyncBody = Box<dyn FnMut() + Send>;
type AsyncBody = Box<dyn FnMut() -> Step + Send>;

enum Body {
    Sync(Mutex<SyncBody>),
    Async(Mutex<AsyncBody>),
}

// ============================================================================
// Job
// ============================================================================

/// A named unit of work.
///
/// Construct with [`Job::new`] (synchronous body) or [`Job::new_async`]
/// (resumable body), wire dependencies through [`Trigger`], then submit via
/// [`System::submit`](crate::system::System::submit).
pub struct Job {
    name: &'static str,
    definition: Mutex<JobDefinition>,
    state: AtomicU8,
    /// Dependency edges established during wiring. `pending` is re-seeded
    /// from this on every submission, so a wired graph can run each cycle.
    wired_deps: AtomicU32,
    /// Unsatisfied dependencies for the current submission cycle.
    pending: AtomicU32,
    /// Triggers to decrement when this job completes.
    notify: Mutex<Vec<Arc<Trigger>>>,
    body: Body,
}

impl Job {
    /// Create a job with a synchronous run body.
    ///
    /// The body is `FnMut` so the same descriptor can be re-submitted on a
    /// later cycle (per-frame graphs re-fire without re-wiring).
    pub fn new<F>(name: &'static str, definition: JobDefinition, body: F) -> Arc<Self>
    where
        F: FnMut() + Send + 'static,
    {
        Self::with_body(name, definition, Body::Sync(Mutex::new(Box::new(body))))
    }

    /// Create a job with a resumable (cooperative) run body.
    ///
    /// The body is invoked once per resumption and reports a [`Step`]. State
    /// carried across suspensions lives in the closure's captures.
    pub fn new_async<F>(name: &'static str, definition: JobDefinition, body: F) -> Arc<Self>
    where
        F: FnMut() -> Step + Send + 'static,
    {
        Self::with_body(name, definition, Body::Async(Mutex::new(Box::new(body))))
    }

    /// Single-shot wrapper used by the lambda submission paths.
    pub(crate) fn once<F>(name: &'static str, definition: JobDefinition, f: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut f = Some(f);
        Self::new(name, definition, move || {
            let f = f
                .take()
                .expect("single-shot job body invoked a second time");
            f();
        })
    }

    fn with_body(name: &'static str, definition: JobDefinition, body: Body) -> Arc<Self> {
        Arc::new(Self {
            name,
            definition: Mutex::new(definition),
            state: AtomicU8::new(JobState::Unsubmitted as u8),
            wired_deps: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            notify: Mutex::new(Vec::new()),
            body,
        })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn definition(&self) -> JobDefinition {
        *self.definition.lock().expect("definition lock poisoned")
    }

    /// Replace the dispatch parameters. Wiring-phase only.
    ///
    /// # Panics
    ///
    /// Panics if the job is currently submitted (anything other than
    /// UNSUBMITTED or DONE).
    pub fn set_definition(&self, definition: JobDefinition) {
        self.assert_wiring_phase("set_definition");
        *self.definition.lock().expect("definition lock poisoned") = definition;
    }

    /// Current lifecycle state (racy snapshot; for observation only).
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Unsatisfied dependency count for the current cycle (racy snapshot).
    pub fn pending_dependencies(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_async(&self) -> bool {
        matches!(self.body, Body::Async(_))
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    fn assert_wiring_phase(&self, what: &str) {
        let s = self.state();
        assert!(
            s == JobState::Unsubmitted || s == JobState::Done,
            "{what} on job '{}' outside the wiring phase (state {s:?})",
            self.name,
        );
    }

    /// Record one dependency edge. Called by trigger wiring.
    pub(crate) fn add_wired_dependency(&self) {
        self.assert_wiring_phase("dependency wiring");
        self.wired_deps.fetch_add(1, Ordering::AcqRel);
    }

    /// Register a trigger to notify when this job completes.
    ///
    /// Legal before submission or from within the job's own run body (a job
    /// may extend its fan-out before it completes; anything else races the
    /// completion walk).
    pub(crate) fn push_notification(&self, trigger: Arc<Trigger>) {
        let s = self.state();
        assert!(
            s == JobState::Unsubmitted || s == JobState::Done || s == JobState::Running,
            "completion wiring on job '{}' in state {s:?}",
            self.name,
        );
        self.notify
            .lock()
            .expect("notification list lock poisoned")
            .push(trigger);
    }

    /// Snapshot the completion fan-out list.
    ///
    /// Cloned rather than drained: the wiring survives re-submission.
    pub(crate) fn notifications(&self) -> Vec<Arc<Trigger>> {
        self.notify
            .lock()
            .expect("notification list lock poisoned")
            .clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle transitions
    // ------------------------------------------------------------------

    fn transition(&self, from: JobState, to: JobState) {
        if let Err(actual) = self.state.compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            panic!(
                "job '{}': illegal transition {:?} -> {to:?} (was {:?})",
                self.name,
                from,
                JobState::from_u8(actual),
            );
        }
    }

    /// UNSUBMITTED|DONE -> WAITING, re-seeding the pending count.
    ///
    /// # Panics
    ///
    /// Panics if the job is already submitted: submitting a live job is a
    /// contract violation, not a recoverable error.
    pub(crate) fn begin_submission(&self) {
        self.pending
            .store(self.wired_deps.load(Ordering::Acquire), Ordering::Release);
        let fresh = self.state.compare_exchange(
            JobState::Unsubmitted as u8,
            JobState::Waiting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if fresh.is_ok() {
            return;
        }
        // Re-activation of a finished job (the next cycle of a wired graph).
        self.transition(JobState::Done, JobState::Waiting);
    }

    /// WAITING -> READY. The caller enqueues exactly once after this.
    pub(crate) fn make_ready_from_waiting(&self) {
        self.transition(JobState::Waiting, JobState::Ready);
    }

    /// READY -> RUNNING. The claiming worker owns the job from here on.
    pub(crate) fn begin_running(&self) {
        self.transition(JobState::Ready, JobState::Running);
    }

    /// RUNNING -> SUSPENDED (cooperative yield or await).
    pub(crate) fn suspend(&self) {
        self.transition(JobState::Running, JobState::Suspended);
    }

    /// SUSPENDED -> READY. The caller enqueues exactly once after this.
    pub(crate) fn resume_to_ready(&self) {
        self.transition(JobState::Suspended, JobState::Ready);
    }

    /// SUSPENDED -> RUNNING, for an await that completed synchronously.
    pub(crate) fn resume_running(&self) {
        self.transition(JobState::Suspended, JobState::Running);
    }

    /// RUNNING -> COMPLETING. Notification fan-out happens in this state.
    pub(crate) fn begin_completing(&self) {
        self.transition(JobState::Running, JobState::Completing);
    }

    /// COMPLETING -> DONE. Release store: observers of DONE see the body's
    /// effects.
    pub(crate) fn finish(&self) {
        self.state.store(JobState::Done as u8, Ordering::Release);
    }

    /// Consume one pending dependency; true if this was the last one.
    pub(crate) fn complete_dependency(&self) -> bool {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev != 0,
            "job '{}': dependency completed with no pending count; \
             was the job submitted before its dependencies could fire?",
            self.name,
        );
        prev == 1
    }

    // ------------------------------------------------------------------
    // Body invocation (claiming worker only)
    // ------------------------------------------------------------------

    pub(crate) fn run_sync(&self) {
        match &self.body {
            Body::Sync(body) => {
                let mut body = body.lock().expect("job body lock poisoned");
                (*body)();
            }
            Body::Async(_) => unreachable!("run_sync on async job '{}'", self.name),
        }
    }

    pub(crate) fn resume_async(&self) -> Step {
        match &self.body {
            Body::Async(body) => {
                let mut body = body.lock().expect("job body lock poisoned");
                (*body)()
            }
            Body::Sync(_) => unreachable!("resume_async on sync job '{}'", self.name),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pending", &self.pending_dependencies())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
