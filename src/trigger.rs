//! Fan-in triggers: the join points of the dependency graph.
//!
//! A [`Trigger`] collects a fixed number of completion notifications (its
//! arity) and, on the notification that brings the remaining count to zero,
//! performs the fire action:
//!
//! 1. re-arm: reset the remaining count to the arity, so the same graph can
//!    fire again next cycle;
//! 2. detach the waiter list and re-enqueue every suspended job on it at the
//!    priority recorded when it awaited;
//! 3. decrement each successor job's pending-dependency count, moving jobs
//!    that reach zero onto the ready queues in insertion order.
//!
//! The order of (2) and (3) is deliberately unspecified; both precede
//! anything a downstream observer of the fire can see.
//!
//! # Concurrency
//!
//! The remaining count is a bare atomic: completion notifiers pay one
//! `fetch_sub` each, and exactly one of them (the one that observes the
//! decrement to zero) runs the fire action. The successor and waiter lists
//! sit behind a single mutex that is contended only at wiring time, at await
//! registration, and during the fire itself.
//!
//! # Blocking waits
//!
//! Each fire also bumps a generation counter under a condvar. This is how
//! non-worker threads block on a trigger (task-group `join`); workers never
//! touch it outside the fire path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::job::{Job, Priority};
use crate::system::Shared;

/// Outcome of registering an async job on a trigger's waiter list.
pub(crate) enum AwaitOutcome {
    /// The job is parked; the next fire re-enqueues it.
    Registered,
    /// The trigger's remaining count was already zero; the await completes
    /// synchronously and the caller resumes the job without suspending.
    ReadyNow,
}

struct Waiter {
    job: Arc<Job>,
    priority: Priority,
}

#[derive(Default)]
struct Lists {
    successors: Vec<Arc<Job>>,
    waiters: Vec<Waiter>,
}

/// Re-armable fan-in join point.
///
/// Wiring (before the involved jobs are submitted):
///
/// - [`job_will_notify_me`](Trigger::job_will_notify_me) makes a job a
///   *successor*: the fire enables it.
/// - [`append_job_to_be_trigger`](Trigger::append_job_to_be_trigger) makes a
///   job a *notifier*: its completion counts toward the arity.
///
/// Async jobs may additionally await a trigger via
/// [`Step::Await`](crate::job::Step::Await).
pub struct Trigger {
    name: &'static str,
    /// Fan-in width. Grown at run time by task groups; otherwise fixed at
    /// construction.
    arity: AtomicU32,
    /// Notifications still owed before the next fire. Never exceeds arity.
    remaining: AtomicU32,
    lists: Mutex<Lists>,
    /// Fire count, for blocking waiters.
    generation: Mutex<u64>,
    fired: Condvar,
}

impl Trigger {
    /// Create a trigger that fires after `arity` completion notifications.
    pub fn new(name: &'static str, arity: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            arity: AtomicU32::new(arity),
            remaining: AtomicU32::new(arity),
            lists: Mutex::new(Lists::default()),
            generation: Mutex::new(0),
            fired: Condvar::new(),
        })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn arity(&self) -> u32 {
        self.arity.load(Ordering::Acquire)
    }

    /// Notifications still owed before the next fire (racy snapshot).
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Make `job` a successor of this trigger: when the trigger fires, one
    /// of `job`'s pending dependencies is satisfied. Wiring-time only.
    pub fn job_will_notify_me(&self, job: &Arc<Job>) {
        job.add_wired_dependency();
        self.lists
            .lock()
            .expect("trigger lists lock poisoned")
            .successors
            .push(Arc::clone(job));
    }

    /// Make `dep` a notifier of `this`: when `dep` completes it decrements
    /// the trigger's remaining count. Wiring-time, or from within `dep`'s
    /// own run body.
    ///
    /// Associated function because the trigger must store a clone of its own
    /// `Arc` inside the job's fan-out list.
    pub fn append_job_to_be_trigger(this: &Arc<Trigger>, dep: &Job) {
        dep.push_notification(Arc::clone(this));
    }

    /// Widen the fan-in by `n` pending notifications.
    ///
    /// Used by task groups, which grow their private trigger per submission
    /// (including from inside running jobs, where the running job's own
    /// outstanding notification keeps the count above zero).
    pub(crate) fn add_dependents(&self, n: u32) {
        self.arity.fetch_add(n, Ordering::AcqRel);
        self.remaining.fetch_add(n, Ordering::AcqRel);
    }

    /// Reset to a fresh dynamic state with `guard` owed notifications.
    ///
    /// Task groups call this after a join so the group can be reused.
    pub(crate) fn rearm_dynamic(&self, guard: u32) {
        self.arity.store(guard, Ordering::Release);
        self.remaining.store(guard, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Notification protocol
    // ------------------------------------------------------------------

    /// Consume one notification; the caller that brings the count to zero
    /// runs the fire action on its own thread.
    pub(crate) fn notify(&self, shared: &Shared) {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        assert!(
            prev != 0,
            "trigger '{}' notified more times than its arity",
            self.name,
        );
        if prev == 1 {
            self.fire(shared);
        }
    }

    fn fire(&self, shared: &Shared) {
        // Re-arm first: a successor that completes back into this trigger
        // during the walk below must see a full count.
        self.remaining
            .store(self.arity.load(Ordering::Acquire), Ordering::Release);

        let waiters = {
            let mut lists = self.lists.lock().expect("trigger lists lock poisoned");
            for job in &lists.successors {
                if job.complete_dependency() {
                    job.make_ready_from_waiting();
                    shared.enqueue(Arc::clone(job));
                }
            }
            std::mem::take(&mut lists.waiters)
        };

        for w in waiters {
            w.job.resume_to_ready();
            shared.enqueue_at(w.job, w.priority);
        }

        let mut generation = self.generation.lock().expect("generation lock poisoned");
        *generation += 1;
        self.fired.notify_all();
    }

    /// Park a suspended async job on the waiter list.
    ///
    /// Returns [`AwaitOutcome::ReadyNow`] when the remaining count is
    /// already zero, i.e. the fire for this cycle is owed nothing further;
    /// the caller then resumes the job synchronously.
    pub(crate) fn register_waiter(&self, job: Arc<Job>, priority: Priority) -> AwaitOutcome {
        let mut lists = self.lists.lock().expect("trigger lists lock poisoned");
        if self.remaining.load(Ordering::Acquire) == 0 {
            return AwaitOutcome::ReadyNow;
        }
        lists.waiters.push(Waiter { job, priority });
        AwaitOutcome::Registered
    }

    // ------------------------------------------------------------------
    // Blocking waits (non-worker threads)
    // ------------------------------------------------------------------

    /// Current fire count.
    pub(crate) fn generation_snapshot(&self) -> u64 {
        *self.generation.lock().expect("generation lock poisoned")
    }

    /// Block until the fire count exceeds `observed`.
    pub(crate) fn wait_past(&self, observed: u64) {
        let mut generation = self.generation.lock().expect("generation lock poisoned");
        while *generation <= observed {
            generation = self
                .fired
                .wait(generation)
                .expect("generation lock poisoned");
        }
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
