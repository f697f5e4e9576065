//! In-process job scheduler for frame-shaped workloads.
//!
//! A fixed pool of worker threads executes short-lived, named jobs wired
//! into explicit dependency graphs, with first-class cooperative suspension
//! for jobs that need to pause mid-body. Built for latency-sensitive hosts
//! (game loops, interactive simulation, data-parallel compute) that carve a
//! tick into thousands of small tasks and care about producer/consumer
//! ordering more than about throughput ceilings.
//!
//! # The moving parts
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`job`] | Job descriptors: definition (complexity/priority/affinity), pending-dependency count, lifecycle state machine, sync and resumable bodies |
//! | [`trigger`] | Fan-in join points: collect N completions, then release successors and resume awaiting jobs; re-armable for per-frame reuse |
//! | [`system`] | The scheduler: per-priority lock-free ready queues, affinity routing, worker dispatch loop, sleep/wake, shutdown |
//! | [`task_group`] | Scoped batching: dynamic fan-in, `join`, and the `foreach_flat` / `foreach_log` data-parallel helpers |
//! | [`worker_id`] | Thread-local worker id for profiling from inside job bodies |
//! | [`metrics`] | Per-worker counters merged at shutdown |
//!
//! # Control flow
//!
//! ```text
//!   user code ──submit──► ready queue (by priority/affinity)
//!                              │ claim
//!                              ▼
//!                           worker ──run──► body returns / yields / awaits
//!                              │ complete
//!                              ▼
//!                      notify triggers ──fire──► enqueue successors,
//!                                               resume awaiters
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sched_rs::{System, TaskGroup};
//!
//! let sys = System::new(4);
//! let group = TaskGroup::new("frame", &sys);
//! let mut samples = vec![0.0f32; 4096];
//! group.foreach_flat(&mut samples, 256, |view| {
//!     for v in view {
//!         *v = v.sqrt();
//!     }
//! });
//! group.join();
//! ```
//!
//! # Ownership
//!
//! Jobs and triggers are reference-counted graph nodes: callers keep their
//! `Arc`s, wiring stores clones, and the scheduler never frees a descriptor
//! the caller still holds. Lambda submissions are the one exception: the
//! scheduler holds the only reference and drops it once the job is DONE.
//!
//! # What this is not
//!
//! No distributed scheduling, no persistence, no preemption, and no
//! fairness across priority tiers: higher tiers are simply polled first.
//! Cancellation does not exist below shutdown, which abandons unclaimed
//! jobs in place.

pub mod job;
pub mod metrics;
pub mod system;
pub mod task_group;
pub mod trigger;
pub mod worker_id;

pub use job::{Affinity, Complexity, Job, JobDefinition, JobState, Priority, Step};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use system::{SubmitError, System, SystemConfig};
pub use task_group::TaskGroup;
pub use trigger::Trigger;
pub use worker_id::current_worker_id;
