//! Task groups: scoped batch submission behind one dynamic fan-in.
//!
//! A [`TaskGroup`] owns a private trigger whose arity grows with every
//! submission, plus a guard count that keeps the trigger from firing while
//! the batch is still being built. [`TaskGroup::join`] retires the guard and
//! blocks the calling thread (on the trigger's condvar, not the worker wake)
//! until the last job of the batch has completed.
//!
//! The data-parallel helpers fan a mutable slice out as disjoint views:
//!
//! - [`foreach_flat`](TaskGroup::foreach_flat) cuts the slice into
//!   `ceil(len / chunk)` contiguous views with deterministic boundaries and
//!   submits one job per view.
//! - [`foreach_log`](TaskGroup::foreach_log) submits a single job that
//!   splits recursively: while a view is larger than `min_chunk` and depth
//!   remains, the job halves it and submits both halves, so the critical
//!   path is logarithmic in the slice length while total work is unchanged.
//!
//! Both helpers block on the group trigger before returning: the leaf jobs
//! borrow the slice, so the call must not return while any view is live.
//! A `join()` afterward is a no-op that still satisfies "returns only after
//! every leaf completed".
//!
//! If the system is shut down while a group still has unclaimed jobs, those
//! jobs are abandoned and the group's trigger never fires; a `join` racing
//! such a shutdown does not return. Keep the system alive for as long as
//! any group is joining.

use std::sync::Arc;

use crate::job::{Job, JobDefinition};
use crate::system::{Shared, SubmitError, System};
use crate::trigger::Trigger;

/// Scoped submission facade over the scheduler.
///
/// Groups are cheap; create one per batch. A group is reusable: after a
/// `join` it re-arms and accepts the next batch.
pub struct TaskGroup {
    name: &'static str,
    shared: Arc<Shared>,
    trigger: Arc<Trigger>,
}

impl TaskGroup {
    /// One owed notification that `join` retires; keeps early completions
    /// from firing the trigger while the batch is still being submitted.
    const GUARD: u32 = 1;

    pub fn new(name: &'static str, system: &System) -> Self {
        Self {
            name,
            shared: system.shared_handle(),
            trigger: Trigger::new(name, Self::GUARD),
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Submit a one-shot closure into the group.
    ///
    /// # Errors
    ///
    /// [`SubmitError::ShuttingDown`] if the system has shut down; the
    /// group's accounting is unwound so a later `join` still returns.
    pub fn submit<F>(&self, f: F) -> Result<(), SubmitError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.trigger.add_dependents(1);
        let job = Job::once(self.name, JobDefinition::default(), f);
        Trigger::append_job_to_be_trigger(&self.trigger, &job);
        match self.shared.submit_job(&job) {
            Ok(()) => Ok(()),
            Err(e) => {
                // The job will never run; retire its notification here.
                self.trigger.notify(&self.shared);
                Err(e)
            }
        }
    }

    /// Block until every job submitted into the group has completed.
    ///
    /// Uses the trigger's condvar, so the calling thread sleeps without
    /// disturbing the worker wake. On return the group is re-armed for the
    /// next batch.
    pub fn join(&self) {
        let observed = self.trigger.generation_snapshot();
        self.trigger.notify(&self.shared);
        self.trigger.wait_past(observed);
        self.trigger.rearm_dynamic(Self::GUARD);
    }

    /// Run `f` over disjoint contiguous views of `data`, one job per view
    /// of at most `chunk` elements, and block until all views are done.
    ///
    /// Partition boundaries are deterministic: views start at multiples of
    /// `chunk`, and only the last view may be short.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is zero.
    pub fn foreach_flat<T, F>(&self, data: &mut [T], chunk: usize, f: F)
    where
        T: Send + 'static,
        F: Fn(&mut [T]) + Send + Sync + 'static,
    {
        assert!(chunk > 0, "foreach chunk size must be > 0");
        let f = Arc::new(f);
        for view in data.chunks_mut(chunk) {
            let view = SliceView::new(view);
            let f = Arc::clone(&f);
            let _ = self.submit(move || {
                // SAFETY: `chunks_mut` views are disjoint, and `foreach_flat`
                // blocks on the group trigger below, so no view outlives the
                // borrow of `data`.
                f(unsafe { view.into_slice() });
            });
        }
        self.join();
    }

    /// Run `f` over views produced by recursive binary splitting, and block
    /// until all leaves are done.
    ///
    /// A job whose view is larger than `min_chunk` while split depth
    /// remains submits two jobs over the halves and completes; otherwise it
    /// runs `f` on its view. The fan-out keeps the chain of splits, and
    /// therefore the wall-clock critical path, logarithmic in `data.len()`.
    ///
    /// # Panics
    ///
    /// Panics if `min_chunk` is zero.
    pub fn foreach_log<T, F>(&self, data: &mut [T], min_chunk: usize, max_depth: u32, f: F)
    where
        T: Send + 'static,
        F: Fn(&mut [T]) + Send + Sync + 'static,
    {
        assert!(min_chunk > 0, "foreach min_chunk must be > 0");
        spawn_split_node(
            self.name,
            &self.shared,
            &self.trigger,
            SliceView::new(data),
            min_chunk,
            max_depth,
            Arc::new(f),
        );
        self.join();
    }
}

/// Submit one node of the logarithmic split tree.
///
/// The trigger grows by one owed notification per node before the node is
/// submitted; a splitting node widens the trigger for its children from
/// inside its own run body, where its own outstanding notification keeps
/// the count above zero.
fn spawn_split_node<T, F>(
    name: &'static str,
    shared: &Arc<Shared>,
    trigger: &Arc<Trigger>,
    view: SliceView<T>,
    min_chunk: usize,
    depth_left: u32,
    f: Arc<F>,
) where
    T: Send + 'static,
    F: Fn(&mut [T]) + Send + Sync + 'static,
{
    trigger.add_dependents(1);
    let shared_in = Arc::clone(shared);
    let trigger_in = Arc::clone(trigger);
    let job = Job::once(name, JobDefinition::default(), move || {
        if view.len() > min_chunk && depth_left > 0 {
            let mid = view.len() / 2;
            let (lo, hi) = view.split_at(mid);
            spawn_split_node(
                name,
                &shared_in,
                &trigger_in,
                lo,
                min_chunk,
                depth_left - 1,
                Arc::clone(&f),
            );
            spawn_split_node(name, &shared_in, &trigger_in, hi, min_chunk, depth_left - 1, f);
        } else {
            // SAFETY: split views are disjoint by construction, and the
            // `foreach_log` entry point blocks on the group trigger, so no
            // view outlives the borrow of the source slice.
            f(unsafe { view.into_slice() });
        }
    });
    Trigger::append_job_to_be_trigger(trigger, &job);
    if shared.submit_job(&job).is_err() {
        // Abandoned before it could run; retire its notification.
        trigger.notify(shared);
    }
}

// ============================================================================
// Raw slice views
// ============================================================================

/// Pointer-and-length view of a sub-slice, detached from the slice's
/// lifetime so it can ride inside a `'static` job body.
///
/// Soundness rests on two properties enforced by the foreach helpers: views
/// handed to jobs are pairwise disjoint, and the helper that created them
/// does not return until every job holding one has completed.
struct SliceView<T> {
    ptr: *mut T,
    len: usize,
}

// SAFETY: a view is an exclusive, disjoint window into a slice whose owner
// is blocked for the view's whole life; moving it across threads is moving
// the `&mut` it stands for.
unsafe impl<T: Send> Send for SliceView<T> {}

impl<T> SliceView<T> {
    fn new(slice: &mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn split_at(self, mid: usize) -> (Self, Self) {
        assert!(mid <= self.len);
        let lo = Self {
            ptr: self.ptr,
            len: mid,
        };
        // SAFETY: `mid <= len`, so the offset stays inside the original
        // allocation and the two halves cannot overlap.
        let hi = Self {
            ptr: unsafe { self.ptr.add(mid) },
            len: self.len - mid,
        };
        (lo, hi)
    }

    /// # Safety
    ///
    /// The caller must guarantee the original slice outlives the returned
    /// reference and that no other live view overlaps it.
    unsafe fn into_slice<'a>(self) -> &'a mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

// ============================================================================
// Tests
// ============================================================================
