//! Worker identity for the current thread.
//!
//! Job bodies sometimes want to know which worker is running them (shard a
//! scratch table, label a profile sample). Each dispatch thread binds a
//! [`WorkerTag`] for its whole lifetime; the tag publishes the worker id
//! through a thread-local and withdraws it when the thread winds down,
//! unwinding included. Identity is per pool instance by construction: the
//! tag lives inside the worker thread a `System` spawned, so two
//! schedulers in one process never share a registry.

use std::cell::Cell;

thread_local! {
    static CURRENT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Worker id of the current thread, if it is a pool's dispatch thread.
///
/// Returns `None` everywhere else: submitting threads, task-group joiners,
/// test threads.
#[inline]
pub fn current_worker_id() -> Option<usize> {
    CURRENT.with(Cell::get)
}

/// Binds the current thread to a worker id for as long as it is held.
///
/// The dispatch loop holds one of these next to its abort guard; dropping
/// it (normal exit or unwind) withdraws the id so a recycled thread can
/// never impersonate a worker.
pub(crate) struct WorkerTag;

impl WorkerTag {
    /// # Panics
    ///
    /// Panics if the thread is already bound; one thread drives at most one
    /// worker loop.
    pub(crate) fn bind(worker: usize) -> Self {
        CURRENT.with(|c| {
            if let Some(bound) = c.get() {
                panic!("thread is already bound to worker {bound}");
            }
            c.set(Some(worker));
        });
        Self
    }
}

impl Drop for WorkerTag {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(None));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn non_worker_thread_has_none() {
        assert_eq!(current_worker_id(), None);
    }

    #[test]
    fn tag_publishes_for_its_lifetime() {
        let tag = WorkerTag::bind(3);
        assert_eq!(current_worker_id(), Some(3));
        drop(tag);
        assert_eq!(current_worker_id(), None);
    }

    #[test]
    fn ids_are_thread_isolated() {
        let _tag = WorkerTag::bind(0);

        thread::spawn(|| {
            assert_eq!(current_worker_id(), None);
            let _inner = WorkerTag::bind(1);
            assert_eq!(current_worker_id(), Some(1));
        })
        .join()
        .unwrap();

        assert_eq!(current_worker_id(), Some(0));
    }

    #[test]
    #[should_panic(expected = "already bound")]
    fn double_bind_panics() {
        let _outer = WorkerTag::bind(0);
        let _inner = WorkerTag::bind(1);
    }
}
