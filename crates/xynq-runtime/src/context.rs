//! Task-facing runtime API.
//!
//! A [`TaskContext`] is handed to every task entry. It is the only door a
//! fiber has into the scheduler: suspension (`wait_event`, `yield_now`,
//! `exit`), spawning (`perform_async`, `perform_sync`) and the per-worker
//! user-data slot.

use std::any::Any;

use crate::event::{EventFlags, EventQueue, EventSource};
use crate::task::{Task, TaskTuple};
use crate::worker;

/// Handle to the running task. Methods take `&self`; state lives behind
/// the task pointer so the handle can be shared with stream adapters that
/// need to suspend (a reader and a writer over one connection).
pub struct TaskContext {
    task: *mut Task,
}

impl TaskContext {
    pub(crate) fn from_raw(task: *mut Task) -> Self {
        Self { task }
    }

    /// Index of the worker currently running this task. May change across
    /// suspension points — fibers migrate.
    pub fn thread_index(&self) -> usize {
        unsafe { (*(*self.task).worker).index }
    }

    /// The pool's shared event queue.
    pub fn events(&self) -> &EventQueue {
        unsafe { &(*(*self.task).pool).events }
    }

    /// Typed access to the current worker's user-data slot (installed by
    /// the `before_thread_start` hook).
    ///
    /// Panics if no user data was installed or the type does not match —
    /// both are wiring bugs, not runtime conditions.
    pub fn user_data<T: Any>(&self) -> &T {
        let worker = unsafe { &*(*self.task).worker };
        let slot = unsafe { &*worker.user_data.get() };
        slot.as_ref()
            .expect("no per-thread user data installed")
            .downcast_ref::<T>()
            .expect("per-thread user data has a different type")
    }

    /// Suspend until `source` reports readiness matching `flags`.
    ///
    /// The registration itself happens on the worker's main context after
    /// the fiber has switched out — registering here would let another
    /// worker resume a fiber that has not finished suspending.
    pub fn wait_event(&self, source: &EventSource, flags: EventFlags) {
        unsafe {
            let worker = &*(*self.task).worker;
            let exec = &mut *worker.exec.get();
            debug_assert!(!exec.has_pending_event);
            exec.pending_event = source as *const EventSource;
            exec.pending_event_flags = flags;
            exec.has_pending_event = true;
            (*self.task).suspend();
        }
    }

    /// Give other tasks a turn; this task is requeued on the current
    /// worker and continues next scheduling round.
    pub fn yield_now(&self) {
        unsafe {
            let worker = &*(*self.task).worker;
            (*worker.exec.get()).yield_requested = true;
            (*self.task).suspend();
        }
    }

    /// Request full-pool shutdown and suspend forever. Queued tasks might
    /// never finish and will not release resources they hold.
    pub fn exit(&self) {
        unsafe {
            let worker = &*(*self.task).worker;
            tracing::debug!(target: "xynq::task", "exit requested: {}", (*self.task).debug_name);
            worker.running.store(false, std::sync::atomic::Ordering::Relaxed);
            (*self.task).suspend();
        }
    }

    /// Queue a new task on the current worker. Returns immediately; the
    /// task runs when a worker dequeues (or steals) it.
    pub fn perform_async(&self, tuple: TaskTuple) {
        unsafe {
            let worker = &*(*self.task).worker;
            worker::queue_task(worker, tuple);
            // Expensive relative to a queue push, but sleeping peers have
            // to learn there is work to steal.
            (*(*self.task).pool).events.interrupt_all();
        }
    }

    /// Run `f` immediately on this task's fiber, blocking it until done.
    pub fn perform_sync(&self, f: impl FnOnce(&TaskContext)) {
        f(self)
    }
}
