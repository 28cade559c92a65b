//! Worker threads — the heart of the scheduler.
//!
//! Each worker loops: wait on the shared event queue, requeue tasks whose
//! events fired, then drain tasks — its own queue first, then a
//! round-robin steal scan over its peers. Exactly one fiber executes per
//! worker at any time; the worker's main context is the sole scheduler.

use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::event::{EventFlags, EventSource};
use crate::fiber::ExecContext;
use crate::manager::PoolShared;
use crate::ring::MrswRing;
use crate::task::{Task, TaskState, TaskTuple};

const LOCAL_QUEUE_CAPACITY: usize = 1024;

/// The contract a suspending fiber leaves for its scheduler: either a
/// pending event registration, a yield request, or nothing (the entry
/// returned).
pub(crate) struct ExecutionState {
    pub current_task: *mut Task,
    pub pending_event: *const EventSource,
    pub pending_event_flags: EventFlags,
    pub has_pending_event: bool,
    pub yield_requested: bool,
}

impl ExecutionState {
    const fn new() -> Self {
        Self {
            current_task: std::ptr::null_mut(),
            pending_event: std::ptr::null(),
            pending_event_flags: EventFlags::empty(),
            has_pending_event: false,
            yield_requested: false,
        }
    }
}

/// Per-worker state, cache-line aligned. `exec` and `user_data` are only
/// touched by the owning thread (and by fibers it is currently running);
/// the queue and flags are the cross-thread surface.
#[repr(align(64))]
pub(crate) struct WorkerState {
    pub index: usize,
    pub running: AtomicBool,
    pub finished: AtomicBool,
    pub queue: MrswRing<TaskTuple>,
    pub user_data: UnsafeCell<Option<Box<dyn Any + Send>>>,
    pub exec: UnsafeCell<ExecutionState>,
}

// exec/user_data: single-writer (the owning thread). queue/flags: atomic
// or internally locked. The raw task pointers in exec are hand-offs.
unsafe impl Send for WorkerState {}
unsafe impl Sync for WorkerState {}

impl WorkerState {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            running: AtomicBool::new(true),
            finished: AtomicBool::new(false),
            queue: MrswRing::new(LOCAL_QUEUE_CAPACITY),
            user_data: UnsafeCell::new(None),
            exec: UnsafeCell::new(ExecutionState::new()),
        }
    }
}

pub(crate) fn queue_task(worker: &WorkerState, tuple: TaskTuple) {
    if worker.queue.push(tuple).is_err() {
        // Bounded ring: the caller asked for more in-flight tasks than the
        // queue holds. Dropping is the documented overflow policy.
        tracing::error!(
            target: "xynq::task",
            "worker {} local queue overflow, dropping task",
            worker.index
        );
    }
}

/// The worker main loop.
pub(crate) fn thread_proc(pool: &PoolShared, index: usize) {
    let worker = &pool.workers[index];

    if pool.pin_threads {
        let core = index % num_cores();
        tracing::info!(target: "xynq::task", "pinning worker {} to cpu {}", index, core);
        if !pin_current_thread(core) {
            tracing::warn!(target: "xynq::task", "failed to pin worker {} to core {}", index, core);
        }
    }

    while worker.running.load(Ordering::Relaxed) {
        let events = pool.events.wait(index, -1);

        for event in events {
            let task = event.user_handle() as *mut Task;
            if task.is_null() {
                // Pure wakeup signal, no fiber bound to it.
                continue;
            }
            queue_task(worker, TaskTuple::resumed(task));
        }

        while let Some(mut tuple) = dequeue_next(pool, index) {
            if tuple.task.is_null() {
                tuple.task = create_task(&mut tuple);
            }
            let task = tuple.task;
            let state = unsafe { (*task).state() };
            let mut main_context = ExecContext::new();

            unsafe {
                match state {
                    TaskState::NotStarted => {
                        pre_task(worker, task);
                        (*task).execute(worker, pool, &mut main_context);
                        post_task(pool, worker, task);
                    }
                    TaskState::Suspended => {
                        pre_task(worker, task);
                        (*task).resume(worker, pool, &mut main_context);
                        post_task(pool, worker, task);
                    }
                    TaskState::Executing => {
                        unreachable!("task dequeued while executing")
                    }
                }
            }
        }
    }

    worker.finished.store(true, Ordering::Release);
}

/// Pop the next task: local queue first, then scan peers round robin
/// starting at our own index. The scan is the steal step.
fn dequeue_next(pool: &PoolShared, index: usize) -> Option<TaskTuple> {
    let workers = &pool.workers;
    if let Some(tuple) = workers[index].queue.pop() {
        return Some(tuple);
    }

    let n = workers.len();
    for i in index..index + n {
        let victim = &workers[i % n];
        if let Some(tuple) = victim.queue.pop() {
            if victim.index != index {
                tracing::trace!(
                    target: "xynq::task",
                    "worker {} stole a task from worker {}",
                    index, victim.index
                );
            }
            return Some(tuple);
        }
    }

    None
}

fn create_task(tuple: &mut TaskTuple) -> *mut Task {
    let entry = tuple.entry.take().expect("task tuple without entry");
    debug_assert!(tuple.stack_size <= crate::task::TASK_STACK_SIZE);
    let task = Task::create(entry, tuple.debug_name);
    tracing::trace!(target: "xynq::task", "created task '{}'", tuple.debug_name);
    Box::into_raw(task)
}

unsafe fn pre_task(worker: &WorkerState, task: *mut Task) {
    let exec = &mut *worker.exec.get();
    debug_assert!(exec.current_task.is_null());
    exec.current_task = task;
}

/// Inspect what the fiber left behind when it switched out.
///
/// The reactor registration must happen here — after the switch back to
/// the main context — and never from inside the fiber: another worker
/// could otherwise receive readiness and resume a fiber that has not
/// actually suspended yet.
unsafe fn post_task(pool: &PoolShared, worker: &WorkerState, task: *mut Task) {
    let exec = &mut *worker.exec.get();

    if exec.has_pending_event {
        debug_assert_eq!((*task).state(), TaskState::Suspended);
        debug_assert!(!exec.pending_event.is_null());
        let source = &*exec.pending_event;
        pool.events
            .add_event(source, exec.pending_event_flags, task as *mut ());
        exec.pending_event = std::ptr::null();
        exec.has_pending_event = false;
    } else if exec.yield_requested {
        exec.yield_requested = false;
        queue_task(worker, TaskTuple::resumed(task));
    } else {
        // Entry returned (or the task exited): the fiber is done.
        tracing::trace!(target: "xynq::task", "destroying task '{}'", (*task).debug_name);
        drop(Box::from_raw(task));
    }

    exec.current_task = std::ptr::null_mut();
}

pub(crate) fn num_cores() -> usize {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n <= 0 {
        1
    } else {
        n as usize
    }
}

fn pin_current_thread(core: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}
