//! Tasks — fibers bound to an entry function.
//!
//! A [`TaskTuple`] describes work: either a not-yet-started entry (the
//! fiber is created lazily on first dequeue) or a pointer to an existing
//! suspended task being requeued after a wake-up. The [`Task`] itself owns
//! the fiber context and its stack buffer.

use crate::context::TaskContext;
use crate::fiber::ExecContext;
use crate::manager::PoolShared;
use crate::worker::WorkerState;

/// Fixed stack buffer per task. Sized with headroom over the 16 KiB
/// minimum so formatting and logging inside fibers stay safe.
pub const TASK_STACK_SIZE: usize = 64 * 1024;

/// Smallest stack a task may request.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

#[cfg(debug_assertions)]
const STACK_FILL_PATTERN: u32 = 0xC1D2_E3F4;

pub type TaskEntry = Box<dyn FnOnce(&TaskContext) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    NotStarted,
    Executing,
    Suspended,
}

#[repr(C, align(16))]
struct StackBuf([u8; TASK_STACK_SIZE]);

/// A fiber-backed task. Created by the worker that first dequeues its
/// tuple, resumed by whichever worker receives its readiness event,
/// destroyed by the worker that observes its entry return.
pub struct Task {
    pub(crate) context: ExecContext,
    pub(crate) entry: Option<TaskEntry>,
    pub(crate) state: TaskState,
    pub(crate) worker: *const WorkerState,
    pub(crate) pool: *const PoolShared,
    pub(crate) debug_name: &'static str,
    #[cfg(debug_assertions)]
    pub(crate) used_stack: usize,
    stack_buf: StackBuf,
}

// A task is only ever touched by the worker currently running or
// scheduling it; migration between workers is hand-off, not sharing.
unsafe impl Send for Task {}

impl Task {
    pub(crate) fn create(entry: TaskEntry, debug_name: &'static str) -> Box<Task> {
        Box::new(Task {
            context: ExecContext::new(),
            entry: Some(entry),
            state: TaskState::NotStarted,
            worker: std::ptr::null(),
            pool: std::ptr::null(),
            debug_name,
            #[cfg(debug_assertions)]
            used_stack: 0,
            stack_buf: StackBuf([0u8; TASK_STACK_SIZE]),
        })
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn stack_size(&self) -> usize {
        TASK_STACK_SIZE
    }

    /// First run. Enters the fiber; returns when it suspends or its entry
    /// returns.
    ///
    /// # Safety
    ///
    /// Caller is the scheduling worker; `worker`/`pool` must outlive the
    /// task.
    pub(crate) unsafe fn execute(
        &mut self,
        worker: *const WorkerState,
        pool: *const PoolShared,
        prev: &mut ExecContext,
    ) {
        debug_assert_eq!(self.state, TaskState::NotStarted);
        debug_assert!(self.entry.is_some());

        self.worker = worker;
        self.pool = pool;
        self.state = TaskState::Executing;
        #[cfg(debug_assertions)]
        self.debug_fill_stack();

        let arg = self as *mut Task as usize;
        let Task {
            context, stack_buf, ..
        } = &mut *self;
        context.execute(prev, &mut stack_buf.0, task_entry_trampoline, arg);

        #[cfg(debug_assertions)]
        self.debug_check_stack();
    }

    /// Re-enter a suspended fiber, possibly on a different worker.
    ///
    /// # Safety
    ///
    /// Same contract as [`Task::execute`]; the task must be suspended.
    pub(crate) unsafe fn resume(
        &mut self,
        worker: *const WorkerState,
        pool: *const PoolShared,
        prev: &mut ExecContext,
    ) {
        debug_assert_eq!(self.state, TaskState::Suspended);

        self.worker = worker;
        self.pool = pool;
        self.state = TaskState::Executing;
        self.context.resume(prev);
    }

    /// Switch back to the worker's main context. Only called from inside
    /// the fiber.
    ///
    /// # Safety
    ///
    /// Must run on this task's fiber stack.
    pub(crate) unsafe fn suspend(&mut self) {
        debug_assert_eq!(self.state, TaskState::Executing);
        self.state = TaskState::Suspended;
        self.context.suspend();
    }

    #[cfg(debug_assertions)]
    fn debug_fill_stack(&mut self) {
        let words = self.stack_buf.0.as_mut_ptr() as *mut u32;
        for i in 0..TASK_STACK_SIZE / 4 {
            unsafe { words.add(i).write(STACK_FILL_PATTERN) };
        }
    }

    #[cfg(debug_assertions)]
    fn debug_check_stack(&mut self) {
        let words = self.stack_buf.0.as_ptr() as *const u32;
        let total = TASK_STACK_SIZE / 4;
        let mut untouched = 0;
        while untouched < total && unsafe { words.add(untouched).read() } == STACK_FILL_PATTERN {
            untouched += 1;
        }
        self.used_stack = (total - untouched) * 4;

        let load = (self.used_stack * 100 / TASK_STACK_SIZE) as u32;
        if load >= 85 {
            tracing::error!(
                target: "xynq::task",
                "insufficient or highly loaded stack for '{}': {} bytes (stack_size={}, load={}%)",
                self.debug_name, self.used_stack, TASK_STACK_SIZE, load
            );
        } else if load >= 75 {
            tracing::warn!(
                target: "xynq::task",
                "high stack load for '{}': {} bytes (stack_size={}, load={}%)",
                self.debug_name, self.used_stack, TASK_STACK_SIZE, load
            );
        }
    }
}

extern "C" fn task_entry_trampoline(arg: usize) {
    let task = arg as *mut Task;
    unsafe {
        let entry = (*task).entry.take().expect("task started without an entry");
        let tc = TaskContext::from_raw(task);
        entry(&tc);
        // Entry returned: hand control back to the scheduler, which will
        // observe no pending event / yield and destroy the task.
        (*task).context.suspend();
    }
    unreachable!("task context resumed after completion");
}

/// Serializable task descriptor: what a worker queue holds.
pub struct TaskTuple {
    pub(crate) task: *mut Task,
    pub(crate) entry: Option<TaskEntry>,
    pub(crate) stack_size: usize,
    pub(crate) debug_name: &'static str,
}

// The raw task pointer is a hand-off: a tuple in a queue is owned by
// whoever pops it.
unsafe impl Send for TaskTuple {}

impl TaskTuple {
    /// Describe a fresh task. The fiber is created lazily when some worker
    /// first dequeues the tuple.
    pub fn new(
        debug_name: &'static str,
        entry: impl FnOnce(&TaskContext) + Send + 'static,
    ) -> Self {
        Self::with_stack(debug_name, MIN_STACK_SIZE, entry)
    }

    /// Describe a fresh task with an explicit stack requirement.
    pub fn with_stack(
        debug_name: &'static str,
        stack_size: usize,
        entry: impl FnOnce(&TaskContext) + Send + 'static,
    ) -> Self {
        assert!(stack_size <= TASK_STACK_SIZE, "requested stack too large");
        Self {
            task: std::ptr::null_mut(),
            entry: Some(Box::new(entry)),
            stack_size,
            debug_name,
        }
    }

    /// Requeue an existing (suspended) task.
    pub(crate) fn resumed(task: *mut Task) -> Self {
        Self {
            task,
            entry: None,
            stack_size: 0,
            debug_name: "",
        }
    }
}
