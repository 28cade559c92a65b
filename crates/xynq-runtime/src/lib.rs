//! # xynq-runtime — fiber-based cooperative task runtime
//!
//! A pool of worker OS threads, each cooperatively multiplexing stackful
//! fibers. One shared epoll-based [`EventQueue`] wakes whichever worker is
//! free when a suspended fiber's fd becomes ready; idle workers steal from
//! their peers' queues.
//!
//! The programming model is blocking-style: a task calls
//! [`TaskContext::wait_event`] before any fd operation that could block,
//! the fiber suspends, and some worker resumes it when the readiness event
//! fires. One fiber executes per worker at a time; the worker's main
//! context is the only scheduler.
//!
//! ```ignore
//! let mut manager = TaskManager::new(TaskManagerConfig::default())?;
//! manager.add_entrypoint(TaskTuple::new("hello", |tc| {
//!     tracing::info!("hello from worker {}", tc.thread_index());
//!     tc.exit();
//! }));
//! manager.run(); // blocks until stop()
//! ```

pub mod context;
pub mod event;
pub mod fiber;
pub mod manager;
pub mod ring;
pub mod semaphore;
pub mod task;
pub mod worker;

pub use context::TaskContext;
pub use event::{Event, EventFlags, EventQueue, EventSource};
pub use manager::{StopHandle, TaskManager, TaskManagerConfig};
pub use ring::MrswRing;
pub use semaphore::TaskSemaphore;
pub use task::{TaskState, TaskTuple, MIN_STACK_SIZE, TASK_STACK_SIZE};
