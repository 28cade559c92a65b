//! Pool lifecycle: configuration, hooks, startup and shutdown.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use parking_lot::Mutex;

use crate::event::EventQueue;
use crate::task::TaskTuple;
use crate::worker::{self, WorkerState};

type BeforeThreadStart = dyn Fn(usize) -> Option<Box<dyn Any + Send>> + Send + Sync;
type AfterThreadStop = dyn Fn(usize, Box<dyn Any + Send>) + Send + Sync;

pub(crate) struct Hooks {
    pub before_thread_start: Mutex<Option<Arc<BeforeThreadStart>>>,
    pub after_thread_stop: Mutex<Option<Arc<AfterThreadStop>>>,
}

/// Shared pool state: the reactor, the worker array and the thread hooks.
pub(crate) struct PoolShared {
    pub events: EventQueue,
    pub workers: Box<[WorkerState]>,
    pub pin_threads: bool,
    pub hooks: Hooks,
}

#[derive(Clone, Debug)]
pub struct TaskManagerConfig {
    /// Worker thread count; 0 auto-detects the core count.
    pub num_threads: usize,
    /// Events one `wait` can deliver to one thread at a time.
    pub max_events_at_once: usize,
    /// Pin worker `i` to core `i % num_cores`.
    pub pin_threads: bool,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            max_events_at_once: 1024,
            pin_threads: false,
        }
    }
}

/// Owns the reactor and the worker pool.
///
/// Entrypoints are added before [`TaskManager::run`]; `run` seeds them
/// onto worker 0, spawns workers `1..N`, and takes over the calling thread
/// as worker 0 until the pool stops.
pub struct TaskManager {
    shared: Arc<PoolShared>,
    entrypoints: Vec<TaskTuple>,
    before_start: Option<Box<dyn FnOnce(usize) + Send>>,
    started: bool,
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig) -> std::io::Result<Self> {
        let num_threads = if config.num_threads == 0 {
            let n = worker::num_cores();
            tracing::info!(target: "xynq::task", "auto detecting number of threads to use: {}", n);
            n
        } else {
            config.num_threads
        };
        assert!(num_threads >= 1);

        let events = EventQueue::new(config.max_events_at_once, num_threads)?;
        let workers = (0..num_threads)
            .map(WorkerState::new)
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            shared: Arc::new(PoolShared {
                events,
                workers,
                pin_threads: config.pin_threads,
                hooks: Hooks {
                    before_thread_start: Mutex::new(None),
                    after_thread_stop: Mutex::new(None),
                },
            }),
            entrypoints: Vec::new(),
            before_start: None,
            started: false,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.shared.workers.len()
    }

    /// Called once on the thread invoking `run`, before workers start.
    pub fn on_before_start(&mut self, f: impl FnOnce(usize) + Send + 'static) {
        assert!(!self.started);
        self.before_start = Some(Box::new(f));
    }

    /// Called on every worker thread before its loop; the returned box
    /// becomes the worker's user-data slot.
    pub fn on_before_thread_start(
        &mut self,
        f: impl Fn(usize) -> Option<Box<dyn Any + Send>> + Send + Sync + 'static,
    ) {
        assert!(!self.started);
        *self.shared.hooks.before_thread_start.lock() = Some(Arc::new(f));
    }

    /// Called on every worker thread after its loop with the user data it
    /// was given.
    pub fn on_after_thread_stop(
        &mut self,
        f: impl Fn(usize, Box<dyn Any + Send>) + Send + Sync + 'static,
    ) {
        assert!(!self.started);
        *self.shared.hooks.after_thread_stop.lock() = Some(Arc::new(f));
    }

    /// Queue a task to run once the pool starts. Only legal before `run`.
    pub fn add_entrypoint(&mut self, tuple: TaskTuple) {
        assert!(!self.started, "entrypoints must be added before run()");
        self.entrypoints.push(tuple);
    }

    /// Run the pool. Blocks the calling thread (it becomes worker 0) until
    /// the pool stops, then joins the remaining workers.
    pub fn run(&mut self) {
        assert!(!self.started, "TaskManager::run called twice");
        self.started = true;

        let num_threads = self.num_threads();
        if let Some(f) = self.before_start.take() {
            f(num_threads);
        }

        for tuple in self.entrypoints.drain(..) {
            if self.shared.workers[0].queue.push(tuple).is_err() {
                tracing::error!(target: "xynq::task", "entrypoint queue overflow");
            }
        }

        let mut handles = Vec::with_capacity(num_threads.saturating_sub(1));
        for index in 1..num_threads {
            let pool = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("xynq-worker-{}", index))
                .spawn(move || worker_entry(&pool, index))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        // Sleeping peers must notice the seeded queue (they steal from it).
        self.shared.events.interrupt_all();

        worker_entry(&self.shared, 0);

        stop_internal(&self.shared);
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Asynchronously stop all workers. Queued tasks might never finish.
    /// Idempotent; callable from any thread.
    pub fn stop(&self) {
        for worker in self.shared.workers.iter() {
            worker.running.store(false, Ordering::Relaxed);
        }
        self.shared.events.interrupt_all();
    }

    /// A cloneable handle whose `stop` uses only async-signal-safe
    /// operations (atomic stores plus one `write(2)`).
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            pool: Arc::clone(&self.shared),
        }
    }
}

/// Pool stop handle, safe to trigger from a signal handler.
#[derive(Clone)]
pub struct StopHandle {
    pool: Arc<PoolShared>,
}

impl StopHandle {
    pub fn stop(&self) {
        for worker in self.pool.workers.iter() {
            worker.running.store(false, Ordering::Relaxed);
        }
        self.pool.events.write_wakeup();
    }
}

fn worker_entry(pool: &Arc<PoolShared>, index: usize) {
    tracing::debug!(target: "xynq::task", "worker {} started", index);

    let hook = pool.hooks.before_thread_start.lock().clone();
    if let Some(hook) = hook {
        let data = hook(index);
        // Loop not entered yet: the slot is unshared.
        unsafe { *pool.workers[index].user_data.get() = data };
    }

    worker::thread_proc(pool, index);

    // One worker leaving takes the pool down; block until everyone is out.
    stop_internal(pool);

    let hook = pool.hooks.after_thread_stop.lock().clone();
    let data = unsafe { (*pool.workers[index].user_data.get()).take() };
    if let (Some(hook), Some(data)) = (hook, data) {
        hook(index, data);
    }
    tracing::debug!(target: "xynq::task", "worker {} stopped", index);
}

/// Flip every worker's running flag and interrupt until all have finished.
pub(crate) fn stop_internal(pool: &PoolShared) {
    loop {
        let mut num_running = 0;
        for worker in pool.workers.iter() {
            if !worker.finished.load(Ordering::Acquire) {
                num_running += 1;
                worker.running.store(false, Ordering::Relaxed);
            }
        }
        pool.events.interrupt_all();
        if num_running == 0 {
            break;
        }
        thread::yield_now();
    }
}
