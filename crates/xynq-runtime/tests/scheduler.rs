//! Scheduler end-to-end tests: entrypoints, fan-out, user data, readiness
//! wake-ups and shutdown.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use xynq_runtime::{
    EventFlags, EventSource, TaskManager, TaskManagerConfig, TaskSemaphore, TaskTuple,
};

fn manager(threads: usize) -> TaskManager {
    TaskManager::new(TaskManagerConfig {
        num_threads: threads,
        max_events_at_once: 64,
        pin_threads: false,
    })
    .expect("failed to create task manager")
}

#[test]
fn entrypoint_runs_once() {
    let mut tasks = manager(2);
    let counter = Arc::new(AtomicU64::new(0));

    let c = Arc::clone(&counter);
    tasks.add_entrypoint(TaskTuple::new("oneshot", move |tc| {
        c.fetch_add(1, Ordering::SeqCst);
        tc.exit();
    }));
    tasks.run();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

struct TestData {
    int_val: i64,
}

#[test]
fn per_thread_user_data() {
    let mut tasks = manager(2);
    tasks.on_before_thread_start(|_index| Some(Box::new(TestData { int_val: 973 })));

    let result = Arc::new(AtomicI64::new(0));
    let out = Arc::clone(&result);
    tasks.add_entrypoint(TaskTuple::new("user-data", move |tc| {
        out.store(tc.user_data::<TestData>().int_val, Ordering::SeqCst);
        tc.exit();
    }));
    tasks.run();

    assert_eq!(result.load(Ordering::SeqCst), 973);
}

/// Concurrent Fibonacci: each level forks two subtasks and joins them on a
/// count-2 semaphore.
fn fib(
    tc: &xynq_runtime::TaskContext,
    result: Arc<AtomicI64>,
    n: i64,
    done: Option<Arc<TaskSemaphore>>,
) {
    if n <= 1 {
        result.store(n, Ordering::SeqCst);
    } else {
        let left = Arc::new(AtomicI64::new(0));
        let right = Arc::new(AtomicI64::new(0));
        let complete = Arc::new(TaskSemaphore::new(2));

        {
            let (out, sem) = (Arc::clone(&left), Arc::clone(&complete));
            tc.perform_async(TaskTuple::new("fib", move |tc| {
                fib(tc, out, n - 1, Some(sem))
            }));
        }
        {
            let (out, sem) = (Arc::clone(&right), Arc::clone(&complete));
            tc.perform_async(TaskTuple::new("fib", move |tc| {
                fib(tc, out, n - 2, Some(sem))
            }));
        }

        complete.wait(tc);
        result.store(
            left.load(Ordering::SeqCst) + right.load(Ordering::SeqCst),
            Ordering::SeqCst,
        );
    }

    match done {
        Some(sem) => sem.signal(),
        None => tc.exit(), // initial task: take the pool down
    }
}

#[test]
fn fib_fan_out() {
    let mut tasks = manager(2);
    let result = Arc::new(AtomicI64::new(0));

    let out = Arc::clone(&result);
    tasks.add_entrypoint(TaskTuple::new("fib-root", move |tc| fib(tc, out, 10, None)));
    tasks.run();

    assert_eq!(result.load(Ordering::SeqCst), 55);
}

#[test]
fn wait_event_wakes_suspended_task() {
    let mut fds = [0 as RawFd; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let mut tasks = manager(2);
    let got = Arc::new(AtomicU64::new(0));

    // Seeded first: suspends on the pipe before the writer runs.
    let out = Arc::clone(&got);
    tasks.add_entrypoint(TaskTuple::new("pipe-reader", move |tc| {
        let source = EventSource::new(read_fd);
        tc.wait_event(&source, EventFlags::READ | EventFlags::EXACTLY_ONCE);
        let mut byte = 0u8;
        let n = unsafe { libc::read(read_fd, &mut byte as *mut u8 as *mut libc::c_void, 1) };
        assert_eq!(n, 1);
        out.store(byte as u64, Ordering::SeqCst);
        tc.events().remove_event(&source);
        tc.exit();
    }));
    tasks.add_entrypoint(TaskTuple::new("pipe-writer", move |_tc| {
        let byte = 42u8;
        let n = unsafe { libc::write(write_fd, &byte as *const u8 as *const libc::c_void, 1) };
        assert_eq!(n, 1);
    }));
    tasks.run();

    assert_eq!(got.load(Ordering::SeqCst), 42);
    unsafe {
        libc::close(read_fd);
        libc::close(write_fd);
    }
}

#[test]
fn stop_is_idempotent() {
    let mut tasks = manager(2);
    tasks.add_entrypoint(TaskTuple::new("exit", |tc| tc.exit()));
    tasks.run();

    // Pool already drained; further stops are no-ops.
    tasks.stop();
    tasks.stop();
    let handle = tasks.stop_handle();
    handle.stop();
}

#[test]
fn yields_interleave_without_deadlock() {
    let mut tasks = manager(1);
    let sum = Arc::new(AtomicU64::new(0));

    let out = Arc::clone(&sum);
    tasks.add_entrypoint(TaskTuple::new("root", move |tc| {
        let child_sum = Arc::new(AtomicU64::new(0));
        let done = Arc::new(TaskSemaphore::new(4));
        for i in 1..=4u64 {
            let (out, sem) = (Arc::clone(&child_sum), Arc::clone(&done));
            tc.perform_async(TaskTuple::new("child", move |tc| {
                tc.yield_now();
                out.fetch_add(i, Ordering::SeqCst);
                sem.signal();
            }));
        }
        done.wait(tc);
        out.store(child_sum.load(Ordering::SeqCst), Ordering::SeqCst);
        tc.exit();
    }));
    tasks.run();

    assert_eq!(sum.load(Ordering::SeqCst), 10);
}
