//! Event queue — the epoll readiness multiplexer shared by the pool.
//!
//! One epoll instance serves every worker. A fiber that suspends on one
//! thread can therefore be resumed by any thread whose `wait` returns its
//! tag. Each worker has its own event buffer (cache-line separated) so
//! concurrent waits never share result storage.
//!
//! An eventfd is registered with a null tag as the manual wakeup channel:
//! `interrupt_all` writes one byte and every waiter wakes at least once.
//! The wakeup fd is drained after each wait so it does not spin.

use std::cell::{Cell, UnsafeCell};
use std::os::unix::io::RawFd;

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EventFlags: u32 {
        const READ         = 1 << 0;
        const WRITE        = 1 << 1;
        /// Registration is consumed on first delivery (EPOLLONESHOT);
        /// re-arm for every wait.
        const EXACTLY_ONCE = 1 << 2;
    }
}

/// An OS handle that can be registered with the event queue. Tracks
/// whether it has been added so re-registration modifies in place.
pub struct EventSource {
    fd: RawFd,
    registered: Cell<bool>,
}

impl EventSource {
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            registered: Cell::new(false),
        }
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

/// A delivered readiness event. Transparent wrapper over the OS event so
/// `wait` can hand out a slice of the kernel-filled buffer directly.
#[repr(transparent)]
pub struct Event(libc::epoll_event);

impl Event {
    #[inline]
    pub fn is_read(&self) -> bool {
        self.0.events & libc::EPOLLIN as u32 != 0
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        self.0.events & libc::EPOLLOUT as u32 != 0
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.0.events & libc::EPOLLERR as u32 != 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.0.events & libc::EPOLLHUP as u32 != 0
    }

    /// The opaque tag given at registration. Null for wakeup signals.
    #[inline]
    pub fn user_handle(&self) -> *mut () {
        self.0.u64 as usize as *mut ()
    }
}

/// Per-thread event buffer. Aligned so adjacent workers' entries never
/// share a cache line.
#[repr(align(64))]
struct ThreadEvents {
    buf: UnsafeCell<Box<[libc::epoll_event]>>,
}

pub struct EventQueue {
    epoll_fd: RawFd,
    wakeup_fd: RawFd,
    thread_events: Box<[ThreadEvents]>,
    max_events: usize,
}

// Per-thread buffers are only touched by their owning thread (wait takes
// the thread's index); the fds are thread-safe at the kernel boundary.
unsafe impl Send for EventQueue {}
unsafe impl Sync for EventQueue {}

impl EventQueue {
    /// `max_events_at_once` bounds how many events one `wait` call can
    /// return per thread; `num_threads` is the pool size.
    pub fn new(max_events_at_once: usize, num_threads: usize) -> std::io::Result<Self> {
        assert!(max_events_at_once > 0 && num_threads > 0);

        let epoll_fd = unsafe { libc::epoll_create1(0) };
        if epoll_fd < 0 {
            return Err(std::io::Error::last_os_error());
        }

        let wakeup_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
        if wakeup_fd < 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(err);
        }

        let zero = libc::epoll_event { events: 0, u64: 0 };
        let thread_events = (0..num_threads)
            .map(|_| ThreadEvents {
                buf: UnsafeCell::new(vec![zero; max_events_at_once].into_boxed_slice()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let queue = Self {
            epoll_fd,
            wakeup_fd,
            thread_events,
            max_events: max_events_at_once,
        };

        // The wakeup channel is a normal registration with a null tag.
        let wakeup_source = EventSource::new(wakeup_fd);
        queue.add_event(&wakeup_source, EventFlags::READ, std::ptr::null_mut());
        Ok(queue)
    }

    /// Register or re-arm `source` with the given interest and tag.
    pub fn add_event(&self, source: &EventSource, flags: EventFlags, user_handle: *mut ()) {
        debug_assert!(source.fd() >= 0);

        let mut event = libc::epoll_event {
            events: (libc::EPOLLERR | libc::EPOLLHUP) as u32,
            u64: user_handle as usize as u64,
        };
        if flags.contains(EventFlags::READ) {
            event.events |= libc::EPOLLIN as u32;
        }
        if flags.contains(EventFlags::WRITE) {
            event.events |= libc::EPOLLOUT as u32;
        }
        if flags.contains(EventFlags::EXACTLY_ONCE) {
            event.events |= libc::EPOLLONESHOT as u32;
        }

        let op = if source.registered.get() {
            libc::EPOLL_CTL_MOD
        } else {
            source.registered.set(true);
            libc::EPOLL_CTL_ADD
        };
        let err = unsafe { libc::epoll_ctl(self.epoll_fd, op, source.fd(), &mut event) };
        if err < 0 {
            tracing::error!(
                target: "xynq::event",
                "epoll_ctl add failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    pub fn remove_event(&self, source: &EventSource) {
        debug_assert!(source.fd() >= 0);

        let err = unsafe {
            libc::epoll_ctl(
                self.epoll_fd,
                libc::EPOLL_CTL_DEL,
                source.fd(),
                std::ptr::null_mut(),
            )
        };
        if err < 0 {
            tracing::error!(
                target: "xynq::event",
                "epoll_ctl del failed: {}",
                std::io::Error::last_os_error()
            );
        } else {
            source.registered.set(false);
        }
    }

    /// Block until at least one event is ready or the wait is interrupted.
    /// The returned slice lives in this thread's buffer and is valid until
    /// the same thread calls `wait` again.
    pub fn wait(&self, thread_index: usize, timeout_ms: i32) -> &[Event] {
        let buf = unsafe { &mut *self.thread_events[thread_index].buf.get() };
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                buf.as_mut_ptr(),
                self.max_events as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINTR) {
                tracing::error!(target: "xynq::event", "epoll_wait failed: {}", err);
            }
            return &[];
        }

        // Drain the wakeup channel so interrupts do not keep firing.
        loop {
            let mut drain = [0u8; 64];
            let r = unsafe {
                libc::read(
                    self.wakeup_fd,
                    drain.as_mut_ptr() as *mut libc::c_void,
                    drain.len(),
                )
            };
            if r <= 0 {
                break;
            }
        }

        unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const Event, n as usize) }
    }

    /// Wake at least one waiting thread; `_preferred_thread` is a
    /// best-effort hint only.
    pub fn interrupt(&self, _preferred_thread: usize) {
        self.write_wakeup();
    }

    /// Wake every waiting thread at least once.
    pub fn interrupt_all(&self) {
        self.write_wakeup();
    }

    /// Raw wakeup write. Async-signal-safe (one `write(2)`), used by the
    /// stop handle from signal context.
    pub(crate) fn write_wakeup(&self) {
        let value: u64 = 1;
        unsafe {
            libc::write(
                self.wakeup_fd,
                &value as *const u64 as *const libc::c_void,
                8,
            );
        }
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wakeup_fd);
            libc::close(self.epoll_fd);
        }
    }
}
