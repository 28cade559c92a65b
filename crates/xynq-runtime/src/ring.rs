//! Bounded multi-reader / multi-writer FIFO.
//!
//! Each worker's local task queue. One plain mutex: every operation here
//! corresponds to a task switch, which dwarfs the lock cost. The queue is
//! FIFO — the scheduler's per-worker ordering guarantee depends on it.

use parking_lot::Mutex;

struct Inner<T> {
    slots: Box<[Option<T>]>,
    read: usize,
    write: usize,
}

pub struct MrswRing<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> MrswRing<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(Inner {
                slots: (0..capacity).map(|_| None).collect(),
                read: 0,
                write: 0,
            }),
        }
    }

    /// Append. Gives the value back if the ring is full; the caller
    /// decides whether to block, drop or fail.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        let cap = inner.slots.len();
        if inner.write - inner.read == cap {
            return Err(value);
        }
        let idx = inner.write % cap;
        inner.slots[idx] = Some(value);
        inner.write += 1;
        Ok(())
    }

    /// Remove the oldest element, if any.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.read == inner.write {
            return None;
        }
        let idx = inner.read % inner.slots.len();
        let value = inner.slots[idx].take();
        debug_assert!(value.is_some());
        inner.read += 1;
        value
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.write - inner.read
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn fifo_order() {
        let ring = MrswRing::new(4);
        for i in 0..4 {
            ring.push(i).unwrap();
        }
        assert!(ring.push(99).is_err());
        for i in 0..4 {
            assert_eq!(ring.pop(), Some(i));
        }
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn wraps_around() {
        let ring = MrswRing::new(2);
        for round in 0..10 {
            ring.push(round).unwrap();
            assert_eq!(ring.pop(), Some(round));
        }
    }

    #[test]
    fn concurrent_writers_and_readers() {
        const WRITERS: usize = 5;
        const READERS: usize = 5;
        const PER_WRITER: u64 = 5000;
        const PAYLOAD: u64 = 2;

        let ring = Arc::new(MrswRing::new(256));
        let sum = Arc::new(AtomicU64::new(0));
        let popped = Arc::new(AtomicU64::new(0));
        let total = WRITERS as u64 * PER_WRITER;

        let mut handles = Vec::new();
        for _ in 0..WRITERS {
            let ring = Arc::clone(&ring);
            handles.push(std::thread::spawn(move || {
                for _ in 0..PER_WRITER {
                    let mut value = PAYLOAD;
                    loop {
                        match ring.push(value) {
                            Ok(()) => break,
                            Err(v) => {
                                value = v;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }
        for _ in 0..READERS {
            let ring = Arc::clone(&ring);
            let sum = Arc::clone(&sum);
            let popped = Arc::clone(&popped);
            handles.push(std::thread::spawn(move || loop {
                if popped.load(Ordering::Acquire) >= total {
                    break;
                }
                match ring.pop() {
                    Some(v) => {
                        sum.fetch_add(v, Ordering::Relaxed);
                        popped.fetch_add(1, Ordering::AcqRel);
                    }
                    None => std::thread::yield_now(),
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(popped.load(Ordering::Acquire), total);
        assert_eq!(sum.load(Ordering::Acquire), PAYLOAD * total);
    }
}
