//! # Hand-off queue
//!
//! Bounded FIFO of frame handles between the producer and the stream clients. When the queue is
//! full the frame being offered is dropped and the frames already queued are kept.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;

use crate::pool::FrameHandle;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The queue. Clones share the same underlying channel, with competing-consumer semantics when
/// several clients dequeue.
#[derive(Clone)]
pub struct HandoffQueue {
    tx: Sender<FrameHandle>,
    rx: Receiver<FrameHandle>,
    capacity: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    #[error("The hand-off queue must have a capacity of at least 1")]
    ZeroCapacity,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HandoffQueue {
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        // A zero capacity crossbeam channel is a rendezvous channel, which would make every
        // enqueue fail unless a client happened to be waiting
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }

        let (tx, rx) = bounded(capacity);

        Ok(Self { tx, rx, capacity })
    }

    /// Offer a handle without blocking. Returns false, dropping the handle, if the queue is full.
    pub fn try_enqueue(&self, handle: FrameHandle) -> bool {
        match self.tx.try_send(handle) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            // Not reachable while this queue holds its own receiver
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Wait up to `timeout` for the oldest queued handle.
    pub fn dequeue_with_timeout(&self, timeout: Duration) -> Option<FrameHandle> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take the oldest queued handle if there is one.
    pub fn try_dequeue(&self) -> Option<FrameHandle> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::pool::FramePool;
    use comms_if::eqpt::cam::{FrameFormat, Geometry};
    use std::time::Instant;

    /// A pool whose slot `i` holds the frame with sequence number `i + 1`.
    fn stamped_pool(n: usize) -> FramePool {
        let mut pool = FramePool::new(n, 4, 4).unwrap();
        for i in 0..n {
            pool.writable(i)
                .unwrap()
                .commit(1, Geometry::new(1, 1), FrameFormat::Jpeg, i as u64 + 1)
                .unwrap();
        }
        pool
    }

    #[test]
    fn test_fifo_order() {
        let pool = stamped_pool(3);
        let queue = HandoffQueue::new(3).unwrap();

        for i in 0..3 {
            assert!(queue.try_enqueue(pool.handle(i).unwrap()));
        }

        let out: Vec<u64> = (0..3)
            .map(|_| queue.try_dequeue().unwrap().sequence())
            .collect();
        assert_eq!(out, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let pool = stamped_pool(3);
        let queue = HandoffQueue::new(2).unwrap();

        assert!(queue.try_enqueue(pool.handle(0).unwrap()));
        assert!(queue.try_enqueue(pool.handle(1).unwrap()));
        assert!(queue.is_full());

        // The rejected handle is dropped, releasing its slot
        assert!(!queue.try_enqueue(pool.handle(2).unwrap()));
        assert!(!pool.is_leased(2));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_dequeue().unwrap().sequence(), 1);
        assert_eq!(queue.try_dequeue().unwrap().sequence(), 2);
    }

    #[test]
    fn test_enqueue_never_blocks() {
        let pool = stamped_pool(1);
        let queue = HandoffQueue::new(1).unwrap();

        let start = Instant::now();
        for _ in 0..1000 {
            queue.try_enqueue(pool.handle(0).unwrap());
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_dequeue_timeout() {
        let queue = HandoffQueue::new(1).unwrap();

        let start = Instant::now();
        assert!(queue.dequeue_with_timeout(Duration::from_millis(10)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(10));

        assert_eq!(HandoffQueue::new(0).err(), Some(QueueError::ZeroCapacity));
    }
}
