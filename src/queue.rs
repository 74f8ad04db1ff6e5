//! # Bounded Queue
//!
//! Fixed-capacity FIFO channel for inter-task message passing. The
//! buffer is a `heapless::Deque` behind a critical section, so the
//! wait-free `try_send` / `try_recv` pair is callable from ISR-shaped
//! producers as well as task bodies. A full queue rejects the send and
//! hands the item back — items are never overwritten.
//!
//! The blocking variants go through the calling task's [`TaskCtx`]:
//! with [`Timeout::Poll`] they never suspend; otherwise, on
//! contention, they record the wait on the current task and report
//! `WouldBlock`, and the body is re-dispatched once the queue state
//! changes or the deadline expires.
//!
//! FIFO law: for any sequence of sends and receives within capacity,
//! drained order equals successful-send order — no loss, duplication,
//! or reordering.

use core::cell::RefCell;

use critical_section::Mutex as CsMutex;
use heapless::Deque;

use crate::kernel::TaskCtx;
use crate::task::{Condition, WaitRef, WaitSource, WakeCause};
use crate::time::Timeout;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Send failure. Every variant hands the unsent item back to the
/// caller; the queue never takes ownership of an item it did not
/// buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum SendError<T> {
    /// The queue is full and the timeout did not allow waiting.
    Full(T),
    /// The wait was registered; retry this activation when re-dispatched.
    WouldBlock(T),
    /// The wait expired before space became available.
    TimedOut(T),
}

/// Receive failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecvError {
    /// The queue is empty and the timeout did not allow waiting.
    Empty,
    /// The wait expired before an item arrived.
    TimedOut,
}

impl From<RecvError> for crate::task::TaskError {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Empty => crate::task::TaskError::QueueEmpty,
            RecvError::TimedOut => crate::task::TaskError::Timeout,
        }
    }
}

impl<T> From<SendError<T>> for crate::task::TaskError {
    fn from(e: SendError<T>) -> Self {
        match e {
            SendError::Full(_) | SendError::WouldBlock(_) => crate::task::TaskError::QueueFull,
            SendError::TimedOut(_) => crate::task::TaskError::Timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A bounded FIFO queue of `T` with capacity `N`.
///
/// `const fn new` so instances can live in `static`s shared between
/// tasks and ISR-shaped producers, with the access discipline carried
/// by the type instead of by convention.
pub struct Queue<T, const N: usize> {
    buffer: CsMutex<RefCell<Deque<T, N>>>,
}

impl<T, const N: usize> Queue<T, N> {
    /// An empty queue.
    pub const fn new() -> Self {
        Self {
            buffer: CsMutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Fixed capacity `N`.
    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Items currently buffered.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.buffer.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.buffer.borrow_ref(cs).is_empty())
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.buffer.borrow_ref(cs).is_full())
    }

    /// Wait-free send. Never suspends the caller; safe from ISR-shaped
    /// contexts. A full queue hands the item back.
    pub fn try_send(&self, item: T) -> Result<(), SendError<T>> {
        critical_section::with(|cs| {
            self.buffer
                .borrow_ref_mut(cs)
                .push_back(item)
                .map_err(SendError::Full)
        })
    }

    /// Wait-free receive. Never suspends the caller.
    pub fn try_recv(&self) -> Result<T, RecvError> {
        critical_section::with(|cs| {
            self.buffer
                .borrow_ref_mut(cs)
                .pop_front()
                .ok_or(RecvError::Empty)
        })
    }

    /// Send, suspending the calling task while the queue is full.
    ///
    /// Successful sends wake tasks blocked on this queue becoming
    /// readable. On `WouldBlock` the item is handed back; the retrying
    /// activation re-offers it.
    pub fn send<E>(
        &'static self,
        ctx: &mut TaskCtx<'_, E>,
        item: T,
        timeout: Timeout,
    ) -> Result<(), SendError<T>> {
        if ctx.consume_timeout(self.source_ptr()) {
            return Err(SendError::TimedOut(item));
        }
        match self.try_send(item) {
            Ok(()) => {
                ctx.notify(self.source_ptr());
                Ok(())
            }
            Err(SendError::Full(item)) => match timeout {
                Timeout::Poll => Err(SendError::Full(item)),
                _ => {
                    ctx.block_on(
                        Some(self.writable()),
                        timeout.deadline_from(ctx.now()),
                        WakeCause::TimedOut,
                    );
                    Err(SendError::WouldBlock(item))
                }
            },
            Err(other) => Err(other),
        }
    }

    /// Receive, suspending the calling task while the queue is empty.
    ///
    /// Successful receives wake tasks blocked on this queue becoming
    /// writable.
    pub fn recv<E>(
        &'static self,
        ctx: &mut TaskCtx<'_, E>,
        timeout: Timeout,
    ) -> nb::Result<T, RecvError> {
        if ctx.consume_timeout(self.source_ptr()) {
            return Err(nb::Error::Other(RecvError::TimedOut));
        }
        match self.try_recv() {
            Ok(item) => {
                ctx.notify(self.source_ptr());
                Ok(item)
            }
            Err(RecvError::Empty) => match timeout {
                Timeout::Poll => Err(nb::Error::Other(RecvError::Empty)),
                _ => {
                    ctx.block_on(
                        Some(self.readable()),
                        timeout.deadline_from(ctx.now()),
                        WakeCause::TimedOut,
                    );
                    Err(nb::Error::WouldBlock)
                }
            },
            Err(other) => Err(nb::Error::Other(other)),
        }
    }

    /// Wait reference for "this queue has an item".
    pub fn readable(&'static self) -> WaitRef {
        WaitRef::new(self, Condition::NonEmpty)
    }

    /// Wait reference for "this queue has room".
    pub fn writable(&'static self) -> WaitRef {
        WaitRef::new(self, Condition::NonFull)
    }

    #[inline]
    fn source_ptr(&'static self) -> *const () {
        let source: &dyn WaitSource = self;
        source as *const dyn WaitSource as *const ()
    }
}

impl<T, const N: usize> WaitSource for Queue<T, N> {
    fn ready(&self, condition: Condition) -> bool {
        match condition {
            Condition::NonEmpty => !self.is_empty(),
            Condition::NonFull => !self.is_full(),
            Condition::Unlocked => false,
        }
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order_preserved() {
        let q: Queue<u32, 4> = Queue::new();
        for v in [10, 20, 30] {
            q.try_send(v).unwrap();
        }
        assert_eq!(q.try_recv(), Ok(10));
        assert_eq!(q.try_recv(), Ok(20));
        q.try_send(40).unwrap();
        assert_eq!(q.try_recv(), Ok(30));
        assert_eq!(q.try_recv(), Ok(40));
        assert_eq!(q.try_recv(), Err(RecvError::Empty));
    }

    #[test]
    fn test_full_queue_hands_item_back() {
        let q: Queue<u8, 2> = Queue::new();
        q.try_send(1).unwrap();
        q.try_send(2).unwrap();
        assert_eq!(q.try_send(3), Err(SendError::Full(3)));
        assert_eq!(q.len(), 2);

        // Draining one slot makes the send succeed
        assert_eq!(q.try_recv(), Ok(1));
        q.try_send(3).unwrap();
        assert_eq!(q.try_recv(), Ok(2));
        assert_eq!(q.try_recv(), Ok(3));
    }

    #[test]
    fn test_capacity_invariant() {
        let q: Queue<u8, 3> = Queue::new();
        for v in 0..3 {
            q.try_send(v).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.len(), q.capacity());
        // Every further send is rejected, nothing is overwritten
        for v in 3..10 {
            assert!(matches!(q.try_send(v), Err(SendError::Full(_))));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.try_recv(), Ok(0));
    }

    #[test]
    fn test_wait_source_conditions() {
        static Q: Queue<u8, 1> = Queue::new();
        assert!(!Q.ready(Condition::NonEmpty));
        assert!(Q.ready(Condition::NonFull));
        Q.try_send(9).unwrap();
        assert!(Q.ready(Condition::NonEmpty));
        assert!(!Q.ready(Condition::NonFull));
        assert!(!Q.ready(Condition::Unlocked));
        let _ = Q.try_recv();
    }
}
