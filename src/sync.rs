//! # Synchronization Primitives
//!
//! Mutual exclusion and wait-free signalling for state shared between
//! tasks and ISR-shaped producers. All compound state updates happen
//! inside `critical_section::with`, the portable generalization of the
//! single-core interrupt-free section (the cortex-m stack provides the
//! implementation on target; the `std` implementation backs the host
//! test suite).
//!
//! Keep critical sections as short as possible — every one of them is
//! interrupt latency on a real target.

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::kernel::TaskCtx;
use crate::task::{Condition, TaskId, WaitRef, WaitSource, WakeCause};
use crate::time::Timeout;

// ---------------------------------------------------------------------------
// Mutex
// ---------------------------------------------------------------------------

/// Lock acquisition failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LockError {
    /// The wait (possibly zero-length, for [`Timeout::Poll`]) expired
    /// while another task held the lock.
    TimedOut,
    /// The calling task already owns the lock. Recursive acquisition
    /// would self-deadlock, so it is rejected instead.
    Recursive,
}

impl From<LockError> for crate::task::TaskError {
    fn from(_: LockError) -> Self {
        crate::task::TaskError::Lock
    }
}

/// Who holds a [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    /// A task activation, via [`Mutex::lock`].
    Task(TaskId),
    /// Embedder code outside the task roster, via [`Mutex::try_lock`].
    External,
}

/// A mutual-exclusion lock guarding a shared resource.
///
/// At most one holder owns the lock at a time and only its
/// [`MutexGuard`] releases it. Because guards cannot outlive a task
/// activation, a body that errors or completes while holding the lock
/// releases it on the way out — a critical section can never leave the
/// lock stuck.
///
/// Waiter wake order is priority-driven, not FIFO: when the lock frees,
/// every blocked waiter becomes eligible at the next tick and the
/// highest-priority one claims it first. There is no priority
/// inheritance — a high-priority waiter does not boost a low-priority
/// owner.
pub struct Mutex<T> {
    owner: critical_section::Mutex<Cell<Option<Holder>>>,
    data: UnsafeCell<T>,
}

// Safety: the data cell is only dereferenced through a MutexGuard, and
// guard creation is serialized through the owner cell inside a critical
// section — at most one guard exists at any instant.
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// A new unlocked mutex around `data`.
    pub const fn new(data: T) -> Self {
        Self {
            owner: critical_section::Mutex::new(Cell::new(None)),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, suspending the calling task while another
    /// task holds it.
    ///
    /// With [`Timeout::Poll`] a held lock fails immediately with
    /// [`LockError::TimedOut`] (a zero-length wait that expired).
    pub fn lock<E>(
        &'static self,
        ctx: &mut TaskCtx<'_, E>,
        timeout: Timeout,
    ) -> nb::Result<MutexGuard<'static, T>, LockError> {
        if ctx.consume_timeout(self.source_ptr()) {
            return Err(nb::Error::Other(LockError::TimedOut));
        }

        let me = Holder::Task(ctx.id());
        let claimed = critical_section::with(|cs| {
            let owner = self.owner.borrow(cs);
            match owner.get() {
                None => {
                    owner.set(Some(me));
                    Ok(true)
                }
                Some(current) if current == me => Err(LockError::Recursive),
                Some(_) => Ok(false),
            }
        });

        match claimed {
            Ok(true) => Ok(MutexGuard { lock: self }),
            Err(e) => Err(nb::Error::Other(e)),
            Ok(false) => match timeout {
                Timeout::Poll => Err(nb::Error::Other(LockError::TimedOut)),
                _ => {
                    ctx.block_on(
                        Some(self.unlocked()),
                        timeout.deadline_from(ctx.now()),
                        WakeCause::TimedOut,
                    );
                    Err(nb::Error::WouldBlock)
                }
            },
        }
    }

    /// Claim the lock from outside the task roster — init code or the
    /// embedder's main loop. Poll-only: there is no task to suspend.
    pub fn try_lock(&'static self) -> Option<MutexGuard<'static, T>> {
        let claimed = critical_section::with(|cs| {
            let owner = self.owner.borrow(cs);
            if owner.get().is_none() {
                owner.set(Some(Holder::External));
                true
            } else {
                false
            }
        });
        claimed.then(|| MutexGuard { lock: self })
    }

    /// Whether someone currently holds the lock.
    pub fn is_locked(&self) -> bool {
        critical_section::with(|cs| self.owner.borrow(cs).get().is_some())
    }

    /// Wait reference for "this lock is free".
    pub fn unlocked(&'static self) -> WaitRef {
        WaitRef::new(self, Condition::Unlocked)
    }

    #[inline]
    fn source_ptr(&'static self) -> *const () {
        let source: &dyn WaitSource = self;
        source as *const dyn WaitSource as *const ()
    }
}

impl<T> WaitSource for Mutex<T> {
    fn ready(&self, condition: Condition) -> bool {
        match condition {
            Condition::Unlocked => !self.is_locked(),
            Condition::NonEmpty | Condition::NonFull => false,
        }
    }
}

/// Scoped ownership of a [`Mutex`]. Dereferences to the protected
/// data; dropping it releases the lock, on every exit path.
pub struct MutexGuard<'a, T> {
    lock: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: owner discipline guarantees this guard is the only
        // live access path to the cell.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above, plus &mut self.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        critical_section::with(|cs| self.lock.owner.borrow(cs).set(None));
    }
}

// ---------------------------------------------------------------------------
// Event flag
// ---------------------------------------------------------------------------

/// Flag wait failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlagError {
    /// The wait (possibly zero-length) expired before the flag was
    /// raised.
    TimedOut,
}

impl From<FlagError> for crate::task::TaskError {
    fn from(_: FlagError) -> Self {
        crate::task::TaskError::Timeout
    }
}

/// Single-writer boolean signal: the "set a flag in the interrupt,
/// poll it in the loop" primitive with the split made explicit.
///
/// [`EventFlag::raise`] is a plain atomic store — wait-free and safe
/// from any context, including ISR-shaped producers running above all
/// task priorities. Consumption is take-based: one waiter observes
/// each raise.
pub struct EventFlag {
    raised: AtomicBool,
}

impl EventFlag {
    /// A lowered flag.
    pub const fn new() -> Self {
        Self {
            raised: AtomicBool::new(false),
        }
    }

    /// Raise the flag. Wait-free; callable from interrupt context.
    #[inline]
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Whether the flag is currently raised.
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Consume the flag if raised. Returns whether it was.
    pub fn take(&self) -> bool {
        critical_section::with(|_cs| {
            let was = self.raised.load(Ordering::Acquire);
            if was {
                self.raised.store(false, Ordering::Release);
            }
            was
        })
    }

    /// Wait for the flag, consuming it on success.
    pub fn wait<E>(
        &'static self,
        ctx: &mut TaskCtx<'_, E>,
        timeout: Timeout,
    ) -> nb::Result<(), FlagError> {
        if ctx.consume_timeout(self.source_ptr()) {
            return Err(nb::Error::Other(FlagError::TimedOut));
        }
        if self.take() {
            return Ok(());
        }
        match timeout {
            Timeout::Poll => Err(nb::Error::Other(FlagError::TimedOut)),
            _ => {
                ctx.block_on(
                    Some(self.raised_ref()),
                    timeout.deadline_from(ctx.now()),
                    WakeCause::TimedOut,
                );
                Err(nb::Error::WouldBlock)
            }
        }
    }

    /// Wait reference for "this flag is raised".
    pub fn raised_ref(&'static self) -> WaitRef {
        WaitRef::new(self, Condition::NonEmpty)
    }

    #[inline]
    fn source_ptr(&'static self) -> *const () {
        let source: &dyn WaitSource = self;
        source as *const dyn WaitSource as *const ()
    }
}

impl WaitSource for EventFlag {
    fn ready(&self, condition: Condition) -> bool {
        match condition {
            Condition::NonEmpty => self.is_raised(),
            Condition::NonFull | Condition::Unlocked => false,
        }
    }
}

impl Default for EventFlag {
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
    fn test_flag_raise_take() {
        let flag = EventFlag::new();
        assert!(!flag.is_raised());
        assert!(!flag.take());

        flag.raise();
        flag.raise(); // idempotent
        assert!(flag.is_raised());

        assert!(flag.take()); // first consumer wins
        assert!(!flag.take());
        assert!(!flag.is_raised());
    }

    #[test]
    fn test_mutex_guard_release_on_drop() {
        static M: Mutex<u32> = Mutex::new(7);
        assert!(!M.is_locked());
        assert!(M.ready(Condition::Unlocked));

        let mut guard = M.try_lock().unwrap();
        assert!(M.is_locked());
        assert!(!M.ready(Condition::Unlocked));
        assert!(M.try_lock().is_none(), "second claim must fail");

        *guard += 1;
        assert_eq!(*guard, 8);
        drop(guard);
        assert!(!M.is_locked());

        // Reclaimable after release, with the data retained.
        assert_eq!(*M.try_lock().unwrap(), 8);
    }
}
