//! # Task Model
//!
//! Defines the task model for TickOS: identifiers, execution states,
//! wake policies, the activation contract between a task body and the
//! kernel, and the wait-source seam that lets queues, mutexes and
//! event flags plug into the scheduler's blocked-task re-evaluation.
//!
//! A task body is an ordinary function, not a stackful coroutine. Each
//! activation runs the body to completion and the returned [`Step`]
//! tells the kernel what happens next. A body that hits a contended
//! blocking primitive returns [`Step::Pending`] and is re-dispatched —
//! from the top — once the wait resolves, so the pre-block portion of
//! a body must be safe to repeat.

use crate::config::DEFAULT_STACK_BUDGET;
use crate::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Stable handle for a registered task.
///
/// A `TaskId` is a slot index plus a generation counter. Reclaiming a
/// terminated task bumps the slot's generation, so a stale handle held
/// after deletion can never address whatever task reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId {
    pub(crate) index: u8,
    pub(crate) generation: u8,
}

impl TaskId {
    /// Slot index, for diagnostics.
    #[inline]
    pub const fn index(&self) -> usize {
        self.index as usize
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///   ┌──────────┐     run_once()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///        ▲                                │
///        │      Step::Yield / Complete    │
///        └────────────────────────────────┤
///        ▲                                │
///        │       signal / timeout         ▼
///        │                          ┌──────────┐
///        └───────────────────────── │ Blocked  │
///                 (at tick)         └──────────┘
///
///   Step::Done / error / delete_task ──► Terminated (absorbing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Ready to run and waiting to be selected.
    Ready,
    /// Currently executing an activation.
    Running,
    /// Waiting on a wake source, a deadline, or both.
    Blocked,
    /// Parked by the kernel; not schedulable until resumed.
    Suspended,
    /// Finished. The slot is reclaimed at the next scheduling pass.
    Terminated,
}

// ---------------------------------------------------------------------------
// Wait sources
// ---------------------------------------------------------------------------

/// The condition a blocked task is waiting for on its wait source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Condition {
    /// The source has something to consume (queue item, raised flag).
    NonEmpty,
    /// The source has room to accept an item.
    NonFull,
    /// The lock is free to claim.
    Unlocked,
}

/// A wakeable primitive the scheduler can re-evaluate at each tick.
///
/// Implementations must answer without blocking and without side
/// effects: `ready` is a pure snapshot. Queues, mutexes and event
/// flags implement this; the references handed to the scheduler are
/// `'static` because wait sources shared with ISR-shaped producers
/// live in `static`s anyway.
pub trait WaitSource {
    /// Does `condition` currently hold for this source?
    fn ready(&self, condition: Condition) -> bool;
}

/// A (source, condition) pair a task can block on.
#[derive(Clone, Copy)]
pub struct WaitRef {
    source: &'static dyn WaitSource,
    condition: Condition,
}

impl WaitRef {
    /// Pair a wait source with the condition to watch.
    pub const fn new(source: &'static dyn WaitSource, condition: Condition) -> Self {
        Self { source, condition }
    }

    /// Snapshot: does the wait condition currently hold?
    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.source.ready(self.condition)
    }

    /// Identity of the underlying source object, for matching a wake
    /// back to the primitive that registered the wait. Data pointer
    /// only — vtable pointers are not stable across codegen units.
    #[inline]
    pub(crate) fn source_ptr(&self) -> *const () {
        self.source as *const dyn WaitSource as *const ()
    }
}

impl core::fmt::Debug for WaitRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitRef")
            .field("source", &self.source_ptr())
            .field("condition", &self.condition)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Wake policy and task configuration
// ---------------------------------------------------------------------------

/// When a task's next activation is released.
#[derive(Debug, Clone, Copy)]
pub enum WakePolicy {
    /// Release every `interval`, measured release-to-release (drift
    /// free): the next release is the previous release plus the
    /// interval, regardless of how long the activation took.
    Periodic(Duration),
    /// Release when the wait condition holds on `on`, or after
    /// `timeout` if it never does (`None` waits indefinitely).
    Event {
        on: WaitRef,
        timeout: Option<Duration>,
    },
}

/// Per-task declaration, the startup configuration surface.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Stable name for diagnostics.
    pub name: &'static str,
    /// Scheduling priority. Higher runs first.
    pub priority: u8,
    /// What releases this task's activations.
    pub policy: WakePolicy,
    /// Opaque stack capacity, in words, checked against the reported
    /// high-water mark. Exceeding it terminates this task only.
    pub stack_budget: u32,
    /// Maximum allowed heartbeat silence before the watchdog counts a
    /// missed check. `None` = not monitored.
    pub liveness_budget: Option<Duration>,
}

impl TaskConfig {
    /// Configuration with the default stack budget and no liveness
    /// monitoring.
    pub const fn new(name: &'static str, priority: u8, policy: WakePolicy) -> Self {
        Self {
            name,
            priority,
            policy,
            stack_budget: DEFAULT_STACK_BUDGET,
            liveness_budget: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Activation contract
// ---------------------------------------------------------------------------

/// What a task body tells the kernel at the end of an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    /// Activation finished; re-arm per the task's wake policy.
    Complete,
    /// Not finished; stay Ready but let higher priority run first.
    Yield,
    /// A blocking primitive registered a wait; re-dispatch when it
    /// resolves and retry the body from the top.
    Pending,
    /// Terminate this task.
    Done,
}

/// Unrecoverable failure inside a task body. Returning one terminates
/// the task (and only that task), exactly as if the body had returned
/// [`Step::Done`], with the error logged as a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskError {
    /// A queue rejected an item the task could not do without.
    QueueFull,
    /// A queue was empty where data was required.
    QueueEmpty,
    /// A blocking wait expired.
    Timeout,
    /// A mutex acquisition expired or was recursive.
    Lock,
    /// Task-specific failure, named for the diagnostic log.
    Other(&'static str),
}

/// A task body: one activation per call.
///
/// `E` is the embedder's environment — the shared structures (queues,
/// sinks, engines) the task roster operates on. Bodies are plain `fn`
/// pointers so the kernel stays heap-free; per-task mutable state
/// lives in `E` or in `static`s, the same place it lives on a
/// microcontroller.
pub type TaskBody<E> = fn(&mut crate::kernel::TaskCtx<'_, E>, &mut E) -> Result<Step, TaskError>;

// ---------------------------------------------------------------------------
// Task control block (kernel-internal)
// ---------------------------------------------------------------------------

/// Why the kernel last woke a task. Primitives use this, together with
/// the identity of the wait source, to tell a timeout apart from a
/// fresh call when the body retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeCause {
    /// First dispatch, or a wake that carries no wait outcome.
    Fresh,
    /// A periodic release fired.
    Released,
    /// The wait source's condition came true.
    Signaled,
    /// The wait deadline expired first.
    TimedOut,
}

/// An active wait: what the task is blocked on and until when.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Block {
    /// Wait source to re-evaluate at each tick, if any.
    pub(crate) wait: Option<WaitRef>,
    /// Absolute deadline, if any.
    pub(crate) deadline: Option<Instant>,
    /// Wake cause to record when the deadline fires: `TimedOut` for
    /// primitive waits and event-policy timeouts, `Released` for
    /// periodic releases and plain sleeps.
    pub(crate) on_deadline: WakeCause,
}

/// Next-activation deadline requested by the body, overriding the
/// wake policy's own timeout. Consumed at the next `Step::Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum DeadlineOverride {
    /// Use the wake policy's configured timeout.
    #[default]
    Policy,
    /// Wake no later than this instant.
    Until(Instant),
    /// Wait for the wake source alone, with no deadline.
    Unbounded,
}

/// Task control block. One per occupied scheduler slot.
pub(crate) struct Tcb<E> {
    pub(crate) name: &'static str,
    pub(crate) priority: u8,
    pub(crate) policy: WakePolicy,
    pub(crate) body: TaskBody<E>,
    pub(crate) state: TaskState,
    pub(crate) generation: u8,
    /// Registration sequence number; final tie-break in selection.
    pub(crate) seq: u32,
    pub(crate) block: Option<Block>,
    /// Activation deadline used as the first selection tie-break.
    pub(crate) deadline: Option<Instant>,
    /// Periodic bookkeeping: the release this activation belongs to.
    pub(crate) release: Instant,
    pub(crate) last_wake: WakeCause,
    /// Identity of the source of the wait that last ended, so a
    /// retrying primitive can claim its own timeout.
    pub(crate) ended_wait: Option<*const ()>,
    pub(crate) deadline_override: DeadlineOverride,
    pub(crate) stack_budget: u32,
    pub(crate) stack_high_water: u32,
    pub(crate) stack_fault: bool,
    pub(crate) liveness_budget: Option<Duration>,
}

impl<E> Tcb<E> {
    pub(crate) fn new(config: &TaskConfig, body: TaskBody<E>, generation: u8, seq: u32) -> Self {
        Self {
            name: config.name,
            priority: config.priority,
            policy: config.policy,
            body,
            state: TaskState::Ready,
            generation,
            seq,
            block: None,
            deadline: None,
            release: Instant::ZERO,
            last_wake: WakeCause::Fresh,
            ended_wait: None,
            deadline_override: DeadlineOverride::Policy,
            stack_budget: config.stack_budget,
            stack_high_water: 0,
            stack_fault: false,
            liveness_budget: config.liveness_budget,
        }
    }

    /// Record a reported stack high-water mark; flags a budget overrun.
    pub(crate) fn record_stack_usage(&mut self, words: u32) {
        if words > self.stack_high_water {
            self.stack_high_water = words;
        }
        if self.stack_high_water > self.stack_budget {
            self.stack_fault = true;
        }
    }

    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut crate::kernel::TaskCtx<'_, ()>, _: &mut ()) -> Result<Step, TaskError> {
        Ok(Step::Complete)
    }

    #[test]
    fn test_tcb_from_config() {
        let config = TaskConfig::new(
            "sensor",
            3,
            WakePolicy::Periodic(Duration::from_millis(100)),
        );
        let tcb: Tcb<()> = Tcb::new(&config, noop, 2, 7);

        assert_eq!(tcb.name, "sensor");
        assert_eq!(tcb.priority, 3);
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.generation, 2);
        assert_eq!(tcb.seq, 7);
        assert_eq!(tcb.stack_budget, DEFAULT_STACK_BUDGET);
        assert!(tcb.liveness_budget.is_none());
    }

    #[test]
    fn test_stack_high_water_tracking() {
        let mut config = TaskConfig::new(
            "logger",
            1,
            WakePolicy::Periodic(Duration::from_millis(10)),
        );
        config.stack_budget = 100;
        let mut tcb: Tcb<()> = Tcb::new(&config, noop, 0, 0);

        tcb.record_stack_usage(40);
        tcb.record_stack_usage(25); // high water never shrinks
        assert_eq!(tcb.stack_high_water, 40);
        assert!(!tcb.stack_fault);

        tcb.record_stack_usage(101);
        assert!(tcb.stack_fault);
    }

    #[test]
    fn test_task_id_index() {
        let id = TaskId {
            index: 5,
            generation: 1,
        };
        assert_eq!(id.index(), 5);
        assert_ne!(
            id,
            TaskId {
                index: 5,
                generation: 2
            }
        );
    }
}
