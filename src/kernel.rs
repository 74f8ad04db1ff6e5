//! # Kernel
//!
//! Top-level kernel API for TickOS: task registration, the tick/run
//! loop, and the per-activation [`TaskCtx`] through which task bodies
//! reach the blocking primitives.
//!
//! ## Embedding Sequence
//!
//! ```text
//! main()
//!   ├─► Kernel::new()                ← owned instance, no globals
//!   ├─► kernel.register_task(..)     ← install the task roster (×N)
//!   └─► loop {
//!         kernel.tick(elapsed)       ← from the clock source
//!         kernel.run_until_idle(env) ← dispatch until nothing is Ready
//!       }
//! ```
//!
//! The kernel never reads a hardware timer: the embedder reports
//! elapsed time through [`Kernel::tick`], which makes the whole core
//! deterministic under test — the suite is the clock source.

use crate::scheduler::Scheduler;
use crate::task::{
    Block, DeadlineOverride, TaskBody, TaskConfig, TaskId, TaskState, WaitRef, WakeCause,
};
use crate::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// API error and outcome types
// ---------------------------------------------------------------------------

/// Task registration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegisterError {
    /// All task slots are occupied.
    CapacityExceeded,
}

/// A `TaskId` whose task no longer exists (terminated and reclaimed,
/// or its slot reused by a later registration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StaleHandle;

/// What a single scheduling pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunOutcome {
    /// Dispatched one activation of this task.
    Ran(TaskId),
    /// No task was Ready.
    Idle,
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// The task kernel. Owns the scheduler and the task set; `E` is the
/// embedder's environment type handed to every task body.
pub struct Kernel<E> {
    sched: Scheduler<E>,
}

impl<E> Kernel<E> {
    /// An empty kernel at tick zero.
    pub fn new() -> Self {
        Self {
            sched: Scheduler::new(),
        }
    }

    /// Current kernel time.
    #[inline]
    pub fn now(&self) -> Instant {
        self.sched.now
    }

    /// Register a task.
    ///
    /// The task enters Ready (periodic policy — its first release is
    /// the registration instant) or Blocked on its wake source
    /// (event-driven policy).
    ///
    /// # Returns
    /// - `Ok(id)` — handle for `delete_task` / diagnostics
    /// - `Err(RegisterError::CapacityExceeded)` — all `MAX_TASKS`
    ///   slots are occupied
    ///
    /// # Example
    /// ```ignore
    /// let sensor = kernel.register_task(
    ///     &TaskConfig::new("sensor", 2, WakePolicy::Periodic(Duration::from_millis(100))),
    ///     sensor_body,
    /// )?;
    /// ```
    pub fn register_task(
        &mut self,
        config: &TaskConfig,
        body: TaskBody<E>,
    ) -> Result<TaskId, RegisterError> {
        self.sched.register(config, body)
    }

    /// Advance the kernel clock by `elapsed` and wake every blocked
    /// task whose wait source is ready or whose deadline passed.
    /// Never blocks; callable from a constrained execution context.
    pub fn tick(&mut self, elapsed: Duration) {
        self.sched.tick(elapsed);
    }

    /// One scheduling decision: reclaim terminated slots, select the
    /// highest-priority Ready task, run one activation of its body,
    /// apply the outcome. Returns [`RunOutcome::Idle`] when no task
    /// is Ready.
    pub fn run_once(&mut self, env: &mut E) -> RunOutcome {
        self.sched.reclaim();
        let Some(id) = self.sched.select() else {
            return RunOutcome::Idle;
        };

        let Some(tcb) = self.sched.resolve(id) else {
            return RunOutcome::Idle;
        };
        tcb.state = TaskState::Running;
        tcb.block = None;
        let body = tcb.body;

        let mut ctx = TaskCtx {
            sched: &mut self.sched,
            id,
        };
        let outcome = body(&mut ctx, env);

        self.sched.apply(id, outcome);
        RunOutcome::Ran(id)
    }

    /// Dispatch until no task is Ready. Returns the number of
    /// activations run. Time does not advance in here — interleave
    /// with [`Kernel::tick`].
    pub fn run_until_idle(&mut self, env: &mut E) -> u32 {
        let mut ran = 0;
        while let RunOutcome::Ran(_) = self.run_once(env) {
            ran += 1;
        }
        ran
    }

    /// Mark a task Terminated. Its slot is reclaimed at the next
    /// scheduling pass — never while the task's own body is still on
    /// the call stack.
    pub fn delete_task(&mut self, id: TaskId) -> Result<(), StaleHandle> {
        let tcb = self.sched.resolve(id).ok_or(StaleHandle)?;
        tcb.state = TaskState::Terminated;
        Ok(())
    }

    /// Park a task: it will not be selected until resumed. Suspending
    /// a blocked task cancels its wait.
    pub fn suspend_task(&mut self, id: TaskId) -> Result<(), StaleHandle> {
        let tcb = self.sched.resolve(id).ok_or(StaleHandle)?;
        if tcb.state != TaskState::Terminated {
            tcb.state = TaskState::Suspended;
            tcb.block = None;
        }
        Ok(())
    }

    /// Make a suspended task Ready again.
    pub fn resume_task(&mut self, id: TaskId) -> Result<(), StaleHandle> {
        let tcb = self.sched.resolve(id).ok_or(StaleHandle)?;
        if tcb.state == TaskState::Suspended {
            tcb.state = TaskState::Ready;
            tcb.last_wake = WakeCause::Fresh;
        }
        Ok(())
    }

    // -- diagnostics -------------------------------------------------------

    /// Current state of a task, if the handle is still live.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.sched.resolve_ref(id).map(|tcb| tcb.state)
    }

    /// Task name, for diagnostics.
    pub fn task_name(&self, id: TaskId) -> Option<&'static str> {
        self.sched.resolve_ref(id).map(|tcb| tcb.name)
    }

    /// Highest stack usage the task has reported, in words.
    pub fn stack_high_water(&self, id: TaskId) -> Option<u32> {
        self.sched.resolve_ref(id).map(|tcb| tcb.stack_high_water)
    }

    /// The task's declared liveness budget, for wiring up watchdog
    /// monitoring.
    pub fn liveness_budget(&self, id: TaskId) -> Option<Duration> {
        self.sched.resolve_ref(id).and_then(|tcb| tcb.liveness_budget)
    }
}

impl<E> Default for Kernel<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Task context
// ---------------------------------------------------------------------------

/// Per-activation handle through which a task body reaches the kernel:
/// the clock, its own identity and diagnostics, and the wait
/// registration the blocking primitives use.
pub struct TaskCtx<'a, E> {
    sched: &'a mut Scheduler<E>,
    id: TaskId,
}

impl<E> TaskCtx<'_, E> {
    /// Current kernel time.
    #[inline]
    pub fn now(&self) -> Instant {
        self.sched.now
    }

    /// The running task's handle.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Why this activation was released.
    pub fn wake_cause(&self) -> WakeCause {
        self.sched
            .resolve_ref(self.id)
            .map(|tcb| tcb.last_wake)
            .unwrap_or(WakeCause::Fresh)
    }

    /// Report the activation's stack usage, in words. The kernel
    /// tracks the high-water mark; exceeding the task's budget
    /// terminates the task at the end of this activation.
    pub fn record_stack_usage(&mut self, words: u32) {
        if let Some(tcb) = self.sched.resolve(self.id) {
            tcb.record_stack_usage(words);
        }
    }

    /// Override the deadline of this task's next event-driven wait,
    /// replacing the wake policy's configured timeout: `Some(at)`
    /// wakes no later than `at`, `None` waits on the source alone.
    /// Consumed at the next `Step::Complete`. This is how the FSM
    /// task arms its state-duration timeout.
    pub fn set_wake_deadline(&mut self, deadline: Option<Instant>) {
        if let Some(tcb) = self.sched.resolve(self.id) {
            tcb.deadline_override = match deadline {
                Some(at) => DeadlineOverride::Until(at),
                None => DeadlineOverride::Unbounded,
            };
        }
    }

    // -- primitive support (crate-internal) --------------------------------

    /// Record a wait for the current task. The body must return
    /// [`crate::task::Step::Pending`] for the wait to take effect.
    pub(crate) fn block_on(
        &mut self,
        wait: Option<WaitRef>,
        deadline: Option<Instant>,
        on_deadline: WakeCause,
    ) {
        if let Some(tcb) = self.sched.resolve(self.id) {
            tcb.block = Some(Block {
                wait,
                deadline,
                on_deadline,
            });
        }
    }

    /// If this activation was released by the expiry of a wait on
    /// `source`, consume that outcome. Lets a retrying primitive
    /// return its timeout error exactly once.
    pub(crate) fn consume_timeout(&mut self, source: *const ()) -> bool {
        let Some(tcb) = self.sched.resolve(self.id) else {
            return false;
        };
        if tcb.last_wake == WakeCause::TimedOut && tcb.ended_wait == Some(source) {
            tcb.last_wake = WakeCause::Fresh;
            tcb.ended_wait = None;
            true
        } else {
            false
        }
    }

    /// Wake blocked tasks whose satisfied wait is on `source`.
    pub(crate) fn notify(&mut self, source: *const ()) {
        self.sched.notify(source);
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
