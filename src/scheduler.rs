//! # Scheduler
//!
//! Core scheduling logic for TickOS: a single-core, priority-driven,
//! cooperative-yield-on-block dispatcher over a fixed array of task
//! slots.
//!
//! ## Scheduling Algorithm
//!
//! At each `tick(elapsed)`:
//! 1. **Advance the clock** by the elapsed ticks the embedder reports
//! 2. **Re-evaluate every Blocked task**: wait source signalled →
//!    Ready (`Signaled`); deadline passed → Ready (`TimedOut` for
//!    primitive waits, `Released` for periodic releases)
//!
//! At each scheduling pass (`Kernel::run_once`):
//! 1. **Reclaim** Terminated slots (never while that body is running)
//! 2. **Select** the highest-priority Ready task; ties break by
//!    earliest activation deadline, then earliest registration
//! 3. **Dispatch** the task's body and apply the returned [`Step`]
//!
//! There is no time-slicing: a dispatched body runs until it returns.
//! A higher-priority task woken inside a primitive call or at a tick
//! preempts at the next selection, which is the model's safe
//! preemption point.
//!
//! Priority starvation is the task author's responsibility — a
//! low-priority task under a never-blocking high-priority task will
//! not run, and the scheduler does not detect it.

use core::array;

use crate::config::MAX_TASKS;
use crate::kernel::RegisterError;
use crate::task::{
    Block, DeadlineOverride, Step, TaskBody, TaskConfig, TaskError, TaskId, TaskState, Tcb,
    WakeCause, WakePolicy,
};
use crate::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Scheduler state
// ---------------------------------------------------------------------------

/// The scheduling core: task slots, the kernel clock, and the
/// bookkeeping for blocked-task re-evaluation. Owned by
/// [`crate::kernel::Kernel`]; `E` is the embedder's environment type
/// threaded through to task bodies.
pub(crate) struct Scheduler<E> {
    /// Fixed task slots. `None` is a free slot.
    slots: [Option<Tcb<E>>; MAX_TASKS],
    /// Last generation handed out per slot; bumped on reuse so stale
    /// `TaskId`s never resolve.
    generations: [u8; MAX_TASKS],
    /// Monotonic kernel clock, advanced only by `tick`.
    pub(crate) now: Instant,
    /// Registration counter; selection's final tie-break.
    next_seq: u32,
}

impl<E> Scheduler<E> {
    pub(crate) fn new() -> Self {
        Self {
            slots: array::from_fn(|_| None),
            generations: [0; MAX_TASKS],
            now: Instant::ZERO,
            next_seq: 0,
        }
    }

    // -- registration and lifecycle ----------------------------------------

    /// Install a task in the first free slot.
    ///
    /// Periodic tasks are released immediately (their first activation
    /// belongs to the registration instant); event-driven tasks start
    /// out Blocked on their wake source.
    pub(crate) fn register(
        &mut self,
        config: &TaskConfig,
        body: TaskBody<E>,
    ) -> Result<TaskId, RegisterError> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(RegisterError::CapacityExceeded)?;

        let generation = self.generations[index].wrapping_add(1);
        self.generations[index] = generation;
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut tcb = Tcb::new(config, body, generation, seq);
        tcb.release = self.now;
        match config.policy {
            WakePolicy::Periodic(interval) => {
                tcb.state = TaskState::Ready;
                tcb.last_wake = WakeCause::Released;
                tcb.deadline = Some(self.now + interval);
            }
            WakePolicy::Event { on, timeout } => {
                tcb.state = TaskState::Blocked;
                let deadline = timeout.map(|d| self.now + d);
                tcb.deadline = deadline;
                tcb.block = Some(Block {
                    wait: Some(on),
                    deadline,
                    on_deadline: WakeCause::TimedOut,
                });
            }
        }
        self.slots[index] = Some(tcb);

        Ok(TaskId {
            index: index as u8,
            generation,
        })
    }

    /// Resolve a handle to its TCB, refusing stale generations.
    pub(crate) fn resolve(&mut self, id: TaskId) -> Option<&mut Tcb<E>> {
        self.slots[id.index()]
            .as_mut()
            .filter(|tcb| tcb.generation == id.generation)
    }

    pub(crate) fn resolve_ref(&self, id: TaskId) -> Option<&Tcb<E>> {
        self.slots[id.index()]
            .as_ref()
            .filter(|tcb| tcb.generation == id.generation)
    }

    /// Free every Terminated slot. Called at the top of each
    /// scheduling pass, so a task is never reclaimed while its own
    /// body is still on the call stack.
    pub(crate) fn reclaim(&mut self) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some(tcb) if tcb.state == TaskState::Terminated) {
                *slot = None;
            }
        }
    }

    // -- time and wakes ----------------------------------------------------

    /// Advance the clock and re-evaluate every blocked task. Never
    /// blocks and never runs a task body, so it is callable from a
    /// constrained (ISR-shaped) execution context.
    pub(crate) fn tick(&mut self, elapsed: Duration) {
        self.now += elapsed;
        let now = self.now;

        for slot in self.slots.iter_mut() {
            let Some(tcb) = slot else { continue };
            if tcb.state != TaskState::Blocked {
                continue;
            }
            let Some(block) = tcb.block else {
                // Blocked without a wait record cannot resolve; treat
                // as ready so the fault surfaces in the task, not as
                // a silent hang.
                wake(tcb, WakeCause::Fresh);
                continue;
            };

            if block.wait.is_some_and(|w| w.is_ready()) {
                wake(tcb, WakeCause::Signaled);
            } else if block.deadline.is_some_and(|d| d <= now) {
                wake(tcb, block.on_deadline);
            }
        }
    }

    /// Wake blocked tasks whose wait is on `source` and now satisfied.
    /// Called by primitives after a state change so that a wake
    /// performed inside a blocking call takes effect at the very next
    /// selection.
    pub(crate) fn notify(&mut self, source: *const ()) {
        for slot in self.slots.iter_mut() {
            let Some(tcb) = slot else { continue };
            if tcb.state != TaskState::Blocked {
                continue;
            }
            let Some(block) = tcb.block else { continue };
            if let Some(w) = block.wait {
                if w.source_ptr() == source && w.is_ready() {
                    wake(tcb, WakeCause::Signaled);
                }
            }
        }
    }

    // -- selection and dispatch bookkeeping --------------------------------

    /// Pick the next task to run: highest priority among Ready tasks,
    /// ties broken by earliest activation deadline, then by earliest
    /// registration. Returns `None` when nothing is Ready (idle).
    pub(crate) fn select(&self) -> Option<TaskId> {
        let mut best: Option<(&Tcb<E>, usize)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(tcb) = slot else { continue };
            if !tcb.is_ready() {
                continue;
            }
            let better = match best {
                None => true,
                Some((incumbent, _)) => {
                    tcb.priority > incumbent.priority
                        || (tcb.priority == incumbent.priority
                            && (earlier_deadline(tcb.deadline, incumbent.deadline)
                                || (tcb.deadline == incumbent.deadline
                                    && tcb.seq < incumbent.seq)))
                }
            };
            if better {
                best = Some((tcb, index));
            }
        }
        best.map(|(tcb, index)| TaskId {
            index: index as u8,
            generation: tcb.generation,
        })
    }

    /// Apply a finished activation's outcome to its TCB.
    pub(crate) fn apply(&mut self, id: TaskId, outcome: Result<Step, TaskError>) {
        let now = self.now;
        let Some(tcb) = self.resolve(id) else { return };

        // Wake bookkeeping is only for the activation that just ran.
        tcb.last_wake = WakeCause::Fresh;
        tcb.ended_wait = None;

        if tcb.stack_fault {
            #[cfg(feature = "defmt")]
            defmt::warn!("task {=str}: stack budget exceeded, terminating", tcb.name);
            tcb.state = TaskState::Terminated;
            return;
        }

        let step = match outcome {
            Ok(step) => step,
            Err(_err) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("task {=str}: unhandled error, terminating", tcb.name);
                tcb.state = TaskState::Terminated;
                return;
            }
        };

        match step {
            Step::Done => {
                tcb.state = TaskState::Terminated;
            }
            Step::Yield => {
                tcb.block = None;
                tcb.state = TaskState::Ready;
            }
            Step::Pending => {
                // The blocking primitive recorded the wait. A Pending
                // without one is an immediate retry.
                tcb.state = if tcb.block.is_some() {
                    TaskState::Blocked
                } else {
                    TaskState::Ready
                };
            }
            Step::Complete => {
                tcb.block = None;
                rearm(tcb, now);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TCB helpers
// ---------------------------------------------------------------------------

/// Transition a blocked TCB to Ready, recording why and on what.
fn wake<E>(tcb: &mut Tcb<E>, cause: WakeCause) {
    tcb.ended_wait = tcb.block.and_then(|b| b.wait).map(|w| w.source_ptr());
    tcb.block = None;
    tcb.last_wake = cause;
    tcb.state = TaskState::Ready;
}

/// Re-arm a task after `Step::Complete`, per its wake policy.
fn rearm<E>(tcb: &mut Tcb<E>, now: Instant) {
    match tcb.policy {
        WakePolicy::Periodic(interval) => {
            // Drift-free: the next release is measured from the
            // previous release, not from completion. An overrunning
            // task re-activates immediately, one interval at a time.
            let next = tcb.release + interval;
            tcb.release = next;
            tcb.deadline = Some(next + interval);
            if next <= now {
                tcb.last_wake = WakeCause::Released;
                tcb.state = TaskState::Ready;
            } else {
                tcb.state = TaskState::Blocked;
                tcb.block = Some(Block {
                    wait: None,
                    deadline: Some(next),
                    on_deadline: WakeCause::Released,
                });
            }
        }
        WakePolicy::Event { on, timeout } => {
            let deadline = match tcb.deadline_override {
                DeadlineOverride::Policy => timeout.map(|d| now + d),
                DeadlineOverride::Until(at) => Some(at),
                DeadlineOverride::Unbounded => None,
            };
            tcb.deadline_override = DeadlineOverride::Policy;
            tcb.deadline = deadline;
            if on.is_ready() {
                tcb.last_wake = WakeCause::Signaled;
                tcb.state = TaskState::Ready;
            } else {
                tcb.state = TaskState::Blocked;
                tcb.block = Some(Block {
                    wait: Some(on),
                    deadline,
                    on_deadline: WakeCause::TimedOut,
                });
            }
        }
    }
}

/// Strictly-earlier comparison where `None` means "no deadline" and
/// sorts last.
fn earlier_deadline(a: Option<Instant>, b: Option<Instant>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a < b,
        (Some(_), None) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
