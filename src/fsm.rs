//! # FSM Engine
//!
//! Generic table-driven finite state machine: one current state, a
//! transition table keyed on `(state, event kind)`, per-state duration
//! timeouts, and side effects described to an external sink rather
//! than executed inline. One task drives the engine by calling
//! [`Fsm::step`]; producers feed it through [`Fsm::post_event`].
//!
//! ## Rules
//!
//! - The designated **reset kind** always returns the machine to its
//!   safe initial state — checked before table lookup, every time,
//!   regardless of the table's contents.
//! - A state's duration runs from the instant the state was entered,
//!   not from the last `step` call. Duration `Never` means the state
//!   exits only on a matching event.
//! - An elapsed duration is delivered as a synthetic event of the
//!   designated **timeout kind**, looked up in the table like any
//!   other event. Queued events are consumed first: they arrived
//!   before the deadline.
//! - An event with no table entry hits the fallback policy (ignore by
//!   default) and is reported to the sink as an unhandled-event
//!   diagnostic — never a silent drop.

use crate::event::Event;
use crate::queue::{Queue, SendError};
use crate::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Transition table model
// ---------------------------------------------------------------------------

/// How long a state lasts before the engine synthesizes a timeout
/// event. Zero and infinite are distinct: `After(Duration::ZERO)`
/// times out immediately, `Never` never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateTimeout {
    /// Synthesize a timeout this long after state entry.
    After(Duration),
    /// No duration; the state exits only on a matching event.
    Never,
}

/// What a matched transition does.
#[derive(Debug, Clone, Copy)]
pub enum Action<S, A> {
    /// Move to `next`, arming its duration timeout.
    Goto {
        next: S,
        timeout: StateTimeout,
        effect: Option<A>,
    },
    /// Remain in the current state; the entry baseline and armed
    /// deadline are untouched.
    Stay { effect: Option<A> },
    /// Remain, pushing the armed deadline out by `by`. The entry
    /// baseline is untouched; extending a `Never` state is a no-op.
    ExtendTimeout { by: Duration, effect: Option<A> },
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy)]
pub struct Transition<S, K, A> {
    pub from: S,
    pub on: K,
    pub action: Action<S, A>,
}

/// What to do with an event the table has no row for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FallbackPolicy {
    /// Remain in the current state (default).
    Ignore,
    /// Treat any unrecognized event as a reset.
    ResetToInitial,
}

/// Static definition of a machine: initial state, reserved event
/// kinds, and the transition table.
#[derive(Debug, Clone, Copy)]
pub struct FsmDef<S: 'static, K: 'static, A: 'static> {
    /// Safe initial state, entered at startup and on reset.
    pub initial: S,
    pub initial_timeout: StateTimeout,
    /// Event kind that unconditionally returns to `initial`.
    pub reset: K,
    /// Event kind the engine synthesizes when a state's duration
    /// elapses.
    pub timeout: K,
    pub table: &'static [Transition<S, K, A>],
    pub fallback: FallbackPolicy,
}

/// Consumer of the engine's side effects and diagnostics. The real
/// implementation (LEDs, buzzer, log lines) is outside the core.
pub trait FsmSink<S, K, A> {
    /// Apply one effect description.
    fn emit(&mut self, effect: &A);

    /// An event arrived that the current state has no row for.
    fn unhandled(&mut self, state: S, kind: K) {
        let _ = (state, kind);
    }
}

/// What one `step` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepOutcome<S, K> {
    /// No pending event and no elapsed duration; nothing changed.
    Idle,
    Transitioned { from: S, to: S },
    /// A matched row kept the current state.
    Stayed,
    /// A matched row extended the current state's deadline.
    Extended,
    /// The fallback ignored an unrecognized event.
    Ignored(K),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The FSM engine. Created once at startup in the safe initial state
/// and never destroyed during normal operation; a reset event returns
/// it to that state unconditionally.
pub struct Fsm<S: 'static, K: 'static, P: 'static, A: 'static, const N: usize> {
    def: FsmDef<S, K, A>,
    state: S,
    previous: S,
    entered: Instant,
    deadline: Option<Instant>,
    inbox: &'static Queue<Event<K, P>, N>,
    transitions: u32,
    unhandled: u32,
}

impl<S, K, P, A, const N: usize> Fsm<S, K, P, A, N>
where
    S: Copy + PartialEq,
    K: Copy + PartialEq,
    P: Default,
{
    /// A machine in its initial state, entered at `now`.
    pub fn new(def: FsmDef<S, K, A>, inbox: &'static Queue<Event<K, P>, N>, now: Instant) -> Self {
        let deadline = arm(def.initial_timeout, now);
        Self {
            state: def.initial,
            previous: def.initial,
            entered: now,
            deadline,
            def,
            inbox,
            transitions: 0,
            unhandled: 0,
        }
    }

    /// Enqueue an event for the engine. Non-blocking; a full inbox
    /// hands the event back so the producer can decide to retry or
    /// drop — backpressure is visible, never silent.
    pub fn post_event(&self, event: Event<K, P>) -> Result<(), Event<K, P>> {
        self.inbox.try_send(event).map_err(|e| match e {
            SendError::Full(ev) | SendError::WouldBlock(ev) | SendError::TimedOut(ev) => ev,
        })
    }

    /// Process at most one event: a queued one if present, otherwise
    /// a synthetic timeout if the state's duration has elapsed,
    /// otherwise nothing. With no pending event and an unelapsed
    /// duration this is a no-op — `step` is idempotent.
    pub fn step(
        &mut self,
        now: Instant,
        sink: &mut impl FsmSink<S, K, A>,
    ) -> StepOutcome<S, K> {
        if let Ok(event) = self.inbox.try_recv() {
            return self.handle(event, now, sink);
        }
        if self.deadline.is_some_and(|d| now >= d) {
            // The elapsed duration fires once; the handler re-arms it
            // via Goto (new state) or ExtendTimeout.
            self.deadline = None;
            let timeout = Event::new(self.def.timeout, P::default(), now);
            return self.handle(timeout, now, sink);
        }
        StepOutcome::Idle
    }

    fn handle(
        &mut self,
        event: Event<K, P>,
        now: Instant,
        sink: &mut impl FsmSink<S, K, A>,
    ) -> StepOutcome<S, K> {
        // Reset overrides everything, before table lookup.
        if event.kind == self.def.reset {
            let from = self.state;
            self.enter(self.def.initial, self.def.initial_timeout, now);
            return StepOutcome::Transitioned {
                from,
                to: self.state,
            };
        }

        let table = self.def.table;
        let row = table
            .iter()
            .find(|t| t.from == self.state && t.on == event.kind);

        let Some(row) = row else {
            self.unhandled = self.unhandled.wrapping_add(1);
            sink.unhandled(self.state, event.kind);
            return match self.def.fallback {
                FallbackPolicy::Ignore => StepOutcome::Ignored(event.kind),
                FallbackPolicy::ResetToInitial => {
                    let from = self.state;
                    self.enter(self.def.initial, self.def.initial_timeout, now);
                    StepOutcome::Transitioned {
                        from,
                        to: self.state,
                    }
                }
            };
        };

        match &row.action {
            Action::Goto {
                next,
                timeout,
                effect,
            } => {
                if let Some(effect) = effect {
                    sink.emit(effect);
                }
                let from = self.state;
                self.enter(*next, *timeout, now);
                StepOutcome::Transitioned { from, to: *next }
            }
            Action::Stay { effect } => {
                if let Some(effect) = effect {
                    sink.emit(effect);
                }
                StepOutcome::Stayed
            }
            Action::ExtendTimeout { by, effect } => {
                if let Some(effect) = effect {
                    sink.emit(effect);
                }
                self.deadline = self.deadline.map(|d| d + *by);
                StepOutcome::Extended
            }
        }
    }

    fn enter(&mut self, next: S, timeout: StateTimeout, now: Instant) {
        self.previous = self.state;
        self.state = next;
        self.entered = now;
        self.deadline = arm(timeout, now);
        self.transitions = self.transitions.wrapping_add(1);
    }

    // -- introspection -----------------------------------------------------

    #[inline]
    pub fn state(&self) -> S {
        self.state
    }

    /// The state before the most recent transition.
    #[inline]
    pub fn previous_state(&self) -> S {
        self.previous
    }

    /// When the current state was entered.
    #[inline]
    pub fn entered_at(&self) -> Instant {
        self.entered
    }

    /// The current state's armed duration deadline, if any. The
    /// driving task feeds this to `TaskCtx::set_wake_deadline` so the
    /// scheduler wakes it in time to synthesize the timeout.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Completed transitions, including resets.
    #[inline]
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Events that hit the fallback policy.
    #[inline]
    pub fn unhandled_events(&self) -> u32 {
        self.unhandled
    }
}

fn arm(timeout: StateTimeout, now: Instant) -> Option<Instant> {
    match timeout {
        StateTimeout::After(d) => Some(now + d),
        StateTimeout::Never => None,
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
