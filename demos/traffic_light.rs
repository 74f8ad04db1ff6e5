//! # Traffic-Light Demo
//!
//! Host simulation of a pedestrian-crossing traffic light: the FSM
//! engine runs the signal plan, a task roster feeds it, and the
//! watchdog supervises the roster.
//!
//! | Task       | Priority | Wake policy          | Role                              |
//! |------------|----------|----------------------|-----------------------------------|
//! | `watchdog` | 4        | periodic 2 s         | liveness sweep, raises faults     |
//! | `inputs`   | 3        | periodic 50 ms       | button/sensor flags → FSM events  |
//! | `signal`   | 2        | event (FSM inbox)    | drives the FSM, applies remedies  |
//! | `status`   | 1        | periodic 5 s         | console report behind the mutex   |
//!
//! The button and the car sensor are ISR-shaped producers: they only
//! raise event flags, wait-free; the `inputs` task turns the flags
//! into typed events. Mid-run the demo wedges the `inputs` task to
//! show the watchdog detecting the silence and the `signal` task
//! answering the fault with a reset to the safe state.
//!
//! Run with `cargo run --example traffic_light`.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use tickos::config::FSM_INBOX_DEPTH;
use tickos::event::Event;
use tickos::fsm::{
    Action, FallbackPolicy, Fsm, FsmDef, FsmSink, StateTimeout, StepOutcome, Transition,
};
use tickos::kernel::{Kernel, TaskCtx};
use tickos::pend;
use tickos::queue::Queue;
use tickos::sync::{EventFlag, Mutex};
use tickos::task::{Step, TaskConfig, TaskError, WakePolicy};
use tickos::time::{Duration, Instant, Timeout};
use tickos::watchdog::{FaultQueue, SystemHealth, Watchdog};

// ---------------------------------------------------------------------------
// Signal plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Light {
    Red,
    RedYellow,
    Green,
    Yellow,
    Pedestrian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrafficEvent {
    TimerExpired,
    ButtonPressed,
    SensorTriggered,
    Emergency,
    Reset,
}

/// Lamp pattern a state drives. Applied by the sink, not the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LampSet {
    red: bool,
    yellow: bool,
    green: bool,
    walk: bool,
}

const RED: LampSet = LampSet { red: true, yellow: false, green: false, walk: true };
const RED_YELLOW: LampSet = LampSet { red: true, yellow: true, green: false, walk: false };
const GREEN: LampSet = LampSet { red: false, yellow: false, green: true, walk: false };
const YELLOW: LampSet = LampSet { red: false, yellow: true, green: false, walk: false };
const WALK: LampSet = LampSet { red: true, yellow: false, green: false, walk: true };

const fn secs(s: u64) -> StateTimeout {
    StateTimeout::After(Duration::from_secs(s))
}

const fn goto(next: Light, timeout: StateTimeout, lamps: LampSet) -> Action<Light, LampSet> {
    Action::Goto { next, timeout, effect: Some(lamps) }
}

/// European cycle with a pedestrian phase. The car sensor stretches a
/// green by 5 s per trigger; an emergency clears the way immediately.
const PLAN: &[Transition<Light, TrafficEvent, LampSet>] = &[
    Transition { from: Light::Red, on: TrafficEvent::TimerExpired, action: goto(Light::RedYellow, secs(2), RED_YELLOW) },
    Transition { from: Light::Red, on: TrafficEvent::ButtonPressed, action: goto(Light::Pedestrian, secs(20), WALK) },
    Transition { from: Light::RedYellow, on: TrafficEvent::TimerExpired, action: goto(Light::Green, secs(15), GREEN) },
    Transition { from: Light::Green, on: TrafficEvent::TimerExpired, action: goto(Light::Yellow, secs(3), YELLOW) },
    Transition { from: Light::Green, on: TrafficEvent::ButtonPressed, action: goto(Light::Yellow, secs(3), YELLOW) },
    Transition {
        from: Light::Green,
        on: TrafficEvent::SensorTriggered,
        action: Action::ExtendTimeout { by: Duration::from_secs(5), effect: None },
    },
    Transition { from: Light::Yellow, on: TrafficEvent::TimerExpired, action: goto(Light::Red, secs(10), RED) },
    Transition { from: Light::Pedestrian, on: TrafficEvent::TimerExpired, action: goto(Light::RedYellow, secs(2), RED_YELLOW) },
    // Emergency vehicles get green from anywhere.
    Transition { from: Light::Red, on: TrafficEvent::Emergency, action: goto(Light::Green, secs(15), GREEN) },
    Transition { from: Light::RedYellow, on: TrafficEvent::Emergency, action: goto(Light::Green, secs(15), GREEN) },
    Transition { from: Light::Yellow, on: TrafficEvent::Emergency, action: goto(Light::Green, secs(15), GREEN) },
    Transition { from: Light::Pedestrian, on: TrafficEvent::Emergency, action: goto(Light::Green, secs(15), GREEN) },
    Transition {
        from: Light::Green,
        on: TrafficEvent::Emergency,
        action: Action::ExtendTimeout { by: Duration::from_secs(15), effect: None },
    },
];

const DEF: FsmDef<Light, TrafficEvent, LampSet> = FsmDef {
    initial: Light::Red,
    initial_timeout: secs(10),
    reset: TrafficEvent::Reset,
    timeout: TrafficEvent::TimerExpired,
    table: PLAN,
    fallback: FallbackPolicy::Ignore,
};

// ---------------------------------------------------------------------------
// Shared structures (the ISR/task boundary)
// ---------------------------------------------------------------------------

static INBOX: Queue<Event<TrafficEvent>, FSM_INBOX_DEPTH> = Queue::new();
static FAULTS: FaultQueue = Queue::new();
static HEALTH: SystemHealth = SystemHealth::new();
static CONSOLE: Mutex<u32> = Mutex::new(0); // line counter behind the lock

/// "ISR" side: the crossing button and the car loop sensor only ever
/// raise flags.
static BUTTON: EventFlag = EventFlag::new();
static SENSOR: EventFlag = EventFlag::new();

// ---------------------------------------------------------------------------
// Lamp hardware (simulated digital outputs)
// ---------------------------------------------------------------------------

/// A digital output standing in for a real lamp driver.
struct Lamp {
    name: &'static str,
    lit: bool,
}

impl Lamp {
    const fn new(name: &'static str) -> Self {
        Self { name, lit: false }
    }
}

impl ErrorType for Lamp {
    type Error = Infallible;
}

impl OutputPin for Lamp {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.lit = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.lit = true;
        Ok(())
    }
}

/// Applies lamp patterns to the four outputs and narrates them.
struct LampPanel {
    red: Lamp,
    yellow: Lamp,
    green: Lamp,
    walk: Lamp,
}

impl LampPanel {
    fn new() -> Self {
        Self {
            red: Lamp::new("red"),
            yellow: Lamp::new("yellow"),
            green: Lamp::new("green"),
            walk: Lamp::new("walk"),
        }
    }

    fn describe(&self) -> String {
        [&self.red, &self.yellow, &self.green, &self.walk]
            .iter()
            .filter(|lamp| lamp.lit)
            .map(|lamp| lamp.name)
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl FsmSink<Light, TrafficEvent, LampSet> for LampPanel {
    fn emit(&mut self, lamps: &LampSet) {
        let _ = self.red.set_state(lamps.red.into());
        let _ = self.yellow.set_state(lamps.yellow.into());
        let _ = self.green.set_state(lamps.green.into());
        let _ = self.walk.set_state(lamps.walk.into());
        println!("           lamps: {}", self.describe());
    }

    fn unhandled(&mut self, state: Light, kind: TrafficEvent) {
        println!("           (ignored {kind:?} in {state:?})");
    }
}

// ---------------------------------------------------------------------------
// Task roster
// ---------------------------------------------------------------------------

struct Env {
    fsm: Fsm<Light, TrafficEvent, (), LampSet, FSM_INBOX_DEPTH>,
    panel: LampPanel,
    dog: Watchdog,
}

fn fmt_now(now: Instant) -> String {
    format!("[{:>6.1}s]", now.as_ticks() as f64 / 1000.0)
}

/// Priority 3, periodic 50 ms: turn the wait-free input flags into
/// typed FSM events.
fn inputs_task(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
    HEALTH.heartbeat(ctx.id(), ctx.now());

    if BUTTON.take() {
        println!("{} button pressed", fmt_now(ctx.now()));
        if env.fsm.post_event(Event::signal(TrafficEvent::ButtonPressed, ctx.now())).is_err() {
            println!("{} inbox full, button event retried next poll", fmt_now(ctx.now()));
            BUTTON.raise();
        }
    }
    if SENSOR.take() {
        println!("{} car sensor triggered", fmt_now(ctx.now()));
        env.fsm
            .post_event(Event::signal(TrafficEvent::SensorTriggered, ctx.now()))
            .ok();
    }
    Ok(Step::Complete)
}

/// Priority 2, event-driven on the FSM inbox: drive the engine, arm
/// its state-duration timeout, and answer watchdog faults with a
/// reset to the safe state.
fn signal_task(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
    HEALTH.heartbeat(ctx.id(), ctx.now());
    ctx.record_stack_usage(96);

    while let Ok(fault) = FAULTS.try_recv() {
        println!(
            "{} SystemFault({:?}) for task #{} -> resetting signals",
            fmt_now(ctx.now()),
            fault.kind,
            fault.task.index()
        );
        env.fsm
            .post_event(Event::signal(TrafficEvent::Reset, ctx.now()))
            .ok();
        HEALTH.clear_fault();
    }

    loop {
        match env.fsm.step(ctx.now(), &mut env.panel) {
            StepOutcome::Idle => break,
            StepOutcome::Transitioned { from, to } => {
                println!("{} {:?} -> {:?}", fmt_now(ctx.now()), from, to);
            }
            StepOutcome::Extended => {
                println!("{} green extended", fmt_now(ctx.now()));
            }
            StepOutcome::Stayed | StepOutcome::Ignored(_) => {}
        }
    }

    // Wake again when the state's duration elapses, even if no event
    // arrives before then.
    ctx.set_wake_deadline(env.fsm.deadline());
    Ok(Step::Complete)
}

/// Priority 4, periodic 2 s: the liveness sweep.
fn watchdog_task(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
    env.dog.check(ctx.now());
    Ok(Step::Complete)
}

/// Priority 1, periodic 5 s: status report behind the console mutex.
fn status_task(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
    let mut lines = pend!(CONSOLE.lock(ctx, Timeout::After(Duration::from_millis(100))));
    *lines += 1;
    println!(
        "{} status #{}: state {:?}, {} transitions, {} unhandled",
        fmt_now(ctx.now()),
        *lines,
        env.fsm.state(),
        env.fsm.transitions(),
        env.fsm.unhandled_events(),
    );
    Ok(Step::Complete)
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

fn main() {
    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env {
        fsm: Fsm::new(DEF, &INBOX, Instant::ZERO),
        panel: LampPanel::new(),
        dog: Watchdog::new(&HEALTH, &FAULTS, 2),
    };

    let inputs = kernel
        .register_task(
            &TaskConfig {
                name: "inputs",
                priority: 3,
                policy: WakePolicy::Periodic(Duration::from_millis(50)),
                stack_budget: 128,
                liveness_budget: Some(Duration::from_secs(1)),
            },
            inputs_task,
        )
        .expect("register inputs");

    let signal = kernel
        .register_task(
            &TaskConfig {
                name: "signal",
                priority: 2,
                // The short policy timeout covers the stretch before the
                // first activation arms the FSM deadline override.
                policy: WakePolicy::Event {
                    on: INBOX.readable(),
                    timeout: Some(Duration::from_millis(100)),
                },
                stack_budget: 192,
                liveness_budget: Some(Duration::from_secs(30)),
            },
            signal_task,
        )
        .expect("register signal");

    kernel
        .register_task(
            &TaskConfig::new("watchdog", 4, WakePolicy::Periodic(Duration::from_secs(2))),
            watchdog_task,
        )
        .expect("register watchdog");

    kernel
        .register_task(
            &TaskConfig::new("status", 1, WakePolicy::Periodic(Duration::from_secs(5))),
            status_task,
        )
        .expect("register status");

    for id in [inputs, signal] {
        let budget = kernel.liveness_budget(id).unwrap();
        env.dog.monitor(id, budget, kernel.now()).unwrap();
    }

    println!("traffic light simulation: 90 s at 10 ms per tick");
    println!("{} start in {:?}", fmt_now(kernel.now()), env.fsm.state());

    // Prime the initial dispatch (first periodic releases).
    kernel.run_until_idle(&mut env);

    for step in 1..=9_000u32 {
        kernel.tick(Duration::from_millis(10));
        let now = kernel.now();

        // Scripted world: a pedestrian, two cars, and a wedged task.
        match now.as_ticks() {
            14_000 => BUTTON.raise(),
            16_000 | 18_000 => SENSOR.raise(),
            40_000 => {
                println!("{} wedging the inputs task", fmt_now(now));
                kernel.suspend_task(inputs).unwrap();
            }
            60_000 => {
                println!("{} reviving the inputs task", fmt_now(now));
                kernel.resume_task(inputs).unwrap();
            }
            _ => {}
        }

        kernel.run_until_idle(&mut env);

        if step % 3_000 == 0 {
            println!(
                "{} signal task stack high-water: {:?} words",
                fmt_now(now),
                kernel.stack_high_water(signal)
            );
        }
    }

    println!(
        "{} done: {} transitions, signal state {:?}",
        fmt_now(kernel.now()),
        env.fsm.transitions(),
        env.fsm.state()
    );
}
