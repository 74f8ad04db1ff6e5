//! End-to-end scenarios: the task roster, primitives, FSM engine and
//! watchdog wired together and driven tick by tick, the way the
//! embedder's loop would.

use tickos::event::Event;
use tickos::fsm::{Action, FallbackPolicy, Fsm, FsmDef, FsmSink, StateTimeout, Transition};
use tickos::kernel::{Kernel, RunOutcome, TaskCtx};
use tickos::pend;
use tickos::queue::{Queue, RecvError, SendError};
use tickos::sync::{EventFlag, LockError, Mutex};
use tickos::task::{Step, TaskConfig, TaskError, TaskState, WakePolicy};
use tickos::time::{Duration, Instant, Timeout};
use tickos::watchdog::{FaultKind, SystemHealth, Watchdog};

fn periodic(name: &'static str, priority: u8, ticks: u64) -> TaskConfig {
    TaskConfig::new(
        name,
        priority,
        WakePolicy::Periodic(Duration::from_ticks(ticks)),
    )
}

#[test]
fn scenario_a_three_priorities_run_highest_first() {
    #[derive(Default)]
    struct Env {
        order: Vec<u8>,
    }
    fn p1(_: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        env.order.push(1);
        Ok(Step::Complete)
    }
    fn p2(_: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        env.order.push(2);
        Ok(Step::Complete)
    }
    fn p3(_: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        env.order.push(3);
        Ok(Step::Complete)
    }

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env::default();
    kernel.register_task(&periodic("p1", 1, 100), p1).unwrap();
    kernel.register_task(&periodic("p2", 2, 100), p2).unwrap();
    kernel.register_task(&periodic("p3", 3, 100), p3).unwrap();

    kernel.run_until_idle(&mut env);
    assert_eq!(env.order, vec![3, 2, 1]);
}

#[test]
fn scenario_b_capacity_two_queue() {
    let q: Queue<char, 2> = Queue::new();

    q.try_send('A').unwrap();
    q.try_send('B').unwrap();
    assert_eq!(q.try_send('C'), Err(SendError::Full('C')));

    assert_eq!(q.try_recv(), Ok('A'));
    q.try_send('C').unwrap();
    assert_eq!(q.try_recv(), Ok('B'));
    assert_eq!(q.try_recv(), Ok('C'));
}

/// Traffic-light timing law: `Red` with a 10 s duration and no
/// arriving events transitions to `RedYellow` on the synthetic
/// timeout — end to end through the kernel, with the FSM task arming
/// its own wake deadline.
#[test]
fn scenario_c_state_duration_timeout_through_kernel() {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        RedYellow,
    }
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Ev {
        Timer,
        Reset,
    }

    static TABLE: &[Transition<Light, Ev, ()>] = &[Transition {
        from: Light::Red,
        on: Ev::Timer,
        action: Action::Goto {
            next: Light::RedYellow,
            timeout: StateTimeout::Never,
            effect: None,
        },
    }];
    static INBOX: Queue<Event<Ev>, 4> = Queue::new();

    struct NullSink;
    impl FsmSink<Light, Ev, ()> for NullSink {
        fn emit(&mut self, _: &()) {}
    }

    struct Env {
        fsm: Fsm<Light, Ev, (), (), 4>,
        sink: NullSink,
    }

    fn signal(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        while !matches!(
            env.fsm.step(ctx.now(), &mut env.sink),
            tickos::fsm::StepOutcome::Idle
        ) {}
        ctx.set_wake_deadline(env.fsm.deadline());
        Ok(Step::Complete)
    }

    let def = FsmDef {
        initial: Light::Red,
        initial_timeout: StateTimeout::After(Duration::from_secs(10)),
        reset: Ev::Reset,
        timeout: Ev::Timer,
        table: TABLE,
        fallback: FallbackPolicy::Ignore,
    };

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env {
        fsm: Fsm::new(def, &INBOX, Instant::ZERO),
        sink: NullSink,
    };

    kernel
        .register_task(
            &TaskConfig::new(
                "signal",
                2,
                WakePolicy::Event {
                    on: INBOX.readable(),
                    timeout: Some(Duration::from_millis(100)),
                },
            ),
            signal,
        )
        .unwrap();

    // First activation (policy timeout) arms the 10 s state deadline.
    kernel.tick(Duration::from_millis(100));
    kernel.run_until_idle(&mut env);
    assert_eq!(env.fsm.state(), Light::Red);

    // Just before the duration elapses: nothing happens.
    kernel.tick(Duration::from_millis(9_800));
    kernel.run_until_idle(&mut env);
    assert_eq!(env.fsm.state(), Light::Red);

    // At 10 s the synthetic timeout drives the transition.
    kernel.tick(Duration::from_millis(100));
    kernel.run_until_idle(&mut env);
    assert_eq!(env.fsm.state(), Light::RedYellow);
}

/// Liveness budget 5 s, heartbeats every 6 s, fault threshold 2: the
/// watchdog's second missed check raises exactly one `SystemFault`.
#[test]
fn scenario_d_watchdog_detects_slow_heartbeat() {
    static HEALTH: SystemHealth = SystemHealth::new();
    static FAULTS: tickos::watchdog::FaultQueue = Queue::new();

    struct Env {
        dog: Watchdog,
    }

    fn beats(ctx: &mut TaskCtx<'_, Env>, _: &mut Env) -> Result<Step, TaskError> {
        HEALTH.heartbeat(ctx.id(), ctx.now());
        Ok(Step::Complete)
    }

    fn sweep(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        env.dog.check(ctx.now());
        Ok(Step::Complete)
    }

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env {
        dog: Watchdog::new(&HEALTH, &FAULTS, 2),
    };

    // The sweep outranks the heartbeat task, so on a shared release
    // instant the check observes the silence first.
    let mut config = periodic("x", 1, 6_000);
    config.liveness_budget = Some(Duration::from_secs(5));
    let x = kernel.register_task(&config, beats).unwrap();
    kernel.register_task(&periodic("watchdog", 4, 6_000), sweep).unwrap();

    env.dog
        .monitor(x, kernel.liveness_budget(x).unwrap(), kernel.now())
        .unwrap();

    kernel.run_until_idle(&mut env); // t = 0: check ok, heartbeat
    assert!(FAULTS.try_recv().is_err());

    kernel.tick(Duration::from_secs(6)); // t = 6: miss 1, then heartbeat
    kernel.run_until_idle(&mut env);
    assert!(FAULTS.try_recv().is_err());
    assert!(!HEALTH.fault_active());

    kernel.tick(Duration::from_secs(6)); // t = 12: miss 2 → fault
    kernel.run_until_idle(&mut env);
    assert!(HEALTH.fault_active());
    let fault = FAULTS.try_recv().unwrap();
    assert_eq!(fault.task, x);
    assert_eq!(fault.kind, FaultKind::Unresponsive);
    assert!(FAULTS.try_recv().is_err(), "exactly one fault event");
}

/// A blocked receiver is woken by the send itself — no tick in
/// between — because the sending primitive notifies the scheduler.
#[test]
fn blocked_receiver_wakes_on_send() {
    static Q: Queue<u32, 4> = Queue::new();

    #[derive(Default)]
    struct Env {
        got: Vec<u32>,
    }

    fn consumer(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        let item = pend!(Q.recv(ctx, Timeout::Forever));
        env.got.push(item);
        Ok(Step::Complete)
    }

    fn producer(ctx: &mut TaskCtx<'_, Env>, _: &mut Env) -> Result<Step, TaskError> {
        match Q.send(ctx, 42, Timeout::Poll) {
            Ok(()) => Ok(Step::Complete),
            Err(_) => Err(TaskError::QueueFull),
        }
    }

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env::default();
    // Consumer outranks producer: it runs first and blocks empty.
    let consumer_id = kernel.register_task(&periodic("consumer", 3, 1_000), consumer).unwrap();
    kernel.register_task(&periodic("producer", 1, 1_000), producer).unwrap();

    // One pass: consumer blocks, producer sends, consumer is woken
    // and drains — all without a tick.
    kernel.run_until_idle(&mut env);
    assert_eq!(env.got, vec![42]);
    assert_eq!(kernel.task_state(consumer_id), Some(TaskState::Blocked));
}

#[test]
fn blocking_receive_times_out_distinctly() {
    static Q: Queue<u32, 4> = Queue::new();

    #[derive(Default)]
    struct Env {
        outcome: Option<Result<u32, RecvError>>,
    }

    fn consumer(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        match Q.recv(ctx, Timeout::After(Duration::from_ticks(50))) {
            Ok(v) => env.outcome = Some(Ok(v)),
            Err(nb::Error::WouldBlock) => return Ok(Step::Pending),
            Err(nb::Error::Other(e)) => env.outcome = Some(Err(e)),
        }
        Ok(Step::Complete)
    }

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env::default();
    kernel.register_task(&periodic("consumer", 1, 1_000), consumer).unwrap();

    kernel.run_until_idle(&mut env);
    assert_eq!(env.outcome, None, "still waiting");

    kernel.tick(Duration::from_ticks(49));
    kernel.run_until_idle(&mut env);
    assert_eq!(env.outcome, None, "deadline not reached");

    kernel.tick(Duration::from_ticks(1));
    kernel.run_until_idle(&mut env);
    assert_eq!(env.outcome, Some(Err(RecvError::TimedOut)));
}

/// FIFO law across the blocking paths: a fast producer pushing five
/// items through a capacity-3 queue against a slow consumer delivers
/// every item, in order, exactly once.
#[test]
fn fifo_law_with_blocking_producer() {
    static Q: Queue<u32, 3> = Queue::new();

    #[derive(Default)]
    struct Env {
        next: u32,
        got: Vec<u32>,
    }

    fn producer(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        while env.next < 5 {
            match Q.send(ctx, env.next, Timeout::Forever) {
                Ok(()) => env.next += 1,
                Err(SendError::WouldBlock(_)) => return Ok(Step::Pending),
                Err(_) => return Err(TaskError::QueueFull),
            }
        }
        Ok(Step::Done)
    }

    fn consumer(_: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        if let Ok(v) = Q.try_recv() {
            env.got.push(v);
        }
        Ok(Step::Complete)
    }

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env::default();
    kernel.register_task(&periodic("producer", 2, 1), producer).unwrap();
    kernel.register_task(&periodic("consumer", 1, 10), consumer).unwrap();

    for _ in 0..200 {
        kernel.tick(Duration::from_ticks(1));
        kernel.run_until_idle(&mut env);
    }
    assert_eq!(env.got, vec![0, 1, 2, 3, 4]);
}

/// Mutual exclusion against embedder-held locks, release on the error
/// path, and a distinct lock timeout.
#[test]
fn mutex_contention_timeout_and_error_path_release() {
    static M: Mutex<u32> = Mutex::new(0);

    #[derive(Default)]
    struct Env {
        lock_result: Option<Result<(), LockError>>,
    }

    fn locker(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        match M.lock(ctx, Timeout::After(Duration::from_ticks(100))) {
            Ok(mut guard) => {
                *guard += 1;
                env.lock_result = Some(Ok(()));
                // Error after acquiring: the guard must still release.
                Err(TaskError::Other("died holding the lock"))
            }
            Err(nb::Error::WouldBlock) => Ok(Step::Pending),
            Err(nb::Error::Other(e)) => {
                env.lock_result = Some(Err(e));
                Ok(Step::Done)
            }
        }
    }

    // Case 1: lock held too long → distinct timeout.
    {
        let mut kernel: Kernel<Env> = Kernel::new();
        let mut env = Env::default();
        kernel.register_task(&periodic("locker", 1, 10_000), locker).unwrap();

        let held = M.try_lock().unwrap();
        kernel.run_until_idle(&mut env);
        assert_eq!(env.lock_result, None, "blocked behind the external lock");

        kernel.tick(Duration::from_ticks(100));
        kernel.run_until_idle(&mut env);
        assert_eq!(env.lock_result, Some(Err(LockError::TimedOut)));
        drop(held);
    }

    // Case 2: lock released in time → acquired; the body then dies
    // and the guard still unlocks on the way out.
    {
        let mut kernel: Kernel<Env> = Kernel::new();
        let mut env = Env::default();
        let id = kernel.register_task(&periodic("locker", 1, 10_000), locker).unwrap();

        let held = M.try_lock().unwrap();
        kernel.run_until_idle(&mut env);
        drop(held);

        kernel.tick(Duration::from_ticks(1));
        assert!(matches!(kernel.run_once(&mut env), RunOutcome::Ran(_)));
        assert_eq!(env.lock_result, Some(Ok(())));
        assert_eq!(kernel.task_state(id), Some(TaskState::Terminated));
        assert!(!M.is_locked(), "guard released on the error path");
    }
}

/// The ISR pattern: an interrupt-shaped producer raises a flag, the
/// event-driven task wakes at the next tick and consumes it.
#[test]
fn event_flag_wakes_event_driven_task() {
    static FLAG: EventFlag = EventFlag::new();

    #[derive(Default)]
    struct Env {
        served: u32,
    }

    fn handler(_: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
        if FLAG.take() {
            env.served += 1;
        }
        Ok(Step::Complete)
    }

    let mut kernel: Kernel<Env> = Kernel::new();
    let mut env = Env::default();
    kernel
        .register_task(
            &TaskConfig::new(
                "handler",
                3,
                WakePolicy::Event {
                    on: FLAG.raised_ref(),
                    timeout: None,
                },
            ),
            handler,
        )
        .unwrap();

    // Nothing raised: the task never runs.
    kernel.tick(Duration::from_ticks(10));
    assert_eq!(kernel.run_until_idle(&mut env), 0);

    // "Interrupt" fires between ticks.
    FLAG.raise();
    assert_eq!(kernel.run_until_idle(&mut env), 0, "wake happens at the tick");
    kernel.tick(Duration::from_ticks(1));
    assert_eq!(kernel.run_until_idle(&mut env), 1);
    assert_eq!(env.served, 1);

    // Consumed: no further activations until the next raise.
    kernel.tick(Duration::from_ticks(10));
    assert_eq!(kernel.run_until_idle(&mut env), 0);
}

/// Registration fills the task table; the overflow registration fails
/// with `CapacityExceeded` and the roster keeps running.
#[test]
fn task_table_capacity_is_enforced() {
    fn noop(_: &mut TaskCtx<'_, ()>, _: &mut ()) -> Result<Step, TaskError> {
        Ok(Step::Complete)
    }

    let mut kernel: Kernel<()> = Kernel::new();
    for _ in 0..tickos::config::MAX_TASKS {
        kernel.register_task(&periodic("t", 1, 100), noop).unwrap();
    }
    assert!(kernel.register_task(&periodic("t", 1, 100), noop).is_err());

    assert!(matches!(kernel.run_once(&mut ()), RunOutcome::Ran(_)));
}
