//! # TickOS — Tick-Driven Task and Event Core
//!
//! A single-core, priority-scheduled cooperative kernel for embedded
//! systems, with bounded queues, a mutex, event flags, a table-driven
//! finite-state-machine engine, and a liveness watchdog.
//!
//! ## Overview
//!
//! TickOS owns no hardware. The embedder feeds it time
//! (`Kernel::tick`) and turns the crank (`Kernel::run_once`); the
//! kernel decides which task runs, wakes blocked tasks whose waits
//! resolved, and keeps every shared structure behind an explicit
//! discipline — single writer, or critical section. The same loop that
//! runs on a microcontroller runs deterministically on the host, which
//! is how the test suite drives every scenario down to the tick.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Application Tasks                      │
//! ├──────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                     │
//! │   register_task() · tick() · run_once() · delete_task()  │
//! ├───────────────┬─────────────────────┬────────────────────┤
//! │   Scheduler   │   FSM Engine        │   Watchdog         │
//! │  scheduler.rs │   fsm.rs            │   watchdog.rs      │
//! │  ─ tick()     │   ─ step()          │   ─ heartbeat()    │
//! │  ─ select()   │   ─ post_event()    │   ─ check()        │
//! ├───────────────┴─────────────────────┴────────────────────┤
//! │       Primitives: queue.rs · sync.rs · event.rs           │
//! │   Queue<T, N> · Mutex<T> · EventFlag · Event<K, P>        │
//! ├──────────────────────────────────────────────────────────┤
//! │     Task Model (task.rs) · Time (time.rs) · config.rs     │
//! ├──────────────────────────────────────────────────────────┤
//! │   critical-section impl + clock source (embedder's port)  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! Priority-preemptive, cooperative-yield-on-block, no time-slicing.
//! A task body is a plain function run to completion per activation;
//! blocking primitives register a wait and the body reports
//! [`task::Step::Pending`], typically via the [`pend!`] macro:
//!
//! ```ignore
//! fn display(ctx: &mut TaskCtx<'_, Env>, env: &mut Env) -> Result<Step, TaskError> {
//!     let reading = pend!(SENSOR_DATA.recv(ctx, Timeout::After(Duration::from_millis(500))));
//!     env.display.show(reading);
//!     Ok(Step::Complete)
//! }
//! ```
//!
//! A higher-priority task woken inside a primitive call or at a tick
//! runs at the next scheduling decision — the model's safe preemption
//! point.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is fixed-capacity (`heapless`)
//! - **No `alloc`**: pure `core`
//! - **Shared state**: `critical_section` for compound updates,
//!   atomics for single-writer flags
//! - **ISR boundary**: wait-free operations only (`try_send`,
//!   `EventFlag::raise`, `SystemHealth::heartbeat`)

#![no_std]

pub use nb;

pub mod config;
pub mod event;
pub mod fsm;
pub mod kernel;
pub mod queue;
pub(crate) mod scheduler;
pub mod sync;
pub mod task;
pub mod time;
pub mod watchdog;

/// Unwrap an `nb` result inside a task body, returning
/// [`task::Step::Pending`] from the body when the primitive registered
/// a wait and converting hard failures into [`task::TaskError`].
///
/// ```ignore
/// let item = pend!(queue.recv(ctx, Timeout::Forever));
/// ```
#[macro_export]
macro_rules! pend {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err($crate::nb::Error::WouldBlock) => return Ok($crate::task::Step::Pending),
            Err($crate::nb::Error::Other(err)) => return Err(err.into()),
        }
    };
}
