//! # TickOS Configuration
//!
//! Compile-time constants governing the kernel and system behavior.
//! All limits are fixed at compile time — no dynamic allocation.

/// Maximum number of tasks the kernel can manage simultaneously.
/// This bounds the TCB slot array. Terminated slots are reclaimed and
/// reused; `TaskId` generations keep stale handles from addressing a
/// recycled slot.
pub const MAX_TASKS: usize = 16;

/// Scheduler tick frequency in Hz. One tick is the kernel's time
/// granularity: `Duration::from_millis` and friends convert through
/// this value. The embedder decides what drives the tick (a SysTick
/// interrupt, a simulation loop, a test harness).
pub const TICK_HZ: u64 = 1_000;

/// Default per-task stack budget, in words. An opaque capacity checked
/// against the high-water mark a task reports via
/// `TaskCtx::record_stack_usage`. Exceeding the budget terminates that
/// task only, never the whole system.
pub const DEFAULT_STACK_BUDGET: u32 = 256;

/// Depth of an FSM engine's inbound event queue.
pub const FSM_INBOX_DEPTH: usize = 8;

/// Depth of the well-known fault queue the watchdog emits into.
pub const FAULT_QUEUE_DEPTH: usize = 4;

/// Default number of consecutive missed liveness checks before the
/// watchdog declares a task unresponsive and raises `SystemFault`.
pub const DEFAULT_FAULT_THRESHOLD: u32 = 3;
