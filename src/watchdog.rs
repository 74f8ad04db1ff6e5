//! # Watchdog
//!
//! Liveness monitoring: tasks report heartbeats, the watchdog task
//! periodically checks declared liveness budgets and raises
//! [`SystemFault`] events into a well-known queue when a task goes
//! silent for too long.
//!
//! Detection is separated from remediation: the watchdog never
//! terminates a task or the system. It latches the global fault flag
//! and emits one fault event per detected task; what to do about it
//! (reset the FSM, enter a safe state, ignore) belongs to whichever
//! task consumes the fault queue.
//!
//! Writer discipline on [`SystemHealth`]: monitored tasks write only
//! their own last-seen timestamp (`heartbeat`), the watchdog alone
//! writes miss counters and fault latches (`check`). Both go through
//! one critical section, so heartbeats stay safe from ISR-shaped
//! contexts and never block.

use core::cell::RefCell;

use critical_section::Mutex as CsMutex;
use heapless::Vec;

use crate::config::{FAULT_QUEUE_DEPTH, MAX_TASKS};
use crate::queue::Queue;
use crate::task::TaskId;
use crate::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Fault events
// ---------------------------------------------------------------------------

/// Why a task was declared faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    /// No heartbeat within the liveness budget for the configured
    /// number of consecutive checks.
    Unresponsive,
}

/// A fault raised by the watchdog. Crosses task boundaries as an
/// ordinary event through the fault queue — the only condition in the
/// system designed to do so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemFault {
    pub task: TaskId,
    pub kind: FaultKind,
    pub at: Instant,
}

/// The well-known queue type fault consumers subscribe to.
pub type FaultQueue = Queue<SystemFault, FAULT_QUEUE_DEPTH>;

/// Monitoring registration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MonitorError {
    /// The monitor table is full.
    CapacityExceeded,
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

/// Per-task liveness record.
#[derive(Debug, Clone, Copy)]
struct Monitor {
    task: TaskId,
    budget: Duration,
    last_seen: Instant,
    misses: u32,
    faulted: bool,
}

struct HealthInner {
    monitors: Vec<Monitor, MAX_TASKS>,
    fault: bool,
}

/// Shared health state: last-seen timestamps, miss counters, and the
/// global fault flag. `const fn new` so it can live in a `static`
/// reachable from every task and ISR-shaped context.
pub struct SystemHealth {
    inner: CsMutex<RefCell<HealthInner>>,
}

impl SystemHealth {
    pub const fn new() -> Self {
        Self {
            inner: CsMutex::new(RefCell::new(HealthInner {
                monitors: Vec::new(),
                fault: false,
            })),
        }
    }

    /// Record "task is alive now". Wait-free (one short critical
    /// section, no suspension); callable from any context. Unmonitored
    /// tasks are ignored.
    pub fn heartbeat(&self, task: TaskId, now: Instant) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if let Some(m) = inner.monitors.iter_mut().find(|m| m.task == task) {
                m.last_seen = now;
            }
        });
    }

    /// Whether a fault has been latched.
    pub fn fault_active(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow_ref(cs).fault)
    }

    /// Un-latch the global fault flag. Remediation's call to make,
    /// after it has dealt with the fault events.
    pub fn clear_fault(&self) {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).fault = false);
    }
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Watchdog
// ---------------------------------------------------------------------------

/// The detection logic a dedicated watchdog task runs periodically.
pub struct Watchdog {
    health: &'static SystemHealth,
    faults: &'static FaultQueue,
    /// Consecutive missed checks before a task is declared faulted.
    threshold: u32,
}

impl Watchdog {
    pub const fn new(
        health: &'static SystemHealth,
        faults: &'static FaultQueue,
        threshold: u32,
    ) -> Self {
        Self {
            health,
            faults,
            threshold,
        }
    }

    /// Start monitoring a task. `now` seeds the last-seen timestamp so
    /// the first budget window starts at registration, not at epoch.
    pub fn monitor(
        &self,
        task: TaskId,
        budget: Duration,
        now: Instant,
    ) -> Result<(), MonitorError> {
        critical_section::with(|cs| {
            let mut inner = self.health.inner.borrow_ref_mut(cs);
            inner
                .monitors
                .push(Monitor {
                    task,
                    budget,
                    last_seen: now,
                    misses: 0,
                    faulted: false,
                })
                .map_err(|_| MonitorError::CapacityExceeded)
        })
    }

    /// One liveness sweep. For every monitored task: silence longer
    /// than its budget counts a miss, a fresh heartbeat clears the
    /// count. Reaching the threshold latches the fault and emits one
    /// [`SystemFault`] into the fault queue. Returns the number of
    /// faults raised by this sweep.
    pub fn check(&self, now: Instant) -> u32 {
        let mut raised: Vec<SystemFault, MAX_TASKS> = Vec::new();

        critical_section::with(|cs| {
            let mut inner = self.health.inner.borrow_ref_mut(cs);
            let mut fault = inner.fault;
            for m in inner.monitors.iter_mut() {
                if now.saturating_since(m.last_seen) > m.budget {
                    m.misses += 1;
                    if m.misses >= self.threshold && !m.faulted {
                        m.faulted = true;
                        fault = true;
                        raised
                            .push(SystemFault {
                                task: m.task,
                                kind: FaultKind::Unresponsive,
                                at: now,
                            })
                            .ok();
                    }
                } else {
                    m.misses = 0;
                    m.faulted = false;
                }
            }
            inner.fault = fault;
        });

        // Emit outside the health critical section; a full fault
        // queue drops the event but the latched flag still stands.
        let count = raised.len() as u32;
        for fault in raised {
            if self.faults.try_send(fault).is_err() {
                #[cfg(feature = "defmt")]
                defmt::warn!("fault queue full, dropping SystemFault");
            }
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task(index: u8) -> TaskId {
        TaskId {
            index,
            generation: 1,
        }
    }

    fn at(secs: u64) -> Instant {
        Instant::ZERO + Duration::from_secs(secs)
    }

    #[test]
    fn test_two_missed_checks_raise_system_fault() {
        // Liveness budget 5 s, heartbeats every 6 s, threshold 2: the
        // second missed check declares the task unresponsive.
        static HEALTH: SystemHealth = SystemHealth::new();
        static FAULTS: FaultQueue = Queue::new();
        let dog = Watchdog::new(&HEALTH, &FAULTS, 2);
        let x = task(0);

        dog.monitor(x, Duration::from_secs(5), at(0)).unwrap();

        assert_eq!(dog.check(at(6)), 0); // miss 1
        assert!(!HEALTH.fault_active());
        HEALTH.heartbeat(x, at(6));

        assert_eq!(dog.check(at(12)), 1); // miss 2 → fault
        assert!(HEALTH.fault_active());
        assert_eq!(
            FAULTS.try_recv(),
            Ok(SystemFault {
                task: x,
                kind: FaultKind::Unresponsive,
                at: at(12),
            })
        );
    }

    #[test]
    fn test_timely_heartbeats_keep_task_healthy() {
        static HEALTH: SystemHealth = SystemHealth::new();
        static FAULTS: FaultQueue = Queue::new();
        let dog = Watchdog::new(&HEALTH, &FAULTS, 2);
        let x = task(1);

        dog.monitor(x, Duration::from_secs(5), at(0)).unwrap();
        for s in [3, 6, 9, 12] {
            HEALTH.heartbeat(x, at(s));
            assert_eq!(dog.check(at(s + 1)), 0);
        }
        assert!(!HEALTH.fault_active());
        assert!(FAULTS.try_recv().is_err());
    }

    #[test]
    fn test_heartbeat_resets_miss_count() {
        static HEALTH: SystemHealth = SystemHealth::new();
        static FAULTS: FaultQueue = Queue::new();
        let dog = Watchdog::new(&HEALTH, &FAULTS, 2);
        let x = task(2);

        dog.monitor(x, Duration::from_secs(5), at(0)).unwrap();
        assert_eq!(dog.check(at(6)), 0); // miss 1

        // Recovery: a heartbeat inside the budget clears the streak,
        // so the next silent stretch starts over from miss 1.
        HEALTH.heartbeat(x, at(7));
        assert_eq!(dog.check(at(8)), 0);
        assert_eq!(dog.check(at(14)), 0); // miss 1 again, not 2
        assert!(!HEALTH.fault_active());
    }

    #[test]
    fn test_fault_emitted_once_per_detection() {
        static HEALTH: SystemHealth = SystemHealth::new();
        static FAULTS: FaultQueue = Queue::new();
        let dog = Watchdog::new(&HEALTH, &FAULTS, 1);
        let x = task(3);

        dog.monitor(x, Duration::from_secs(5), at(0)).unwrap();
        assert_eq!(dog.check(at(6)), 1);
        // Still silent: the task stays faulted but no duplicate event.
        assert_eq!(dog.check(at(12)), 0);
        assert_eq!(dog.check(at(18)), 0);

        assert!(FAULTS.try_recv().is_ok());
        assert!(FAULTS.try_recv().is_err());
    }

    #[test]
    fn test_fault_flag_latched_until_cleared() {
        static HEALTH: SystemHealth = SystemHealth::new();
        static FAULTS: FaultQueue = Queue::new();
        let dog = Watchdog::new(&HEALTH, &FAULTS, 1);
        let x = task(4);

        dog.monitor(x, Duration::from_secs(5), at(0)).unwrap();
        dog.check(at(6));
        assert!(HEALTH.fault_active());

        // The task comes back; the global flag stays latched until
        // remediation clears it.
        HEALTH.heartbeat(x, at(7));
        dog.check(at(8));
        assert!(HEALTH.fault_active());

        HEALTH.clear_fault();
        assert!(!HEALTH.fault_active());
    }

    #[test]
    fn test_monitor_capacity() {
        static HEALTH: SystemHealth = SystemHealth::new();
        static FAULTS: FaultQueue = Queue::new();
        let dog = Watchdog::new(&HEALTH, &FAULTS, 2);

        for i in 0..MAX_TASKS {
            dog.monitor(task(i as u8), Duration::from_secs(1), at(0))
                .unwrap();
        }
        assert_eq!(
            dog.monitor(task(99), Duration::from_secs(1), at(0)),
            Err(MonitorError::CapacityExceeded)
        );
    }
}
