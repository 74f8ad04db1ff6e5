//! # Events
//!
//! The typed, timestamped notification record that flows through
//! queues into the FSM engine. The kind drives transition lookup; the
//! payload is an opaque bounded-size value for the consumer; the
//! timestamp is stamped by the producer from the kernel clock.
//!
//! There is no multicast: a producer that wants several consumers to
//! see an event enqueues a copy into each interested queue.

use crate::time::Instant;

/// A single event occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Event<K, P = ()> {
    /// Discriminant the FSM transition table is keyed on.
    pub kind: K,
    /// Bounded-size value carried alongside the kind.
    pub payload: P,
    /// When the event was produced.
    pub at: Instant,
}

impl<K, P> Event<K, P> {
    /// An event carrying a payload.
    pub const fn new(kind: K, payload: P, at: Instant) -> Self {
        Self { kind, payload, at }
    }
}

impl<K> Event<K, ()> {
    /// A payload-free event.
    pub const fn signal(kind: K, at: Instant) -> Self {
        Self {
            kind,
            payload: (),
            at,
        }
    }
}
