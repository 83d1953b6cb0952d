//! Audit emission boundary.
//!
//! The allocation engine never writes audit output itself. It records events
//! into a bounded in-memory [`BufferedEmitter`] during a tick; the host drains
//! that buffer into any [`AuditEmitter`] sink once the tick has returned.
//! Emission is fire-and-forget: sinks report failures through logging only.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Correlation metrics moved past the emission threshold.
pub const SYS_CORRELATION_UPDATE: &str = "sys.correlation_update";
/// The particle cloud was redrawn from its prior.
pub const SYS_RESAMPLING: &str = "sys.resampling";
/// The correlation matrix needed raised shrinkage or the identity fallback.
pub const SYS_NUMERICAL_FALLBACK: &str = "sys.numerical_fallback";
/// A sized book tripped a risk limit.
pub const RISK_LIMIT_BREACH: &str = "risk.limit_breach";

/// Collaborator interface for audit sinks.
pub trait AuditEmitter {
    fn emit(&mut self, event_type: &str, payload: Value);
}

/// One buffered, not yet delivered event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub event_type: String,
    pub payload: Value,
}

/// Bounded FIFO of pending events. When full, the oldest event is dropped
/// and counted so emission never blocks or grows without bound.
#[derive(Clone, Debug)]
pub struct BufferedEmitter {
    queue: VecDeque<PendingEvent>,
    capacity: usize,
    dropped: u64,
}

impl BufferedEmitter {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events dropped to overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingEvent> {
        self.queue.iter()
    }

    pub fn drain(&mut self) -> Vec<PendingEvent> {
        self.queue.drain(..).collect()
    }

    /// Delivers every pending event to `sink` in FIFO order; returns the count.
    pub fn flush_into(&mut self, sink: &mut dyn AuditEmitter) -> usize {
        let mut n = 0;
        while let Some(ev) = self.queue.pop_front() {
            sink.emit(&ev.event_type, ev.payload);
            n += 1;
        }
        n
    }
}

impl AuditEmitter for BufferedEmitter {
    fn emit(&mut self, event_type: &str, payload: Value) {
        if self.queue.len() >= self.capacity {
            if let Some(old) = self.queue.pop_front() {
                self.dropped += 1;
                warn!(
                    dropped_event = %old.event_type,
                    capacity = self.capacity,
                    "audit buffer full; dropping oldest event"
                );
            }
        }
        self.queue.push_back(PendingEvent {
            event_type: event_type.to_string(),
            payload,
        });
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEmitter;

impl AuditEmitter for NullEmitter {
    fn emit(&mut self, _event_type: &str, _payload: Value) {}
}

impl AuditEmitter for Vec<PendingEvent> {
    fn emit(&mut self, event_type: &str, payload: Value) {
        self.push(PendingEvent {
            event_type: event_type.to_string(),
            payload,
        });
    }
}
