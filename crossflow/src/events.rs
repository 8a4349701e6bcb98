// THEORY:
// Every phase transition produces a `PhaseChangeEvent`. The engine does not know
// who listens (a database writer, a log shipper, a dashboard feed); it hands the
// event to a `PhaseEventSink` and moves on.
//
// Delivery is at-most-once and never blocks the control tick. The channel sink
// uses `try_send` on a bounded queue: when the consumer falls behind the event is
// dropped and a warning is logged, the tick itself is never delayed.

use crate::core_modules::direction::{PerDirection, Phase};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// Which rule ended the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransitionTrigger {
    /// Time in phase reached the computed optimal duration.
    OptimalDurationReached,
    /// Served approaches were empty, others were waiting, minimum green was over.
    EarlyRelease,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub from_phase: Phase,
    pub to_phase: Phase,
    /// Stable counts of every approach at the moment of the switch.
    pub counts: PerDirection<u32>,
    pub served_vehicles: u32,
    pub waiting_vehicles: u32,
    /// Seconds the outgoing phase ran.
    pub phase_duration: f64,
    pub trigger: TransitionTrigger,
    pub reason: String,
    /// Value of the cumulative counter after this change.
    pub signal_changes: u64,
}

/// Receiver of phase-change events. Must not block.
pub trait PhaseEventSink: Send {
    fn publish(&mut self, event: PhaseChangeEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PhaseEventSink for NullSink {
    fn publish(&mut self, _event: PhaseChangeEvent) {}
}

/// Collects events in memory. Handy for tests and offline runs.
impl PhaseEventSink for Vec<PhaseChangeEvent> {
    fn publish(&mut self, event: PhaseChangeEvent) {
        self.push(event);
    }
}

/// Count of events a `ChannelEventSink` lost. Stays readable after the sink
/// has been moved into the pipeline.
#[derive(Debug, Clone, Default)]
pub struct DroppedEvents(Arc<AtomicU64>);

impl DroppedEvents {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Bounded, non-blocking queue towards an async consumer.
pub struct ChannelEventSink {
    tx: mpsc::Sender<PhaseChangeEvent>,
    dropped: DroppedEvents,
}

impl ChannelEventSink {
    pub fn new(tx: mpsc::Sender<PhaseChangeEvent>) -> Self {
        Self {
            tx,
            dropped: DroppedEvents::default(),
        }
    }

    /// Creates a sink and the receiving half of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PhaseChangeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Events lost because the queue was full or closed.
    pub fn dropped(&self) -> DroppedEvents {
        self.dropped.clone()
    }
}

impl PhaseEventSink for ChannelEventSink {
    fn publish(&mut self, event: PhaseChangeEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.increment();
                warn!(
                    "Phase event queue full, dropping {} -> {} (dropped so far: {})",
                    event.from_phase, event.to_phase, dropped
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.increment();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: u64) -> PhaseChangeEvent {
        PhaseChangeEvent {
            timestamp: Utc::now(),
            from_phase: Phase::EastWestGreen,
            to_phase: Phase::NorthSouthGreen,
            counts: PerDirection::default(),
            served_vehicles: 0,
            waiting_vehicles: 3,
            phase_duration: 6.0,
            trigger: TransitionTrigger::EarlyRelease,
            reason: "EW: 0 vehicles, NS: 3 waiting".to_string(),
            signal_changes: n,
        }
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (sink, mut rx) = ChannelEventSink::channel(2);
        let dropped = sink.dropped();
        let mut sink: Box<dyn PhaseEventSink> = Box::new(sink);
        for n in 1..=4 {
            sink.publish(event(n));
        }
        assert_eq!(dropped.get(), 2);
        assert_eq!(rx.try_recv().unwrap().signal_changes, 1);
        assert_eq!(rx.try_recv().unwrap().signal_changes, 2);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_queue_counts_as_dropped() {
        let (mut sink, rx) = ChannelEventSink::channel(2);
        drop(rx);
        sink.publish(event(1));
        assert_eq!(sink.dropped().get(), 1);
    }

    #[test]
    fn event_serializes_phase_labels() {
        let json = serde_json::to_value(event(1)).unwrap();
        assert_eq!(json["from_phase"], "East_West_Green");
        assert_eq!(json["to_phase"], "North_South_Green");
        assert_eq!(json["trigger"], "EarlyRelease");
    }
}
