// THEORY:
// `IntersectionState` is the one shared record of the system: what every approach
// is carrying, what every signal head shows, which phase is running and since
// when. The control tick is its only writer; dashboards, renderers and loggers
// are readers.
//
// Key architectural principles:
// 1.  **Single Writer, Many Readers**: `StateStore` is the writer handle and is not
//     `Clone`. Readers get a `StateReader`, which can only take snapshots.
// 2.  **Copy-On-Write Publishing**: The live state sits behind
//     `RwLock<Arc<IntersectionState>>`. A snapshot is an `Arc` clone taken under
//     a read lock, so it is immutable and never torn. The writer mutates through
//     `Arc::make_mut`, which only copies when a reader still holds the previous
//     snapshot.
// 3.  **Colors Follow the Phase**: Signal colors are private and change only
//     together with the phase, so the state can never show a color plan that the
//     active phase does not imply.

use crate::core_modules::direction::{Direction, PerDirection, Phase, SignalColor};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Queue length per stable vehicle. A proxy, not a measurement.
pub const QUEUE_LENGTH_FACTOR: f64 = 1.2;

/// Latest flow numbers for one approach.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FlowEstimate {
    pub raw_count: u32,
    pub stable_count: u32,
    pub queue_length_estimate: f64,
    pub last_update: Option<DateTime<Utc>>,
}

/// What the sensed approaches delivered on the most recent frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub received_at: Instant,
    pub timestamp: DateTime<Utc>,
    /// Vehicles accepted by the blob filter.
    pub vehicle_count: u32,
    /// Raw motion blobs handed in.
    pub detection_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionState {
    flows: PerDirection<FlowEstimate>,
    signals: PerDirection<SignalColor>,
    phase: Phase,
    phase_started_at: Instant,
    phase_started_wall: DateTime<Utc>,
    signal_changes: u64,
    total_vehicles: u64,
    tick_count: u64,
    processing_fps: f64,
    last_frame: Option<FrameSummary>,
}

impl IntersectionState {
    /// A fresh intersection: East/West green, every count zero.
    pub fn new(now: Instant, wall: DateTime<Utc>) -> Self {
        Self::with_phase(Phase::EastWestGreen, now, wall)
    }

    pub fn with_phase(phase: Phase, now: Instant, wall: DateTime<Utc>) -> Self {
        Self {
            flows: PerDirection::default(),
            signals: phase.signal_plan(),
            phase,
            phase_started_at: now,
            phase_started_wall: wall,
            signal_changes: 0,
            total_vehicles: 0,
            tick_count: 0,
            processing_fps: 0.0,
            last_frame: None,
        }
    }

    /// Overwrites one approach's flow and recomputes its queue estimate.
    pub fn update_flow(&mut self, direction: Direction, raw_count: u32, stable_count: u32, at: DateTime<Utc>) {
        self.flows[direction] = FlowEstimate {
            raw_count,
            stable_count,
            queue_length_estimate: f64::from(stable_count) * QUEUE_LENGTH_FACTOR,
            last_update: Some(at),
        };
    }

    /// Starts `phase` now. The only way signal colors change.
    pub(crate) fn begin_phase(&mut self, phase: Phase, now: Instant, wall: DateTime<Utc>) {
        self.phase = phase;
        self.signals = phase.signal_plan();
        self.phase_started_at = now;
        self.phase_started_wall = wall;
        self.signal_changes += 1;
    }

    pub(crate) fn record_frame(&mut self, frame: FrameSummary) {
        self.last_frame = Some(frame);
    }

    pub(crate) fn add_vehicles(&mut self, count: u32) {
        self.total_vehicles += u64::from(count);
    }

    pub(crate) fn record_tick(&mut self) {
        self.tick_count += 1;
    }

    pub(crate) fn set_processing_fps(&mut self, fps: f64) {
        self.processing_fps = fps;
    }

    pub fn flow(&self, direction: Direction) -> &FlowEstimate {
        &self.flows[direction]
    }

    pub fn flows(&self) -> &PerDirection<FlowEstimate> {
        &self.flows
    }

    pub fn signal(&self, direction: Direction) -> SignalColor {
        self.signals[direction]
    }

    pub fn signals(&self) -> &PerDirection<SignalColor> {
        &self.signals
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn phase_started_at(&self) -> Instant {
        self.phase_started_at
    }

    pub fn phase_started_wall(&self) -> DateTime<Utc> {
        self.phase_started_wall
    }

    pub fn phase_elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.phase_started_at)
    }

    pub fn signal_changes(&self) -> u64 {
        self.signal_changes
    }

    pub fn total_vehicles(&self) -> u64 {
        self.total_vehicles
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn processing_fps(&self) -> f64 {
        self.processing_fps
    }

    pub fn last_frame(&self) -> Option<&FrameSummary> {
        self.last_frame.as_ref()
    }

    /// Stable vehicles on the approaches the active phase serves.
    pub fn served_vehicles(&self) -> u32 {
        self.pair_total(self.phase.served())
    }

    /// Stable vehicles on the approaches held at red.
    pub fn waiting_vehicles(&self) -> u32 {
        self.pair_total(self.phase.held())
    }

    pub fn stable_counts(&self) -> PerDirection<u32> {
        self.flows.map(|_, flow| flow.stable_count)
    }

    fn pair_total(&self, pair: [Direction; 2]) -> u32 {
        pair.iter().map(|&d| self.flows[d].stable_count).sum()
    }

    /// Serializable view for status APIs and renderers.
    pub fn report(&self, now: Instant, wall: DateTime<Utc>) -> StatusReport {
        StatusReport {
            intersections: self.flows.map(|direction, flow| DirectionStatus {
                vehicles: flow.stable_count,
                raw_count: flow.raw_count,
                signal: self.signals[direction],
                queue_length: flow.queue_length_estimate,
                last_update: flow.last_update,
            }),
            current_phase: self.phase,
            phase_started: self.phase_started_wall,
            phase_duration: self.phase_elapsed(now).as_secs_f64(),
            signal_changes: self.signal_changes,
            total_vehicles: self.total_vehicles,
            tick_count: self.tick_count,
            processing_fps: self.processing_fps,
            latest_frame: self.last_frame.as_ref().map(|frame| FrameInfo {
                timestamp: frame.timestamp,
                vehicle_count: frame.vehicle_count,
                detection_count: frame.detection_count,
                age_secs: now.saturating_duration_since(frame.received_at).as_secs_f64(),
            }),
            timestamp: wall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionStatus {
    pub vehicles: u32,
    pub raw_count: u32,
    pub signal: SignalColor,
    pub queue_length: f64,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameInfo {
    pub timestamp: DateTime<Utc>,
    pub vehicle_count: u32,
    pub detection_count: u32,
    pub age_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub intersections: PerDirection<DirectionStatus>,
    pub current_phase: Phase,
    /// Wall-clock start of the current phase.
    pub phase_started: DateTime<Utc>,
    /// Seconds the current phase has been running.
    pub phase_duration: f64,
    pub signal_changes: u64,
    pub total_vehicles: u64,
    pub tick_count: u64,
    pub processing_fps: f64,
    pub latest_frame: Option<FrameInfo>,
    pub timestamp: DateTime<Utc>,
}

/// Writer handle of the shared intersection state.
pub struct StateStore {
    inner: Arc<RwLock<Arc<IntersectionState>>>,
}

impl StateStore {
    pub fn new(initial: IntersectionState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn reader(&self) -> StateReader {
        StateReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn snapshot(&self) -> Arc<IntersectionState> {
        Arc::clone(&self.inner.read())
    }

    /// Mutates the state and publishes the result atomically.
    pub fn update<R>(&mut self, f: impl FnOnce(&mut IntersectionState) -> R) -> R {
        let mut guard = self.inner.write();
        f(Arc::make_mut(&mut guard))
    }

    pub fn update_flow(&mut self, direction: Direction, raw_count: u32, stable_count: u32, at: DateTime<Utc>) {
        self.update(|state| state.update_flow(direction, raw_count, stable_count, at));
    }
}

/// Read-only handle; any number may exist.
#[derive(Clone)]
pub struct StateReader {
    inner: Arc<RwLock<Arc<IntersectionState>>>,
}

impl StateReader {
    pub fn snapshot(&self) -> Arc<IntersectionState> {
        Arc::clone(&self.inner.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (StateStore, Instant, DateTime<Utc>) {
        let now = Instant::now();
        let wall = Utc::now();
        (StateStore::new(IntersectionState::new(now, wall)), now, wall)
    }

    #[test]
    fn starts_east_west_green_with_two_greens() {
        let (store, _, _) = fresh();
        let state = store.snapshot();
        assert_eq!(state.phase(), Phase::EastWestGreen);
        assert_eq!(state.signal(Direction::East), SignalColor::Green);
        assert_eq!(state.signal(Direction::North), SignalColor::Red);
        assert_eq!(state.signal_changes(), 0);
    }

    #[test]
    fn update_flow_recomputes_queue_estimate() {
        let (mut store, _, wall) = fresh();
        store.update_flow(Direction::West, 7, 5, wall);
        let flow = store.snapshot().flow(Direction::West).clone();
        assert_eq!(flow.raw_count, 7);
        assert_eq!(flow.stable_count, 5);
        assert!((flow.queue_length_estimate - 6.0).abs() < 1e-9);
        assert_eq!(flow.last_update, Some(wall));
    }

    #[test]
    fn snapshots_without_writes_are_identical() {
        let (mut store, _, wall) = fresh();
        store.update_flow(Direction::North, 3, 3, wall);
        let reader = store.reader();
        let a = reader.snapshot();
        let b = reader.snapshot();
        assert_eq!(*a, *b);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn held_snapshot_is_not_affected_by_later_writes() {
        let (mut store, now, wall) = fresh();
        let before = store.reader().snapshot();
        store.update(|state| state.begin_phase(Phase::NorthSouthGreen, now, wall));
        let after = store.snapshot();
        assert_eq!(before.phase(), Phase::EastWestGreen);
        assert_eq!(after.phase(), Phase::NorthSouthGreen);
        assert_eq!(after.signal(Direction::North), SignalColor::Green);
        assert_eq!(after.signal(Direction::East), SignalColor::Red);
        assert_eq!(after.signal_changes(), 1);
        assert_eq!(after.phase_started_wall(), wall);
    }

    #[test]
    fn report_exposes_counts_and_phase_duration() {
        let (mut store, now, wall) = fresh();
        store.update_flow(Direction::South, 2, 2, wall);
        store.update(|state| state.add_vehicles(4));
        let report = store
            .snapshot()
            .report(now + Duration::from_millis(2500), wall);
        assert_eq!(report.intersections.south.vehicles, 2);
        assert_eq!(report.intersections.east.signal, SignalColor::Green);
        assert_eq!(report.phase_duration, 2.5);
        assert_eq!(report.phase_started, wall);
        assert_eq!(report.total_vehicles, 4);
        assert!(report.latest_frame.is_none());
    }
}
