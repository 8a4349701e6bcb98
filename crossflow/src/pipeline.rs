// THEORY:
// The `pipeline` module is the top-level, synchronous API of the engine. It wires
// the five components into the per-tick sequence and owns all of their state:
//
//   Stage 1: Blob Filter      - sensor frames -> vehicle observations (sensed approaches)
//   Stage 2: Flow Stabilizer  - raw counts -> stable counts
//   Stage 3: Synthetic Flow   - raw counts for unsensed approaches, smoothed the same way
//   Stage 4: State Store      - publish every FlowEstimate
//   Stage 5: Phase Scheduler  - hold or hand off, inside the same publish
//
// Stages 4 and 5 run under one write of the state store, so readers never see
// fresh counts next to a stale phase decision.
//
// A tick with no frame for a sensed approach is an ordinary tick with zero
// observations for it. Nothing in `tick` can fail; the only error path is
// building the pipeline from an invalid `Config`.

use crate::config::Config;
use crate::core_modules::blob_filter::blob_filter;
use crate::core_modules::clock::Clock;
use crate::core_modules::direction::Direction;
use crate::core_modules::flow_stabilizer::FlowStabilizer;
use crate::core_modules::intersection_state::{
    FrameSummary, IntersectionState, StateReader, StateStore,
};
use crate::core_modules::phase_scheduler::PhaseScheduler;
use crate::core_modules::synthetic_flow::{SyntheticFlowGenerator, SyntheticReading};
use crate::error::ConfigResult;
use crate::events::{PhaseChangeEvent, PhaseEventSink};
use rand::Rng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tracing::{debug, info};

// Re-export the types a caller needs to drive the pipeline.
pub use crate::core_modules::blob_filter::{BoundingBox, RawBlob, VehicleObservation};

/// Motion blobs seen by the camera on one approach during one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorFrame {
    pub direction: Direction,
    pub blobs: Vec<RawBlob>,
}

impl SensorFrame {
    pub fn new(direction: Direction, blobs: Vec<RawBlob>) -> Self {
        Self { direction, blobs }
    }
}

/// What one sensed approach contributed to a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SensedReading {
    pub direction: Direction,
    /// False when no frame arrived for this approach this tick.
    pub had_frame: bool,
    pub detection_count: u32,
    pub observations: Vec<VehicleObservation>,
    pub raw_count: u32,
    pub stable_count: u32,
}

/// Everything that happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub sensed: Vec<SensedReading>,
    pub synthetic: Vec<SyntheticReading>,
    pub phase_change: Option<PhaseChangeEvent>,
}

pub struct ControlPipeline<R = StdRng> {
    config: Config,
    sensed: Vec<Direction>,
    stabilizer: FlowStabilizer,
    generator: SyntheticFlowGenerator<R>,
    scheduler: PhaseScheduler,
    store: StateStore,
    clock: Arc<dyn Clock>,
    sink: Box<dyn PhaseEventSink>,
}

impl ControlPipeline<StdRng> {
    /// Validates `config` and builds a pipeline whose jitter source is seeded
    /// from `config.simulation.seed` (or entropy).
    pub fn new(config: Config, clock: Arc<dyn Clock>, sink: Box<dyn PhaseEventSink>) -> ConfigResult<Self> {
        config.validate()?;
        let generator = SyntheticFlowGenerator::from_config(&config.simulation, clock.now());
        Self::assemble(config, clock, sink, generator)
    }
}

impl<R: Rng> ControlPipeline<R> {
    /// Like `new`, with an explicit jitter source.
    pub fn with_rng(
        config: Config,
        clock: Arc<dyn Clock>,
        sink: Box<dyn PhaseEventSink>,
        rng: R,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let generator = SyntheticFlowGenerator::with_rng(&config.simulation, clock.now(), rng);
        Self::assemble(config, clock, sink, generator)
    }

    fn assemble(
        config: Config,
        clock: Arc<dyn Clock>,
        sink: Box<dyn PhaseEventSink>,
        generator: SyntheticFlowGenerator<R>,
    ) -> ConfigResult<Self> {
        let scheduler = PhaseScheduler::new(config.timing.clone())?;
        let mut sensed: Vec<Direction> = Vec::new();
        for direction in &config.simulation.sensed_directions {
            if !sensed.contains(direction) {
                sensed.push(*direction);
            }
        }
        let store = StateStore::new(IntersectionState::new(clock.now(), clock.wall_time()));
        info!(
            "Control pipeline ready: sensed={:?}, synthetic={:?}, green {}..{}s (base {}s)",
            sensed,
            generator.directions(),
            config.timing.min_green_time,
            config.timing.max_green_time,
            config.timing.base_green_time
        );
        Ok(Self {
            stabilizer: FlowStabilizer::new(config.detection.history_size),
            config,
            sensed,
            generator,
            scheduler,
            store,
            clock,
            sink,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sensed_directions(&self) -> &[Direction] {
        &self.sensed
    }

    pub fn synthetic_directions(&self) -> &[Direction] {
        self.generator.directions()
    }

    pub fn reader(&self) -> StateReader {
        self.store.reader()
    }

    pub fn snapshot(&self) -> Arc<IntersectionState> {
        self.store.snapshot()
    }

    /// Clears the smoothing history of an approach, e.g. after its camera
    /// reconnected.
    pub fn reset_sensor(&mut self, direction: Direction) {
        self.stabilizer.reset(direction);
        info!("Sensor history reset for {}", direction);
    }

    pub fn set_processing_fps(&mut self, fps: f64) {
        self.store.update(|state| state.set_processing_fps(fps));
    }

    /// Runs one control tick over the frames that arrived since the last one.
    /// When several frames exist for one approach, the last one wins.
    pub fn tick(&mut self, frames: &[SensorFrame]) -> TickReport {
        let now = self.clock.now();
        let wall = self.clock.wall_time();

        // --- Stages 1 & 2: sensed approaches ---
        let mut sensed = Vec::with_capacity(self.sensed.len());
        for &direction in &self.sensed {
            let frame = frames.iter().rev().find(|f| f.direction == direction);
            let blobs = frame.map(|f| f.blobs.as_slice()).unwrap_or_default();
            let observations = blob_filter::filter_vehicles(blobs, &self.config.detection);
            let raw_count = observations.len() as u32;
            let stable_count = self.stabilizer.observe(direction, raw_count);
            sensed.push(SensedReading {
                direction,
                had_frame: frame.is_some(),
                detection_count: blobs.len() as u32,
                observations,
                raw_count,
                stable_count,
            });
        }

        // --- Stage 3: synthetic approaches, against the last published state ---
        let synthetic = {
            let current = self.store.snapshot();
            self.generator.generate(&mut self.stabilizer, &current, now)
        };

        // --- Stages 4 & 5: publish and schedule in one write ---
        let scheduler = &self.scheduler;
        let phase_change = self.store.update(|state| {
            for reading in &sensed {
                state.update_flow(reading.direction, reading.raw_count, reading.stable_count, wall);
            }
            for reading in &synthetic {
                state.update_flow(reading.direction, reading.raw_count, reading.stable_count, wall);
            }
            if sensed.iter().any(|r| r.had_frame) {
                state.record_frame(FrameSummary {
                    received_at: now,
                    timestamp: wall,
                    vehicle_count: sensed.iter().map(|r| r.raw_count).sum(),
                    detection_count: sensed.iter().map(|r| r.detection_count).sum(),
                });
            }
            state.add_vehicles(sensed.iter().map(|r| r.stable_count).sum());
            state.record_tick();
            scheduler.step(state, now, wall)
        });

        if let Some(event) = &phase_change {
            info!(
                "Phase change: {} -> {} ({})",
                event.from_phase, event.to_phase, event.reason
            );
            self.sink.publish(event.clone());
        }

        debug!(
            "tick: sensed={:?} synthetic={:?} switched={}",
            sensed
                .iter()
                .map(|r| (r.direction, r.stable_count))
                .collect::<Vec<_>>(),
            synthetic
                .iter()
                .map(|r| (r.direction, r.stable_count))
                .collect::<Vec<_>>(),
            phase_change.is_some()
        );

        TickReport {
            sensed,
            synthetic,
            phase_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::clock::ManualClock;
    use crate::core_modules::direction::{Phase, SignalColor};
    use crate::events::NullSink;

    fn pipeline(clock: Arc<ManualClock>) -> ControlPipeline<StdRng> {
        let mut config = Config::default();
        config.simulation.seed = Some(17);
        ControlPipeline::new(config, clock, Box::new(NullSink)).unwrap()
    }

    fn car() -> RawBlob {
        RawBlob::new(BoundingBox::new(0, 0, 40, 40), 500.0)
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = Config::default();
        config.timing.min_green_time = 30.0;
        let clock = Arc::new(ManualClock::new());
        assert!(ControlPipeline::new(config, clock, Box::new(NullSink)).is_err());
    }

    #[test]
    fn out_of_range_config_never_reaches_a_tick() {
        let clock = Arc::new(ManualClock::new());

        let mut config = Config::default();
        config.timing.min_green_time = 1e20;
        config.timing.max_green_time = 1e20;
        config.timing.base_green_time = 1e20;
        assert!(ControlPipeline::new(config, clock.clone(), Box::new(NullSink)).is_err());

        let mut config = Config::default();
        config.detection.history_size = usize::MAX;
        assert!(ControlPipeline::new(config, clock.clone(), Box::new(NullSink)).is_err());

        // the largest accepted values tick without trouble
        let mut config = Config::default();
        config.timing.max_green_time = crate::config::MAX_PHASE_SECS;
        config.timing.base_green_time = crate::config::MAX_PHASE_SECS;
        config.detection.history_size = crate::config::MAX_HISTORY_SIZE;
        config.simulation.seed = Some(1);
        let mut p = ControlPipeline::new(config, clock.clone(), Box::new(NullSink)).unwrap();
        clock.advance_secs(0.05);
        assert!(p.tick(&[SensorFrame::new(Direction::West, vec![car()])]).phase_change.is_none());
    }

    #[test]
    fn sensed_frame_is_filtered_and_smoothed() {
        let clock = Arc::new(ManualClock::new());
        let mut p = pipeline(clock.clone());
        let frame = SensorFrame::new(Direction::West, vec![car(), car(), car()]);
        let report = p.tick(&[frame]);
        assert_eq!(report.sensed.len(), 1);
        assert_eq!(report.sensed[0].raw_count, 3);
        assert_eq!(report.sensed[0].stable_count, 3);
        assert_eq!(report.synthetic.len(), 3);

        clock.advance_secs(0.05);
        let report = p.tick(&[]);
        assert!(!report.sensed[0].had_frame);
        assert_eq!(report.sensed[0].raw_count, 0);
        assert_eq!(report.sensed[0].stable_count, 1);

        let state = p.snapshot();
        assert_eq!(state.flow(Direction::West).stable_count, 1);
        assert_eq!(state.total_vehicles(), 4);
        assert_eq!(state.tick_count(), 2);
        assert_eq!(state.last_frame().map(|f| f.vehicle_count), Some(3));
    }

    #[test]
    fn latest_frame_per_direction_wins() {
        let clock = Arc::new(ManualClock::new());
        let mut p = pipeline(clock);
        let report = p.tick(&[
            SensorFrame::new(Direction::West, vec![car(), car()]),
            SensorFrame::new(Direction::West, vec![car()]),
        ]);
        assert_eq!(report.sensed[0].raw_count, 1);
    }

    #[test]
    fn frames_for_unsensed_directions_are_ignored() {
        let clock = Arc::new(ManualClock::new());
        let mut p = pipeline(clock);
        let report = p.tick(&[SensorFrame::new(Direction::North, vec![car(); 9])]);
        assert_eq!(report.sensed[0].direction, Direction::West);
        assert_eq!(report.sensed[0].raw_count, 0);
        assert!(p.snapshot().last_frame().is_none());
    }

    #[test]
    fn reset_sensor_forgets_history() {
        let clock = Arc::new(ManualClock::new());
        let mut p = pipeline(clock);
        p.tick(&[SensorFrame::new(Direction::West, vec![car(); 6])]);
        p.reset_sensor(Direction::West);
        let report = p.tick(&[SensorFrame::new(Direction::West, vec![car()])]);
        assert_eq!(report.sensed[0].stable_count, 1);
    }

    #[test]
    fn phase_changes_reach_the_sink() {
        let clock = Arc::new(ManualClock::new());
        let mut config = Config::default();
        config.simulation.seed = Some(2);
        let (sink, mut rx) = crate::events::ChannelEventSink::channel(8);
        let mut p = ControlPipeline::new(config, clock.clone(), Box::new(sink)).unwrap();

        let mut switches = 0;
        for _ in 0..400 {
            clock.advance_secs(0.05);
            if p.tick(&[]).phase_change.is_some() {
                switches += 1;
            }
            let state = p.snapshot();
            let greens = state
                .signals()
                .iter()
                .filter(|(_, c)| **c == SignalColor::Green)
                .count();
            assert_eq!(greens, 2);
        }
        // 20 simulated seconds cannot hold one phase past max green
        assert!(switches >= 1);
        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            received += 1;
            assert_ne!(event.from_phase, event.to_phase);
        }
        assert_eq!(received, switches);
        assert_eq!(p.snapshot().signal_changes(), switches as u64);
        assert!(matches!(
            p.snapshot().phase(),
            Phase::EastWestGreen | Phase::NorthSouthGreen
        ));
    }
}
