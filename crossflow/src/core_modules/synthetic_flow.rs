// THEORY:
// Only some approaches have a camera. The synthetic flow generator fills in the
// rest with traffic that looks plausible on a dashboard and gives the scheduler
// something to react to. It is a simulation, not a traffic model.
//
// Each synthetic approach follows its own slow sinusoid, plus a jitter of -1, 0
// or +1 vehicles. While an approach is green and the phase has been running for
// longer than `clearing_delay`, its count is scaled by a clearing factor that
// decays linearly from 1.0 to `clearing_floor` over `clearing_window` seconds,
// so green approaches visibly drain.
//
// The jitter source is a type parameter. Production seeds `StdRng` from the
// configured seed or from entropy; tests pass a seeded generator and get
// repeatable counts.
//
// Generated counts go through the same `FlowStabilizer` as sensed counts before
// the scheduler reads them.

use crate::config::SimulationConfig;
use crate::core_modules::direction::{Direction, PerDirection, SignalColor};
use crate::core_modules::flow_stabilizer::FlowStabilizer;
use crate::core_modules::intersection_state::IntersectionState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// A direction's traffic rhythm: `mean + amplitude * sin(rate * t + offset)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowProfile {
    pub mean: f64,
    pub amplitude: f64,
    /// Radians per second.
    pub angular_rate: f64,
    pub phase_offset: f64,
}

impl FlowProfile {
    pub const fn new(mean: f64, amplitude: f64, angular_rate: f64, phase_offset: f64) -> Self {
        Self {
            mean,
            amplitude,
            angular_rate,
            phase_offset,
        }
    }

    pub fn value_at(&self, t_secs: f64) -> f64 {
        self.mean + self.amplitude * (self.angular_rate * t_secs + self.phase_offset).sin()
    }

    /// Largest count this profile can produce, jitter included.
    pub fn ceiling(&self) -> u32 {
        (self.mean + self.amplitude.abs() + 1.0).max(0.0).floor() as u32
    }

    pub fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::North => FlowProfile::new(2.0, 3.0, 0.2, 0.0),
            Direction::South => FlowProfile::new(3.0, 2.0, 0.2, 1.0),
            Direction::East => FlowProfile::new(4.0, 1.0, 0.15, 0.0),
            Direction::West => FlowProfile::new(3.0, 2.0, 0.18, 2.0),
        }
    }
}

/// One generated count, after smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticReading {
    pub direction: Direction,
    pub raw_count: u32,
    pub stable_count: u32,
}

pub struct SyntheticFlowGenerator<R = StdRng> {
    profiles: PerDirection<FlowProfile>,
    directions: Vec<Direction>,
    config: SimulationConfig,
    origin: Instant,
    rng: R,
}

impl SyntheticFlowGenerator<StdRng> {
    /// Synthesizes every direction not listed in `config.sensed_directions`.
    pub fn from_config(config: &SimulationConfig, origin: Instant) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, origin, rng)
    }
}

impl<R: Rng> SyntheticFlowGenerator<R> {
    pub fn with_rng(config: &SimulationConfig, origin: Instant, rng: R) -> Self {
        let directions = Direction::ALL
            .into_iter()
            .filter(|d| !config.sensed_directions.contains(d))
            .collect();
        Self {
            profiles: PerDirection::from_fn(FlowProfile::for_direction),
            directions,
            config: config.clone(),
            origin,
            rng,
        }
    }

    pub fn set_profile(&mut self, direction: Direction, profile: FlowProfile) {
        self.profiles[direction] = profile;
    }

    pub fn profile(&self, direction: Direction) -> FlowProfile {
        self.profiles[direction]
    }

    /// Directions this generator is responsible for.
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Clearing multiplier for an approach that has been green for `green_secs`.
    pub fn clearing_factor(&self, green_secs: f64) -> f64 {
        clearing_factor(green_secs, &self.config)
    }

    /// Draws this tick's raw count for one direction.
    pub fn raw_count(&mut self, direction: Direction, state: &IntersectionState, now: Instant) -> u32 {
        let t = now.saturating_duration_since(self.origin).as_secs_f64();
        let jitter: i32 = self.rng.gen_range(-1..=1);
        let base = (self.profiles[direction].value_at(t) + f64::from(jitter))
            .floor()
            .max(0.0);

        if state.signal(direction) != SignalColor::Green {
            return base as u32;
        }
        let green_secs = state.phase_elapsed(now).as_secs_f64();
        (base * self.clearing_factor(green_secs)).floor() as u32
    }

    /// Generates a raw count for every synthetic direction and feeds it to
    /// the stabilizer. Returns the raw and smoothed counts.
    pub fn generate(
        &mut self,
        stabilizer: &mut FlowStabilizer,
        state: &IntersectionState,
        now: Instant,
    ) -> Vec<SyntheticReading> {
        let directions = self.directions.clone();
        directions
            .into_iter()
            .map(|direction| {
                let raw_count = self.raw_count(direction, state, now);
                let stable_count = stabilizer.observe(direction, raw_count);
                SyntheticReading {
                    direction,
                    raw_count,
                    stable_count,
                }
            })
            .collect()
    }
}

/// 1.0 until `clearing_delay`, then linear decay to `clearing_floor` over
/// `clearing_window` seconds.
pub fn clearing_factor(green_secs: f64, config: &SimulationConfig) -> f64 {
    if green_secs <= config.clearing_delay {
        return 1.0;
    }
    let decay = (green_secs - config.clearing_delay) / config.clearing_window;
    (1.0 - decay).max(config.clearing_floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::direction::Phase;
    use chrono::Utc;
    use std::time::Duration;

    fn seeded(seed: u64, origin: Instant) -> SyntheticFlowGenerator<StdRng> {
        let config = SimulationConfig {
            seed: Some(seed),
            ..SimulationConfig::default()
        };
        SyntheticFlowGenerator::from_config(&config, origin)
    }

    #[test]
    fn sensed_directions_are_not_synthesized() {
        let generator = seeded(1, Instant::now());
        assert_eq!(
            generator.directions(),
            &[Direction::North, Direction::South, Direction::East]
        );
    }

    #[test]
    fn clearing_factor_decays_linearly_to_floor() {
        let config = SimulationConfig::default();
        assert_eq!(clearing_factor(5.0, &config), 1.0);
        assert_eq!(clearing_factor(8.0, &config), 1.0);
        assert!((clearing_factor(18.0, &config) - 0.5).abs() < 1e-9);
        assert!((clearing_factor(27.0, &config) - 0.1).abs() < 1e-9);
        assert_eq!(clearing_factor(120.0, &config), 0.1);
    }

    #[test]
    fn same_seed_same_counts() {
        let origin = Instant::now();
        let state = IntersectionState::new(origin, Utc::now());
        let mut a = seeded(7, origin);
        let mut b = seeded(7, origin);
        for step in 0..50 {
            let now = origin + Duration::from_millis(step * 250);
            for direction in [Direction::North, Direction::South, Direction::East] {
                assert_eq!(
                    a.raw_count(direction, &state, now),
                    b.raw_count(direction, &state, now)
                );
            }
        }
    }

    #[test]
    fn counts_stay_within_profile_bounds() {
        let origin = Instant::now();
        let state = IntersectionState::new(origin, Utc::now());
        let mut generator = seeded(3, origin);
        for step in 0..400 {
            let now = origin + Duration::from_millis(step * 100);
            for direction in [Direction::North, Direction::South, Direction::East] {
                let count = generator.raw_count(direction, &state, now);
                assert!(count <= generator.profile(direction).ceiling());
            }
        }
    }

    #[test]
    fn long_green_drains_synthetic_traffic() {
        let origin = Instant::now();
        // North/South green since origin
        let state = IntersectionState::with_phase(Phase::NorthSouthGreen, origin, Utc::now());
        let mut generator = seeded(11, origin);
        generator.set_profile(Direction::South, FlowProfile::new(20.0, 0.0, 0.0, 0.0));

        let early = generator.raw_count(Direction::South, &state, origin + Duration::from_secs(2));
        assert!((19..=21).contains(&early));

        let late = generator.raw_count(Direction::South, &state, origin + Duration::from_secs(60));
        // floor 0.1 of at most 21
        assert!(late <= 2);
    }

    #[test]
    fn red_approaches_do_not_clear() {
        let origin = Instant::now();
        let state = IntersectionState::with_phase(Phase::EastWestGreen, origin, Utc::now());
        let mut generator = seeded(5, origin);
        generator.set_profile(Direction::North, FlowProfile::new(10.0, 0.0, 0.0, 0.0));
        let count = generator.raw_count(Direction::North, &state, origin + Duration::from_secs(60));
        assert!((9..=11).contains(&count));
    }

    #[test]
    fn generate_feeds_the_stabilizer() {
        let origin = Instant::now();
        let state = IntersectionState::new(origin, Utc::now());
        let mut generator = seeded(9, origin);
        let mut stabilizer = FlowStabilizer::new(3);
        let readings = generator.generate(&mut stabilizer, &state, origin);
        assert_eq!(readings.len(), 3);
        for reading in readings {
            assert_eq!(stabilizer.window(reading.direction).len(), 1);
            assert_eq!(reading.stable_count, reading.raw_count);
        }
        assert!(stabilizer.window(Direction::West).is_empty());
    }
}
