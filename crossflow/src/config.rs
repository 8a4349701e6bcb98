// THEORY:
// `Config` is the single bag of tunables for the engine. It is built once at
// startup from defaults, an optional YAML file and environment overrides, then
// validated and never touched again. Components receive the sub-struct they care
// about by value or reference; nothing reads configuration through a global.
//
// Validation is deliberately strict. A controller that starts with
// `min_green_time > max_green_time` has no sensible per-tick behavior, so the
// process refuses to start instead.

use crate::core_modules::direction::Direction;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Longest green, yellow or all-red interval accepted, in seconds.
pub const MAX_PHASE_SECS: f64 = 3_600.0;

/// Longest smoothing window accepted, in ticks.
pub const MAX_HISTORY_SIZE: usize = 1_000;

/// Thresholds that decide which motion blobs count as vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Exclusive lower bound on blob area, in square pixels.
    pub min_area: f64,
    /// Exclusive upper bound on blob area, in square pixels.
    pub max_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// Number of raw counts the flow stabilizer averages over.
    pub history_size: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_area: 200.0,
            max_area: 15_000.0,
            min_aspect_ratio: 0.3,
            max_aspect_ratio: 4.0,
            history_size: 3,
        }
    }
}

/// Green-time bounds for the phase scheduler, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub min_green_time: f64,
    pub max_green_time: f64,
    pub base_green_time: f64,
    /// Carried for consumers; the scheduler hands GREEN straight to RED.
    pub yellow_time: f64,
    /// Carried for consumers; the scheduler hands GREEN straight to RED.
    pub all_red_time: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_green_time: 6.0,
            max_green_time: 15.0,
            base_green_time: 8.0,
            yellow_time: 3.0,
            all_red_time: 2.0,
        }
    }
}

impl TimingConfig {
    /// Bounds every interval to `0..=MAX_PHASE_SECS` and orders min/max green.
    /// Once this passes, converting any of them to a `Duration` cannot fail.
    pub fn validate(&self) -> ConfigResult<()> {
        phase_secs("timing.min_green_time", self.min_green_time)?;
        phase_secs("timing.max_green_time", self.max_green_time)?;
        phase_secs("timing.base_green_time", self.base_green_time)?;
        phase_secs("timing.yellow_time", self.yellow_time)?;
        phase_secs("timing.all_red_time", self.all_red_time)?;
        if self.min_green_time > self.max_green_time {
            return Err(ConfigError::GreenTimeOrder {
                min: self.min_green_time,
                max: self.max_green_time,
            });
        }
        Ok(())
    }

    pub fn min_green(&self) -> Duration {
        Duration::from_secs_f64(self.min_green_time)
    }
}

/// Parameters of the synthetic flow for approaches without a camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Approaches fed by a real sensor. Every other approach is synthesized.
    pub sensed_directions: Vec<Direction>,
    /// Seconds of green before synthetic traffic starts clearing.
    pub clearing_delay: f64,
    /// Seconds over which the clearing factor decays from 1.0 to its floor.
    pub clearing_window: f64,
    pub clearing_floor: f64,
    /// Seed for the jitter source. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sensed_directions: vec![Direction::West],
            clearing_delay: 8.0,
            clearing_window: 20.0,
            clearing_floor: 0.1,
            seed: None,
        }
    }
}

/// Cadence and queue sizes of the control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub tick_interval_ms: u64,
    /// Capacity of the phase-change event queue. Events beyond it are dropped.
    pub event_queue_capacity: usize,
    /// Capacity of the inbound sensor frame queue.
    pub frame_queue_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            event_queue_capacity: 64,
            frame_queue_capacity: 8,
        }
    }
}

impl ControlConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub timing: TimingConfig,
    pub simulation: SimulationConfig,
    pub control: ControlConfig,
}

impl Config {
    /// Loads a YAML file on top of the defaults, applies environment
    /// overrides and validates the result.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `KEY=value` overrides from `lookup`. Keys that are absent leave
    /// the current value alone.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let detection = &mut self.detection;
        override_value(&lookup, "MIN_VEHICLE_AREA", &mut detection.min_area)?;
        override_value(&lookup, "MAX_VEHICLE_AREA", &mut detection.max_area)?;
        override_value(&lookup, "MIN_ASPECT_RATIO", &mut detection.min_aspect_ratio)?;
        override_value(&lookup, "MAX_ASPECT_RATIO", &mut detection.max_aspect_ratio)?;
        override_value(&lookup, "DETECTION_HISTORY_SIZE", &mut detection.history_size)?;

        let timing = &mut self.timing;
        override_value(&lookup, "MIN_GREEN_TIME", &mut timing.min_green_time)?;
        override_value(&lookup, "MAX_GREEN_TIME", &mut timing.max_green_time)?;
        override_value(&lookup, "BASE_GREEN_TIME", &mut timing.base_green_time)?;
        override_value(&lookup, "YELLOW_TIME", &mut timing.yellow_time)?;
        override_value(&lookup, "ALL_RED_TIME", &mut timing.all_red_time)?;

        if let Some(raw) = lookup("SENSED_DIRECTIONS") {
            self.simulation.sensed_directions = parse_direction_list(&raw).ok_or_else(|| {
                ConfigError::InvalidOverride {
                    key: "SENSED_DIRECTIONS".to_string(),
                    value: raw.clone(),
                }
            })?;
        }
        if let Some(raw) = lookup("SIMULATION_SEED") {
            let seed = parse_raw("SIMULATION_SEED", &raw)?;
            self.simulation.seed = Some(seed);
        }

        override_value(&lookup, "TICK_INTERVAL_MS", &mut self.control.tick_interval_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let d = &self.detection;
        non_negative("detection.min_area", d.min_area)?;
        non_negative("detection.max_area", d.max_area)?;
        non_negative("detection.min_aspect_ratio", d.min_aspect_ratio)?;
        non_negative("detection.max_aspect_ratio", d.max_aspect_ratio)?;
        ordered("detection.area", d.min_area, d.max_area)?;
        ordered("detection.aspect_ratio", d.min_aspect_ratio, d.max_aspect_ratio)?;
        if d.history_size == 0 {
            return Err(ConfigError::Zero("detection.history_size"));
        }
        if d.history_size > MAX_HISTORY_SIZE {
            return Err(ConfigError::TooLarge {
                field: "detection.history_size",
                value: d.history_size as f64,
                limit: MAX_HISTORY_SIZE as f64,
            });
        }

        self.timing.validate()?;

        let s = &self.simulation;
        non_negative("simulation.clearing_delay", s.clearing_delay)?;
        non_negative("simulation.clearing_floor", s.clearing_floor)?;
        if !s.clearing_window.is_finite() || s.clearing_window <= 0.0 {
            return Err(ConfigError::NotPositive {
                field: "simulation.clearing_window",
                value: s.clearing_window,
            });
        }
        if s.clearing_floor > 1.0 {
            return Err(ConfigError::EmptyRange {
                field: "simulation.clearing_floor",
                lower: s.clearing_floor,
                upper: 1.0,
            });
        }

        let c = &self.control;
        if c.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("control.tick_interval_ms"));
        }
        if c.event_queue_capacity == 0 {
            return Err(ConfigError::Zero("control.event_queue_capacity"));
        }
        if c.frame_queue_capacity == 0 {
            return Err(ConfigError::Zero("control.frame_queue_capacity"));
        }
        Ok(())
    }
}

fn override_value<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> ConfigResult<()> {
    if let Some(raw) = lookup(key) {
        *slot = parse_raw(key, &raw)?;
    }
    Ok(())
}

fn parse_raw<T: FromStr>(key: &str, raw: &str) -> ConfigResult<T> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Parses "west" or "north, west" into a list of directions.
pub fn parse_direction_list(raw: &str) -> Option<Vec<Direction>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().ok())
        .collect()
}

fn non_negative(field: &'static str, value: f64) -> ConfigResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

fn phase_secs(field: &'static str, value: f64) -> ConfigResult<()> {
    non_negative(field, value)?;
    if value > MAX_PHASE_SECS {
        return Err(ConfigError::TooLarge {
            field,
            value,
            limit: MAX_PHASE_SECS,
        });
    }
    Ok(())
}

fn ordered(field: &'static str, lower: f64, upper: f64) -> ConfigResult<()> {
    if lower < upper {
        Ok(())
    } else {
        Err(ConfigError::EmptyRange { field, lower, upper })
    }
}
