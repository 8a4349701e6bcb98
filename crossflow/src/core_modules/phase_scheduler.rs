// THEORY:
// The phase scheduler is the decision layer of the engine. Once per tick it
// looks at the smoothed counts in the intersection state and decides whether the
// running phase keeps its green or hands it to the opposing pair.
//
// The state machine has two states, `EastWestGreen` and `NorthSouthGreen`, and one
// transition (to the other state). The transition fires when either:
//   1. time in phase >= optimal duration, where
//      optimal = clamp(base_green + current, min_green, max_green), or
//   2. the served pair is empty, the held pair has vehicles, and at least
//      `min_green` has passed (early release).
//
// Consequences worth keeping in mind:
// - A busy pair cannot hold the green past `max_green`, so the other pair is
//   never starved.
// - Early release can never cut a green shorter than `min_green`.
// - A completely quiet intersection still cycles, every clamp(base, min, max).
//
// There is no yellow or all-red interval: the handoff goes straight from GREEN
// to RED. The scheduler performs no I/O and has no failure path once built:
// `TimingConfig::validate` bounds every interval it turns into a `Duration`.

use crate::config::TimingConfig;
use crate::core_modules::direction::Phase;
use crate::core_modules::intersection_state::IntersectionState;
use crate::error::ConfigResult;
use crate::events::{PhaseChangeEvent, TransitionTrigger};
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Outcome of evaluating the transition rule for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseDecision {
    Hold {
        optimal: Duration,
        elapsed: Duration,
    },
    Switch {
        to: Phase,
        trigger: TransitionTrigger,
        served: u32,
        waiting: u32,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct PhaseScheduler {
    timing: TimingConfig,
}

impl PhaseScheduler {
    /// Rejects timing that cannot be scheduled.
    pub fn new(timing: TimingConfig) -> ConfigResult<Self> {
        timing.validate()?;
        Ok(Self { timing })
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Green time the active pair has earned with `current` vehicles.
    pub fn optimal_duration(&self, current: u32) -> Duration {
        let wanted = self.timing.base_green_time + f64::from(current);
        let secs = wanted
            .min(self.timing.max_green_time)
            .max(self.timing.min_green_time);
        Duration::from_secs_f64(secs)
    }

    pub fn evaluate(&self, state: &IntersectionState, now: Instant) -> PhaseDecision {
        let served = state.served_vehicles();
        let waiting = state.waiting_vehicles();
        let elapsed = state.phase_elapsed(now);
        let optimal = self.optimal_duration(served);

        let trigger = if elapsed >= optimal {
            Some(TransitionTrigger::OptimalDurationReached)
        } else if served == 0 && waiting > 0 && elapsed >= self.timing.min_green() {
            Some(TransitionTrigger::EarlyRelease)
        } else {
            None
        };

        match trigger {
            Some(trigger) => PhaseDecision::Switch {
                to: state.phase().opposite(),
                trigger,
                served,
                waiting,
                elapsed,
            },
            None => PhaseDecision::Hold { optimal, elapsed },
        }
    }

    /// Evaluates the rule and, if it fires, switches the phase in `state`.
    /// Runs under the state-store write lock, so it only builds the event;
    /// logging is left to the caller.
    pub fn step(
        &self,
        state: &mut IntersectionState,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Option<PhaseChangeEvent> {
        let PhaseDecision::Switch {
            to,
            trigger,
            served,
            waiting,
            elapsed,
        } = self.evaluate(state, now)
        else {
            return None;
        };

        let from = state.phase();
        let reason = format!(
            "{}: {} vehicles, {}: {} waiting",
            from.short_label(),
            served,
            to.short_label(),
            waiting
        );
        let counts = state.stable_counts();
        state.begin_phase(to, now, wall);

        Some(PhaseChangeEvent {
            timestamp: wall,
            from_phase: from,
            to_phase: to,
            counts,
            served_vehicles: served,
            waiting_vehicles: waiting,
            phase_duration: elapsed.as_secs_f64(),
            trigger,
            reason,
            signal_changes: state.signal_changes(),
        })
    }
}
