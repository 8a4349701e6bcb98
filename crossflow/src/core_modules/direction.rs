// THEORY:
// The `direction` module holds the closed vocabulary of the intersection: the four
// approaches, the colors a signal head can show, and the two phases the controller
// alternates between.
//
// Key architectural principles:
// 1.  **Closed Enumerations**: Every value that used to travel around as a free-form
//     string is an enum here, so a misspelled approach or color cannot exist.
// 2.  **Phase Owns the Color Plan**: The only way to obtain a set of signal colors
//     is to ask a `Phase` for it. The mapping is a single exhaustive `match`, so
//     adding a phase without deciding its colors is a compile error.
// 3.  **Per-Direction Records**: `PerDirection<T>` is a fixed record with one slot
//     per approach. It replaces the string-keyed dictionaries of a looser design;
//     a missing approach is unrepresentable.

use crate::error::ParseDirectionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// One of the four approaches of the intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "North",
            Direction::South => "South",
            Direction::East => "East",
            Direction::West => "West",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Ok(Direction::North),
            "south" | "s" => Ok(Direction::South),
            "east" | "e" => Ok(Direction::East),
            "west" | "w" => Ok(Direction::West),
            _ => Err(ParseDirectionError(s.to_string())),
        }
    }
}

/// The color shown by a signal head.
///
/// `Yellow` exists so consumers can render a full signal head, but the phase
/// scheduler never produces it: phases hand off GREEN -> RED directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalColor {
    Red,
    Yellow,
    Green,
}

impl SignalColor {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalColor::Red => "RED",
            SignalColor::Yellow => "YELLOW",
            SignalColor::Green => "GREEN",
        }
    }
}

impl fmt::Display for SignalColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pair of approaches currently allowed to flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "East_West_Green")]
    EastWestGreen,
    #[serde(rename = "North_South_Green")]
    NorthSouthGreen,
}

impl Phase {
    /// The two approaches that are green while this phase is active.
    pub fn served(self) -> [Direction; 2] {
        match self {
            Phase::EastWestGreen => [Direction::East, Direction::West],
            Phase::NorthSouthGreen => [Direction::North, Direction::South],
        }
    }

    /// The two approaches held at red while this phase is active.
    pub fn held(self) -> [Direction; 2] {
        self.opposite().served()
    }

    pub fn opposite(self) -> Phase {
        match self {
            Phase::EastWestGreen => Phase::NorthSouthGreen,
            Phase::NorthSouthGreen => Phase::EastWestGreen,
        }
    }

    pub fn color_for(self, direction: Direction) -> SignalColor {
        match (self, direction) {
            (Phase::EastWestGreen, Direction::East | Direction::West) => SignalColor::Green,
            (Phase::EastWestGreen, Direction::North | Direction::South) => SignalColor::Red,
            (Phase::NorthSouthGreen, Direction::North | Direction::South) => SignalColor::Green,
            (Phase::NorthSouthGreen, Direction::East | Direction::West) => SignalColor::Red,
        }
    }

    /// The complete set of signal colors implied by this phase.
    pub fn signal_plan(self) -> PerDirection<SignalColor> {
        PerDirection::from_fn(|direction| self.color_for(direction))
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::EastWestGreen => "East_West_Green",
            Phase::NorthSouthGreen => "North_South_Green",
        }
    }

    /// Two-letter tag used in phase-change reasons ("EW", "NS").
    pub fn short_label(self) -> &'static str {
        match self {
            Phase::EastWestGreen => "EW",
            Phase::NorthSouthGreen => "NS",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A value for each of the four approaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerDirection<T> {
    #[serde(rename = "North")]
    pub north: T,
    #[serde(rename = "South")]
    pub south: T,
    #[serde(rename = "East")]
    pub east: T,
    #[serde(rename = "West")]
    pub west: T,
}

impl<T> PerDirection<T> {
    pub fn from_fn(mut f: impl FnMut(Direction) -> T) -> Self {
        Self {
            north: f(Direction::North),
            south: f(Direction::South),
            east: f(Direction::East),
            west: f(Direction::West),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, &T)> + '_ {
        Direction::ALL.into_iter().map(move |d| (d, &self[d]))
    }

    pub fn map<U>(&self, mut f: impl FnMut(Direction, &T) -> U) -> PerDirection<U> {
        PerDirection::from_fn(|d| f(d, &self[d]))
    }
}

impl<T> Index<Direction> for PerDirection<T> {
    type Output = T;

    fn index(&self, direction: Direction) -> &T {
        match direction {
            Direction::North => &self.north,
            Direction::South => &self.south,
            Direction::East => &self.east,
            Direction::West => &self.west,
        }
    }
}

impl<T> IndexMut<Direction> for PerDirection<T> {
    fn index_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::North => &mut self.north,
            Direction::South => &mut self.south,
            Direction::East => &mut self.east,
            Direction::West => &mut self.west,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_greens_exactly_its_served_pair() {
        for phase in [Phase::EastWestGreen, Phase::NorthSouthGreen] {
            let plan = phase.signal_plan();
            let greens: Vec<Direction> = plan
                .iter()
                .filter(|(_, c)| **c == SignalColor::Green)
                .map(|(d, _)| d)
                .collect();
            assert_eq!(greens, phase.served().to_vec());
            for held in phase.held() {
                assert_eq!(plan[held], SignalColor::Red);
            }
        }
    }

    #[test]
    fn opposite_is_an_involution() {
        assert_eq!(Phase::EastWestGreen.opposite().opposite(), Phase::EastWestGreen);
        assert_ne!(Phase::NorthSouthGreen.opposite(), Phase::NorthSouthGreen);
    }

    #[test]
    fn parses_direction_names_loosely() {
        assert_eq!("west".parse::<Direction>().unwrap(), Direction::West);
        assert_eq!(" N ".parse::<Direction>().unwrap(), Direction::North);
        assert!("up".parse::<Direction>().is_err());
    }

    #[test]
    fn per_direction_serializes_with_approach_names() {
        let counts = PerDirection::from_fn(|d| d as u32);
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["North"], 0);
        assert_eq!(json["West"], 3);
        assert_eq!(
            serde_json::to_value(Phase::NorthSouthGreen).unwrap(),
            "North_South_Green"
        );
        assert_eq!(serde_json::to_value(SignalColor::Green).unwrap(), "GREEN");
    }
}
