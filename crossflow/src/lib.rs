// THEORY:
// This file is the main entry point for the `crossflow` library crate, the
// engine that estimates traffic flow on the four approaches of a signalized
// intersection and decides when the green moves between the East/West and
// North/South pairs.
//
// The high-level interface is `ControlPipeline` (one synchronous tick at a time)
// and `control_loop::spawn` (the same pipeline driven by a tokio interval, fed
// through a bounded frame queue). The components in `core_modules` stay public
// so tools can exercise them one by one, but a consumer normally only needs the
// re-exports below.

pub mod config;
pub mod control_loop;
pub mod core_modules;
pub mod error;
pub mod events;
pub mod pipeline;

pub use config::Config;
pub use control_loop::{ControlHandle, FrameSender, LoopSummary};
pub use core_modules::clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use core_modules::direction::{Direction, PerDirection, Phase, SignalColor};
pub use core_modules::intersection_state::{IntersectionState, StateReader, StatusReport};
pub use error::{ConfigError, ControlError};
pub use events::{ChannelEventSink, DroppedEvents, NullSink, PhaseChangeEvent, PhaseEventSink, TransitionTrigger};
pub use pipeline::{BoundingBox, ControlPipeline, RawBlob, SensorFrame, TickReport};
