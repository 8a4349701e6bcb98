// THEORY:
// The control loop drives a `ControlPipeline` in real time. It owns the pipeline
// inside one tokio task, so the state store keeps exactly one writer, and talks
// to the outside world through channels only:
//
//   - Frames (and sensor resets) arrive through a bounded mpsc queue. Producers
//     that outrun the loop see the queue fill up; `try_submit` then drops the
//     frame instead of waiting.
//   - Every tick drains whatever is queued, keeps the newest frame per approach,
//     and runs one pipeline tick. An approach with no queued frame counts as
//     zero vehicles for that tick.
//   - State leaves the loop only through `StateReader` snapshots, and phase
//     changes only through the pipeline's event sink.
//   - Shutdown is a `watch` flag. Dropping the handle has the same effect.

use crate::core_modules::direction::Direction;
use crate::core_modules::intersection_state::StateReader;
use crate::error::ControlError;
use crate::pipeline::{ControlPipeline, SensorFrame};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Weight of the newest sample in the processing rate average.
const FPS_SMOOTHING: f64 = 0.1;

enum LoopInput {
    Frame(SensorFrame),
    ResetSensor(Direction),
}

/// Counters returned when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub ticks: u64,
    pub phase_changes: u64,
    pub frames_received: u64,
    /// Frames replaced by a newer frame for the same approach before a tick used them.
    pub frames_superseded: u64,
}

/// Cloneable producer side of the frame queue.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<LoopInput>,
}

impl FrameSender {
    /// Waits for queue space.
    pub async fn submit(&self, frame: SensorFrame) -> Result<(), ControlError> {
        self.tx
            .send(LoopInput::Frame(frame))
            .await
            .map_err(|_| ControlError::FramesClosed)
    }

    /// Never waits. Returns `Ok(false)` when the queue is full and the frame was dropped.
    pub fn try_submit(&self, frame: SensorFrame) -> Result<bool, ControlError> {
        match self.tx.try_send(LoopInput::Frame(frame)) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ControlError::FramesClosed),
        }
    }
}

pub struct ControlHandle {
    frames: FrameSender,
    reader: StateReader,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<LoopSummary>,
}

impl ControlHandle {
    pub fn frames(&self) -> FrameSender {
        self.frames.clone()
    }

    pub fn reader(&self) -> StateReader {
        self.reader.clone()
    }

    /// Asks the loop to clear the smoothing history of `direction` before its next tick.
    pub async fn reset_sensor(&self, direction: Direction) -> Result<(), ControlError> {
        self.frames
            .tx
            .send(LoopInput::ResetSensor(direction))
            .await
            .map_err(|_| ControlError::FramesClosed)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the loop after its current tick and returns its counters.
    pub async fn shutdown(self) -> Result<LoopSummary, ControlError> {
        let _ = self.shutdown_tx.send(true);
        self.task
            .await
            .map_err(|e| ControlError::TaskFailed(e.to_string()))
    }
}

/// Moves `pipeline` into a new tokio task ticking at `control.tick_interval_ms`.
/// Must be called from inside a tokio runtime.
pub fn spawn<R>(pipeline: ControlPipeline<R>) -> ControlHandle
where
    R: Rng + Send + 'static,
{
    let capacity = pipeline.config().control.frame_queue_capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reader = pipeline.reader();
    let task = tokio::spawn(run(pipeline, rx, shutdown_rx));
    ControlHandle {
        frames: FrameSender { tx },
        reader,
        shutdown_tx,
        task,
    }
}

async fn run<R: Rng>(
    mut pipeline: ControlPipeline<R>,
    mut rx: mpsc::Receiver<LoopInput>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> LoopSummary {
    let period = pipeline.config().control.tick_interval();
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut summary = LoopSummary::default();
    let mut pending: Vec<SensorFrame> = Vec::new();
    let mut last_tick: Option<Instant> = None;
    let mut fps = 0.0;

    info!("Control loop started, tick every {:?}", period);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                while let Ok(input) = rx.try_recv() {
                    match input {
                        LoopInput::Frame(frame) => {
                            summary.frames_received += 1;
                            if let Some(slot) = pending.iter_mut().find(|f| f.direction == frame.direction) {
                                *slot = frame;
                                summary.frames_superseded += 1;
                            } else {
                                pending.push(frame);
                            }
                        }
                        LoopInput::ResetSensor(direction) => pipeline.reset_sensor(direction),
                    }
                }

                let started = Instant::now();
                if let Some(previous) = last_tick {
                    let dt = started.duration_since(previous).as_secs_f64();
                    if dt > 0.0 {
                        fps = if fps == 0.0 {
                            1.0 / dt
                        } else {
                            (1.0 - FPS_SMOOTHING) * fps + FPS_SMOOTHING / dt
                        };
                        pipeline.set_processing_fps(fps);
                    }
                }
                last_tick = Some(started);

                let report = pipeline.tick(&pending);
                pending.clear();
                summary.ticks += 1;
                if report.phase_change.is_some() {
                    summary.phase_changes += 1;
                }

                let spent = started.elapsed();
                if spent > period {
                    warn!("Tick took {:?}, longer than the {:?} period", spent, period);
                } else {
                    debug!("tick {} done in {:?}", summary.ticks, spent);
                }
            }
        }
    }

    info!(
        "Control loop stopped after {} ticks ({} phase changes, {} frames)",
        summary.ticks, summary.phase_changes, summary.frames_received
    );
    summary
}
