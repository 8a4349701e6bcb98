// THEORY:
// The runner has no camera of its own. A `FrameSource` stands in for the motion
// detector of each sensed approach: it hands out one `SensorFrame` per call.
//
//   - `ReplayFeed` plays back recorded detections from a JSON-lines file, one
//     frame per line, looping at the end. A line is an array of boxes, each
//     `[x, y, w, h]` or `[x, y, w, h, area]`. Without an explicit area the box
//     area is used.
//   - `DemoFeed` invents a plausible stream: a few car-sized blobs plus the odd
//     speck and sliver the blob filter should throw away.

use anyhow::{Context, bail};
use crossflow::core_modules::direction::{Direction, PerDirection};
use crossflow::pipeline::{BoundingBox, RawBlob, SensorFrame};
use crossflow::FrameSender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub trait FrameSource: Send {
    fn next_frame(&mut self, direction: Direction) -> SensorFrame;
}

/// Each approach walks the recording with its own cursor, so every approach
/// advances one line per tick however many are sensed.
pub struct ReplayFeed {
    frames: Vec<Vec<RawBlob>>,
    cursors: PerDirection<usize>,
}

impl ReplayFeed {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read replay file {}", path.display()))?;
        let feed = Self::parse(&contents)
            .with_context(|| format!("invalid replay file {}", path.display()))?;
        info!("Loaded {} replay frames from {}", feed.len(), path.display());
        Ok(feed)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let mut frames = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let boxes: Vec<Vec<f64>> = serde_json::from_str(line)
                .with_context(|| format!("line {}: expected an array of boxes", index + 1))?;
            let blobs = boxes
                .iter()
                .map(|b| parse_blob(b).with_context(|| format!("line {}", index + 1)))
                .collect::<anyhow::Result<Vec<_>>>()?;
            frames.push(blobs);
        }
        if frames.is_empty() {
            bail!("no frames");
        }
        Ok(Self {
            frames,
            cursors: PerDirection::default(),
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }
}

fn parse_blob(values: &[f64]) -> anyhow::Result<RawBlob> {
    let (x, y, w, h) = match values {
        [x, y, w, h] | [x, y, w, h, _] => (*x, *y, *w, *h),
        other => bail!("box needs 4 or 5 numbers, got {}", other.len()),
    };
    if w < 0.0 || h < 0.0 {
        bail!("box has negative size {}x{}", w, h);
    }
    let bounding_box = BoundingBox::new(x as i32, y as i32, w as u32, h as u32);
    Ok(match values.get(4) {
        Some(area) => RawBlob::new(bounding_box, *area),
        None => RawBlob::from_box(bounding_box),
    })
}

impl FrameSource for ReplayFeed {
    fn next_frame(&mut self, direction: Direction) -> SensorFrame {
        let cursor = &mut self.cursors[direction];
        let blobs = self.frames[*cursor].clone();
        *cursor = (*cursor + 1) % self.frames.len();
        SensorFrame::new(direction, blobs)
    }
}

pub struct DemoFeed {
    rng: StdRng,
}

impl DemoFeed {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl FrameSource for DemoFeed {
    fn next_frame(&mut self, direction: Direction) -> SensorFrame {
        let cars = self.rng.gen_range(0..=6);
        let mut blobs = Vec::with_capacity(cars + 2);
        for _ in 0..cars {
            let w: u32 = self.rng.gen_range(30..90);
            let h: u32 = self.rng.gen_range(25..60);
            let bounding_box = BoundingBox::new(self.rng.gen_range(0..1200), self.rng.gen_range(0..650), w, h);
            blobs.push(RawBlob::new(bounding_box, f64::from(w * h) * 0.8));
        }
        if self.rng.gen_bool(0.3) {
            blobs.push(RawBlob::new(BoundingBox::new(5, 5, 6, 6), 30.0));
        }
        if self.rng.gen_bool(0.1) {
            blobs.push(RawBlob::new(BoundingBox::new(600, 0, 12, 240), 2400.0));
        }
        SensorFrame::new(direction, blobs)
    }
}

/// Submits one frame per sensed approach every `period` until shutdown.
pub fn spawn_feed(
    mut source: Box<dyn FrameSource>,
    directions: Vec<Direction>,
    frames: FrameSender,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut dropped = 0u64;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for &direction in &directions {
                        match frames.try_submit(source.next_frame(direction)) {
                            Ok(true) => {}
                            Ok(false) => {
                                dropped += 1;
                                debug!("frame queue full, dropped frame for {}", direction);
                            }
                            Err(e) => {
                                warn!("Feed stopping: {}", e);
                                return;
                            }
                        }
                    }
                }
            }
        }
        info!("Feed stopped ({} frames dropped on a full queue)", dropped);
    })
}
