// THEORY:
// The blob filter is the first stage of the engine. An external vision pipeline
// (background subtraction plus contour extraction) hands over one list of motion
// blobs per frame; this module decides which of those blobs look like vehicles.
//
// Key architectural principles:
// 1.  **Exclusive Bounds**: A blob is a vehicle only if its area lies strictly
//     between `min_area` and `max_area` and its aspect ratio lies strictly between
//     `min_aspect_ratio` and `max_aspect_ratio`. A blob sitting exactly on a bound
//     is rejected.
// 2.  **Degenerate Input Is Data, Not an Error**: A zero-height box has an aspect
//     ratio of 0 by definition, which fails the lower bound. Nothing in here can
//     divide by zero or return an error.
// 3.  **Stateless Utility**: Like the spatial layer it descends from, the filter
//     has no memory. The same blobs and thresholds always give the same vehicles;
//     temporal smoothing is the flow stabilizer's job.

use crate::config::DetectionConfig;
use serde::{Deserialize, Serialize};

/// Confidence ceiling, and the area at which it is reached.
const MAX_CONFIDENCE: f64 = 0.95;
const FULL_CONFIDENCE_AREA: f64 = 8_000.0;

/// Axis-aligned box around a blob, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn box_area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }

    /// Width over height, with a zero-height box defined as 0.
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }

    pub fn center(&self) -> (i32, i32) {
        (
            self.x.saturating_add((self.width / 2) as i32),
            self.y.saturating_add((self.height / 2) as i32),
        )
    }
}

/// One motion blob as delivered by the vision pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawBlob {
    pub bounding_box: BoundingBox,
    /// Area of the blob's contour. Usually smaller than the box area.
    pub area: f64,
}

impl RawBlob {
    pub fn new(bounding_box: BoundingBox, area: f64) -> Self {
        Self { bounding_box, area }
    }

    /// A blob whose contour fills its whole box.
    pub fn from_box(bounding_box: BoundingBox) -> Self {
        Self {
            area: bounding_box.box_area(),
            bounding_box,
        }
    }
}

/// A blob that passed the vehicle thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleObservation {
    /// 1-based position of the blob in the frame's input list.
    pub id: u32,
    pub bounding_box: BoundingBox,
    pub area: f64,
    pub aspect_ratio: f64,
    pub center: (i32, i32),
    /// Rough size-based confidence in [0, 0.95].
    pub confidence: f64,
}

pub mod blob_filter {
    use super::*;

    /// Keeps the blobs of one frame that look like vehicles.
    pub fn filter_vehicles(blobs: &[RawBlob], config: &DetectionConfig) -> Vec<VehicleObservation> {
        blobs
            .iter()
            .enumerate()
            .filter_map(|(index, blob)| classify(index, blob, config))
            .collect()
    }

    /// Number of vehicles in a frame, without building the observations.
    pub fn count_vehicles(blobs: &[RawBlob], config: &DetectionConfig) -> u32 {
        blobs.iter().filter(|blob| is_vehicle(blob, config)).count() as u32
    }

    pub fn is_vehicle(blob: &RawBlob, config: &DetectionConfig) -> bool {
        let area_ok = config.min_area < blob.area && blob.area < config.max_area;
        if !area_ok {
            return false;
        }
        let ratio = blob.bounding_box.aspect_ratio();
        config.min_aspect_ratio < ratio && ratio < config.max_aspect_ratio
    }

    fn classify(index: usize, blob: &RawBlob, config: &DetectionConfig) -> Option<VehicleObservation> {
        if !is_vehicle(blob, config) {
            return None;
        }
        Some(VehicleObservation {
            id: index as u32 + 1,
            bounding_box: blob.bounding_box,
            area: blob.area,
            aspect_ratio: blob.bounding_box.aspect_ratio(),
            center: blob.bounding_box.center(),
            confidence: (blob.area / FULL_CONFIDENCE_AREA).min(MAX_CONFIDENCE),
        })
    }
}
