// THEORY:
// Frame-to-frame detection counts are noisy: a car splits into two blobs, a
// shadow briefly passes the filter, a frame is dropped. The flow stabilizer damps
// that noise with a short moving window per approach.
//
// The stable count is the truncated mean of the window, not the rounded mean.
// Downstream golden outputs depend on `floor`, so `[10, 10, 0]` must give 6.
//
// Sensed and synthetic approaches go through the same window so the scheduler
// sees both with identical smoothing.

use crate::core_modules::direction::{Direction, PerDirection};
use std::collections::VecDeque;

pub struct FlowStabilizer {
    history_size: usize,
    windows: PerDirection<VecDeque<u32>>,
}

impl FlowStabilizer {
    /// A `history_size` of zero is treated as one.
    pub fn new(history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            history_size,
            windows: PerDirection::from_fn(|_| VecDeque::new()),
        }
    }

    /// Records this tick's raw count and returns the smoothed count.
    pub fn observe(&mut self, direction: Direction, raw_count: u32) -> u32 {
        let window = &mut self.windows[direction];
        window.push_back(raw_count);
        if window.len() > self.history_size {
            window.pop_front();
        }
        Self::truncated_mean(window)
    }

    /// Smoothed count without recording anything. Zero for an empty window.
    pub fn stable_count(&self, direction: Direction) -> u32 {
        Self::truncated_mean(&self.windows[direction])
    }

    /// Forgets the history of one approach, e.g. after its camera restarted.
    pub fn reset(&mut self, direction: Direction) {
        self.windows[direction].clear();
    }

    pub fn window(&self, direction: Direction) -> &VecDeque<u32> {
        &self.windows[direction]
    }

    fn truncated_mean(window: &VecDeque<u32>) -> u32 {
        if window.is_empty() {
            return 0;
        }
        let sum: u64 = window.iter().map(|&c| u64::from(c)).sum();
        (sum / window.len() as u64) as u32
    }
}
