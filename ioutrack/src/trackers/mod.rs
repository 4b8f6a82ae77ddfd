//! Multi-object tracking implementations
//!
//! Trackers share one interface so the application layer can hold any of them
//! behind a `Box<dyn MultiObjectTracker>`:
//! - ContinuityTracker: greedy one-to-one IoU matching, identities end on the
//!   first missed update

use crate::bbox::Bbox;

mod continuity;

pub use continuity::{ContinuityTracker, TrackedBox};

/// Common interface for multi-object trackers
pub trait MultiObjectTracker: Send {
    /// Update tracker with new detections
    ///
    /// # Arguments
    /// * `detection_boxes` - boxes of the current frame, in detector output order
    ///
    /// # Returns
    /// One entry per live track, carrying the index of the detection it was built from
    fn update(&mut self, detection_boxes: &[Bbox<f32>]) -> Vec<TrackedBox>;

    /// Clear all trackers
    fn clear_trackers(&mut self);

    /// Get number of active tracklets
    fn num_tracklets(&self) -> usize;

    /// Get current step count
    fn get_step_count(&self) -> u32;
}

impl MultiObjectTracker for ContinuityTracker {
    fn update(&mut self, detection_boxes: &[Bbox<f32>]) -> Vec<TrackedBox> {
        self.update(detection_boxes)
    }

    fn clear_trackers(&mut self) {
        self.clear_trackers()
    }

    fn num_tracklets(&self) -> usize {
        self.num_tracklets()
    }

    fn get_step_count(&self) -> u32 {
        self.n_steps
    }
}
