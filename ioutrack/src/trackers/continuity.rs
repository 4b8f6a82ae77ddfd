//! Frame-to-frame continuity tracking
//!
//! An identity survives only as long as it is matched on every consecutive
//! update. Matching is greedy and one-to-one: detections are visited in input
//! order and each takes the still-free previous track with the highest IoU
//! above the threshold. Equal IoU resolves to the lowest previous-track index.

use crate::bbox::{boxes_to_array, ious, Bbox};
use ndarray::ArrayView2;

/// One tracked box emitted by an update
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBox {
    pub track_id: u64,
    pub bbox: Bbox<f32>,
    /// Index of the detection this track was built from in the update input
    pub det_idx: usize,
}

/// Greedy assignment of detections (rows) to tracks (columns)
///
/// Returns, for every detection, the index of the track it was matched to.
fn assign_detections_to_tracks(
    det_track_ious: ArrayView2<f32>,
    iou_threshold: f32,
) -> Vec<Option<usize>> {
    let (n_dets, n_tracks) = det_track_ious.dim();
    let mut taken = vec![false; n_tracks];
    let mut assignments = Vec::with_capacity(n_dets);

    for det_idx in 0..n_dets {
        let mut best = None;
        let mut best_iou = iou_threshold;
        for track_idx in 0..n_tracks {
            if taken[track_idx] {
                continue;
            }
            let iou = det_track_ious[(det_idx, track_idx)];
            // strict comparison keeps the earliest track on ties
            if iou > best_iou {
                best_iou = iou;
                best = Some(track_idx);
            }
        }
        if let Some(track_idx) = best {
            taken[track_idx] = true;
        }
        assignments.push(best);
    }

    assignments
}

/// IoU continuity tracker with no gap tolerance
#[derive(Debug, Clone)]
pub struct ContinuityTracker {
    pub iou_threshold: f32,
    next_track_id: u64,
    /// Tracks from the previous update, in output order
    tracks: Vec<(u64, Bbox<f32>)>,
    pub n_steps: u32,
}

impl ContinuityTracker {
    pub fn new(iou_threshold: f32) -> Self {
        ContinuityTracker {
            iou_threshold,
            next_track_id: 0,
            tracks: Vec::new(),
            n_steps: 0,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_track_id;
        self.next_track_id += 1;
        id
    }

    /// Match this update's boxes against the previous update's tracks
    ///
    /// Output: matched tracks in previous-track order, then new tracks in
    /// detection order. Unmatched previous tracks are dropped and their ids
    /// are never handed out again.
    pub fn update(&mut self, detection_boxes: &[Bbox<f32>]) -> Vec<TrackedBox> {
        let previous: Vec<Bbox<f32>> = self.tracks.iter().map(|(_, b)| b.clone()).collect();
        let det_arr = boxes_to_array(detection_boxes);
        let track_arr = boxes_to_array(&previous);
        let det_track_ious = ious(det_arr.view(), track_arr.view());

        let assignments = assign_detections_to_tracks(det_track_ious.view(), self.iou_threshold);

        let mut det_for_track = vec![None; self.tracks.len()];
        for (det_idx, track_idx) in assignments.iter().enumerate() {
            if let Some(track_idx) = track_idx {
                det_for_track[*track_idx] = Some(det_idx);
            }
        }

        let mut output = Vec::with_capacity(detection_boxes.len());
        for (track_idx, det_idx) in det_for_track.into_iter().enumerate() {
            if let Some(det_idx) = det_idx {
                output.push(TrackedBox {
                    track_id: self.tracks[track_idx].0,
                    bbox: detection_boxes[det_idx].clone(),
                    det_idx,
                });
            }
        }

        for (det_idx, track_idx) in assignments.iter().enumerate() {
            if track_idx.is_none() {
                let track_id = self.allocate_id();
                output.push(TrackedBox {
                    track_id,
                    bbox: detection_boxes[det_idx].clone(),
                    det_idx,
                });
            }
        }

        let matched = assignments.iter().filter(|a| a.is_some()).count();
        let dropped = self.tracks.len() - matched;
        if dropped > 0 {
            log::debug!("Dropped {} unmatched tracks", dropped);
        }

        self.tracks = output.iter().map(|t| (t.track_id, t.bbox.clone())).collect();
        self.n_steps += 1;
        output
    }

    /// Forget all current tracks. Id allocation keeps counting.
    pub fn clear_trackers(&mut self) {
        self.tracks.clear();
    }

    pub fn num_tracklets(&self) -> usize {
        self.tracks.len()
    }

    /// Next id that will be allocated
    pub fn next_id(&self) -> u64 {
        self.next_track_id
    }
}
