//! Postprocessing helpers for detector implementations
//!
//! Raw model output is reduced to confident person detections with
//! overlapping duplicates suppressed.

use crate::types::{BoundingBox, Detection};

/// COCO class index of "person"
pub const PERSON_CLASS_ID: u32 = 0;

/// One raw model output row, already scaled to frame pixels
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

/// Postprocessor for converting raw model rows to person detections
#[derive(Debug, Clone)]
pub struct Postprocessor {
    /// Confidence threshold for filtering detections
    confidence_threshold: f32,
    /// NMS threshold for removing duplicate detections
    nms_threshold: f32,
    /// Maximum number of detections to return
    max_detections: usize,
}

impl Default for Postprocessor {
    fn default() -> Self {
        Self::new(0.5, 0.45, 100)
    }
}

impl Postprocessor {
    pub fn new(confidence_threshold: f32, nms_threshold: f32, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            nms_threshold,
            max_detections,
        }
    }

    /// Keep confident persons, suppress duplicates, cap the count
    ///
    /// Output is ordered by descending confidence.
    pub fn filter_persons(&self, raw: Vec<RawDetection>) -> Vec<Detection> {
        let persons: Vec<RawDetection> = raw
            .into_iter()
            .filter(|det| det.class_id == PERSON_CLASS_ID)
            .filter(|det| det.confidence > self.confidence_threshold)
            .filter(|det| det.bbox.to_bbox().is_valid())
            .collect();

        let mut kept = self.apply_nms(persons);
        kept.truncate(self.max_detections);

        kept.into_iter()
            .map(|det| Detection::new(det.confidence, det.bbox))
            .collect()
    }

    /// Apply Non-Maximum Suppression to remove duplicate detections
    fn apply_nms(&self, mut detections: Vec<RawDetection>) -> Vec<RawDetection> {
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut keep = Vec::new();
        let mut suppress = vec![false; detections.len()];

        for i in 0..detections.len() {
            if suppress[i] {
                continue;
            }

            keep.push(detections[i].clone());

            for j in (i + 1)..detections.len() {
                if suppress[j] {
                    continue;
                }
                if detections[i].bbox.iou(&detections[j].bbox) > self.nms_threshold {
                    suppress[j] = true;
                }
            }
        }

        keep
    }
}

/// [`Postprocessor::filter_persons`] with default thresholds
pub fn filter_persons(raw: Vec<RawDetection>) -> Vec<Detection> {
    Postprocessor::default().filter_persons(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_person_classes_are_dropped() {
        let raw = vec![
            RawDetection::new(0, 0.9, BoundingBox::new(0.0, 0.0, 10.0, 20.0)),
            RawDetection::new(16, 0.95, BoundingBox::new(50.0, 50.0, 10.0, 10.0)),
        ];
        let persons = filter_persons(raw);
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].confidence, 0.9);
    }

    #[test]
    fn test_confidence_filtering() {
        let postprocessor = Postprocessor::new(0.5, 0.45, 100);
        let raw = vec![
            RawDetection::new(0, 0.6, BoundingBox::new(0.0, 0.0, 10.0, 20.0)),
            RawDetection::new(0, 0.3, BoundingBox::new(100.0, 0.0, 10.0, 20.0)),
        ];
        assert_eq!(postprocessor.filter_persons(raw).len(), 1);
    }

    #[test]
    fn test_nms_keeps_most_confident_of_overlapping_pair() {
        let raw = vec![
            RawDetection::new(0, 0.7, BoundingBox::new(0.0, 0.0, 50.0, 100.0)),
            RawDetection::new(0, 0.9, BoundingBox::new(2.0, 1.0, 50.0, 100.0)),
            RawDetection::new(0, 0.8, BoundingBox::new(300.0, 0.0, 50.0, 100.0)),
        ];
        let persons = filter_persons(raw);
        assert_eq!(persons.len(), 2);
        assert_eq!(persons[0].confidence, 0.9);
        assert_eq!(persons[0].bbox.x, 2.0);
        assert_eq!(persons[1].confidence, 0.8);
    }

    #[test]
    fn test_max_detections_and_degenerate_boxes() {
        let postprocessor = Postprocessor::new(0.1, 0.45, 2);
        let raw = vec![
            RawDetection::new(0, 0.5, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
            RawDetection::new(0, 0.6, BoundingBox::new(100.0, 0.0, 10.0, 10.0)),
            RawDetection::new(0, 0.7, BoundingBox::new(200.0, 0.0, 10.0, 10.0)),
            RawDetection::new(0, 0.99, BoundingBox::new(300.0, 0.0, 0.0, 10.0)),
        ];
        let persons = postprocessor.filter_persons(raw);
        let confidences: Vec<f32> = persons.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.7, 0.6]);
    }
}
