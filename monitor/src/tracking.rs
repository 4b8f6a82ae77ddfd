//! Identity tracking for one camera

use crate::image_utils::hsv_to_rgb;
use crate::types::{BoundingBox, Detection, PersonId, TrackedIdentity};
use image::Rgb;
use ioutrack::{Bbox, ContinuityTracker, MultiObjectTracker};
use std::collections::HashMap;

/// Display color of an identity
///
/// Hue steps 30 units per id on the 0-180 hue scale at full saturation and
/// value, so six consecutive ids get distinct colors.
pub fn identity_color(id: PersonId) -> Rgb<u8> {
    let hue = (id.wrapping_mul(30) % 180) as f32;
    hsv_to_rgb(hue * 2.0, 1.0, 1.0)
}

/// Assigns stable identities to per-frame person detections
///
/// Each camera owns one tracker and so its own id space.
pub struct IdentityTracker {
    tracker: Box<dyn MultiObjectTracker>,
    /// Names attached to live identities
    display_names: HashMap<PersonId, String>,
    update_count: u64,
}

impl IdentityTracker {
    /// Continuity tracker with the given IoU threshold
    pub fn new(iou_threshold: f32) -> Self {
        log::debug!("Creating ContinuityTracker with iou_threshold={:.3}", iou_threshold);
        Self::with_tracker(Box::new(ContinuityTracker::new(iou_threshold)))
    }

    pub fn with_tracker(tracker: Box<dyn MultiObjectTracker>) -> Self {
        Self {
            tracker,
            display_names: HashMap::new(),
            update_count: 0,
        }
    }

    /// Match this tick's detections against the previous tick's identities
    ///
    /// Matched identities come first in previous order, then new identities
    /// in detection order.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackedIdentity> {
        self.update_count += 1;

        let boxes: Vec<Bbox<f32>> = detections.iter().map(|d| d.bbox.to_bbox()).collect();
        let tracks = self.tracker.update(&boxes);

        let identities: Vec<TrackedIdentity> = tracks
            .into_iter()
            .map(|track| {
                let confidence = detections
                    .get(track.det_idx)
                    .map(|d| d.confidence)
                    .unwrap_or(0.0);
                TrackedIdentity {
                    id: track.track_id,
                    bbox: BoundingBox::from_bbox(&track.bbox),
                    color: identity_color(track.track_id),
                    display_name: self.display_names.get(&track.track_id).cloned(),
                    confidence,
                }
            })
            .collect();

        // names follow their identity and die with it
        self.display_names
            .retain(|id, _| identities.iter().any(|identity| identity.id == *id));

        log::trace!(
            "Tracker update #{}: {} detections -> {} identities",
            self.update_count,
            detections.len(),
            identities.len()
        );

        identities
    }

    /// Attach a name to a live identity; ignored once the identity is gone
    pub fn set_display_name<S: Into<String>>(&mut self, id: PersonId, name: S) {
        self.display_names.insert(id, name.into());
    }

    /// Forget every identity. Ids already handed out stay retired.
    pub fn reset(&mut self) {
        self.tracker.clear_trackers();
        self.display_names.clear();
    }

    pub fn num_identities(&self) -> usize {
        self.tracker.num_tracklets()
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }
}

impl std::fmt::Debug for IdentityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTracker")
            .field("num_identities", &self.num_identities())
            .field("update_count", &self.update_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn det(x: f32, y: f32, w: f32, h: f32) -> Detection {
        Detection::new(0.9, BoundingBox::new(x, y, w, h))
    }

    #[test]
    fn test_identity_colors() {
        assert_eq!(identity_color(0), Rgb([255, 0, 0]));
        assert_eq!(identity_color(1), Rgb([255, 255, 0]));
        assert_eq!(identity_color(2), Rgb([0, 255, 0]));
        assert_eq!(identity_color(3), Rgb([0, 255, 255]));
        // hue wraps every six ids
        assert_eq!(identity_color(6), identity_color(0));
    }

    #[test]
    fn test_walking_person_keeps_id_and_newcomer_gets_next() {
        let mut tracker = IdentityTracker::new(0.3);

        let first = tracker.update(&[det(10.0, 10.0, 50.0, 100.0)]);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, 0);

        let second = tracker.update(&[det(12.0, 11.0, 49.0, 99.0), det(500.0, 500.0, 50.0, 100.0)]);
        let ids: Vec<PersonId> = second.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(second[0].bbox, BoundingBox::new(12.0, 11.0, 49.0, 99.0));
        assert_eq!(second[0].color, identity_color(0));
        assert_eq!(second[1].color, identity_color(1));
    }

    #[test]
    fn test_confidence_follows_matched_detection() {
        let mut tracker = IdentityTracker::new(0.3);
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        let identities = tracker.update(&[
            Detection::new(0.4, BoundingBox::new(300.0, 0.0, 10.0, 10.0)),
            Detection::new(0.8, BoundingBox::new(0.0, 0.0, 10.0, 10.0)),
        ]);
        assert_eq!(identities[0].id, 0);
        assert_eq!(identities[0].confidence, 0.8);
        assert_eq!(identities[1].id, 1);
        assert_eq!(identities[1].confidence, 0.4);
    }

    #[test]
    fn test_ids_unique_per_tick_and_never_reused() {
        let mut tracker = IdentityTracker::new(0.3);
        let mut retired: HashSet<PersonId> = HashSet::new();
        let mut live: HashSet<PersonId> = HashSet::new();

        let ticks = vec![
            vec![det(0.0, 0.0, 20.0, 40.0), det(100.0, 0.0, 20.0, 40.0)],
            vec![det(1.0, 0.0, 20.0, 40.0)],
            vec![],
            vec![
                det(1.0, 0.0, 20.0, 40.0),
                det(100.0, 0.0, 20.0, 40.0),
                det(200.0, 0.0, 20.0, 40.0),
            ],
            vec![det(2.0, 0.0, 20.0, 40.0), det(201.0, 0.0, 20.0, 40.0)],
        ];

        for detections in &ticks {
            let identities = tracker.update(detections);
            let ids: HashSet<PersonId> = identities.iter().map(|i| i.id).collect();
            assert_eq!(ids.len(), identities.len());
            assert!(ids.is_disjoint(&retired));
            retired.extend(live.difference(&ids).copied());
            live = ids;
        }
        assert_eq!(tracker.update_count(), 5);
    }

    #[test]
    fn test_display_name_lives_with_identity() {
        let mut tracker = IdentityTracker::new(0.3);
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        tracker.set_display_name(0, "Grandpa");

        let identities = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(identities[0].display_name.as_deref(), Some("Grandpa"));

        tracker.update(&[]);
        let identities = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(identities[0].id, 2);
        assert!(identities[0].display_name.is_none());
    }

    #[test]
    fn test_reset_retires_ids() {
        let mut tracker = IdentityTracker::new(0.3);
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        tracker.reset();
        assert_eq!(tracker.num_identities(), 0);
        let identities = tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        assert_eq!(identities[0].id, 1);
    }
}
