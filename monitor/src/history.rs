//! Movement log of every tracked identity

use crate::types::{BoundingBox, CameraId, PersonId, TrackedIdentity};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovementRecord {
    pub camera_id: CameraId,
    pub person_id: PersonId,
    pub position: BoundingBox,
    pub timestamp: SystemTime,
    #[serde(skip)]
    pub at: Instant,
}

/// Time-ordered records, pruned past the retention window
#[derive(Debug)]
pub struct MovementHistory {
    records: Mutex<VecDeque<MovementRecord>>,
    retention: Duration,
}

impl MovementHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<MovementRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, camera_id: CameraId, identities: &[TrackedIdentity], now: Instant) {
        if identities.is_empty() {
            return;
        }
        let timestamp = SystemTime::now();
        self.records().extend(identities.iter().map(|identity| MovementRecord {
            camera_id,
            person_id: identity.id,
            position: identity.bbox,
            timestamp,
            at: now,
        }));
    }

    /// Drop records older than the retention window; returns how many went
    pub fn prune(&self, now: Instant) -> usize {
        let mut records = self.records();
        let before = records.len();
        while records
            .front()
            .is_some_and(|r| now.saturating_duration_since(r.at) > self.retention)
        {
            records.pop_front();
        }
        let pruned = before - records.len();
        if pruned > 0 {
            log::debug!("Pruned {} movement records", pruned);
        }
        pruned
    }

    pub fn snapshot(&self) -> Vec<MovementRecord> {
        self.records().iter().cloned().collect()
    }

    /// Track of one identity on one camera, oldest first
    pub fn for_person(&self, camera_id: CameraId, person_id: PersonId) -> Vec<MovementRecord> {
        self.records()
            .iter()
            .filter(|r| r.camera_id == camera_id && r.person_id == person_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::identity_color;

    fn identity(id: PersonId, x: f32) -> TrackedIdentity {
        TrackedIdentity {
            id,
            bbox: BoundingBox::new(x, 0.0, 10.0, 20.0),
            color: identity_color(id),
            display_name: None,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_records_per_identity() {
        let history = MovementHistory::new(Duration::from_secs(60));
        let camera = uuid::Uuid::new_v4();
        let t0 = Instant::now();
        history.record(camera, &[identity(0, 0.0), identity(1, 50.0)], t0);
        history.record(camera, &[identity(0, 5.0)], t0 + Duration::from_secs(1));
        history.record(camera, &[], t0 + Duration::from_secs(2));

        assert_eq!(history.len(), 3);
        let track = history.for_person(camera, 0);
        assert_eq!(track.len(), 2);
        assert_eq!(track[1].position.x, 5.0);
        assert!(history.for_person(uuid::Uuid::new_v4(), 0).is_empty());
    }

    #[test]
    fn test_prune_past_retention() {
        let history = MovementHistory::new(Duration::from_secs(10));
        let camera = uuid::Uuid::new_v4();
        let t0 = Instant::now();
        history.record(camera, &[identity(0, 0.0)], t0);
        history.record(camera, &[identity(0, 1.0)], t0 + Duration::from_secs(5));

        assert_eq!(history.prune(t0 + Duration::from_secs(10)), 0);
        assert_eq!(history.prune(t0 + Duration::from_secs(11)), 1);
        assert_eq!(history.snapshot()[0].position.x, 1.0);
        assert_eq!(history.prune(t0 + Duration::from_secs(16)), 1);
        assert!(history.is_empty());
    }
}
