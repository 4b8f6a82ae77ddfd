//! Fall state machine
//!
//! Every tracked identity is in one of three states:
//!
//! - NOT_FALLEN: no event exists for the id.
//! - FALLEN_PENDING: the id satisfied the on-ground predicate; an event holds
//!   the start time and a snapshot of the person.
//! - FALLEN_ALERTED: the id stayed on the ground for the configured duration.
//!   Its id was queued exactly once for [`FallStateMachine::drain_new_alerts`].
//!
//! Failing the predicate or leaving the frame deletes the event at once, so a
//! later fall starts a fresh episode with a new start time.

use crate::types::{FallEvent, Frame, PersonId, TrackedIdentity};
use image::RgbImage;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant, SystemTime};

/// Decides whether a tracked person currently lies on the ground
pub trait PosturePredicate: Send {
    fn is_on_ground(&mut self, identity: &TrackedIdentity, frame: &Frame) -> bool;
}

/// Refines a posture decision from the person crop
pub trait PostureClassifier: Send {
    /// `true` when the crop shows a lying posture
    fn classify(&mut self, crop: &RgbImage) -> bool;
}

/// Box wider than tall by more than `threshold`
#[derive(Debug, Clone, Copy)]
pub struct AspectRatioPosture {
    pub threshold: f32,
}

impl Default for AspectRatioPosture {
    fn default() -> Self {
        Self { threshold: 1.5 }
    }
}

impl AspectRatioPosture {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl PosturePredicate for AspectRatioPosture {
    fn is_on_ground(&mut self, identity: &TrackedIdentity, _frame: &Frame) -> bool {
        identity.bbox.aspect_ratio() > self.threshold
    }
}

/// Aspect-ratio gate confirmed by a classifier on the person crop
///
/// When the box lies outside the frame there is no crop to classify and the
/// aspect-ratio decision stands.
pub struct ClassifiedPosture {
    gate: AspectRatioPosture,
    classifier: Box<dyn PostureClassifier>,
}

impl ClassifiedPosture {
    pub fn new(gate: AspectRatioPosture, classifier: Box<dyn PostureClassifier>) -> Self {
        Self { gate, classifier }
    }
}

impl PosturePredicate for ClassifiedPosture {
    fn is_on_ground(&mut self, identity: &TrackedIdentity, frame: &Frame) -> bool {
        if !self.gate.is_on_ground(identity, frame) {
            return false;
        }
        match frame.crop(&identity.bbox) {
            Some(crop) => self.classifier.classify(&crop),
            None => true,
        }
    }
}

/// Per-camera fall timers
pub struct FallStateMachine {
    predicate: Box<dyn PosturePredicate>,
    fall_duration: Duration,
    events: BTreeMap<PersonId, FallEvent>,
    new_alerts: Vec<PersonId>,
}

impl FallStateMachine {
    /// Aspect-ratio predicate with the given threshold
    pub fn new(fall_duration: Duration, aspect_ratio_threshold: f32) -> Self {
        Self::with_predicate(
            fall_duration,
            Box::new(AspectRatioPosture::new(aspect_ratio_threshold)),
        )
    }

    pub fn with_predicate(fall_duration: Duration, predicate: Box<dyn PosturePredicate>) -> Self {
        Self {
            predicate,
            fall_duration,
            events: BTreeMap::new(),
            new_alerts: Vec::new(),
        }
    }

    pub fn fall_duration(&self) -> Duration {
        self.fall_duration
    }

    /// Advance every identity's state using the current time
    pub fn analyze(&mut self, identities: &[TrackedIdentity], frame: &Frame) {
        self.analyze_at(identities, frame, Instant::now());
    }

    /// Advance every identity's state as of `now`
    pub fn analyze_at(&mut self, identities: &[TrackedIdentity], frame: &Frame, now: Instant) {
        let present: HashSet<PersonId> = identities.iter().map(|i| i.id).collect();
        self.events.retain(|id, _| {
            let keep = present.contains(id);
            if !keep {
                log::debug!("Person {} left the frame, fall episode cleared", id);
            }
            keep
        });

        for identity in identities {
            if !self.predicate.is_on_ground(identity, frame) {
                if self.events.remove(&identity.id).is_some() {
                    log::info!("Person {} is up again", identity.id);
                }
                continue;
            }

            let event = self.events.entry(identity.id).or_insert_with(|| {
                log::info!("Person {} on the ground, starting fall timer", identity.id);
                FallEvent {
                    person_id: identity.id,
                    start_time: now,
                    started_at: SystemTime::now(),
                    alerted: false,
                    snapshot: frame.crop(&identity.bbox),
                    last_known_position: identity.bbox,
                }
            });
            event.last_known_position = identity.bbox;

            let on_ground = now.saturating_duration_since(event.start_time);
            if !event.alerted && on_ground >= self.fall_duration {
                event.alerted = true;
                self.new_alerts.push(identity.id);
                log::warn!(
                    "Fall detected: person {} on the ground for {:.1}s",
                    identity.id,
                    on_ground.as_secs_f32()
                );
            }
        }
    }

    /// Ongoing episodes ordered by person id
    pub fn active_events(&self) -> Vec<FallEvent> {
        self.events.values().cloned().collect()
    }

    pub fn event(&self, person_id: PersonId) -> Option<&FallEvent> {
        self.events.get(&person_id)
    }

    /// Ids with an ongoing episode, alerted or not
    pub fn fallen_ids(&self) -> Vec<PersonId> {
        self.events.keys().copied().collect()
    }

    /// Person ids that crossed the alert threshold since the last drain
    pub fn drain_new_alerts(&mut self) -> Vec<PersonId> {
        std::mem::take(&mut self.new_alerts)
    }

    /// Drop every episode and pending alert
    pub fn reset(&mut self) {
        self.events.clear();
        self.new_alerts.clear();
    }
}

impl std::fmt::Debug for FallStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallStateMachine")
            .field("fall_duration", &self.fall_duration)
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("new_alerts", &self.new_alerts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FixedPostureClassifier;
    use crate::types::BoundingBox;
    use image::Rgb;

    fn person(id: PersonId, bbox: BoundingBox) -> TrackedIdentity {
        TrackedIdentity {
            id,
            bbox,
            color: Rgb([0, 255, 0]),
            display_name: None,
            confidence: 0.9,
        }
    }

    fn lying(id: PersonId) -> TrackedIdentity {
        person(id, BoundingBox::new(100.0, 300.0, 200.0, 80.0))
    }

    fn standing(id: PersonId) -> TrackedIdentity {
        person(id, BoundingBox::new(100.0, 100.0, 80.0, 200.0))
    }

    fn frame() -> Frame {
        Frame::new(0, RgbImage::new(640, 480))
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_aspect_ratio_predicate_is_strict() {
        let mut predicate = AspectRatioPosture::default();
        let f = frame();
        assert!(predicate.is_on_ground(&lying(0), &f));
        assert!(!predicate.is_on_ground(&standing(0), &f));
        // exactly 1.5 is not on the ground
        assert!(!predicate.is_on_ground(&person(0, BoundingBox::new(0.0, 0.0, 150.0, 100.0)), &f));
    }

    #[test]
    fn test_three_second_threshold() {
        let mut machine = FallStateMachine::new(secs(3.0), 1.5);
        let f = frame();
        let t0 = Instant::now();

        for t in [0.0, 1.0, 2.0, 2.9] {
            machine.analyze_at(&[lying(7)], &f, t0 + secs(t));
            assert!(machine.drain_new_alerts().is_empty());
        }
        assert!(!machine.event(7).unwrap().alerted);

        machine.analyze_at(&[lying(7)], &f, t0 + secs(3.0));
        assert_eq!(machine.drain_new_alerts(), vec![7]);
        assert!(machine.event(7).unwrap().alerted);

        // still on the ground: no second alert
        machine.analyze_at(&[lying(7)], &f, t0 + secs(10.0));
        assert!(machine.drain_new_alerts().is_empty());
    }

    #[test]
    fn test_exactly_one_alert_per_episode() {
        let mut machine = FallStateMachine::new(secs(1.0), 1.5);
        let f = frame();
        let t0 = Instant::now();
        let mut alerts = Vec::new();
        for step in 0..50 {
            machine.analyze_at(&[lying(1)], &f, t0 + secs(step as f64 * 0.1));
            alerts.extend(machine.drain_new_alerts());
        }
        assert_eq!(alerts, vec![1]);
    }

    #[test]
    fn test_standing_up_resets_episode() {
        let mut machine = FallStateMachine::new(secs(3.0), 1.5);
        let f = frame();
        let t0 = Instant::now();

        machine.analyze_at(&[lying(2)], &f, t0);
        machine.analyze_at(&[standing(2)], &f, t0 + secs(2.0));
        assert!(machine.active_events().is_empty());

        machine.analyze_at(&[lying(2)], &f, t0 + secs(2.5));
        assert_eq!(machine.event(2).unwrap().start_time, t0 + secs(2.5));
        machine.analyze_at(&[lying(2)], &f, t0 + secs(5.0));
        assert!(machine.drain_new_alerts().is_empty());
        machine.analyze_at(&[lying(2)], &f, t0 + secs(5.5));
        assert_eq!(machine.drain_new_alerts(), vec![2]);
    }

    #[test]
    fn test_alerted_episode_reset_alerts_again_on_next_fall() {
        let mut machine = FallStateMachine::new(secs(1.0), 1.5);
        let f = frame();
        let t0 = Instant::now();

        machine.analyze_at(&[lying(4)], &f, t0);
        machine.analyze_at(&[lying(4)], &f, t0 + secs(1.0));
        assert_eq!(machine.drain_new_alerts(), vec![4]);

        machine.analyze_at(&[standing(4)], &f, t0 + secs(2.0));
        machine.analyze_at(&[lying(4)], &f, t0 + secs(3.0));
        machine.analyze_at(&[lying(4)], &f, t0 + secs(4.0));
        assert_eq!(machine.drain_new_alerts(), vec![4]);
    }

    #[test]
    fn test_vanishing_deletes_event() {
        let mut machine = FallStateMachine::new(secs(3.0), 1.5);
        let f = frame();
        let t0 = Instant::now();

        machine.analyze_at(&[lying(1), lying(2)], &f, t0);
        assert_eq!(machine.active_events().len(), 2);

        machine.analyze_at(&[lying(2)], &f, t0 + secs(1.0));
        let events = machine.active_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].person_id, 2);
        // surviving episode keeps its start time
        assert_eq!(events[0].start_time, t0);
    }

    #[test]
    fn test_snapshot_is_clipped_to_frame() {
        let mut machine = FallStateMachine::new(secs(3.0), 1.5);
        let f = frame();
        let partly_outside = person(0, BoundingBox::new(600.0, 400.0, 100.0, 50.0));
        let fully_outside = person(1, BoundingBox::new(700.0, 500.0, 100.0, 50.0));
        machine.analyze_at(&[partly_outside, fully_outside], &f, Instant::now());

        let snapshot = machine.event(0).unwrap().snapshot.as_ref().unwrap();
        assert_eq!(snapshot.dimensions(), (40, 50));
        assert!(machine.event(1).unwrap().snapshot.is_none());
    }

    #[test]
    fn test_last_known_position_follows_person() {
        let mut machine = FallStateMachine::new(secs(3.0), 1.5);
        let f = frame();
        let t0 = Instant::now();
        machine.analyze_at(&[lying(3)], &f, t0);
        let moved = person(3, BoundingBox::new(120.0, 310.0, 200.0, 80.0));
        machine.analyze_at(&[moved.clone()], &f, t0 + secs(0.5));
        assert_eq!(machine.event(3).unwrap().last_known_position, moved.bbox);
    }

    #[test]
    fn test_classifier_can_veto_aspect_ratio() {
        let predicate = ClassifiedPosture::new(
            AspectRatioPosture::default(),
            Box::new(FixedPostureClassifier::new(false)),
        );
        let mut machine = FallStateMachine::with_predicate(secs(0.5), Box::new(predicate));
        let f = frame();
        machine.analyze_at(&[lying(0)], &f, Instant::now());
        assert!(machine.active_events().is_empty());

        let predicate = ClassifiedPosture::new(
            AspectRatioPosture::default(),
            Box::new(FixedPostureClassifier::new(true)),
        );
        let mut machine = FallStateMachine::with_predicate(secs(0.5), Box::new(predicate));
        machine.analyze_at(&[lying(0)], &f, Instant::now());
        assert_eq!(machine.active_events().len(), 1);
    }

    #[test]
    fn test_reset_clears_events_and_alerts() {
        let mut machine = FallStateMachine::new(secs(0.5), 1.5);
        let f = frame();
        let t0 = Instant::now();
        machine.analyze_at(&[lying(0)], &f, t0);
        machine.analyze_at(&[lying(0)], &f, t0 + secs(1.0));
        machine.reset();
        assert!(machine.active_events().is_empty());
        assert!(machine.drain_new_alerts().is_empty());
    }
}
