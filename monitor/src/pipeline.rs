//! Per-tick monitoring pipeline over every registered camera
//!
//! For each camera, in order:
//! 1. grab a frame (the session reconnects when needed)
//! 2. detect persons; detector errors count as an empty frame
//! 3. match detections to identities
//! 4. obscure exposed persons when privacy protection is on
//! 5. advance the fall timers when fall detection is on
//! 6. draw identity boxes and publish the result to the camera's slot
//!
//! Alerts raised during the tick are dispatched once all cameras are done.

use crate::camera::{default_capture, CameraSession, CameraSource, CaptureDevice};
use crate::config::MonitorConfig;
use crate::detector_trait::Detector;
use crate::error::Result;
use crate::fall_detector::{FallStateMachine, PosturePredicate};
use crate::frame_slots::{CameraInfo, FrameSlot, FrameSlots, ProcessedFrame};
use crate::history::MovementHistory;
use crate::image_utils::draw_identities;
use crate::notification::NotificationDispatcher;
use crate::privacy::PrivacyFilter;
use crate::store::UserStore;
use crate::tracking::IdentityTracker;
use crate::types::{CameraId, FallEvent, PersonId, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Builds the capture backend for a newly added camera
pub type CaptureFactory = Box<dyn Fn(&CameraSource) -> Box<dyn CaptureDevice> + Send>;

/// Builds the posture predicate of a newly added camera
pub type PostureFactory = Box<dyn Fn() -> Box<dyn PosturePredicate> + Send>;

/// Decides which users are notified about a fall
pub trait RecipientResolver: Send {
    fn recipients(&self, event: &FallEvent, store: &dyn UserStore) -> Vec<UserId>;
}

/// Notifies every registered user
#[derive(Debug, Default, Clone, Copy)]
pub struct BroadcastToAllUsers;

impl RecipientResolver for BroadcastToAllUsers {
    fn recipients(&self, _event: &FallEvent, store: &dyn UserStore) -> Vec<UserId> {
        store.get_all_users().into_iter().map(|user| user.id).collect()
    }
}

/// Feature switches read at the start of every tick
#[derive(Debug)]
pub struct RuntimeToggles {
    fall_detection: AtomicBool,
    privacy_protection: AtomicBool,
}

impl RuntimeToggles {
    pub fn new(fall_detection: bool, privacy_protection: bool) -> Self {
        Self {
            fall_detection: AtomicBool::new(fall_detection),
            privacy_protection: AtomicBool::new(privacy_protection),
        }
    }

    pub fn fall_detection_enabled(&self) -> bool {
        self.fall_detection.load(Ordering::Relaxed)
    }

    pub fn set_fall_detection_enabled(&self, enabled: bool) {
        self.fall_detection.store(enabled, Ordering::Relaxed);
    }

    pub fn privacy_protection_enabled(&self) -> bool {
        self.privacy_protection.load(Ordering::Relaxed)
    }

    pub fn set_privacy_protection_enabled(&self, enabled: bool) {
        self.privacy_protection.store(enabled, Ordering::Relaxed);
    }
}

/// Camera changes requested while the pipeline runs on its own thread
#[derive(Debug)]
pub enum PipelineCommand {
    /// Start processing an already registered slot
    AddCamera(Arc<FrameSlot>),
    RemoveCamera(CameraId),
}

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Cameras that produced a frame
    pub frames: usize,
    pub identities: usize,
    /// Fall alerts raised this tick
    pub alerts: usize,
    /// Notification messages queued for those alerts
    pub notifications: usize,
    pub processing_ms: f32,
}

/// Per-camera processing state
struct CameraChannel {
    slot: Arc<FrameSlot>,
    session: CameraSession,
    tracker: IdentityTracker,
    fall: FallStateMachine,
}

pub struct Pipeline {
    config: MonitorConfig,
    detector: Box<dyn Detector>,
    privacy: PrivacyFilter,
    capture_factory: CaptureFactory,
    posture_factory: Option<PostureFactory>,
    resolver: Box<dyn RecipientResolver>,
    store: Arc<dyn UserStore>,
    dispatcher: Arc<NotificationDispatcher>,
    slots: Arc<FrameSlots>,
    history: Arc<MovementHistory>,
    toggles: Arc<RuntimeToggles>,
    channels: Vec<CameraChannel>,
}

impl Pipeline {
    /// Pipeline without cameras, using the default capture backend
    pub fn new(
        config: MonitorConfig,
        detector: Box<dyn Detector>,
        store: Arc<dyn UserStore>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        let toggles = RuntimeToggles::new(
            config.settings.fall_detection_enabled,
            config.settings.privacy_protection_enabled,
        );
        let history = MovementHistory::new(config.history_retention());
        Self {
            config,
            detector,
            privacy: PrivacyFilter::default(),
            capture_factory: Box::new(|_: &CameraSource| default_capture()),
            posture_factory: None,
            resolver: Box::new(BroadcastToAllUsers),
            store,
            dispatcher,
            slots: Arc::new(FrameSlots::new()),
            history: Arc::new(history),
            toggles: Arc::new(toggles),
            channels: Vec::new(),
        }
    }

    pub fn with_capture_factory(mut self, factory: CaptureFactory) -> Self {
        self.capture_factory = factory;
        self
    }

    pub fn with_posture_factory(mut self, factory: PostureFactory) -> Self {
        self.posture_factory = Some(factory);
        self
    }

    pub fn with_privacy_filter(mut self, privacy: PrivacyFilter) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_recipient_resolver(mut self, resolver: Box<dyn RecipientResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn slots(&self) -> &Arc<FrameSlots> {
        &self.slots
    }

    pub fn history(&self) -> &Arc<MovementHistory> {
        &self.history
    }

    pub fn toggles(&self) -> &Arc<RuntimeToggles> {
        &self.toggles
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    /// Register a camera and start processing it
    ///
    /// The camera is kept even when its first connect fails; later ticks retry.
    pub fn add_camera(&mut self, source: CameraSource, name: Option<String>) -> Result<CameraId> {
        let slot = self
            .slots
            .register(source, name, self.config.settings.max_cameras)?;
        let id = slot.id();
        self.attach(slot);
        Ok(id)
    }

    /// Start processing a slot registered elsewhere
    pub fn attach(&mut self, slot: Arc<FrameSlot>) {
        if self.channels.iter().any(|c| c.slot.id() == slot.id()) {
            return;
        }

        let device = (self.capture_factory)(slot.source());
        let mut session = CameraSession::new(slot.source().clone(), device)
            .with_reconnect_backoff(self.config.reconnect_backoff());
        if session.connect().is_err() {
            log::warn!("Camera {} added but not connected yet", slot.name());
        }
        slot.set_connected(session.is_connected());

        let fall_duration = self.config.fall.fall_duration();
        let fall = match &self.posture_factory {
            Some(factory) => FallStateMachine::with_predicate(fall_duration, factory()),
            None => FallStateMachine::new(fall_duration, self.config.fall.aspect_ratio_threshold),
        };

        self.channels.push(CameraChannel {
            tracker: IdentityTracker::new(self.config.tracking.iou_threshold),
            fall,
            session,
            slot,
        });
    }

    /// Unregister a camera and release its device
    pub fn remove_camera(&mut self, id: CameraId) -> Result<()> {
        self.slots.unregister(id)?;
        self.detach(id);
        Ok(())
    }

    /// Stop processing a camera; dropping its session releases the device
    pub fn detach(&mut self, id: CameraId) {
        self.channels.retain(|c| c.slot.id() != id);
    }

    pub fn apply(&mut self, command: PipelineCommand) {
        match command {
            PipelineCommand::AddCamera(slot) => self.attach(slot),
            PipelineCommand::RemoveCamera(id) => self.detach(id),
        }
    }

    /// Bring the processed cameras in line with the registry
    ///
    /// Commands sent while no pipeline thread was listening are lost; the
    /// registry still holds their outcome.
    pub fn sync_with_slots(&mut self) {
        let slots = self.slots.clone();
        self.channels.retain(|c| slots.contains(c.slot.id()));
        for info in slots.infos() {
            if let Some(slot) = slots.get(info.id) {
                self.attach(slot);
            }
        }
    }

    pub fn num_cameras(&self) -> usize {
        self.channels.len()
    }

    pub fn camera_info(&self) -> Vec<CameraInfo> {
        self.slots.infos()
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(Instant::now())
    }

    /// Run one pass over every camera with `now` as the fall clock
    pub fn tick_at(&mut self, now: Instant) -> TickReport {
        let start = Instant::now();
        let fall_enabled = self.toggles.fall_detection_enabled();
        let privacy_enabled =
            self.toggles.privacy_protection_enabled() && self.privacy.is_available();
        let mut report = TickReport::default();
        let mut raised: Vec<(String, FallEvent)> = Vec::new();

        for channel in &mut self.channels {
            let frame = channel.session.get_frame();
            channel.slot.set_connected(channel.session.is_connected());
            let Some(frame) = frame else {
                continue;
            };
            report.frames += 1;

            let detections = match self.detector.detect(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    log::debug!("{}: {} ({})", channel.slot.name(), e, self.detector.name());
                    Vec::new()
                }
            };

            let identities = channel.tracker.update(&detections);
            report.identities += identities.len();
            self.history.record(channel.slot.id(), &identities, now);

            let mut processed = if privacy_enabled {
                self.privacy.apply(&frame, &identities)
            } else {
                frame
            };

            if fall_enabled {
                channel.fall.analyze_at(&identities, &processed, now);
                for person_id in channel.fall.drain_new_alerts() {
                    if let Some(event) = channel.fall.event(person_id) {
                        raised.push((channel.slot.name().to_string(), event.clone()));
                    }
                }
            } else {
                channel.fall.reset();
            }

            let fallen: Vec<PersonId> = channel.fall.fallen_ids();
            let fallen_set: HashSet<PersonId> = fallen.iter().copied().collect();
            draw_identities(&mut processed.image, &identities, &fallen_set);

            channel.slot.store(ProcessedFrame {
                camera_id: channel.slot.id(),
                frame: processed,
                identities,
                fallen,
            });
        }

        for (camera, event) in raised {
            report.alerts += 1;
            let recipients = self.resolver.recipients(&event, self.store.as_ref());
            if recipients.is_empty() {
                log::warn!(
                    "Fall of person {} on {} but nobody to notify",
                    event.person_id,
                    camera
                );
                continue;
            }
            log::warn!(
                "Fall alert: person {} on {}, notifying {} users",
                event.person_id,
                camera,
                recipients.len()
            );
            for user_id in recipients {
                report.notifications += self.dispatcher.notify_fall_event(&event, user_id);
            }
        }

        self.history.prune(now);

        report.processing_ms = start.elapsed().as_secs_f32() * 1000.0;
        log::trace!(
            "Tick: {} frames, {} identities, {} alerts in {:.1}ms",
            report.frames,
            report.identities,
            report.alerts,
            report.processing_ms
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SourceKind;
    use crate::error::{DetectionError, MonitorError};
    use crate::fakes::{ScriptedCapture, ScriptedDetector};
    use crate::notification::{LoggingTransport, NotificationStatus};
    use crate::privacy::ExposureClassifier;
    use crate::store::{Doctor, EmergencyContact, InMemoryUserStore, User};
    use crate::types::{BoundingBox, Detection};
    use image::{Rgb, RgbImage};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const W: u32 = 640;
    const H: u32 = 480;

    fn lying() -> Detection {
        Detection::new(0.9, BoundingBox::new(100.0, 300.0, 200.0, 80.0))
    }

    fn standing() -> Detection {
        Detection::new(0.9, BoundingBox::new(100.0, 200.0, 60.0, 180.0))
    }

    /// Overlaps `lying()` enough to keep the identity, but is not on the ground
    fn sitting() -> Detection {
        Detection::new(0.9, BoundingBox::new(100.0, 280.0, 130.0, 100.0))
    }

    fn test_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.settings.reconnect_backoff_ms = 0;
        config.settings.privacy_protection_enabled = false;
        config.fall.fall_duration_secs = 3.0;
        config
    }

    /// Alice has two contacts and a doctor, Bob one contact: 3 + 1 messages per alert
    fn two_users() -> Arc<InMemoryUserStore> {
        let store = InMemoryUserStore::new();
        store.add_user(
            User::new("Alice")
                .with_contact(EmergencyContact::new("Carol").with_phone("+15550001"))
                .with_contact(EmergencyContact::new("Dan").with_email("dan@example.test"))
                .with_doctor(Doctor::new("Dr. Eve").with_phone("+15550009")),
        );
        store.add_user(
            User::new("Bob").with_contact(EmergencyContact::new("Fay").with_phone("+15550002")),
        );
        Arc::new(store)
    }

    struct Fixture {
        pipeline: Pipeline,
        capture: ScriptedCapture,
        detector: ScriptedDetector,
        dispatcher: Arc<NotificationDispatcher>,
    }

    fn fixture(config: MonitorConfig) -> Fixture {
        let store = two_users();
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            Arc::new(LoggingTransport),
            config.notification.clone(),
        ));
        let capture = ScriptedCapture::repeating(RgbImage::from_pixel(W, H, Rgb([90, 90, 90])));
        let detector = ScriptedDetector::new();
        let device = capture.clone();
        let factory: CaptureFactory = Box::new(move |_: &CameraSource| -> Box<dyn CaptureDevice> {
            Box::new(device.clone())
        });
        let pipeline = Pipeline::new(config, Box::new(detector.clone()), store, dispatcher.clone())
            .with_capture_factory(factory);
        Fixture {
            pipeline,
            capture,
            detector,
            dispatcher,
        }
    }

    fn usb() -> CameraSource {
        CameraSource::new("0", SourceKind::Usb)
    }

    #[test]
    fn test_three_second_fall_alerts_every_user() {
        let mut f = fixture(test_config());
        let camera = f.pipeline.add_camera(usb(), Some("Bedroom".to_string())).unwrap();
        f.detector.set_fallback(vec![lying()]);

        let t0 = Instant::now();
        for secs in 0..3 {
            let report = f.pipeline.tick_at(t0 + Duration::from_secs(secs));
            assert_eq!(report.frames, 1);
            assert_eq!(report.alerts, 0);
        }

        let report = f.pipeline.tick_at(t0 + Duration::from_secs(3));
        assert_eq!(report.alerts, 1);
        assert_eq!(report.notifications, 4);
        assert_eq!(f.dispatcher.queued_len(), 4);
        assert_eq!(
            f.dispatcher.latest_status(1, 0).unwrap().status,
            NotificationStatus::Pending
        );

        // still on the ground: no second alert for the same episode
        let report = f.pipeline.tick_at(t0 + Duration::from_secs(10));
        assert_eq!(report.alerts, 0);
        assert_eq!(f.dispatcher.queued_len(), 4);

        let latest = f.pipeline.slots().latest(camera).unwrap();
        assert_eq!(latest.identities.len(), 1);
        assert_eq!(latest.fallen, vec![0]);
        assert_eq!(latest.frame.image.dimensions(), (W, H));
    }

    #[test]
    fn test_getting_up_restarts_the_timer() {
        let mut f = fixture(test_config());
        f.pipeline.add_camera(usb(), None).unwrap();
        let t0 = Instant::now();

        f.detector.push(vec![lying()]);
        f.detector.push(vec![lying()]);
        f.detector.push(vec![sitting()]);
        f.detector.set_fallback(vec![lying()]);

        f.pipeline.tick_at(t0);
        f.pipeline.tick_at(t0 + Duration::from_secs(2));
        f.pipeline.tick_at(t0 + Duration::from_secs(4));
        // on the ground again since t0+5s
        assert_eq!(f.pipeline.tick_at(t0 + Duration::from_secs(5)).alerts, 0);
        assert_eq!(f.pipeline.tick_at(t0 + Duration::from_secs(7)).alerts, 0);
        assert_eq!(f.pipeline.tick_at(t0 + Duration::from_secs(8)).alerts, 1);
    }

    #[test]
    fn test_fall_detection_toggle() {
        let mut f = fixture(test_config());
        f.pipeline.add_camera(usb(), None).unwrap();
        f.detector.set_fallback(vec![lying()]);
        f.pipeline.toggles().set_fall_detection_enabled(false);

        let t0 = Instant::now();
        f.pipeline.tick_at(t0);
        let report = f.pipeline.tick_at(t0 + Duration::from_secs(20));
        assert_eq!(report.alerts, 0);
        assert_eq!(report.identities, 1);

        // re-enabled: a fresh episode starts now
        f.pipeline.toggles().set_fall_detection_enabled(true);
        assert_eq!(f.pipeline.tick_at(t0 + Duration::from_secs(21)).alerts, 0);
        assert_eq!(f.pipeline.tick_at(t0 + Duration::from_secs(24)).alerts, 1);
    }

    struct CountingExposure(Arc<AtomicUsize>);

    impl ExposureClassifier for CountingExposure {
        fn is_exposed(&mut self, _crop: &RgbImage) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn test_privacy_toggle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut f = fixture(test_config());
        let exposure = CountingExposure(calls.clone());
        f.pipeline = f
            .pipeline
            .with_privacy_filter(PrivacyFilter::new(Some(Box::new(exposure))));
        f.pipeline.add_camera(usb(), None).unwrap();
        f.detector.set_fallback(vec![standing(), lying()]);

        f.pipeline.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        f.pipeline.toggles().set_privacy_protection_enabled(true);
        f.pipeline.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_detector_errors_count_as_empty_frames() {
        let mut f = fixture(test_config());
        let camera = f.pipeline.add_camera(usb(), None).unwrap();
        f.detector
            .push_error(DetectionError::inference("scripted failure"));

        let report = f.pipeline.tick();
        assert_eq!(report.frames, 1);
        assert_eq!(report.identities, 0);
        assert!(f.pipeline.slots().latest(camera).is_some());
        assert_eq!(f.detector.calls(), 1);
    }

    #[test]
    fn test_camera_limit_and_removal() {
        let mut config = test_config();
        config.settings.max_cameras = 2;
        let mut f = fixture(config);

        let first = f.pipeline.add_camera(usb(), None).unwrap();
        f.pipeline
            .add_camera(CameraSource::new("rtsp://cam/1", SourceKind::Rtsp), None)
            .unwrap();
        assert!(matches!(
            f.pipeline.add_camera(usb(), None),
            Err(MonitorError::CameraLimit { max: 2 })
        ));

        f.pipeline.remove_camera(first).unwrap();
        assert_eq!(f.pipeline.num_cameras(), 1);
        assert_eq!(f.pipeline.camera_info().len(), 1);
        assert!(matches!(
            f.pipeline.remove_camera(first),
            Err(MonitorError::UnknownCamera(_))
        ));
    }

    #[test]
    fn test_camera_added_while_unreachable() {
        let mut f = fixture(test_config());
        f.capture.fail_next_opens(2);
        let camera = f.pipeline.add_camera(usb(), None).unwrap();
        assert!(!f.pipeline.camera_info()[0].connected);

        // second open fails too
        assert_eq!(f.pipeline.tick().frames, 0);
        assert!(f.pipeline.slots().latest(camera).is_none());

        assert_eq!(f.pipeline.tick().frames, 1);
        assert!(f.pipeline.camera_info()[0].connected);
        assert_eq!(f.capture.open_calls(), 3);
    }

    #[test]
    fn test_read_failure_skips_one_tick() {
        let mut f = fixture(test_config());
        f.pipeline.add_camera(usb(), None).unwrap();
        f.capture.push_frame(RgbImage::new(W, H));
        f.capture.push_read_failure();

        assert_eq!(f.pipeline.tick().frames, 1);
        assert_eq!(f.pipeline.tick().frames, 0);
        assert_eq!(f.capture.release_calls(), 1);
        // reconnected during the failed tick
        assert!(f.pipeline.camera_info()[0].connected);
        assert_eq!(f.pipeline.tick().frames, 1);
    }

    #[test]
    fn test_commands() {
        let mut f = fixture(test_config());
        let slot = f.pipeline.slots().register(usb(), None, 4).unwrap();
        let id = slot.id();

        f.pipeline.apply(PipelineCommand::AddCamera(slot.clone()));
        f.pipeline.apply(PipelineCommand::AddCamera(slot));
        assert_eq!(f.pipeline.num_cameras(), 1);

        f.pipeline.apply(PipelineCommand::RemoveCamera(id));
        assert_eq!(f.pipeline.num_cameras(), 0);
        // the registry is owned by whoever sent the command
        assert!(f.pipeline.slots().contains(id));
    }

    #[test]
    fn test_sync_with_slots_picks_up_missed_commands() {
        let mut f = fixture(test_config());
        let removed = f.pipeline.add_camera(usb(), None).unwrap();
        let added = f.pipeline.slots().register(usb(), Some("Late".to_string()), 4).unwrap();
        f.pipeline.slots().unregister(removed).unwrap();
        assert_eq!(f.pipeline.num_cameras(), 1);

        f.pipeline.sync_with_slots();
        assert_eq!(f.pipeline.num_cameras(), 1);
        f.pipeline.tick();
        assert!(f.pipeline.slots().latest(added.id()).is_some());

        f.pipeline.sync_with_slots();
        assert_eq!(f.pipeline.num_cameras(), 1);
    }

    #[test]
    fn test_history_recorded_and_pruned() {
        let mut config = test_config();
        config.settings.history_retention_secs = 10;
        let mut f = fixture(config);
        let camera = f.pipeline.add_camera(usb(), None).unwrap();
        f.detector.set_fallback(vec![standing()]);

        let t0 = Instant::now();
        f.pipeline.tick_at(t0);
        f.pipeline.tick_at(t0 + Duration::from_secs(5));
        assert_eq!(f.pipeline.history().for_person(camera, 0).len(), 2);

        f.pipeline.tick_at(t0 + Duration::from_secs(11));
        assert_eq!(f.pipeline.history().len(), 2);
    }

    struct OnlyUser(UserId);

    impl RecipientResolver for OnlyUser {
        fn recipients(&self, _event: &FallEvent, _store: &dyn UserStore) -> Vec<UserId> {
            vec![self.0]
        }
    }

    #[test]
    fn test_custom_recipient_resolver() {
        let mut f = fixture(test_config());
        f.pipeline = f.pipeline.with_recipient_resolver(Box::new(OnlyUser(2)));
        f.pipeline.add_camera(usb(), None).unwrap();
        f.detector.set_fallback(vec![lying()]);

        let t0 = Instant::now();
        f.pipeline.tick_at(t0);
        let report = f.pipeline.tick_at(t0 + Duration::from_secs(3));
        assert_eq!(report.alerts, 1);
        assert_eq!(report.notifications, 1);
        assert!(f.dispatcher.latest_status(1, 0).is_none());
    }

    #[test]
    fn test_broadcast_to_all_users() {
        let store = two_users();
        let event = FallEvent {
            person_id: 0,
            start_time: Instant::now(),
            started_at: std::time::SystemTime::now(),
            alerted: true,
            snapshot: None,
            last_known_position: BoundingBox::new(0.0, 0.0, 10.0, 5.0),
        };
        assert_eq!(BroadcastToAllUsers.recipients(&event, store.as_ref()), vec![1, 2]);
    }
}
