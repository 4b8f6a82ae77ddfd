//! Monitoring context: pipeline thread, camera registry and notification dispatcher
//!
//! Built from a [`MonitorConfig`] plus the external capabilities. Anything
//! not supplied falls back to a stand-in that keeps the pipeline running:
//! the stub detector, the logging transport and an empty in-memory store.

use crate::camera::{CameraSource, SourceKind};
use crate::config::MonitorConfig;
use crate::detector_stub::StubDetector;
use crate::detector_trait::Detector;
use crate::error::{MonitorError, Result};
use crate::frame_slots::{CameraInfo, FrameSlots, ProcessedFrame};
use crate::history::{MovementHistory, MovementRecord};
use crate::notification::{
    LoggingTransport, MessageTransport, NotificationDispatcher, NotificationMessage,
};
use crate::pipeline::{
    CaptureFactory, Pipeline, PipelineCommand, PostureFactory, RecipientResolver, RuntimeToggles,
};
use crate::privacy::{ExposureClassifier, PrivacyFilter};
use crate::store::{InMemoryUserStore, UserStore};
use crate::types::CameraId;
use crossbeam::channel::{self, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub struct MonitorBuilder {
    config: MonitorConfig,
    store: Option<Arc<dyn UserStore>>,
    transport: Option<Arc<dyn MessageTransport>>,
    detector: Option<Box<dyn Detector>>,
    capture_factory: Option<CaptureFactory>,
    posture_factory: Option<PostureFactory>,
    exposure_classifier: Option<Box<dyn ExposureClassifier>>,
    resolver: Option<Box<dyn RecipientResolver>>,
}

impl MonitorBuilder {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn user_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn MessageTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn detector(mut self, detector: Box<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn capture_factory(mut self, factory: CaptureFactory) -> Self {
        self.capture_factory = Some(factory);
        self
    }

    pub fn posture_factory(mut self, factory: PostureFactory) -> Self {
        self.posture_factory = Some(factory);
        self
    }

    /// Enables the privacy filter
    pub fn exposure_classifier(mut self, classifier: Box<dyn ExposureClassifier>) -> Self {
        self.exposure_classifier = Some(classifier);
        self
    }

    pub fn recipient_resolver(mut self, resolver: Box<dyn RecipientResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Validate the configuration and register its cameras
    pub fn build(self) -> Result<Monitor> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryUserStore::new()));
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(LoggingTransport));
        let detector = self
            .detector
            .unwrap_or_else(|| Box::new(StubDetector::new()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            transport,
            self.config.notification.clone(),
        ));

        let mut pipeline =
            Pipeline::new(self.config.clone(), detector, store.clone(), dispatcher.clone())
                .with_privacy_filter(PrivacyFilter::new(self.exposure_classifier));
        if let Some(factory) = self.capture_factory {
            pipeline = pipeline.with_capture_factory(factory);
        }
        if let Some(factory) = self.posture_factory {
            pipeline = pipeline.with_posture_factory(factory);
        }
        if let Some(resolver) = self.resolver {
            pipeline = pipeline.with_recipient_resolver(resolver);
        }

        for camera in &self.config.cameras {
            pipeline.add_camera(
                CameraSource::new(camera.uri.clone(), camera.kind),
                camera.name.clone(),
            )?;
        }

        log::info!(
            "Monitor ready: {} cameras, fall detection {}, privacy protection {}",
            pipeline.num_cameras(),
            on_off(self.config.settings.fall_detection_enabled),
            on_off(self.config.settings.privacy_protection_enabled)
        );

        Ok(Monitor {
            slots: pipeline.slots().clone(),
            history: pipeline.history().clone(),
            toggles: pipeline.toggles().clone(),
            config: self.config,
            store,
            dispatcher,
            running: Arc::new(AtomicBool::new(false)),
            pipeline: Some(pipeline),
            worker: None,
            command_tx: None,
        })
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

pub struct Monitor {
    config: MonitorConfig,
    store: Arc<dyn UserStore>,
    dispatcher: Arc<NotificationDispatcher>,
    slots: Arc<FrameSlots>,
    history: Arc<MovementHistory>,
    toggles: Arc<RuntimeToggles>,
    running: Arc<AtomicBool>,
    /// Present while idle; moved into the worker thread while running
    pipeline: Option<Pipeline>,
    worker: Option<thread::JoinHandle<Pipeline>>,
    command_tx: Option<Sender<PipelineCommand>>,
}

impl Monitor {
    pub fn builder(config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder::new(config)
    }

    /// Start the notification workers and the pipeline thread
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }
        // the pipeline thread may have stopped on its own
        self.reap_worker();
        let pipeline = self.pipeline.take().ok_or_else(|| {
            MonitorError::initialization("pipeline thread panicked, rebuild the monitor")
        })?;

        match self.dispatcher.start() {
            Ok(()) | Err(MonitorError::AlreadyRunning) => {}
            Err(e) => {
                self.pipeline = Some(pipeline);
                return Err(e);
            }
        }

        let (command_tx, command_rx) = channel::unbounded();
        let running = self.running.clone();
        let tick_interval = self.config.tick_interval();
        running.store(true, Ordering::SeqCst);

        // the pipeline comes back through the join handle
        let worker = thread::Builder::new()
            .name("monitor-pipeline".to_string())
            .spawn(move || run_pipeline(pipeline, &command_rx, &running, tick_interval));
        match worker {
            Ok(handle) => {
                self.worker = Some(handle);
                self.command_tx = Some(command_tx);
                log::info!("Monitor started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.dispatcher.shutdown();
                Err(MonitorError::IoError(e))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the pipeline and the notification workers
    ///
    /// Returns the notifications that were still queued.
    pub fn stop(&mut self) -> Vec<NotificationMessage> {
        self.running.store(false, Ordering::SeqCst);
        let had_worker = self.worker.is_some();
        self.reap_worker();

        let unsent = self.dispatcher.shutdown();
        if had_worker {
            log::info!("Monitor stopped");
        }
        unsent
    }

    /// Join the pipeline thread and take the pipeline back
    fn reap_worker(&mut self) {
        self.command_tx = None;
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(pipeline) => self.pipeline = Some(pipeline),
                Err(_) => log::error!("Pipeline thread panicked, the pipeline is lost"),
            }
        }
    }

    /// Register a camera; a running pipeline picks it up on its next tick
    pub fn add_camera(
        &mut self,
        uri: &str,
        kind: SourceKind,
        name: Option<String>,
    ) -> Result<CameraId> {
        let source = CameraSource::new(uri, kind);
        if let Some(pipeline) = self.pipeline.as_mut() {
            return pipeline.add_camera(source, name);
        }

        let slot = self
            .slots
            .register(source, name, self.config.settings.max_cameras)?;
        let id = slot.id();
        if let Err(e) = self.send(PipelineCommand::AddCamera(slot)) {
            let _ = self.slots.unregister(id);
            return Err(e);
        }
        Ok(id)
    }

    pub fn remove_camera(&mut self, id: CameraId) -> Result<()> {
        if let Some(pipeline) = self.pipeline.as_mut() {
            return pipeline.remove_camera(id);
        }
        self.slots.unregister(id)?;
        // a pipeline thread that missed the command drops the camera when it next starts
        let _ = self.send(PipelineCommand::RemoveCamera(id));
        Ok(())
    }

    fn send(&self, command: PipelineCommand) -> Result<()> {
        self.command_tx
            .as_ref()
            .ok_or_else(|| MonitorError::other("pipeline is not available"))?
            .send(command)
            .map_err(|_| MonitorError::other("pipeline thread has exited"))
    }

    pub fn camera_info(&self) -> Vec<CameraInfo> {
        self.slots.infos()
    }

    /// Copy of the most recent processed frame of a camera
    pub fn latest_frame(&self, id: CameraId) -> Option<ProcessedFrame> {
        self.slots.latest(id)
    }

    pub fn movement_history(&self) -> Vec<MovementRecord> {
        self.history.snapshot()
    }

    pub fn set_fall_detection_enabled(&self, enabled: bool) {
        log::info!("Fall detection {}", on_off(enabled));
        self.toggles.set_fall_detection_enabled(enabled);
    }

    pub fn is_fall_detection_enabled(&self) -> bool {
        self.toggles.fall_detection_enabled()
    }

    pub fn set_privacy_protection_enabled(&self, enabled: bool) {
        log::info!("Privacy protection {}", on_off(enabled));
        self.toggles.set_privacy_protection_enabled(enabled);
    }

    pub fn is_privacy_protection_enabled(&self) -> bool {
        self.toggles.privacy_protection_enabled()
    }

    pub fn user_store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn on_response<F>(&self, callback: F)
    where
        F: Fn(&NotificationMessage) + Send + Sync + 'static,
    {
        self.dispatcher.on_response(callback);
    }

    pub fn subscribe(&self) -> Receiver<NotificationMessage> {
        self.dispatcher.subscribe()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the running flag however the pipeline thread exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn run_pipeline(
    mut pipeline: Pipeline,
    commands: &Receiver<PipelineCommand>,
    running: &AtomicBool,
    tick_interval: Duration,
) -> Pipeline {
    let _running = RunningGuard(running);
    pipeline.sync_with_slots();
    log::info!("Pipeline thread started ({} cameras)", pipeline.num_cameras());
    let mut ticks = 0_u64;

    while running.load(Ordering::SeqCst) {
        // a panicking detector or classifier stops the thread, the pipeline survives
        let step = panic::catch_unwind(AssertUnwindSafe(|| {
            while let Ok(command) = commands.try_recv() {
                pipeline.apply(command);
            }
            pipeline.tick();
        }));
        if step.is_err() {
            log::error!("Pipeline tick panicked after {} ticks, stopping", ticks);
            break;
        }
        ticks += 1;
        thread::sleep(tick_interval);
    }

    while let Ok(command) = commands.try_recv() {
        pipeline.apply(command);
    }
    log::info!("Pipeline thread stopped after {} ticks", ticks);
    pipeline
}
