//! Deterministic stand-ins for the pipeline's external capabilities
//!
//! Every fake is cheap to clone and clones share state, so a test can keep
//! one handle for scripting and inspection while the pipeline owns another.

use crate::camera::{CaptureDevice, CaptureTarget};
use crate::detector_trait::Detector;
use crate::error::{CameraError, DetectionError, TransportError};
use crate::fall_detector::PostureClassifier;
use crate::notification::{MessageTransport, ResponseEvent};
use crate::privacy::ExposureClassifier;
use crate::types::{Detection, Frame};
use image::RgbImage;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

enum ReadStep {
    Frame(RgbImage),
    Fail,
}

#[derive(Default)]
struct CaptureState {
    reads: VecDeque<ReadStep>,
    /// Returned whenever the script is empty
    fallback: Option<RgbImage>,
    failing_opens: usize,
    opened: bool,
    open_calls: usize,
    release_calls: usize,
    requested: Option<(u32, u32, f64)>,
    last_target: Option<CaptureTarget>,
}

/// Capture device replaying a scripted sequence of frames and failures
#[derive(Clone, Default)]
pub struct ScriptedCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that yields copies of `image` forever
    pub fn repeating(image: RgbImage) -> Self {
        let capture = Self::new();
        lock(&capture.state).fallback = Some(image);
        capture
    }

    pub fn push_frame(&self, image: RgbImage) {
        lock(&self.state).reads.push_back(ReadStep::Frame(image));
    }

    pub fn push_read_failure(&self) {
        lock(&self.state).reads.push_back(ReadStep::Fail);
    }

    /// Make the next `count` open attempts fail
    pub fn fail_next_opens(&self, count: usize) {
        lock(&self.state).failing_opens = count;
    }

    /// Simulate the device going away without the session noticing
    pub fn close_device(&self) {
        lock(&self.state).opened = false;
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.state).open_calls
    }

    pub fn release_calls(&self) -> usize {
        lock(&self.state).release_calls
    }

    pub fn requested_format(&self) -> Option<(u32, u32, f64)> {
        lock(&self.state).requested
    }

    pub fn last_target(&self) -> Option<CaptureTarget> {
        lock(&self.state).last_target.clone()
    }
}

impl CaptureDevice for ScriptedCapture {
    fn open(&mut self, target: &CaptureTarget) -> Result<(), CameraError> {
        let mut state = lock(&self.state);
        state.open_calls += 1;
        state.last_target = Some(target.clone());
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            state.opened = false;
            return Err(CameraError::OpenFailed {
                uri: format!("{:?}", target),
                reason: "scripted failure".to_string(),
            });
        }
        state.opened = true;
        Ok(())
    }

    fn request_format(&mut self, width: u32, height: u32, fps: f64) {
        lock(&self.state).requested = Some((width, height, fps));
    }

    fn read(&mut self) -> Result<RgbImage, CameraError> {
        let mut state = lock(&self.state);
        if !state.opened {
            return Err(CameraError::ReadFailed("device not open".to_string()));
        }
        match state.reads.pop_front() {
            Some(ReadStep::Frame(image)) => Ok(image),
            Some(ReadStep::Fail) => Err(CameraError::ReadFailed("scripted failure".to_string())),
            None => state
                .fallback
                .clone()
                .ok_or_else(|| CameraError::ReadFailed("script exhausted".to_string())),
        }
    }

    fn release(&mut self) {
        let mut state = lock(&self.state);
        state.release_calls += 1;
        state.opened = false;
    }

    fn is_opened(&self) -> bool {
        lock(&self.state).opened
    }
}

#[derive(Default)]
struct DetectorState {
    script: VecDeque<Result<Vec<Detection>, DetectionError>>,
    fallback: Vec<Detection>,
    calls: usize,
}

/// Detector replaying scripted results, then a fixed fallback list
#[derive(Clone, Default)]
pub struct ScriptedDetector {
    state: Arc<Mutex<DetectorState>>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, detections: Vec<Detection>) {
        lock(&self.state).script.push_back(Ok(detections));
    }

    pub fn push_error(&self, error: DetectionError) {
        lock(&self.state).script.push_back(Err(error));
    }

    /// Returned on every call once the script is used up
    pub fn set_fallback(&self, detections: Vec<Detection>) {
        lock(&self.state).fallback = detections;
    }

    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let mut state = lock(&self.state);
        state.calls += 1;
        match state.script.pop_front() {
            Some(result) => result,
            None => Ok(state.fallback.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// One send recorded by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Sms { phone: String, body: String },
    Email { address: String, subject: String, body: String },
}

#[derive(Default)]
struct TransportState {
    sent: Vec<SentMessage>,
    sms_attempts: usize,
    email_attempts: usize,
    failing_phones: HashSet<String>,
    failing_emails: HashSet<String>,
    fail_all: bool,
    responses: VecDeque<ResponseEvent>,
    response_checks: usize,
}

/// Transport recording every send and replaying queued response events
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
    /// Sends wait while the flag is set
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sms_to<S: Into<String>>(&self, phone: S) {
        lock(&self.state).failing_phones.insert(phone.into());
    }

    pub fn fail_email_to<S: Into<String>>(&self, address: S) {
        lock(&self.state).failing_emails.insert(address.into());
    }

    pub fn fail_everything(&self) {
        lock(&self.state).fail_all = true;
    }

    /// Block every send after its attempt is counted, until released
    pub fn hold_sends(&self) {
        *lock(&self.gate.0) = true;
    }

    pub fn release_sends(&self) {
        *lock(&self.gate.0) = false;
        self.gate.1.notify_all();
    }

    fn wait_for_gate(&self) {
        let (held, released) = &*self.gate;
        let mut held = lock(held);
        while *held {
            held = released.wait(held).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Delivered on the next response check
    pub fn push_response(&self, event: ResponseEvent) {
        lock(&self.state).responses.push_back(event);
    }

    /// Successful sends in order
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn sms_count(&self) -> usize {
        self.sms_recipients().len()
    }

    pub fn email_count(&self) -> usize {
        self.email_subjects().len()
    }

    pub fn sms_recipients(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Sms { phone, .. } => Some(phone),
                SentMessage::Email { .. } => None,
            })
            .collect()
    }

    pub fn email_subjects(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SentMessage::Email { subject, .. } => Some(subject),
                SentMessage::Sms { .. } => None,
            })
            .collect()
    }

    pub fn sms_attempts(&self) -> usize {
        lock(&self.state).sms_attempts
    }

    pub fn email_attempts(&self) -> usize {
        lock(&self.state).email_attempts
    }

    pub fn response_checks(&self) -> usize {
        lock(&self.state).response_checks
    }
}

impl MessageTransport for RecordingTransport {
    fn send_sms(&self, phone: &str, body: &str) -> Result<(), TransportError> {
        lock(&self.state).sms_attempts += 1;
        self.wait_for_gate();
        let mut state = lock(&self.state);
        if state.fail_all || state.failing_phones.contains(phone) {
            return Err(TransportError::Sms {
                recipient: phone.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        state.sent.push(SentMessage::Sms {
            phone: phone.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn send_email(&self, address: &str, subject: &str, body: &str) -> Result<(), TransportError> {
        lock(&self.state).email_attempts += 1;
        self.wait_for_gate();
        let mut state = lock(&self.state);
        if state.fail_all || state.failing_emails.contains(address) {
            return Err(TransportError::Email {
                recipient: address.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        state.sent.push(SentMessage::Email {
            address: address.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn check_responses(&self) -> Result<Vec<ResponseEvent>, TransportError> {
        let mut state = lock(&self.state);
        state.response_checks += 1;
        Ok(state.responses.drain(..).collect())
    }
}

/// Posture classifier with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedPostureClassifier {
    lying: bool,
}

impl FixedPostureClassifier {
    pub fn new(lying: bool) -> Self {
        Self { lying }
    }
}

impl PostureClassifier for FixedPostureClassifier {
    fn classify(&mut self, _crop: &RgbImage) -> bool {
        self.lying
    }
}

/// Exposure classifier with a fixed answer
#[derive(Debug, Clone, Copy)]
pub struct FixedExposureClassifier {
    exposed: bool,
}

impl FixedExposureClassifier {
    pub fn new(exposed: bool) -> Self {
        Self { exposed }
    }
}

impl ExposureClassifier for FixedExposureClassifier {
    fn is_exposed(&mut self, _crop: &RgbImage) -> bool {
        self.exposed
    }
}
