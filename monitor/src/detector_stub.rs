// Placeholder detector used when no model is wired in.
// Every call fails with `ModelUnavailable`, which the pipeline treats as
// "no persons in frame", so cameras and notifications still run.

use crate::detector_trait::Detector;
use crate::error::DetectionError;
use crate::types::{Detection, Frame};

/// Detector without a model
#[derive(Debug, Default)]
pub struct StubDetector {
    warned: bool,
}

impl StubDetector {
    pub fn new() -> Self {
        log::info!("Creating stub detector (no detection model configured)");
        Self { warned: false }
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        if !self.warned {
            log::warn!("Stub detector in use - no actual detection performed");
            self.warned = true;
        }
        Err(DetectionError::model_unavailable("no detection model configured"))
    }

    fn name(&self) -> &str {
        "stub"
    }
}
