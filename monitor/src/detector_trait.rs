//! Person detection capability
//!
//! The pipeline works with any model as long as it implements this
//! interface. Implementations return persons only, after non-maximum
//! suppression; see [`crate::postprocessing::filter_persons`].

use crate::error::DetectionError;
use crate::types::{Detection, Frame};

/// Common interface for person detectors
pub trait Detector: Send {
    /// Detect persons in a single frame
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;

    /// Get the detector name (for logging/debugging)
    fn name(&self) -> &str;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        (**self).detect(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
