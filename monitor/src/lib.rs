//! Fall Monitoring Library
//!
//! Watches up to four live cameras, follows every person across frames,
//! recognises a prolonged on-ground posture as a fall and alerts the
//! emergency contacts of the monitored users, tracking their responses.
//!
//! Detection models, posture and exposure classifiers, the user database and
//! the SMS / email gateway are capabilities plugged in through traits; see
//! [`MonitorBuilder`].

pub mod camera;
pub mod config;
pub mod detector_stub;
pub mod detector_trait;
pub mod error;
pub mod fakes;
pub mod fall_detector;
pub mod frame_slots;
pub mod history;
pub mod image_utils;
pub mod monitor;
pub mod notification;
pub mod pipeline;
pub mod postprocessing;
pub mod privacy;
pub mod store;
pub mod tracking;
pub mod types;

pub use camera::{CameraSession, CameraSource, CaptureDevice, SourceKind};
pub use config::MonitorConfig;
pub use detector_stub::StubDetector;
pub use detector_trait::Detector;
pub use error::{CameraError, DetectionError, MonitorError, Result, TransportError};
pub use fall_detector::{FallStateMachine, PostureClassifier, PosturePredicate};
pub use frame_slots::{CameraInfo, ProcessedFrame};
pub use monitor::{Monitor, MonitorBuilder};
pub use notification::{
    MessageTransport, NotificationDispatcher, NotificationMessage, NotificationStatus,
    ResponseEvent,
};
pub use pipeline::{BroadcastToAllUsers, Pipeline, RecipientResolver, TickReport};
pub use privacy::{ExposureClassifier, PrivacyFilter};
pub use store::{Doctor, EmergencyContact, InMemoryUserStore, User, UserStore};
pub use tracking::IdentityTracker;
pub use types::{
    BoundingBox, CameraId, Detection, FallEvent, Frame, PersonId, TrackedIdentity, UserId,
};

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Name of the capture backend compiled in
pub fn capture_backend() -> &'static str {
    if cfg!(feature = "opencv") {
        "opencv"
    } else {
        "none"
    }
}
