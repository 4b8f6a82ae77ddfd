//! Error types for the fall monitoring pipeline
//!
//! Component-local failures (`CameraError`, `DetectionError`,
//! `TransportError`) are absorbed by the component that sees them and show up
//! as state: a disconnected camera, an empty detection list, a failed message.
//! Only `MonitorError` crosses the public API boundary.

use thiserror::Error;

/// Result type alias for the monitoring library
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Camera acquisition failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Invalid local device id: {0}")]
    InvalidDeviceId(String),

    #[error("Failed to open camera {uri}: {reason}")]
    OpenFailed { uri: String, reason: String },

    #[error("Frame read failed: {0}")]
    ReadFailed(String),

    #[error("Capture backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Person detection failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("Detection model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    InferenceError(String),
}

/// Message transport failures, one per channel attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("SMS to {recipient} failed: {reason}")]
    Sms { recipient: String, reason: String },

    #[error("Email to {recipient} failed: {reason}")]
    Email { recipient: String, reason: String },

    #[error("Response check failed: {0}")]
    ResponseCheck(String),
}

/// Errors surfaced to callers of the monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization failed: {0}")]
    InitializationError(String),

    #[error("Camera limit reached: at most {max} cameras")]
    CameraLimit { max: usize },

    #[error("Unknown camera: {0}")]
    UnknownCamera(String),

    #[error("Unknown user: {0}")]
    UnknownUser(u32),

    #[error("User {user} has no emergency contact #{index}")]
    UnknownContact { user: u32, index: usize },

    #[error("Monitor is already running")]
    AlreadyRunning,

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl MonitorError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn initialization<S: Into<String>>(msg: S) -> Self {
        Self::InitializationError(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

impl DetectionError {
    pub fn model_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceError(msg.into())
    }
}
