//! Configuration for the monitoring pipeline
//!
//! Loaded from a JSON document of the form
//!
//! ```json
//! {
//!   "cameras": [{ "uri": "0", "type": "USB", "name": "Hallway" }],
//!   "settings": { "fallDetectionEnabled": true, "privacyProtectionEnabled": false },
//!   "fall": { "fallDurationSecs": 10.0 }
//! }
//! ```
//!
//! Every section and field is optional and falls back to its default.

use crate::camera::SourceKind;
use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One configured capture source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default)]
    pub name: Option<String>,
}

/// Pipeline-wide switches and timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineSettings {
    pub fall_detection_enabled: bool,
    pub privacy_protection_enabled: bool,
    /// Maximum number of simultaneously registered cameras
    pub max_cameras: usize,
    /// Pause between two pipeline ticks
    pub tick_interval_ms: u64,
    /// Wait before the single reconnect attempt after a failed read
    pub reconnect_backoff_ms: u64,
    /// How long movement history is kept
    pub history_retention_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fall_detection_enabled: true,
            privacy_protection_enabled: true,
            max_cameras: 4,
            tick_interval_ms: 30,
            reconnect_backoff_ms: 1000,
            history_retention_secs: 24 * 60 * 60,
        }
    }
}

/// Identity tracking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackingConfig {
    /// IoU a detection must exceed to continue an existing identity
    pub iou_threshold: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { iou_threshold: 0.3 }
    }
}

/// Fall state machine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallConfig {
    /// Time a person must stay on the ground before an alert is raised
    pub fall_duration_secs: f64,
    /// Width / height ratio above which a box counts as lying down
    pub aspect_ratio_threshold: f32,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            fall_duration_secs: 10.0,
            aspect_ratio_threshold: 1.5,
        }
    }
}

impl FallConfig {
    pub fn fall_duration(&self) -> Duration {
        Duration::from_secs_f64(self.fall_duration_secs)
    }
}

/// Notification dispatcher parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationConfig {
    /// Interval between two response checks
    pub response_poll_interval_secs: f64,
    /// How long an alert stays queryable after it was answered or failed
    pub completed_retention_secs: f64,
    pub email_subject: String,
    pub doctor_email_subject: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            response_poll_interval_secs: 5.0,
            completed_retention_secs: 3600.0,
            email_subject: "EMERGENCY ALERT: Fall Detected".to_string(),
            doctor_email_subject: "MEDICAL EMERGENCY ALERT: Fall Detected".to_string(),
        }
    }
}

impl NotificationConfig {
    pub fn response_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.response_poll_interval_secs)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs_f64(self.completed_retention_secs)
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cameras: Vec<CameraConfig>,
    pub settings: PipelineSettings,
    pub tracking: TrackingConfig,
    pub fall: FallConfig,
    pub notification: NotificationConfig,
}

impl MonitorConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        log::info!("Loading configuration from {}", path.display());
        Self::from_json_str(&contents)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !(self.tracking.iou_threshold > 0.0 && self.tracking.iou_threshold < 1.0) {
            return Err(MonitorError::config(format!(
                "iouThreshold must be in (0, 1), got {}",
                self.tracking.iou_threshold
            )));
        }
        if !positive(self.fall.fall_duration_secs) {
            return Err(MonitorError::config(format!(
                "fallDurationSecs must be positive, got {}",
                self.fall.fall_duration_secs
            )));
        }
        if !positive(self.fall.aspect_ratio_threshold as f64) {
            return Err(MonitorError::config(format!(
                "aspectRatioThreshold must be positive, got {}",
                self.fall.aspect_ratio_threshold
            )));
        }
        if !positive(self.notification.response_poll_interval_secs) {
            return Err(MonitorError::config(format!(
                "responsePollIntervalSecs must be positive, got {}",
                self.notification.response_poll_interval_secs
            )));
        }
        let retention = self.notification.completed_retention_secs;
        if !retention.is_finite() || retention < 0.0 {
            return Err(MonitorError::config(format!(
                "completedRetentionSecs must be zero or more, got {}",
                retention
            )));
        }
        if self.settings.max_cameras == 0 {
            return Err(MonitorError::config("maxCameras must be at least 1"));
        }
        if self.cameras.len() > self.settings.max_cameras {
            return Err(MonitorError::config(format!(
                "{} cameras configured, at most {} supported",
                self.cameras.len(),
                self.settings.max_cameras
            )));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.settings.tick_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.settings.reconnect_backoff_ms)
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.settings.history_retention_secs)
    }
}
