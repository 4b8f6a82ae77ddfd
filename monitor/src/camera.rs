//! Camera sessions with reconnect-on-failure
//!
//! A `CameraSession` owns one capture device. Frames are pulled with
//! [`CameraSession::get_frame`], which reconnects a dropped device on demand
//! and never blocks longer than one back-off interval.

use crate::error::CameraError;
use crate::types::Frame;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;

#[cfg(feature = "opencv")]
use opencv::{
    core::Mat,
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, CAP_ANY},
};

/// Resolution and rate requested from every device after it opens
pub const REQUESTED_WIDTH: u32 = 1280;
pub const REQUESTED_HEIGHT: u32 = 720;
pub const REQUESTED_FPS: f64 = 30.0;

/// Kind of capture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    #[serde(rename = "USB")]
    Usb,
    #[serde(rename = "RTSP")]
    Rtsp,
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "MJPEG")]
    Mjpeg,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Usb => "USB",
            SourceKind::Rtsp => "RTSP",
            SourceKind::Http => "HTTP",
            SourceKind::Mjpeg => "MJPEG",
        };
        f.write_str(name)
    }
}

/// What a capture backend is asked to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureTarget {
    /// Local device index
    Device(i32),
    /// Network stream address
    Uri(String),
}

/// Source address plus kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSource {
    pub uri: String,
    pub kind: SourceKind,
}

impl CameraSource {
    pub fn new<S: Into<String>>(uri: S, kind: SourceKind) -> Self {
        Self {
            uri: uri.into(),
            kind,
        }
    }

    /// Resolve the capture target; USB sources must name a device index
    pub fn target(&self) -> Result<CaptureTarget, CameraError> {
        match self.kind {
            SourceKind::Usb => self
                .uri
                .trim()
                .parse::<i32>()
                .map(CaptureTarget::Device)
                .map_err(|_| CameraError::InvalidDeviceId(self.uri.clone())),
            SourceKind::Rtsp | SourceKind::Http | SourceKind::Mjpeg => {
                Ok(CaptureTarget::Uri(self.uri.clone()))
            }
        }
    }
}

/// Frame acquisition backend behind a session
pub trait CaptureDevice: Send {
    fn open(&mut self, target: &CaptureTarget) -> Result<(), CameraError>;

    /// Ask the device for a capture format. Devices may ignore it.
    fn request_format(&mut self, width: u32, height: u32, fps: f64);

    fn read(&mut self) -> Result<RgbImage, CameraError>;

    fn release(&mut self);

    fn is_opened(&self) -> bool;
}

/// Session over one capture source
pub struct CameraSession {
    source: CameraSource,
    device: Box<dyn CaptureDevice>,
    connected: bool,
    reconnect_backoff: Duration,
    next_frame_id: u64,
}

impl CameraSession {
    pub fn new(source: CameraSource, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            source,
            device,
            connected: false,
            reconnect_backoff: Duration::from_secs(1),
            next_frame_id: 0,
        }
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    /// Open the device. A failure leaves the session disconnected.
    pub fn connect(&mut self) -> Result<(), CameraError> {
        let target = match self.source.target() {
            Ok(target) => target,
            Err(e) => {
                log::warn!("Camera {}: {}", self.source.uri, e);
                self.connected = false;
                return Err(e);
            }
        };

        match self.device.open(&target) {
            Ok(()) => {
                self.device
                    .request_format(REQUESTED_WIDTH, REQUESTED_HEIGHT, REQUESTED_FPS);
                self.connected = true;
                log::info!("Camera connected: {} ({})", self.source.uri, self.source.kind);
                Ok(())
            }
            Err(e) => {
                log::warn!("Camera {} failed to connect: {}", self.source.uri, e);
                self.connected = false;
                Err(e)
            }
        }
    }

    /// Next frame, or `None` when the device is unavailable this tick
    ///
    /// A disconnected session tries one connect first. A failed read
    /// releases the device, waits the back-off interval and tries exactly
    /// one reconnect before returning `None`.
    pub fn get_frame(&mut self) -> Option<Frame> {
        if !self.is_connected() && self.connect().is_err() {
            return None;
        }

        match self.device.read() {
            Ok(image) => {
                let frame = Frame::new(self.next_frame_id, image);
                self.next_frame_id += 1;
                Some(frame)
            }
            Err(e) => {
                log::warn!("Camera {} read failed: {}", self.source.uri, e);
                self.disconnect();
                if !self.reconnect_backoff.is_zero() {
                    thread::sleep(self.reconnect_backoff);
                }
                let _ = self.connect();
                None
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.device.is_opened()
    }

    /// Release the device. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        if self.connected || self.device.is_opened() {
            self.device.release();
            log::info!("Camera disconnected: {}", self.source.uri);
        }
        self.connected = false;
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraSession")
            .field("source", &self.source)
            .field("connected", &self.connected)
            .field("reconnect_backoff", &self.reconnect_backoff)
            .finish()
    }
}

/// Device used when no capture backend is compiled in; never opens
#[derive(Debug, Default)]
pub struct NullCapture;

impl CaptureDevice for NullCapture {
    fn open(&mut self, _target: &CaptureTarget) -> Result<(), CameraError> {
        Err(CameraError::BackendUnavailable(
            "built without a capture backend".to_string(),
        ))
    }

    fn request_format(&mut self, _width: u32, _height: u32, _fps: f64) {}

    fn read(&mut self) -> Result<RgbImage, CameraError> {
        Err(CameraError::ReadFailed("no capture backend".to_string()))
    }

    fn release(&mut self) {}

    fn is_opened(&self) -> bool {
        false
    }
}

#[cfg(feature = "opencv")]
/// OpenCV `VideoCapture` backend
#[derive(Default)]
pub struct OpenCvCapture {
    cap: Option<VideoCapture>,
}

#[cfg(feature = "opencv")]
impl OpenCvCapture {
    pub fn new() -> Self {
        Self { cap: None }
    }

    /// Convert a BGR Mat to an RgbImage
    fn mat_to_rgb_image(mat: &Mat) -> Result<RgbImage, CameraError> {
        let width = mat.cols() as u32;
        let height = mat.rows() as u32;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color_def(mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB)
            .map_err(|e| CameraError::ReadFailed(format!("color conversion failed: {}", e)))?;

        let data = rgb_mat
            .data_bytes()
            .map_err(|e| CameraError::ReadFailed(format!("failed to get image data: {}", e)))?
            .to_vec();

        RgbImage::from_vec(width, height, data)
            .ok_or_else(|| CameraError::ReadFailed("frame buffer size mismatch".to_string()))
    }
}

#[cfg(feature = "opencv")]
impl CaptureDevice for OpenCvCapture {
    fn open(&mut self, target: &CaptureTarget) -> Result<(), CameraError> {
        let (uri, cap) = match target {
            CaptureTarget::Device(index) => (index.to_string(), VideoCapture::new(*index, CAP_ANY)),
            CaptureTarget::Uri(uri) => (uri.clone(), VideoCapture::from_file(uri, CAP_ANY)),
        };
        let cap = cap.map_err(|e| CameraError::OpenFailed {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;

        let opened = cap.is_opened().map_err(|e| CameraError::OpenFailed {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;
        if !opened {
            return Err(CameraError::OpenFailed {
                uri,
                reason: "device did not open".to_string(),
            });
        }

        self.cap = Some(cap);
        Ok(())
    }

    fn request_format(&mut self, width: u32, height: u32, fps: f64) {
        if let Some(cap) = self.cap.as_mut() {
            let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64);
            let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64);
            let _ = cap.set(videoio::CAP_PROP_FPS, fps);
        }
    }

    fn read(&mut self) -> Result<RgbImage, CameraError> {
        let cap = self
            .cap
            .as_mut()
            .ok_or_else(|| CameraError::ReadFailed("device not open".to_string()))?;

        let mut mat = Mat::default();
        let grabbed = cap
            .read(&mut mat)
            .map_err(|e| CameraError::ReadFailed(e.to_string()))?;
        if !grabbed || mat.empty() {
            return Err(CameraError::ReadFailed("empty frame".to_string()));
        }

        Self::mat_to_rgb_image(&mat)
    }

    fn release(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            let _ = cap.release();
        }
    }

    fn is_opened(&self) -> bool {
        self.cap
            .as_ref()
            .map(|cap| cap.is_opened().unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Capture device for the compiled-in backend
pub fn default_capture() -> Box<dyn CaptureDevice> {
    #[cfg(feature = "opencv")]
    {
        Box::new(OpenCvCapture::new())
    }
    #[cfg(not(feature = "opencv"))]
    {
        Box::new(NullCapture)
    }
}
