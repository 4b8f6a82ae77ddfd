//! Type definitions shared across the monitoring pipeline

use image::{Rgb, RgbImage};
use ioutrack::Bbox;
use serde::{Deserialize, Serialize};
use std::time::{Instant, SystemTime};

/// Identity id assigned by a camera's tracker
pub type PersonId = u64;

/// Key of a registered user in the user store
pub type UserId = u32;

/// Handle of a camera registered with the monitor
pub type CameraId = uuid::Uuid;

/// Bounding box in pixel coordinates (top-left corner plus extent)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Integer pixel rectangle fully inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Create new bounding box
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get center point coordinates
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Get area of bounding box
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Width over height; zero when the box has no height
    pub fn aspect_ratio(&self) -> f32 {
        self.to_bbox().aspect_ratio()
    }

    /// Corner representation used by the tracker
    pub fn to_bbox(&self) -> Bbox<f32> {
        Bbox::from_xywh(self.x, self.y, self.width, self.height)
    }

    pub fn from_bbox(bbox: &Bbox<f32>) -> Self {
        Self::new(bbox.xmin, bbox.ymin, bbox.width(), bbox.height())
    }

    /// Calculate intersection over union (IoU) with another bounding box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        ioutrack::calculate_iou(&self.to_bbox(), &other.to_bbox())
    }

    /// Intersect with a `frame_width` x `frame_height` frame
    ///
    /// Returns `None` when nothing of the box lies inside the frame.
    pub fn clip_to(&self, frame_width: u32, frame_height: u32) -> Option<PixelRect> {
        if !self.to_bbox().is_valid() {
            return None;
        }
        let x1 = self.x.max(0.0).floor();
        let y1 = self.y.max(0.0).floor();
        let x2 = (self.x + self.width).min(frame_width as f32).floor();
        let y2 = (self.y + self.height).min(frame_height as f32).floor();

        if x2 <= x1 || y2 <= y1 {
            return None;
        }

        Some(PixelRect {
            x: x1 as u32,
            y: y1 as u32,
            width: (x2 - x1) as u32,
            height: (y2 - y1) as u32,
        })
    }
}

/// A captured frame with metadata
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub image: RgbImage,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(frame_id: u64, image: RgbImage) -> Self {
        Self {
            frame_id,
            image,
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy out the region of `bbox` clipped to the frame
    pub fn crop(&self, bbox: &BoundingBox) -> Option<RgbImage> {
        let rect = bbox.clip_to(self.width(), self.height())?;
        let view = image::imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height);
        Some(view.to_image())
    }
}

/// Single person detection
#[derive(Debug, Clone)]
pub struct Detection {
    /// Detection confidence score (0-1)
    pub confidence: f32,
    /// Bounding box in pixels
    pub bbox: BoundingBox,
    /// Cropped appearance patch, when the detector provides one
    pub appearance: Option<RgbImage>,
}

impl Detection {
    /// Create new detection
    pub fn new(confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            confidence,
            bbox,
            appearance: None,
        }
    }

    pub fn with_appearance(mut self, appearance: RgbImage) -> Self {
        self.appearance = Some(appearance);
        self
    }
}

/// A person re-identified across consecutive frames
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedIdentity {
    pub id: PersonId,
    pub bbox: BoundingBox,
    pub color: Rgb<u8>,
    pub display_name: Option<String>,
    pub confidence: f32,
}

/// An ongoing fall episode for one identity
#[derive(Debug, Clone)]
pub struct FallEvent {
    pub person_id: PersonId,
    pub start_time: Instant,
    /// Wall-clock time of the episode start, for messages and logs
    pub started_at: SystemTime,
    pub alerted: bool,
    pub snapshot: Option<RgbImage>,
    pub last_known_position: BoundingBox,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_bounding_box_geometry() {
        let bbox = BoundingBox::new(10.0, 20.0, 30.0, 10.0);
        assert_eq!(bbox.center(), (25.0, 25.0));
        assert_eq!(bbox.area(), 300.0);
        assert_abs_diff_eq!(bbox.aspect_ratio(), 3.0);
    }

    #[test]
    fn test_iou_matches_tracker_geometry() {
        let a = BoundingBox::new(10.0, 10.0, 50.0, 100.0);
        let b = BoundingBox::new(12.0, 11.0, 49.0, 99.0);
        assert!(a.iou(&b) > 0.3);
        assert_abs_diff_eq!(a.iou(&a), 1.0, epsilon = 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(500.0, 500.0, 50.0, 100.0)), 0.0);
    }

    #[test]
    fn test_clip_to_frame() {
        let bbox = BoundingBox::new(-10.0, 5.0, 50.0, 500.0);
        let rect = bbox.clip_to(100, 100).unwrap();
        assert_eq!(rect, PixelRect { x: 0, y: 5, width: 40, height: 95 });

        assert!(BoundingBox::new(200.0, 200.0, 10.0, 10.0).clip_to(100, 100).is_none());
        assert!(BoundingBox::new(10.0, 10.0, 0.0, 10.0).clip_to(100, 100).is_none());
    }

    #[test]
    fn test_frame_crop() {
        let frame = Frame::new(0, RgbImage::new(64, 48));
        let crop = frame.crop(&BoundingBox::new(60.0, 40.0, 20.0, 20.0)).unwrap();
        assert_eq!(crop.dimensions(), (4, 8));
    }
}
