//! Privacy filter
//!
//! Persons flagged by an [`ExposureClassifier`] get two horizontal bands of
//! their box blurred: 25-45 % and 60-80 % of the box height. The filter
//! always returns a new frame and leaves its input untouched.

use crate::image_utils::blur_region;
use crate::types::{Frame, PixelRect, TrackedIdentity};
use image::RgbImage;

/// Fractions of the person box height covered by the blurred bands
const SENSITIVE_BANDS: [(f32, f32); 2] = [(0.25, 0.2), (0.6, 0.2)];

/// Decides whether a person crop needs obscuring
pub trait ExposureClassifier: Send {
    fn is_exposed(&mut self, crop: &RgbImage) -> bool;
}

/// Obscures one rectangle of an image in place
pub trait RegionBlur: Send {
    fn blur(&self, image: &mut RgbImage, rect: &PixelRect);
}

/// Gaussian blur over the region
#[derive(Debug, Clone, Copy)]
pub struct GaussianRegionBlur {
    pub sigma: f32,
}

impl Default for GaussianRegionBlur {
    fn default() -> Self {
        Self { sigma: 5.0 }
    }
}

impl RegionBlur for GaussianRegionBlur {
    fn blur(&self, image: &mut RgbImage, rect: &PixelRect) {
        blur_region(image, rect, self.sigma);
    }
}

/// Bands of `person` (already clipped to the frame) that get obscured
pub fn sensitive_bands(person: &PixelRect) -> Vec<PixelRect> {
    SENSITIVE_BANDS
        .iter()
        .map(|(offset, height)| PixelRect {
            x: person.x,
            y: person.y + (person.height as f32 * offset) as u32,
            width: person.width,
            height: (person.height as f32 * height) as u32,
        })
        .filter(|band| band.width > 0 && band.height > 0)
        .collect()
}

pub struct PrivacyFilter {
    classifier: Option<Box<dyn ExposureClassifier>>,
    blur: Box<dyn RegionBlur>,
}

impl Default for PrivacyFilter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PrivacyFilter {
    pub fn new(classifier: Option<Box<dyn ExposureClassifier>>) -> Self {
        Self::with_blur(classifier, Box::new(GaussianRegionBlur::default()))
    }

    pub fn with_blur(
        classifier: Option<Box<dyn ExposureClassifier>>,
        blur: Box<dyn RegionBlur>,
    ) -> Self {
        Self { classifier, blur }
    }

    /// A filter without classifier passes frames through unchanged
    pub fn is_available(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn apply(&mut self, frame: &Frame, identities: &[TrackedIdentity]) -> Frame {
        let mut output = frame.clone();
        let Some(classifier) = self.classifier.as_mut() else {
            return output;
        };

        for identity in identities {
            let Some(rect) = identity.bbox.clip_to(frame.width(), frame.height()) else {
                continue;
            };
            let crop =
                image::imageops::crop_imm(&frame.image, rect.x, rect.y, rect.width, rect.height)
                    .to_image();
            if !classifier.is_exposed(&crop) {
                continue;
            }
            log::debug!("Obscuring person {}", identity.id);
            for band in sensitive_bands(&rect) {
                self.blur.blur(&mut output.image, &band);
            }
        }

        output
    }
}
