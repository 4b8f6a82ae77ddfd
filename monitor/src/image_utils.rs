//! Image utilities for coloring, drawing and obscuring tracked persons

use crate::types::{PersonId, PixelRect, TrackedIdentity};
use image::{Rgb, RgbImage};
use std::collections::HashSet;

/// HSV to RGB with hue in degrees and saturation/value in [0, 1]
pub fn hsv_to_rgb(hue_degrees: f32, saturation: f32, value: f32) -> Rgb<u8> {
    let hue = hue_degrees.rem_euclid(360.0);
    let c = value * saturation;
    let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = value - c;

    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    Rgb([
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    ])
}

/// Draw a rectangle outline with the given thickness
///
/// Zero-sized rectangles are skipped; parts outside the image are clipped.
pub fn draw_rect(
    img: &mut RgbImage,
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    color: Rgb<u8>,
    thickness: i32,
) {
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;

    if width == 0 || height == 0 {
        log::trace!("Skipping zero-sized rect at ({}, {})", x, y);
        return;
    }

    for offset in 0..thickness.max(1) {
        let grow = 2 * u64::from(offset.unsigned_abs());
        let horizontal = clip_span(
            i64::from(x) - i64::from(offset),
            u64::from(width) + grow,
            img.width(),
        );
        let vertical = clip_span(
            i64::from(y) - i64::from(offset),
            u64::from(height) + grow,
            img.height(),
        );
        let (Some((left, w)), Some((top, h))) = (horizontal, vertical) else {
            continue;
        };
        draw_hollow_rect_mut(img, Rect::at(left, top).of_size(w, h), color);
    }
}

/// Clip a span to one pixel past each image border
///
/// Edges outside the image stay outside, so the visible outline is unchanged,
/// and imageproc never sees coordinates beyond `i32`.
fn clip_span(start: i64, extent: u64, limit: u32) -> Option<(i32, u32)> {
    let end = start + extent as i64 - 1;
    let lo = start.max(-1);
    let hi = end.min(i64::from(limit));
    if hi < lo {
        return None;
    }
    Some((lo as i32, (hi - lo + 1) as u32))
}

/// Outline every identity in its own color; fallen persons get a thick red box
pub fn draw_identities(
    img: &mut RgbImage,
    identities: &[TrackedIdentity],
    fallen: &HashSet<PersonId>,
) {
    for identity in identities {
        let bbox = &identity.bbox;
        if bbox.width <= 0.0 || bbox.height <= 0.0 {
            continue;
        }
        let (color, thickness) = if fallen.contains(&identity.id) {
            (Rgb([255, 0, 0]), 4)
        } else {
            (identity.color, 2)
        };
        draw_rect(
            img,
            bbox.x.round() as i32,
            bbox.y.round() as i32,
            bbox.width.round() as u32,
            bbox.height.round() as u32,
            color,
            thickness,
        );
    }
}

/// Gaussian-blur one region of the image in place
pub fn blur_region(img: &mut RgbImage, rect: &PixelRect, sigma: f32) {
    if rect.width == 0 || rect.height == 0 {
        return;
    }
    let region = image::imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image();
    let blurred = image::imageops::blur(&region, sigma);
    image::imageops::replace(img, &blurred, rect.x as i64, rect.y as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;

    #[test]
    fn test_hsv_primary_colors() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb([255, 0, 0]));
        assert_eq!(hsv_to_rgb(60.0, 1.0, 1.0), Rgb([255, 255, 0]));
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb([0, 255, 0]));
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Rgb([0, 0, 255]));
        assert_eq!(hsv_to_rgb(360.0, 1.0, 1.0), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut img = RgbImage::new(20, 20);
        draw_rect(&mut img, 5, 5, 10, 10, Rgb([0, 255, 0]), 1);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 255, 0]));
        assert_eq!(*img.get_pixel(14, 10), Rgb([0, 255, 0]));
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_rect_larger_than_image() {
        let mut img = RgbImage::new(20, 20);
        draw_rect(&mut img, 5, 5, u32::MAX, u32::MAX, Rgb([255, 0, 0]), 4);
        assert_eq!(*img.get_pixel(5, 5), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(19, 5), Rgb([255, 0, 0]));
        // far edges are off-image
        assert_eq!(*img.get_pixel(19, 19), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));

        let mut img = RgbImage::new(20, 20);
        draw_rect(&mut img, i32::MIN, 3, u32::MAX, 4, Rgb([0, 255, 0]), 2);
        assert_eq!(*img.get_pixel(0, 3), Rgb([0, 255, 0]));
        assert_eq!(*img.get_pixel(0, 5), Rgb([0, 0, 0]));
        draw_rect(&mut img, 100, 100, 10, 10, Rgb([0, 255, 0]), 2);
    }

    #[test]
    fn test_clip_span() {
        assert_eq!(clip_span(5, 10, 20), Some((5, 10)));
        assert_eq!(clip_span(-30, 100, 20), Some((-1, 22)));
        assert_eq!(clip_span(25, 10, 20), None);
        assert_eq!(clip_span(-30, 5, 20), None);
    }

    #[test]
    fn test_draw_identities_marks_fallen_in_red() {
        let mut img = RgbImage::new(50, 50);
        let identity = TrackedIdentity {
            id: 3,
            bbox: BoundingBox::new(10.0, 10.0, 20.0, 10.0),
            color: Rgb([0, 0, 255]),
            display_name: None,
            confidence: 0.9,
        };
        draw_identities(&mut img, &[identity.clone()], &HashSet::new());
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 255]));

        let fallen: HashSet<PersonId> = [3].into_iter().collect();
        draw_identities(&mut img, &[identity], &fallen);
        assert_eq!(*img.get_pixel(10, 10), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_blur_region_leaves_outside_untouched() {
        let mut img = RgbImage::from_fn(40, 40, |x, _| {
            if x % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let original = img.clone();
        let rect = PixelRect { x: 10, y: 10, width: 10, height: 10 };
        blur_region(&mut img, &rect, 3.0);

        assert_eq!(img.get_pixel(0, 0), original.get_pixel(0, 0));
        assert_eq!(img.get_pixel(30, 30), original.get_pixel(30, 30));
        // stripes inside the region are smoothed towards gray
        let inside = img.get_pixel(15, 15)[0];
        assert!(inside > 40 && inside < 215);
    }
}
