//! Bounding box operations and IoU calculations

use ndarray::prelude::*;
use rayon::prelude::*;
use std::fmt;

/// Simple bounding box representation
#[derive(Debug, Clone, PartialEq)]
pub struct Bbox<T = f32> {
    pub xmin: T,
    pub ymin: T,
    pub xmax: T,
    pub ymax: T,
}

impl Bbox<f32> {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Create from top-left corner plus width and height
    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    /// Width divided by height, zero for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        let h = self.height();
        if h > 0.0 {
            self.width() / h
        } else {
            0.0
        }
    }

    /// Convert to bounds array [xmin, ymin, xmax, ymax]
    pub fn to_bounds(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    /// A box is usable for matching when all bounds are finite and it has positive extent
    pub fn is_valid(&self) -> bool {
        self.to_bounds().iter().all(|v| v.is_finite())
            && self.xmin < self.xmax
            && self.ymin < self.ymax
    }
}

impl<T: fmt::Display> fmt::Display for Bbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({}, {}, {}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// Calculate IoU between two bounding boxes
pub fn calculate_iou(bbox1: &Bbox<f32>, bbox2: &Bbox<f32>) -> f32 {
    let x1 = bbox1.xmin.max(bbox2.xmin);
    let y1 = bbox1.ymin.max(bbox2.ymin);
    let x2 = bbox1.xmax.min(bbox2.xmax);
    let y2 = bbox1.ymax.min(bbox2.ymax);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let union = bbox1.area() + bbox2.area() - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Stack boxes into an (n, 4) bounds array
pub fn boxes_to_array(boxes: &[Bbox<f32>]) -> Array2<f32> {
    let mut data = Vec::with_capacity(boxes.len() * 4);
    for bbox in boxes {
        data.extend_from_slice(&bbox.to_bounds());
    }
    Array2::from_shape_vec((boxes.len(), 4), data).unwrap_or_else(|_| Array2::zeros((0, 4)))
}

/// Compute IoU matrix between detections and tracks with parallel processing
/// Returns: (n_detections, n_tracks) IoU matrix
pub fn ious(detections: ArrayView2<f32>, tracks: ArrayView2<f32>) -> Array2<f32> {
    let n_dets = detections.nrows();
    let n_tracks = tracks.nrows();

    if n_dets == 0 || n_tracks == 0 {
        return Array2::zeros((n_dets, n_tracks));
    }

    let iou_data: Vec<f32> = (0..n_dets)
        .into_par_iter()
        .flat_map(|i| {
            let det_row = detections.row(i);
            if det_row.len() < 4 {
                return vec![0.0; n_tracks];
            }
            let det_bbox = Bbox::new(det_row[0], det_row[1], det_row[2], det_row[3]);

            (0..n_tracks)
                .map(|j| {
                    let track_row = tracks.row(j);
                    if track_row.len() < 4 {
                        return 0.0;
                    }
                    let track_bbox =
                        Bbox::new(track_row[0], track_row[1], track_row[2], track_row[3]);
                    calculate_iou(&det_bbox, &track_bbox)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Array2::from_shape_vec((n_dets, n_tracks), iou_data)
        .unwrap_or_else(|_| Array2::zeros((n_dets, n_tracks)))
}
