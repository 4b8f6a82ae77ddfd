//! Pure Rust IOU-based tracking library
//!
//! Box geometry, parallel IoU matrices and frame-to-frame identity tracking.
//!
//! ```rust
//! use ioutrack::{Bbox, ContinuityTracker, MultiObjectTracker};
//!
//! let mut tracker: Box<dyn MultiObjectTracker> = Box::new(ContinuityTracker::new(0.3));
//! let first = tracker.update(&[Bbox::from_xywh(10.0, 10.0, 50.0, 100.0)]);
//! let second = tracker.update(&[Bbox::from_xywh(12.0, 11.0, 49.0, 99.0)]);
//! assert_eq!(first[0].track_id, second[0].track_id);
//! ```

pub mod bbox;
pub mod trackers;

pub use bbox::{calculate_iou, ious, Bbox};
pub use trackers::{ContinuityTracker, MultiObjectTracker, TrackedBox};
