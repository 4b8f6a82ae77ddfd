use ioutrack::{Bbox, ContinuityTracker, MultiObjectTracker};

fn main() {
    println!("Testing ContinuityTracker...");

    let mut tracker = ContinuityTracker::new(0.3);

    // Frame 1: two people standing, one far away
    let frame1 = [
        Bbox::from_xywh(10.0, 10.0, 50.0, 100.0),
        Bbox::from_xywh(200.0, 20.0, 45.0, 110.0),
    ];
    for t in tracker.update(&frame1) {
        println!("  Track ID {}: {}", t.track_id, t.bbox);
    }

    // Frame 2: both moved slightly, a third person enters
    let frame2 = [
        Bbox::from_xywh(203.0, 21.0, 45.0, 110.0),
        Bbox::from_xywh(12.0, 11.0, 49.0, 99.0),
        Bbox::from_xywh(500.0, 500.0, 50.0, 100.0),
    ];
    for t in tracker.update(&frame2) {
        println!("  Track ID {} (det #{}): {}", t.track_id, t.det_idx, t.bbox);
    }

    // Frame 3: nobody visible, every identity ends
    tracker.update(&[]);
    println!(
        "Frame 3: {} tracks after {} steps",
        tracker.num_tracklets(),
        tracker.get_step_count()
    );
}
