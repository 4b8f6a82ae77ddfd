/// Simulated fall, end to end
///
/// Drives the pipeline with a scripted camera and detector: a person walks
/// in, lies down and stays there. After the (shortened) fall duration the
/// contacts are alerted through a recording transport, and a scripted reply
/// completes the alert.
///
/// Usage:
///   cargo run --example simulated_fall
use anyhow::Context;
use env_logger::Env;
use fall_monitor::fakes::{RecordingTransport, ScriptedCapture, ScriptedDetector, SentMessage};
use fall_monitor::notification::{EventKind, ResponseEvent};
use fall_monitor::{
    BoundingBox, CameraSource, CaptureDevice, Detection, Doctor, EmergencyContact,
    InMemoryUserStore, Monitor, MonitorConfig, SourceKind, User,
};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut config = MonitorConfig::default();
    config.fall.fall_duration_secs = 1.0;
    config.notification.response_poll_interval_secs = 0.2;

    let store = InMemoryUserStore::new();
    let user_id = store.add_user(
        User::new("Margaret")
            .with_contact(
                EmergencyContact::new("Tom")
                    .with_phone("+15550100")
                    .with_relationship("son"),
            )
            .with_doctor(Doctor::new("Dr. Patel").with_email("patel@clinic.example")),
    );

    let capture = ScriptedCapture::repeating(RgbImage::from_pixel(640, 480, Rgb([40, 40, 40])));
    let detector = ScriptedDetector::new();
    let transport = RecordingTransport::new();

    // walking towards the camera, then down
    for step in 0..10 {
        let x = 100.0 + step as f32 * 15.0;
        detector.push(vec![Detection::new(0.9, BoundingBox::new(x, 150.0, 70.0, 200.0))]);
    }
    detector.set_fallback(vec![Detection::new(0.85, BoundingBox::new(220.0, 280.0, 210.0, 70.0))]);

    let mut monitor = Monitor::builder(config)
        .user_store(Arc::new(store))
        .transport(Arc::new(transport.clone()))
        .detector(Box::new(detector))
        .capture_factory(Box::new(move |_: &CameraSource| -> Box<dyn CaptureDevice> {
            Box::new(capture.clone())
        }))
        .build()?;
    let camera = monitor.add_camera("0", SourceKind::Usb, Some("Living room".to_string()))?;
    let responses = monitor.subscribe();
    monitor.start()?;

    while transport.sent().len() < 2 {
        thread::sleep(Duration::from_millis(50));
    }
    for message in transport.sent() {
        match message {
            SentMessage::Sms { phone, .. } => println!("SMS sent to {}", phone),
            SentMessage::Email { address, subject, .. } => {
                println!("Email sent to {} ({})", address, subject)
            }
        }
    }

    // lying down changes the box too much to keep the walking identity
    let person_id = monitor
        .latest_frame(camera)
        .and_then(|frame| frame.fallen.first().copied())
        .context("no fallen person on camera")?;
    println!("Person {} is down", person_id);

    transport.push_response(ResponseEvent::new(user_id, person_id, EventKind::Delivered));
    transport.push_response(ResponseEvent::new(
        user_id,
        person_id,
        EventKind::Replied {
            body: "Coming over now".to_string(),
        },
    ));
    let reply = responses.recv_timeout(Duration::from_secs(5))?;
    println!(
        "Alert answered: {}",
        reply.response_body.as_deref().unwrap_or("")
    );

    println!("{} movement records", monitor.movement_history().len());
    monitor.stop();
    Ok(())
}
