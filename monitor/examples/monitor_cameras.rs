/// Live camera monitoring
///
/// Opens the cameras listed in a config file through OpenCV and runs the
/// monitoring pipeline, printing camera status and alert responses. No
/// detection model is wired in here, so persons are only reported once a
/// real `Detector` replaces the stub.
///
/// Usage:
///   cargo run --release --features opencv --example monitor_cameras -- <config.json> [users.json] [--seconds N]
///
/// Config:
///   { "cameras": [{ "uri": "0", "type": "USB", "name": "Hallway" }],
///     "settings": { "privacyProtectionEnabled": false } }
use anyhow::Context;
use env_logger::Env;
use fall_monitor::{InMemoryUserStore, Monitor, MonitorConfig};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut positional = Vec::new();
    let mut run_for = Duration::from_secs(60);
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--seconds" {
            let secs: u64 = args
                .get(i + 1)
                .context("--seconds needs a value")?
                .parse()
                .context("--seconds must be a whole number")?;
            run_for = Duration::from_secs(secs);
            i += 2;
        } else {
            positional.push(args[i].clone());
            i += 1;
        }
    }

    let config_path = positional
        .first()
        .context("usage: monitor_cameras <config.json> [users.json] [--seconds N]")?;
    let config = MonitorConfig::from_json_file(config_path)
        .with_context(|| format!("loading {}", config_path))?;

    let store = match positional.get(1) {
        Some(path) => InMemoryUserStore::from_json_file(path)
            .with_context(|| format!("loading users from {}", path))?,
        None => InMemoryUserStore::new(),
    };
    println!(
        "fall-monitor {} ({} capture), {} users",
        fall_monitor::version(),
        fall_monitor::capture_backend(),
        store.len()
    );

    let mut monitor = Monitor::builder(config).user_store(Arc::new(store)).build()?;
    monitor.on_response(|message| {
        println!(
            "Response from contact of user {}: {}",
            message.recipient_user_id,
            message.response_body.as_deref().unwrap_or("")
        );
    });
    monitor.start()?;

    let started = Instant::now();
    while started.elapsed() < run_for {
        thread::sleep(Duration::from_secs(5));
        for camera in monitor.camera_info() {
            let persons = monitor
                .latest_frame(camera.id)
                .map(|frame| frame.identities.len())
                .unwrap_or(0);
            println!(
                "  {:<12} {:<6} {:<30} {} persons",
                camera.name,
                if camera.connected { "up" } else { "down" },
                camera.uri,
                persons
            );
        }
    }

    let unsent = monitor.stop();
    if !unsent.is_empty() {
        println!("{} notifications were not sent", unsent.len());
    }
    Ok(())
}
