//! DishaIO - orientation telemetry listener daemon
//!
//! Subscribes to an MQTT topic carrying comma-separated angle triples and
//! keeps the latest decoded orientation in a shared slot. The foreground
//! loop here stands in for a render loop: it polls the slot once per
//! second and logs the current value. Embedders use the library directly
//! and poll the slot from their own frame loop instead.

use disha_io::client::{ConnectOptions, MqttClient};
use disha_io::config::{CliArgs, USAGE};
use disha_io::error::{Error, Result};
use disha_io::listener::OrientationListener;
use disha_io::orientation;
use disha_io::transport::create_dialer;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let cli = CliArgs::parse(&args)?;
    if cli.show_help {
        print!("{}", USAGE);
        return Ok(());
    }
    let config = cli.resolve()?;

    log::info!("DishaIO v0.1.0 starting...");
    log::info!("Broker: {}", config.broker_url());
    log::info!(
        "Topic: {:?} (QoS {}), client id {:?}",
        config.subscription.topic,
        config.subscription.qos,
        config.client.id
    );

    let dialer = create_dialer(config.broker.scheme, &config.broker.host, config.broker.port)?;
    let options = ConnectOptions {
        client_id: config.client.id.clone(),
        topic: config.subscription.topic.clone(),
        qos: config.subscription.qos,
        clean_session: config.broker.clean_session,
        keep_alive: config.broker.keep_alive(),
    };
    let client = MqttClient::new(dialer, options);

    let handle = orientation::create_orientation_handle();
    let mut listener =
        OrientationListener::start(client, config.reconnect.clone(), Arc::clone(&handle))?;

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!("DishaIO running. Press Ctrl-C to stop.");

    // Main loop - poll the orientation slot like a render loop would
    let mut last_report = Instant::now();
    while running.load(Ordering::Relaxed) && !listener.has_failed() {
        thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() >= Duration::from_secs(1) {
            let current = orientation::current(&handle);
            log::info!(
                "Orientation: x={:.3} y={:.3} z={:.3}",
                current.x,
                current.y,
                current.z
            );
            last_report = Instant::now();
        }
    }

    // Shutdown
    log::info!("Shutting down...");
    listener.shutdown()?;

    if let Some(error) = listener.take_error() {
        return Err(error);
    }

    log::info!("DishaIO stopped");
    Ok(())
}
