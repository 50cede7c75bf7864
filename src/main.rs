//! geofix: TCP control channel for mock location fixes
//!
//! Clients connect over TCP and send console commands, one per line:
//! - `geo fix <lon> <lat> [...]` to inject a position
//! - `ping`, `help`, `quit`
//!
//! Configuration via CLI arguments or TOML file.

use geofix::config::{Config, ALL_INTERFACES, LISTEN_IP, LISTEN_PORT};
use geofix::error::DEFAULT_PORT;
use geofix::lifecycle::{
    Controller, LifecycleEvent, LocationProvider, LoggingProvider, OomScoreMonitor,
};
use geofix::protocols::console::ConsoleDispatcher;
use geofix::runtime::LoopOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let default_port = DEFAULT_PORT.to_string();
    info!(
        port = config.settings.get_str(LISTEN_PORT, &default_port),
        interface = config.settings.get_str(LISTEN_IP, ALL_INTERFACES),
        buffer_size = config.runtime.buffer_size,
        "Starting geofix"
    );

    let provider: Arc<dyn LocationProvider> = Arc::new(LoggingProvider::new());
    let dispatch_provider = provider.clone();

    let controller = Controller::builder(move || ConsoleDispatcher::new(dispatch_provider.clone()))
        .settings(config.settings)
        .options(LoopOptions::from(&config.runtime))
        .monitor(Arc::new(OomScoreMonitor::default()))
        .provider(provider)
        .build();

    let events = controller.subscribe();
    controller.start();

    for event in events.iter() {
        match event {
            LifecycleEvent::Started => {
                for addr in controller.local_addrs() {
                    info!(addr = %addr, "Accepting connections");
                }
            }
            // Logged by the controller
            LifecycleEvent::Error(_) => {}
            LifecycleEvent::Stopped => break,
        }
    }

    // The loop only stops on its own after a fatal error
    match controller.last_error() {
        Some(message) => Err(message.into()),
        None => Ok(()),
    }
}
