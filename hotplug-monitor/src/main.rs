//! USB Hotplug Monitor
//!
//! Logs device arrivals and departures. Devices come either from polling the
//! system's USB serial ports or from a scripted scenario file.
//!
//! Usage: `hotplug-monitor [config.json]`

mod config;
mod scanner;
mod scenario;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hotplug::usb_ids::{class_name, vendor_name};
use hotplug::{
    HotplugContext, HotplugEvent, HotplugFlags, HotplugRegistration, PlatformBackend, UsbDevice,
};
use hotplug_sim::{SimBackend, VirtualBus};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::MonitorConfig;
use scanner::PortWatcher;
use scenario::{Scenario, ScenarioRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hotplug_monitor=info,hotplug=info,hotplug_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match std::env::args_os().nth(1) {
        Some(path) => MonitorConfig::load(&PathBuf::from(path))?,
        None => MonitorConfig::load_default()?,
    };

    info!("Starting hotplug monitor");

    let backend = Arc::new(SimBackend::new());
    let ctx = Arc::new(HotplugContext::with_config(
        Arc::clone(&backend) as Arc<dyn PlatformBackend>,
        config.hotplug.clone(),
    ));
    let bus = VirtualBus::with_context(Arc::clone(&ctx), backend);

    let flags = if config.enumerate {
        HotplugFlags::ENUMERATE
    } else {
        HotplugFlags::NONE
    };
    let handle = ctx
        .register(
            HotplugRegistration::new(config.events)
                .flags(flags)
                .filter(config.filter)
                .callback(log_event),
        )
        .context("failed to register hotplug callback")?;
    info!("Watching for {} with filter {}", describe_events(&config), config.filter);

    match &config.scenario {
        Some(path) => {
            let scenario = Scenario::load(path)?;
            let report = ScenarioRunner::new(&bus).run(&scenario).await?;
            info!(
                "Scenario finished: {} step(s), {} callback(s), {} handle(s) disconnected",
                report.steps, report.invoked, report.disconnected
            );
        }
        None => watch_ports(&bus, &config).await,
    }

    ctx.deregister(handle);
    let released = ctx.teardown();
    info!("Stopped; released {} callback(s)", released);
    Ok(())
}

/// Poll serial ports until interrupted
async fn watch_ports(bus: &VirtualBus, config: &MonitorConfig) {
    let mut watcher = PortWatcher::new(config.skip_patterns.clone());
    let mut ticker = tokio::time::interval(Duration::from_millis(config.poll_interval_ms.max(1)));

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = watcher.poll(bus) {
                    warn!("Port scan failed: {:#}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Interrupted; {} port(s) attached", watcher.attached());
                break;
            }
        }
    }
}

fn log_event(_ctx: &HotplugContext, device: &UsbDevice, event: HotplugEvent) -> bool {
    let vendor = vendor_name(device.vendor_id()).unwrap_or("unknown vendor");
    match event {
        HotplugEvent::Arrived => info!(
            "Device arrived: {} ({}, {})",
            device,
            vendor,
            class_name(device.device_class())
        ),
        HotplugEvent::Left => info!("Device left: {} ({})", device, vendor),
    }
    false
}

fn describe_events(config: &MonitorConfig) -> &'static str {
    let arrived = config.events.contains(HotplugEvent::Arrived);
    let left = config.events.contains(HotplugEvent::Left);
    match (arrived, left) {
        (true, true) => "arrivals and departures",
        (true, false) => "arrivals",
        (false, true) => "departures",
        (false, false) => "nothing",
    }
}
