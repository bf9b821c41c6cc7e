use std::alloc::System;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use brickmaster::config::{parse_level, Platform, Settings};
use brickmaster::controls::GpioControl;
use brickmaster::items::{RegisteredItem, SharedItem};
use brickmaster::mqtt::constrained::{ConstrainedTransport, WifiCredentials};
use brickmaster::mqtt::os_transport::OsTransport;
use brickmaster::mqtt::{Network, Transport};
use brickmaster::platform::clock::SntpClient;
use brickmaster::platform::wifi::NmcliRadio;
use brickmaster::scripts::Script;
use cap::Cap;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use rppal::gpio::Gpio;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static HEAP: Cap<System> = Cap::new(System, usize::MAX);

#[derive(Parser)]
#[command(name = "brickmaster")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Connects a brickmaster2 device to its MQTT broker")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the log level from the configuration file
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup()?;

    let settings = Settings::load(cli.config.as_deref()).await?;
    let level = cli
        .log_level
        .as_deref()
        .map(parse_level)
        .unwrap_or_else(|| settings.log_level());
    setup_logging_env(level);
    info!(
        "Starting brickmaster for system '{}' on {:?}",
        settings.system.name, settings.system.platform
    );

    match settings.system.platform {
        Platform::Os => run(OsTransport::new(), &settings).await,
        Platform::Constrained => {
            let wifi = settings
                .wifi
                .clone()
                .ok_or_else(|| eyre!("Constrained platform needs a [wifi] section"))?;
            if let Some(limit) = settings.heap.limit_bytes {
                if HEAP.set_limit(limit).is_err() {
                    error!(
                        "Heap limit of {} bytes is below current usage of {} bytes, ignoring it",
                        limit,
                        HEAP.allocated()
                    );
                }
            }
            let transport = ConstrainedTransport::new(
                NmcliRadio::new(wifi.interface),
                settings.system.ntp_server.as_deref().map(SntpClient::new),
                &HEAP,
                WifiCredentials {
                    ssid: wifi.ssid,
                    passphrase: wifi.password,
                },
            );
            run(transport, &settings).await
        }
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}

async fn run<T: Transport>(transport: T, settings: &Settings) -> Result<()> {
    let mut network = Network::new(transport, settings.network_settings());

    // The network only holds weak handles; items must stay alive here.
    let mut items: Vec<SharedItem> = Vec::new();

    let controls = settings.controls();
    if !controls.is_empty() {
        match Gpio::new() {
            Ok(mut gpio) => {
                for control in controls {
                    let unclaimed = GpioControl::create(
                        &control.id,
                        &control.name,
                        control.pin,
                        control.invert,
                    );
                    match unclaimed.claim(&mut gpio) {
                        Ok(active) => {
                            let item: SharedItem = Rc::new(RefCell::new(active));
                            network.add_item(RegisteredItem::Control(item.clone()));
                            items.push(item);
                        }
                        Err(e) => error!("Could not set up control '{}': {}", control.id, e),
                    }
                }
            }
            Err(e) => error!("GPIO unavailable, skipping all controls: {}", e),
        }
    }

    for script in &settings.scripts {
        let item: SharedItem = Rc::new(RefCell::new(Script::new(
            &script.id,
            script.display_name(),
        )));
        network.add_item(RegisteredItem::Script(item.clone()));
        items.push(item);
    }
    info!("Registered {} items", items.len());

    network.connect().await?;
    network
        .serve(settings.poll_interval(), tokio::signal::ctrl_c())
        .await?;

    let stats = network.stats();
    info!(
        "Session ended after {} connect attempts, {} received, {} sent",
        stats.connect_attempts, stats.messages_received, stats.messages_sent
    );
    Ok(())
}
