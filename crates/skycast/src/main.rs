//! # skycast
//!
//! Server binary: loads settings, wires the registry, gateways, snapshot
//! store, feed generator and HTTP/WebSocket server, then runs until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skycast_core::ServerMessage;
use skycast_core::logging::init_subscriber;
use skycast_server::config::ServerConfig;
use skycast_server::feed::{FeedGenerator, SimulatedSource, StaticCatalog};
use skycast_server::gateway::{BroadcastGateway, LocalGateway, QueuedGateway};
use skycast_server::registry::GroupRegistry;
use skycast_server::server::{ServerParts, SkycastServer};
use skycast_server::session::StaticDirectory;
use skycast_server::snapshot::{SnapshotStore, open_store};
use skycast_settings::SkycastSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Capacity of the publish bus between the feed and the dispatcher.
const BUS_CAPACITY: usize = 256;

/// Live weather fan-out server.
#[derive(Parser, Debug)]
#[command(name = "skycast", about = "Live weather fan-out over WebSockets")]
struct Cli {
    /// Settings file (defaults to `~/.skycast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Do not run the feed generator in this process.
    #[arg(long)]
    no_feed: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the server (default).
    Serve,
    /// Run one feed cycle against the snapshot store and print the envelopes.
    Cycle,
    /// Print the effective settings as JSON.
    Settings,
}

/// Load settings and apply CLI overrides, then validate.
fn load_settings(cli: &Cli) -> Result<SkycastSettings> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(skycast_settings::settings_path);
    let mut settings = skycast_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;

    if let Some(host) = &cli.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if cli.no_feed {
        settings.feed.enabled = false;
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn build_generator(
    settings: &SkycastSettings,
    snapshots: Arc<dyn SnapshotStore>,
    gateway: Arc<dyn BroadcastGateway>,
) -> Result<FeedGenerator> {
    let locations = settings
        .build_locations()
        .context("Invalid location settings")?;
    Ok(FeedGenerator::new(
        Arc::new(StaticCatalog::new(locations)),
        Arc::new(SimulatedSource),
        snapshots,
        gateway,
        Duration::from_secs(settings.feed.interval_secs),
    ))
}

/// Everything `serve` runs.
struct App {
    server: SkycastServer,
    generator: Arc<FeedGenerator>,
    bus_cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl App {
    /// Wire all components. Must run inside a Tokio runtime.
    fn build(settings: &SkycastSettings) -> Result<Self> {
        let directory = Arc::new(
            StaticDirectory::from_settings(&settings.subscribers)
                .context("Invalid subscriber settings")?,
        );
        let snapshots = open_store(&settings.snapshot).context("Failed to open snapshot store")?;

        let registry = Arc::new(GroupRegistry::new());
        let local = Arc::new(LocalGateway::new(registry.clone()));
        let bus_cancel = CancellationToken::new();
        let (queued, dispatcher) = QueuedGateway::spawn(local, BUS_CAPACITY, bus_cancel.clone());
        let gateway: Arc<dyn BroadcastGateway> = Arc::new(queued);

        let generator = Arc::new(build_generator(settings, snapshots.clone(), gateway.clone())?);
        let server = SkycastServer::new(
            ServerConfig::from_settings(&settings.server),
            ServerParts {
                registry,
                gateway,
                snapshots,
                authorizer: directory.clone(),
                resolver: directory,
            },
        );

        info!(
            locations = settings.locations.len(),
            subscribers = settings.subscribers.len(),
            snapshot_backend = ?settings.snapshot.backend,
            "components wired"
        );
        Ok(Self {
            server,
            generator,
            bus_cancel,
            dispatcher,
        })
    }

    /// Start the feed, if enabled, as a task tracked for shutdown.
    fn start_feed(&self, enabled: bool) {
        if !enabled {
            info!("feed generator disabled");
            return;
        }
        let shutdown = self.server.shutdown();
        shutdown.track(tokio::spawn(self.generator.clone().run(shutdown.token())));
    }

    /// Close sessions, stop the feed, then drain the publish bus.
    async fn stop(self, http: JoinHandle<()>) {
        self.server.shutdown().graceful_shutdown(None).await;
        let _ = http.await;
        self.bus_cancel.cancel();
        let _ = self.dispatcher.await;
    }
}

async fn serve(settings: &SkycastSettings) -> Result<()> {
    let metrics = skycast_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let mut app = App::build(settings)?;
    app.server = app.server.with_metrics(metrics);
    let (addr, http) = app.server.listen().await.context("Failed to start server")?;
    info!(%addr, "skycast ready");
    app.start_feed(settings.feed.enabled);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    app.stop(http).await;
    info!("Shutdown complete");
    Ok(())
}

/// Produce one cycle and return the envelope recorded for each active location.
async fn cycle_once(settings: &SkycastSettings) -> Result<Vec<String>> {
    let snapshots = open_store(&settings.snapshot).context("Failed to open snapshot store")?;
    let gateway = Arc::new(LocalGateway::new(Arc::new(GroupRegistry::new())));
    let generator = build_generator(settings, snapshots.clone(), gateway)?;

    let report = generator.run_cycle().await;
    for (key, e) in &report.failures {
        warn!(location = %key, error = %e, "no reading produced");
    }

    let mut envelopes = Vec::new();
    for location in settings.build_locations()?.iter().filter(|l| l.is_active) {
        if let Some(reading) = snapshots.latest(location.key())? {
            envelopes.push(ServerMessage::WeatherUpdate(reading.as_ref().clone()).to_json()?);
        }
    }
    Ok(envelopes)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_subscriber(&settings.logging.level, settings.logging.format);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&settings).await,
        Command::Cycle => {
            for envelope in cycle_once(&settings).await? {
                println!("{envelope}");
            }
            Ok(())
        }
        Command::Settings => {
            let json = serde_json::to_string_pretty(&settings).context("Failed to encode settings")?;
            println!("{json}");
            Ok(())
        }
    }
}
