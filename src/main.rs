//! mqttbeat - Main Entry Point
//!
//! Loads the configuration, wires the MQTT session and the JSON-lines sink
//! into a beat and runs it until SIGINT/SIGTERM or a fatal error.

use clap::{Parser, Subcommand};
use mqttbeat::config::BeatConfig;
use mqttbeat::lifecycle::{Beater, StopHandle};
use mqttbeat::observability::{init_logging, metrics::metrics, LogSettings};
use mqttbeat::publisher::JsonLinesConnector;
use mqttbeat::transport::mqtt::MqttSession;
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Default configuration locations, tried in order
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["mqttbeat.toml", "config/mqttbeat.toml"];

/// Ship MQTT messages as structured events
#[derive(Parser)]
#[command(name = "mqttbeat")]
#[command(about = "Subscribe to MQTT topics and publish every message as an event")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and ship events until stopped
    Run,
    /// Validate the configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut settings = LogSettings::from_env();
    settings.level = match cli.verbose {
        0 => settings.level,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    init_logging(settings.level, settings.format, settings.include_spans);

    info!("Starting mqttbeat v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_beat(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<BeatConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BeatConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BeatConfig::load_from_file(path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create mqttbeat.toml".into())
}

async fn run_beat(config: BeatConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = MqttSession::new(&config.mqtt)?;
    let connector = JsonLinesConnector::new(&config.output);
    let beater = Beater::new(&config.mqtt, session, connector)?;

    let stop_handle = beater.stop_handle();
    let signals = tokio::spawn(stop_on_signal(stop_handle));

    let result = beater.run().await;
    signals.abort();

    match serde_json::to_string(&metrics().get_metrics()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final metrics"),
        Err(e) => error!("Failed to serialize metrics: {}", e),
    }

    Ok(result?)
}

/// Wait for SIGINT or SIGTERM and ask the beat to stop
async fn stop_on_signal(stop_handle: StopHandle) {
    let (mut sigint, mut sigterm) = match (
        signal::unix::signal(signal::unix::SignalKind::interrupt()),
        signal::unix::signal(signal::unix::SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
    }
    stop_handle.stop();
}

fn handle_config_command(
    config: &BeatConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let subscriptions = config.mqtt.subscriptions()?;
    info!(
        topics = subscriptions.len(),
        broker = %config.mqtt.broker_url,
        "Configuration is valid"
    );

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
