//! Signal K telemetry relay - command line entry point
//!
//! `run` reads newline-delimited JSON readings from stdin and streams them
//! to the configured server until stdin closes or a shutdown signal arrives.

use clap::{Parser, Subcommand};
use signalk_relay::config::RelayConfig;
use signalk_relay::credentials;
use signalk_relay::endpoint;
use signalk_relay::engine::{EngineConfig, PushOutcome, TelemetryEngine};
use signalk_relay::observability::{init_default_logging, StatusServer};
use signalk_relay::protocol::Reading;
use std::path::{Path, PathBuf};
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Relay position and sensor readings to a Signal K server
#[derive(Parser)]
#[command(name = "signalk-relay")]
#[command(about = "Relay telemetry readings to a Signal K server")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream NDJSON readings from stdin
    Run,
    /// Parse a server address and print the resulting target
    CheckAddress {
        /// Address as a user would type it
        address: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let result = match cli.command {
        Commands::CheckAddress { address } => check_address(&address),
        Commands::Run => match load_configuration(cli.config.as_deref()) {
            Ok(config) => run_relay(config).await,
            Err(e) => Err(e),
        },
        Commands::Config { show } => match load_configuration(cli.config.as_deref()) {
            Ok(config) => handle_config_command(&config, show),
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(RelayConfig::load_from_file(path)?);
    }

    for candidate in ["relay.toml", "config/relay.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(RelayConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create relay.toml".into())
}

fn check_address(address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = endpoint::parse(address)?;
    let target = &parsed.target;
    println!("target:     {target}");
    println!("host:       {}", target.host);
    println!("port:       {}", target.port);
    println!("secure:     {}", target.secure);
    println!("stream url: {}", target.stream_url());
    if parsed.has_extra_path {
        println!("warning:    the path is ignored; the stream endpoint is fixed");
    }
    Ok(())
}

fn handle_config_command(config: &RelayConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine_config = EngineConfig::from_config(&config)?;
    let credentials = credentials::from_config(&config, &engine_config.target)?;

    let mut engine = TelemetryEngine::new(credentials);
    engine.configure(engine_config)?;

    let status_task = config.status.port.map(|port| {
        let server = StatusServer::new(port, engine.subscribe_status());
        tokio::spawn(server.run())
    });

    engine.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("Relay running, reading readings from stdin");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reading: Reading = match serde_json::from_str(&line) {
                        Ok(reading) => reading,
                        Err(e) => {
                            warn!(error = %e, "Skipping malformed reading");
                            continue;
                        }
                    };
                    match engine.push(&reading).await {
                        Ok(PushOutcome::Dropped) => debug!("Reading dropped by transport"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Failed to push reading"),
                    }
                }
                Ok(None) => {
                    info!("Input closed, shutting down");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read input");
                    break;
                }
            },
        }
    }

    engine.stop().await;
    if let Some(task) = status_task {
        task.abort();
    }
    Ok(())
}
