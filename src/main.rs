use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

use mimic_relay::config::{self, RelayConfig};
use mimic_relay::error::{ConfigError, Result};
use mimic_relay::fingerprint::{preset, preset_names};
use mimic_relay::profile::{self, TransportProfile};
use mimic_relay::relay::client::wire_spec;
use mimic_relay::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "mimic-relay")]
#[command(about = "Local TLS relay that replays browser handshake fingerprints", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (YAML/JSON/TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides server.listen_addr
    #[arg(short, long, value_name = "ADDR", global = true)]
    listen: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the relay (default)
    Run,
    /// List the built-in fingerprint presets with the JA3N each one emits
    Presets,
    /// Print a transport profile to paste into the control tool
    ProfileTemplate {
        /// Destination host for the template
        #[arg(long, default_value = "example.com")]
        host: String,
    },
    /// Check that the binary starts
    SmokeTest,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    match format!("mimic_relay={log_level}").parse::<tracing_subscriber::filter::Directive>() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log directive: {e}"),
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_from_path(path).await.inspect_err(|e| {
                error!("Failed to load configuration from {}: {}", path.display(), e);
            })?
        }
        None => config::load_from_env_or_file().await.inspect_err(|e| {
            error!("Failed to load configuration: {}", e);
        })?,
    };

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, args.listen).await,
        Command::Presets => {
            for name in preset_names() {
                if let Some(spec) = preset(name) {
                    println!("{name:<16} {}", wire_spec(&spec).ja3n_string());
                }
            }
            Ok(())
        }
        Command::ProfileTemplate { host } => {
            let template = TransportProfile::template(host, &config.defaults);
            template.validate()?;
            println!("{}", profile::serialize(&template)?);
            Ok(())
        }
        Command::SmokeTest => {
            println!("mimic-relay {} ok", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run(config: RelayConfig, listen: Option<SocketAddr>) -> Result<()> {
    let addr = match listen {
        Some(addr) => addr,
        None => config.server.listen_addr.parse().map_err(|_| {
            ConfigError::Validation(format!(
                "listen_addr '{}' is not a socket address",
                config.server.listen_addr
            ))
        })?,
    };

    let server = RelayServer::from_config(&config)?;
    let bound = server.start(addr).await?;
    info!("Relay listening on https://{}", bound);
    if let Some(sha256) = server.certificate_sha256().await {
        info!("Trust this certificate for the session, SHA-256 {}", sha256);
    }
    info!("Control header: {}", config.server.control_header);

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = server.wait_stopped() => {
            warn!("Relay listener stopped on its own");
        }
    }

    info!("Shutting down");
    server.stop().await?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
