//! CLI entry point for clipsqueeze
//!
//! Parses command line arguments, loads configuration, and serves HTTP.

use clap::Parser;
use clipsqueeze::{init_tracing, Config, Service, ServiceError};
use std::path::PathBuf;
use std::process::ExitCode;

/// clipsqueeze - compress uploaded videos to a target file size
#[derive(Parser, Debug)]
#[command(name = "clipsqueeze")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml); defaults apply if it is missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    /// Skip startup checks (ffmpeg, ffprobe, encoder). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);
    tracing::info!(config = %args.config.display(), "clipsqueeze starting");

    let service = if args.skip_checks {
        tracing::warn!("Skipping startup checks (--skip-checks enabled)");
        Ok(Service::new_without_checks(config))
    } else {
        Service::with_config(config)
    };

    match service {
        Ok(service) => match service.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Service error");
                ExitCode::FAILURE
            }
        },
        Err(e @ ServiceError::Startup(_)) => {
            tracing::error!(error = %e, "Startup checks failed; pass --skip-checks to bypass");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize service");
            ExitCode::FAILURE
        }
    }
}
