//! hub-site: site preview server.
//!
//! Serves the public pages and the admin pages against the hosted backend,
//! using the operator's persisted console session for the admin gate.
//!
//! Usage:
//!   hub-site [--config /path/to/config.toml]
//!
//! Environment variables:
//!   HUB_CONFIG - Config file (default: ~/.compliancehub/config.toml)
//!   HUB_BACKEND_URL - Backend project URL
//!   HUB_ANON_KEY - Public anon key
//!   HUB_SITE_PORT - Port to listen on (default: 8080)

use compliancehub::config::Config;
use compliancehub::{backend, site};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let config = match config_path() {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {:#}", e);
            std::process::exit(1);
        }
    };

    eprintln!("hub-site starting...");
    eprintln!("Listening on: {}", config.site.addr());

    let backend = match backend::connect(&config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    };

    let state = site::SiteState::new(backend.mirror, backend.records);
    if let Err(e) = site::run(&config.site, state).await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn config_path() -> Option<PathBuf> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}
