use anyhow::Result;
use clap::Parser;
use compliancehub::config::Config;
use compliancehub::console::{self, Console};
use compliancehub::{backend, Args};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cfg = if let Some(config_path) = &args.config {
        Config::load_from(config_path)?
    } else {
        Config::load()?
    };

    // The session mirror spawns its listener on this runtime
    let rt = tokio::runtime::Runtime::new()?;
    let _guard = rt.enter();
    let backend = backend::connect(&cfg)?;

    let console = Console::new(backend.mirror.clone(), backend.records.clone());
    let result = if let Some(command) = &args.command {
        console::run_once(&console, &rt, command)
    } else {
        console::run_repl(&console, &rt)
    };

    backend.mirror.shutdown();
    result
}
