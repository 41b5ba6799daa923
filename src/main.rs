//! Botster Hub CLI - runs the hub session engine headless.
//!
//! This is the main binary entry point. See the `botster_hub` library
//! for the core functionality.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use botster_hub::constants::TICK_INTERVAL;
use botster_hub::{hub_id_for_repo, Config, Hub};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
/// mimalloc provides better multi-threaded performance than the system allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

// CLI
#[derive(Parser)]
#[command(name = "botster-hub")]
#[command(version = VERSION)]
#[command(about = "Hub session engine for autonomous coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub until interrupted
    Start {
        /// Run without the control plane or tunnel
        #[arg(long)]
        offline: bool,
        /// Repository in "owner/repo" format (defaults to BOTSTER_REPO)
        #[arg(long)]
        repo: Option<String>,
    },
    /// Print the hub identifier for the current directory
    Status,
    /// Show the effective configuration
    Config,
}

/// Log to stderr, or to `BOTSTER_LOG_FILE` when set.
fn init_logging() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Some(path) = std::env::var_os("BOTSTER_LOG_FILE").map(PathBuf::from) {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

/// Runs the hub headless until SIGINT, SIGTERM, or SIGHUP.
fn run_headless(offline: bool, repo: Option<String>) -> Result<()> {
    println!("Starting Botster Hub v{} in headless mode...", VERSION);

    // Set up signal handlers
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let mut config = Config::load()?;
    config.offline |= offline;

    let mut hub = match repo {
        Some(name) => {
            let path = std::env::current_dir().context("Failed to read current directory")?;
            Hub::with_repo(config, path, name)?
        }
        None => Hub::new(config)?,
    };

    hub.setup()?;
    println!("Hub {} ready for {}", hub.hub_identifier(), hub.repo_name());
    log::info!("Botster Hub v{} started in headless mode", VERSION);

    while !SHUTDOWN_FLAG.load(Ordering::Relaxed) && !hub.should_quit() {
        hub.tick();
        std::thread::sleep(TICK_INTERVAL);
    }

    println!("Shutting down...");
    hub.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { offline, repo } => run_headless(offline, repo)?,
        Commands::Status => {
            let config = Config::load()?;
            let cwd = std::env::current_dir()?;
            let hub_id = config.hub_id.unwrap_or_else(|| hub_id_for_repo(&cwd));
            println!("hub_identifier: {hub_id}");
            println!("server_url:     {}", config.server_url);
            println!("authenticated:  {}", !config.token.is_empty());
        }
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
