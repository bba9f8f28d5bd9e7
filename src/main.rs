//! file-storage-provider command line entry point

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use file_storage_provider::client::memory::MemoryFileStorage;
use file_storage_provider::config::Config;
use file_storage_provider::engine::Engine;
use file_storage_provider::state::State;

const DEFAULT_STATE_FILE: &str = "file-storage.state.yaml";

/// Print usage information
fn print_usage() {
    eprintln!("Usage: file-storage-provider <config.yaml> <plan|apply|destroy|show> [state.yaml]");
    eprintln!();
    eprintln!("file-storage-provider - declarative management of file-storage export sets");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!("  command        plan, apply, destroy or show");
    eprintln!("  state.yaml     State file (default: {})", DEFAULT_STATE_FILE);
    eprintln!();
    eprintln!("Example:");
    eprintln!("  file-storage-provider demos/export-sets.yaml apply");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Plan,
    Apply,
    Destroy,
    Show,
}

impl Command {
    fn parse(arg: &str) -> Option<Self> {
        match arg {
            "plan" => Some(Command::Plan),
            "apply" => Some(Command::Apply),
            "destroy" => Some(Command::Destroy),
            "show" => Some(Command::Show),
            _ => None,
        }
    }

    fn mutates(&self) -> bool {
        matches!(self, Command::Apply | Command::Destroy)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.len() > 4 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    let Some(command) = Command::parse(&args[2]) else {
        eprintln!("Unknown command: {}", args[2]);
        print_usage();
        std::process::exit(1);
    };
    let state_path = PathBuf::from(args.get(3).map(String::as_str).unwrap_or(DEFAULT_STATE_FILE));

    // Load configuration
    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("file-storage-provider starting");
    info!("Loaded configuration from {:?}", config_path);

    let storage = match config.backend.snapshot() {
        Some(path) => MemoryFileStorage::load(path, config.backend.memory_config())?,
        None => MemoryFileStorage::new(config.backend.memory_config()),
    };
    let state = State::load(&state_path)?;
    let engine = Engine::new(Arc::new(storage.clone()), config.timeouts).with_state(state);

    let outcome = match command {
        Command::Plan => engine.plan(&config).map(|plan| plan.to_string()),
        Command::Apply => engine.apply(&config).await.map(|report| report.to_string()),
        Command::Destroy => engine.destroy().await.map(|report| report.to_string()),
        Command::Show => engine.refresh().await.and_then(|()| engine.state().to_yaml()),
    };

    let output = match outcome {
        Ok(output) => output,
        Err(e) => {
            error!("{:?} failed: {}", command, e);
            // Whatever was applied before the failure is kept
            if command.mutates() {
                engine.state().save(&state_path)?;
                if let Some(path) = config.backend.snapshot() {
                    storage.save(path)?;
                }
            }
            std::process::exit(1);
        }
    };
    println!("{}", output);

    if command != Command::Plan {
        engine.state().save(&state_path)?;
        info!("State written to {:?}", state_path);
    }
    if let Some(path) = config.backend.snapshot() {
        storage.save(path)?;
    }

    Ok(())
}
