//! acq-affinity - version 0.1.0
//!
//! CPU and network-interrupt affinity manager with tracing logging.
//! This is the main entry point that resolves the configuration and dispatches subcommands.

mod cli;
mod commands;

use acq_affinity::config::{resolve_config, show_config, validate_effective_config, Config};
use clap::Parser;
use tracing::{info, Level};

use cli::{Args, Commands, LogLevel};
use commands::{
    command_check_sudo, command_config, command_install_helper, command_run, command_show,
    command_simulate,
};

/// Initializes tracing logging subsystem with configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    };
    let Some(log_level) = log_level else {
        return;
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {:?}", args.log_level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> anyhow::Result<Config> {
    let config = resolve_config(&args.config_overrides())?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Main application entry point.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(&args);

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args.config_overrides())?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        show_config(&config, args.config_format)?;
        return Ok(());
    }

    let Some(command) = &args.command else {
        eprintln!("No command given, see --help");
        std::process::exit(2);
    };

    // Config and InstallHelper don't need config validation
    match command {
        Commands::Config { output, format } => return command_config(output.clone(), *format),
        Commands::InstallHelper { force, prefix } => {
            return command_install_helper(*force, prefix)
        }
        _ => {}
    }

    let config = load_validated_config(&args)?;

    match command {
        Commands::Show { threads, numa } => command_show(*threads, *numa, &config),
        Commands::Run => command_run(&config).await,
        Commands::Simulate {
            frames,
            items,
            period_ms,
            stall,
        } => command_simulate(*frames, *items, *period_ms, *stall, &config),
        Commands::CheckSudo => command_check_sudo(&config),
        Commands::Config { .. } | Commands::InstallHelper { .. } => Ok(()),
    }
}
