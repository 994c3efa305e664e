//! CLI arguments and subcommands for acq-affinity.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use acq_affinity::config::{ConfigFormat, ConfigOverrides};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "acq-affinity",
    about = "CPU and network-interrupt affinity manager for real-time acquisition hosts",
    long_about = "CPU and network-interrupt affinity manager for real-time acquisition hosts.\n\n\
                  Pins the acquisition process, its receiver threads, every other process and the \
                  RPS processing of the acquisition network devices to dedicated CPU sets. A \
                  watchdog process restores the default affinity if the manager dies.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Run taskset and the RPS helper without sudo
    #[arg(long)]
    pub no_sudo: bool,

    /// Image pixel depth selecting the affinity set (4, 8, 16 or 32)
    #[arg(long)]
    pub pixel_depth: Option<u32>,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,
}

impl Args {
    pub fn config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            config: self.config.clone(),
            no_config: self.no_config,
            no_sudo: self.no_sudo,
            pixel_depth: self.pixel_depth,
        }
    }
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show CPUs, NUMA layout and process affinities
    Show {
        /// List the threads of this process
        #[arg(long)]
        threads: bool,

        /// Show the NUMA node of each configured mask
        #[arg(long)]
        numa: bool,
    },

    /// Apply the configured affinity and hold it until interrupted
    Run,

    /// Drive a synthetic acquisition through the affinity state machine
    Simulate {
        /// Number of frames
        #[arg(long, default_value_t = 100)]
        frames: u64,

        /// Number of receiver items (ports) per frame
        #[arg(long, default_value_t = 2)]
        items: usize,

        /// Frame period in milliseconds
        #[arg(long, default_value_t = 10)]
        period_ms: u64,

        /// Stop the image status callbacks early
        #[arg(long)]
        stall: bool,
    },

    /// Check sudo authorization of taskset and the RPS helper
    CheckSudo,

    /// Install the RPS helper binary
    InstallHelper {
        /// Force reinstall (overwrite existing)
        #[arg(long)]
        force: bool,

        /// Installation directory
        #[arg(long, default_value = "/usr/local/bin")]
        prefix: PathBuf,
    },

    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },
}
