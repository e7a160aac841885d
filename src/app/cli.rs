//! Command-Line Interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cobot Cell - Gesture-triggered collaborative assembly cell controller
#[derive(Parser, Debug)]
#[command(name = "cobot-cell")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the cell on a recorded hand-landmark stream
    Run {
        /// Recording of detected hands (JSON lines)
        #[arg(short, long)]
        frames: PathBuf,

        /// Operator panel device; without it the cell starts immediately
        #[arg(short, long)]
        panel: Option<PathBuf>,
    },

    /// Inspect stored robot tasks
    Tasks {
        #[command(subcommand)]
        action: TasksAction,
    },

    /// Initialize configuration and data directories
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// View or modify configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TasksAction {
    /// List stored tasks
    List,

    /// Print one task record
    Show {
        /// Task name
        name: String,
    },

    /// Check that every configured class has its task records
    Check,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "decision.timing_window", "robot.address")
        key: String,

        /// Value to set
        value: String,
    },

    /// Get a specific configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
