// src/cli.rs
//! CLI definitions for tinyprov
//!
//! `run` is the full provisioning pass. The other subcommands expose one
//! component each, for inspection and for repairing a half-finished system.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

// Also compiled into build.rs for the man page, so no crate paths here

const EXIT_STATUS: &str = "EXIT STATUS:
  0  success
  1  other fatal error
  2  package unavailable
  3  no writable storage
  4  insufficient space on the store";

#[derive(Parser)]
#[command(name = "tinyprov")]
#[command(author = "tinyprov contributors")]
#[command(version)]
#[command(about = "Provision a live-boot system with packages and persistent storage", long_about = None)]
#[command(after_help = EXIT_STATUS)]
pub struct Cli {
    /// Path to the provisioning config
    #[arg(short, long, global = true, default_value = "/etc/tinyprov/provision.toml")]
    pub config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip the root-user and network checks
    #[arg(long, global = true)]
    pub skip_preflight: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full provisioning pass
    Run,

    /// Install packages with managed install and mirror fallback
    Install {
        /// Logical package names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Locate or create the persistent store and print it
    Store,

    /// Add paths to the persistence manifest
    Persist {
        /// Absolute paths
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the persistence manifest
    Manifest,

    /// Print the mirrors computed for this platform
    Mirrors,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
