//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> peerxfer_core::config::Config {
    peerxfer_core::config::Config::load().unwrap_or_default()
}

pub mod config;
pub mod send;

/// peerxfer - resumable file transfers over a chat transport
#[derive(Parser)]
#[command(name = "peerxfer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Send files end to end through the loopback link
    Send(SendArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the send command
#[derive(Parser)]
pub struct SendArgs {
    /// Files to send
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Directory received files are written to
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Largest chunk requested at once, in bytes
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub chunk_size: Option<u32>,

    /// Output the final transfer listing as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,
}
