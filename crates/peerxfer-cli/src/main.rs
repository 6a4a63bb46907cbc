//! peerxfer CLI - resumable file transfers over a chat transport
//!
//! The binary drives two transfer sessions over an in-memory link, which
//! exercises the whole transfer pipeline against real files.
//!
//! ## Quick Start
//!
//! ```bash
//! # Send files through the loopback link into ./incoming
//! peerxfer send ./document.pdf ./photo.png --output ./incoming
//!
//! # Show the active configuration
//! peerxfer config show
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Send(args) => commands::send::run(args),
        Command::Config(args) => commands::config::run(args),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,peerxfer=info,peerxfer_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
