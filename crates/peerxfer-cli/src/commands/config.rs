//! Config command implementation.

use anyhow::{Context, Result};

use peerxfer_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load().context("Failed to load configuration")?;

            println!();
            println!("peerxfer Configuration");
            println!("{}", "-".repeat(50));
            println!();
            print!("{}", config.to_toml()?);
            println!();
            println!(
                "# effective download directory: {}",
                config.transfer.download_dir().display()
            );
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
    }

    Ok(())
}
