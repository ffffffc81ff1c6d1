use anyhow::{Context, Result};
use knobd_core::config::{self, Config};

use crate::ConfigCommands;

pub fn run(command: ConfigCommands) -> Result<()> {
    let path = Config::default_path().context("failed to resolve XDG config directory")?;
    match command {
        ConfigCommands::Show => {
            let config = Config::load(&path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Dir => {
            let dir = Config::default_dir().context("failed to resolve XDG config directory")?;
            println!("{}", dir.display());
        }
        ConfigCommands::Init => {
            if config::bootstrap_config(&path)? {
                println!("Wrote default config to {}", path.display());
            } else {
                println!("Config already exists at {}", path.display());
            }
        }
    }
    Ok(())
}
