//! Configuration management CLI commands.
//!
//! `config init` writes a commented default file, `config show` prints the
//! effective settings and `config path` shows where the file lives.

use std::path::PathBuf;

use clap::Subcommand;
use tilepress::config::{config_file_path, ConfigFile};

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Write a config file with default settings
    Init {
        /// Where to write it (default: ~/.tilepress/config.ini)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the settings a build would use
    Show {
        /// Config file to read instead of the default
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init { path, force } => {
            let path = path.unwrap_or_else(config_file_path);
            run_init(&path, force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        ConfigCommands::Show { config } => {
            print!("{}", load_config(config.as_ref())?.to_config_string());
            Ok(())
        }
        ConfigCommands::Path => {
            println!("{}", config_file_path().display());
            Ok(())
        }
    }
}

fn run_init(path: &std::path::Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(format!(
            "'{}' already exists, use --force to replace it",
            path.display()
        )));
    }
    ConfigFile::default().save_to(path)?;
    Ok(())
}
