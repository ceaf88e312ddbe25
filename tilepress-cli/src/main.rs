//! Tilepress CLI - distributed overview builder
//!
//! One invocation runs one rank. A single-process build:
//!
//! ```text
//! tilepress build input.tif -o overview.tpo
//! ```
//!
//! A four-rank build started on any mix of hosts:
//!
//! ```text
//! tilepress build input.tif -o overview.tpo --rank 0 --size 4 --collector-address 0.0.0.0:7878
//! tilepress build input.tif --rank 1 --size 4 --collector-address collector:7878
//! ...
//! ```

mod commands;
mod error;

use clap::{Parser, Subcommand};

use commands::build::BuildArgs;
use commands::config::ConfigCommands;
use commands::inspect::InspectArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tilepress")]
#[command(version)]
#[command(about = "Build tiled overviews of large rasters across many processes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one rank of an overview build
    Build(BuildArgs),

    /// Summarise an overview container
    Inspect(InspectArgs),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::Build(args) => commands::build::run(args),
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Config(command) => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_inspect() {
        let cli = Cli::parse_from(["tilepress", "inspect", "a.tpo", "--tiles"]);
        match cli.command {
            Commands::Inspect(args) => assert!(args.tiles),
            _ => panic!("expected inspect"),
        }
    }
}
