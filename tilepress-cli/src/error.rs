//! CLI error handling with user-facing messages.
//!
//! Every command returns `Result<(), CliError>`; `main` calls
//! [`CliError::exit`] on failure so the exit status is always 1.

use std::fmt;
use std::process;

use tilepress::config::ConfigFileError;
use tilepress::container::ContainerError;
use tilepress::partition::PartitionError;
use tilepress::producer::ProducerError;
use tilepress::raster::SourceError;
use tilepress::sequencer::SequencerError;
use tilepress::transport::TransportError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(std::io::Error),
    /// Invalid configuration or command-line value
    Config(String),
    /// Config file could not be read
    ConfigFile(ConfigFileError),
    /// Rank or process count out of range
    Partition(PartitionError),
    /// Input image could not be opened
    Source { path: String, error: SourceError },
    /// Sequencer setup failed
    Sequencer(SequencerError),
    /// Connecting ranks failed
    Transport(TransportError),
    /// Collector run failed
    Container(ContainerError),
    /// Producer run failed
    Producer(ProducerError),
    /// Output or side file could not be written
    FileWrite { path: String, error: std::io::Error },
}

impl CliError {
    /// Exit the process with an error message and status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Transport(_)
            | CliError::Container(ContainerError::Assembler(_))
            | CliError::Producer(ProducerError::Transport(_)) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. Every rank must be started with the same --size");
                eprintln!("  2. Producers need the collector's --collector-address");
                eprintln!("  3. Set --read-timeout to fail instead of waiting on a lost rank");
            }
            CliError::Source { .. } => {
                eprintln!();
                eprintln!("Supported inputs are PNG, TIFF and JPEG images.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Partition(e) => write!(f, "Invalid rank setup: {}", e),
            CliError::Source { path, error } => {
                write!(f, "Failed to read image '{}': {}", path, error)
            }
            CliError::Sequencer(e) => write!(f, "Failed to set up tiles: {}", e),
            CliError::Transport(e) => write!(f, "Failed to connect ranks: {}", e),
            CliError::Container(e) => write!(f, "Overview build failed: {}", e),
            CliError::Producer(e) => write!(f, "Producer failed: {}", e),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path, error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::ConfigFile(e) => Some(e),
            CliError::Partition(e) => Some(e),
            CliError::Source { error, .. } => Some(error),
            CliError::Sequencer(e) => Some(e),
            CliError::Transport(e) => Some(e),
            CliError::Container(e) => Some(e),
            CliError::Producer(e) => Some(e),
            CliError::FileWrite { error, .. } => Some(error),
            CliError::Config(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<PartitionError> for CliError {
    fn from(e: PartitionError) -> Self {
        CliError::Partition(e)
    }
}

impl From<SequencerError> for CliError {
    fn from(e: SequencerError) -> Self {
        CliError::Sequencer(e)
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Transport(e)
    }
}

impl From<ContainerError> for CliError {
    fn from(e: ContainerError) -> Self {
        CliError::Container(e)
    }
}

impl From<ProducerError> for CliError {
    fn from(e: ProducerError) -> Self {
        CliError::Producer(e)
    }
}
