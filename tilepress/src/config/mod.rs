//! Configuration file for overview builds.
//!
//! Settings live in `~/.tilepress/config.ini`. A missing file means
//! defaults; command-line flags override whatever the file says.
//!
//! # Example
//!
//! ```
//! use tilepress::config::ConfigFile;
//! use tilepress::resample::ResampleMethod;
//!
//! let config = ConfigFile::default();
//! assert_eq!(config.overview.tile_size, 1024);
//! assert_eq!(config.overview.resample, ResampleMethod::Box);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::*;
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{
    CodestreamSettings, ConfigFile, LoggingSettings, OverviewSettings, TransportSettings,
};
