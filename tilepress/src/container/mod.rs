//! Overview container: a fixed header followed by the assembled codestream.
//!
//! ```text
//! +-------------------+----------------------------------------------+
//! | header (64 bytes) | codestream: main header, TLM, tile-parts ... |
//! +-------------------+----------------------------------------------+
//! ```
//!
//! The header is written first with zero lengths and rewritten once the
//! codestream is complete.

mod header;
mod writer;

use thiserror::Error;

pub use header::{read_header, ContainerHeader, HEADER_BYTES, MAGIC, VERSION};
pub use writer::{inspect, Inspection, OverviewSummary, OverviewWriter};

use crate::assembler::AssemblerError;
use crate::codestream::CompressError;
use crate::sequencer::SequencerError;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Not an overview container (bad magic)")]
    BadMagic,

    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("Container truncated after {0} bytes")]
    Truncated(usize),

    #[error("Corrupt container: {0}")]
    Corrupt(String),

    #[error("{field} value {value} does not fit the header")]
    FieldOverflow { field: &'static str, value: u32 },

    #[error("Only the collector writes the container, this is rank {0}")]
    NotCollector(u32),

    #[error(transparent)]
    Assembler(#[from] AssemblerError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error(transparent)]
    Codestream(#[from] CompressError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
