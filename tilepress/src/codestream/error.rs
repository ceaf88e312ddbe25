//! Error types for tile compression and codestream parsing.

use thiserror::Error;

use crate::raster::ScalarType;

/// Errors from a [`super::TileCompressor`] or the codestream parser.
#[derive(Debug, Error)]
pub enum CompressError {
    /// `write_tile` or `finish` called without a successful `create`.
    #[error("Compressor not created")]
    NotCreated,

    /// The pixel type cannot be encoded.
    #[error("Unsupported pixel type: {0}")]
    UnsupportedScalar(ScalarType),

    /// Tile does not match the parameters given to `create`.
    #[error("Tile mismatch: {0}")]
    TileMismatch(String),

    /// A field does not fit its codestream representation.
    #[error("{field} value {value} does not fit the codestream")]
    FieldOverflow { field: &'static str, value: u64 },

    /// Malformed codestream found while parsing.
    #[error("Malformed codestream at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// Writing the stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompressError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        CompressError::Malformed {
            offset,
            reason: reason.into(),
        }
    }
}
