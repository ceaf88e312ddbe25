//! Tilepress - distributed overview building for large rasters
//!
//! An overview is a decimated copy of a source image, cut into tiles that
//! are compressed independently and assembled into one codestream with a
//! tile-part length table (TLM) in its main header.
//!
//! ```text
//!  producer r:  ImageSource ─► Resampler ─► TileCompressor ─► Transport ─┐
//!                                                                        │
//!  collector:   StreamAssembler ◄── tiles in index order ◄───────────────┘
//!                    │
//!                    └─► container header │ main header │ TLM │ tiles ...
//! ```
//!
//! A single-process run skips the transport: the collector's own
//! [`sequencer::TileSequencer`] produces every tile.

pub mod assembler;
pub mod codestream;
pub mod config;
pub mod container;
pub mod geometry;
pub mod logging;
pub mod partition;
pub mod producer;
pub mod raster;
pub mod resample;
pub mod sequencer;
pub mod stats;
pub mod tlm;
pub mod transport;
