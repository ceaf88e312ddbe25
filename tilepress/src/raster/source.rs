//! Upstream image sources.

use std::collections::HashSet;

use thiserror::Error;

use super::buffer::TileBuffer;
use super::scalar::ScalarType;
use crate::geometry::Rect;

/// Errors returned by an image source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The requested resolution level does not exist.
    #[error("Resolution level {level} not available (source has {levels})")]
    InvalidLevel { level: u32, levels: u32 },

    /// Reading the tile failed.
    #[error("Tile read failed for {rect}: {reason}")]
    ReadFailed { rect: Rect, reason: String },

    /// The image could not be opened or decoded.
    #[error("Failed to open image: {0}")]
    Open(#[from] image::ImageError),
}

/// Raster input feeding the sequencer.
///
/// Implementations must fill any part of a requested rectangle that falls
/// outside the image with the band null value, reporting `Partial` or
/// `Null` status accordingly.
pub trait ImageSource: Send {
    /// Full image rectangle at a resolution level.
    fn image_rect(&self, level: u32) -> Rect;

    /// Native tile size, used when the caller does not set one.
    fn tile_size(&self) -> (u32, u32);

    /// Read a rectangle at a resolution level.
    fn get_tile(&self, rect: Rect, level: u32) -> Result<TileBuffer, SourceError>;

    fn output_scalar_type(&self) -> ScalarType;

    fn number_of_output_bands(&self) -> u32;

    fn null_pixel_value(&self, band: u32) -> f64;

    fn min_pixel_value(&self, band: u32) -> f64;

    fn max_pixel_value(&self, band: u32) -> f64;
}

/// In-memory raster with power-of-two reduced resolution levels.
///
/// Level `n` is a nearest-neighbour view of level 0 decimated by `2^n`.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    full: TileBuffer,
    tile_size: (u32, u32),
    levels: u32,
    failing: HashSet<Rect>,
}

impl MemoryImage {
    /// Wrap a full-resolution raster. The raster's rect must start at the
    /// origin.
    pub fn new(full: TileBuffer) -> Self {
        let (w, h) = (full.width(), full.height());
        let levels = 1 + (w.max(h).max(1) as f64).log2().floor() as u32;
        Self {
            full,
            tile_size: (256, 256),
            levels,
            failing: HashSet::new(),
        }
    }

    /// Constant-valued raster, handy for tests.
    pub fn uniform(width: u32, height: u32, scalar: ScalarType, bands: u32, value: f64) -> Self {
        let mut full = TileBuffer::with_defaults(Rect::from_size(width, height), scalar, bands);
        for band in 0..bands {
            full.fill_band(band, value);
        }
        full.validate();
        Self::new(full)
    }

    /// Set the native tile size reported to the sequencer.
    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_size = (width, height);
        self
    }

    /// Make `get_tile` fail for exactly this rectangle.
    pub fn with_failing_rect(mut self, rect: Rect) -> Self {
        self.failing.insert(rect);
        self
    }

    /// Mutable access to the full-resolution raster.
    pub fn raster_mut(&mut self) -> &mut TileBuffer {
        &mut self.full
    }

    pub fn raster(&self) -> &TileBuffer {
        &self.full
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    fn blank(&self, rect: Rect) -> TileBuffer {
        let bands = self.full.bands();
        TileBuffer::new(
            rect,
            self.full.scalar(),
            bands,
            (0..bands).map(|b| self.full.null_value(b)).collect(),
            (0..bands).map(|b| self.full.min_value(b)).collect(),
            (0..bands).map(|b| self.full.max_value(b)).collect(),
        )
    }
}

impl ImageSource for MemoryImage {
    fn image_rect(&self, level: u32) -> Rect {
        let factor = 1u32 << level.min(31);
        Rect::from_size(
            self.full.width().div_ceil(factor),
            self.full.height().div_ceil(factor),
        )
    }

    fn tile_size(&self) -> (u32, u32) {
        self.tile_size
    }

    fn get_tile(&self, rect: Rect, level: u32) -> Result<TileBuffer, SourceError> {
        if level >= self.levels {
            return Err(SourceError::InvalidLevel {
                level,
                levels: self.levels,
            });
        }
        if self.failing.contains(&rect) {
            return Err(SourceError::ReadFailed {
                rect,
                reason: "injected failure".to_string(),
            });
        }

        let mut tile = self.blank(rect);
        if level == 0 {
            tile.copy_overlap_from(&self.full);
        } else if let Some(overlap) = rect.intersection(&self.image_rect(level)) {
            let factor = 1u32 << level;
            for band in 0..tile.bands() {
                for y in 0..overlap.height {
                    for x in 0..overlap.width {
                        let ix = (overlap.x + i64::from(x)) as u32;
                        let iy = (overlap.y + i64::from(y)) as u32;
                        let value = self.full.sample(band, ix * factor, iy * factor);
                        tile.set_sample(
                            band,
                            (overlap.x - rect.x) as u32 + x,
                            (overlap.y - rect.y) as u32 + y,
                            value,
                        );
                    }
                }
            }
        }

        tile.validate();
        Ok(tile)
    }

    fn output_scalar_type(&self) -> ScalarType {
        self.full.scalar()
    }

    fn number_of_output_bands(&self) -> u32 {
        self.full.bands()
    }

    fn null_pixel_value(&self, band: u32) -> f64 {
        self.full.null_value(band)
    }

    fn min_pixel_value(&self, band: u32) -> f64 {
        self.full.min_value(band)
    }

    fn max_pixel_value(&self, band: u32) -> f64 {
        self.full.max_value(band)
    }
}
