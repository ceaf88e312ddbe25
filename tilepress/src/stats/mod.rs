//! Optional per-band statistics gathered while sequencing.
//!
//! - [`BandStatistics`] - running min/max (and null candidate) per band
//! - [`Histogram`] - per-band bin counts, sampled every K-th tile
//! - [`write_omd_file`] / [`write_histogram`] - flat key-value side files
//!
//! The sequencer owns these accumulators and feeds every input tile through
//! them before resampling.

mod histogram;
mod omd;

use std::path::PathBuf;

use thiserror::Error;

use crate::raster::TileBuffer;

pub use histogram::{
    sampling_interval, write_histogram, BandHistogram, Histogram, HistogramMode,
    HISTOGRAM_PIXEL_BUDGET,
};
pub use omd::{resolve_omd_values, write_omd_file, OmdValues, FALLBACK_NULL};

/// Errors writing statistics side files.
#[derive(Debug, Error)]
pub enum StatsError {
    /// An existing side file could not be parsed.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// The side file could not be written.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Nothing to write.
    #[error("No statistics available: {0}")]
    Empty(String),
}

/// Which statistics scan runs over each input tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    None,
    /// Min and max, excluding the tile's null value.
    MinMax,
    /// Min and max, with the smallest value seen taken as the null.
    MinMaxNull,
}

impl ScanMode {
    pub fn name(&self) -> &'static str {
        match self {
            ScanMode::None => "none",
            ScanMode::MinMax => "min_max",
            ScanMode::MinMaxNull => "min_max_null",
        }
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(ScanMode::None),
            "min_max" | "minmax" => Ok(ScanMode::MinMax),
            "min_max_null" | "minmaxnull" => Ok(ScanMode::MinMaxNull),
            other => Err(format!(
                "unknown scan mode '{}', expected 'none', 'min_max' or 'min_max_null'",
                other
            )),
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Running per-band statistics.
///
/// The arrays start empty and are sized by the first scanned tile. For the
/// null scan the null candidate starts at the band max and min only accepts
/// values above the current candidate, so a displaced candidate is folded
/// back into min.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BandStatistics {
    min_values: Vec<f64>,
    max_values: Vec<f64>,
    null_values: Vec<f64>,
}

impl BandStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.min_values.clear();
        self.max_values.clear();
        self.null_values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.min_values.is_empty()
    }

    pub fn min_values(&self) -> &[f64] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[f64] {
        &self.max_values
    }

    pub fn null_values(&self) -> &[f64] {
        &self.null_values
    }

    fn ensure_sized(&mut self, tile: &TileBuffer, with_null: bool) {
        let bands = tile.bands() as usize;
        if self.min_values.len() != bands {
            self.min_values = (0..tile.bands()).map(|b| tile.max_value(b)).collect();
        }
        if self.max_values.len() != bands {
            self.max_values = (0..tile.bands()).map(|b| tile.min_value(b)).collect();
        }
        if with_null && self.null_values.len() != bands {
            self.null_values = (0..tile.bands()).map(|b| tile.max_value(b)).collect();
        }
    }

    /// Fold a tile into the accumulators according to `mode`.
    pub fn scan(&mut self, tile: &TileBuffer, mode: ScanMode) {
        match mode {
            ScanMode::None => {}
            ScanMode::MinMax => self.scan_min_max(tile),
            ScanMode::MinMaxNull => self.scan_min_max_null(tile),
        }
    }

    fn scan_min_max(&mut self, tile: &TileBuffer) {
        if tile.data().is_empty() {
            return;
        }
        self.ensure_sized(tile, false);
        let band_len = tile.band_len();
        for band in 0..tile.bands() {
            let b = band as usize;
            let null = tile.data().narrow(tile.null_value(band));
            let start = b * band_len;
            for i in start..start + band_len {
                let v = tile.data().get(i);
                if v == null {
                    continue;
                }
                if v < self.min_values[b] {
                    self.min_values[b] = v;
                }
                if v > self.max_values[b] {
                    self.max_values[b] = v;
                }
            }
        }
    }

    fn scan_min_max_null(&mut self, tile: &TileBuffer) {
        if tile.data().is_empty() {
            return;
        }
        self.ensure_sized(tile, true);
        let band_len = tile.band_len();
        for band in 0..tile.bands() as usize {
            let start = band * band_len;
            for i in start..start + band_len {
                let v = tile.data().get(i);
                if v < self.null_values[band] {
                    let displaced = self.null_values[band];
                    if displaced < self.min_values[band] {
                        self.min_values[band] = displaced;
                    }
                    self.null_values[band] = v;
                } else if v > self.null_values[band] && v < self.min_values[band] {
                    self.min_values[band] = v;
                }
                if v > self.max_values[band] {
                    self.max_values[band] = v;
                }
            }
        }
    }
}
