//! Per-band histograms with tile subsampling.

use std::path::Path;

use ini::Ini;
use tracing::info;

use super::StatsError;
use crate::raster::{ScalarType, TileBuffer};

/// Pixel budget for [`HistogramMode::Fast`]: roughly one hundred 256×256 tiles.
pub const HISTOGRAM_PIXEL_BUDGET: u64 = 100 * 256 * 256;

/// Bin cap for integer types with a wide range.
const MAX_INTEGER_BINS: usize = 65536;

/// Bin count for floating point types.
const FLOAT_BINS: usize = 512;

/// Histogram collection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistogramMode {
    #[default]
    None,
    /// Every tile is sampled.
    Normal,
    /// Every K-th tile is sampled, see [`sampling_interval`].
    Fast,
}

impl HistogramMode {
    pub fn name(&self) -> &'static str {
        match self {
            HistogramMode::None => "none",
            HistogramMode::Normal => "normal",
            HistogramMode::Fast => "fast",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != HistogramMode::None
    }
}

impl std::str::FromStr for HistogramMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(HistogramMode::None),
            "normal" => Ok(HistogramMode::Normal),
            "fast" => Ok(HistogramMode::Fast),
            other => Err(format!(
                "unknown histogram mode '{}', expected 'none', 'normal' or 'fast'",
                other
            )),
        }
    }
}

impl std::fmt::Display for HistogramMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tile sampling interval K: a tile is sampled when `index % K == 0`.
///
/// `Fast` picks K so that roughly [`HISTOGRAM_PIXEL_BUDGET`] pixels are
/// sampled; it never goes below 1.
///
/// # Example
///
/// ```
/// use tilepress::stats::{sampling_interval, HistogramMode};
///
/// // 1024 tiles of 256×256 is about ten times the budget.
/// assert_eq!(sampling_interval(HistogramMode::Fast, 1024 * 256 * 256), 10);
/// assert_eq!(sampling_interval(HistogramMode::Normal, 1024 * 256 * 256), 1);
/// ```
pub fn sampling_interval(mode: HistogramMode, total_pixels: u64) -> u32 {
    match mode {
        HistogramMode::Fast if total_pixels > HISTOGRAM_PIXEL_BUDGET => {
            let k = (total_pixels as f64 / HISTOGRAM_PIXEL_BUDGET as f64).round();
            (k as u32).max(1)
        }
        _ => 1,
    }
}

/// Bin counts for one band over `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandHistogram {
    min: f64,
    max: f64,
    bin_width: f64,
    counts: Vec<u64>,
}

impl BandHistogram {
    fn new(scalar: ScalarType, min: f64, max: f64) -> Self {
        let (min, max) = if max < min { (max, min) } else { (min, max) };
        let (bins, bin_width) = if scalar.is_float() {
            let width = if max > min {
                (max - min) / FLOAT_BINS as f64
            } else {
                1.0
            };
            (FLOAT_BINS, width)
        } else {
            let span = max - min + 1.0;
            let bins = span.min(MAX_INTEGER_BINS as f64).max(1.0) as usize;
            (bins, (span / bins as f64).ceil().max(1.0))
        };
        Self {
            min,
            max,
            bin_width,
            counts: vec![0; bins],
        }
    }

    fn bin_of(&self, value: f64) -> usize {
        let index = ((value - self.min) / self.bin_width).floor();
        if index <= 0.0 {
            0
        } else {
            (index as usize).min(self.counts.len() - 1)
        }
    }

    pub fn add(&mut self, value: f64) {
        let bin = self.bin_of(value);
        self.counts[bin] += 1;
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Multi-band histogram built from a source's pixel range.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    bands: Vec<BandHistogram>,
}

impl Histogram {
    /// One band histogram per `(min, max)` pair.
    pub fn new(scalar: ScalarType, ranges: &[(f64, f64)]) -> Self {
        Self {
            bands: ranges
                .iter()
                .map(|&(min, max)| BandHistogram::new(scalar, min, max))
                .collect(),
        }
    }

    pub fn bands(&self) -> &[BandHistogram] {
        &self.bands
    }

    /// Count every non-null sample of `tile`.
    pub fn populate(&mut self, tile: &TileBuffer) {
        let band_len = tile.band_len();
        let bands = (tile.bands() as usize).min(self.bands.len());
        if tile.data().is_empty() {
            return;
        }
        for band in 0..bands {
            let null = tile.data().narrow(tile.null_value(band as u32));
            let start = band * band_len;
            for i in start..start + band_len {
                let v = tile.data().get(i);
                if v != null {
                    self.bands[band].add(v);
                }
            }
        }
    }
}

/// Write `histogram` as a flat key-value file, one section per band.
///
/// Only non-empty bins are listed.
pub fn write_histogram(path: &Path, histogram: &Histogram) -> Result<(), StatsError> {
    if histogram.bands().is_empty() {
        return Err(StatsError::Empty("histogram has no bands".to_string()));
    }

    let mut ini = Ini::new();
    ini.with_section(None::<String>)
        .set("type", "histogram")
        .set("number_bands", histogram.bands().len().to_string());

    for (band, h) in histogram.bands().iter().enumerate() {
        let mut section = ini.with_section(Some(format!("band{}", band + 1)));
        section
            .set("bins", h.bins().to_string())
            .set("min_value", h.min().to_string())
            .set("max_value", h.max().to_string())
            .set("count", h.total().to_string());
        for (bin, count) in h.counts().iter().enumerate().filter(|(_, c)| **c > 0) {
            section.set(format!("bin{}", bin), count.to_string());
        }
    }

    ini.write_to_file(path).map_err(|source| StatsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "wrote histogram");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn test_sampling_interval_fast_rounds() {
        assert_eq!(sampling_interval(HistogramMode::Fast, HISTOGRAM_PIXEL_BUDGET), 1);
        assert_eq!(sampling_interval(HistogramMode::Fast, 1000), 1);
        assert_eq!(
            sampling_interval(HistogramMode::Fast, HISTOGRAM_PIXEL_BUDGET * 5 / 2),
            3
        );
        assert_eq!(
            sampling_interval(HistogramMode::Fast, HISTOGRAM_PIXEL_BUDGET * 12),
            12
        );
    }

    #[test]
    fn test_sampling_interval_normal_and_none() {
        assert_eq!(sampling_interval(HistogramMode::Normal, u64::MAX / 2), 1);
        assert_eq!(sampling_interval(HistogramMode::None, u64::MAX / 2), 1);
    }

    #[test]
    fn test_u8_histogram_has_one_bin_per_value() {
        let mut tile = TileBuffer::with_defaults(Rect::from_size(4, 1), ScalarType::U8, 1);
        for (x, v) in [0.0, 7.0, 7.0, 255.0].iter().enumerate() {
            tile.set_sample(0, x as u32, 0, *v);
        }

        let mut histogram = Histogram::new(ScalarType::U8, &[(0.0, 255.0)]);
        histogram.populate(&tile);

        let band = &histogram.bands()[0];
        assert_eq!(band.bins(), 256);
        assert_eq!(band.counts()[7], 2);
        assert_eq!(band.counts()[255], 1);
        // The null sample is not counted.
        assert_eq!(band.total(), 3);
    }

    #[test]
    fn test_float_histogram_clamps_out_of_range() {
        let mut h = BandHistogram::new(ScalarType::F32, 0.0, 1.0);
        h.add(-5.0);
        h.add(1.0);
        h.add(42.0);
        assert_eq!(h.counts()[0], 1);
        assert_eq!(h.counts()[FLOAT_BINS - 1], 2);
    }

    #[test]
    fn test_write_histogram_lists_non_empty_bins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overview.his");

        let mut histogram = Histogram::new(ScalarType::U8, &[(0.0, 255.0)]);
        histogram.bands[0].add(12.0);
        histogram.bands[0].add(12.0);
        write_histogram(&path, &histogram).unwrap();

        let ini = Ini::load_from_file(&path).unwrap();
        let band = ini.section(Some("band1")).unwrap();
        assert_eq!(band.get("bins"), Some("256"));
        assert_eq!(band.get("bin12"), Some("2"));
        assert_eq!(band.get("bin13"), None);
    }
}
