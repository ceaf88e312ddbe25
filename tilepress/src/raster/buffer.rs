//! Multi-band raster tiles.

use super::scalar::{Pixel, ScalarType};
use crate::geometry::Rect;

/// Content status of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    /// Every sample is null (or the tile has no storage).
    Null,
    /// Some samples are null.
    Partial,
    /// No sample is null.
    Full,
}

/// Band-sequential typed sample storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    S8(Vec<i8>),
    U16(Vec<u16>),
    S16(Vec<i16>),
    U32(Vec<u32>),
    S32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    /// No storage: the scalar type is not known.
    None,
}

/// Apply `$body` to the typed vector inside a [`PixelData`], binding it to
/// `$v`. The `None` variant evaluates `$none`.
macro_rules! with_pixels {
    ($data:expr, $v:ident => $body:expr, None => $none:expr) => {
        match $data {
            PixelData::U8($v) => $body,
            PixelData::S8($v) => $body,
            PixelData::U16($v) => $body,
            PixelData::S16($v) => $body,
            PixelData::U32($v) => $body,
            PixelData::S32($v) => $body,
            PixelData::F32($v) => $body,
            PixelData::F64($v) => $body,
            PixelData::None => $none,
        }
    };
}

impl PixelData {
    /// Allocate zeroed storage for `len` samples of `scalar`.
    pub fn zeroed(scalar: ScalarType, len: usize) -> Self {
        match scalar {
            ScalarType::U8 => PixelData::U8(vec![0; len]),
            ScalarType::S8 => PixelData::S8(vec![0; len]),
            ScalarType::U16 | ScalarType::U11 => PixelData::U16(vec![0; len]),
            ScalarType::S16 => PixelData::S16(vec![0; len]),
            ScalarType::U32 => PixelData::U32(vec![0; len]),
            ScalarType::S32 => PixelData::S32(vec![0; len]),
            ScalarType::F32 => PixelData::F32(vec![0.0; len]),
            ScalarType::F64 | ScalarType::NormalizedF64 => PixelData::F64(vec![0.0; len]),
            ScalarType::Unknown => PixelData::None,
        }
    }

    pub fn len(&self) -> usize {
        with_pixels!(self, v => v.len(), None => 0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> f64 {
        with_pixels!(self, v => v[index].to_f64(), None => 0.0)
    }

    pub fn set(&mut self, index: usize, value: f64) {
        with_pixels!(self, v => v[index] = Pixel::from_f64(value), None => ())
    }

    /// Fill `range` with `value`.
    pub fn fill(&mut self, range: std::ops::Range<usize>, value: f64) {
        fn fill_typed<T: Pixel>(v: &mut [T], range: std::ops::Range<usize>, value: f64) {
            let value = T::from_f64(value);
            v[range].iter_mut().for_each(|p| *p = value);
        }
        with_pixels!(self, v => fill_typed(v, range, value), None => ())
    }

    /// `value` after a round trip through the storage type.
    pub fn narrow(&self, value: f64) -> f64 {
        fn narrow_as<T: Pixel>(_: &[T], value: f64) -> f64 {
            T::from_f64(value).to_f64()
        }
        with_pixels!(self, v => narrow_as(v, value), None => value)
    }

    /// Big-endian encoding of every sample, in storage order.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        fn encode<T: Pixel>(v: &[T]) -> Vec<u8> {
            let mut out = Vec::with_capacity(std::mem::size_of_val(v));
            v.iter().for_each(|p| p.write_be(&mut out));
            out
        }
        with_pixels!(self, v => encode(v), None => Vec::new())
    }
}

/// A multi-band raster block with per-band null, min and max values.
///
/// Samples are stored band-sequential: band `b`, line `y`, sample `x` lives
/// at `b * width * height + y * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct TileBuffer {
    rect: Rect,
    scalar: ScalarType,
    bands: u32,
    data: PixelData,
    null_values: Vec<f64>,
    min_values: Vec<f64>,
    max_values: Vec<f64>,
    status: TileStatus,
}

impl TileBuffer {
    /// Allocate a blank tile covering `rect`.
    pub fn new(
        rect: Rect,
        scalar: ScalarType,
        bands: u32,
        null_values: Vec<f64>,
        min_values: Vec<f64>,
        max_values: Vec<f64>,
    ) -> Self {
        let len = rect.area() as usize * bands as usize;
        let mut tile = Self {
            rect,
            scalar,
            bands,
            data: PixelData::zeroed(scalar, len),
            null_values,
            min_values,
            max_values,
            status: TileStatus::Null,
        };
        tile.make_blank();
        tile
    }

    /// Allocate a blank tile using the scalar type's default null/min/max.
    pub fn with_defaults(rect: Rect, scalar: ScalarType, bands: u32) -> Self {
        let n = bands as usize;
        Self::new(
            rect,
            scalar,
            bands,
            vec![scalar.default_null(); n],
            vec![scalar.default_min(); n],
            vec![scalar.default_max(); n],
        )
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Move the tile to a new position. The size must not change.
    pub fn set_image_rect(&mut self, rect: Rect) {
        debug_assert_eq!(
            (rect.width, rect.height),
            (self.rect.width, self.rect.height),
            "tile buffers are reused at a fixed size"
        );
        self.rect = rect;
    }

    pub fn width(&self) -> u32 {
        self.rect.width
    }

    pub fn height(&self) -> u32 {
        self.rect.height
    }

    pub fn scalar(&self) -> ScalarType {
        self.scalar
    }

    pub fn bands(&self) -> u32 {
        self.bands
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut PixelData {
        &mut self.data
    }

    pub fn status(&self) -> TileStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TileStatus) {
        self.status = status;
    }

    pub fn null_value(&self, band: u32) -> f64 {
        self.null_values
            .get(band as usize)
            .copied()
            .unwrap_or_else(|| self.scalar.default_null())
    }

    pub fn min_value(&self, band: u32) -> f64 {
        self.min_values
            .get(band as usize)
            .copied()
            .unwrap_or_else(|| self.scalar.default_min())
    }

    pub fn max_value(&self, band: u32) -> f64 {
        self.max_values
            .get(band as usize)
            .copied()
            .unwrap_or_else(|| self.scalar.default_max())
    }

    /// Samples per band.
    pub fn band_len(&self) -> usize {
        self.rect.area() as usize
    }

    /// Bytes held by the sample storage.
    pub fn size_in_bytes(&self) -> usize {
        self.data.len() * self.scalar.storage_bytes()
    }

    fn index(&self, band: u32, x: u32, y: u32) -> usize {
        band as usize * self.band_len() + y as usize * self.rect.width as usize + x as usize
    }

    /// Sample at tile-relative `(x, y)`.
    pub fn sample(&self, band: u32, x: u32, y: u32) -> f64 {
        self.data.get(self.index(band, x, y))
    }

    pub fn set_sample(&mut self, band: u32, x: u32, y: u32, value: f64) {
        let index = self.index(band, x, y);
        self.data.set(index, value);
    }

    /// Fill every band with its null value and mark the tile null.
    pub fn make_blank(&mut self) {
        let band_len = self.band_len();
        for band in 0..self.bands {
            let start = band as usize * band_len;
            let null = self.null_value(band);
            self.data.fill(start..start + band_len, null);
        }
        self.status = TileStatus::Null;
    }

    /// Fill one band with a constant.
    pub fn fill_band(&mut self, band: u32, value: f64) {
        let band_len = self.band_len();
        let start = band as usize * band_len;
        self.data.fill(start..start + band_len, value);
    }

    /// Recompute the status from the sample content.
    pub fn validate(&mut self) -> TileStatus {
        if self.data.is_empty() {
            self.status = TileStatus::Null;
            return self.status;
        }

        let band_len = self.band_len();
        let mut nulls = 0usize;
        for band in 0..self.bands {
            let null = self.data.narrow(self.null_value(band));
            let start = band as usize * band_len;
            nulls += (start..start + band_len)
                .filter(|&i| self.data.get(i) == null)
                .count();
        }

        self.status = if nulls == self.data.len() {
            TileStatus::Null
        } else if nulls == 0 {
            TileStatus::Full
        } else {
            TileStatus::Partial
        };
        self.status
    }

    /// Copy the overlap of `src` into this tile, matching image coordinates.
    ///
    /// Samples outside the overlap are left untouched.
    pub fn copy_overlap_from(&mut self, src: &TileBuffer) {
        let Some(overlap) = self.rect.intersection(&src.rect) else {
            return;
        };
        let bands = self.bands.min(src.bands);
        let dst_x = (overlap.x - self.rect.x) as usize;
        let dst_y = (overlap.y - self.rect.y) as usize;
        let src_x = (overlap.x - src.rect.x) as usize;
        let src_y = (overlap.y - src.rect.y) as usize;
        let (dst_w, src_w) = (self.rect.width as usize, src.rect.width as usize);
        let (dst_band, src_band) = (self.band_len(), src.band_len());
        let (w, h) = (overlap.width as usize, overlap.height as usize);

        fn copy_rows<T: Pixel>(
            dst: &mut [T],
            src: &[T],
            layout: [usize; 10],
            bands: u32,
        ) -> bool {
            let [dst_x, dst_y, src_x, src_y, dst_w, src_w, dst_band, src_band, w, h] = layout;
            for band in 0..bands as usize {
                for line in 0..h {
                    let d = band * dst_band + (dst_y + line) * dst_w + dst_x;
                    let s = band * src_band + (src_y + line) * src_w + src_x;
                    dst[d..d + w].copy_from_slice(&src[s..s + w]);
                }
            }
            true
        }

        let layout = [
            dst_x, dst_y, src_x, src_y, dst_w, src_w, dst_band, src_band, w, h,
        ];
        let typed = match (&mut self.data, &src.data) {
            (PixelData::U8(d), PixelData::U8(s)) => copy_rows(d, s, layout, bands),
            (PixelData::S8(d), PixelData::S8(s)) => copy_rows(d, s, layout, bands),
            (PixelData::U16(d), PixelData::U16(s)) => copy_rows(d, s, layout, bands),
            (PixelData::S16(d), PixelData::S16(s)) => copy_rows(d, s, layout, bands),
            (PixelData::U32(d), PixelData::U32(s)) => copy_rows(d, s, layout, bands),
            (PixelData::S32(d), PixelData::S32(s)) => copy_rows(d, s, layout, bands),
            (PixelData::F32(d), PixelData::F32(s)) => copy_rows(d, s, layout, bands),
            (PixelData::F64(d), PixelData::F64(s)) => copy_rows(d, s, layout, bands),
            _ => false,
        };
        if typed {
            return;
        }

        // Mixed storage: convert sample by sample.
        for band in 0..bands as usize {
            for line in 0..h {
                for samp in 0..w {
                    let d = band * dst_band + (dst_y + line) * dst_w + dst_x + samp;
                    let s = band * src_band + (src_y + line) * src_w + src_x + samp;
                    let value = src.data.get(s);
                    self.data.set(d, value);
                }
            }
        }
    }
}
