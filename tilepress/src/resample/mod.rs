//! Decimation of source tiles into overview tiles.
//!
//! Two filters are available:
//!
//! - **Nearest neighbour**: output `(x, y)` takes input `(x·d, y·d)`.
//! - **Box** (default): output `(x, y)` is the mean of the 2×2 input block
//!   anchored at `(x·d, y·d)`. Samples equal to the band null are left out
//!   of both the sum and the divisor, so a block with one valid sample yields
//!   that sample and a block with none yields null. The box filter is only
//!   defined for a decimation factor of 2.
//!
//! Accumulation is done in `f64` and narrowed back to the storage type with
//! truncation.

use thiserror::Error;

use crate::raster::{Pixel, PixelData, ScalarType, TileBuffer};

/// Errors from the resampler. All of them are configuration problems; the
/// sequencer logs them and leaves the output tile blank.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResampleError {
    /// Pixel type has no storage to resample.
    #[error("Unsupported pixel type: {0}")]
    UnsupportedScalar(ScalarType),

    /// Input and output tiles use different storage.
    #[error("Pixel type mismatch: input {input}, output {output}")]
    ScalarMismatch {
        input: ScalarType,
        output: ScalarType,
    },

    /// Box filtering needs exactly a factor of two.
    #[error("Box resampling requires a decimation factor of 2, got {0}")]
    BoxRequiresFactorTwo(u32),

    /// Decimation factor of zero.
    #[error("Decimation factor must be at least 1")]
    ZeroDecimation,

    /// The input tile does not cover the decimated output.
    #[error("Input tile {input_width}×{input_height} too small for output {output_width}×{output_height} at factor {decimation}")]
    InputTooSmall {
        input_width: u32,
        input_height: u32,
        output_width: u32,
        output_height: u32,
        decimation: u32,
    },

    /// The input tile has fewer bands than the output.
    #[error("Input has {input} bands, output needs {output}")]
    BandMismatch { input: u32, output: u32 },
}

/// Resampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    NearestNeighbor,
    #[default]
    Box,
}

impl ResampleMethod {
    pub fn name(&self) -> &'static str {
        match self {
            ResampleMethod::NearestNeighbor => "nearest",
            ResampleMethod::Box => "box",
        }
    }
}

impl std::str::FromStr for ResampleMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "box" => Ok(ResampleMethod::Box),
            "nearest" | "nearest_neighbor" | "nearest-neighbor" => {
                Ok(ResampleMethod::NearestNeighbor)
            }
            other => Err(format!(
                "unknown resample method '{}', expected 'box' or 'nearest'",
                other
            )),
        }
    }
}

impl std::fmt::Display for ResampleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sample offsets shared by the typed kernels.
#[derive(Debug, Clone, Copy)]
struct Layout {
    bands: usize,
    out_width: usize,
    out_height: usize,
    in_width: usize,
    in_band_len: usize,
    out_band_len: usize,
    decimation: usize,
}

/// Decimating resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resampler {
    method: ResampleMethod,
    decimation: u32,
}

impl Resampler {
    pub fn new(method: ResampleMethod, decimation: u32) -> Self {
        Self { method, decimation }
    }

    pub fn method(&self) -> ResampleMethod {
        self.method
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    /// Fill every sample of `output` from `input`.
    ///
    /// `input` must be at least `decimation` times the size of `output`.
    /// Null values are taken from the input tile.
    pub fn resample(&self, input: &TileBuffer, output: &mut TileBuffer) -> Result<(), ResampleError> {
        let d = self.decimation;
        if d == 0 {
            return Err(ResampleError::ZeroDecimation);
        }
        if self.method == ResampleMethod::Box && d != 2 {
            return Err(ResampleError::BoxRequiresFactorTwo(d));
        }
        if input.width() < output.width() * d || input.height() < output.height() * d {
            return Err(ResampleError::InputTooSmall {
                input_width: input.width(),
                input_height: input.height(),
                output_width: output.width(),
                output_height: output.height(),
                decimation: d,
            });
        }
        if input.bands() < output.bands() {
            return Err(ResampleError::BandMismatch {
                input: input.bands(),
                output: output.bands(),
            });
        }

        let layout = Layout {
            bands: output.bands() as usize,
            out_width: output.width() as usize,
            out_height: output.height() as usize,
            in_width: input.width() as usize,
            in_band_len: input.band_len(),
            out_band_len: output.band_len(),
            decimation: d as usize,
        };
        let nulls: Vec<f64> = (0..output.bands()).map(|b| input.null_value(b)).collect();
        let method = self.method;
        let (input_scalar, output_scalar) = (input.scalar(), output.scalar());

        macro_rules! run {
            ($s:expr, $d:expr) => {
                match method {
                    ResampleMethod::NearestNeighbor => nearest($s, $d, layout),
                    ResampleMethod::Box => box2x2($s, $d, layout, &nulls),
                }
            };
        }

        match (input.data(), output.data_mut()) {
            (PixelData::U8(s), PixelData::U8(o)) => run!(s, o),
            (PixelData::S8(s), PixelData::S8(o)) => run!(s, o),
            (PixelData::U16(s), PixelData::U16(o)) => run!(s, o),
            (PixelData::S16(s), PixelData::S16(o)) => run!(s, o),
            (PixelData::U32(s), PixelData::U32(o)) => run!(s, o),
            (PixelData::S32(s), PixelData::S32(o)) => run!(s, o),
            (PixelData::F32(s), PixelData::F32(o)) => run!(s, o),
            (PixelData::F64(s), PixelData::F64(o)) => run!(s, o),
            (PixelData::None, _) => return Err(ResampleError::UnsupportedScalar(input_scalar)),
            (_, PixelData::None) => return Err(ResampleError::UnsupportedScalar(output_scalar)),
            _ => {
                return Err(ResampleError::ScalarMismatch {
                    input: input_scalar,
                    output: output_scalar,
                })
            }
        }
        Ok(())
    }
}

fn nearest<T: Pixel>(src: &[T], dst: &mut [T], l: Layout) {
    for band in 0..l.bands {
        let s = &src[band * l.in_band_len..];
        let d = &mut dst[band * l.out_band_len..];
        for i in 0..l.out_height {
            let line = i * l.decimation * l.in_width;
            for j in 0..l.out_width {
                let value = s[line + j * l.decimation].to_f64();
                d[i * l.out_width + j] = T::from_f64(value);
            }
        }
    }
}

fn box2x2<T: Pixel>(src: &[T], dst: &mut [T], l: Layout, nulls: &[f64]) {
    for band in 0..l.bands {
        let null = T::from_f64(nulls[band]);
        let s = &src[band * l.in_band_len..];
        let d = &mut dst[band * l.out_band_len..];
        for i in 0..l.out_height {
            let line1 = i * l.decimation * l.in_width;
            let line2 = (i * l.decimation + 1) * l.in_width;
            for j in 0..l.out_width {
                let samp = j * l.decimation;
                let block = [
                    s[line1 + samp],
                    s[line1 + samp + 1],
                    s[line2 + samp],
                    s[line2 + samp + 1],
                ];

                let mut weight = 0.0;
                let mut value = 0.0;
                for p in block.into_iter().filter(|p| *p != null) {
                    weight += 1.0;
                    value += p.to_f64();
                }

                d[i * l.out_width + j] = if weight > 0.0 {
                    T::from_f64(value / weight)
                } else {
                    null
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use proptest::prelude::*;

    fn tile(width: u32, height: u32, scalar: ScalarType, bands: u32) -> TileBuffer {
        TileBuffer::with_defaults(Rect::from_size(width, height), scalar, bands)
    }

    #[test]
    fn test_box_uniform_input_is_preserved() {
        let mut input = tile(8, 8, ScalarType::U16, 2);
        input.fill_band(0, 1234.0);
        input.fill_band(1, 7.0);
        let mut output = tile(4, 4, ScalarType::U16, 2);

        Resampler::new(ResampleMethod::Box, 2)
            .resample(&input, &mut output)
            .unwrap();

        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(output.sample(0, x, y), 1234.0);
                assert_eq!(output.sample(1, x, y), 7.0);
            }
        }
    }

    #[test]
    fn test_box_three_nulls_yield_remaining_value() {
        let mut input = tile(2, 2, ScalarType::U8, 1);
        input.set_sample(0, 1, 1, 200.0);
        let mut output = tile(1, 1, ScalarType::U8, 1);

        Resampler::new(ResampleMethod::Box, 2)
            .resample(&input, &mut output)
            .unwrap();

        assert_eq!(output.sample(0, 0, 0), 200.0);
    }

    #[test]
    fn test_box_four_nulls_yield_null() {
        let input = tile(2, 2, ScalarType::S16, 1);
        let mut output = tile(1, 1, ScalarType::S16, 1);
        output.fill_band(0, 5.0);

        Resampler::new(ResampleMethod::Box, 2)
            .resample(&input, &mut output)
            .unwrap();

        assert_eq!(output.sample(0, 0, 0), f64::from(i16::MIN));
    }

    #[test]
    fn test_box_two_nulls_average_the_rest() {
        let mut input = tile(2, 2, ScalarType::U8, 1);
        input.set_sample(0, 0, 0, 10.0);
        input.set_sample(0, 1, 0, 15.0);
        let mut output = tile(1, 1, ScalarType::U8, 1);

        Resampler::new(ResampleMethod::Box, 2)
            .resample(&input, &mut output)
            .unwrap();

        // (10 + 15) / 2 = 12.5 truncates to 12.
        assert_eq!(output.sample(0, 0, 0), 12.0);
    }

    #[test]
    fn test_box_float_mean_is_exact() {
        let mut input = tile(2, 2, ScalarType::F32, 1);
        for (i, v) in [1.0, 2.0, 3.0, 5.0].iter().enumerate() {
            input.set_sample(0, i as u32 % 2, i as u32 / 2, *v);
        }
        let mut output = tile(1, 1, ScalarType::F32, 1);

        Resampler::new(ResampleMethod::Box, 2)
            .resample(&input, &mut output)
            .unwrap();

        assert_eq!(output.sample(0, 0, 0), 2.75);
    }

    #[test]
    fn test_nearest_takes_top_left_of_each_block() {
        let mut input = tile(8, 8, ScalarType::U32, 1);
        for y in 0..8 {
            for x in 0..8 {
                input.set_sample(0, x, y, f64::from(y * 100 + x));
            }
        }
        let mut output = tile(2, 2, ScalarType::U32, 1);

        Resampler::new(ResampleMethod::NearestNeighbor, 4)
            .resample(&input, &mut output)
            .unwrap();

        assert_eq!(output.sample(0, 0, 0), 0.0);
        assert_eq!(output.sample(0, 1, 0), 4.0);
        assert_eq!(output.sample(0, 0, 1), 400.0);
        assert_eq!(output.sample(0, 1, 1), 404.0);
    }

    #[test]
    fn test_box_rejects_other_factors() {
        let input = tile(12, 12, ScalarType::U8, 1);
        let mut output = tile(4, 4, ScalarType::U8, 1);
        assert_eq!(
            Resampler::new(ResampleMethod::Box, 3).resample(&input, &mut output),
            Err(ResampleError::BoxRequiresFactorTwo(3))
        );
    }

    #[test]
    fn test_unknown_pixel_type_is_reported() {
        let input = tile(4, 4, ScalarType::Unknown, 1);
        let mut output = tile(2, 2, ScalarType::Unknown, 1);
        assert_eq!(
            Resampler::new(ResampleMethod::Box, 2).resample(&input, &mut output),
            Err(ResampleError::UnsupportedScalar(ScalarType::Unknown))
        );
    }

    #[test]
    fn test_mismatched_pixel_types() {
        let input = tile(4, 4, ScalarType::U8, 1);
        let mut output = tile(2, 2, ScalarType::U16, 1);
        assert!(matches!(
            Resampler::new(ResampleMethod::Box, 2).resample(&input, &mut output),
            Err(ResampleError::ScalarMismatch { .. })
        ));
    }

    #[test]
    fn test_input_too_small() {
        let input = tile(4, 4, ScalarType::U8, 1);
        let mut output = tile(4, 4, ScalarType::U8, 1);
        assert!(matches!(
            Resampler::new(ResampleMethod::Box, 2).resample(&input, &mut output),
            Err(ResampleError::InputTooSmall { .. })
        ));
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("BOX".parse::<ResampleMethod>(), Ok(ResampleMethod::Box));
        assert_eq!(
            "nearest".parse::<ResampleMethod>(),
            Ok(ResampleMethod::NearestNeighbor)
        );
        assert!("bilinear".parse::<ResampleMethod>().is_err());
    }

    proptest! {
        #[test]
        fn prop_box_uniform_block_is_identity(value in 1u16..u16::MAX) {
            let mut input = tile(4, 4, ScalarType::U16, 1);
            input.fill_band(0, f64::from(value));
            let mut output = tile(2, 2, ScalarType::U16, 1);

            Resampler::new(ResampleMethod::Box, 2).resample(&input, &mut output).unwrap();

            for y in 0..2 {
                for x in 0..2 {
                    prop_assert_eq!(output.sample(0, x, y), f64::from(value));
                }
            }
        }

        #[test]
        fn prop_box_single_valid_sample_wins(value in -1000i32..1000, slot in 0usize..4) {
            let mut input = tile(2, 2, ScalarType::S32, 1);
            let sample = if value == i32::MIN { 0 } else { value };
            input.set_sample(0, (slot % 2) as u32, (slot / 2) as u32, f64::from(sample));
            let mut output = tile(1, 1, ScalarType::S32, 1);

            Resampler::new(ResampleMethod::Box, 2).resample(&input, &mut output).unwrap();

            prop_assert_eq!(output.sample(0, 0, 0), f64::from(sample));
        }
    }
}
