//! Image files decoded through the `image` crate.
//!
//! The whole image is decoded into a [`MemoryImage`]; overview building reads
//! every sample anyway, so there is nothing to gain from lazy decoding at the
//! sizes these formats support.

use std::path::Path;

use image::DynamicImage;
use tracing::debug;

use super::buffer::TileBuffer;
use super::scalar::{Pixel, ScalarType};
use super::source::{MemoryImage, SourceError};
use crate::geometry::Rect;

/// Decode an image file (PNG, TIFF, JPEG) into an in-memory source.
///
/// 8-bit images become `U8`, 16-bit images `U16` and 32-bit float images
/// `F32`; other layouts are converted to 8-bit RGB. The null value is the
/// type's default (zero for unsigned types).
pub fn open_image(path: &Path) -> Result<MemoryImage, SourceError> {
    let decoded = image::open(path)?;
    let image = from_dynamic_image(&decoded);
    debug!(
        path = %path.display(),
        width = image.raster().width(),
        height = image.raster().height(),
        bands = image.raster().bands(),
        scalar = %image.raster().scalar(),
        "decoded image"
    );
    Ok(image)
}

/// Convert a decoded image into a band-sequential source.
pub fn from_dynamic_image(decoded: &DynamicImage) -> MemoryImage {
    let (width, height) = (decoded.width(), decoded.height());
    match decoded {
        DynamicImage::ImageLuma8(img) => build(width, height, 1, ScalarType::U8, img.as_raw()),
        DynamicImage::ImageLumaA8(img) => build(width, height, 2, ScalarType::U8, img.as_raw()),
        DynamicImage::ImageRgb8(img) => build(width, height, 3, ScalarType::U8, img.as_raw()),
        DynamicImage::ImageRgba8(img) => build(width, height, 4, ScalarType::U8, img.as_raw()),
        DynamicImage::ImageLuma16(img) => build(width, height, 1, ScalarType::U16, img.as_raw()),
        DynamicImage::ImageLumaA16(img) => build(width, height, 2, ScalarType::U16, img.as_raw()),
        DynamicImage::ImageRgb16(img) => build(width, height, 3, ScalarType::U16, img.as_raw()),
        DynamicImage::ImageRgba16(img) => build(width, height, 4, ScalarType::U16, img.as_raw()),
        DynamicImage::ImageRgb32F(img) => build(width, height, 3, ScalarType::F32, img.as_raw()),
        DynamicImage::ImageRgba32F(img) => build(width, height, 4, ScalarType::F32, img.as_raw()),
        other => {
            let rgb = other.to_rgb8();
            build(width, height, 3, ScalarType::U8, rgb.as_raw())
        }
    }
}

/// De-interleave `samples` (pixel-interleaved) into a band-sequential tile.
fn build<T: Pixel>(
    width: u32,
    height: u32,
    bands: u32,
    scalar: ScalarType,
    samples: &[T],
) -> MemoryImage {
    let mut full = TileBuffer::with_defaults(Rect::from_size(width, height), scalar, bands);
    let band_len = full.band_len();
    let data = full.data_mut();
    for (i, pixel) in samples.chunks_exact(bands as usize).enumerate() {
        for (band, sample) in pixel.iter().enumerate() {
            data.set(band * band_len + i, sample.to_f64());
        }
    }
    full.validate();
    MemoryImage::new(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ImageSource;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_rgb8_is_deinterleaved() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));

        let source = from_dynamic_image(&DynamicImage::ImageRgb8(img));
        assert_eq!(source.output_scalar_type(), ScalarType::U8);
        assert_eq!(source.number_of_output_bands(), 3);

        let raster = source.raster();
        assert_eq!(raster.sample(0, 0, 0), 1.0);
        assert_eq!(raster.sample(1, 0, 0), 2.0);
        assert_eq!(raster.sample(2, 1, 0), 6.0);
    }

    #[test]
    fn test_open_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        let img = image::GrayImage::from_pixel(8, 4, image::Luma([200]));
        img.save(&path).unwrap();

        let source = open_image(&path).unwrap();
        assert_eq!(source.image_rect(0), Rect::from_size(8, 4));
        assert_eq!(source.raster().sample(0, 7, 3), 200.0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let result = open_image(Path::new("/nonexistent/tilepress.png"));
        assert!(matches!(result, Err(SourceError::Open(_))));
    }
}
