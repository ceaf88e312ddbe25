//! Output image and tile grid geometry.
//!
//! An overview level is described by the area of interest at the source
//! resolution, the output tile size, and an integer decimation factor.
//! Everything else (output dimensions, grid shape, per-tile rectangles) is
//! derived.
//!
//! ```text
//!  source (area of interest)             output (decimated)
//! ┌──────────────────────────┐          ┌─────────────┐
//! │                          │  ÷ d     │ 0 │ 1 │ 2 │ │
//! │        1025 × 770        │ ───────► ├───┼───┼───┤ │  tiles are row-major
//! │                          │          │ 3 │ 4 │ 5 │ │
//! └──────────────────────────┘          └─────────────┘
//! ```
//!
//! Both divisions round up, so a 1025-wide area decimated by 2 is 513 samples
//! wide and a 513-wide output in 256-wide tiles is 3 tiles wide.

use thiserror::Error;

/// Errors raised while deriving tile grid geometry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    /// The area of interest has no samples or lines.
    #[error("Area of interest is empty ({width}×{height})")]
    EmptyArea { width: u32, height: u32 },

    /// A tile dimension is zero.
    #[error("Tile size must be non-zero, got {width}×{height}")]
    ZeroTileSize { width: u32, height: u32 },

    /// The decimation factor is zero.
    #[error("Decimation factor must be at least 1")]
    ZeroDecimation,
}

/// Integer pixel rectangle, origin at the upper-left sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a rectangle from its upper-left corner and size.
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x + i64::from(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y + i64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of samples covered.
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Scale both corner and size by `factor`.
    pub fn scaled(&self, factor: u32) -> Self {
        let f = i64::from(factor);
        Self {
            x: self.x * f,
            y: self.y * f,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    /// Translate by `(dx, dy)`.
    pub fn offset(&self, dx: i64, dy: i64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }

    /// Overlapping region, or `None` when the rectangles are disjoint.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// True when `other` lies entirely inside this rectangle.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}) {}×{}",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Tile grid over a decimated output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    area_of_interest: Rect,
    tile_width: u32,
    tile_height: u32,
    decimation: u32,
    output_width: u32,
    output_height: u32,
    tiles_wide: u32,
    tiles_high: u32,
}

impl TileGeometry {
    /// Derive the grid for an area of interest, tile size and decimation.
    pub fn new(
        area_of_interest: Rect,
        tile_size: (u32, u32),
        decimation: u32,
    ) -> Result<Self, GeometryError> {
        let (tile_width, tile_height) = tile_size;
        if area_of_interest.is_empty() {
            return Err(GeometryError::EmptyArea {
                width: area_of_interest.width,
                height: area_of_interest.height,
            });
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(GeometryError::ZeroTileSize {
                width: tile_width,
                height: tile_height,
            });
        }
        if decimation == 0 {
            return Err(GeometryError::ZeroDecimation);
        }

        let output_width = area_of_interest.width.div_ceil(decimation);
        let output_height = area_of_interest.height.div_ceil(decimation);

        Ok(Self {
            area_of_interest,
            tile_width,
            tile_height,
            decimation,
            output_width,
            output_height,
            tiles_wide: output_width.div_ceil(tile_width),
            tiles_high: output_height.div_ceil(tile_height),
        })
    }

    pub fn area_of_interest(&self) -> Rect {
        self.area_of_interest
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    pub fn output_width(&self) -> u32 {
        self.output_width
    }

    pub fn output_height(&self) -> u32 {
        self.output_height
    }

    /// Output image rectangle, anchored at the origin.
    pub fn output_image_rect(&self) -> Rect {
        Rect::from_size(self.output_width, self.output_height)
    }

    pub fn tiles_wide(&self) -> u32 {
        self.tiles_wide
    }

    pub fn tiles_high(&self) -> u32 {
        self.tiles_high
    }

    /// Total number of tiles in the grid.
    pub fn num_tiles(&self) -> u32 {
        self.tiles_wide * self.tiles_high
    }

    /// Grid row of a tile index.
    pub fn row(&self, index: u32) -> u32 {
        index / self.tiles_wide
    }

    /// Grid column of a tile index.
    pub fn col(&self, index: u32) -> u32 {
        index % self.tiles_wide
    }

    /// Full-size output rectangle of a tile. Edge tiles may extend past the
    /// output image; the extra samples are filled by the resampler from null
    /// input.
    pub fn output_tile_rect(&self, index: u32) -> Rect {
        Rect::new(
            i64::from(self.col(index)) * i64::from(self.tile_width),
            i64::from(self.row(index)) * i64::from(self.tile_height),
            self.tile_width,
            self.tile_height,
        )
    }

    /// Source rectangle feeding a tile: the output rectangle scaled by the
    /// decimation factor, relative to the area of interest.
    pub fn input_tile_rect(&self, index: u32) -> Rect {
        self.output_tile_rect(index)
            .scaled(self.decimation)
            .offset(self.area_of_interest.x, self.area_of_interest.y)
    }
}
