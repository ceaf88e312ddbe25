//! Overview metadata (`.omd`) side file with per-band min/max/null.
//!
//! The file is a flat key-value table:
//!
//! ```text
//! number_bands=1
//! scalar_type=sint16
//! band1.min_value=-120
//! band1.max_value=2210
//! band1.null_value=-32767
//! ```

use std::path::Path;

use ini::Ini;
use tracing::{debug, info};

use super::{BandStatistics, ScanMode, StatsError};
use crate::raster::ScalarType;

/// Null written for signed and float bands when the scanned null candidate
/// is not one of the common null values.
pub const FALLBACK_NULL: f64 = -32767.0;

const COMMON_S16_NULLS: [f64; 3] = [-32767.0, -32766.0, -9999.0];
const COMMON_WIDE_NULLS: [f64; 5] = [-32768.0, -32767.0, -32766.0, -9999.0, -99999.0];

/// Final per-band values for the side file.
#[derive(Debug, Clone, PartialEq)]
pub struct OmdValues {
    pub min_values: Vec<f64>,
    pub max_values: Vec<f64>,
    pub null_values: Vec<f64>,
}

impl OmdValues {
    pub fn bands(&self) -> usize {
        self.null_values.len()
    }
}

/// Combine scanned statistics with the source's own values.
///
/// - `MinMax`: scanned min/max, null from the source.
/// - `MinMaxNull`: scanned values with the null candidate fixed up per
///   scalar type. A candidate that is not a plausible null is folded into
///   min and replaced by the type's usual null.
/// - Anything not scanned comes from `source`.
pub fn resolve_omd_values(
    mode: ScanMode,
    scalar: ScalarType,
    scanned: &BandStatistics,
    source: &OmdValues,
) -> OmdValues {
    let bands = source.bands();
    let pick = |scanned: &[f64], fallback: &[f64]| {
        if scanned.len() == bands {
            scanned.to_vec()
        } else {
            fallback.to_vec()
        }
    };

    let mut values = OmdValues {
        min_values: pick(scanned.min_values(), &source.min_values),
        max_values: pick(scanned.max_values(), &source.max_values),
        null_values: source.null_values.clone(),
    };

    if mode == ScanMode::MinMaxNull && scanned.null_values().len() == bands {
        values.null_values = scanned.null_values().to_vec();
        for band in 0..bands {
            fix_up_null(
                scalar,
                &mut values.null_values[band],
                &mut values.min_values[band],
            );
        }
    }
    values
}

fn fix_up_null(scalar: ScalarType, null: &mut f64, min: &mut f64) {
    let default_null = scalar.default_null();
    match scalar {
        ScalarType::U8 | ScalarType::S8 | ScalarType::U16 | ScalarType::U11 | ScalarType::U32 => {
            if *null > default_null {
                if *null < *min {
                    *min = *null;
                }
                *null = default_null;
            }
        }
        ScalarType::S16 => {
            if *null != default_null && !COMMON_S16_NULLS.contains(null) {
                if *null > -9999.0 && *null < *min {
                    *min = *null;
                }
                *null = FALLBACK_NULL;
            }
        }
        ScalarType::S32 | ScalarType::F32 | ScalarType::F64 => {
            if *null != default_null && !COMMON_WIDE_NULLS.contains(null) {
                if *null > -9999.0 && *null < *min {
                    *min = *null;
                }
                *null = FALLBACK_NULL;
            }
        }
        ScalarType::NormalizedF64 => {
            if *null != default_null && *null > 0.0 {
                if *null < *min {
                    *min = *null;
                }
                *null = 0.0;
            }
        }
        ScalarType::Unknown => {
            debug!(scalar = %scalar, "no null fix-up for scalar type");
        }
    }
}

/// Write `values` to `path`, keeping any unrelated keys already there.
pub fn write_omd_file(
    path: &Path,
    scalar: ScalarType,
    values: &OmdValues,
) -> Result<(), StatsError> {
    let mut ini = if path.exists() {
        Ini::load_from_file(path).map_err(|source| StatsError::Read {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        Ini::new()
    };

    let mut general = ini.with_section(None::<String>);
    general
        .set("number_bands", values.bands().to_string())
        .set("scalar_type", scalar.name());
    for band in 0..values.bands() {
        let n = band + 1;
        general
            .set(format!("band{}.min_value", n), values.min_values[band].to_string())
            .set(format!("band{}.max_value", n), values.max_values[band].to_string())
            .set(format!("band{}.null_value", n), values.null_values[band].to_string());
    }

    ini.write_to_file(path).map_err(|source| StatsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), bands = values.bands(), "wrote omd file");
    Ok(())
}
