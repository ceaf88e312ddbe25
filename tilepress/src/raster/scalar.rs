//! Pixel storage types.

use num_traits::AsPrimitive;

/// Scalar type reported by an image source.
///
/// Several logical types share a storage representation: `U11` is stored
/// in 16 bits and `NormalizedF64` in 64-bit floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    S8,
    U16,
    /// 16-bit storage with 11 significant bits.
    U11,
    S16,
    U32,
    S32,
    F32,
    F64,
    /// 64-bit float storage with values in `[0, 1]`.
    NormalizedF64,
    Unknown,
}

impl ScalarType {
    /// Bytes per stored sample, `0` for `Unknown`.
    pub fn storage_bytes(&self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::S8 => 1,
            ScalarType::U16 | ScalarType::U11 | ScalarType::S16 => 2,
            ScalarType::U32 | ScalarType::S32 | ScalarType::F32 => 4,
            ScalarType::F64 | ScalarType::NormalizedF64 => 8,
            ScalarType::Unknown => 0,
        }
    }

    /// Significant bits per sample.
    pub fn actual_bits(&self) -> u32 {
        match self {
            ScalarType::U11 => 11,
            other => other.storage_bytes() as u32 * 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(
            self,
            ScalarType::F32 | ScalarType::F64 | ScalarType::NormalizedF64
        )
    }

    /// Conventional null value for the type.
    pub fn default_null(&self) -> f64 {
        match self {
            ScalarType::U8
            | ScalarType::U16
            | ScalarType::U11
            | ScalarType::U32
            | ScalarType::NormalizedF64
            | ScalarType::Unknown => 0.0,
            ScalarType::S8 => f64::from(i8::MIN),
            ScalarType::S16 => f64::from(i16::MIN),
            ScalarType::S32 => f64::from(i32::MIN),
            ScalarType::F32 | ScalarType::F64 => -f64::from(f32::MAX),
        }
    }

    /// Smallest valid (non-null) value for the type.
    pub fn default_min(&self) -> f64 {
        match self {
            ScalarType::U8 | ScalarType::U16 | ScalarType::U11 | ScalarType::U32 => 1.0,
            ScalarType::S8 => f64::from(i8::MIN) + 1.0,
            ScalarType::S16 => f64::from(i16::MIN) + 1.0,
            ScalarType::S32 => f64::from(i32::MIN) + 1.0,
            ScalarType::F32 | ScalarType::F64 => -f64::from(f32::MAX) + 1.0,
            ScalarType::NormalizedF64 | ScalarType::Unknown => 0.0,
        }
    }

    /// Largest valid value for the type.
    pub fn default_max(&self) -> f64 {
        match self {
            ScalarType::U8 => f64::from(u8::MAX),
            ScalarType::S8 => f64::from(i8::MAX),
            ScalarType::U16 => f64::from(u16::MAX),
            ScalarType::U11 => 2047.0,
            ScalarType::S16 => f64::from(i16::MAX),
            ScalarType::U32 => f64::from(u32::MAX),
            ScalarType::S32 => f64::from(i32::MAX),
            ScalarType::F32 | ScalarType::F64 => f64::from(f32::MAX),
            ScalarType::NormalizedF64 => 1.0,
            ScalarType::Unknown => 0.0,
        }
    }

    /// Stable numeric code written into container and codestream headers.
    pub fn code(&self) -> u16 {
        match self {
            ScalarType::Unknown => 0,
            ScalarType::U8 => 1,
            ScalarType::S8 => 2,
            ScalarType::U16 => 3,
            ScalarType::U11 => 4,
            ScalarType::S16 => 5,
            ScalarType::U32 => 6,
            ScalarType::S32 => 7,
            ScalarType::F32 => 8,
            ScalarType::F64 => 9,
            ScalarType::NormalizedF64 => 10,
        }
    }

    /// Inverse of [`ScalarType::code`]; unknown codes map to `Unknown`.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => ScalarType::U8,
            2 => ScalarType::S8,
            3 => ScalarType::U16,
            4 => ScalarType::U11,
            5 => ScalarType::S16,
            6 => ScalarType::U32,
            7 => ScalarType::S32,
            8 => ScalarType::F32,
            9 => ScalarType::F64,
            10 => ScalarType::NormalizedF64,
            _ => ScalarType::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::U8 => "uint8",
            ScalarType::S8 => "sint8",
            ScalarType::U16 => "uint16",
            ScalarType::U11 => "uint11",
            ScalarType::S16 => "sint16",
            ScalarType::U32 => "uint32",
            ScalarType::S32 => "sint32",
            ScalarType::F32 => "float32",
            ScalarType::F64 => "float64",
            ScalarType::NormalizedF64 => "normalized_double",
            ScalarType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stored sample type.
///
/// Conversions go through `f64`, which holds every supported storage type
/// exactly; narrowing back uses Rust's saturating `as` semantics.
pub trait Pixel: Copy + PartialEq + PartialOrd + Default + Send + Sync + 'static {
    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;

    /// Append the big-endian encoding of the sample.
    fn write_be(self, out: &mut Vec<u8>);
}

macro_rules! impl_pixel {
    ($($t:ty),*) => {
        $(
            impl Pixel for $t {
                #[inline]
                fn to_f64(self) -> f64 {
                    AsPrimitive::<f64>::as_(self)
                }

                #[inline]
                fn from_f64(value: f64) -> Self {
                    AsPrimitive::<$t>::as_(value)
                }

                #[inline]
                fn write_be(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_be_bytes());
                }
            }
        )*
    };
}

impl_pixel!(u8, i8, u16, i16, u32, i32, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_bytes() {
        assert_eq!(ScalarType::U8.storage_bytes(), 1);
        assert_eq!(ScalarType::U11.storage_bytes(), 2);
        assert_eq!(ScalarType::S32.storage_bytes(), 4);
        assert_eq!(ScalarType::NormalizedF64.storage_bytes(), 8);
        assert_eq!(ScalarType::Unknown.storage_bytes(), 0);
    }

    #[test]
    fn test_code_round_trip_for_all_types() {
        for scalar in [
            ScalarType::U8,
            ScalarType::S8,
            ScalarType::U16,
            ScalarType::U11,
            ScalarType::S16,
            ScalarType::U32,
            ScalarType::S32,
            ScalarType::F32,
            ScalarType::F64,
            ScalarType::NormalizedF64,
        ] {
            assert_eq!(ScalarType::from_code(scalar.code()), scalar);
        }
        assert_eq!(ScalarType::from_code(999), ScalarType::Unknown);
    }

    #[test]
    fn test_pixel_narrowing_truncates() {
        assert_eq!(u8::from_f64(127.75), 127);
        assert_eq!(i16::from_f64(-3.5), -3);
        assert_eq!(u16::from_f64(70000.0), u16::MAX);
        assert_eq!(f32::from_f64(0.25), 0.25);
    }

    #[test]
    fn test_write_be() {
        let mut out = Vec::new();
        0x1234u16.write_be(&mut out);
        (-2i32).write_be(&mut out);
        assert_eq!(out, vec![0x12, 0x34, 0xFF, 0xFF, 0xFF, 0xFE]);
    }
}
