use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Element type of an array. The engine works on a closed set of dtypes;
/// arithmetic promotes along Bool < Int64 < Float64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Int64,
    Float64,
}

impl DType {
    pub fn name(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int64 => "int64",
            DType::Float64 => "float64",
        }
    }

    /// Width of one element in bytes as stored on disk.
    pub(crate) fn byte_width(&self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Int64 => 8,
            DType::Float64 => 8,
        }
    }

    /// Common dtype for a binary arithmetic operation.
    pub fn promote(a: DType, b: DType) -> DType {
        use DType::*;
        match (a, b) {
            (Float64, _) | (_, Float64) => Float64,
            (Int64, _) | (_, Int64) => Int64,
            (Bool, Bool) => Bool,
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single element value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    Bool(bool),
    I64(i64),
    F64(f64),
}

impl Scalar {
    pub fn dtype(&self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::I64(_) => DType::Int64,
            Scalar::F64(_) => DType::Float64,
        }
    }

    pub fn zero(dtype: DType) -> Scalar {
        match dtype {
            DType::Bool => Scalar::Bool(false),
            DType::Int64 => Scalar::I64(0),
            DType::Float64 => Scalar::F64(0.0),
        }
    }

    pub fn one(dtype: DType) -> Scalar {
        match dtype {
            DType::Bool => Scalar::Bool(true),
            DType::Int64 => Scalar::I64(1),
            DType::Float64 => Scalar::F64(1.0),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Scalar::Bool(v) => !v,
            Scalar::I64(v) => *v == 0,
            Scalar::F64(v) => *v == 0.0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Bool(v) => f64::from(u8::from(*v)),
            Scalar::I64(v) => *v as f64,
            Scalar::F64(v) => *v,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Scalar::Bool(v) => i64::from(*v),
            Scalar::I64(v) => *v,
            Scalar::F64(v) => *v as i64,
        }
    }

    /// Truthiness, matching how boolean casts treat each dtype.
    pub fn as_bool(&self) -> bool {
        match self {
            Scalar::Bool(v) => *v,
            Scalar::I64(v) => *v != 0,
            Scalar::F64(v) => *v != 0.0,
        }
    }

    pub fn cast(&self, dtype: DType) -> Scalar {
        match dtype {
            DType::Bool => Scalar::Bool(self.as_bool()),
            DType::Int64 => Scalar::I64(self.as_i64()),
            DType::Float64 => Scalar::F64(self.as_f64()),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            // Keep a trailing ".0" so re-parsing preserves the dtype.
            Scalar::F64(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::I64(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::I64(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::F64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promotion_order() {
        assert_eq!(DType::promote(DType::Bool, DType::Bool), DType::Bool);
        assert_eq!(DType::promote(DType::Bool, DType::Int64), DType::Int64);
        assert_eq!(DType::promote(DType::Int64, DType::Float64), DType::Float64);
    }

    #[test]
    fn test_scalar_display_roundtrips_dtype() {
        assert_eq!(Scalar::F64(2.0).to_string(), "2.0");
        assert_eq!(Scalar::I64(2).to_string(), "2");
        assert_eq!(Scalar::Bool(true).to_string(), "true");
    }
}
