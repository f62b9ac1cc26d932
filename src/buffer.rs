use crate::dtype::{DType, Scalar};
use crate::errors::{CorruptFrameSnafu, Result};

/// Flat, densely packed element storage for one dtype.
///
/// All multidimensional structure lives in [`crate::dense::Dense`]; a
/// `Buffer` is just the element vector, so chunk IO and the codec can
/// treat every dtype uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Bool(Vec<bool>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl Buffer {
    pub fn empty(dtype: DType) -> Buffer {
        match dtype {
            DType::Bool => Buffer::Bool(Vec::new()),
            DType::Int64 => Buffer::I64(Vec::new()),
            DType::Float64 => Buffer::F64(Vec::new()),
        }
    }

    pub fn filled(value: Scalar, len: usize) -> Buffer {
        match value {
            Scalar::Bool(v) => Buffer::Bool(vec![v; len]),
            Scalar::I64(v) => Buffer::I64(vec![v; len]),
            Scalar::F64(v) => Buffer::F64(vec![v; len]),
        }
    }

    pub fn zeros(dtype: DType, len: usize) -> Buffer {
        Buffer::filled(Scalar::zero(dtype), len)
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Bool(v) => v.len(),
            Buffer::I64(v) => v.len(),
            Buffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::Bool(_) => DType::Bool,
            Buffer::I64(_) => DType::Int64,
            Buffer::F64(_) => DType::Float64,
        }
    }

    pub fn get(&self, idx: usize) -> Scalar {
        match self {
            Buffer::Bool(v) => Scalar::Bool(v[idx]),
            Buffer::I64(v) => Scalar::I64(v[idx]),
            Buffer::F64(v) => Scalar::F64(v[idx]),
        }
    }

    /// Store `value` at `idx`, casting to this buffer's dtype.
    pub fn set(&mut self, idx: usize, value: Scalar) {
        match self {
            Buffer::Bool(v) => v[idx] = value.as_bool(),
            Buffer::I64(v) => v[idx] = value.as_i64(),
            Buffer::F64(v) => v[idx] = value.as_f64(),
        }
    }

    pub fn push(&mut self, value: Scalar) {
        match self {
            Buffer::Bool(v) => v.push(value.as_bool()),
            Buffer::I64(v) => v.push(value.as_i64()),
            Buffer::F64(v) => v.push(value.as_f64()),
        }
    }

    /// Append `other`. Panics on dtype mismatch (internal invariant).
    pub fn extend(&mut self, other: &Buffer) {
        match (self, other) {
            (Buffer::Bool(a), Buffer::Bool(b)) => a.extend_from_slice(b),
            (Buffer::I64(a), Buffer::I64(b)) => a.extend_from_slice(b),
            (Buffer::F64(a), Buffer::F64(b)) => a.extend_from_slice(b),
            _ => panic!("Buffer::extend dtype mismatch"),
        }
    }

    /// Copy `len` elements from `src` starting at `src_start` into
    /// `self` at `dst_start`. Panics on dtype mismatch.
    pub fn copy_from(&mut self, src: &Buffer, src_start: usize, dst_start: usize, len: usize) {
        match (self, src) {
            (Buffer::Bool(d), Buffer::Bool(s)) => {
                d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len])
            }
            (Buffer::I64(d), Buffer::I64(s)) => {
                d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len])
            }
            (Buffer::F64(d), Buffer::F64(s)) => {
                d[dst_start..dst_start + len].copy_from_slice(&s[src_start..src_start + len])
            }
            _ => panic!("Buffer::copy_from dtype mismatch"),
        }
    }

    pub fn fill_range(&mut self, start: usize, len: usize, value: Scalar) {
        match self {
            Buffer::Bool(v) => v[start..start + len].fill(value.as_bool()),
            Buffer::I64(v) => v[start..start + len].fill(value.as_i64()),
            Buffer::F64(v) => v[start..start + len].fill(value.as_f64()),
        }
    }

    pub fn cast(&self, dtype: DType) -> Buffer {
        if self.dtype() == dtype {
            return self.clone();
        }
        match dtype {
            DType::Bool => Buffer::Bool((0..self.len()).map(|i| self.get(i).as_bool()).collect()),
            DType::Int64 => Buffer::I64((0..self.len()).map(|i| self.get(i).as_i64()).collect()),
            DType::Float64 => Buffer::F64((0..self.len()).map(|i| self.get(i).as_f64()).collect()),
        }
    }

    pub fn all_zero(&self) -> bool {
        match self {
            Buffer::Bool(v) => v.iter().all(|x| !x),
            Buffer::I64(v) => v.iter().all(|x| *x == 0),
            Buffer::F64(v) => v.iter().all(|x| *x == 0.0),
        }
    }

    /// Little-endian byte image, the codec's raw input.
    pub(crate) fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Buffer::Bool(v) => v.iter().map(|&x| u8::from(x)).collect(),
            Buffer::I64(v) => {
                let mut out = Vec::with_capacity(v.len() * 8);
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                out
            }
            Buffer::F64(v) => {
                let mut out = Vec::with_capacity(v.len() * 8);
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
                out
            }
        }
    }

    pub(crate) fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Buffer> {
        let width = dtype.byte_width();
        if bytes.len() % width != 0 {
            return CorruptFrameSnafu {
                reason: format!(
                    "raw length {} is not a multiple of element width {width}",
                    bytes.len()
                ),
            }
            .fail();
        }
        Ok(match dtype {
            DType::Bool => Buffer::Bool(bytes.iter().map(|&b| b != 0).collect()),
            DType::Int64 => Buffer::I64(
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            ),
            DType::Float64 => Buffer::F64(
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                    .collect(),
            ),
        })
    }
}
