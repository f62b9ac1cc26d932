use std::sync::Arc;

use crate::dense::Dense;
use crate::dtype::{DType, Scalar};
use crate::errors::Result;
use crate::store::ChunkedArray;

/// A leaf value an expression can reference: a scalar, a plain in-memory
/// array, or a store-backed chunked array.
///
/// This is a closed set; the partition analyzer and the evaluators match
/// over it exhaustively rather than sniffing capabilities at runtime.
#[derive(Debug, Clone)]
pub enum Operand {
    Scalar(Scalar),
    Array(Arc<Dense>),
    Chunked(Arc<ChunkedArray>),
}

impl Operand {
    pub fn dtype(&self) -> DType {
        match self {
            Operand::Scalar(v) => v.dtype(),
            Operand::Array(a) => a.dtype(),
            Operand::Chunked(c) => c.dtype(),
        }
    }

    /// Logical shape; scalars carry none.
    pub fn shape(&self) -> Option<&[usize]> {
        match self {
            Operand::Scalar(_) => None,
            Operand::Array(a) => Some(a.shape()),
            Operand::Chunked(c) => Some(c.shape()),
        }
    }

    pub fn as_chunked(&self) -> Option<&Arc<ChunkedArray>> {
        match self {
            Operand::Chunked(c) => Some(c),
            _ => None,
        }
    }

    /// Identity comparison for operand deduplication during fusion: two
    /// operands are "the same" only when they are the same underlying
    /// object, never by value.
    pub fn same_object(&self, other: &Operand) -> bool {
        match (self, other) {
            (Operand::Array(a), Operand::Array(b)) => Arc::ptr_eq(a, b),
            (Operand::Chunked(a), Operand::Chunked(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// One element drawn from the operand, used for dtype inference.
    pub fn probe_scalar(&self) -> Result<Scalar> {
        match self {
            Operand::Scalar(v) => Ok(*v),
            Operand::Array(a) => Ok(match a.item() {
                Some(v) => v,
                None if a.is_empty() => Scalar::zero(a.dtype()),
                _ => a.buffer().get(0),
            }),
            Operand::Chunked(c) => {
                if c.meta().num_elements() == 0 {
                    return Ok(Scalar::zero(c.dtype()));
                }
                let probe: crate::dense::Region =
                    c.shape().iter().map(|_| 0..1).collect();
                let one = c.store().read_region(&probe)?;
                Ok(one.buffer().get(0))
            }
        }
    }
}

impl From<Scalar> for Operand {
    fn from(v: Scalar) -> Self {
        Operand::Scalar(v)
    }
}

impl From<Arc<Dense>> for Operand {
    fn from(v: Arc<Dense>) -> Self {
        Operand::Array(v)
    }
}

impl From<Arc<ChunkedArray>> for Operand {
    fn from(v: Arc<ChunkedArray>) -> Self {
        Operand::Chunked(v)
    }
}
