//! Evaluation strategies.
//!
//! Strategy selection happens in [`crate::lazy`]: the aligned fast path
//! when every shape and partition matches, the generic slow path for
//! broadcasting, partial regions and mismatched partitions, and the
//! reduction path for accumulator operations.

pub(crate) mod fast;
pub(crate) mod partition;
pub(crate) mod reduce;
pub(crate) mod slices;

use std::ops::Range;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::dense::{Dense, Region};
use crate::errors::{RegionOutOfBoundsSnafu, Result};
use crate::store::ChunkedArray;

/// Per-call evaluation options.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Evaluate only this region of the result (chunk granularity may
    /// over-read internally; the returned array is exactly this region).
    pub item: Option<Vec<Range<usize>>>,
    /// Iteration chunk-shape override; forces the generic path.
    pub chunks: Option<Vec<usize>>,
    /// Block-shape override for a created output; forces the generic path.
    pub blocks: Option<Vec<usize>>,
    /// Keep prefetched chunks compressed until use, trading CPU for peak
    /// memory.
    pub low_mem: bool,
}

impl EvalOptions {
    pub fn item(region: Vec<Range<usize>>) -> EvalOptions {
        EvalOptions {
            item: Some(region),
            ..EvalOptions::default()
        }
    }
}

/// What an evaluation produced.
#[derive(Debug)]
pub enum EvalOutput {
    /// An in-memory array (the default).
    Dense(Dense),
    /// The flat row-major values selected by a one-branch filter mask.
    Flat(Buffer),
    /// The chunked output target the result was written into.
    Stored(Arc<ChunkedArray>),
}

impl EvalOutput {
    /// Materialize in memory. A flat filter result becomes a 1-D array.
    pub fn into_dense(self) -> Result<Dense> {
        match self {
            EvalOutput::Dense(d) => Ok(d),
            EvalOutput::Flat(b) => {
                let len = b.len();
                Dense::new(vec![len], b)
            }
            EvalOutput::Stored(arr) => arr.to_dense(),
        }
    }

    pub fn as_stored(&self) -> Option<&Arc<ChunkedArray>> {
        match self {
            EvalOutput::Stored(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Normalize a caller-facing region request to the full rank: missing
/// trailing axes become full ranges, and bounds are checked.
pub(crate) fn normalize_item(item: &[Range<usize>], shape: &[usize]) -> Result<Region> {
    if item.len() > shape.len()
        || item
            .iter()
            .zip(shape.iter())
            .any(|(r, &n)| r.start > r.end || r.end > n)
    {
        return RegionOutOfBoundsSnafu {
            region: item.iter().map(|r| (r.start, r.end)).collect::<Vec<_>>(),
            shape: shape.to_vec(),
        }
        .fail();
    }
    let mut out: Region = item.iter().cloned().collect();
    for &n in shape.iter().skip(item.len()) {
        out.push(0..n);
    }
    Ok(out)
}
