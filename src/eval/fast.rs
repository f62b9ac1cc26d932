//! Aligned fast path.
//!
//! Preconditions (checked by the caller): all operand shapes equal, all
//! partitions aligned, no partial-region request, no chunk/block
//! override. The output grid then coincides with every operand's grid,
//! so each iteration reads whole chunks and never does broadcast or
//! intersection arithmetic.

use std::sync::Arc;

use tracing::debug;

use crate::buffer::Buffer;
use crate::dense::{num_elements, region_shape, Dense, Region};
use crate::dtype::DType;
use crate::errors::{EngineError, Result};
use crate::eval::partition::{InputLayout, IterGrid};
use crate::eval::{EvalOptions, EvalOutput};
use crate::expr::node::ExprNode;
use crate::kernel::{self, ChunkValue};
use crate::operand::Operand;
use crate::pipeline::{Fetched, Prefetcher};
use crate::store::ChunkedArray;

pub(crate) fn fast_eval(
    ast: &ExprNode,
    operands: &[Operand],
    layout: &InputLayout,
    dtype: DType,
    out: Option<Arc<ChunkedArray>>,
    opts: &EvalOptions,
) -> Result<EvalOutput> {
    let grid = IterGrid::new(&layout.shape, layout.chunk_shape.as_deref());
    let chunk_count = grid.chunk_count();
    debug!(
        shape = ?layout.shape,
        chunks = chunk_count,
        disk = layout.any_disk,
        "fast path evaluation"
    );

    // Overlap IO with compute when every operand is store-backed and at
    // least one lives on disk.
    let mut pipeline = if layout.all_chunked && layout.any_disk {
        let arrays: Vec<Arc<ChunkedArray>> = operands
            .iter()
            .filter_map(|op| op.as_chunked().cloned())
            .collect();
        Some(Prefetcher::spawn(arrays, chunk_count, opts.low_mem)?)
    } else {
        None
    };

    let mut dense_out = match &out {
        None => Some(Dense::zeros(layout.shape.clone(), dtype)),
        Some(_) => None,
    };

    for index in 0..chunk_count {
        let region = grid.chunk_region(index);
        let row = match &mut pipeline {
            Some(p) => Some(p.next().ok_or_else(|| EngineError::PipelineFetch {
                reason: "pipeline ended before the last chunk".to_string(),
            })??),
            None => None,
        };
        let bindings = gather_aligned(operands, index, &region, row)?;
        let value = kernel::eval_node(ast, &bindings)?;
        match (&mut dense_out, &out) {
            (Some(d), _) => write_dense_chunk(d, &region, &value)?,
            (None, Some(arr)) => write_store_chunk(arr, index, &region, &value)?,
            (None, None) => unreachable!("no output target"),
        }
    }

    match (dense_out, out) {
        (Some(d), _) => Ok(EvalOutput::Dense(d)),
        (None, Some(arr)) => Ok(EvalOutput::Stored(arr)),
        (None, None) => unreachable!("no output target"),
    }
}

/// Chunk-local operand values for an aligned iteration step.
///
/// Scalars pass through, plain arrays are sliced (whole-array reuse when
/// a single chunk spans them), and store-backed arrays read either the
/// decompressed whole chunk or a region, with zero-flagged chunks
/// materialized as a scalar zero without decompression. When a prefetch
/// row is supplied it provides the store-backed values in operand order.
pub(crate) fn gather_aligned(
    operands: &[Operand],
    index: usize,
    region: &Region,
    prefetched: Option<Vec<Fetched>>,
) -> Result<Vec<ChunkValue>> {
    let mut row = prefetched.map(Vec::into_iter);
    operands
        .iter()
        .map(|op| match op {
            Operand::Scalar(v) => Ok(ChunkValue::Scalar(*v)),
            Operand::Array(a) => {
                if num_elements(a.shape()) == num_elements(&region_shape(region)) {
                    Ok(ChunkValue::Array(Arc::clone(a)))
                } else {
                    Ok(ChunkValue::from_dense(a.read_region(region)?))
                }
            }
            Operand::Chunked(c) => {
                if let Some(iter) = &mut row {
                    let fetched = iter.next().ok_or_else(|| EngineError::PipelineFetch {
                        reason: "pipeline row is missing an operand".to_string(),
                    })?;
                    return fetched.into_value(c, index);
                }
                let store = c.store();
                if store.chunk_is_zero(index)? {
                    return Ok(ChunkValue::Scalar(crate::dtype::Scalar::zero(c.dtype())));
                }
                if c.meta().chunk_is_full(index)? {
                    let data = store.read_chunk(index)?;
                    let data = Arc::try_unwrap(data).unwrap_or_else(|shared| (*shared).clone());
                    Ok(ChunkValue::from_dense(Dense::new(
                        region_shape(region),
                        data,
                    )?))
                } else {
                    Ok(ChunkValue::from_dense(store.read_region(region)?))
                }
            }
        })
        .collect()
}

/// Direct write into the in-memory output; scalar chunk results become a
/// region fill, array results land without an intermediate copy.
pub(crate) fn write_dense_chunk(
    out: &mut Dense,
    region: &Region,
    value: &ChunkValue,
) -> Result<()> {
    match value {
        ChunkValue::Scalar(v) => out.fill_region(region, v.cast(out.dtype())),
        ChunkValue::Array(a) => out.write_region(region, a),
    }
}

/// Whole-chunk replacement into a chunked output when its partition is
/// behaved, region write otherwise.
fn write_store_chunk(
    arr: &ChunkedArray,
    index: usize,
    region: &Region,
    value: &ChunkValue,
) -> Result<()> {
    let meta = arr.meta();
    let behaved = meta.is_behaved();
    match value {
        ChunkValue::Scalar(v) => {
            let len = num_elements(&region_shape(region));
            let data = Buffer::filled(v.cast(meta.dtype), len);
            if behaved {
                arr.store().write_chunk(index, &data)
            } else {
                arr.store()
                    .write_region(region, &Dense::new(region_shape(region), data)?)
            }
        }
        ChunkValue::Array(a) => {
            if behaved {
                arr.store()
                    .write_chunk(index, &a.buffer().cast(meta.dtype))
            } else {
                arr.store().write_region(region, a)
            }
        }
    }
}
