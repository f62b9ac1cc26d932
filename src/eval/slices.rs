//! Generic slow path.
//!
//! Handles everything the aligned fast path cannot: broadcasting between
//! mismatched shapes, partial-region requests, mismatched chunk/block
//! partitions, and the one-branch filter mask. Iterates the broadcast
//! shape's chunk grid, projecting every chunk's region down onto each
//! operand's own coordinate space.

use std::sync::Arc;

use tracing::debug;

use crate::buffer::Buffer;
use crate::dense::{intersect_regions, region_shape, Dense, Region};
use crate::dtype::DType;
use crate::errors::Result;
use crate::eval::fast::write_dense_chunk;
use crate::eval::partition::{project_region, regions_intersect, InputLayout, IterGrid};
use crate::eval::{normalize_item, EvalOptions, EvalOutput};
use crate::expr::node::ExprNode;
use crate::kernel::{self, ChunkValue};
use crate::operand::Operand;
use crate::store::ChunkedArray;

pub(crate) fn slices_eval(
    ast: &ExprNode,
    operands: &[Operand],
    layout: &InputLayout,
    dtype: DType,
    out: Option<Arc<ChunkedArray>>,
    filter: Option<&Operand>,
    opts: &EvalOptions,
) -> Result<EvalOutput> {
    let shape = &layout.shape;
    // Iteration chunk shape: explicit override, else the output's, else
    // whatever partition an operand carries, else the whole shape.
    let iter_chunks: Option<Vec<usize>> = opts
        .chunks
        .clone()
        .or_else(|| out.as_ref().map(|o| o.meta().chunk_shape.clone()))
        .or_else(|| layout.chunk_shape.clone());
    let grid = IterGrid::new(shape, iter_chunks.as_deref());
    let item = match &opts.item {
        Some(region) => Some(normalize_item(region, shape)?),
        None => None,
    };
    debug!(
        shape = ?shape,
        chunks = grid.chunk_count(),
        partial = item.is_some(),
        filtered = filter.is_some(),
        "generic path evaluation"
    );

    let mut dense_out: Option<Dense> = None;
    let mut flat_out: Option<Buffer> = None;

    for index in 0..grid.chunk_count() {
        let chunk_region = grid.chunk_region(index);
        // Skip chunks entirely outside the requested region, then narrow
        // to the overlap.
        let region = match &item {
            Some(want) => {
                if !regions_intersect(&chunk_region, want) {
                    continue;
                }
                match intersect_regions(&chunk_region, want) {
                    Some(r) => r,
                    None => continue,
                }
            }
            None => chunk_region,
        };

        let bindings = gather_projected(operands, shape, &region)?;
        let value = kernel::eval_node(ast, &bindings)?;

        if let Some(branch) = filter {
            // One-branch mask: the formula is the predicate; matching
            // elements of the branch are appended flat, preserving
            // discovery order across ascending chunk indices.
            let cond = value.to_dense(&region_shape(&region))?;
            let branch_value = gather_one(branch, shape, &region)?;
            let matched = kernel::filter_select(&cond, &branch_value)?;
            match &mut flat_out {
                Some(acc) => acc.extend(&matched),
                None => flat_out = Some(matched),
            }
            continue;
        }

        match &out {
            Some(arr) => write_store_region(arr, &region, &value)?,
            None => {
                // Created lazily so the first chunk's actual dtype wins.
                let d = dense_out
                    .get_or_insert_with(|| Dense::zeros(shape.clone(), value.dtype()));
                write_dense_chunk(d, &region, &value)?;
            }
        }
    }

    if filter.is_some() {
        let flat = match flat_out {
            Some(b) => b,
            None => Buffer::empty(filter.map(|f| f.dtype()).unwrap_or(DType::Float64)),
        };
        return Ok(EvalOutput::Flat(flat));
    }
    if let Some(arr) = out {
        return Ok(EvalOutput::Stored(arr));
    }
    let full = dense_out.unwrap_or_else(|| Dense::zeros(shape.clone(), dtype));
    // Chunk granularity may have over-selected; trim to the request.
    match item {
        Some(want) => Ok(EvalOutput::Dense(full.read_region(&want)?)),
        None => Ok(EvalOutput::Dense(full)),
    }
}

/// Chunk-local operand values for a broadcast iteration step: each
/// operand contributes the projection of `region` onto its own shape,
/// keeping size-1 axes so the kernel's pairwise broadcasting completes
/// the job.
pub(crate) fn gather_projected(
    operands: &[Operand],
    iter_shape: &[usize],
    region: &Region,
) -> Result<Vec<ChunkValue>> {
    operands
        .iter()
        .map(|op| gather_one(op, iter_shape, region))
        .collect()
}

fn gather_one(op: &Operand, iter_shape: &[usize], region: &Region) -> Result<ChunkValue> {
    match op {
        Operand::Scalar(v) => Ok(ChunkValue::Scalar(*v)),
        Operand::Array(a) => {
            let sub = project_region(iter_shape, a.shape(), region);
            Ok(ChunkValue::from_dense(a.read_region(&sub)?))
        }
        Operand::Chunked(c) => {
            let sub = project_region(iter_shape, c.shape(), region);
            Ok(ChunkValue::from_dense(c.store().read_region(&sub)?))
        }
    }
}

/// Region write into a chunked output, upgraded to whole-chunk
/// replacement when the region is exactly one behaved chunk.
fn write_store_region(arr: &ChunkedArray, region: &Region, value: &ChunkValue) -> Result<()> {
    let meta = arr.meta();
    let dense;
    let data = match value {
        ChunkValue::Array(a) => a.as_ref(),
        ChunkValue::Scalar(v) => {
            dense = Dense::filled(region_shape(region), v.cast(meta.dtype));
            &dense
        }
    };
    if meta.is_behaved() {
        let coords: Vec<usize> = region
            .iter()
            .zip(meta.chunk_shape.iter())
            .map(|(r, &c)| r.start / c)
            .collect();
        let index = meta.linear_index(&coords);
        if meta.chunk_region(index)? == *region {
            return arr.store().write_chunk(index, &data.buffer().cast(meta.dtype));
        }
    }
    arr.store().write_region(region, data)
}
