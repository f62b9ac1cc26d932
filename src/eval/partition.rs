//! Partition compatibility and broadcast analysis.
//!
//! Decides, for a set of operands (plus an optional output), whether the
//! aligned fast path is legal, and computes the broadcast output shape
//! otherwise.

use std::ops::Range;

use smallvec::SmallVec;

use crate::dense::{broadcast_shapes, Dims, Region};
use crate::errors::{EmptyOperandsSnafu, Result};
use crate::operand::Operand;
use crate::store::{ChunkMeta, ChunkedArray};

/// The outcome of input validation: the iteration shape and, when every
/// partition lines up, the common chunk/block shapes.
#[derive(Debug, Clone)]
pub(crate) struct InputLayout {
    pub shape: Dims,
    pub chunk_shape: Option<Vec<usize>>,
    pub block_shape: Option<Vec<usize>>,
    /// All shapes equal and all chunk-bearing operands (and output)
    /// partition-aligned.
    pub fast_path: bool,
    /// Every operand is store-backed and at least one is disk-resident.
    pub all_chunked: bool,
    pub any_disk: bool,
}

pub(crate) fn validate_inputs(
    operands: &[Operand],
    out: Option<&ChunkedArray>,
) -> Result<InputLayout> {
    if operands.is_empty() {
        return EmptyOperandsSnafu.fail();
    }

    // Broadcast all shaped operands; errors name the offending pair.
    let mut shape: Option<Dims> = None;
    let mut all_equal = true;
    for op in operands {
        let Some(s) = op.shape() else { continue };
        match &mut shape {
            None => shape = Some(Dims::from_slice(s)),
            Some(cur) => {
                if cur.as_slice() != s {
                    all_equal = false;
                }
                *cur = broadcast_shapes(cur, s)?;
            }
        }
    }
    let shape = shape.unwrap_or_default();

    let mut first_meta: Option<ChunkMeta> = None;
    let mut aligned = true;
    let mut all_chunked = true;
    let mut any_disk = false;
    let mut check = |c: &ChunkedArray| {
        let meta = c.meta();
        match &first_meta {
            None => first_meta = Some(meta.clone()),
            Some(reference) => {
                if !reference.partitions_match(meta) {
                    aligned = false;
                }
            }
        }
    };
    for op in operands {
        match op {
            Operand::Chunked(c) => {
                any_disk |= c.is_disk_resident();
                check(c);
            }
            Operand::Array(_) => all_chunked = false,
            Operand::Scalar(_) => {}
        }
    }
    if let Some(out) = out {
        check(out);
    }

    // The fast path needs exactly-equal shapes; alignment of chunk and
    // block partitions only matters once that holds.
    let fast_path = all_equal && aligned;

    Ok(InputLayout {
        shape,
        chunk_shape: first_meta.as_ref().map(|m| m.chunk_shape.clone()),
        block_shape: first_meta.map(|m| m.block_shape),
        fast_path,
        all_chunked: all_chunked && operands.iter().any(|o| o.shape().is_some()),
        any_disk,
    })
}

/// Project a region expressed in the iteration (larger) shape's
/// coordinates down onto a broadcast-smaller operand: leading axes the
/// operand lacks are dropped, size-1 axes become the full range, all
/// other axes keep the outer range.
pub(crate) fn project_region(
    larger: &[usize],
    smaller: &[usize],
    region: &[Range<usize>],
) -> Region {
    let skip = larger.len() - smaller.len();
    region
        .iter()
        .skip(skip)
        .zip(smaller.iter())
        .map(|(r, &n)| if n == 1 { 0..1 } else { r.clone() })
        .collect()
}

/// Whether two regions overlap; the shorter one is padded with
/// full-range axes before comparing bounds.
pub(crate) fn regions_intersect(a: &[Range<usize>], b: &[Range<usize>]) -> bool {
    let n = a.len().min(b.len());
    a.iter()
        .take(n)
        .zip(b.iter().take(n))
        .all(|(ra, rb)| ra.start < rb.end && rb.start < ra.end)
}

/// The chunk grid an evaluation iterates: the output shape partitioned by
/// the iteration chunk shape, clipped at the boundary.
#[derive(Debug, Clone)]
pub(crate) struct IterGrid {
    pub shape: Dims,
    pub chunk_shape: Dims,
}

impl IterGrid {
    pub fn new(shape: &[usize], chunk_shape: Option<&[usize]>) -> IterGrid {
        // A partition of a different rank (a broadcast-smaller operand's)
        // cannot tile the iteration shape; fall back to one whole chunk.
        let chunk_shape = match chunk_shape {
            Some(c) if c.len() == shape.len() => Dims::from_slice(c),
            _ => Dims::from_slice(shape),
        };
        IterGrid {
            shape: Dims::from_slice(shape),
            chunk_shape,
        }
    }

    pub fn grid_shape(&self) -> Dims {
        self.shape
            .iter()
            .zip(self.chunk_shape.iter())
            .map(|(&n, &c)| n.div_ceil(c.max(1)))
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        if self.shape.is_empty() {
            return 1;
        }
        self.grid_shape().iter().product()
    }

    /// Clipped region of a chunk, in linear row-major order.
    pub fn chunk_region(&self, index: usize) -> Region {
        let grid = self.grid_shape();
        let mut coords: Dims = SmallVec::from_elem(0, grid.len());
        let mut rem = index;
        for ax in (0..grid.len()).rev() {
            coords[ax] = rem % grid[ax];
            rem /= grid[ax];
        }
        coords
            .iter()
            .enumerate()
            .map(|(ax, &c)| {
                let start = c * self.chunk_shape[ax];
                start..(start + self.chunk_shape[ax]).min(self.shape[ax])
            })
            .collect()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::Dense;
    use crate::dtype::{DType, Scalar};

    fn chunked(shape: &[usize], chunks: &[usize]) -> Operand {
        let d = Dense::zeros(shape.to_vec(), DType::Float64);
        Operand::Chunked(
            ChunkedArray::from_dense(&d, Some(chunks.to_vec()), None).unwrap(),
        )
    }

    #[test]
    fn test_empty_operands_rejected() {
        assert!(validate_inputs(&[], None).is_err());
    }

    #[test]
    fn test_aligned_inputs_take_fast_path() {
        let ops = vec![
            chunked(&[8, 8], &[4, 4]),
            chunked(&[8, 8], &[4, 4]),
            Operand::Scalar(Scalar::F64(2.0)),
        ];
        let layout = validate_inputs(&ops, None).unwrap();
        assert!(layout.fast_path);
        assert_eq!(layout.shape.as_slice(), &[8, 8]);
        assert_eq!(layout.chunk_shape.as_deref(), Some(&[4usize, 4][..]));
    }

    #[test]
    fn test_misaligned_chunks_fall_back() {
        let ops = vec![chunked(&[8, 8], &[4, 4]), chunked(&[8, 8], &[2, 8])];
        let layout = validate_inputs(&ops, None).unwrap();
        assert!(!layout.fast_path);
        assert!(layout.all_chunked);
    }

    #[test]
    fn test_broadcast_shapes_never_fast() {
        let ops = vec![chunked(&[3, 1], &[3, 1]), chunked(&[1, 4], &[1, 4])];
        let layout = validate_inputs(&ops, None).unwrap();
        assert!(!layout.fast_path);
        assert_eq!(layout.shape.as_slice(), &[3, 4]);
    }

    #[test]
    fn test_incompatible_shapes_rejected() {
        let ops = vec![chunked(&[3, 2], &[3, 2]), chunked(&[1, 4], &[1, 4])];
        assert!(validate_inputs(&ops, None).is_err());
    }

    #[test]
    fn test_project_region() {
        // Operand (4, 1) inside iteration shape (2, 4, 5).
        let out = project_region(&[2, 4, 5], &[4, 1], &[0..1, 1..3, 2..5]);
        assert_eq!(out.as_slice(), &[1..3, 0..1]);
    }

    #[test]
    fn test_regions_intersect_pads_short_side() {
        assert!(regions_intersect(&[0..4], &[2..3, 0..9]));
        assert!(!regions_intersect(&[0..2], &[2..3, 0..9]));
    }

    #[test]
    fn test_iter_grid_rowmajor() {
        let g = IterGrid::new(&[5, 4], Some(&[2, 3]));
        assert_eq!(g.chunk_count(), 6);
        assert_eq!(g.chunk_region(0).as_slice(), &[0..2, 0..3]);
        assert_eq!(g.chunk_region(1).as_slice(), &[0..2, 3..4]);
        assert_eq!(g.chunk_region(5).as_slice(), &[4..5, 3..4]);
    }
}
