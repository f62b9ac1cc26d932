use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::dense::{Dims, Region};
use crate::dtype::DType;
use crate::errors::{BadChunkLayoutSnafu, ChunkOutOfBoundsSnafu, Result};

/// Static description of a chunked array: logical shape, chunk partition,
/// and the block sub-partition the codec works in.
///
/// Two arrays are partition-aligned iff both chunk shape and block shape
/// are identical; a partition is "behaved" iff chunks tile the shape with
/// no padding at any boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
    pub block_shape: Vec<usize>,
    pub dtype: DType,
}

impl ChunkMeta {
    pub fn new(
        shape: Vec<usize>,
        chunk_shape: Vec<usize>,
        block_shape: Vec<usize>,
        dtype: DType,
    ) -> Result<ChunkMeta> {
        let meta = ChunkMeta {
            shape,
            chunk_shape,
            block_shape,
            dtype,
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Chunk shape defaults to the whole array, block shape to the chunk.
    pub fn with_defaults(
        shape: Vec<usize>,
        chunk_shape: Option<Vec<usize>>,
        block_shape: Option<Vec<usize>>,
        dtype: DType,
    ) -> Result<ChunkMeta> {
        let chunk_shape = chunk_shape.unwrap_or_else(|| shape.clone());
        let block_shape = block_shape.unwrap_or_else(|| chunk_shape.clone());
        ChunkMeta::new(shape, chunk_shape, block_shape, dtype)
    }

    fn validate(&self) -> Result<()> {
        let bad = |reason: &str| {
            BadChunkLayoutSnafu {
                shape: self.shape.clone(),
                chunks: self.chunk_shape.clone(),
                blocks: self.block_shape.clone(),
                reason: reason.to_string(),
            }
            .fail()
        };
        if self.chunk_shape.len() != self.shape.len() || self.block_shape.len() != self.shape.len()
        {
            return bad("chunk and block shapes must match the array rank");
        }
        if self.chunk_shape.iter().any(|&c| c == 0) || self.block_shape.iter().any(|&b| b == 0) {
            return bad("chunk and block extents must be nonzero");
        }
        for ax in 0..self.shape.len() {
            if self.block_shape[ax] > self.chunk_shape[ax] {
                return bad("block extent exceeds chunk extent");
            }
            if self.chunk_shape[ax] % self.block_shape[ax] != 0 {
                return bad("blocks must tile the chunk");
            }
        }
        Ok(())
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Number of chunks along each axis (ceiling division).
    pub fn grid_shape(&self) -> Dims {
        self.shape
            .iter()
            .zip(self.chunk_shape.iter())
            .map(|(&n, &c)| n.div_ceil(c))
            .collect()
    }

    pub fn chunk_count(&self) -> usize {
        self.grid_shape().iter().product()
    }

    /// Decode a linear chunk index into per-axis grid coordinates
    /// (row-major, last axis fastest).
    pub fn chunk_coords(&self, index: usize) -> Result<Dims> {
        let grid = self.grid_shape();
        let count: usize = grid.iter().product();
        if index >= count {
            return ChunkOutOfBoundsSnafu { index, count }.fail();
        }
        let mut coords: Dims = SmallVec::from_elem(0, grid.len());
        let mut rem = index;
        for ax in (0..grid.len()).rev() {
            coords[ax] = rem % grid[ax];
            rem /= grid[ax];
        }
        Ok(coords)
    }

    pub fn linear_index(&self, coords: &[usize]) -> usize {
        let grid = self.grid_shape();
        let mut idx = 0;
        for ax in 0..grid.len() {
            idx = idx * grid[ax] + coords[ax];
        }
        idx
    }

    /// The coordinate region a chunk covers, clipped at the array boundary.
    pub fn chunk_region(&self, index: usize) -> Result<Region> {
        let coords = self.chunk_coords(index)?;
        Ok(coords
            .iter()
            .enumerate()
            .map(|(ax, &c)| {
                let start = c * self.chunk_shape[ax];
                start..(start + self.chunk_shape[ax]).min(self.shape[ax])
            })
            .collect())
    }

    /// Whether a chunk is full-size (not clipped at the boundary).
    pub fn chunk_is_full(&self, index: usize) -> Result<bool> {
        let region = self.chunk_region(index)?;
        Ok(region
            .iter()
            .zip(self.chunk_shape.iter())
            .all(|(r, &c)| r.end - r.start == c))
    }

    /// Element count of a chunk, accounting for boundary clipping.
    pub fn chunk_len(&self, index: usize) -> Result<usize> {
        let region = self.chunk_region(index)?;
        Ok(region.iter().map(|r| r.end - r.start).product())
    }

    /// True when chunks tile the array exactly, so whole-chunk replacement
    /// writes are legal everywhere.
    pub fn is_behaved(&self) -> bool {
        self.shape
            .iter()
            .zip(self.chunk_shape.iter())
            .all(|(&n, &c)| n % c == 0)
    }

    /// Partition alignment: identical chunk and block shapes.
    pub fn partitions_match(&self, other: &ChunkMeta) -> bool {
        self.chunk_shape == other.chunk_shape && self.block_shape == other.block_shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(shape: &[usize], chunks: &[usize]) -> ChunkMeta {
        ChunkMeta::new(
            shape.to_vec(),
            chunks.to_vec(),
            chunks.to_vec(),
            DType::Float64,
        )
        .unwrap()
    }

    #[test]
    fn test_grid_geometry() {
        let m = meta(&[10, 7], &[4, 3]);
        assert_eq!(m.grid_shape().as_slice(), &[3, 3]);
        assert_eq!(m.chunk_count(), 9);
        // Last chunk is clipped on both axes.
        let r = m.chunk_region(8).unwrap();
        assert_eq!(r.as_slice(), &[8..10, 6..7]);
        assert!(!m.chunk_is_full(8).unwrap());
        assert!(m.chunk_is_full(0).unwrap());
        assert!(!m.is_behaved());
        assert!(meta(&[8, 6], &[4, 3]).is_behaved());
    }

    #[test]
    fn test_linear_roundtrip() {
        let m = meta(&[10, 7, 5], &[4, 3, 5]);
        for i in 0..m.chunk_count() {
            let c = m.chunk_coords(i).unwrap();
            assert_eq!(m.linear_index(&c), i);
        }
        assert!(m.chunk_coords(m.chunk_count()).is_err());
    }

    #[test]
    fn test_block_must_tile_chunk() {
        assert!(ChunkMeta::new(vec![8], vec![4], vec![3], DType::Int64).is_err());
        assert!(ChunkMeta::new(vec![8], vec![4], vec![2], DType::Int64).is_ok());
        assert!(ChunkMeta::new(vec![8], vec![4], vec![5], DType::Int64).is_err());
    }
}
