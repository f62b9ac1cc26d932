use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::dense::{intersect_regions, region_shape, Dense, Region};
use crate::errors::Result;
use crate::store::meta::ChunkMeta;

/// Where a persisted array lives, for re-opening from an expression
/// artifact. Remote locations carry the transport base they were served
/// from; resolving them is a [`crate::persist::StoreResolver`] concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    // Remote first: untagged deserialization tries variants in order,
    // and a remote document also carries a `path` field.
    Remote { path: String, transport_base: String },
    Local { path: String },
}

/// The chunked array store collaborator.
///
/// A store hands out chunks by linear index (row-major, last axis
/// fastest) and answers a header-only probe for the uniform-zero flag so
/// callers can skip decompression entirely. Region IO has default
/// implementations in terms of whole-chunk IO.
pub trait ChunkStore: Send + Sync {
    fn meta(&self) -> &ChunkMeta;

    /// The chunk's framed compressed payload.
    fn read_frame(&self, chunk: usize) -> Result<Vec<u8>>;

    /// Header-only probe: is this chunk uniformly zero?
    fn chunk_is_zero(&self, chunk: usize) -> Result<bool>;

    /// The chunk decompressed, clipped at the array boundary.
    fn read_chunk(&self, chunk: usize) -> Result<Arc<Buffer>>;

    /// Decode a frame previously obtained via [`read_frame`], counting
    /// the decompression against this store.
    ///
    /// [`read_frame`]: ChunkStore::read_frame
    fn decode_frame(&self, frame: &[u8], len: usize) -> Result<Buffer>;

    /// Replace a whole chunk. `data` must hold the chunk's clipped
    /// element count.
    fn write_chunk(&self, chunk: usize, data: &Buffer) -> Result<()>;

    fn location(&self) -> Option<Location>;

    fn is_disk_resident(&self) -> bool;

    /// Number of chunk decompressions performed so far.
    fn decompression_count(&self) -> u64;

    /// Attach / fetch a metadata document carried alongside the array.
    fn put_artifact(&self, doc: &str) -> Result<()>;
    fn get_artifact(&self) -> Result<Option<String>>;

    /// Read an arbitrary coordinate region, assembling it from the
    /// overlapped chunks. Zero-flagged chunks contribute without any
    /// decompression.
    fn read_region(&self, region: &[Range<usize>]) -> Result<Dense> {
        let meta = self.meta();
        let mut out = Dense::zeros(region_shape(region), meta.dtype);
        for chunk in chunks_overlapping(meta, region) {
            let creg = meta.chunk_region(chunk)?;
            let Some(inter) = intersect_regions(&creg, region) else {
                continue;
            };
            if self.chunk_is_zero(chunk)? {
                continue;
            }
            let data = self.read_chunk(chunk)?;
            let cd = Dense::new(region_shape(&creg), (*data).clone())?;
            let src_local: Region = inter
                .iter()
                .zip(creg.iter())
                .map(|(i, c)| i.start - c.start..i.end - c.start)
                .collect();
            let dst_local: Region = inter
                .iter()
                .zip(region.iter())
                .map(|(i, r)| i.start - r.start..i.end - r.start)
                .collect();
            out.write_region(&dst_local, &cd.read_region(&src_local)?)?;
        }
        Ok(out)
    }

    /// Write an arbitrary coordinate region. Fully covered chunks are
    /// replaced outright; partially covered chunks go through
    /// read-modify-write.
    fn write_region(&self, region: &[Range<usize>], src: &Dense) -> Result<()> {
        let meta = self.meta();
        for chunk in chunks_overlapping(meta, region) {
            let creg = meta.chunk_region(chunk)?;
            let Some(inter) = intersect_regions(&creg, region) else {
                continue;
            };
            let src_local: Region = inter
                .iter()
                .zip(region.iter())
                .map(|(i, r)| i.start - r.start..i.end - r.start)
                .collect();
            let piece = src.read_region(&src_local)?;
            if inter == creg {
                self.write_chunk(chunk, &piece.cast(meta.dtype).into_buffer())?;
                continue;
            }
            let mut cd = Dense::new(region_shape(&creg), (*self.read_chunk(chunk)?).clone())?;
            let dst_local: Region = inter
                .iter()
                .zip(creg.iter())
                .map(|(i, c)| i.start - c.start..i.end - c.start)
                .collect();
            cd.write_region(&dst_local, &piece)?;
            self.write_chunk(chunk, &cd.into_buffer())?;
        }
        Ok(())
    }
}

impl fmt::Debug for dyn ChunkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStore")
            .field("meta", self.meta())
            .finish_non_exhaustive()
    }
}

/// Linear indices of the chunks whose regions overlap `region`, in
/// ascending order.
pub(crate) fn chunks_overlapping(meta: &ChunkMeta, region: &[Range<usize>]) -> Vec<usize> {
    let grid = meta.grid_shape();
    if region.iter().any(|r| r.start >= r.end) {
        return Vec::new();
    }
    // Per-axis chunk coordinate windows.
    let windows: Vec<Range<usize>> = region
        .iter()
        .zip(meta.chunk_shape.iter())
        .map(|(r, &c)| (r.start / c)..((r.end - 1) / c + 1))
        .collect();
    let mut out = Vec::new();
    let mut coords: Vec<usize> = windows.iter().map(|w| w.start).collect();
    loop {
        let mut idx = 0;
        for ax in 0..grid.len() {
            idx = idx * grid[ax] + coords[ax];
        }
        out.push(idx);
        let mut ax = windows.len();
        loop {
            if ax == 0 {
                return out;
            }
            ax -= 1;
            coords[ax] += 1;
            if coords[ax] < windows[ax].end {
                break;
            }
            coords[ax] = windows[ax].start;
        }
    }
}
