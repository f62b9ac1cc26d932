use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::buffer::Buffer;
use crate::dense::{region_shape, Dense};
use crate::errors::{ChunkOutOfBoundsSnafu, Result};
use crate::store::codec;
use crate::store::meta::ChunkMeta;
use crate::store::traits::{ChunkStore, Location};

/// An in-memory chunk store: every chunk held as its compressed frame.
///
/// This is the reference store for tests and for intermediate results;
/// it goes through exactly the same framing and decompression path as
/// the disk store.
pub struct MemStore {
    meta: ChunkMeta,
    frames: RwLock<Vec<Vec<u8>>>,
    artifact: RwLock<Option<String>>,
    decompressions: AtomicU64,
}

impl MemStore {
    /// An all-zero array (every chunk a flag-only zero frame).
    pub fn empty(meta: ChunkMeta) -> Result<MemStore> {
        let mut frames = Vec::with_capacity(meta.chunk_count());
        for chunk in 0..meta.chunk_count() {
            let len = meta.chunk_len(chunk)?;
            frames.push(codec::encode_chunk(&Buffer::zeros(meta.dtype, len))?);
        }
        Ok(MemStore {
            meta,
            frames: RwLock::new(frames),
            artifact: RwLock::new(None),
            decompressions: AtomicU64::new(0),
        })
    }

    /// Chunk and compress an in-memory array.
    pub fn from_dense(
        src: &Dense,
        chunk_shape: Option<Vec<usize>>,
        block_shape: Option<Vec<usize>>,
    ) -> Result<MemStore> {
        let meta = ChunkMeta::with_defaults(
            src.shape().to_vec(),
            chunk_shape,
            block_shape,
            src.dtype(),
        )?;
        let store = MemStore::empty(meta)?;
        for chunk in 0..store.meta.chunk_count() {
            let region = store.meta.chunk_region(chunk)?;
            let piece = src.read_region(&region)?;
            store.write_chunk(chunk, piece.buffer())?;
        }
        Ok(store)
    }

    fn check_index(&self, chunk: usize) -> Result<()> {
        let count = self.meta.chunk_count();
        if chunk >= count {
            return ChunkOutOfBoundsSnafu {
                index: chunk,
                count,
            }
            .fail();
        }
        Ok(())
    }
}

impl ChunkStore for MemStore {
    fn meta(&self) -> &ChunkMeta {
        &self.meta
    }

    fn read_frame(&self, chunk: usize) -> Result<Vec<u8>> {
        self.check_index(chunk)?;
        Ok(self.frames.read().expect("frame lock poisoned")[chunk].clone())
    }

    fn chunk_is_zero(&self, chunk: usize) -> Result<bool> {
        self.check_index(chunk)?;
        codec::frame_is_zero(&self.frames.read().expect("frame lock poisoned")[chunk])
    }

    fn read_chunk(&self, chunk: usize) -> Result<Arc<Buffer>> {
        let frame = self.read_frame(chunk)?;
        Ok(Arc::new(self.decode_frame(&frame, self.meta.chunk_len(chunk)?)?))
    }

    fn decode_frame(&self, frame: &[u8], len: usize) -> Result<Buffer> {
        let (data, decompressed) = codec::decode_chunk(frame, self.meta.dtype, len)?;
        if decompressed {
            self.decompressions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(data)
    }

    fn write_chunk(&self, chunk: usize, data: &Buffer) -> Result<()> {
        self.check_index(chunk)?;
        let frame = codec::encode_chunk(&data.cast(self.meta.dtype))?;
        self.frames.write().expect("frame lock poisoned")[chunk] = frame;
        Ok(())
    }

    fn location(&self) -> Option<Location> {
        None
    }

    fn is_disk_resident(&self) -> bool {
        false
    }

    fn decompression_count(&self) -> u64 {
        self.decompressions.load(Ordering::Relaxed)
    }

    fn put_artifact(&self, doc: &str) -> Result<()> {
        *self.artifact.write().expect("artifact lock poisoned") = Some(doc.to_string());
        Ok(())
    }

    fn get_artifact(&self) -> Result<Option<String>> {
        Ok(self.artifact.read().expect("artifact lock poisoned").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_chunk_and_region_roundtrip() {
        let src = Dense::from_i64(vec![5, 6], (0..30).collect()).unwrap();
        let store = MemStore::from_dense(&src, Some(vec![2, 3]), None).unwrap();
        assert_eq!(store.meta().chunk_count(), 9);

        let full = store.read_region(&[0..5, 0..6]).unwrap();
        assert_eq!(full, src);

        let sub = store.read_region(&[1..4, 2..5]).unwrap();
        assert_eq!(sub, src.read_region(&[1..4, 2..5]).unwrap());
    }

    #[test]
    fn test_zero_probe_avoids_decompression() {
        let meta =
            ChunkMeta::new(vec![4, 4], vec![2, 2], vec![2, 2], DType::Float64).unwrap();
        let store = MemStore::empty(meta).unwrap();
        for chunk in 0..4 {
            assert!(store.chunk_is_zero(chunk).unwrap());
        }
        let all = store.read_region(&[0..4, 0..4]).unwrap();
        assert!(all.buffer().all_zero());
        assert_eq!(store.decompression_count(), 0);
    }

    #[test]
    fn test_write_region_read_modify_write() {
        let meta = ChunkMeta::new(vec![4], vec![3], vec![3], DType::Int64).unwrap();
        let store = MemStore::empty(meta).unwrap();
        let patch = Dense::from_i64(vec![2], vec![7, 8]).unwrap();
        store.write_region(&[2..4], &patch).unwrap();
        let all = store.read_region(&[0..4]).unwrap();
        assert_eq!(all.buffer(), &Buffer::I64(vec![0, 0, 7, 8]));
    }
}
