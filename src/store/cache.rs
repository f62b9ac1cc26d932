use std::sync::Arc;

use moka::sync::Cache as MokaCache;

use crate::buffer::Buffer;
use crate::errors::Result;
use crate::store::meta::ChunkMeta;
use crate::store::traits::{ChunkStore, Location};

/// A decompressed-chunk cache over any store.
///
/// Only whole-chunk reads are cached; frames, probes and writes pass
/// through (writes invalidate the touched chunk).
pub struct CachedStore<S: ChunkStore> {
    inner: S,
    chunks: MokaCache<usize, Arc<Buffer>>,
}

impl<S: ChunkStore> CachedStore<S> {
    pub fn new(inner: S, max_chunks: u64) -> CachedStore<S> {
        CachedStore {
            inner,
            chunks: MokaCache::new(max_chunks),
        }
    }

    pub fn cached_chunks(&self) -> u64 {
        self.chunks.entry_count()
    }

    pub fn clear(&self) {
        self.chunks.invalidate_all();
    }
}

impl<S: ChunkStore> ChunkStore for CachedStore<S> {
    fn meta(&self) -> &ChunkMeta {
        self.inner.meta()
    }

    fn read_frame(&self, chunk: usize) -> Result<Vec<u8>> {
        self.inner.read_frame(chunk)
    }

    fn chunk_is_zero(&self, chunk: usize) -> Result<bool> {
        self.inner.chunk_is_zero(chunk)
    }

    fn read_chunk(&self, chunk: usize) -> Result<Arc<Buffer>> {
        if let Some(hit) = self.chunks.get(&chunk) {
            return Ok(hit);
        }
        let data = self.inner.read_chunk(chunk)?;
        self.chunks.insert(chunk, data.clone());
        Ok(data)
    }

    fn decode_frame(&self, frame: &[u8], len: usize) -> Result<Buffer> {
        self.inner.decode_frame(frame, len)
    }

    fn write_chunk(&self, chunk: usize, data: &Buffer) -> Result<()> {
        self.inner.write_chunk(chunk, data)?;
        self.chunks.invalidate(&chunk);
        Ok(())
    }

    fn location(&self) -> Option<Location> {
        self.inner.location()
    }

    fn is_disk_resident(&self) -> bool {
        self.inner.is_disk_resident()
    }

    fn decompression_count(&self) -> u64 {
        self.inner.decompression_count()
    }

    fn put_artifact(&self, doc: &str) -> Result<()> {
        self.inner.put_artifact(doc)
    }

    fn get_artifact(&self) -> Result<Option<String>> {
        self.inner.get_artifact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dense::Dense;
    use crate::store::mem::MemStore;

    #[test]
    fn test_repeated_reads_hit_cache() {
        let src = Dense::from_i64(vec![4, 4], (0..16).collect()).unwrap();
        let store = MemStore::from_dense(&src, Some(vec![2, 2]), None).unwrap();
        let cached = CachedStore::new(store, 64);

        let a = cached.read_chunk(0).unwrap();
        let before = cached.decompression_count();
        let b = cached.read_chunk(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cached.decompression_count(), before);
    }

    #[test]
    fn test_write_invalidates() {
        let src = Dense::from_i64(vec![4], (0..4).collect()).unwrap();
        let store = MemStore::from_dense(&src, Some(vec![2]), None).unwrap();
        let cached = CachedStore::new(store, 64);

        let _ = cached.read_chunk(0).unwrap();
        cached
            .write_chunk(0, &Buffer::I64(vec![9, 9]))
            .unwrap();
        assert_eq!(&*cached.read_chunk(0).unwrap(), &Buffer::I64(vec![9, 9]));
    }
}
