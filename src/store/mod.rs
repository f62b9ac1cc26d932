pub mod cache;
pub mod codec;
pub mod disk;
pub mod mem;
pub mod meta;
pub mod traits;

use std::path::PathBuf;
use std::sync::Arc;

use crate::dense::{region_of_shape, Dense};
use crate::dtype::DType;
use crate::errors::Result;

pub use cache::CachedStore;
pub use disk::DiskStore;
pub use mem::MemStore;
pub use meta::ChunkMeta;
pub use traits::{ChunkStore, Location};

/// A store-backed array operand: the store plus convenience accessors.
///
/// `ChunkedArray` values are shared via `Arc`; operand deduplication in
/// expression fusion compares those `Arc`s by pointer identity.
pub struct ChunkedArray {
    store: Arc<dyn ChunkStore>,
}

impl ChunkedArray {
    pub fn new(store: Arc<dyn ChunkStore>) -> Arc<ChunkedArray> {
        Arc::new(ChunkedArray { store })
    }

    /// Compress an in-memory array into a new in-memory chunk store.
    pub fn from_dense(
        src: &Dense,
        chunk_shape: Option<Vec<usize>>,
        block_shape: Option<Vec<usize>>,
    ) -> Result<Arc<ChunkedArray>> {
        Ok(ChunkedArray::new(Arc::new(MemStore::from_dense(
            src,
            chunk_shape,
            block_shape,
        )?)))
    }

    /// Compress an in-memory array into a new directory container.
    pub fn to_disk(
        dir: impl Into<PathBuf>,
        src: &Dense,
        chunk_shape: Option<Vec<usize>>,
        block_shape: Option<Vec<usize>>,
    ) -> Result<Arc<ChunkedArray>> {
        Ok(ChunkedArray::new(Arc::new(DiskStore::from_dense(
            dir,
            src,
            chunk_shape,
            block_shape,
        )?)))
    }

    /// Open an existing directory container.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Arc<ChunkedArray>> {
        Ok(ChunkedArray::new(Arc::new(DiskStore::open(dir)?)))
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn meta(&self) -> &ChunkMeta {
        self.store.meta()
    }

    pub fn shape(&self) -> &[usize] {
        &self.store.meta().shape
    }

    pub fn dtype(&self) -> DType {
        self.store.meta().dtype
    }

    pub fn is_disk_resident(&self) -> bool {
        self.store.is_disk_resident()
    }

    pub fn location(&self) -> Option<Location> {
        self.store.location()
    }

    pub fn decompression_count(&self) -> u64 {
        self.store.decompression_count()
    }

    /// Materialize the whole array in memory.
    pub fn to_dense(&self) -> Result<Dense> {
        let region = region_of_shape(self.shape());
        self.store.read_region(&region)
    }
}

impl std::fmt::Debug for ChunkedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedArray")
            .field("meta", self.store.meta())
            .field("disk", &self.store.is_disk_resident())
            .finish()
    }
}
