//! Directory-backed chunk container.
//!
//! Layout:
//!
//! ```text
//! <dir>/meta.json        array metadata document (+ optional artifact)
//! <dir>/chunks/<n>.lzc   framed compressed chunk, one file per linear index
//! ```
//!
//! A chunk file that does not exist reads as a uniform-zero chunk, so
//! freshly created arrays cost no chunk IO at all.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::dense::Dense;
use crate::errors::{ChunkOutOfBoundsSnafu, Result};
use crate::store::codec;
use crate::store::meta::ChunkMeta;
use crate::store::traits::{ChunkStore, Location};

const META_FILE: &str = "meta.json";
const CHUNK_DIR: &str = "chunks";

/// The on-disk metadata document. `artifact` carries a persisted
/// expression when this array is the output of a saved computation.
#[derive(Debug, Serialize, Deserialize)]
struct MetaDoc {
    #[serde(flatten)]
    meta: ChunkMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    artifact: Option<serde_json::Value>,
}

pub struct DiskStore {
    dir: PathBuf,
    meta: ChunkMeta,
    decompressions: AtomicU64,
}

impl DiskStore {
    /// Create a new (all-zero) array at `dir`.
    pub fn create(dir: impl Into<PathBuf>, meta: ChunkMeta) -> Result<DiskStore> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(CHUNK_DIR))?;
        let doc = MetaDoc {
            meta: meta.clone(),
            artifact: None,
        };
        fs::write(dir.join(META_FILE), serde_json::to_vec_pretty(&doc)?)?;
        Ok(DiskStore {
            dir,
            meta,
            decompressions: AtomicU64::new(0),
        })
    }

    /// Open an existing array directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<DiskStore> {
        let dir = dir.into();
        let doc: MetaDoc = serde_json::from_slice(&fs::read(dir.join(META_FILE))?)?;
        Ok(DiskStore {
            dir,
            meta: doc.meta,
            decompressions: AtomicU64::new(0),
        })
    }

    /// Chunk, compress, and persist an in-memory array at `dir`.
    pub fn from_dense(
        dir: impl Into<PathBuf>,
        src: &Dense,
        chunk_shape: Option<Vec<usize>>,
        block_shape: Option<Vec<usize>>,
    ) -> Result<DiskStore> {
        let meta = ChunkMeta::with_defaults(
            src.shape().to_vec(),
            chunk_shape,
            block_shape,
            src.dtype(),
        )?;
        let store = DiskStore::create(dir, meta)?;
        for chunk in 0..store.meta.chunk_count() {
            let region = store.meta.chunk_region(chunk)?;
            let piece = src.read_region(&region)?;
            if piece.buffer().all_zero() {
                // Missing chunk files already read as zero.
                continue;
            }
            store.write_chunk(chunk, piece.buffer())?;
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, chunk: usize) -> PathBuf {
        self.dir.join(CHUNK_DIR).join(format!("{chunk}.lzc"))
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

    fn read_doc(&self) -> Result<MetaDoc> {
        Ok(serde_json::from_slice(&fs::read(
            self.dir.join(META_FILE),
        )?)?)
    }
}

impl ChunkStore for DiskStore {
    fn meta(&self) -> &ChunkMeta {
        &self.meta
    }

    fn read_frame(&self, chunk: usize) -> Result<Vec<u8>> {
        self.check_index(chunk)?;
        match fs::read(self.chunk_path(chunk)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let len = self.meta.chunk_len(chunk)?;
                codec::encode_chunk(&Buffer::zeros(self.meta.dtype, len))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn chunk_is_zero(&self, chunk: usize) -> Result<bool> {
        self.check_index(chunk)?;
        // Header probe: one byte, never the payload.
        match fs::File::open(self.chunk_path(chunk)) {
            Ok(mut f) => {
                let mut flag = [0u8; 1];
                f.read_exact(&mut flag)?;
                Ok(flag[0] == 1)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
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
        fs::write(self.chunk_path(chunk), frame)?;
        Ok(())
    }

    fn location(&self) -> Option<Location> {
        Some(Location::Local {
            path: self.dir.to_string_lossy().into_owned(),
        })
    }

    fn is_disk_resident(&self) -> bool {
        true
    }

    fn decompression_count(&self) -> u64 {
        self.decompressions.load(Ordering::Relaxed)
    }

    fn put_artifact(&self, doc: &str) -> Result<()> {
        let mut meta_doc = self.read_doc()?;
        meta_doc.artifact = Some(serde_json::from_str(doc)?);
        fs::write(
            self.dir.join(META_FILE),
            serde_json::to_vec_pretty(&meta_doc)?,
        )?;
        Ok(())
    }

    fn get_artifact(&self) -> Result<Option<String>> {
        let doc = self.read_doc()?;
        Ok(match doc.artifact {
            Some(v) => Some(serde_json::to_string(&v)?),
            None => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_create_open_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let src = Dense::from_f64(vec![6, 4], (0..24).map(f64::from).collect()).unwrap();
        let store =
            DiskStore::from_dense(tmp.path().join("a"), &src, Some(vec![4, 4]), None).unwrap();
        assert!(store.location().is_some());

        let reopened = DiskStore::open(tmp.path().join("a")).unwrap();
        assert_eq!(reopened.meta(), store.meta());
        assert_eq!(reopened.read_region(&[0..6, 0..4]).unwrap(), src);
    }

    #[test]
    fn test_missing_chunk_reads_zero() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = ChunkMeta::new(vec![4], vec![2], vec![2], DType::Int64).unwrap();
        let store = DiskStore::create(tmp.path().join("z"), meta).unwrap();
        assert!(store.chunk_is_zero(0).unwrap());
        assert!(store.read_chunk(1).unwrap().all_zero());
        assert_eq!(store.decompression_count(), 0);
    }

    #[test]
    fn test_artifact_attach() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = ChunkMeta::new(vec![2], vec![2], vec![2], DType::Float64).unwrap();
        let store = DiskStore::create(tmp.path().join("m"), meta).unwrap();
        assert!(store.get_artifact().unwrap().is_none());
        store.put_artifact(r#"{"expression":"(o0 + 1)"}"#).unwrap();
        let doc = store.get_artifact().unwrap().unwrap();
        assert!(doc.contains("o0"));
    }
}
