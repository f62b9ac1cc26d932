//! Disk prefetch pipeline.
//!
//! A background worker walks chunk indices in linear order and, for each
//! index, fetches every operand's chunk concurrently, pushing the ordered
//! row of results into a bounded queue the evaluator drains on the
//! calling thread. Closing the channel is the completion sentinel; a
//! fetch error is forwarded as an `Err` row and ends the stream.
//!
//! This is strictly single-producer/single-consumer: the worker is the
//! only writer and the evaluation loop the only reader, so the channel is
//! the entire synchronization story.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::dense::{region_shape, Dense};
use crate::dtype::Scalar;
use crate::errors::{PipelineRuntimeSnafu, Result};
use crate::kernel::ChunkValue;
use crate::store::ChunkedArray;
use snafu::ResultExt;

/// Queue depth: one row in flight while the previous one is computed.
const QUEUE_DEPTH: usize = 2;

/// One operand's chunk as delivered by the pipeline. In low-memory mode
/// the compressed frame is passed through untouched and decoded by the
/// consumer just before use.
pub(crate) enum Fetched {
    Value(ChunkValue),
    Raw { frame: Vec<u8>, len: usize },
}

impl Fetched {
    /// Decode against the owning array (counts the decompression there).
    pub(crate) fn into_value(self, owner: &ChunkedArray, index: usize) -> Result<ChunkValue> {
        match self {
            Fetched::Value(v) => Ok(v),
            Fetched::Raw { frame, len } => {
                let data = owner.store().decode_frame(&frame, len)?;
                let shape = region_shape(&owner.meta().chunk_region(index)?);
                Ok(ChunkValue::from_dense(Dense::new(shape, data)?))
            }
        }
    }
}

pub(crate) struct Prefetcher {
    rx: mpsc::Receiver<Result<Vec<Fetched>>>,
    // Kept alive for the worker and its blocking fetch tasks.
    _runtime: tokio::runtime::Runtime,
}

impl Prefetcher {
    /// Spawn a worker streaming chunk rows for `arrays` over indices
    /// `0..chunk_count`.
    pub(crate) fn spawn(
        arrays: Vec<Arc<ChunkedArray>>,
        chunk_count: usize,
        low_mem: bool,
    ) -> Result<Prefetcher> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("lazarr-prefetch")
            .build()
            .context(PipelineRuntimeSnafu)?;
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        debug!(
            operands = arrays.len(),
            chunks = chunk_count,
            low_mem,
            "spawning prefetch pipeline"
        );
        runtime.spawn(async move {
            for index in 0..chunk_count {
                let fetches = arrays.iter().map(|arr| {
                    let arr = Arc::clone(arr);
                    tokio::task::spawn_blocking(move || fetch_one(&arr, index, low_mem))
                });
                let joined = futures::future::join_all(fetches).await;
                let mut row = Vec::with_capacity(joined.len());
                let mut failure = None;
                for outcome in joined {
                    match outcome {
                        Ok(Ok(fetched)) => row.push(fetched),
                        Ok(Err(e)) => {
                            failure = Some(e);
                            break;
                        }
                        Err(join_err) => {
                            failure = Some(crate::errors::EngineError::PipelineFetch {
                                reason: join_err.to_string(),
                            });
                            break;
                        }
                    }
                }
                if let Some(e) = failure {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                trace!(index, "prefetched chunk row");
                if tx.send(Ok(row)).await.is_err() {
                    // Consumer went away; stop fetching.
                    return;
                }
            }
        });
        Ok(Prefetcher {
            rx,
            _runtime: runtime,
        })
    }

    /// Next row, in ascending chunk-index order. `None` means the stream
    /// completed.
    pub(crate) fn next(&mut self) -> Option<Result<Vec<Fetched>>> {
        self.rx.blocking_recv()
    }
}

fn fetch_one(arr: &ChunkedArray, index: usize, low_mem: bool) -> Result<Fetched> {
    let store = arr.store();
    let meta = arr.meta();
    if store.chunk_is_zero(index)? {
        return Ok(Fetched::Value(ChunkValue::Scalar(Scalar::zero(meta.dtype))));
    }
    let region = meta.chunk_region(index)?;
    if !meta.chunk_is_full(index)? {
        return Ok(Fetched::Value(ChunkValue::from_dense(
            store.read_region(&region)?,
        )));
    }
    if low_mem {
        return Ok(Fetched::Raw {
            frame: store.read_frame(index)?,
            len: meta.chunk_len(index)?,
        });
    }
    let data = store.read_chunk(index)?;
    let data = Arc::try_unwrap(data).unwrap_or_else(|shared| (*shared).clone());
    Ok(Fetched::Value(ChunkValue::from_dense(Dense::new(
        region_shape(&region),
        data,
    )?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::store::ChunkMeta;

    #[test]
    fn test_rows_arrive_in_order() {
        let a = Dense::from_i64(vec![6], (0..6).collect()).unwrap();
        let arr = ChunkedArray::from_dense(&a, Some(vec![2]), None).unwrap();
        let mut p = Prefetcher::spawn(vec![arr.clone()], 3, false).unwrap();

        for expect in [vec![0i64, 1], vec![2, 3], vec![4, 5]] {
            let row = p.next().unwrap().unwrap();
            assert_eq!(row.len(), 1);
            let v = row.into_iter().next().unwrap().into_value(&arr, 0).unwrap();
            let ChunkValue::Array(d) = v else { panic!("expected array") };
            assert_eq!(d.buffer(), &crate::buffer::Buffer::I64(expect));
        }
        assert!(p.next().is_none());
    }

    #[test]
    fn test_zero_chunks_arrive_as_scalars() {
        let meta = ChunkMeta::new(vec![4], vec![2], vec![2], DType::Float64).unwrap();
        let store = crate::store::MemStore::empty(meta).unwrap();
        let arr = ChunkedArray::new(Arc::new(store));
        let mut p = Prefetcher::spawn(vec![arr], 2, false).unwrap();
        for _ in 0..2 {
            let row = p.next().unwrap().unwrap();
            assert!(matches!(
                row[0],
                Fetched::Value(ChunkValue::Scalar(Scalar::F64(v))) if v == 0.0
            ));
        }
        assert!(p.next().is_none());
    }

    #[test]
    fn test_fetch_error_propagates() {
        let a = Dense::from_i64(vec![4], (0..4).collect()).unwrap();
        let arr = ChunkedArray::from_dense(&a, Some(vec![2]), None).unwrap();
        // Ask for more chunks than exist; the out-of-range fetch must
        // surface as an Err row rather than hanging.
        let mut p = Prefetcher::spawn(vec![arr], 3, false).unwrap();
        let mut saw_err = false;
        while let Some(row) = p.next() {
            if row.is_err() {
                saw_err = true;
                break;
            }
        }
        assert!(saw_err);
    }
}
