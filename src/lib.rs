//! lazarr: lazy expression evaluation over chunked, compressed,
//! disk-backed n-dimensional arrays.
//!
//! Build an expression tree from array operands with ordinary operators,
//! defer execution, then materialize chunk-by-chunk — whole arrays never
//! have to fit in memory. Each evaluation picks the cheapest viable
//! strategy: the aligned fast path when every shape and partition
//! matches, the generic broadcast path for mismatched shapes and partial
//! regions, or the reduction path with per-operator accumulators. Chunk
//! reads for disk-resident operands overlap with computation through a
//! bounded prefetch pipeline.
//!
//! ```no_run
//! use lazarr::{lazy, ChunkedArray, Dense};
//!
//! # fn main() -> lazarr::Result<()> {
//! let a = ChunkedArray::open("data/a")?;
//! let b = ChunkedArray::open("data/b")?;
//! let expr = lazy(&a) + 2.0 * &lazy(&b);
//! let result: Dense = expr.eval()?.into_dense()?;
//! let total = expr.sum()?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod dense;
mod dtype;
pub mod errors;
mod eval;
mod expr;
mod kernel;
mod lazy;
mod operand;
mod persist;
mod pipeline;
mod store;

pub use buffer::Buffer;
pub use dense::{broadcast_shapes, Dense, Dims, Region};
pub use dtype::{DType, Scalar};
pub use errors::{EngineError, Result};
pub use eval::reduce::{ReduceOp, ReduceSpec};
pub use eval::{EvalOptions, EvalOutput};
pub use expr::{parse_formula, BinOp, ExprNode, Func, UnOp};
pub use kernel::ChunkValue;
pub use lazy::{lazy, Expression, LazyArray, LazyInput, UdfFn};
pub use operand::Operand;
pub use persist::{
    open_expression, open_expression_with, save_expression, LocalResolver, StoreResolver,
};
pub use store::{CachedStore, ChunkMeta, ChunkStore, ChunkedArray, DiskStore, Location, MemStore};
