//! Reduction path.
//!
//! Chunk-wise reduction with a per-operator accumulator algebra: each
//! chunk's evaluated values are reduced along the requested axes
//! immediately and combined into the running accumulator, so partial
//! results never materialize at full size.

use std::sync::Arc;

use tracing::debug;

use crate::dense::{num_elements, region_shape, Dense, Dims};
use crate::dtype::{DType, Scalar};
use crate::errors::{
    EmptyReductionSnafu, EngineError, InvalidAxisSnafu, Result,
};
use crate::eval::fast::gather_aligned;
use crate::eval::partition::{InputLayout, IterGrid};
use crate::eval::slices::gather_projected;
use crate::eval::EvalOptions;
use crate::expr::node::ExprNode;
use crate::kernel::{self, ChunkValue};
use crate::operand::Operand;
use crate::pipeline::Prefetcher;
use crate::store::ChunkedArray;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Min,
    Max,
    Mean,
    Std,
    Var,
    Any,
    All,
}

impl ReduceOp {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Prod => "prod",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::Mean => "mean",
            ReduceOp::Std => "std",
            ReduceOp::Var => "var",
            ReduceOp::Any => "any",
            ReduceOp::All => "all",
        }
    }
}

/// A reduction request; constructed per call, never persisted.
#[derive(Debug, Clone)]
pub struct ReduceSpec {
    pub op: ReduceOp,
    /// Axes to collapse; `None` reduces every axis to a scalar.
    pub axis: Option<Vec<usize>>,
    pub keepdims: bool,
    /// Cast the final result to this dtype.
    pub dtype: Option<DType>,
    /// Bessel correction for `var`/`std`.
    pub ddof: usize,
}

impl ReduceSpec {
    pub fn new(op: ReduceOp) -> ReduceSpec {
        ReduceSpec {
            op,
            axis: None,
            keepdims: false,
            dtype: None,
            ddof: 0,
        }
    }

    pub fn along(mut self, axis: Vec<usize>) -> ReduceSpec {
        self.axis = Some(axis);
        self
    }

    pub fn keepdims(mut self, keep: bool) -> ReduceSpec {
        self.keepdims = keep;
        self
    }

    pub fn ddof(mut self, ddof: usize) -> ReduceSpec {
        self.ddof = ddof;
        self
    }
}

/// Validated axis set as a per-axis mask.
pub(crate) fn reduced_mask(axis: Option<&[usize]>, ndim: usize) -> Result<Vec<bool>> {
    match axis {
        None => Ok(vec![true; ndim]),
        Some(axes) => {
            let mut mask = vec![false; ndim];
            for &ax in axes {
                if ax >= ndim {
                    return InvalidAxisSnafu { axis: ax, ndim }.fail();
                }
                mask[ax] = true;
            }
            Ok(mask)
        }
    }
}

fn accumulator_dtype(op: ReduceOp, input: DType) -> DType {
    match op {
        ReduceOp::Sum | ReduceOp::Prod => match input {
            DType::Bool => DType::Int64,
            other => other,
        },
        ReduceOp::Min | ReduceOp::Max => input,
        ReduceOp::Any | ReduceOp::All => DType::Bool,
        ReduceOp::Mean | ReduceOp::Std | ReduceOp::Var => DType::Float64,
    }
}

fn seed(op: ReduceOp, dtype: DType) -> Scalar {
    match op {
        ReduceOp::Sum | ReduceOp::Any => Scalar::zero(dtype),
        ReduceOp::Prod | ReduceOp::All => Scalar::one(dtype),
        ReduceOp::Min => match dtype {
            DType::Bool => Scalar::Bool(true),
            DType::Int64 => Scalar::I64(i64::MAX),
            DType::Float64 => Scalar::F64(f64::INFINITY),
        },
        ReduceOp::Max => match dtype {
            DType::Bool => Scalar::Bool(false),
            DType::Int64 => Scalar::I64(i64::MIN),
            DType::Float64 => Scalar::F64(f64::NEG_INFINITY),
        },
        ReduceOp::Mean | ReduceOp::Std | ReduceOp::Var => {
            unreachable!("composite op has no seed")
        }
    }
}

fn combine(op: ReduceOp, dtype: DType) -> impl Fn(Scalar, Scalar) -> Scalar {
    move |a, b| match (op, dtype) {
        (ReduceOp::Sum, DType::Float64) => Scalar::F64(a.as_f64() + b.as_f64()),
        (ReduceOp::Sum, _) => Scalar::I64(a.as_i64().wrapping_add(b.as_i64())),
        (ReduceOp::Prod, DType::Float64) => Scalar::F64(a.as_f64() * b.as_f64()),
        (ReduceOp::Prod, _) => Scalar::I64(a.as_i64().wrapping_mul(b.as_i64())),
        (ReduceOp::Min, DType::Float64) => Scalar::F64(a.as_f64().min(b.as_f64())),
        (ReduceOp::Min, DType::Bool) => Scalar::Bool(a.as_bool() && b.as_bool()),
        (ReduceOp::Min, _) => Scalar::I64(a.as_i64().min(b.as_i64())),
        (ReduceOp::Max, DType::Float64) => Scalar::F64(a.as_f64().max(b.as_f64())),
        (ReduceOp::Max, DType::Bool) => Scalar::Bool(a.as_bool() || b.as_bool()),
        (ReduceOp::Max, _) => Scalar::I64(a.as_i64().max(b.as_i64())),
        (ReduceOp::Any, _) => Scalar::Bool(a.as_bool() || b.as_bool()),
        (ReduceOp::All, _) => Scalar::Bool(a.as_bool() && b.as_bool()),
        (ReduceOp::Mean | ReduceOp::Std | ReduceOp::Var, _) => {
            unreachable!("composite op has no combiner")
        }
    }
}

/// A uniform chunk (one scalar over `count` elements) reduced along the
/// collapsed axes.
fn fold_uniform(op: ReduceOp, value: Scalar, count: usize, dtype: DType) -> Scalar {
    match op {
        ReduceOp::Sum => match dtype {
            DType::Float64 => Scalar::F64(value.as_f64() * count as f64),
            _ => Scalar::I64(value.as_i64().wrapping_mul(count as i64)),
        },
        ReduceOp::Prod => match dtype {
            DType::Float64 => Scalar::F64(value.as_f64().powi(count as i32)),
            _ => Scalar::I64(
                value
                    .as_i64()
                    .wrapping_pow(count.min(u32::MAX as usize) as u32),
            ),
        },
        _ => value.cast(dtype),
    }
}

/// Evaluate a formula and reduce it with one of the primitive
/// accumulator operators (`sum`, `prod`, `min`, `max`, `any`, `all`).
/// The composite operators (`mean`, `var`, `std`) are built on top of
/// this in [`crate::lazy`].
pub(crate) fn reduce_eval(
    ast: &ExprNode,
    operands: &[Operand],
    layout: &InputLayout,
    expr_dtype: DType,
    spec: &ReduceSpec,
    opts: &EvalOptions,
) -> Result<Dense> {
    let shape = &layout.shape;
    let ndim = shape.len();
    let mask = reduced_mask(spec.axis.as_deref(), ndim)?;

    let reduced_elems: usize = shape
        .iter()
        .zip(mask.iter())
        .filter(|(_, &r)| r)
        .map(|(&n, _)| n)
        .product();
    if matches!(spec.op, ReduceOp::Min | ReduceOp::Max) && reduced_elems == 0 {
        return EmptyReductionSnafu {
            op: spec.op.name().to_string(),
        }
        .fail();
    }

    let acc_dtype = accumulator_dtype(spec.op, expr_dtype);
    let seed_value = seed(spec.op, acc_dtype);
    let merge = combine(spec.op, acc_dtype);

    let keep_shape: Dims = shape
        .iter()
        .zip(mask.iter())
        .map(|(&n, &r)| if r { 1 } else { n })
        .collect();
    let mut acc = Dense::filled(keep_shape, seed_value);

    // Fast-path reduction is stricter than plain evaluation: all
    // operands must share shape, chunks, and blocks, since the reduced
    // output cannot itself be chunk-aligned to the inputs.
    let fast = layout.fast_path && opts.chunks.is_none();
    let grid = if fast {
        IterGrid::new(shape, layout.chunk_shape.as_deref())
    } else {
        IterGrid::new(
            shape,
            opts.chunks.as_deref().or(layout.chunk_shape.as_deref()),
        )
    };
    let chunk_count = grid.chunk_count();
    debug!(
        op = spec.op.name(),
        fast,
        chunks = chunk_count,
        "reduction evaluation"
    );

    let mut pipeline = if fast && layout.all_chunked && layout.any_disk {
        let arrays: Vec<Arc<ChunkedArray>> = operands
            .iter()
            .filter_map(|op| op.as_chunked().cloned())
            .collect();
        Some(Prefetcher::spawn(arrays, chunk_count, opts.low_mem)?)
    } else {
        None
    };

    for index in 0..chunk_count {
        let region = grid.chunk_region(index);
        let bindings = if fast {
            let row = match &mut pipeline {
                Some(p) => Some(p.next().ok_or_else(|| EngineError::PipelineFetch {
                    reason: "pipeline ended before the last chunk".to_string(),
                })??),
                None => None,
            };
            gather_aligned(operands, index, &region, row)?
        } else {
            gather_projected(operands, shape, &region)?
        };
        let value = kernel::eval_node(ast, &bindings)?;

        let out_region: crate::dense::Region = region
            .iter()
            .zip(mask.iter())
            .map(|(r, &red)| if red { 0..1 } else { r.clone() })
            .collect();

        match value {
            ChunkValue::Scalar(v) => {
                // A uniform chunk (typically a zero-flagged stored chunk)
                // reduces without ever materializing; a zero chunk under
                // sum is a pure no-op.
                if spec.op == ReduceOp::Sum && v.is_zero() {
                    continue;
                }
                let within: usize = region
                    .iter()
                    .zip(mask.iter())
                    .filter(|(_, &red)| red)
                    .map(|(r, _)| r.end - r.start)
                    .product();
                if num_elements(&region_shape(&region)) == 0 {
                    continue;
                }
                let contribution = fold_uniform(spec.op, v, within, acc_dtype);
                acc.combine_region_uniform(&out_region, contribution, &merge)?;
            }
            ChunkValue::Array(a) => {
                let full;
                let chunk = if a.shape() == region_shape(&region).as_slice() {
                    a.as_ref()
                } else {
                    full = a.broadcast_to(&region_shape(&region))?;
                    &full
                };
                let partial = chunk.cast(acc_dtype).reduce_axes(&mask, seed_value, &merge);
                acc.combine_region(&out_region, &partial, &merge)?;
            }
        }
    }

    if let Some(dtype) = spec.dtype {
        acc = acc.cast(dtype);
    }
    if spec.keepdims {
        Ok(acc)
    } else {
        Ok(acc.squeeze_axes(&mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_validation() {
        assert!(reduced_mask(Some(&[2]), 2).is_err());
        assert_eq!(reduced_mask(Some(&[1]), 2).unwrap(), vec![false, true]);
        assert_eq!(reduced_mask(None, 2).unwrap(), vec![true, true]);
    }

    #[test]
    fn test_seeds() {
        assert_eq!(seed(ReduceOp::Sum, DType::Int64), Scalar::I64(0));
        assert_eq!(seed(ReduceOp::Prod, DType::Float64), Scalar::F64(1.0));
        assert_eq!(seed(ReduceOp::Min, DType::Int64), Scalar::I64(i64::MAX));
        assert_eq!(
            seed(ReduceOp::Max, DType::Float64),
            Scalar::F64(f64::NEG_INFINITY)
        );
        assert_eq!(seed(ReduceOp::Any, DType::Bool), Scalar::Bool(false));
        assert_eq!(seed(ReduceOp::All, DType::Bool), Scalar::Bool(true));
    }

    #[test]
    fn test_fold_uniform_sum_and_prod() {
        assert_eq!(
            fold_uniform(ReduceOp::Sum, Scalar::I64(3), 4, DType::Int64),
            Scalar::I64(12)
        );
        assert_eq!(
            fold_uniform(ReduceOp::Prod, Scalar::F64(2.0), 3, DType::Float64),
            Scalar::F64(8.0)
        );
        assert_eq!(
            fold_uniform(ReduceOp::Max, Scalar::I64(5), 9, DType::Int64),
            Scalar::I64(5)
        );
    }
}
