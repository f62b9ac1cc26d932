//! Vectorized formula execution over one chunk's worth of operand data.
//!
//! The evaluator walks the expression tree once per chunk with the
//! gathered operand values bound to their slots. Values broadcast
//! pairwise per operation, so size-1 axes survive slicing and still
//! combine correctly inside a chunk.

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::dense::{broadcast_shapes, Dense, Dims};
use crate::dtype::{DType, Scalar};
use crate::errors::{BadOperandDtypeSnafu, Result};
use crate::expr::node::{BinOp, ExprNode, Func, UnOp};

/// A chunk-local operand value: a scalar (literals, zero-flagged chunks)
/// or an array slice.
#[derive(Debug, Clone)]
pub enum ChunkValue {
    Scalar(Scalar),
    Array(Arc<Dense>),
}

impl ChunkValue {
    pub fn dtype(&self) -> DType {
        match self {
            ChunkValue::Scalar(v) => v.dtype(),
            ChunkValue::Array(a) => a.dtype(),
        }
    }

    pub fn shape(&self) -> Option<&[usize]> {
        match self {
            ChunkValue::Scalar(_) => None,
            ChunkValue::Array(a) => Some(a.shape()),
        }
    }

    pub fn from_dense(d: Dense) -> ChunkValue {
        ChunkValue::Array(Arc::new(d))
    }

    /// Materialize as a full array of `shape` (scalars are spread).
    pub fn to_dense(&self, shape: &[usize]) -> Result<Dense> {
        match self {
            ChunkValue::Scalar(v) => Ok(Dense::filled(Dims::from_slice(shape), *v)),
            ChunkValue::Array(a) => a.broadcast_to(shape),
        }
    }
}

impl From<Scalar> for ChunkValue {
    fn from(v: Scalar) -> Self {
        ChunkValue::Scalar(v)
    }
}

/// Evaluate a formula over the bound operand values.
pub fn eval_node(node: &ExprNode, bindings: &[ChunkValue]) -> Result<ChunkValue> {
    match node {
        ExprNode::Literal(v) => Ok(ChunkValue::Scalar(*v)),
        ExprNode::OperandRef(slot) => Ok(bindings[*slot].clone()),
        ExprNode::Unary { op, operand } => {
            let v = eval_node(operand, bindings)?;
            apply_unary(*op, &v)
        }
        ExprNode::Binary { op, lhs, rhs } => {
            let a = eval_node(lhs, bindings)?;
            let b = eval_node(rhs, bindings)?;
            apply_binary(*op, &a, &b)
        }
        ExprNode::Call { func, arg } => {
            let v = eval_node(arg, bindings)?;
            apply_func(*func, &v)
        }
        ExprNode::Where { cond, x, y } => {
            let c = eval_node(cond, bindings)?;
            let xv = eval_node(x, bindings)?;
            let yv = eval_node(y, bindings)?;
            apply_where(&c, &xv, &yv)
        }
    }
}

// ---------------------------------------------------------------------------
// scalar folds (also used for constant folding and dtype inference)
// ---------------------------------------------------------------------------

pub(crate) fn fold_binary(op: BinOp, a: Scalar, b: Scalar) -> Result<Scalar> {
    if op.is_logical() {
        let (x, y) = (a.as_bool(), b.as_bool());
        return Ok(Scalar::Bool(match op {
            BinOp::And => x && y,
            BinOp::Or => x || y,
            _ => x != y,
        }));
    }
    if op.is_comparison() {
        let out = match DType::promote(a.dtype(), b.dtype()) {
            DType::Float64 => compare_f64(op, a.as_f64(), b.as_f64()),
            _ => compare_i64(op, a.as_i64(), b.as_i64()),
        };
        return Ok(Scalar::Bool(out));
    }
    match arith_dtype(op, a.dtype(), b.dtype()) {
        DType::Float64 => Ok(Scalar::F64(arith_f64(op, a.as_f64(), b.as_f64()))),
        _ => arith_i64(op, a.as_i64(), b.as_i64()).map(Scalar::I64),
    }
}

pub(crate) fn fold_unary(op: UnOp, v: Scalar) -> Result<Scalar> {
    match op {
        UnOp::Neg => match v {
            Scalar::F64(x) => Ok(Scalar::F64(-x)),
            other => Ok(Scalar::I64(-other.as_i64())),
        },
        UnOp::Not => match v {
            Scalar::Bool(x) => Ok(Scalar::Bool(!x)),
            other => BadOperandDtypeSnafu {
                op: "~".to_string(),
                dtype: other.dtype().to_string(),
            }
            .fail(),
        },
    }
}

pub(crate) fn fold_func(func: Func, v: Scalar) -> Result<Scalar> {
    if func == Func::Abs {
        return Ok(match v {
            Scalar::F64(x) => Scalar::F64(x.abs()),
            other => Scalar::I64(other.as_i64().abs()),
        });
    }
    Ok(Scalar::F64(float_func(func, v.as_f64())))
}

fn float_func(func: Func, x: f64) -> f64 {
    match func {
        Func::Sin => x.sin(),
        Func::Cos => x.cos(),
        Func::Tan => x.tan(),
        Func::Asin => x.asin(),
        Func::Acos => x.acos(),
        Func::Atan => x.atan(),
        Func::Sinh => x.sinh(),
        Func::Cosh => x.cosh(),
        Func::Tanh => x.tanh(),
        Func::Exp => x.exp(),
        Func::Log => x.ln(),
        Func::Log2 => x.log2(),
        Func::Log10 => x.log10(),
        Func::Sqrt => x.sqrt(),
        Func::Abs => x.abs(),
    }
}

/// Result dtype of an arithmetic op. True division always goes through
/// floats; boolean arithmetic promotes to integers.
fn arith_dtype(op: BinOp, a: DType, b: DType) -> DType {
    if op == BinOp::Div {
        return DType::Float64;
    }
    match DType::promote(a, b) {
        DType::Bool => DType::Int64,
        other => other,
    }
}

fn arith_f64(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Pow => a.powf(b),
        _ => unreachable!("non-arithmetic op"),
    }
}

fn arith_i64(op: BinOp, a: i64, b: i64) -> Result<i64> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Pow => {
            if b < 0 {
                return BadOperandDtypeSnafu {
                    op: "** with a negative integer exponent".to_string(),
                    dtype: DType::Int64.to_string(),
                }
                .fail();
            }
            a.wrapping_pow(b.min(u32::MAX as i64) as u32)
        }
        _ => unreachable!("non-arithmetic op"),
    })
}

fn compare_f64(op: BinOp, a: f64, b: f64) -> bool {
    match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => unreachable!("non-comparison op"),
    }
}

fn compare_i64(op: BinOp, a: i64, b: i64) -> bool {
    match op {
        BinOp::Eq => a == b,
        BinOp::Ne => a != b,
        BinOp::Lt => a < b,
        BinOp::Le => a <= b,
        BinOp::Gt => a > b,
        BinOp::Ge => a >= b,
        _ => unreachable!("non-comparison op"),
    }
}

// ---------------------------------------------------------------------------
// array paths
// ---------------------------------------------------------------------------

fn apply_binary(op: BinOp, a: &ChunkValue, b: &ChunkValue) -> Result<ChunkValue> {
    match (a, b) {
        (ChunkValue::Scalar(x), ChunkValue::Scalar(y)) => {
            fold_binary(op, *x, *y).map(ChunkValue::Scalar)
        }
        _ => {
            let target = match (a.shape(), b.shape()) {
                (Some(sa), Some(sb)) => broadcast_shapes(sa, sb)?,
                (Some(sa), None) => Dims::from_slice(sa),
                (None, Some(sb)) => Dims::from_slice(sb),
                (None, None) => unreachable!("scalar pair handled above"),
            };
            let da = a.to_dense(&target)?;
            let db = b.to_dense(&target)?;
            binary_dense(op, &da, &db).map(ChunkValue::from_dense)
        }
    }
}

pub(crate) fn binary_dense(op: BinOp, a: &Dense, b: &Dense) -> Result<Dense> {
    debug_assert_eq!(a.shape(), b.shape());
    let shape = Dims::from_slice(a.shape());

    if op.is_logical() {
        let (Buffer::Bool(x), Buffer::Bool(y)) =
            (a.buffer().cast(DType::Bool), b.buffer().cast(DType::Bool))
        else {
            unreachable!("cast to bool");
        };
        let out: Vec<bool> = match op {
            BinOp::And => x.iter().zip(&y).map(|(p, q)| *p && *q).collect(),
            BinOp::Or => x.iter().zip(&y).map(|(p, q)| *p || *q).collect(),
            _ => x.iter().zip(&y).map(|(p, q)| p != q).collect(),
        };
        return Dense::new(shape, Buffer::Bool(out));
    }

    if op.is_comparison() {
        let out = match DType::promote(a.dtype(), b.dtype()) {
            DType::Float64 => {
                let (Buffer::F64(x), Buffer::F64(y)) = (
                    a.buffer().cast(DType::Float64),
                    b.buffer().cast(DType::Float64),
                ) else {
                    unreachable!("cast to f64");
                };
                x.iter().zip(&y).map(|(p, q)| compare_f64(op, *p, *q)).collect()
            }
            _ => {
                let (Buffer::I64(x), Buffer::I64(y)) = (
                    a.buffer().cast(DType::Int64),
                    b.buffer().cast(DType::Int64),
                ) else {
                    unreachable!("cast to i64");
                };
                x.iter().zip(&y).map(|(p, q)| compare_i64(op, *p, *q)).collect()
            }
        };
        return Dense::new(shape, Buffer::Bool(out));
    }

    match arith_dtype(op, a.dtype(), b.dtype()) {
        DType::Float64 => {
            let (Buffer::F64(x), Buffer::F64(y)) = (
                a.buffer().cast(DType::Float64),
                b.buffer().cast(DType::Float64),
            ) else {
                unreachable!("cast to f64");
            };
            let out: Vec<f64> = x.iter().zip(&y).map(|(p, q)| arith_f64(op, *p, *q)).collect();
            Dense::new(shape, Buffer::F64(out))
        }
        _ => {
            let (Buffer::I64(x), Buffer::I64(y)) = (
                a.buffer().cast(DType::Int64),
                b.buffer().cast(DType::Int64),
            ) else {
                unreachable!("cast to i64");
            };
            let mut out = Vec::with_capacity(x.len());
            for (p, q) in x.iter().zip(&y) {
                out.push(arith_i64(op, *p, *q)?);
            }
            Dense::new(shape, Buffer::I64(out))
        }
    }
}

fn apply_unary(op: UnOp, v: &ChunkValue) -> Result<ChunkValue> {
    match v {
        ChunkValue::Scalar(x) => fold_unary(op, *x).map(ChunkValue::Scalar),
        ChunkValue::Array(a) => {
            let out = match (op, a.dtype()) {
                (UnOp::Neg, DType::Float64) => a.map(DType::Float64, |s| Scalar::F64(-s.as_f64())),
                (UnOp::Neg, _) => a.map(DType::Int64, |s| Scalar::I64(-s.as_i64())),
                (UnOp::Not, DType::Bool) => a.map(DType::Bool, |s| Scalar::Bool(!s.as_bool())),
                (UnOp::Not, other) => {
                    return BadOperandDtypeSnafu {
                        op: "~".to_string(),
                        dtype: other.to_string(),
                    }
                    .fail()
                }
            };
            Ok(ChunkValue::from_dense(out))
        }
    }
}

fn apply_func(func: Func, v: &ChunkValue) -> Result<ChunkValue> {
    match v {
        ChunkValue::Scalar(x) => fold_func(func, *x).map(ChunkValue::Scalar),
        ChunkValue::Array(a) => {
            let out = if func == Func::Abs && a.dtype() != DType::Float64 {
                a.map(DType::Int64, |s| Scalar::I64(s.as_i64().abs()))
            } else {
                a.map(DType::Float64, |s| Scalar::F64(float_func(func, s.as_f64())))
            };
            Ok(ChunkValue::from_dense(out))
        }
    }
}

fn apply_where(cond: &ChunkValue, x: &ChunkValue, y: &ChunkValue) -> Result<ChunkValue> {
    if let (ChunkValue::Scalar(c), ChunkValue::Scalar(xv), ChunkValue::Scalar(yv)) = (cond, x, y) {
        return Ok(ChunkValue::Scalar(if c.as_bool() { *xv } else { *yv }));
    }
    let mut target = Dims::new();
    for v in [cond, x, y] {
        if let Some(s) = v.shape() {
            target = broadcast_shapes(&target, s)?;
        }
    }
    let c = cond.to_dense(&target)?.cast(DType::Bool);
    let out_dtype = DType::promote(x.dtype(), y.dtype());
    let xv = x.to_dense(&target)?.cast(out_dtype);
    let yv = y.to_dense(&target)?.cast(out_dtype);
    let mut out = Buffer::zeros(out_dtype, c.len());
    for i in 0..c.len() {
        let pick = if c.buffer().get(i).as_bool() {
            xv.buffer().get(i)
        } else {
            yv.buffer().get(i)
        };
        out.set(i, pick);
    }
    Dense::new(target, out).map(ChunkValue::from_dense)
}

/// One-branch boolean filter: the values of `x` at positions where `cond`
/// holds, flattened in row-major order.
pub(crate) fn filter_select(cond: &Dense, x: &ChunkValue) -> Result<Buffer> {
    let c = cond.cast(DType::Bool);
    let xv = x.to_dense(cond.shape())?;
    let mut out = Buffer::empty(xv.dtype());
    for i in 0..c.len() {
        if c.buffer().get(i).as_bool() {
            out.push(xv.buffer().get(i));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn arr(shape: &[usize], v: Vec<f64>) -> ChunkValue {
        ChunkValue::from_dense(Dense::from_f64(shape.to_vec(), v).unwrap())
    }

    #[test]
    fn test_broadcast_outer_sum() {
        let col = ChunkValue::from_dense(
            Dense::from_f64(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap(),
        );
        let row = ChunkValue::from_dense(
            Dense::from_f64(vec![1, 4], vec![10.0, 20.0, 30.0, 40.0]).unwrap(),
        );
        let node = ExprNode::binary(BinOp::Add, ExprNode::OperandRef(0), ExprNode::OperandRef(1));
        let out = eval_node(&node, &[col, row]).unwrap();
        let ChunkValue::Array(out) = out else { panic!("expected array") };
        assert_eq!(out.shape(), &[3, 4]);
        assert_eq!(out.get(&[0, 0]), Scalar::F64(11.0));
        assert_eq!(out.get(&[2, 3]), Scalar::F64(43.0));
    }

    #[test]
    fn test_division_promotes_ints() {
        let a = ChunkValue::from_dense(Dense::from_i64(vec![2], vec![1, 3]).unwrap());
        let node = ExprNode::binary(
            BinOp::Div,
            ExprNode::OperandRef(0),
            ExprNode::Literal(Scalar::I64(2)),
        );
        let ChunkValue::Array(out) = eval_node(&node, &[a]).unwrap() else {
            panic!("expected array")
        };
        assert_eq!(out.dtype(), DType::Float64);
        assert_relative_eq!(out.get(&[1]).as_f64(), 1.5);
    }

    #[test]
    fn test_where_selection() {
        let a = arr(&[4], vec![-1.0, 2.0, -3.0, 4.0]);
        let node = ExprNode::select(
            ExprNode::binary(
                BinOp::Gt,
                ExprNode::OperandRef(0),
                ExprNode::Literal(Scalar::F64(0.0)),
            ),
            ExprNode::OperandRef(0),
            ExprNode::Literal(Scalar::F64(0.0)),
        );
        let ChunkValue::Array(out) = eval_node(&node, &[a]).unwrap() else {
            panic!("expected array")
        };
        assert_eq!(out.buffer(), &Buffer::F64(vec![0.0, 2.0, 0.0, 4.0]));
    }

    #[test]
    fn test_scalar_only_folds() {
        let node = ExprNode::binary(
            BinOp::Mul,
            ExprNode::Literal(Scalar::I64(3)),
            ExprNode::Literal(Scalar::I64(4)),
        );
        assert!(matches!(
            eval_node(&node, &[]).unwrap(),
            ChunkValue::Scalar(Scalar::I64(12))
        ));
    }

    #[test]
    fn test_not_on_numbers_rejected() {
        let node = ExprNode::unary(UnOp::Not, ExprNode::Literal(Scalar::I64(1)));
        assert!(eval_node(&node, &[]).is_err());
    }

    #[test]
    fn test_filter_select() {
        let cond = Dense::new(
            Dims::from_slice(&[4]),
            Buffer::Bool(vec![true, false, true, false]),
        )
        .unwrap();
        let x = arr(&[4], vec![1.0, 2.0, 3.0, 4.0]);
        let out = filter_select(&cond, &x).unwrap();
        assert_eq!(out, Buffer::F64(vec![1.0, 3.0]));
    }
}
