//! Lazy arrays: deferred expression trees over chunked operands.
//!
//! Combining arrays with operators builds an [`Expression`] without
//! evaluating anything; every combination fuses the two sides' operand
//! tables (deduplicating shared objects) and joins their formulas.
//! Evaluation picks a strategy per call: the aligned fast path, the
//! generic broadcast path, or the reduction path.

use std::fmt;
use std::ops::{self, Range};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::dense::{Dense, Dims};
use crate::dtype::{DType, Scalar};
use crate::errors::{
    BroadcastMismatchSnafu, EngineError, FilterMaskWithReductionSnafu, MaskAlreadySetSnafu,
    OutputAlreadySetSnafu, Result,
};
use crate::eval::partition::{validate_inputs, InputLayout, IterGrid};
use crate::eval::reduce::{reduce_eval, reduced_mask, ReduceOp, ReduceSpec};
use crate::eval::{fast, normalize_item, slices, EvalOptions, EvalOutput};
use crate::expr::fuse::{intern_operand, merge_operands};
use crate::expr::node::{BinOp, ExprNode, Func, UnOp};
use crate::kernel::{self, ChunkValue};
use crate::operand::Operand;
use crate::store::ChunkedArray;

/// Anything that can appear on one side of a lazy combination.
#[derive(Clone)]
pub enum LazyInput {
    Scalar(Scalar),
    Array(Arc<Dense>),
    Chunked(Arc<ChunkedArray>),
    Lazy(LazyArray),
}

impl From<f64> for LazyInput {
    fn from(v: f64) -> Self {
        LazyInput::Scalar(Scalar::F64(v))
    }
}

impl From<i64> for LazyInput {
    fn from(v: i64) -> Self {
        LazyInput::Scalar(Scalar::I64(v))
    }
}

impl From<i32> for LazyInput {
    fn from(v: i32) -> Self {
        LazyInput::Scalar(Scalar::I64(i64::from(v)))
    }
}

impl From<bool> for LazyInput {
    fn from(v: bool) -> Self {
        LazyInput::Scalar(Scalar::Bool(v))
    }
}

impl From<Scalar> for LazyInput {
    fn from(v: Scalar) -> Self {
        LazyInput::Scalar(v)
    }
}

impl From<Arc<Dense>> for LazyInput {
    fn from(v: Arc<Dense>) -> Self {
        LazyInput::Array(v)
    }
}

impl From<Dense> for LazyInput {
    fn from(v: Dense) -> Self {
        LazyInput::Array(Arc::new(v))
    }
}

impl From<Arc<ChunkedArray>> for LazyInput {
    fn from(v: Arc<ChunkedArray>) -> Self {
        LazyInput::Chunked(v)
    }
}

impl From<&Arc<ChunkedArray>> for LazyInput {
    fn from(v: &Arc<ChunkedArray>) -> Self {
        LazyInput::Chunked(Arc::clone(v))
    }
}

impl From<LazyArray> for LazyInput {
    fn from(v: LazyArray) -> Self {
        LazyInput::Lazy(v)
    }
}

impl From<&LazyArray> for LazyInput {
    fn from(v: &LazyArray) -> Self {
        LazyInput::Lazy(v.clone())
    }
}

/// Wrap a value as a lazy array without computing anything.
pub fn lazy(input: impl Into<LazyInput>) -> LazyArray {
    match input.into() {
        LazyInput::Scalar(s) => {
            LazyArray::Expression(Expression::literal(s))
        }
        LazyInput::Array(a) => {
            LazyArray::Expression(Expression::from_operand(Operand::Array(a)))
        }
        LazyInput::Chunked(c) => {
            LazyArray::Expression(Expression::from_operand(Operand::Chunked(c)))
        }
        LazyInput::Lazy(l) => l,
    }
}

/// A mask branch value: either a concrete operand or a (mask-free)
/// expression to fuse structurally.
#[derive(Clone, Debug)]
pub(crate) enum MaskBranch {
    Value(Operand),
    Expr(Box<Expression>),
}

/// The deferred predicate mask attached by `where_` (two branches) or
/// `filter` (one branch).
#[derive(Clone, Debug)]
pub(crate) struct MaskArgs {
    pub x: MaskBranch,
    pub y: Option<MaskBranch>,
}

/// A deferred formula over a table of operands.
pub struct Expression {
    pub(crate) ast: ExprNode,
    pub(crate) operands: Vec<Operand>,
    pub(crate) mask: Option<MaskArgs>,
    pub(crate) out: Option<Arc<ChunkedArray>>,
    /// Lazily computed (shape, dtype).
    cache: RwLock<Option<(Dims, DType)>>,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("ast", &self.ast)
            .field("operands", &self.operands)
            .field("mask", &self.mask)
            .field("out", &self.out)
            .finish()
    }
}

impl Clone for Expression {
    fn clone(&self) -> Self {
        Expression {
            ast: self.ast.clone(),
            operands: self.operands.clone(),
            mask: self.mask.clone(),
            out: self.out.clone(),
            cache: RwLock::new(self.cache.read().ok().and_then(|g| g.clone())),
        }
    }
}

impl Expression {
    pub(crate) fn literal(value: Scalar) -> Expression {
        Expression {
            ast: ExprNode::Literal(value),
            operands: Vec::new(),
            mask: None,
            out: None,
            cache: RwLock::new(None),
        }
    }

    pub(crate) fn from_operand(op: Operand) -> Expression {
        match op {
            Operand::Scalar(s) => Expression::literal(s),
            other => Expression {
                ast: ExprNode::OperandRef(0),
                operands: vec![other],
                mask: None,
                out: None,
                cache: RwLock::new(None),
            },
        }
    }

    pub(crate) fn from_parts(ast: ExprNode, operands: Vec<Operand>) -> Expression {
        Expression {
            ast,
            operands,
            mask: None,
            out: None,
            cache: RwLock::new(None),
        }
    }

    /// The canonical formula text, operand slots rendered as `o0`, `o1`...
    pub fn formula(&self) -> String {
        self.ast.to_string()
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Fuse two mask-free expressions under a binary operator: merge the
    /// operand tables by identity, rebase the right formula onto the
    /// merged numbering, join the trees. Scalar-scalar combinations fold
    /// to a literal.
    pub(crate) fn combine(a: Expression, op: BinOp, b: Expression) -> Expression {
        debug_assert!(a.mask.is_none() && b.mask.is_none());
        if a.operands.is_empty() && b.operands.is_empty() {
            if let (ExprNode::Literal(x), ExprNode::Literal(y)) = (&a.ast, &b.ast) {
                if let Ok(folded) = kernel::fold_binary(op, *x, *y) {
                    return Expression::literal(folded);
                }
            }
        }
        let mut operands = a.operands;
        let map = merge_operands(&mut operands, &b.operands);
        let rhs = b.ast.rebase(&map);
        Expression::from_parts(ExprNode::binary(op, a.ast, rhs), operands)
    }

    /// Resolve a pending two-branch mask into the formula as a ternary
    /// `where` node. Branch expressions fuse structurally; branch values
    /// become operand slots (or literals).
    pub(crate) fn fold_mask(self) -> Expression {
        let Some(mask) = self.mask else { return self };
        let (x, y) = match (mask.x, mask.y) {
            (x, Some(y)) => (x, y),
            _ => panic!("a filtered expression must be evaluated, not combined"),
        };
        let mut operands = self.operands;
        let x_node = Self::branch_node(x, &mut operands);
        let y_node = Self::branch_node(y, &mut operands);
        Expression::from_parts(
            ExprNode::select(self.ast, x_node, y_node),
            operands,
        )
    }

    fn branch_node(branch: MaskBranch, operands: &mut Vec<Operand>) -> ExprNode {
        match branch {
            MaskBranch::Value(Operand::Scalar(s)) => ExprNode::Literal(s),
            MaskBranch::Value(op) => ExprNode::OperandRef(intern_operand(operands, op)),
            MaskBranch::Expr(e) => {
                debug_assert!(e.mask.is_none());
                let map = merge_operands(operands, &e.operands);
                e.ast.rebase(&map)
            }
        }
    }

    /// Split into the executable (mask-free) expression and, for a
    /// one-branch mask, the filter branch operand.
    fn prepare(&self) -> Result<(Expression, Option<Operand>)> {
        match &self.mask {
            None => Ok((self.clone(), None)),
            Some(MaskArgs { y: Some(_), .. }) => {
                let out = self.out.clone();
                let mut folded = self.clone().fold_mask();
                folded.out = out;
                Ok((folded, None))
            }
            Some(MaskArgs { x, y: None }) => {
                let filter = match x {
                    MaskBranch::Value(op) => op.clone(),
                    MaskBranch::Expr(e) => {
                        let d = e.eval(&EvalOptions::default())?.into_dense()?;
                        Operand::Array(Arc::new(d))
                    }
                };
                let mut bare = self.clone();
                bare.mask = None;
                Ok((bare, Some(filter)))
            }
        }
    }

    /// Broadcast output shape over the (mask-resolved) operand table.
    pub fn shape(&self) -> Result<Dims> {
        Ok(self.meta()?.0)
    }

    /// Result dtype, inferred by evaluating the formula on one synthetic
    /// scalar drawn from each operand.
    pub fn dtype(&self) -> Result<DType> {
        Ok(self.meta()?.1)
    }

    fn meta(&self) -> Result<(Dims, DType)> {
        if let Ok(guard) = self.cache.read() {
            if let Some(hit) = guard.as_ref() {
                return Ok(hit.clone());
            }
        }
        let (resolved, _) = self.prepare()?;
        let layout = validate_inputs(&resolved.operands, None)?;
        let probes: Vec<ChunkValue> = resolved
            .operands
            .iter()
            .map(|op| op.probe_scalar().map(ChunkValue::Scalar))
            .collect::<Result<_>>()?;
        let dtype = kernel::eval_node(&resolved.ast, &probes)?.dtype();
        let computed = (layout.shape, dtype);
        if let Ok(mut guard) = self.cache.write() {
            *guard = Some(computed.clone());
        }
        Ok(computed)
    }

    pub fn eval(&self, opts: &EvalOptions) -> Result<EvalOutput> {
        let (resolved, filter) = self.prepare()?;
        let out = resolved.out.clone();
        let layout = validate_inputs(&resolved.operands, out.as_deref())?;
        if let Some(target) = &out {
            if target.shape() != layout.shape.as_slice() {
                return BroadcastMismatchSnafu {
                    lhs: layout.shape.to_vec(),
                    rhs: target.shape().to_vec(),
                }
                .fail();
            }
        }
        let dtype = self.dtype()?;
        let use_fast = layout.fast_path
            && filter.is_none()
            && opts.item.is_none()
            && opts.chunks.is_none()
            && opts.blocks.is_none();
        debug!(formula = %resolved.formula(), fast = use_fast, "evaluating expression");
        if use_fast {
            fast::fast_eval(&resolved.ast, &resolved.operands, &layout, dtype, out, opts)
        } else {
            slices::slices_eval(
                &resolved.ast,
                &resolved.operands,
                &layout,
                dtype,
                out,
                filter.as_ref(),
                opts,
            )
        }
    }

    pub fn reduce(&self, spec: &ReduceSpec) -> Result<Dense> {
        self.reduce_with(spec, &EvalOptions::default())
    }

    pub fn reduce_with(&self, spec: &ReduceSpec, opts: &EvalOptions) -> Result<Dense> {
        let (resolved, filter) = self.prepare()?;
        if filter.is_some() {
            return FilterMaskWithReductionSnafu.fail();
        }
        let layout = validate_inputs(&resolved.operands, None)?;
        let dtype = self.dtype()?;
        match spec.op {
            ReduceOp::Mean => resolved.mean_impl(&layout, dtype, spec, opts),
            ReduceOp::Var => resolved.var_impl(&layout, dtype, spec, false, opts),
            ReduceOp::Std => resolved.var_impl(&layout, dtype, spec, true, opts),
            _ => reduce_eval(&resolved.ast, &resolved.operands, &layout, dtype, spec, opts),
        }
    }

    /// mean = sum / element count along the reduced axes.
    fn mean_impl(
        &self,
        layout: &InputLayout,
        dtype: DType,
        spec: &ReduceSpec,
        opts: &EvalOptions,
    ) -> Result<Dense> {
        let mask = reduced_mask(spec.axis.as_deref(), layout.shape.len())?;
        let count: usize = layout
            .shape
            .iter()
            .zip(mask.iter())
            .filter(|(_, &r)| r)
            .map(|(&n, _)| n)
            .product();
        let sum_spec = ReduceSpec {
            op: ReduceOp::Sum,
            axis: spec.axis.clone(),
            keepdims: spec.keepdims,
            dtype: None,
            ddof: 0,
        };
        let sums = reduce_eval(&self.ast, &self.operands, layout, dtype, &sum_spec, opts)?;
        let mean = sums.map(DType::Float64, |s| Scalar::F64(s.as_f64() / count as f64));
        Ok(match spec.dtype {
            Some(want) => mean.cast(want),
            None => mean,
        })
    }

    /// var subtracts the already-reduced mean, squares, and recurses into
    /// another mean pass; std is its square root. The Bessel `ddof`
    /// correction rescales the final values.
    fn var_impl(
        &self,
        layout: &InputLayout,
        dtype: DType,
        spec: &ReduceSpec,
        sqrt: bool,
        opts: &EvalOptions,
    ) -> Result<Dense> {
        let mask = reduced_mask(spec.axis.as_deref(), layout.shape.len())?;
        let count: usize = layout
            .shape
            .iter()
            .zip(mask.iter())
            .filter(|(_, &r)| r)
            .map(|(&n, _)| n)
            .product();

        let mean_keep_spec = ReduceSpec {
            op: ReduceOp::Mean,
            axis: spec.axis.clone(),
            keepdims: true,
            dtype: None,
            ddof: 0,
        };
        let mean = self.mean_impl(layout, dtype, &mean_keep_spec, opts)?;

        let centered = Expression::combine(
            self.clone_bare(),
            BinOp::Sub,
            Expression::from_operand(Operand::Array(Arc::new(mean))),
        );
        let squared = Expression::combine(centered.clone(), BinOp::Mul, centered);

        let var_mean_spec = ReduceSpec {
            op: ReduceOp::Mean,
            axis: spec.axis.clone(),
            keepdims: spec.keepdims,
            dtype: None,
            ddof: 0,
        };
        let sq_layout = validate_inputs(&squared.operands, None)?;
        let mut var = squared.mean_impl(&sq_layout, DType::Float64, &var_mean_spec, opts)?;

        if spec.ddof > 0 {
            let scale = count as f64 / (count as f64 - spec.ddof as f64);
            var = var.map(DType::Float64, |s| Scalar::F64(s.as_f64() * scale));
        }
        if sqrt {
            var = var.map(DType::Float64, |s| Scalar::F64(s.as_f64().sqrt()));
        }
        Ok(match spec.dtype {
            Some(want) => var.cast(want),
            None => var,
        })
    }

    fn clone_bare(&self) -> Expression {
        Expression::from_parts(self.ast.clone(), self.operands.clone())
    }
}

/// A user function evaluated one chunk at a time.
///
/// The function is called as `f(inputs, output_buffer, offset)` and
/// writes its chunk of results into `output_buffer` in place; `offset`
/// is the chunk's starting coordinate for callers that need absolute
/// position.
pub type UdfFn = dyn Fn(&[ChunkValue], &mut Dense, &[usize]) -> Result<()> + Send + Sync;

pub struct UdfArray {
    func: Arc<UdfFn>,
    inputs: Vec<Operand>,
    dtype: DType,
    /// Lazily built full materialization, used only for slice access.
    preview: RwLock<Option<Arc<Dense>>>,
}

impl fmt::Debug for UdfArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdfArray")
            .field("inputs", &self.inputs)
            .field("dtype", &self.dtype)
            .finish_non_exhaustive()
    }
}

impl Clone for UdfArray {
    fn clone(&self) -> Self {
        UdfArray {
            func: Arc::clone(&self.func),
            inputs: self.inputs.clone(),
            dtype: self.dtype,
            preview: RwLock::new(self.preview.read().ok().and_then(|g| g.clone())),
        }
    }
}

impl UdfArray {
    pub fn shape(&self) -> Result<Dims> {
        Ok(validate_inputs(&self.inputs, None)?.shape)
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    fn eval(&self, opts: &EvalOptions) -> Result<EvalOutput> {
        let layout = validate_inputs(&self.inputs, None)?;
        let shape = layout.shape.clone();
        let grid = IterGrid::new(&shape, layout.chunk_shape.as_deref());
        let item = match &opts.item {
            Some(region) => Some(normalize_item(region, &shape)?),
            None => None,
        };
        let aligned = layout.fast_path;
        let mut out = Dense::zeros(shape.clone(), self.dtype);
        for index in 0..grid.chunk_count() {
            let chunk_region = grid.chunk_region(index);
            let region = match &item {
                Some(want) => match crate::dense::intersect_regions(&chunk_region, want) {
                    Some(r) => r,
                    None => continue,
                },
                None => chunk_region,
            };
            let bindings = if aligned && item.is_none() {
                fast::gather_aligned(&self.inputs, index, &region, None)?
            } else {
                slices::gather_projected(&self.inputs, &shape, &region)?
            };
            let mut chunk_out =
                Dense::zeros(crate::dense::region_shape(&region), self.dtype);
            let offset: Vec<usize> = region.iter().map(|r| r.start).collect();
            (self.func)(&bindings, &mut chunk_out, &offset)?;
            out.write_region(&region, &chunk_out)?;
        }
        match item {
            Some(want) => Ok(EvalOutput::Dense(out.read_region(&want)?)),
            None => Ok(EvalOutput::Dense(out)),
        }
    }

    /// Slice access goes through the cached full materialization.
    fn getitem(&self, region: &[Range<usize>]) -> Result<Dense> {
        if let Ok(guard) = self.preview.read() {
            if let Some(hit) = guard.as_ref() {
                let want = normalize_item(region, hit.shape())?;
                return hit.read_region(&want);
            }
        }
        let full = Arc::new(self.eval(&EvalOptions::default())?.into_dense()?);
        if let Ok(mut guard) = self.preview.write() {
            *guard = Some(Arc::clone(&full));
        }
        let want = normalize_item(region, full.shape())?;
        full.read_region(&want)
    }
}

/// A lazy array: either a fused expression tree or a user-defined
/// function over chunked inputs.
#[derive(Clone)]
pub enum LazyArray {
    Expression(Expression),
    Udf(UdfArray),
}

impl fmt::Debug for LazyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyArray::Expression(e) => f.debug_tuple("Expression").field(e).finish(),
            LazyArray::Udf(u) => f.debug_tuple("Udf").field(u).finish(),
        }
    }
}

impl LazyArray {
    /// Wrap a user function over the given inputs.
    pub fn udf(
        func: impl Fn(&[ChunkValue], &mut Dense, &[usize]) -> Result<()> + Send + Sync + 'static,
        inputs: Vec<LazyInput>,
        dtype: DType,
    ) -> LazyArray {
        let inputs = inputs
            .into_iter()
            .map(|input| match input {
                LazyInput::Scalar(s) => Operand::Scalar(s),
                LazyInput::Array(a) => Operand::Array(a),
                LazyInput::Chunked(c) => Operand::Chunked(c),
                LazyInput::Lazy(_) => {
                    panic!("lazy inputs to a user function must be evaluated first")
                }
            })
            .collect();
        LazyArray::Udf(UdfArray {
            func: Arc::new(func),
            inputs,
            dtype,
            preview: RwLock::new(None),
        })
    }

    pub fn shape(&self) -> Result<Dims> {
        match self {
            LazyArray::Expression(e) => e.shape(),
            LazyArray::Udf(u) => u.shape(),
        }
    }

    pub fn dtype(&self) -> Result<DType> {
        match self {
            LazyArray::Expression(e) => e.dtype(),
            LazyArray::Udf(u) => Ok(u.dtype()),
        }
    }

    pub fn as_expression(&self) -> Option<&Expression> {
        match self {
            LazyArray::Expression(e) => Some(e),
            LazyArray::Udf(_) => None,
        }
    }

    /// Evaluate fully (or into the attached output target).
    pub fn eval(&self) -> Result<EvalOutput> {
        self.eval_with(&EvalOptions::default())
    }

    pub fn eval_with(&self, opts: &EvalOptions) -> Result<EvalOutput> {
        match self {
            LazyArray::Expression(e) => e.eval(opts),
            LazyArray::Udf(u) => u.eval(opts),
        }
    }

    /// In-memory slice access; equivalent to `eval` restricted to the
    /// region.
    pub fn getitem(&self, region: &[Range<usize>]) -> Result<Dense> {
        match self {
            LazyArray::Expression(e) => {
                e.eval(&EvalOptions::item(region.to_vec()))?.into_dense()
            }
            LazyArray::Udf(u) => u.getitem(region),
        }
    }

    /// Attach the chunked array to write results into. Set once, before
    /// evaluation.
    pub fn with_out(self, out: Arc<ChunkedArray>) -> Result<LazyArray> {
        match self {
            LazyArray::Expression(mut e) => {
                if e.out.is_some() {
                    return OutputAlreadySetSnafu.fail();
                }
                e.out = Some(out);
                Ok(LazyArray::Expression(e))
            }
            LazyArray::Udf(_) => Err(EngineError::not_implemented(
                "output targets for user-defined functions",
            )),
        }
    }

    /// Attach a two-branch predicate mask: where this (boolean)
    /// expression holds, take `x`, else `y`. A branch that is itself an
    /// unresolved predicate expression is forced to evaluate first, so
    /// fusion only ever merges plain expressions.
    pub fn where_(
        self,
        x: impl Into<LazyInput>,
        y: impl Into<LazyInput>,
    ) -> Result<LazyArray> {
        let x = Self::mask_branch(x.into())?;
        let y = Self::mask_branch(y.into())?;
        self.attach_mask(MaskArgs { x, y: Some(y) })
    }

    /// Attach a one-branch filter mask: the elements of `x` where this
    /// (boolean) expression holds, as a flat 1-D result.
    pub fn filter(self, x: impl Into<LazyInput>) -> Result<LazyArray> {
        let x = Self::mask_branch(x.into())?;
        self.attach_mask(MaskArgs { x, y: None })
    }

    fn attach_mask(self, mask: MaskArgs) -> Result<LazyArray> {
        match self {
            LazyArray::Expression(mut e) => {
                if e.mask.is_some() {
                    return MaskAlreadySetSnafu.fail();
                }
                e.mask = Some(mask);
                e.cache = RwLock::new(None);
                Ok(LazyArray::Expression(e))
            }
            LazyArray::Udf(_) => Err(EngineError::not_implemented(
                "predicate masks over user-defined functions",
            )),
        }
    }

    fn mask_branch(input: LazyInput) -> Result<MaskBranch> {
        Ok(match input {
            LazyInput::Scalar(s) => MaskBranch::Value(Operand::Scalar(s)),
            LazyInput::Array(a) => MaskBranch::Value(Operand::Array(a)),
            LazyInput::Chunked(c) => MaskBranch::Value(Operand::Chunked(c)),
            LazyInput::Lazy(LazyArray::Expression(e)) => {
                if e.mask.is_some() {
                    // Unresolved predicate branch: evaluate it now.
                    let d = e.eval(&EvalOptions::default())?.into_dense()?;
                    MaskBranch::Value(Operand::Array(Arc::new(d)))
                } else {
                    MaskBranch::Expr(Box::new(e))
                }
            }
            LazyInput::Lazy(LazyArray::Udf(u)) => {
                let d = u.eval(&EvalOptions::default())?.into_dense()?;
                MaskBranch::Value(Operand::Array(Arc::new(d)))
            }
        })
    }

    // -- combinators --------------------------------------------------

    /// The mask-resolved expression this array contributes to a fusion.
    ///
    /// Panics on a filtered expression or a user-defined function: both
    /// must be evaluated before further combination (misuse, not data).
    fn fusion_expression(&self) -> Expression {
        match self {
            LazyArray::Expression(e) => match &e.mask {
                Some(MaskArgs { y: None, .. }) => {
                    panic!("a filtered expression must be evaluated, not combined")
                }
                Some(_) => e.clone().fold_mask(),
                None => e.clone(),
            },
            LazyArray::Udf(_) => {
                panic!("a user-defined function must be evaluated, not combined")
            }
        }
    }

    fn input_expression(input: LazyInput) -> Expression {
        match input {
            LazyInput::Scalar(s) => Expression::literal(s),
            LazyInput::Array(a) => Expression::from_operand(Operand::Array(a)),
            LazyInput::Chunked(c) => Expression::from_operand(Operand::Chunked(c)),
            LazyInput::Lazy(l) => l.fusion_expression(),
        }
    }

    pub(crate) fn binary(&self, op: BinOp, rhs: LazyInput) -> LazyArray {
        let lhs = self.fusion_expression();
        let rhs = Self::input_expression(rhs);
        LazyArray::Expression(Expression::combine(lhs, op, rhs))
    }

    fn binary_rev(lhs: LazyInput, op: BinOp, rhs: &LazyArray) -> LazyArray {
        let lhs = Self::input_expression(lhs);
        let rhs = rhs.fusion_expression();
        LazyArray::Expression(Expression::combine(lhs, op, rhs))
    }

    fn unary(&self, op: UnOp) -> LazyArray {
        let e = self.fusion_expression();
        LazyArray::Expression(Expression::from_parts(
            ExprNode::unary(op, e.ast),
            e.operands,
        ))
    }

    fn func(&self, func: Func) -> LazyArray {
        let e = self.fusion_expression();
        LazyArray::Expression(Expression::from_parts(
            ExprNode::call(func, e.ast),
            e.operands,
        ))
    }

    pub fn pow(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Pow, rhs.into())
    }

    pub fn lt(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Lt, rhs.into())
    }

    pub fn le(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Le, rhs.into())
    }

    pub fn gt(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Gt, rhs.into())
    }

    pub fn ge(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Ge, rhs.into())
    }

    pub fn eq(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Eq, rhs.into())
    }

    pub fn ne(&self, rhs: impl Into<LazyInput>) -> LazyArray {
        self.binary(BinOp::Ne, rhs.into())
    }

    pub fn sin(&self) -> LazyArray {
        self.func(Func::Sin)
    }

    pub fn cos(&self) -> LazyArray {
        self.func(Func::Cos)
    }

    pub fn tan(&self) -> LazyArray {
        self.func(Func::Tan)
    }

    pub fn arcsin(&self) -> LazyArray {
        self.func(Func::Asin)
    }

    pub fn arccos(&self) -> LazyArray {
        self.func(Func::Acos)
    }

    pub fn arctan(&self) -> LazyArray {
        self.func(Func::Atan)
    }

    pub fn sinh(&self) -> LazyArray {
        self.func(Func::Sinh)
    }

    pub fn cosh(&self) -> LazyArray {
        self.func(Func::Cosh)
    }

    pub fn tanh(&self) -> LazyArray {
        self.func(Func::Tanh)
    }

    pub fn exp(&self) -> LazyArray {
        self.func(Func::Exp)
    }

    pub fn log(&self) -> LazyArray {
        self.func(Func::Log)
    }

    pub fn log2(&self) -> LazyArray {
        self.func(Func::Log2)
    }

    pub fn log10(&self) -> LazyArray {
        self.func(Func::Log10)
    }

    pub fn sqrt(&self) -> LazyArray {
        self.func(Func::Sqrt)
    }

    pub fn abs(&self) -> LazyArray {
        self.func(Func::Abs)
    }

    // -- reductions ---------------------------------------------------

    pub fn reduce(&self, spec: &ReduceSpec) -> Result<Dense> {
        match self {
            LazyArray::Expression(e) => e.reduce(spec),
            LazyArray::Udf(u) => {
                // User functions reduce through their materialization.
                let d = u.eval(&EvalOptions::default())?.into_dense()?;
                let e = Expression::from_operand(Operand::Array(Arc::new(d)));
                e.reduce(spec)
            }
        }
    }

    pub fn sum(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Sum))
    }

    pub fn prod(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Prod))
    }

    pub fn min(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Min))
    }

    pub fn max(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Max))
    }

    pub fn mean(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Mean))
    }

    pub fn var(&self, ddof: usize) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Var).ddof(ddof))
    }

    pub fn std(&self, ddof: usize) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Std).ddof(ddof))
    }

    pub fn any(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::Any))
    }

    pub fn all(&self) -> Result<Dense> {
        self.reduce(&ReduceSpec::new(ReduceOp::All))
    }
}

macro_rules! lazy_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<LazyInput>> ops::$trait<T> for &LazyArray {
            type Output = LazyArray;
            fn $method(self, rhs: T) -> LazyArray {
                self.binary($op, rhs.into())
            }
        }

        impl<T: Into<LazyInput>> ops::$trait<T> for LazyArray {
            type Output = LazyArray;
            fn $method(self, rhs: T) -> LazyArray {
                self.binary($op, rhs.into())
            }
        }

        impl ops::$trait<&LazyArray> for f64 {
            type Output = LazyArray;
            fn $method(self, rhs: &LazyArray) -> LazyArray {
                LazyArray::binary_rev(LazyInput::from(self), $op, rhs)
            }
        }

        impl ops::$trait<&LazyArray> for i64 {
            type Output = LazyArray;
            fn $method(self, rhs: &LazyArray) -> LazyArray {
                LazyArray::binary_rev(LazyInput::from(self), $op, rhs)
            }
        }
    };
}

lazy_binop!(Add, add, BinOp::Add);
lazy_binop!(Sub, sub, BinOp::Sub);
lazy_binop!(Mul, mul, BinOp::Mul);
lazy_binop!(Div, div, BinOp::Div);
lazy_binop!(BitAnd, bitand, BinOp::And);
lazy_binop!(BitOr, bitor, BinOp::Or);
lazy_binop!(BitXor, bitxor, BinOp::Xor);

impl ops::Neg for &LazyArray {
    type Output = LazyArray;
    fn neg(self) -> LazyArray {
        self.unary(UnOp::Neg)
    }
}

impl ops::Neg for LazyArray {
    type Output = LazyArray;
    fn neg(self) -> LazyArray {
        self.unary(UnOp::Neg)
    }
}

impl ops::Not for &LazyArray {
    type Output = LazyArray;
    fn not(self) -> LazyArray {
        self.unary(UnOp::Not)
    }
}

impl ops::Not for LazyArray {
    type Output = LazyArray;
    fn not(self) -> LazyArray {
        self.unary(UnOp::Not)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkMeta;
    use approx::assert_relative_eq;

    fn ramp(shape: &[usize], scale: f64) -> Dense {
        let n: usize = shape.iter().product();
        Dense::from_f64(
            shape.to_vec(),
            (0..n).map(|i| i as f64 * scale - 3.0).collect(),
        )
        .unwrap()
    }

    fn chunked(src: &Dense, chunks: &[usize]) -> Arc<ChunkedArray> {
        ChunkedArray::from_dense(src, Some(chunks.to_vec()), None).unwrap()
    }

    #[test]
    fn test_fast_and_slow_paths_agree() {
        let da = ramp(&[8, 8], 0.5);
        let db = ramp(&[8, 8], 1.25);

        // Aligned partitions: fast path.
        let aligned = lazy(&chunked(&da, &[4, 4])) + lazy(&chunked(&db, &[4, 4]));
        // Misaligned partitions: same formula through the generic path.
        let misaligned = lazy(&chunked(&da, &[4, 4])) + lazy(&chunked(&db, &[2, 8]));

        let fast = aligned.eval().unwrap().into_dense().unwrap();
        let slow = misaligned.eval().unwrap().into_dense().unwrap();
        assert_eq!(fast.shape(), &[8, 8]);
        assert_eq!(fast, slow);
        for (i, j) in [(0, 0), (3, 7), (7, 3)] {
            assert_relative_eq!(
                fast.get(&[i, j]).as_f64(),
                da.get(&[i, j]).as_f64() + db.get(&[i, j]).as_f64()
            );
        }
    }

    #[test]
    fn test_broadcast_outer_sum() {
        let col = Dense::from_f64(vec![3, 1], vec![1.0, 2.0, 3.0]).unwrap();
        let row = Dense::from_f64(vec![1, 4], vec![10.0, 20.0, 30.0, 40.0]).unwrap();
        let expr = lazy(col.clone()) + row.clone();
        let out = expr.eval().unwrap().into_dense().unwrap();
        assert_eq!(out.shape(), &[3, 4]);
        for i in 0..3 {
            for j in 0..4 {
                assert_relative_eq!(
                    out.get(&[i, j]).as_f64(),
                    col.get(&[i, 0]).as_f64() + row.get(&[0, j]).as_f64()
                );
            }
        }
    }

    #[test]
    fn test_fusion_is_transparent_and_dedups() {
        let a = chunked(&ramp(&[6, 6], 0.5), &[3, 3]);
        let b = chunked(&ramp(&[6, 6], 0.75), &[3, 3]);
        let c = chunked(&ramp(&[6, 6], 1.5), &[3, 3]);
        let d = chunked(&ramp(&[6, 6], 2.5), &[3, 3]);

        let fused = (lazy(&a) + lazy(&b)) * (lazy(&c) - lazy(&d));
        let expr = fused.as_expression().unwrap();
        // Four distinct operands even though each side carried two.
        assert_eq!(expr.operand_count(), 4);

        let left = (lazy(&a) + lazy(&b)).eval().unwrap().into_dense().unwrap();
        let right = (lazy(&c) - lazy(&d)).eval().unwrap().into_dense().unwrap();
        let fused_out = fused.eval().unwrap().into_dense().unwrap();
        for (i, j) in [(0, 0), (2, 5), (5, 2), (5, 5)] {
            assert_relative_eq!(
                fused_out.get(&[i, j]).as_f64(),
                left.get(&[i, j]).as_f64() * right.get(&[i, j]).as_f64()
            );
        }

        // A shared underlying object collapses to one slot.
        let shared = (lazy(&a) + 1.0) * (lazy(&a) - 1.0);
        assert_eq!(shared.as_expression().unwrap().operand_count(), 1);
    }

    #[test]
    fn test_same_object_both_sides_single_slot() {
        let a = chunked(&ramp(&[4], 1.0), &[2]);
        let expr = lazy(&a) * lazy(&a);
        assert_eq!(expr.as_expression().unwrap().operand_count(), 1);
        assert_eq!(
            expr.as_expression().unwrap().formula(),
            "(o0 * o0)"
        );
    }

    #[test]
    fn test_scalar_scalar_folds_to_literal() {
        let a = chunked(&ramp(&[4], 1.0), &[2]);
        let expr = lazy(3.0) * 2.0 + lazy(&a);
        let e = expr.as_expression().unwrap();
        assert_eq!(e.formula(), "(6.0 + o0)");
        assert_eq!(e.operand_count(), 1);
    }

    #[test]
    fn test_getitem_matches_partial_eval() {
        let da = ramp(&[9, 7], 0.5);
        let db = ramp(&[9, 7], 0.2);
        let expr = lazy(&chunked(&da, &[4, 3])) * 2.0 + lazy(&chunked(&db, &[4, 3]));

        let full = expr.eval().unwrap().into_dense().unwrap();
        let region = vec![2..7, 1..6];
        let by_item = expr
            .eval_with(&EvalOptions::item(region.clone()))
            .unwrap()
            .into_dense()
            .unwrap();
        let by_getitem = expr.getitem(&region).unwrap();
        assert_eq!(by_item.shape(), &[5, 5]);
        assert_eq!(by_item, by_getitem);
        assert_eq!(
            by_item,
            full.read_region(&crate::dense::Region::from_vec(region)).unwrap()
        );
    }

    #[test]
    fn test_misaligned_disk_scenario() {
        // Same-shape operands with misaligned chunk grids must take the
        // generic path and still match the direct computation.
        let tmp = tempfile::tempdir().unwrap();
        let da = ramp(&[60, 60], 0.37);
        let db = ramp(&[60, 60], 1.11);
        let a = ChunkedArray::to_disk(tmp.path().join("a"), &da, Some(vec![10, 10]), None)
            .unwrap();
        let b = ChunkedArray::to_disk(tmp.path().join("b"), &db, Some(vec![5, 20]), None)
            .unwrap();

        let expr = lazy(&a) + 2.0 * &lazy(&b);
        let layout = validate_inputs(
            &expr.as_expression().unwrap().operands,
            None,
        )
        .unwrap();
        assert!(!layout.fast_path);

        let out = expr.eval().unwrap().into_dense().unwrap();
        assert_eq!(out.shape(), &[60, 60]);
        for (i, j) in [(0, 0), (9, 10), (13, 57), (59, 59)] {
            assert_relative_eq!(
                out.get(&[i, j]).as_f64(),
                da.get(&[i, j]).as_f64() + 2.0 * db.get(&[i, j]).as_f64()
            );
        }
    }

    #[test]
    fn test_zero_array_sum_never_decompresses() {
        let tmp = tempfile::tempdir().unwrap();
        let meta =
            ChunkMeta::new(vec![40, 40], vec![10, 10], vec![10, 10], DType::Float64).unwrap();
        let store = crate::store::DiskStore::create(tmp.path().join("c"), meta).unwrap();
        let c = ChunkedArray::new(Arc::new(store));

        let total = lazy(&c).sum().unwrap();
        assert_eq!(total.item(), Some(Scalar::F64(0.0)));
        assert_eq!(c.decompression_count(), 0);
    }

    #[test]
    fn test_disk_pipeline_matches_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let da = ramp(&[12, 12], 0.3);
        let db = ramp(&[12, 12], 0.7);
        let a = ChunkedArray::to_disk(tmp.path().join("a"), &da, Some(vec![4, 4]), None)
            .unwrap();
        let b = ChunkedArray::to_disk(tmp.path().join("b"), &db, Some(vec![4, 4]), None)
            .unwrap();

        let expr = lazy(&a) * lazy(&b) + 1.0;
        let from_disk = expr.eval().unwrap().into_dense().unwrap();
        let low_mem = expr
            .eval_with(&EvalOptions {
                low_mem: true,
                ..EvalOptions::default()
            })
            .unwrap()
            .into_dense()
            .unwrap();
        assert_eq!(from_disk, low_mem);

        let in_mem = (lazy(da.clone()) * db.clone() + 1.0)
            .eval()
            .unwrap()
            .into_dense()
            .unwrap();
        assert_eq!(from_disk, in_mem);
    }

    #[test]
    fn test_reduction_identities() {
        let da = ramp(&[6, 5], 0.5);
        let expr = lazy(&chunked(&da, &[2, 5])) * 2.0;
        let full = expr.eval().unwrap().into_dense().unwrap();

        let direct: f64 = (0..full.len()).map(|i| full.buffer().get(i).as_f64()).sum();
        let total = expr.sum().unwrap();
        assert_relative_eq!(total.item().unwrap().as_f64(), direct, epsilon = 1e-9);

        // Axis reduction with keepdims.
        let by_rows = expr
            .reduce(&ReduceSpec::new(ReduceOp::Sum).along(vec![1]).keepdims(true))
            .unwrap();
        assert_eq!(by_rows.shape(), &[6, 1]);
        for i in 0..6 {
            let want: f64 = (0..5).map(|j| full.get(&[i, j]).as_f64()).sum();
            assert_relative_eq!(by_rows.get(&[i, 0]).as_f64(), want, epsilon = 1e-9);
        }

        let dropped = expr
            .reduce(&ReduceSpec::new(ReduceOp::Sum).along(vec![1]))
            .unwrap();
        assert_eq!(dropped.shape(), &[6]);

        let minimum = expr.min().unwrap().item().unwrap().as_f64();
        let maximum = expr.max().unwrap().item().unwrap().as_f64();
        let by_hand_min = (0..full.len())
            .map(|i| full.buffer().get(i).as_f64())
            .fold(f64::INFINITY, f64::min);
        let by_hand_max = (0..full.len())
            .map(|i| full.buffer().get(i).as_f64())
            .fold(f64::NEG_INFINITY, f64::max);
        assert_relative_eq!(minimum, by_hand_min);
        assert_relative_eq!(maximum, by_hand_max);
    }

    #[test]
    fn test_mean_var_std_against_direct() {
        let da = ramp(&[8, 4], 0.9);
        let expr = lazy(&chunked(&da, &[4, 4])) + 0.5;
        let full = expr.eval().unwrap().into_dense().unwrap();
        let values: Vec<f64> = (0..full.len()).map(|i| full.buffer().get(i).as_f64()).collect();
        let n = values.len() as f64;
        let mean: f64 = values.iter().sum::<f64>() / n;
        let var: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let var1: f64 = var * n / (n - 1.0);

        assert_relative_eq!(
            expr.mean().unwrap().item().unwrap().as_f64(),
            mean,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            expr.var(0).unwrap().item().unwrap().as_f64(),
            var,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            expr.var(1).unwrap().item().unwrap().as_f64(),
            var1,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            expr.std(0).unwrap().item().unwrap().as_f64(),
            var.sqrt(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_any_all_and_bool_sum() {
        let d = Dense::from_i64(vec![4], vec![0, 3, 0, 1]).unwrap();
        let expr = lazy(&chunked(&d, &[2])).gt(0);
        assert_eq!(expr.any().unwrap().item(), Some(Scalar::Bool(true)));
        assert_eq!(expr.all().unwrap().item(), Some(Scalar::Bool(false)));
        // Sum of booleans counts matches.
        assert_eq!(expr.sum().unwrap().item(), Some(Scalar::I64(2)));
    }

    #[test]
    fn test_where_mask_two_branches() {
        let da = ramp(&[3, 4], 1.0);
        let cond = lazy(&chunked(&da, &[3, 2])).gt(0.0);
        let masked = cond.where_(da.clone(), 0.0).unwrap();
        let out = masked.eval().unwrap().into_dense().unwrap();
        for i in 0..3 {
            for j in 0..4 {
                let v = da.get(&[i, j]).as_f64();
                let want = if v > 0.0 { v } else { 0.0 };
                assert_relative_eq!(out.get(&[i, j]).as_f64(), want);
            }
        }
    }

    #[test]
    fn test_filter_mask_returns_flat_matches() {
        let da = ramp(&[3, 4], 1.0);
        let arr = chunked(&da, &[2, 2]);
        let filtered = lazy(&arr).gt(0.0).filter(&arr).unwrap();
        let EvalOutput::Flat(values) = filtered.eval().unwrap() else {
            panic!("expected flat output");
        };
        let mut expected = 0;
        for i in 0..da.len() {
            if da.buffer().get(i).as_f64() > 0.0 {
                expected += 1;
            }
        }
        assert_eq!(values.len(), expected);
        // Every selected value satisfies the predicate.
        for i in 0..values.len() {
            assert!(values.get(i).as_f64() > 0.0);
        }
    }

    #[test]
    fn test_filter_mask_refuses_reduction() {
        let da = ramp(&[4], 1.0);
        let arr = chunked(&da, &[2]);
        let filtered = lazy(&arr).gt(0.0).filter(&arr).unwrap();
        assert!(matches!(
            filtered.sum().unwrap_err(),
            EngineError::FilterMaskWithReduction
        ));
    }

    #[test]
    fn test_validation_errors() {
        // Broadcast-incompatible shapes are rejected before any chunk IO.
        let a = lazy(ramp(&[3, 2], 1.0));
        let b = lazy(ramp(&[1, 4], 1.0));
        assert!(matches!(
            (a + b).eval().unwrap_err(),
            EngineError::BroadcastMismatch { .. }
        ));

        // Reduction axis out of range.
        let expr = lazy(ramp(&[4, 4], 1.0)) + 1.0;
        assert!(matches!(
            expr.reduce(&ReduceSpec::new(ReduceOp::Sum).along(vec![2]))
                .unwrap_err(),
            EngineError::InvalidAxis { axis: 2, ndim: 2 }
        ));

        // min/max over zero elements has no identity.
        let empty = lazy(Dense::zeros(vec![0], DType::Float64)) + 1.0;
        assert!(matches!(
            empty.min().unwrap_err(),
            EngineError::EmptyReduction { .. }
        ));
        // sum over zero elements returns its seed.
        assert_eq!(empty.sum().unwrap().item(), Some(Scalar::F64(0.0)));

        // Pure-literal expressions have no operands to evaluate over.
        assert!(matches!(
            lazy(5.0).eval().unwrap_err(),
            EngineError::EmptyOperands
        ));
    }

    #[test]
    fn test_eval_into_chunked_output() {
        let da = ramp(&[8, 8], 0.5);
        let a = chunked(&da, &[4, 4]);
        let out = ChunkedArray::new(Arc::new(
            MemStoreForOut::build(&[8, 8], &[4, 4]),
        ));
        let expr = (lazy(&a) * 3.0).with_out(out.clone()).unwrap();
        let result = expr.eval().unwrap();
        assert!(result.as_stored().is_some());
        let stored = out.to_dense().unwrap();
        for (i, j) in [(0, 0), (4, 7), (7, 7)] {
            assert_relative_eq!(
                stored.get(&[i, j]).as_f64(),
                da.get(&[i, j]).as_f64() * 3.0
            );
        }
    }

    struct MemStoreForOut;

    impl MemStoreForOut {
        fn build(shape: &[usize], chunks: &[usize]) -> crate::store::MemStore {
            let meta = ChunkMeta::new(
                shape.to_vec(),
                chunks.to_vec(),
                chunks.to_vec(),
                DType::Float64,
            )
            .unwrap();
            crate::store::MemStore::empty(meta).unwrap()
        }
    }

    #[test]
    fn test_udf_receives_offsets() {
        let da = ramp(&[4, 4], 1.0);
        let a = chunked(&da, &[2, 2]);
        // Writes input + absolute row coordinate into the output.
        let udf = LazyArray::udf(
            |inputs, out, offset| {
                let input = inputs[0].to_dense(out.shape())?;
                let rows = out.shape()[0];
                let cols = out.shape()[1];
                for r in 0..rows {
                    for c in 0..cols {
                        let v = input.get(&[r, c]).as_f64() + (offset[0] + r) as f64;
                        out.buffer_mut().set(r * cols + c, Scalar::F64(v));
                    }
                }
                Ok(())
            },
            vec![LazyInput::from(&a)],
            DType::Float64,
        );
        let out = udf.eval().unwrap().into_dense().unwrap();
        for i in 0..4 {
            for j in 0..4 {
                assert_relative_eq!(
                    out.get(&[i, j]).as_f64(),
                    da.get(&[i, j]).as_f64() + i as f64
                );
            }
        }
        // Slice access goes through the cached preview.
        let slice = udf.getitem(&[1..3, 0..2]).unwrap();
        assert_eq!(slice.shape(), &[2, 2]);
        assert_relative_eq!(slice.get(&[0, 0]).as_f64(), out.get(&[1, 0]).as_f64());
    }

    #[test]
    fn test_math_functions_route_through_fusion() {
        let da = ramp(&[4], 0.25);
        let expr = lazy(&chunked(&da, &[2])).sin() + 1.0;
        let out = expr.eval().unwrap().into_dense().unwrap();
        for i in 0..4 {
            assert_relative_eq!(
                out.get(&[i]).as_f64(),
                da.get(&[i]).as_f64().sin() + 1.0
            );
        }
        assert_eq!(
            expr.as_expression().unwrap().formula(),
            "(sin(o0) + 1.0)"
        );
    }

    #[test]
    fn test_dtype_inference_from_probes() {
        let ints = lazy(Dense::from_i64(vec![4], vec![1, 2, 3, 4]).unwrap());
        assert_eq!((ints.clone() + 1).dtype().unwrap(), DType::Int64);
        assert_eq!((ints.clone() + 1.0).dtype().unwrap(), DType::Float64);
        assert_eq!((ints.clone() / 2).dtype().unwrap(), DType::Float64);
        assert_eq!(ints.gt(2).dtype().unwrap(), DType::Bool);
    }
}
