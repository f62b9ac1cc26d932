//! Expression AST.
//!
//! Formulas are explicit trees built by the combinators; evaluation walks
//! the tree and persistence validation is a structural check (every
//! operand reference resolves, every call is whitelisted), never a
//! parse-and-scan over text.

use std::fmt::{self, Display};

use crate::dtype::Scalar;
use crate::errors::{Result, UnboundSlotSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or | BinOp::Xor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "~",
        }
    }
}

/// The function whitelist. Anything outside this set is rejected both by
/// the combinators (it cannot be constructed) and by the artifact parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log2,
    Log10,
    Sqrt,
    Abs,
}

impl Func {
    pub fn name(&self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "arcsin",
            Func::Acos => "arccos",
            Func::Atan => "arctan",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Tanh => "tanh",
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Log2 => "log2",
            Func::Log10 => "log10",
            Func::Sqrt => "sqrt",
            Func::Abs => "abs",
        }
    }

    pub fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "arcsin" => Func::Asin,
            "arccos" => Func::Acos,
            "arctan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log2" => Func::Log2,
            "log10" => Func::Log10,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            _ => return None,
        })
    }
}

/// One node of a formula. Operand references are slot indices into the
/// owning expression's operand table (rendered as `o0`, `o1`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum ExprNode {
    Literal(Scalar),
    OperandRef(usize),
    Unary {
        op: UnOp,
        operand: Box<ExprNode>,
    },
    Binary {
        op: BinOp,
        lhs: Box<ExprNode>,
        rhs: Box<ExprNode>,
    },
    Call {
        func: Func,
        arg: Box<ExprNode>,
    },
    /// Ternary selection: `where(cond, x, y)`.
    Where {
        cond: Box<ExprNode>,
        x: Box<ExprNode>,
        y: Box<ExprNode>,
    },
}

impl ExprNode {
    pub fn binary(op: BinOp, lhs: ExprNode, rhs: ExprNode) -> ExprNode {
        ExprNode::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnOp, operand: ExprNode) -> ExprNode {
        ExprNode::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(func: Func, arg: ExprNode) -> ExprNode {
        ExprNode::Call {
            func,
            arg: Box::new(arg),
        }
    }

    pub fn select(cond: ExprNode, x: ExprNode, y: ExprNode) -> ExprNode {
        ExprNode::Where {
            cond: Box::new(cond),
            x: Box::new(x),
            y: Box::new(y),
        }
    }

    /// Rewrite every operand reference through `map` (old slot -> new
    /// slot), the rebase step of expression fusion.
    pub fn rebase(&self, map: &[usize]) -> ExprNode {
        match self {
            ExprNode::Literal(v) => ExprNode::Literal(*v),
            ExprNode::OperandRef(slot) => ExprNode::OperandRef(map[*slot]),
            ExprNode::Unary { op, operand } => ExprNode::unary(*op, operand.rebase(map)),
            ExprNode::Binary { op, lhs, rhs } => {
                ExprNode::binary(*op, lhs.rebase(map), rhs.rebase(map))
            }
            ExprNode::Call { func, arg } => ExprNode::call(*func, arg.rebase(map)),
            ExprNode::Where { cond, x, y } => {
                ExprNode::select(cond.rebase(map), x.rebase(map), y.rebase(map))
            }
        }
    }

    /// Every operand slot referenced by this tree, in first-visit order.
    pub fn referenced_slots(&self) -> Vec<usize> {
        let mut out = Vec::new();
        self.visit_slots(&mut |slot| {
            if !out.contains(&slot) {
                out.push(slot);
            }
        });
        out
    }

    fn visit_slots(&self, f: &mut impl FnMut(usize)) {
        match self {
            ExprNode::Literal(_) => {}
            ExprNode::OperandRef(slot) => f(*slot),
            ExprNode::Unary { operand, .. } => operand.visit_slots(f),
            ExprNode::Binary { lhs, rhs, .. } => {
                lhs.visit_slots(f);
                rhs.visit_slots(f);
            }
            ExprNode::Call { arg, .. } => arg.visit_slots(f),
            ExprNode::Where { cond, x, y } => {
                cond.visit_slots(f);
                x.visit_slots(f);
                y.visit_slots(f);
            }
        }
    }

    /// Structural validation: every operand reference must resolve within
    /// an operand table of `slot_count` entries.
    pub fn validate_slots(&self, slot_count: usize) -> Result<()> {
        let mut bad = None;
        self.visit_slots(&mut |slot| {
            if slot >= slot_count && bad.is_none() {
                bad = Some(slot);
            }
        });
        match bad {
            Some(slot) => UnboundSlotSnafu { slot }.fail(),
            None => Ok(()),
        }
    }
}

impl Display for ExprNode {
    /// Renders the canonical formula string, e.g. `((o0 + o1) * sin(o2))`.
    /// Binary nodes are always parenthesized so the output re-parses
    /// without precedence ambiguity.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExprNode::Literal(v) => write!(f, "{v}"),
            ExprNode::OperandRef(slot) => write!(f, "o{slot}"),
            ExprNode::Unary { op, operand } => write!(f, "({}{operand})", op.symbol()),
            ExprNode::Binary { op, lhs, rhs } => {
                write!(f, "({lhs} {} {rhs})", op.symbol())
            }
            ExprNode::Call { func, arg } => write!(f, "{}({arg})", func.name()),
            ExprNode::Where { cond, x, y } => write!(f, "where({cond}, {x}, {y})"),
        }
    }
}
