//! Symbolic expression algebra over numbers, booleans, strings and tensor shapes.
//!
//! Constructors here are pure: they assemble nodes and record an optional
//! source span, but they never simplify. Structural simplification lives in
//! `simplify.rs` and is driven by the constraint set.

use std::{
    fmt::{self, Write},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::parse::CodeRange;

/// Stable identifier of a symbolic variable.
///
/// Ids are assigned monotonically by a [`SymGen`] and are never reused within
/// an analysis session, so constraint stores and solver queries can key on
/// them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct SymId(u32);

impl SymId {
    #[must_use]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SymId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.0)
    }
}

/// Sort of a symbolic variable, used for diagnostics and for picking the
/// fresh-value sort when a handler degrades to `Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SymSort {
    Num,
    Bool,
    Str,
    Shape,
}

/// A named symbolic variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Symbol {
    pub id: SymId,
    pub sort: SymSort,
    /// Human-readable name used in diagnostics (e.g. `N`, `arg_lr`).
    pub name: String,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'{}", self.name, self.id.index())
    }
}

/// Session-scoped symbol id generator.
///
/// Shared across every forked path of one analysis via `Arc`, so two paths
/// never mint the same id. Atomic because the counter would otherwise need a
/// lock if path exploration is ever parallelized.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SymGen {
    #[serde(skip)]
    next: Arc<AtomicU32>,
}

impl SymGen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self, sort: SymSort, name: impl Into<String>) -> Symbol {
        let id = SymId(self.next.fetch_add(1, Ordering::Relaxed));
        Symbol {
            id,
            sort,
            name: name.into(),
        }
    }

    /// Fresh numeric symbol wrapped as an expression.
    pub fn fresh_num(&self, name: impl Into<String>, span: Option<CodeRange>) -> NumExp {
        NumExp::symbol(self.fresh(SymSort::Num, name), span)
    }

    pub fn fresh_bool(&self, name: impl Into<String>, span: Option<CodeRange>) -> BoolExp {
        BoolExp::symbol(self.fresh(SymSort::Bool, name), span)
    }

    pub fn fresh_str(&self, name: impl Into<String>, span: Option<CodeRange>) -> StrExp {
        StrExp::symbol(self.fresh(SymSort::Str, name), span)
    }

    /// Fresh shape symbol with a fresh numeric rank symbol derived from the
    /// same name.
    pub fn fresh_shape(&self, name: impl Into<String>, span: Option<CodeRange>) -> ShapeExp {
        let name = name.into();
        let rank = self.fresh_num(format!("{name}_rank"), span);
        ShapeExp {
            span,
            kind: ShapeKind::Symbol {
                sym: self.fresh(SymSort::Shape, name),
                rank: Box::new(rank),
            },
        }
    }
}

/// Numeric constant payload. Integers and floats share the Num sort the way
/// Python mixes them under arithmetic, but we keep the tag so integer
/// reasoning (floor division, modulo, ranges) stays exact.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NumConst {
    Int(i64),
    Float(f64),
}

impl NumConst {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Integer view, exact only for the Int tag or floats with zero fraction.
    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Float(v) if v.fract() == 0.0 && v.abs() < (i64::MAX as f64) => Some(v as i64),
            Self::Float(_) => None,
        }
    }

    #[must_use]
    pub fn is_int(self) -> bool {
        matches!(self, Self::Int(_))
    }
}

impl fmt::Display for NumConst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Binary numeric operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum NumBop {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    TrueDiv,
    #[strum(serialize = "//")]
    FloorDiv,
    #[strum(serialize = "%")]
    Mod,
}

/// Unary numeric operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum NumUop {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "floor")]
    Floor,
    #[strum(serialize = "ceil")]
    Ceil,
    #[strum(serialize = "abs")]
    Abs,
}

/// A numeric symbolic expression with an optional source span.
///
/// The span is diagnostic-only: two expressions with different spans but
/// equal structure compare equal.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NumExp {
    pub span: Option<CodeRange>,
    pub kind: NumKind,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum NumKind {
    Const(NumConst),
    Symbol(Symbol),
    Bop {
        op: NumBop,
        left: Box<NumExp>,
        right: Box<NumExp>,
    },
    Uop {
        op: NumUop,
        operand: Box<NumExp>,
    },
    /// Zero-based dimension of a shape: `shape[index]`.
    Index {
        shape: Box<ShapeExp>,
        index: Box<NumExp>,
    },
    Max(Vec<NumExp>),
    Min(Vec<NumExp>),
    /// Number of elements of a shape (product of its dims).
    Numel(Box<ShapeExp>),
}

impl PartialEq for NumExp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl NumExp {
    #[must_use]
    pub fn new(kind: NumKind, span: Option<CodeRange>) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn int(v: i64, span: Option<CodeRange>) -> Self {
        Self::new(NumKind::Const(NumConst::Int(v)), span)
    }

    #[must_use]
    pub fn float(v: f64, span: Option<CodeRange>) -> Self {
        Self::new(NumKind::Const(NumConst::Float(v)), span)
    }

    #[must_use]
    pub fn symbol(sym: Symbol, span: Option<CodeRange>) -> Self {
        Self::new(NumKind::Symbol(sym), span)
    }

    #[must_use]
    pub fn bop(op: NumBop, left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::new(
            NumKind::Bop {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    #[must_use]
    pub fn uop(op: NumUop, operand: Self, span: Option<CodeRange>) -> Self {
        Self::new(
            NumKind::Uop {
                op,
                operand: Box::new(operand),
            },
            span,
        )
    }

    #[must_use]
    pub fn add(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::bop(NumBop::Add, left, right, span)
    }

    #[must_use]
    pub fn sub(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::bop(NumBop::Sub, left, right, span)
    }

    #[must_use]
    pub fn mul(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::bop(NumBop::Mul, left, right, span)
    }

    #[must_use]
    pub fn floor_div(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::bop(NumBop::FloorDiv, left, right, span)
    }

    #[must_use]
    pub fn index(shape: ShapeExp, index: Self, span: Option<CodeRange>) -> Self {
        Self::new(
            NumKind::Index {
                shape: Box::new(shape),
                index: Box::new(index),
            },
            span,
        )
    }

    #[must_use]
    pub fn max_of(items: Vec<Self>, span: Option<CodeRange>) -> Self {
        Self::new(NumKind::Max(items), span)
    }

    #[must_use]
    pub fn min_of(items: Vec<Self>, span: Option<CodeRange>) -> Self {
        Self::new(NumKind::Min(items), span)
    }

    #[must_use]
    pub fn numel(shape: ShapeExp, span: Option<CodeRange>) -> Self {
        Self::new(NumKind::Numel(Box::new(shape)), span)
    }

    /// Constant payload when this node is a literal constant.
    #[must_use]
    pub fn as_const(&self) -> Option<NumConst> {
        match &self.kind {
            NumKind::Const(c) => Some(*c),
            _ => None,
        }
    }

    /// Integer payload when this node is an integer literal.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        self.as_const().and_then(NumConst::as_i64)
    }

    pub fn collect_symbols(&self, out: &mut AHashSet<SymId>) {
        match &self.kind {
            NumKind::Const(_) => {}
            NumKind::Symbol(sym) => {
                out.insert(sym.id);
            }
            NumKind::Bop { left, right, .. } => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            NumKind::Uop { operand, .. } => operand.collect_symbols(out),
            NumKind::Index { shape, index } => {
                shape.collect_symbols(out);
                index.collect_symbols(out);
            }
            NumKind::Max(items) | NumKind::Min(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
            NumKind::Numel(shape) => shape.collect_symbols(out),
        }
    }
}

impl fmt::Display for NumExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NumKind::Const(c) => write!(f, "{c}"),
            NumKind::Symbol(sym) => write!(f, "{sym}"),
            NumKind::Bop { op, left, right } => write!(f, "({left} {op} {right})"),
            NumKind::Uop { op: NumUop::Neg, operand } => write!(f, "-{operand}"),
            NumKind::Uop { op, operand } => write!(f, "{op}({operand})"),
            NumKind::Index { shape, index } => write!(f, "{shape}[{index}]"),
            NumKind::Max(items) => write_call(f, "max", items),
            NumKind::Min(items) => write_call(f, "min", items),
            NumKind::Numel(shape) => write!(f, "numel({shape})"),
        }
    }
}

fn write_call(f: &mut fmt::Formatter<'_>, name: &str, items: &[NumExp]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_char(')')
}

/// A boolean symbolic expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoolExp {
    pub span: Option<CodeRange>,
    pub kind: BoolKind,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum BoolKind {
    Const(bool),
    Symbol(Symbol),
    /// Structural equality across any two expressions of the same sort.
    Eq(Box<SymExp>, Box<SymExp>),
    Neq(Box<SymExp>, Box<SymExp>),
    Lt(Box<NumExp>, Box<NumExp>),
    Lte(Box<NumExp>, Box<NumExp>),
    Not(Box<BoolExp>),
    And(Box<BoolExp>, Box<BoolExp>),
    Or(Box<BoolExp>, Box<BoolExp>),
}

impl PartialEq for BoolExp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl BoolExp {
    #[must_use]
    pub fn new(kind: BoolKind, span: Option<CodeRange>) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn constant(v: bool, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Const(v), span)
    }

    #[must_use]
    pub fn symbol(sym: Symbol, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Symbol(sym), span)
    }

    #[must_use]
    pub fn eq_exp(left: SymExp, right: SymExp, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Eq(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn neq_exp(left: SymExp, right: SymExp, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Neq(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn eq_num(left: NumExp, right: NumExp, span: Option<CodeRange>) -> Self {
        Self::eq_exp(SymExp::Num(left), SymExp::Num(right), span)
    }

    #[must_use]
    pub fn lt(left: NumExp, right: NumExp, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Lt(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn lte(left: NumExp, right: NumExp, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Lte(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn not(operand: Self, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Not(Box::new(operand)), span)
    }

    #[must_use]
    pub fn and(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::And(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn or(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::new(BoolKind::Or(Box::new(left), Box::new(right)), span)
    }

    /// Conjunction of a list, `true` when empty.
    #[must_use]
    pub fn all_of(items: Vec<Self>, span: Option<CodeRange>) -> Self {
        let mut iter = items.into_iter();
        let Some(first) = iter.next() else {
            return Self::constant(true, span);
        };
        iter.fold(first, |acc, item| Self::and(acc, item, span))
    }

    #[must_use]
    pub fn as_const(&self) -> Option<bool> {
        match &self.kind {
            BoolKind::Const(b) => Some(*b),
            _ => None,
        }
    }

    pub fn collect_symbols(&self, out: &mut AHashSet<SymId>) {
        match &self.kind {
            BoolKind::Const(_) => {}
            BoolKind::Symbol(sym) => {
                out.insert(sym.id);
            }
            BoolKind::Eq(left, right) | BoolKind::Neq(left, right) => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            BoolKind::Lt(left, right) | BoolKind::Lte(left, right) => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
            BoolKind::Not(operand) => operand.collect_symbols(out),
            BoolKind::And(left, right) | BoolKind::Or(left, right) => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
        }
    }
}

impl fmt::Display for BoolExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BoolKind::Const(b) => write!(f, "{b}"),
            BoolKind::Symbol(sym) => write!(f, "{sym}"),
            BoolKind::Eq(left, right) => write!(f, "({left} == {right})"),
            BoolKind::Neq(left, right) => write!(f, "({left} != {right})"),
            BoolKind::Lt(left, right) => write!(f, "({left} < {right})"),
            BoolKind::Lte(left, right) => write!(f, "({left} <= {right})"),
            BoolKind::Not(operand) => write!(f, "!{operand}"),
            BoolKind::And(left, right) => write!(f, "({left} and {right})"),
            BoolKind::Or(left, right) => write!(f, "({left} or {right})"),
        }
    }
}

/// A string symbolic expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StrExp {
    pub span: Option<CodeRange>,
    pub kind: StrKind,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StrKind {
    Const(String),
    Symbol(Symbol),
    /// Substring with optional bounds; `end` is exclusive.
    Slice {
        base: Box<StrExp>,
        start: Option<Box<NumExp>>,
        end: Option<Box<NumExp>>,
    },
    Concat(Box<StrExp>, Box<StrExp>),
}

impl PartialEq for StrExp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl StrExp {
    #[must_use]
    pub fn new(kind: StrKind, span: Option<CodeRange>) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn constant(v: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::new(StrKind::Const(v.into()), span)
    }

    #[must_use]
    pub fn symbol(sym: Symbol, span: Option<CodeRange>) -> Self {
        Self::new(StrKind::Symbol(sym), span)
    }

    #[must_use]
    pub fn concat(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::new(StrKind::Concat(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn slice(base: Self, start: Option<NumExp>, end: Option<NumExp>, span: Option<CodeRange>) -> Self {
        Self::new(
            StrKind::Slice {
                base: Box::new(base),
                start: start.map(Box::new),
                end: end.map(Box::new),
            },
            span,
        )
    }

    #[must_use]
    pub fn as_const(&self) -> Option<&str> {
        match &self.kind {
            StrKind::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn collect_symbols(&self, out: &mut AHashSet<SymId>) {
        match &self.kind {
            StrKind::Const(_) => {}
            StrKind::Symbol(sym) => {
                out.insert(sym.id);
            }
            StrKind::Slice { base, start, end } => {
                base.collect_symbols(out);
                if let Some(start) = start {
                    start.collect_symbols(out);
                }
                if let Some(end) = end {
                    end.collect_symbols(out);
                }
            }
            StrKind::Concat(left, right) => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
        }
    }
}

impl fmt::Display for StrExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StrKind::Const(s) => write!(f, "{s:?}"),
            StrKind::Symbol(sym) => write!(f, "{sym}"),
            StrKind::Slice { base, start, end } => {
                write!(f, "{base}[")?;
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                f.write_char(':')?;
                if let Some(end) = end {
                    write!(f, "{end}")?;
                }
                f.write_char(']')
            }
            StrKind::Concat(left, right) => write!(f, "({left} + {right})"),
        }
    }
}

/// Inline storage size for shape dims; most tensors are rank 4 or less.
pub type Dims = SmallVec<[NumExp; 4]>;

/// A tensor-shape symbolic expression.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ShapeExp {
    pub span: Option<CodeRange>,
    pub kind: ShapeKind,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ShapeKind {
    /// Known-rank shape; dims may still be symbolic numbers.
    Const(Dims),
    /// Fully opaque shape whose rank is itself a numeric expression.
    Symbol { sym: Symbol, rank: Box<NumExp> },
    /// `base` with dimension `axis` replaced by `dim`.
    Set {
        base: Box<ShapeExp>,
        axis: Box<NumExp>,
        dim: Box<NumExp>,
    },
    /// Dims `start..end` of `base`; omitted ends mean `0` / `rank(base)`.
    Slice {
        base: Box<ShapeExp>,
        start: Option<Box<NumExp>>,
        end: Option<Box<NumExp>>,
    },
    Concat(Box<ShapeExp>, Box<ShapeExp>),
    /// Right-aligned elementwise broadcast of two shapes.
    Broadcast(Box<ShapeExp>, Box<ShapeExp>),
}

impl PartialEq for ShapeExp {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl ShapeExp {
    #[must_use]
    pub fn new(kind: ShapeKind, span: Option<CodeRange>) -> Self {
        Self { span, kind }
    }

    #[must_use]
    pub fn constant(dims: Dims, span: Option<CodeRange>) -> Self {
        Self::new(ShapeKind::Const(dims), span)
    }

    /// Rank-0 scalar shape.
    #[must_use]
    pub fn scalar(span: Option<CodeRange>) -> Self {
        Self::constant(Dims::new(), span)
    }

    /// Shape from concrete integer dims.
    #[must_use]
    pub fn from_ints(dims: &[i64], span: Option<CodeRange>) -> Self {
        Self::constant(dims.iter().map(|d| NumExp::int(*d, span)).collect(), span)
    }

    #[must_use]
    pub fn set(base: Self, axis: NumExp, dim: NumExp, span: Option<CodeRange>) -> Self {
        Self::new(
            ShapeKind::Set {
                base: Box::new(base),
                axis: Box::new(axis),
                dim: Box::new(dim),
            },
            span,
        )
    }

    #[must_use]
    pub fn slice(base: Self, start: Option<NumExp>, end: Option<NumExp>, span: Option<CodeRange>) -> Self {
        Self::new(
            ShapeKind::Slice {
                base: Box::new(base),
                start: start.map(Box::new),
                end: end.map(Box::new),
            },
            span,
        )
    }

    #[must_use]
    pub fn concat(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::new(ShapeKind::Concat(Box::new(left), Box::new(right)), span)
    }

    #[must_use]
    pub fn broadcast(left: Self, right: Self, span: Option<CodeRange>) -> Self {
        Self::new(ShapeKind::Broadcast(Box::new(left), Box::new(right)), span)
    }

    /// Rank of the shape as a numeric expression, following the rank table.
    ///
    /// Constant folds whenever the structure allows it, so a `Const` shape
    /// and fully-bounded slices yield `NumKind::Const` directly.
    #[must_use]
    pub fn rank(&self) -> NumExp {
        let span = self.span;
        match &self.kind {
            ShapeKind::Const(dims) => NumExp::int(dims.len() as i64, span),
            ShapeKind::Symbol { rank, .. } => (**rank).clone(),
            ShapeKind::Set { base, .. } => base.rank(),
            ShapeKind::Slice { base, start, end } => {
                let start = start
                    .as_deref()
                    .cloned()
                    .unwrap_or_else(|| NumExp::int(0, span));
                let end = end.as_deref().cloned().unwrap_or_else(|| base.rank());
                if let (Some(s), Some(e)) = (start.as_int(), end.as_int()) {
                    NumExp::int((e - s).max(0), span)
                } else {
                    NumExp::max_of(vec![NumExp::int(0, span), NumExp::sub(end, start, span)], span)
                }
            }
            ShapeKind::Concat(left, right) => {
                let (lr, rr) = (left.rank(), right.rank());
                if let (Some(l), Some(r)) = (lr.as_int(), rr.as_int()) {
                    NumExp::int(l + r, span)
                } else {
                    NumExp::add(lr, rr, span)
                }
            }
            ShapeKind::Broadcast(left, right) => {
                let (lr, rr) = (left.rank(), right.rank());
                if let (Some(l), Some(r)) = (lr.as_int(), rr.as_int()) {
                    NumExp::int(l.max(r), span)
                } else {
                    NumExp::max_of(vec![lr, rr], span)
                }
            }
        }
    }

    /// Rank when it is statically known.
    #[must_use]
    pub fn rank_const(&self) -> Option<i64> {
        self.rank().as_int()
    }

    /// Dims slice when this is a known-rank constant shape.
    #[must_use]
    pub fn as_const_dims(&self) -> Option<&Dims> {
        match &self.kind {
            ShapeKind::Const(dims) => Some(dims),
            _ => None,
        }
    }

    pub fn collect_symbols(&self, out: &mut AHashSet<SymId>) {
        match &self.kind {
            ShapeKind::Const(dims) => {
                for dim in dims {
                    dim.collect_symbols(out);
                }
            }
            ShapeKind::Symbol { sym, rank } => {
                out.insert(sym.id);
                rank.collect_symbols(out);
            }
            ShapeKind::Set { base, axis, dim } => {
                base.collect_symbols(out);
                axis.collect_symbols(out);
                dim.collect_symbols(out);
            }
            ShapeKind::Slice { base, start, end } => {
                base.collect_symbols(out);
                if let Some(start) = start {
                    start.collect_symbols(out);
                }
                if let Some(end) = end {
                    end.collect_symbols(out);
                }
            }
            ShapeKind::Concat(left, right) | ShapeKind::Broadcast(left, right) => {
                left.collect_symbols(out);
                right.collect_symbols(out);
            }
        }
    }
}

impl fmt::Display for ShapeExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ShapeKind::Const(dims) => {
                f.write_char('[')?;
                for (i, dim) in dims.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{dim}")?;
                }
                f.write_char(']')
            }
            ShapeKind::Symbol { sym, .. } => write!(f, "{sym}"),
            ShapeKind::Set { base, axis, dim } => write!(f, "set({base}, {axis}, {dim})"),
            ShapeKind::Slice { base, start, end } => {
                write!(f, "{base}[")?;
                if let Some(start) = start {
                    write!(f, "{start}")?;
                }
                f.write_char(':')?;
                if let Some(end) = end {
                    write!(f, "{end}")?;
                }
                f.write_char(']')
            }
            ShapeKind::Concat(left, right) => write!(f, "({left} ++ {right})"),
            ShapeKind::Broadcast(left, right) => write!(f, "bc({left}, {right})"),
        }
    }
}

/// Union over the four sorts, used where an operation is sort-generic
/// (equality constraints, `ret_val` temporaries, solver queries).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SymExp {
    Num(NumExp),
    Bool(BoolExp),
    Str(StrExp),
    Shape(ShapeExp),
}

impl SymExp {
    #[must_use]
    pub fn sort(&self) -> SymSort {
        match self {
            Self::Num(_) => SymSort::Num,
            Self::Bool(_) => SymSort::Bool,
            Self::Str(_) => SymSort::Str,
            Self::Shape(_) => SymSort::Shape,
        }
    }

    pub fn collect_symbols(&self, out: &mut AHashSet<SymId>) {
        match self {
            Self::Num(e) => e.collect_symbols(out),
            Self::Bool(e) => e.collect_symbols(out),
            Self::Str(e) => e.collect_symbols(out),
            Self::Shape(e) => e.collect_symbols(out),
        }
    }

    /// The set of symbol ids reachable inside the expression.
    #[must_use]
    pub fn symbols(&self) -> AHashSet<SymId> {
        let mut out = AHashSet::new();
        self.collect_symbols(&mut out);
        out
    }
}

impl fmt::Display for SymExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(e) => write!(f, "{e}"),
            Self::Bool(e) => write!(f, "{e}"),
            Self::Str(e) => write!(f, "{e}"),
            Self::Shape(e) => write!(f, "{e}"),
        }
    }
}

/// Result of the single-variable probe over an expression.
///
/// `Closed` means no free symbol occurs; `Single` carries the only free
/// symbol; `Many` means at least two distinct symbols occur. The interpreter
/// uses `Single` to short-circuit obligations that one cached range already
/// decides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolProbe {
    Closed,
    Single(SymId),
    Many,
}

/// Probes how many distinct symbols a boolean expression mentions.
#[must_use]
pub fn single_symbol(exp: &BoolExp) -> SymbolProbe {
    let mut out = AHashSet::new();
    exp.collect_symbols(&mut out);
    match out.len() {
        0 => SymbolProbe::Closed,
        1 => SymbolProbe::Single(*out.iter().next().expect("len checked")),
        _ => SymbolProbe::Many,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen_sym() -> SymGen {
        SymGen::new()
    }

    #[test]
    fn sym_ids_are_unique_and_monotonic() {
        let g = gen_sym();
        let a = g.fresh(SymSort::Num, "a");
        let b = g.fresh(SymSort::Num, "b");
        assert!(a.id < b.id);
    }

    #[test]
    fn rank_of_const_shape() {
        let s = ShapeExp::from_ints(&[4, 3, 32, 32], None);
        assert_eq!(s.rank_const(), Some(4));
    }

    #[test]
    fn rank_of_slice_folds_constants() {
        let s = ShapeExp::from_ints(&[2, 3, 4], None);
        let sliced = ShapeExp::slice(s, Some(NumExp::int(1, None)), Some(NumExp::int(3, None)), None);
        assert_eq!(sliced.rank_const(), Some(2));
        let s2 = ShapeExp::from_ints(&[2, 3], None);
        let inverted = ShapeExp::slice(s2, Some(NumExp::int(2, None)), Some(NumExp::int(1, None)), None);
        assert_eq!(inverted.rank_const(), Some(0));
    }

    #[test]
    fn rank_of_concat_and_broadcast() {
        let l = ShapeExp::from_ints(&[2, 3], None);
        let r = ShapeExp::from_ints(&[4], None);
        assert_eq!(ShapeExp::concat(l.clone(), r.clone(), None).rank_const(), Some(3));
        assert_eq!(ShapeExp::broadcast(l, r, None).rank_const(), Some(2));
    }

    #[test]
    fn symbolic_rank_stays_symbolic() {
        let g = gen_sym();
        let s = g.fresh_shape("x", None);
        assert_eq!(s.rank_const(), None);
        assert!(matches!(s.rank().kind, NumKind::Symbol(_)));
    }

    #[test]
    fn spans_do_not_affect_equality() {
        let a = NumExp::int(3, None);
        let b = NumExp::int(3, None);
        assert_eq!(a, b);
        let sum1 = NumExp::add(a.clone(), b.clone(), None);
        let sum2 = NumExp::add(a, b, None);
        assert_eq!(sum1, sum2);
    }

    #[test]
    fn collect_symbols_walks_all_sorts() {
        let g = gen_sym();
        let n = g.fresh_num("n", None);
        let shape = ShapeExp::constant(Dims::from_vec(vec![n.clone(), NumExp::int(3, None)]), None);
        let cond = BoolExp::lte(NumExp::int(1, None), NumExp::index(shape, NumExp::int(0, None), None), None);
        let mut out = AHashSet::new();
        cond.collect_symbols(&mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn single_symbol_probe() {
        let g = gen_sym();
        let n = g.fresh_num("n", None);
        let m = g.fresh_num("m", None);
        let closed = BoolExp::lt(NumExp::int(1, None), NumExp::int(2, None), None);
        assert_eq!(single_symbol(&closed), SymbolProbe::Closed);
        let one = BoolExp::lt(n.clone(), NumExp::int(2, None), None);
        assert!(matches!(single_symbol(&one), SymbolProbe::Single(_)));
        let two = BoolExp::lt(n, m, None);
        assert_eq!(single_symbol(&two), SymbolProbe::Many);
    }

    #[test]
    fn display_is_stable() {
        let g = gen_sym();
        let n = g.fresh_num("N", None);
        let shape = ShapeExp::constant(Dims::from_vec(vec![n, NumExp::int(10, None)]), None);
        let printed = format!("{shape}");
        assert!(printed.starts_with('['));
        assert!(printed.contains("N'"));
        assert!(printed.contains("10"));
    }
}
