//! Runtime values of the symbolic machine.
//!
//! `Value` is a tagged sum over heap references, symbolic literals of the
//! four sorts, objects, functions and the singleton markers. All dispatch is
//! a single pattern match on the tag; values never carry methods of their
//! own. Objects reference other objects only through [`Addr`], so the object
//! graph lives entirely in the heap.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use indexmap::IndexMap;

use crate::{
    env::Env,
    error::Diagnostic,
    heap::Addr,
    ir::Stmt,
    parse::CodeRange,
    symexp::{BoolExp, NumExp, ShapeExp, StrExp},
};

/// Globally unique object identity, assigned at creation and never reused.
/// Clones of an object receive a fresh id at a fresh address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(u64);

impl ObjId {
    #[must_use]
    pub fn index(self) -> u64 {
        self.0
    }

    /// Sentinel identity shared by interned built-in function values, which
    /// never participate in identity comparisons.
    #[must_use]
    pub(crate) const fn builtin() -> Self {
        Self(u64::MAX)
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session-scoped object id generator, shared across forked paths.
#[derive(Debug, Clone, Default)]
pub struct ObjGen {
    next: Arc<AtomicU64>,
}

impl ObjGen {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self) -> ObjId {
        ObjId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Name of the synthetic length attribute carried by sized objects.
pub const LENGTH_ATTR: &str = "$length";
/// Name of the method-resolution-order attribute.
pub const MRO_ATTR: &str = "__mro__";

/// A structured value with named attributes, positional subscripts and
/// string-keyed subscripts.
///
/// When `shape` is set the object is a Size: the value-level reflection of a
/// tensor shape. A Size keeps `$length` equal to the rank of its shape, and
/// indexing it with an integer yields the corresponding dim as an `Int`.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub id: ObjId,
    /// Back-pointer to the heap cell holding this object.
    pub addr: Addr,
    pub attrs: IndexMap<String, Value>,
    pub indices: IndexMap<i64, Value>,
    pub key_values: IndexMap<String, Value>,
    pub shape: Option<ShapeExp>,
}

impl Object {
    #[must_use]
    pub fn new(id: ObjId, addr: Addr) -> Self {
        Self {
            id,
            addr,
            attrs: IndexMap::new(),
            indices: IndexMap::new(),
            key_values: IndexMap::new(),
            shape: None,
        }
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    #[must_use]
    pub fn with_index(mut self, index: i64, value: Value) -> Self {
        self.indices.insert(index, value);
        self
    }

    /// Turns this object into a Size over `shape`, keeping the `$length`
    /// attribute in sync with the rank.
    #[must_use]
    pub fn with_shape(mut self, shape: ShapeExp) -> Self {
        let rank = shape.rank();
        self.attrs.insert(LENGTH_ATTR.to_owned(), Value::Int(rank));
        self.shape = Some(shape);
        self
    }

    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }

    /// Known element count: the `$length` attribute when it is a concrete int.
    #[must_use]
    pub fn length(&self) -> Option<i64> {
        match self.attrs.get(LENGTH_ATTR) {
            Some(Value::Int(n)) => n.as_int(),
            _ => None,
        }
    }

    /// Symbolic length expression when present, concrete or not.
    #[must_use]
    pub fn length_exp(&self) -> Option<&NumExp> {
        match self.attrs.get(LENGTH_ATTR) {
            Some(Value::Int(n)) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_size(&self) -> bool {
        self.shape.is_some()
    }

    /// Rewrites every non-negative address reachable inside this object.
    #[must_use]
    pub fn add_offset(&self, delta: i64) -> Self {
        let mut out = self.clone();
        out.addr = out.addr.offset(delta);
        for value in out.attrs.values_mut() {
            *value = value.add_offset(delta);
        }
        for value in out.indices.values_mut() {
            *value = value.add_offset(delta);
        }
        for value in out.key_values.values_mut() {
            *value = value.add_offset(delta);
        }
        out
    }

    pub fn collect_addrs(&self, out: &mut Vec<Addr>) {
        for value in self.attrs.values() {
            value.collect_addrs(out);
        }
        for value in self.indices.values() {
            value.collect_addrs(out);
        }
        for value in self.key_values.values() {
            value.collect_addrs(out);
        }
    }
}

/// A user-defined or library function value.
///
/// The body is shared (`Arc`) because functions are cloned whenever the heap
/// page holding them is copied, and the lowered body never mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct Func {
    pub id: ObjId,
    pub name: String,
    pub params: Vec<String>,
    pub defaults: IndexMap<String, Value>,
    pub body: Arc<Stmt>,
    /// Environment captured at definition time. Addresses are either all
    /// negative (built-ins) or valid in the heap the call runs against.
    pub captured: Env,
    pub has_closure: bool,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
    /// Trailing parameters that are keyword-only.
    pub key_only_count: usize,
    /// Receiver address when this value is a bound method.
    pub bound_self: Option<Addr>,
}

impl Func {
    /// Rebinds the function to a receiver, producing a bound method.
    #[must_use]
    pub fn bind(&self, receiver: Addr) -> Self {
        let mut out = self.clone();
        out.bound_self = Some(receiver);
        out
    }

    #[must_use]
    pub fn add_offset(&self, delta: i64) -> Self {
        let mut out = self.clone();
        out.captured = out.captured.add_offset(delta);
        out.bound_self = out.bound_self.map(|addr| addr.offset(delta));
        for value in out.defaults.values_mut() {
            *value = value.add_offset(delta);
        }
        out
    }

    pub fn collect_addrs(&self, out: &mut Vec<Addr>) {
        for addr in self.captured.addrs() {
            out.push(addr);
        }
        if let Some(addr) = self.bound_self {
            out.push(addr);
        }
        for value in self.defaults.values() {
            value.collect_addrs(out);
        }
    }
}

/// Primary value type of the machine.
///
/// Literal payloads (`Int`, `Float`, `Bool`, `Str`) are symbolic expressions
/// of the matching sort; a concrete Python literal is just the `Const` node
/// of that sort.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A heap reference.
    Addr(Addr),
    Int(NumExp),
    Float(NumExp),
    Bool(BoolExp),
    Str(StrExp),
    Object(Box<Object>),
    Func(Box<Func>),
    None,
    /// Python's `NotImplemented`, with an optional reason used in warnings.
    NotImpl(Option<String>),
    /// Uninitialized cell contents.
    Undef,
    /// In-path failure; propagation short-circuits until the next join.
    Error(Box<Diagnostic>),
}

impl Value {
    #[must_use]
    pub fn int(v: i64, span: Option<CodeRange>) -> Self {
        Self::Int(NumExp::int(v, span))
    }

    #[must_use]
    pub fn float(v: f64, span: Option<CodeRange>) -> Self {
        Self::Float(NumExp::float(v, span))
    }

    #[must_use]
    pub fn bool_const(v: bool, span: Option<CodeRange>) -> Self {
        Self::Bool(BoolExp::constant(v, span))
    }

    #[must_use]
    pub fn string(v: impl Into<String>, span: Option<CodeRange>) -> Self {
        Self::Str(StrExp::constant(v, span))
    }

    /// Short tag name used in type-mismatch messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Addr(_) => "address",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::Object(obj) => {
                if obj.is_size() {
                    "Size"
                } else {
                    "object"
                }
            }
            Self::Func(_) => "function",
            Self::None => "None",
            Self::NotImpl(_) => "NotImplemented",
            Self::Undef => "undefined",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn as_addr(&self) -> Option<Addr> {
        match self {
            Self::Addr(addr) => Some(*addr),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Rewrites every non-negative address reachable inside this value.
    #[must_use]
    pub fn add_offset(&self, delta: i64) -> Self {
        match self {
            Self::Addr(addr) => Self::Addr(addr.offset(delta)),
            Self::Object(obj) => Self::Object(Box::new(obj.add_offset(delta))),
            Self::Func(func) => Self::Func(Box::new(func.add_offset(delta))),
            _ => self.clone(),
        }
    }

    /// Appends every address directly reachable from this value.
    pub fn collect_addrs(&self, out: &mut Vec<Addr>) {
        match self {
            Self::Addr(addr) => out.push(*addr),
            Self::Object(obj) => obj.collect_addrs(out),
            Self::Func(func) => func.collect_addrs(out),
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addr(addr) => write!(f, "@{addr}"),
            Self::Int(e) | Self::Float(e) => write!(f, "{e}"),
            Self::Bool(e) => write!(f, "{e}"),
            Self::Str(e) => write!(f, "{e}"),
            Self::Object(obj) => match &obj.shape {
                Some(shape) => write!(f, "Size{shape}"),
                None => write!(f, "object{}", obj.id),
            },
            Self::Func(func) => write!(f, "<function {}>", func.name),
            Self::None => f.write_str("None"),
            Self::NotImpl(_) => f.write_str("NotImplemented"),
            Self::Undef => f.write_str("undefined"),
            Self::Error(diag) => write!(f, "<{}: {}>", diag.kind, diag.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symexp::Dims;

    #[test]
    fn obj_ids_are_fresh() {
        let g = ObjGen::new();
        assert_ne!(g.fresh(), g.fresh());
    }

    #[test]
    fn size_keeps_length_in_sync_with_rank() {
        let g = ObjGen::new();
        let obj = Object::new(g.fresh(), Addr::new(10)).with_shape(ShapeExp::from_ints(&[2, 3, 4], None));
        assert!(obj.is_size());
        assert_eq!(obj.length(), Some(3));
    }

    #[test]
    fn offset_rewrites_nested_addresses() {
        let g = ObjGen::new();
        let inner = Value::Addr(Addr::new(5));
        let builtin = Value::Addr(Addr::new(-3));
        let obj = Object::new(g.fresh(), Addr::new(7))
            .with_attr("next", inner)
            .with_attr("cls", builtin);
        let moved = obj.add_offset(100);
        assert_eq!(moved.addr, Addr::new(107));
        assert_eq!(moved.attrs["next"], Value::Addr(Addr::new(105)));
        // negative addresses are immune to offsetting
        assert_eq!(moved.attrs["cls"], Value::Addr(Addr::new(-3)));
    }

    #[test]
    fn collect_addrs_walks_containers() {
        let g = ObjGen::new();
        let obj = Object::new(g.fresh(), Addr::new(1))
            .with_attr("a", Value::Addr(Addr::new(2)))
            .with_index(0, Value::Addr(Addr::new(3)));
        let mut out = vec![];
        obj.collect_addrs(&mut out);
        assert_eq!(out, vec![Addr::new(2), Addr::new(3)]);
    }

    #[test]
    fn display_of_size_shows_dims() {
        let g = ObjGen::new();
        let dims: Dims = [NumExp::int(4, None), NumExp::int(3, None)].into_iter().collect();
        let obj = Object::new(g.fresh(), Addr::new(1)).with_shape(ShapeExp::constant(dims, None));
        assert_eq!(Value::Object(Box::new(obj)).to_string(), "Size[4, 3]");
    }
}
