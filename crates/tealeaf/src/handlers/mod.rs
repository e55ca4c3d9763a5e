//! Library-call handler registry.
//!
//! Every `LibCall` in the lowered language routes here by qualified name.
//! Structural handlers implement Python semantics the lowered language
//! cannot express (imports, literals, keyword calls, raise); the namespaced
//! handlers encode tensor-operation shape semantics as shape-algebra
//! rewrites plus obligations. A handler consumes one path and returns a
//! path set, so it may fork internally.

use indexmap::IndexMap;

use crate::{
    builtins,
    context::{Context, ContextSet},
    error::ErrorKind,
    heap::Addr,
    interp::{Interp, error_value},
    parse::CodeRange,
    symexp::{BoolExp, NumExp, ShapeExp},
    value::{LENGTH_ATTR, MRO_ATTR, Object, Value},
};

pub(crate) mod argparse_mod;
pub(crate) mod guard;
pub(crate) mod math_mod;
pub(crate) mod numpy_mod;
pub(crate) mod pil_mod;
pub(crate) mod shape;
pub(crate) mod structural;
pub(crate) mod torch;

/// Evaluated keyword arguments of one lib-call.
pub(crate) type Args = IndexMap<String, Value>;

/// Routes one lib-call to its handler.
///
/// Unknown names degrade per the error model: a warning plus a fresh
/// symbolic value of the namespace's expected sort.
pub(crate) fn dispatch(
    interp: &mut Interp,
    ctx: &Context,
    func: &str,
    args: &Args,
    span: Option<CodeRange>,
) -> ContextSet {
    if let Some(name) = func.strip_prefix("torch.") {
        return torch::dispatch(interp, ctx, name, args, span);
    }
    if let Some(name) = func.strip_prefix("shape.") {
        return shape::dispatch(interp, ctx, name, args, span);
    }
    if let Some(name) = func.strip_prefix("guard.") {
        return guard::dispatch(interp, ctx, name, args, span);
    }
    if let Some(name) = func.strip_prefix("math.") {
        return math_mod::dispatch(interp, ctx, name, args, span);
    }
    if let Some(name) = func.strip_prefix("numpy.") {
        return numpy_mod::dispatch(interp, ctx, name, args, span);
    }
    if let Some(name) = func.strip_prefix("PIL.") {
        return pil_mod::dispatch(interp, ctx, name, args, span);
    }
    if let Some(name) = func.strip_prefix("argparse.") {
        return argparse_mod::dispatch(interp, ctx, name, args, span);
    }
    structural::dispatch(interp, ctx, func, args, span)
}

/// Fallback for a name no handler covers.
pub(crate) fn unsupported_call(ctx: &Context, func: &str, span: Option<CodeRange>) -> ContextSet {
    let warned = ctx.warn(ErrorKind::Unsupported, format!("no handler for '{func}'"), span);
    if func.starts_with("torch") || func.starts_with("numpy") || func.starts_with("PIL") {
        let (value, warned) = fresh_tensor(&warned, func, span);
        return ContextSet::single(warned.set_ret_val(value));
    }
    let fresh = warned.syms.fresh_num(func.replace('.', "_"), span);
    ContextSet::single(warned.set_ret_val(Value::Int(fresh)))
}

/// Introduces obligations on one path.
pub(crate) fn require(
    interp: &mut Interp,
    ctx: &Context,
    constraints: &[BoolExp],
    message: &str,
    span: Option<CodeRange>,
) -> ContextSet {
    interp.tracer.on_require(message, span);
    ContextSet::single(ctx.clone()).require(
        constraints,
        message,
        span,
        interp.oracle,
        interp.opts.immediate_constraint_check,
    )
}

/// Missing-argument error value.
pub(crate) fn missing_arg(func: &str, name: &str, span: Option<CodeRange>) -> Value {
    error_value(
        ErrorKind::TypeMismatch,
        format!("'{func}' is missing required argument '{name}'"),
        span,
    )
}

/// A non-`None` argument, when present.
pub(crate) fn opt_arg<'a>(args: &'a Args, name: &str) -> Option<&'a Value> {
    match args.get(name) {
        Some(Value::None) | None => None,
        Some(value) => Some(value),
    }
}

/// Allocates a Size object reflecting `shape`.
pub(crate) fn make_size(ctx: &Context, shape: &ShapeExp, span: Option<CodeRange>) -> (Addr, Context) {
    let shape = crate::simplify::shape(shape);
    ctx.place_object(span, |obj| {
        obj.with_shape(shape)
            .with_attr("$class", Value::Addr(builtins::TUPLE_CLASS_ADDR))
            .with_attr(MRO_ATTR, Value::Addr(builtins::TUPLE_CLASS_ADDR))
    })
}

/// Allocates a tensor object with the given shape and dtype.
pub(crate) fn make_tensor(ctx: &Context, shape: &ShapeExp, dtype: &str, span: Option<CodeRange>) -> (Addr, Context) {
    let shape = crate::simplify::shape(shape);
    let (size_addr, ctx) = make_size(ctx, &shape, span);
    let first_dim = NumExp::index(shape, NumExp::int(0, span), span);
    ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(builtins::TENSOR_CLASS_ADDR))
            .with_attr("shape", Value::Addr(size_addr))
            .with_attr("dtype", Value::string(dtype, span))
            .with_attr(LENGTH_ATTR, Value::Int(crate::simplify::num(&first_dim)))
    })
}

/// Fresh tensor with a fully symbolic shape, used by degraded handlers.
pub(crate) fn fresh_tensor(ctx: &Context, name_hint: &str, span: Option<CodeRange>) -> (Value, Context) {
    let shape = ctx.syms.fresh_shape(name_hint.replace('.', "_"), span);
    let (addr, ctx) = make_tensor(ctx, &shape, DEFAULT_DTYPE, span);
    (Value::Addr(addr), ctx)
}

pub(crate) const DEFAULT_DTYPE: &str = "torch.float32";

/// Shape of a tensor or Size value.
pub(crate) fn tensor_shape(ctx: &Context, value: &Value) -> Option<ShapeExp> {
    match ctx.deref(value) {
        Value::Object(obj) => object_shape(ctx, &obj),
        _ => None,
    }
}

pub(crate) fn object_shape(ctx: &Context, obj: &Object) -> Option<ShapeExp> {
    if let Some(shape) = &obj.shape {
        return Some(shape.clone());
    }
    match obj.attrs.get("shape") {
        Some(value) => match ctx.deref(value) {
            Value::Object(size) => size.shape.clone(),
            _ => None,
        },
        None => None,
    }
}

/// Dtype tag of a tensor value, defaulting to float32.
pub(crate) fn tensor_dtype(ctx: &Context, value: &Value) -> String {
    if let Value::Object(obj) = ctx.deref(value)
        && let Some(Value::Str(dtype)) = obj.attrs.get("dtype")
        && let Some(dtype) = dtype.as_const()
    {
        return dtype.to_owned();
    }
    DEFAULT_DTYPE.to_owned()
}

/// Numeric expression of an Int/Float/Bool argument.
pub(crate) fn num_exp(value: &Value) -> Option<NumExp> {
    crate::interp::as_num(value).map(|(exp, _)| exp)
}

/// Items of a tuple/list-like object.
pub(crate) fn tuple_items(ctx: &Context, value: &Value) -> Option<Vec<Value>> {
    match ctx.deref(value) {
        Value::Object(obj) => {
            let len = obj.length()?;
            let mut items = Vec::with_capacity(len.max(0) as usize);
            for i in 0..len {
                items.push(obj.indices.get(&i)?.clone());
            }
            Some(items)
        }
        _ => None,
    }
}

/// A pair of numbers from an int or a 2-tuple, the way torch accepts
/// `stride`/`padding`/`dilation` parameters.
pub(crate) fn num_pair(ctx: &Context, value: &Value, span: Option<CodeRange>) -> Option<(NumExp, NumExp)> {
    let _ = span;
    if let Some(exp) = num_exp(value) {
        return Some((exp.clone(), exp));
    }
    let items = tuple_items(ctx, value)?;
    match items.as_slice() {
        [single] => {
            let exp = num_exp(single)?;
            Some((exp.clone(), exp))
        }
        [first, second] => Some((num_exp(first)?, num_exp(second)?)),
        _ => None,
    }
}

/// Varargs-style dim list: either `f(2, 3)` or `f((2, 3))` / `f(size)`.
///
/// Returns the dims as numeric expressions; `None` when any entry is not a
/// number (for instance a nested tuple deeper than one level).
pub(crate) fn flatten_dims(ctx: &Context, value: &Value, span: Option<CodeRange>) -> Option<Vec<NumExp>> {
    let _ = span;
    let items = tuple_items(ctx, value)?;
    if items.len() == 1 {
        let only = &items[0];
        if let Some(shape) = tensor_shape(ctx, only) {
            // A Size argument contributes its dims directly when the rank is
            // known.
            if let Some(dims) = crate::simplify::shape(&shape).as_const_dims() {
                return Some(dims.to_vec());
            }
            return None;
        }
        if let Some(inner) = tuple_items(ctx, only) {
            return inner.iter().map(num_exp).collect();
        }
    }
    items.iter().map(num_exp).collect()
}
