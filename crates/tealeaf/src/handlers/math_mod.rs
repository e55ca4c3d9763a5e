//! Scalar math builtins and the `math` module surface.

use crate::{
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{Args, num_exp, tuple_items, unsupported_call},
    interp::{Interp, error_value},
    parse::CodeRange,
    simplify,
    symexp::{NumExp, NumKind, NumUop},
    value::Value,
};

pub(crate) fn dispatch(
    _interp: &mut Interp,
    ctx: &Context,
    name: &str,
    args: &Args,
    span: Option<CodeRange>,
) -> ContextSet {
    match name {
        "abs" => uop(ctx, args, "value", NumUop::Abs, span),
        "floor" => uop(ctx, args, "value", NumUop::Floor, span),
        "ceil" => uop(ctx, args, "value", NumUop::Ceil, span),
        "max" => fold(ctx, args, span, Fold::Max),
        "min" => fold(ctx, args, span, Fold::Min),
        "sum" => sum(ctx, args, span),
        "opaque" => opaque(ctx, span),
        other => unsupported_call(ctx, &format!("math.{other}"), span),
    }
}

fn uop(ctx: &Context, args: &Args, name: &str, op: NumUop, span: Option<CodeRange>) -> ContextSet {
    let Some(value) = args.get(name).and_then(num_exp) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "expected a numeric argument",
            span,
        )));
    };
    let result = simplify::num(&NumExp::new(
        NumKind::Uop {
            op,
            operand: Box::new(value),
        },
        span,
    ));
    ContextSet::single(ctx.set_ret_val(Value::Int(result)))
}

enum Fold {
    Max,
    Min,
}

/// `max(a, b, ...)` / `min`, also accepting a single iterable argument.
fn fold(ctx: &Context, args: &Args, span: Option<CodeRange>, which: Fold) -> ContextSet {
    let Some(items) = args.get("args").and_then(|value| tuple_items(ctx, value)) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "expected at least one argument",
            span,
        )));
    };
    let items = match items.as_slice() {
        [single] => match tuple_items(ctx, single) {
            Some(inner) => inner,
            None => items,
        },
        _ => items,
    };
    let exps: Option<Vec<NumExp>> = items.iter().map(num_exp).collect();
    let Some(exps) = exps else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "expected numeric arguments",
            span,
        )));
    };
    if exps.is_empty() {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "expected a non-empty sequence",
            span,
        )));
    }
    let result = match which {
        Fold::Max => simplify::num(&NumExp::max_of(exps, span)),
        Fold::Min => simplify::num(&NumExp::min_of(exps, span)),
    };
    ContextSet::single(ctx.set_ret_val(Value::Int(result)))
}

fn sum(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(items) = args.get("iterable").and_then(|value| tuple_items(ctx, value)) else {
        let warned = ctx.warn(ErrorKind::Unsupported, "sum over an unbounded iterable", span);
        let fresh = warned.syms.fresh_num("sum", span);
        return ContextSet::single(warned.set_ret_val(Value::Int(fresh)));
    };
    let mut acc = NumExp::int(0, span);
    for item in &items {
        let Some(exp) = num_exp(item) else {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "sum expects numeric items",
                span,
            )));
        };
        acc = NumExp::add(acc, exp, span);
    }
    ContextSet::single(ctx.set_ret_val(Value::Int(simplify::num(&acc))))
}

/// Transcendental functions: shape analysis only needs a fresh value.
fn opaque(ctx: &Context, span: Option<CodeRange>) -> ContextSet {
    let fresh = ctx.syms.fresh_num("math", span);
    ContextSet::single(ctx.set_ret_val(Value::Float(fresh)))
}
