//! User-facing obligation primitives, called from analyzed helper code.

use crate::{
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{Args, num_exp, require, shape::broadcastable_cond, tensor_shape, unsupported_call},
    interp::{Interp, Truth, error_value, truthiness},
    parse::CodeRange,
    simplify,
    symexp::{BoolExp, SymExp},
    value::Value,
};

pub(crate) fn dispatch(
    interp: &mut Interp,
    ctx: &Context,
    name: &str,
    args: &Args,
    span: Option<CodeRange>,
) -> ContextSet {
    match name {
        "require_true" => require_true(interp, ctx, args, span),
        "require_eq" => require_cmp(interp, ctx, args, span, CmpKind::Eq),
        "require_lt" => require_cmp(interp, ctx, args, span, CmpKind::Lt),
        "require_lte" => require_cmp(interp, ctx, args, span, CmpKind::Lte),
        "require_shape_eq" => require_shape_eq(interp, ctx, args, span),
        "require_broadcastable" => require_broadcastable(interp, ctx, args, span),
        other => unsupported_call(ctx, &format!("guard.{other}"), span),
    }
}

fn message(args: &Args, fallback: &str) -> String {
    match args.get("msg") {
        Some(Value::Str(msg)) => msg.as_const().map_or_else(|| fallback.to_owned(), str::to_owned),
        _ => fallback.to_owned(),
    }
}

fn require_true(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(cond) = args.get("cond") else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "require_true: missing condition",
            span,
        )));
    };
    let message = message(args, "guarded condition must hold");
    match truthiness(ctx, cond, span) {
        Truth::Known(true) => ContextSet::single(ctx.set_ret_val(Value::None)),
        Truth::Known(false) => require(interp, ctx, &[BoolExp::constant(false, span)], &message, span),
        Truth::Sym(cond) => require(interp, ctx, &[cond], &message, span).return_value(Value::None),
        Truth::Err(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag)))),
    }
}

enum CmpKind {
    Eq,
    Lt,
    Lte,
}

fn require_cmp(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>, kind: CmpKind) -> ContextSet {
    let (Some(left), Some(right)) = (
        args.get("left").and_then(num_exp),
        args.get("right").and_then(num_exp),
    ) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "guard comparison expects numeric operands",
            span,
        )));
    };
    let (cond, fallback) = match kind {
        CmpKind::Eq => (BoolExp::eq_num(left, right, span), "values must be equal"),
        CmpKind::Lt => (BoolExp::lt(left, right, span), "value must be strictly smaller"),
        CmpKind::Lte => (BoolExp::lte(left, right, span), "value must not be larger"),
    };
    let message = message(args, fallback);
    require(interp, ctx, &[simplify::boolean(&cond)], &message, span).return_value(Value::None)
}

fn require_shape_eq(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let shapes = args
        .get("left")
        .and_then(|value| tensor_shape(ctx, value))
        .zip(args.get("right").and_then(|value| tensor_shape(ctx, value)));
    let Some((left, right)) = shapes else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "require_shape_eq expects two shaped values",
            span,
        )));
    };
    let cond = simplify::boolean(&BoolExp::eq_exp(SymExp::Shape(left), SymExp::Shape(right), span));
    let message = message(args, "shapes must be equal");
    require(interp, ctx, &[cond], &message, span).return_value(Value::None)
}

fn require_broadcastable(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let shapes = args
        .get("left")
        .and_then(|value| tensor_shape(ctx, value))
        .zip(args.get("right").and_then(|value| tensor_shape(ctx, value)));
    let Some((left, right)) = shapes else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "require_broadcastable expects two shaped values",
            span,
        )));
    };
    let cond = broadcastable_cond(&left, &right, span);
    let message = message(args, "shapes must be broadcastable");
    require(interp, ctx, &[cond], &message, span).return_value(Value::None)
}
