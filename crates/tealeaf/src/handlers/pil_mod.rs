//! Minimal PIL surface: images carry a symbolic width and height.

use crate::{
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{Args, make_size, unsupported_call},
    interp::{Interp, error_value},
    parse::CodeRange,
    symexp::{BoolExp, NumExp, ShapeExp},
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
        "open" => open(ctx, span),
        "identity" => identity(ctx, args, span),
        "resize" => resize(ctx, args, span),
        other => unsupported_call(ctx, &format!("PIL.{other}"), span),
    }
}

/// `Image.open(fp)`: an image object with fresh positive width and height.
fn open(ctx: &Context, span: Option<CodeRange>) -> ContextSet {
    let width = ctx.syms.fresh_num("image_w", span);
    let height = ctx.syms.fresh_num("image_h", span);
    let ctx = ctx
        .guarantee(&BoolExp::lte(NumExp::int(1, span), width.clone(), span))
        .guarantee(&BoolExp::lte(NumExp::int(1, span), height.clone(), span));
    let shape = ShapeExp::constant([width, height].into_iter().collect(), span);
    make_image(&ctx, &shape, span)
}

fn make_image(ctx: &Context, size: &ShapeExp, span: Option<CodeRange>) -> ContextSet {
    let (size_addr, ctx) = make_size(ctx, size, span);
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(crate::builtins::PIL_IMAGE_CLASS_ADDR))
            .with_attr("size", Value::Addr(size_addr))
            .with_attr("mode", Value::string("RGB", span))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// Mode conversions keep the image as-is for shape purposes.
fn identity(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let _ = span;
    ContextSet::single(ctx.set_ret_val(this))
}

/// `img.resize((w, h))` produces an image with the requested size.
fn resize(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(size) = args.get("size") else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "resize: missing size",
            span,
        )));
    };
    let Some(shape) = crate::interp::value_to_shape(ctx, size) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "resize: size must be a pair of integers",
            span,
        )));
    };
    make_image(ctx, &shape, span)
}
