//! Minimal numpy surface: arrays are modeled as tensors.

use crate::{
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{Args, flatten_dims, make_tensor, missing_arg, require, tensor_dtype, tensor_shape, unsupported_call},
    interp::Interp,
    parse::CodeRange,
    simplify,
    symexp::{BoolExp, NumExp, ShapeExp},
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
        "array" => array(ctx, args, span),
        "full" => full(interp, ctx, args, span),
        other => unsupported_call(ctx, &format!("numpy.{other}"), span),
    }
}

/// `numpy.array(x)`: copies a shaped value's shape, or infers one from
/// nested containers.
fn array(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(object) = args.get("object") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("numpy.array", "object", span)));
    };
    if let Some(shape) = tensor_shape(ctx, object) {
        let (addr, ctx) = make_tensor(ctx, &shape, &tensor_dtype(ctx, object), span);
        return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
    }
    let (shape, dtype) = super::torch::extract_data_shape(ctx, object, span);
    let (addr, ctx) = make_tensor(ctx, &shape, &dtype, span);
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn full(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(shape_value) = args.get("shape") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("numpy.full", "shape", span)));
    };
    // Accept both `zeros((2, 3))` and `zeros(4)`.
    let dims = match flatten_dims(ctx, shape_value, span) {
        Some(dims) => dims,
        None => match crate::handlers::num_exp(shape_value) {
            Some(single) => vec![single],
            None => {
                let warned = ctx.warn(ErrorKind::Unsupported, "numpy shape outside the supported forms", span);
                let (value, warned) = crate::handlers::fresh_tensor(&warned, "numpy", span);
                return ContextSet::single(warned.set_ret_val(value));
            }
        },
    };
    let obligations: Vec<BoolExp> = dims
        .iter()
        .map(|dim| simplify::boolean(&BoolExp::lte(NumExp::int(0, span), dim.clone(), span)))
        .collect();
    let out = require(interp, ctx, &obligations, "array dimensions must be non-negative", span);
    let shape = ShapeExp::constant(dims.into_iter().collect(), span);
    out.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let (addr, ctx) = make_tensor(ctx, &shape, crate::handlers::DEFAULT_DTYPE, span);
        ctx.set_ret_val(Value::Addr(addr))
    })
}
