//! Shape semantics of torch operations.
//!
//! Each handler reads typed parameters, emits its obligations through
//! `require`, and produces a tensor whose shape is a shape-algebra rewrite
//! of the inputs. Obligation messages are written for end users: they name
//! the operation and the contract that failed.

use crate::{
    builtins,
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{
        Args, DEFAULT_DTYPE, flatten_dims, fresh_tensor, make_tensor, missing_arg, num_exp, num_pair, opt_arg,
        require, tensor_dtype, tensor_shape, tuple_items, unsupported_call,
    },
    interp::{Interp, error_value, normalize_index},
    parse::CodeRange,
    simplify,
    symexp::{BoolExp, NumBop, NumExp, ShapeExp, SymExp},
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
        "conv2d" => conv2d(interp, ctx, args, span),
        "conv2d_forward" => conv2d_forward(interp, ctx, args, span),
        "nn.Conv2d" => nn_conv2d(interp, ctx, args, span),
        "nn.Linear" => nn_linear(interp, ctx, args, span),
        "nn.BatchNorm2d" => nn_batchnorm2d(ctx, args, span),
        "nn.Pool2d" => nn_pool2d(ctx, args, span),
        "nn.Identity" => nn_identity(ctx, span),
        "nn.Flatten" => nn_flatten(ctx, span),
        "linear" => linear(interp, ctx, args, span),
        "linear_forward" => linear_forward(interp, ctx, args, span),
        "batchnorm2d_forward" => batchnorm2d_forward(interp, ctx, args, span),
        "pool2d" => pool2d(interp, ctx, args, span),
        "pool2d_forward" => pool2d_forward(interp, ctx, args, span),
        "flatten_forward" => flatten_forward(interp, ctx, args, span),
        "tensor" => tensor(ctx, args, span),
        "full" => full(interp, ctx, args, span),
        "broadcast" => broadcast(interp, ctx, args, span),
        "matmul" => matmul(interp, ctx, args, span),
        "mm" => mm(interp, ctx, args, span),
        "bmm" => bmm(interp, ctx, args, span),
        "view" => view(interp, ctx, args, span),
        "reshape" => reshape(interp, ctx, args, span),
        "transpose" => transpose(interp, ctx, args, span),
        "flatten" => flatten(interp, ctx, args, span),
        "squeeze" => squeeze(interp, ctx, args, span),
        "unsqueeze" => unsqueeze(interp, ctx, args, span),
        "cat" => cat(interp, ctx, args, span),
        "stack" => stack(interp, ctx, args, span),
        "sum" | "mean" => reduce(interp, ctx, args, span, None),
        "argmax" => reduce(interp, ctx, args, span, Some("torch.int64")),
        "topk" => topk(interp, ctx, args, span),
        "narrow" => narrow(interp, ctx, args, span),
        "unary" | "unary_dim" => unary(ctx, args, span),
        "item" => item(interp, ctx, args, span),
        "getitem" => getitem(interp, ctx, args, span),
        "expand" => expand(interp, ctx, args, span),
        "permute" => permute(interp, ctx, args, span),
        other => unsupported_call(ctx, &format!("torch.{other}"), span),
    }
}

/// Allocates the result tensor on every surviving path.
fn ret_tensor(set: ContextSet, shape: &ShapeExp, dtype: &str, span: Option<CodeRange>) -> ContextSet {
    set.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let (addr, ctx) = make_tensor(ctx, shape, dtype, span);
        ctx.set_ret_val(Value::Addr(addr))
    })
}

fn dim(shape: &ShapeExp, index: i64, span: Option<CodeRange>) -> NumExp {
    simplify::num(&NumExp::index(shape.clone(), NumExp::int(index, span), span))
}

fn eq(left: NumExp, right: NumExp, span: Option<CodeRange>) -> BoolExp {
    simplify::boolean(&BoolExp::eq_num(left, right, span))
}

fn rank_is(shape: &ShapeExp, rank: i64, span: Option<CodeRange>) -> BoolExp {
    eq(shape.rank(), NumExp::int(rank, span), span)
}

/// Output spatial extent of a convolution along one axis:
/// `floor((in + 2*padding - dilation*(kernel-1) - 1) / stride) + 1`.
fn conv_out_dim(
    input: &NumExp,
    padding: &NumExp,
    dilation: &NumExp,
    kernel: &NumExp,
    stride: &NumExp,
    span: Option<CodeRange>,
) -> NumExp {
    let padded = NumExp::add(
        input.clone(),
        NumExp::mul(NumExp::int(2, span), padding.clone(), span),
        span,
    );
    let window = NumExp::add(
        NumExp::mul(
            dilation.clone(),
            NumExp::sub(kernel.clone(), NumExp::int(1, span), span),
            span,
        ),
        NumExp::int(1, span),
        span,
    );
    let numerator = NumExp::sub(padded, window, span);
    simplify::num(&NumExp::add(
        NumExp::floor_div(numerator, stride.clone(), span),
        NumExp::int(1, span),
        span,
    ))
}

fn conv2d(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let weight = args.get("weight").cloned().unwrap_or(Value::Undef);
    let bias = args.get("bias").cloned().unwrap_or(Value::None);
    conv2d_impl(
        interp,
        ctx,
        &input,
        &weight,
        &bias,
        args.get("stride"),
        args.get("padding"),
        args.get("dilation"),
        args.get("groups"),
        span,
    )
}

/// Forward pass of an `nn.Conv2d` module object.
fn conv2d_forward(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(Value::Object(module)) = args.get("self").map(|value| ctx.deref(value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("Conv2d.forward", "self", span)));
    };
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let weight = module.attrs.get("weight").cloned().unwrap_or(Value::Undef);
    let bias = module.attrs.get("bias").cloned().unwrap_or(Value::None);
    conv2d_impl(
        interp,
        ctx,
        &input,
        &weight,
        &bias,
        module.attrs.get("stride"),
        module.attrs.get("padding"),
        module.attrs.get("dilation"),
        module.attrs.get("groups"),
        span,
    )
}

#[expect(clippy::too_many_arguments, reason = "the conv contract has this arity")]
fn conv2d_impl(
    interp: &mut Interp,
    ctx: &Context,
    input: &Value,
    weight: &Value,
    bias: &Value,
    stride: Option<&Value>,
    padding: Option<&Value>,
    dilation: Option<&Value>,
    groups: Option<&Value>,
    span: Option<CodeRange>,
) -> ContextSet {
    let si = match tensor_shape(ctx, input) {
        Some(shape) => shape,
        None => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("conv2d: input must be a tensor, got {}", input.type_name()),
                span,
            )));
        }
    };
    let sw = match tensor_shape(ctx, weight) {
        Some(shape) => shape,
        None => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("conv2d: weight must be a tensor, got {}", weight.type_name()),
                span,
            )));
        }
    };
    let one = Value::int(1, span);
    let zero = Value::int(0, span);
    let Some((s0, s1)) = num_pair(ctx, stride.unwrap_or(&one), span) else {
        return degrade(ctx, "conv2d: stride outside the supported forms", span);
    };
    let Some((p0, p1)) = num_pair(ctx, padding.unwrap_or(&zero), span) else {
        return degrade(ctx, "conv2d: padding outside the supported forms", span);
    };
    let Some((d0, d1)) = num_pair(ctx, dilation.unwrap_or(&one), span) else {
        return degrade(ctx, "conv2d: dilation outside the supported forms", span);
    };
    let groups = groups.and_then(num_exp).unwrap_or_else(|| NumExp::int(1, span));

    let batch = dim(&si, 0, span);
    let in_channels = dim(&si, 1, span);
    let in_h = dim(&si, 2, span);
    let in_w = dim(&si, 3, span);
    let out_channels = dim(&sw, 0, span);
    let weight_in = dim(&sw, 1, span);
    let kernel_h = dim(&sw, 2, span);
    let kernel_w = dim(&sw, 3, span);

    let out_h = conv_out_dim(&in_h, &p0, &d0, &kernel_h, &s0, span);
    let out_w = conv_out_dim(&in_w, &p1, &d1, &kernel_w, &s1, span);

    let mut obligations = vec![
        rank_is(&si, 4, span),
        rank_is(&sw, 4, span),
        eq(in_channels.clone(), weight_in, span),
        eq(
            simplify::num(&NumExp::bop(NumBop::Mod, in_channels, groups.clone(), span)),
            NumExp::int(0, span),
            span,
        ),
        eq(
            simplify::num(&NumExp::bop(NumBop::Mod, out_channels.clone(), groups, span)),
            NumExp::int(0, span),
            span,
        ),
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), out_h.clone(), span)),
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), out_w.clone(), span)),
    ];
    if !matches!(bias, Value::None) {
        if let Some(sb) = tensor_shape(ctx, bias) {
            obligations.push(rank_is(&sb, 1, span));
            let bias_channels = dim(&sb, 0, span);
            obligations.push(simplify::boolean(&BoolExp::or(
                eq(bias_channels.clone(), out_channels.clone(), span),
                eq(bias_channels, NumExp::int(-1, span), span),
                span,
            )));
        } else {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "conv2d: bias must be a tensor or None",
                span,
            )));
        }
    }

    let out = require(
        interp,
        ctx,
        &obligations,
        "conv2d: input and weight must be rank-4 with matching channel counts and a non-negative output size",
        span,
    );
    let result = ShapeExp::constant([batch, out_channels, out_h, out_w].into_iter().collect(), span);
    ret_tensor(out, &result, &tensor_dtype(ctx, input), span)
}

fn degrade(ctx: &Context, message: &str, span: Option<CodeRange>) -> ContextSet {
    let warned = ctx.warn(ErrorKind::Unsupported, message, span);
    let (value, warned) = fresh_tensor(&warned, "tensor", span);
    ContextSet::single(warned.set_ret_val(value))
}

/// `nn.Conv2d(...)`: builds the module object carrying its weight tensor.
fn nn_conv2d(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (Some(in_channels), Some(out_channels)) = (
        args.get("in_channels").and_then(num_exp),
        args.get("out_channels").and_then(num_exp),
    ) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("nn.Conv2d", "in_channels/out_channels", span)));
    };
    let Some(kernel) = args.get("kernel_size") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("nn.Conv2d", "kernel_size", span)));
    };
    let Some((kh, kw)) = num_pair(ctx, kernel, span) else {
        return degrade(ctx, "nn.Conv2d: kernel_size outside the supported forms", span);
    };
    let groups = args.get("groups").and_then(num_exp).unwrap_or_else(|| NumExp::int(1, span));

    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(1, span), in_channels.clone(), span)),
        simplify::boolean(&BoolExp::lte(NumExp::int(1, span), out_channels.clone(), span)),
        eq(
            simplify::num(&NumExp::bop(NumBop::Mod, in_channels.clone(), groups.clone(), span)),
            NumExp::int(0, span),
            span,
        ),
        eq(
            simplify::num(&NumExp::bop(NumBop::Mod, out_channels.clone(), groups.clone(), span)),
            NumExp::int(0, span),
            span,
        ),
    ];
    let out = require(
        interp,
        ctx,
        &obligations,
        "nn.Conv2d: channel counts must be positive and divisible by groups",
        span,
    );

    let weight_in = simplify::num(&NumExp::floor_div(in_channels, groups, span));
    let weight_shape = ShapeExp::constant([out_channels.clone(), weight_in, kh, kw].into_iter().collect(), span);
    let with_bias = !matches!(args.get("bias"), Some(Value::Bool(flag)) if flag.as_const() == Some(false));
    let stride = args.get("stride").cloned().unwrap_or(Value::int(1, span));
    let padding = args.get("padding").cloned().unwrap_or(Value::int(0, span));
    let dilation = args.get("dilation").cloned().unwrap_or(Value::int(1, span));
    let groups_value = args.get("groups").cloned().unwrap_or(Value::int(1, span));

    out.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let (weight_addr, ctx) = make_tensor(ctx, &weight_shape, DEFAULT_DTYPE, span);
        let (bias_value, ctx) = if with_bias {
            let bias_shape = ShapeExp::constant([out_channels.clone()].into_iter().collect(), span);
            let (bias_addr, ctx) = make_tensor(&ctx, &bias_shape, DEFAULT_DTYPE, span);
            (Value::Addr(bias_addr), ctx)
        } else {
            (Value::None, ctx)
        };
        let (addr, ctx) = ctx.place_object(span, |obj| {
            obj.with_attr("$class", Value::Addr(builtins::CONV2D_CLASS_ADDR))
                .with_attr("weight", Value::Addr(weight_addr))
                .with_attr("bias", bias_value.clone())
                .with_attr("stride", stride.clone())
                .with_attr("padding", padding.clone())
                .with_attr("dilation", dilation.clone())
                .with_attr("groups", groups_value.clone())
        });
        ctx.set_ret_val(Value::Addr(addr))
    })
}

fn nn_linear(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (Some(in_features), Some(out_features)) = (
        args.get("in_features").and_then(num_exp),
        args.get("out_features").and_then(num_exp),
    ) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("nn.Linear", "in_features/out_features", span)));
    };
    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(1, span), in_features.clone(), span)),
        simplify::boolean(&BoolExp::lte(NumExp::int(1, span), out_features.clone(), span)),
    ];
    let out = require(interp, ctx, &obligations, "nn.Linear: feature counts must be positive", span);
    let weight_shape = ShapeExp::constant([out_features.clone(), in_features].into_iter().collect(), span);
    let with_bias = !matches!(args.get("bias"), Some(Value::Bool(flag)) if flag.as_const() == Some(false));
    out.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let (weight_addr, ctx) = make_tensor(ctx, &weight_shape, DEFAULT_DTYPE, span);
        let (bias_value, ctx) = if with_bias {
            let bias_shape = ShapeExp::constant([out_features.clone()].into_iter().collect(), span);
            let (bias_addr, ctx) = make_tensor(&ctx, &bias_shape, DEFAULT_DTYPE, span);
            (Value::Addr(bias_addr), ctx)
        } else {
            (Value::None, ctx)
        };
        let (addr, ctx) = ctx.place_object(span, |obj| {
            obj.with_attr("$class", Value::Addr(builtins::LINEAR_CLASS_ADDR))
                .with_attr("weight", Value::Addr(weight_addr))
                .with_attr("bias", bias_value.clone())
        });
        ctx.set_ret_val(Value::Addr(addr))
    })
}

fn nn_batchnorm2d(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(num_features) = args.get("num_features").and_then(num_exp) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("nn.BatchNorm2d", "num_features", span)));
    };
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(builtins::BATCHNORM2D_CLASS_ADDR))
            .with_attr("num_features", Value::Int(num_features.clone()))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn nn_pool2d(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(kernel) = args.get("kernel_size") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("nn.Pool2d", "kernel_size", span)));
    };
    let stride = match opt_arg(args, "stride") {
        Some(stride) => stride.clone(),
        None => kernel.clone(),
    };
    let padding = args.get("padding").cloned().unwrap_or(Value::int(0, span));
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(builtins::POOL2D_CLASS_ADDR))
            .with_attr("kernel_size", kernel.clone())
            .with_attr("stride", stride.clone())
            .with_attr("padding", padding.clone())
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn nn_identity(ctx: &Context, span: Option<CodeRange>) -> ContextSet {
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(builtins::IDENTITY_MODULE_CLASS_ADDR))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn nn_flatten(ctx: &Context, span: Option<CodeRange>) -> ContextSet {
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(builtins::FLATTEN_CLASS_ADDR))
            .with_attr("start_dim", Value::int(1, span))
            .with_attr("end_dim", Value::int(-1, span))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn linear(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let weight = args.get("weight").cloned().unwrap_or(Value::Undef);
    let bias = args.get("bias").cloned().unwrap_or(Value::None);
    linear_impl(interp, ctx, &input, &weight, &bias, span)
}

fn linear_forward(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(Value::Object(module)) = args.get("self").map(|value| ctx.deref(value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("Linear.forward", "self", span)));
    };
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let weight = module.attrs.get("weight").cloned().unwrap_or(Value::Undef);
    let bias = module.attrs.get("bias").cloned().unwrap_or(Value::None);
    linear_impl(interp, ctx, &input, &weight, &bias, span)
}

/// `linear(input, weight, bias)`: contracts over the last input dim.
fn linear_impl(
    interp: &mut Interp,
    ctx: &Context,
    input: &Value,
    weight: &Value,
    bias: &Value,
    span: Option<CodeRange>,
) -> ContextSet {
    let (Some(si), Some(sw)) = (tensor_shape(ctx, input), tensor_shape(ctx, weight)) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "linear: input and weight must be tensors",
            span,
        )));
    };
    let rank = si.rank();
    let Some(rank_const) = rank.as_int() else {
        return degrade(ctx, "linear: input rank is symbolic", span);
    };
    if rank_const < 1 {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "linear: input must have at least one dimension",
            span,
        )));
    }
    let last = dim(&si, rank_const - 1, span);
    let out_features = dim(&sw, 0, span);
    let mut obligations = vec![rank_is(&sw, 2, span), eq(last, dim(&sw, 1, span), span)];
    if !matches!(bias, Value::None)
        && let Some(sb) = tensor_shape(ctx, bias)
    {
        obligations.push(rank_is(&sb, 1, span));
        obligations.push(eq(dim(&sb, 0, span), out_features.clone(), span));
    }
    let out = require(
        interp,
        ctx,
        &obligations,
        "linear: the last input dimension must match the weight's input features",
        span,
    );
    let result = simplify::shape(&ShapeExp::set(
        si,
        NumExp::int(rank_const - 1, span),
        out_features,
        span,
    ));
    ret_tensor(out, &result, &tensor_dtype(ctx, input), span)
}

fn batchnorm2d_forward(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(Value::Object(module)) = args.get("self").map(|value| ctx.deref(value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("BatchNorm2d.forward", "self", span)));
    };
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "BatchNorm2d: input must be a tensor",
            span,
        )));
    };
    let num_features = match module.attrs.get("num_features") {
        Some(Value::Int(exp)) => exp.clone(),
        _ => return degrade(ctx, "BatchNorm2d: missing feature count", span),
    };
    let obligations = vec![rank_is(&si, 4, span), eq(dim(&si, 1, span), num_features, span)];
    let out = require(
        interp,
        ctx,
        &obligations,
        "BatchNorm2d: input must be rank-4 with the declared channel count",
        span,
    );
    ret_tensor(out, &si, &tensor_dtype(ctx, &input), span)
}

fn pool2d(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let kernel = args.get("kernel_size").cloned().unwrap_or(Value::Undef);
    let stride = match opt_arg(args, "stride") {
        Some(stride) => stride.clone(),
        None => kernel.clone(),
    };
    let padding = args.get("padding").cloned().unwrap_or(Value::int(0, span));
    pool2d_impl(interp, ctx, &input, &kernel, &stride, &padding, span)
}

fn pool2d_forward(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(Value::Object(module)) = args.get("self").map(|value| ctx.deref(value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("Pool2d.forward", "self", span)));
    };
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let kernel = module.attrs.get("kernel_size").cloned().unwrap_or(Value::Undef);
    let stride = module.attrs.get("stride").cloned().unwrap_or_else(|| kernel.clone());
    let padding = module.attrs.get("padding").cloned().unwrap_or(Value::int(0, span));
    pool2d_impl(interp, ctx, &input, &kernel, &stride, &padding, span)
}

fn pool2d_impl(
    interp: &mut Interp,
    ctx: &Context,
    input: &Value,
    kernel: &Value,
    stride: &Value,
    padding: &Value,
    span: Option<CodeRange>,
) -> ContextSet {
    let Some(si) = tensor_shape(ctx, input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "pool2d: input must be a tensor",
            span,
        )));
    };
    let (Some((kh, kw)), Some((s0, s1)), Some((p0, p1))) = (
        num_pair(ctx, kernel, span),
        num_pair(ctx, stride, span),
        num_pair(ctx, padding, span),
    ) else {
        return degrade(ctx, "pool2d: parameters outside the supported forms", span);
    };
    let one = NumExp::int(1, span);
    let out_h = conv_out_dim(&dim(&si, 2, span), &p0, &one, &kh, &s0, span);
    let out_w = conv_out_dim(&dim(&si, 3, span), &p1, &one, &kw, &s1, span);
    let obligations = vec![
        rank_is(&si, 4, span),
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), out_h.clone(), span)),
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), out_w.clone(), span)),
    ];
    let out = require(
        interp,
        ctx,
        &obligations,
        "pool2d: input must be rank-4 and the window must fit",
        span,
    );
    let result = ShapeExp::constant(
        [dim(&si, 0, span), dim(&si, 1, span), out_h, out_w].into_iter().collect(),
        span,
    );
    ret_tensor(out, &result, &tensor_dtype(ctx, input), span)
}

fn flatten_forward(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(Value::Object(module)) = args.get("self").map(|value| ctx.deref(value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("Flatten.forward", "self", span)));
    };
    let mut forwarded = Args::new();
    forwarded.insert("input".to_owned(), args.get("input").cloned().unwrap_or(Value::Undef));
    forwarded.insert(
        "start_dim".to_owned(),
        module.attrs.get("start_dim").cloned().unwrap_or(Value::int(1, span)),
    );
    forwarded.insert(
        "end_dim".to_owned(),
        module.attrs.get("end_dim").cloned().unwrap_or(Value::int(-1, span)),
    );
    flatten(interp, ctx, &forwarded, span)
}

/// `torch.tensor(data)`: infers the shape of nested list data.
fn tensor(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(data) = args.get("data") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("torch.tensor", "data", span)));
    };
    // A tensor argument copies its shape.
    if let Some(shape) = tensor_shape(ctx, data) {
        let (addr, ctx) = make_tensor(ctx, &shape, &tensor_dtype(ctx, data), span);
        return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
    }
    let (shape, dtype) = extract_data_shape(ctx, data, span);
    let (addr, ctx) = make_tensor(ctx, &shape, &dtype, span);
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// Nested-container shape inference. Only the first element of each level is
/// inspected; sibling consistency is not checked.
pub(crate) fn extract_data_shape(ctx: &Context, data: &Value, span: Option<CodeRange>) -> (ShapeExp, String) {
    let mut dims = Vec::new();
    let mut current = data.clone();
    let mut dtype = DEFAULT_DTYPE.to_owned();
    for _ in 0..16 {
        match ctx.deref(&current) {
            Value::Object(obj) => {
                match obj.length_exp() {
                    Some(length) => dims.push(length.clone()),
                    None => break,
                }
                match obj.indices.get(&0) {
                    Some(first) => current = first.clone(),
                    None => break,
                }
            }
            Value::Int(_) => {
                dtype = "torch.int64".to_owned();
                break;
            }
            Value::Float(_) => break,
            _ => break,
        }
    }
    (ShapeExp::constant(dims.into_iter().collect(), span), dtype)
}

/// `torch.zeros` / `ones` / `rand` / `randn` / `empty`.
fn full(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(size) = args.get("size") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("torch.full", "size", span)));
    };
    let Some(dims) = flatten_dims(ctx, size, span) else {
        return degrade(ctx, "torch.full: size outside the supported forms", span);
    };
    let obligations: Vec<BoolExp> = dims
        .iter()
        .map(|dim| simplify::boolean(&BoolExp::lte(NumExp::int(0, span), dim.clone(), span)))
        .collect();
    let out = require(interp, ctx, &obligations, "tensor dimensions must be non-negative", span);
    let shape = ShapeExp::constant(dims.into_iter().collect(), span);
    ret_tensor(out, &shape, DEFAULT_DTYPE, span)
}

/// Elementwise binop between a tensor and a tensor or scalar.
fn broadcast(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let other = args.get("other").cloned().unwrap_or(Value::Undef);
    let Some(sl) = tensor_shape(ctx, &this) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "tensor operator on a non-tensor receiver",
            span,
        )));
    };
    // Scalar operand: shape unchanged.
    if num_exp(&other).is_some() {
        let (addr, ctx) = make_tensor(ctx, &sl, &tensor_dtype(ctx, &this), span);
        return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
    }
    let Some(sr) = tensor_shape(ctx, &other) else {
        return ContextSet::single(ctx.set_ret_val(Value::NotImpl(Some(
            "tensor operator needs a tensor or scalar".to_owned(),
        ))));
    };
    let cond = crate::handlers::shape::broadcastable_cond(&sl, &sr, span);
    let out = require(
        interp,
        ctx,
        &[cond],
        "operands must be broadcastable to a common shape",
        span,
    );
    let result = simplify::shape(&ShapeExp::broadcast(sl, sr, span));
    ret_tensor(out, &result, &tensor_dtype(ctx, &this), span)
}

fn matmul(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let other = args.get("other").cloned().unwrap_or(Value::Undef);
    let (sa, sb) = match (tensor_shape(ctx, &input), tensor_shape(ctx, &other)) {
        (Some(sa), Some(sb)) => (sa, sb),
        _ => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "matmul: both operands must be tensors",
                span,
            )));
        }
    };
    let (Some(ra), Some(rb)) = (sa.rank_const(), sb.rank_const()) else {
        return degrade(ctx, "matmul: symbolic operand rank", span);
    };
    let dtype = tensor_dtype(ctx, &input);
    let one = NumExp::int(1, span);
    let positive =
        |exp: NumExp| -> BoolExp { simplify::boolean(&BoolExp::lte(one.clone(), exp, span)) };

    let (obligations, result): (Vec<BoolExp>, ShapeExp) = match (ra, rb) {
        (0, _) | (_, 0) => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "matmul: operands must be at least rank-1",
                span,
            )));
        }
        (1, 1) => (
            vec![positive(dim(&sa, 0, span)), eq(dim(&sa, 0, span), dim(&sb, 0, span), span)],
            ShapeExp::scalar(span),
        ),
        (1, 2) => (
            vec![
                positive(dim(&sa, 0, span)),
                positive(dim(&sb, 1, span)),
                eq(dim(&sa, 0, span), dim(&sb, 0, span), span),
            ],
            ShapeExp::constant([dim(&sb, 1, span)].into_iter().collect(), span),
        ),
        (2, 1) => (
            vec![
                positive(dim(&sa, 0, span)),
                positive(dim(&sa, 1, span)),
                eq(dim(&sa, 1, span), dim(&sb, 0, span), span),
            ],
            ShapeExp::constant([dim(&sa, 0, span)].into_iter().collect(), span),
        ),
        (2, 2) => (
            vec![
                positive(dim(&sa, 0, span)),
                positive(dim(&sa, 1, span)),
                positive(dim(&sb, 1, span)),
                eq(dim(&sa, 1, span), dim(&sb, 0, span), span),
            ],
            ShapeExp::constant([dim(&sa, 0, span), dim(&sb, 1, span)].into_iter().collect(), span),
        ),
        _ => {
            // Batched: broadcast the batch prefixes, then contract the last
            // two dims.
            let batch_a = ShapeExp::slice(sa.clone(), None, Some(NumExp::int(ra - 2, span)), span);
            let batch_b = ShapeExp::slice(sb.clone(), None, Some(NumExp::int(rb - 2, span)), span);
            let batch = simplify::shape(&ShapeExp::broadcast(batch_a, batch_b, span));
            let tail = ShapeExp::constant(
                [dim(&sa, ra - 2, span), dim(&sb, rb - 1, span)].into_iter().collect(),
                span,
            );
            let result = simplify::shape(&ShapeExp::concat(batch, tail, span));
            (
                vec![eq(dim(&sa, ra - 1, span), dim(&sb, rb - 2, span), span)],
                result,
            )
        }
    };
    let out = require(
        interp,
        ctx,
        &obligations,
        "matmul: inner dimensions must agree and operands must be non-empty",
        span,
    );
    ret_tensor(out, &result, &dtype, span)
}

fn mm(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let mat2 = args.get("mat2").cloned().unwrap_or(Value::Undef);
    let (sa, sb) = match (tensor_shape(ctx, &input), tensor_shape(ctx, &mat2)) {
        (Some(sa), Some(sb)) => (sa, sb),
        _ => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "mm: both operands must be tensors",
                span,
            )));
        }
    };
    let obligations = vec![
        rank_is(&sa, 2, span),
        rank_is(&sb, 2, span),
        eq(dim(&sa, 1, span), dim(&sb, 0, span), span),
    ];
    let out = require(interp, ctx, &obligations, "mm: expects rank-2 operands with matching inner dims", span);
    let result = ShapeExp::constant([dim(&sa, 0, span), dim(&sb, 1, span)].into_iter().collect(), span);
    ret_tensor(out, &result, &tensor_dtype(ctx, &input), span)
}

fn bmm(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let mat2 = args.get("mat2").cloned().unwrap_or(Value::Undef);
    let (sa, sb) = match (tensor_shape(ctx, &input), tensor_shape(ctx, &mat2)) {
        (Some(sa), Some(sb)) => (sa, sb),
        _ => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "bmm: both operands must be tensors",
                span,
            )));
        }
    };
    let obligations = vec![
        rank_is(&sa, 3, span),
        rank_is(&sb, 3, span),
        eq(dim(&sa, 0, span), dim(&sb, 0, span), span),
        eq(dim(&sa, 2, span), dim(&sb, 1, span), span),
    ];
    let out = require(
        interp,
        ctx,
        &obligations,
        "bmm: expects rank-3 operands with matching batch and inner dims",
        span,
    );
    let result = ShapeExp::constant(
        [dim(&sa, 0, span), dim(&sa, 1, span), dim(&sb, 2, span)].into_iter().collect(),
        span,
    );
    ret_tensor(out, &result, &tensor_dtype(ctx, &input), span)
}

/// `view` / tensor `reshape`: dims come as varargs, `-1` is the wildcard.
fn view(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let Some(dims_value) = args.get("dims") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("view", "dims", span)));
    };
    let Some(dims) = flatten_dims(ctx, dims_value, span) else {
        return degrade(ctx, "view: a wildcard must appear inside a constant-rank tuple", span);
    };
    view_impl(interp, ctx, &this, dims, span)
}

fn reshape(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(shape_value) = args.get("shape") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("reshape", "shape", span)));
    };
    let Some(items) = tuple_items(ctx, shape_value) else {
        return degrade(ctx, "reshape: shape outside the supported forms", span);
    };
    let dims: Option<Vec<NumExp>> = items.iter().map(num_exp).collect();
    let Some(dims) = dims else {
        return degrade(ctx, "reshape: shape entries must be integers", span);
    };
    view_impl(interp, ctx, &input, dims, span)
}

fn view_impl(
    interp: &mut Interp,
    ctx: &Context,
    input: &Value,
    dims: Vec<NumExp>,
    span: Option<CodeRange>,
) -> ContextSet {
    let Some(si) = tensor_shape(ctx, input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "view: receiver must be a tensor",
            span,
        )));
    };
    let numel = simplify::num(&NumExp::numel(si, span));
    let wildcards = dims.iter().filter(|dim| dim.as_int() == Some(-1)).count();
    if wildcards > 1 {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "view: only one dimension may be -1",
            span,
        )));
    }
    let mut known_product = NumExp::int(1, span);
    for dim in &dims {
        if dim.as_int() != Some(-1) {
            known_product = NumExp::mul(known_product, dim.clone(), span);
        }
    }
    let known_product = simplify::num(&known_product);

    let (result_dims, obligations) = if wildcards == 1 {
        let wildcard = simplify::num(&NumExp::floor_div(numel.clone(), known_product.clone(), span));
        let resolved: Vec<NumExp> = dims
            .into_iter()
            .map(|dim| if dim.as_int() == Some(-1) { wildcard.clone() } else { dim })
            .collect();
        // The known dims must divide the element count evenly.
        let divisible = eq(
            simplify::num(&NumExp::mul(known_product, wildcard, span)),
            numel,
            span,
        );
        (resolved, vec![divisible])
    } else {
        let same_numel = eq(known_product, numel, span);
        (dims, vec![same_numel])
    };

    let out = require(
        interp,
        ctx,
        &obligations,
        "view: the new shape must cover exactly the same number of elements",
        span,
    );
    let result = ShapeExp::constant(result_dims.into_iter().collect(), span);
    ret_tensor(out, &result, &tensor_dtype(ctx, input), span)
}

fn transpose(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "transpose: input must be a tensor",
            span,
        )));
    };
    let (Some(d0), Some(d1)) = (args.get("dim0").and_then(num_exp), args.get("dim1").and_then(num_exp)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("transpose", "dim0/dim1", span)));
    };
    let rank = si.rank();
    let d0 = normalize_index(&d0, &rank, span);
    let d1 = normalize_index(&d1, &rank, span);
    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), d0.clone(), span)),
        simplify::boolean(&BoolExp::lt(d0.clone(), rank.clone(), span)),
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), d1.clone(), span)),
        simplify::boolean(&BoolExp::lt(d1.clone(), rank, span)),
    ];
    let out = require(interp, ctx, &obligations, "transpose: dims must be inside the rank", span);
    let v0 = simplify::num(&NumExp::index(si.clone(), d0.clone(), span));
    let v1 = simplify::num(&NumExp::index(si.clone(), d1.clone(), span));
    let swapped = ShapeExp::set(ShapeExp::set(si, d0, v1, span), d1, v0, span);
    let result = simplify::shape(&swapped);
    ret_tensor(out, &result, &tensor_dtype(ctx, &input), span)
}

fn flatten(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "flatten: input must be a tensor",
            span,
        )));
    };
    let Some(rank) = si.rank_const() else {
        return degrade(ctx, "flatten: symbolic input rank", span);
    };
    let start = args
        .get("start_dim")
        .and_then(num_exp)
        .and_then(|exp| exp.as_int())
        .unwrap_or(0);
    let end = args
        .get("end_dim")
        .and_then(num_exp)
        .and_then(|exp| exp.as_int())
        .unwrap_or(-1);
    let start = if start < 0 { start + rank } else { start };
    let end = if end < 0 { end + rank } else { end };
    if start < 0 || end >= rank || start > end {
        let message = format!("flatten: dims [{start}, {end}] are outside rank {rank}");
        return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
    }
    let mut product = NumExp::int(1, span);
    for i in start..=end {
        product = NumExp::mul(product, dim(&si, i, span), span);
    }
    let product = simplify::num(&product);
    let head = ShapeExp::slice(si.clone(), None, Some(NumExp::int(start, span)), span);
    let tail = ShapeExp::slice(si, Some(NumExp::int(end + 1, span)), None, span);
    let middle = ShapeExp::constant([product].into_iter().collect(), span);
    let result = simplify::shape(&ShapeExp::concat(ShapeExp::concat(head, middle, span), tail, span));
    let out = ContextSet::single(ctx.clone());
    ret_tensor(out, &result, &tensor_dtype(ctx, &input), span)
}

/// `squeeze`: drops size-1 dims; forks when a dim's unity is undecided.
fn squeeze(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "squeeze: input must be a tensor",
            span,
        )));
    };
    let dtype = tensor_dtype(ctx, &input);
    let Some(dims) = simplify::shape(&si).as_const_dims().cloned() else {
        return degrade(ctx, "squeeze: symbolic input rank", span);
    };
    match opt_arg(args, "dim").and_then(num_exp) {
        Some(target) => {
            let rank = NumExp::int(dims.len() as i64, span);
            let target = normalize_index(&target, &rank, span);
            let Some(target_const) = target.as_int() else {
                return degrade(ctx, "squeeze: symbolic dim", span);
            };
            if target_const < 0 || target_const >= dims.len() as i64 {
                let message = format!("squeeze: dim {target_const} is outside rank {}", dims.len());
                return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
            }
            let unity = eq(dims[target_const as usize].clone(), NumExp::int(1, span), span);
            let (then_set, else_set) =
                ContextSet::single(ctx.clone()).if_then_else(|_| unity.clone(), span, interp.oracle);
            interp.tracer.on_fork(then_set.live().len(), else_set.live().len(), span);
            let mut squeezed = dims.clone();
            squeezed.remove(target_const as usize);
            let squeezed_shape = ShapeExp::constant(squeezed, span);
            let same_shape = ShapeExp::constant(dims, span);
            ret_tensor(then_set, &squeezed_shape, &dtype, span).join(&ret_tensor(else_set, &same_shape, &dtype, span))
        }
        None => {
            // Without a dim only statically-known unit dims are removed.
            let kept: crate::symexp::Dims = dims.into_iter().filter(|dim| dim.as_int() != Some(1)).collect();
            let result = ShapeExp::constant(kept, span);
            ret_tensor(ContextSet::single(ctx.clone()), &result, &dtype, span)
        }
    }
}

fn unsqueeze(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "unsqueeze: input must be a tensor",
            span,
        )));
    };
    let Some(target) = args.get("dim").and_then(num_exp) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("unsqueeze", "dim", span)));
    };
    let rank = si.rank();
    // Negative dims insert after the end: dim = dim + rank + 1.
    let target = match target.as_int() {
        Some(k) if k < 0 => simplify::num(&NumExp::add(
            NumExp::int(k + 1, span),
            rank.clone(),
            span,
        )),
        _ => target,
    };
    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), target.clone(), span)),
        simplify::boolean(&BoolExp::lte(target.clone(), rank, span)),
    ];
    let out = require(interp, ctx, &obligations, "unsqueeze: dim must be within rank+1", span);
    let head = ShapeExp::slice(si.clone(), None, Some(target.clone()), span);
    let tail = ShapeExp::slice(si, Some(target), None, span);
    let unit = ShapeExp::constant([NumExp::int(1, span)].into_iter().collect(), span);
    let result = simplify::shape(&ShapeExp::concat(ShapeExp::concat(head, unit, span), tail, span));
    ret_tensor(out, &result, &tensor_dtype(ctx, &input), span)
}

fn cat(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(tensors) = args.get("tensors").and_then(|value| tuple_items(ctx, value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("cat", "tensors", span)));
    };
    let shapes: Option<Vec<ShapeExp>> = tensors.iter().map(|tensor| tensor_shape(ctx, tensor)).collect();
    let Some(shapes) = shapes else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "cat: every element must be a tensor",
            span,
        )));
    };
    if shapes.is_empty() {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "cat: expected a non-empty sequence of tensors",
            span,
        )));
    }
    let Some(rank) = shapes[0].rank_const() else {
        return degrade(ctx, "cat: symbolic tensor rank", span);
    };
    let target = args.get("dim").and_then(num_exp).unwrap_or_else(|| NumExp::int(0, span));
    let target = normalize_index(&target, &NumExp::int(rank, span), span);
    let Some(target_const) = target.as_int() else {
        return degrade(ctx, "cat: symbolic dim", span);
    };
    if target_const < 0 || target_const >= rank {
        let message = format!("cat: dim {target_const} is outside rank {rank}");
        return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
    }

    let mut obligations = Vec::new();
    let mut total = dim(&shapes[0], target_const, span);
    for shape in &shapes[1..] {
        obligations.push(rank_is(shape, rank, span));
        for axis in 0..rank {
            if axis != target_const {
                obligations.push(eq(dim(&shapes[0], axis, span), dim(shape, axis, span), span));
            }
        }
        total = NumExp::add(total, dim(shape, target_const, span), span);
    }
    let total = simplify::num(&total);
    let out = require(
        interp,
        ctx,
        &obligations,
        "cat: tensors must share every dimension except the concatenated one",
        span,
    );
    let result = simplify::shape(&ShapeExp::set(shapes[0].clone(), NumExp::int(target_const, span), total, span));
    ret_tensor(out, &result, &tensor_dtype(ctx, &tensors[0]), span)
}

fn stack(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(tensors) = args.get("tensors").and_then(|value| tuple_items(ctx, value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("stack", "tensors", span)));
    };
    let shapes: Option<Vec<ShapeExp>> = tensors.iter().map(|tensor| tensor_shape(ctx, tensor)).collect();
    let Some(shapes) = shapes else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "stack: every element must be a tensor",
            span,
        )));
    };
    if shapes.is_empty() {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "stack: expected a non-empty sequence of tensors",
            span,
        )));
    }
    let Some(rank) = shapes[0].rank_const() else {
        return degrade(ctx, "stack: symbolic tensor rank", span);
    };
    let target = args.get("dim").and_then(num_exp).unwrap_or_else(|| NumExp::int(0, span));
    let Some(target_const) = normalize_index(&target, &NumExp::int(rank + 1, span), span).as_int() else {
        return degrade(ctx, "stack: symbolic dim", span);
    };
    if target_const < 0 || target_const > rank {
        let message = format!("stack: dim {target_const} is outside rank {rank} + 1");
        return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
    }
    let mut obligations = Vec::new();
    for shape in &shapes[1..] {
        obligations.push(simplify::boolean(&BoolExp::eq_exp(
            SymExp::Shape(shapes[0].clone()),
            SymExp::Shape(shape.clone()),
            span,
        )));
    }
    let out = require(interp, ctx, &obligations, "stack: all tensors must share one shape", span);
    let count = NumExp::int(tensors.len() as i64, span);
    let head = ShapeExp::slice(shapes[0].clone(), None, Some(NumExp::int(target_const, span)), span);
    let tail = ShapeExp::slice(shapes[0].clone(), Some(NumExp::int(target_const, span)), None, span);
    let middle = ShapeExp::constant([count].into_iter().collect(), span);
    let result = simplify::shape(&ShapeExp::concat(ShapeExp::concat(head, middle, span), tail, span));
    ret_tensor(out, &result, &tensor_dtype(ctx, &tensors[0]), span)
}

/// `sum` / `mean` / `argmax`: full reduction or along one dim. A forced
/// dtype overrides the input's (index results are integral).
fn reduce(
    interp: &mut Interp,
    ctx: &Context,
    args: &Args,
    span: Option<CodeRange>,
    forced_dtype: Option<&str>,
) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "reduction: input must be a tensor",
            span,
        )));
    };
    let dtype = forced_dtype.map_or_else(|| tensor_dtype(ctx, &input), str::to_owned);
    let dtype = dtype.as_str();
    let keepdim = matches!(args.get("keepdim"), Some(Value::Bool(flag)) if flag.as_const() == Some(true));
    match opt_arg(args, "dim").and_then(num_exp) {
        None => {
            let result = ShapeExp::scalar(span);
            ret_tensor(ContextSet::single(ctx.clone()), &result, dtype, span)
        }
        Some(target) => {
            let rank = si.rank();
            let target = normalize_index(&target, &rank, span);
            let obligations = vec![
                simplify::boolean(&BoolExp::lte(NumExp::int(0, span), target.clone(), span)),
                simplify::boolean(&BoolExp::lt(target.clone(), rank, span)),
            ];
            let out = require(interp, ctx, &obligations, "reduction dim must be inside the rank", span);
            let result = if keepdim {
                simplify::shape(&ShapeExp::set(si, target, NumExp::int(1, span), span))
            } else {
                let head = ShapeExp::slice(si.clone(), None, Some(target.clone()), span);
                let tail = ShapeExp::slice(
                    si,
                    Some(simplify::num(&NumExp::add(target, NumExp::int(1, span), span))),
                    None,
                    span,
                );
                simplify::shape(&ShapeExp::concat(head, tail, span))
            };
            ret_tensor(out, &result, dtype, span)
        }
    }
}

/// `topk`: a (values, indices) pair with the chosen dim narrowed to `k`.
fn topk(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "topk: input must be a tensor",
            span,
        )));
    };
    let Some(k) = args.get("k").and_then(num_exp) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("topk", "k", span)));
    };
    let rank = si.rank();
    let target = args.get("dim").and_then(num_exp).unwrap_or_else(|| NumExp::int(-1, span));
    let target = normalize_index(&target, &rank, span);
    let current = simplify::num(&NumExp::index(si.clone(), target.clone(), span));
    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), k.clone(), span)),
        simplify::boolean(&BoolExp::lte(k.clone(), current, span)),
    ];
    let out = require(interp, ctx, &obligations, "topk: k must fit the selected dimension", span);
    let result = simplify::shape(&ShapeExp::set(si, target, k, span));
    let dtype = tensor_dtype(ctx, &input);
    out.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let (values_addr, ctx) = make_tensor(ctx, &result, &dtype, span);
        let (indices_addr, ctx) = make_tensor(&ctx, &result, "torch.int64", span);
        let (pair_addr, ctx) = crate::interp::make_tuple(
            &ctx,
            vec![Value::Addr(values_addr), Value::Addr(indices_addr)],
            span,
        );
        ctx.set_ret_val(Value::Addr(pair_addr))
    })
}

fn narrow(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "narrow: input must be a tensor",
            span,
        )));
    };
    let (Some(target), Some(start), Some(length)) = (
        args.get("dim").and_then(num_exp),
        args.get("start").and_then(num_exp),
        args.get("length").and_then(num_exp),
    ) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("narrow", "dim/start/length", span)));
    };
    let rank = si.rank();
    let target = normalize_index(&target, &rank, span);
    let current = simplify::num(&NumExp::index(si.clone(), target.clone(), span));
    let end = simplify::num(&NumExp::add(start.clone(), length.clone(), span));
    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), start, span)),
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), length.clone(), span)),
        simplify::boolean(&BoolExp::lte(end, current, span)),
    ];
    let out = require(interp, ctx, &obligations, "narrow: the window must fit the dimension", span);
    let result = simplify::shape(&ShapeExp::set(si, target, length, span));
    ret_tensor(out, &result, &tensor_dtype(ctx, &input), span)
}

/// Shape-preserving elementwise ops (`relu`, `sigmoid`, `.cuda()`, ...).
fn unary(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let input = args.get("input").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &input) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "expected a tensor",
            span,
        )));
    };
    let (addr, ctx) = make_tensor(ctx, &si, &tensor_dtype(ctx, &input), span);
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// `.item()`: scalar extraction requires exactly one element.
fn item(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &this) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "item: receiver must be a tensor",
            span,
        )));
    };
    let numel = simplify::num(&NumExp::numel(si, span));
    let out = require(
        interp,
        ctx,
        &[eq(numel, NumExp::int(1, span), span)],
        "item: tensor must contain exactly one element",
        span,
    );
    out.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let fresh = ctx.syms.fresh_num("item", span);
        ctx.set_ret_val(Value::Float(fresh))
    })
}

/// Integer indexing into a tensor drops the leading dimension.
fn getitem(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let index = args.get("index").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &this) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "tensor subscript on a non-tensor",
            span,
        )));
    };
    let Some(index) = num_exp(&index) else {
        return degrade(ctx, "tensor subscript outside the supported forms", span);
    };
    let dim0 = simplify::num(&NumExp::index(si.clone(), NumExp::int(0, span), span));
    let index = normalize_index(&index, &dim0, span);
    let obligations = vec![
        simplify::boolean(&BoolExp::lte(NumExp::int(0, span), index.clone(), span)),
        simplify::boolean(&BoolExp::lt(index, dim0, span)),
    ];
    let out = require(interp, ctx, &obligations, "tensor index must be inside the first dimension", span);
    let result = simplify::shape(&ShapeExp::slice(si, Some(NumExp::int(1, span)), None, span));
    ret_tensor(out, &result, &tensor_dtype(ctx, &this), span)
}

/// `expand`: each target dim is either the source dim or the source dim is 1.
fn expand(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &this) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "expand: receiver must be a tensor",
            span,
        )));
    };
    let Some(sizes) = args.get("sizes").and_then(|value| flatten_dims(ctx, value, span)) else {
        return degrade(ctx, "expand: sizes outside the supported forms", span);
    };
    let Some(rank) = si.rank_const() else {
        return degrade(ctx, "expand: symbolic input rank", span);
    };
    if (sizes.len() as i64) < rank {
        let message = format!("expand: {} sizes cannot cover rank {rank}", sizes.len());
        return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
    }
    let offset = sizes.len() as i64 - rank;
    let mut obligations = Vec::new();
    let mut result_dims = Vec::with_capacity(sizes.len());
    for (i, size) in sizes.iter().enumerate() {
        let i = i as i64;
        if i < offset {
            result_dims.push(size.clone());
            continue;
        }
        let source = dim(&si, i - offset, span);
        if size.as_int() == Some(-1) {
            result_dims.push(source);
            continue;
        }
        obligations.push(simplify::boolean(&BoolExp::or(
            eq(source.clone(), NumExp::int(1, span), span),
            eq(source, size.clone(), span),
            span,
        )));
        result_dims.push(size.clone());
    }
    let out = require(
        interp,
        ctx,
        &obligations,
        "expand: a non-1 source dimension must match its target",
        span,
    );
    let result = ShapeExp::constant(result_dims.into_iter().collect(), span);
    ret_tensor(out, &result, &tensor_dtype(ctx, &this), span)
}

/// `permute`: the dims must be a permutation of the rank.
fn permute(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &this) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "permute: receiver must be a tensor",
            span,
        )));
    };
    let Some(dims) = args.get("dims").and_then(|value| flatten_dims(ctx, value, span)) else {
        return degrade(ctx, "permute: dims outside the supported forms", span);
    };
    let Some(rank) = si.rank_const() else {
        return degrade(ctx, "permute: symbolic input rank", span);
    };
    let indices: Option<Vec<i64>> = dims.iter().map(NumExp::as_int).collect();
    let Some(mut indices) = indices else {
        return degrade(ctx, "permute: symbolic dims", span);
    };
    for index in &mut indices {
        if *index < 0 {
            *index += rank;
        }
    }
    let mut seen = vec![false; rank.max(0) as usize];
    let valid = indices.len() as i64 == rank
        && indices.iter().all(|&index| {
            if index < 0 || index >= rank || seen[index as usize] {
                return false;
            }
            seen[index as usize] = true;
            true
        });
    if !valid {
        let message = format!("permute: dims must be a permutation of 0..{rank}");
        return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
    }
    let result_dims: crate::symexp::Dims = indices.iter().map(|&index| dim(&si, index, span)).collect();
    let result = ShapeExp::constant(result_dims, span);
    ret_tensor(ContextSet::single(ctx.clone()), &result, &tensor_dtype(ctx, &this), span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_out_dim_matches_the_formula() {
        let out = conv_out_dim(
            &NumExp::int(32, None),
            &NumExp::int(0, None),
            &NumExp::int(1, None),
            &NumExp::int(5, None),
            &NumExp::int(1, None),
            None,
        );
        assert_eq!(out.as_int(), Some(28));
        let strided = conv_out_dim(
            &NumExp::int(32, None),
            &NumExp::int(1, None),
            &NumExp::int(1, None),
            &NumExp::int(3, None),
            &NumExp::int(2, None),
            None,
        );
        assert_eq!(strided.as_int(), Some(16));
    }

    #[test]
    fn extract_data_shape_reads_first_elements() {
        let ctx = Context::new();
        let (inner, ctx) = crate::interp::make_tuple(&ctx, vec![Value::int(1, None), Value::int(2, None)], None);
        let (outer, ctx) = crate::interp::make_tuple(
            &ctx,
            vec![Value::Addr(inner), Value::Addr(inner)],
            None,
        );
        let (shape, dtype) = extract_data_shape(&ctx, &Value::Addr(outer), None);
        assert_eq!(shape, ShapeExp::from_ints(&[2, 2], None));
        assert_eq!(dtype, "torch.int64");
    }
}
