//! Size-level primitives: operations that act on shapes as values.

use crate::{
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{Args, flatten_dims, make_size, make_tensor, missing_arg, num_exp, require, tensor_dtype, tensor_shape, unsupported_call},
    interp::{Interp, error_value, normalize_index},
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
        "repeat" => repeat(interp, ctx, args, span),
        "slice" => super::structural::dispatch(interp, ctx, "slice", args, span),
        "index" => index(ctx, args, span),
        "extractShape" => extract_shape(ctx, args, span),
        "setShape" => set_shape(ctx, args, span),
        other => unsupported_call(ctx, &format!("shape.{other}"), span),
    }
}

/// Predicate for right-aligned broadcast compatibility.
///
/// With both ranks known this is a conjunction over aligned dim pairs; with
/// a symbolic rank the question is undecidable here, so a fresh boolean
/// symbol is returned and `require` records the assumption.
pub(crate) fn broadcastable_cond(shape_l: &ShapeExp, shape_r: &ShapeExp, span: Option<CodeRange>) -> BoolExp {
    let left = simplify::shape(shape_l);
    let right = simplify::shape(shape_r);
    if let (Some(l), Some(r)) = (left.as_const_dims(), right.as_const_dims()) {
        let rank = l.len().max(r.len());
        let mut conjuncts = Vec::new();
        for i in 0..rank {
            let li = (i + l.len()).checked_sub(rank).and_then(|j| l.get(j));
            let ri = (i + r.len()).checked_sub(rank).and_then(|j| r.get(j));
            if let (Some(li), Some(ri)) = (li, ri) {
                let one = NumExp::int(1, span);
                let pair_ok = BoolExp::or(
                    BoolExp::eq_num(li.clone(), one.clone(), span),
                    BoolExp::or(
                        BoolExp::eq_num(ri.clone(), one, span),
                        BoolExp::eq_num(li.clone(), ri.clone(), span),
                        span,
                    ),
                    span,
                );
                conjuncts.push(pair_ok);
            }
        }
        return simplify::boolean(&BoolExp::all_of(conjuncts, span));
    }
    // Rank unknown: leave the shapes' structural equality after broadcast
    // to the oracle.
    BoolExp::eq_exp(
        crate::symexp::SymExp::Shape(ShapeExp::broadcast(left.clone(), right.clone(), span)),
        crate::symexp::SymExp::Shape(ShapeExp::broadcast(right, left, span)),
        span,
    )
}

/// `x.repeat(sizes...)`: the result multiplies right-aligned input dims by
/// the repeat counts; extra leading counts become new dims.
fn repeat(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let Some(si) = tensor_shape(ctx, &this) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "repeat: receiver must be a tensor",
            span,
        )));
    };
    let Some(sizes) = args.get("sizes").and_then(|value| flatten_dims(ctx, value, span)) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "repeat: sizes must be integers",
            span,
        )));
    };
    let Some(rank) = si.rank_const() else {
        let warned = ctx.warn(ErrorKind::Unsupported, "repeat: symbolic receiver rank", span);
        let (value, warned) = crate::handlers::fresh_tensor(&warned, "repeat", span);
        return ContextSet::single(warned.set_ret_val(value));
    };
    if (sizes.len() as i64) < rank {
        let message = format!("repeat: {} counts cannot cover rank {rank}", sizes.len());
        return require(interp, ctx, &[BoolExp::constant(false, span)], &message, span);
    }
    let offset = sizes.len() as i64 - rank;
    let mut obligations = Vec::new();
    let mut dims = Vec::with_capacity(sizes.len());
    for (i, count) in sizes.iter().enumerate() {
        obligations.push(simplify::boolean(&BoolExp::lte(NumExp::int(0, span), count.clone(), span)));
        let i = i as i64;
        if i < offset {
            dims.push(count.clone());
        } else {
            let source = simplify::num(&NumExp::index(si.clone(), NumExp::int(i - offset, span), span));
            dims.push(simplify::num(&NumExp::mul(count.clone(), source, span)));
        }
    }
    let out = require(interp, ctx, &obligations, "repeat: counts must be non-negative", span);
    let result = ShapeExp::constant(dims.into_iter().collect(), span);
    out.map(|ctx| {
        if ctx.is_short_circuiting() {
            return ctx.clone();
        }
        let (addr, ctx) = make_tensor(ctx, &result, &tensor_dtype(ctx, &this), span);
        ctx.set_ret_val(Value::Addr(addr))
    })
}

/// Dimension of a Size at an index, with negative-index normalization
/// applied before the shape algebra sees it.
fn index(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let object = args.get("object").cloned().unwrap_or(Value::Undef);
    let Some(shape) = tensor_shape(ctx, &object) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "shape index on a value without a shape",
            span,
        )));
    };
    let Some(idx) = args.get("index").and_then(num_exp) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("shape.index", "index", span)));
    };
    let idx = normalize_index(&idx, &shape.rank(), span);
    let dim = simplify::num(&NumExp::index(shape, idx, span));
    ContextSet::single(ctx.set_ret_val(Value::Int(dim)))
}

/// `x.size()` and list-shape inference: the Size of a value.
fn extract_shape(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args
        .get("self")
        .or_else(|| args.get("object"))
        .cloned()
        .unwrap_or(Value::Undef);
    if let Some(shape) = tensor_shape(ctx, &this) {
        let (addr, ctx) = make_size(ctx, &shape, span);
        return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
    }
    // Nested containers: only first elements are inspected.
    let (shape, _) = super::torch::extract_data_shape(ctx, &this, span);
    let (addr, ctx) = make_size(ctx, &shape, span);
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// Rebuilds a tensor with an explicitly given shape.
fn set_shape(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let this = args.get("self").cloned().unwrap_or(Value::Undef);
    let Some(shape_value) = args.get("shape") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("shape.setShape", "shape", span)));
    };
    let Some(shape) = crate::interp::value_to_shape(ctx, shape_value) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "shape.setShape: shape must be a Size or dim tuple",
            span,
        )));
    };
    let (addr, ctx) = make_tensor(ctx, &shape, &tensor_dtype(ctx, &this), span);
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcastable_cond_decides_constant_shapes() {
        let ok = broadcastable_cond(
            &ShapeExp::from_ints(&[3], None),
            &ShapeExp::from_ints(&[1, 3], None),
            None,
        );
        assert_eq!(ok.as_const(), Some(true));
        let bad = broadcastable_cond(
            &ShapeExp::from_ints(&[2], None),
            &ShapeExp::from_ints(&[3], None),
            None,
        );
        assert_eq!(bad.as_const(), Some(false));
        let batch = broadcastable_cond(
            &ShapeExp::from_ints(&[2, 3], None),
            &ShapeExp::from_ints(&[4, 3], None),
            None,
        );
        assert_eq!(batch.as_const(), Some(false));
    }
}
