//! Structural handlers: Python semantics the lowered language cannot
//! express directly.

use indexmap::IndexMap;

use crate::{
    builtins,
    context::{Context, ContextSet},
    error::{Diagnostic, ErrorKind},
    handlers::{Args, make_size, missing_arg, num_exp, opt_arg, tuple_items, unsupported_call},
    interp::{Interp, Truth, error_value, index_value, truthiness},
    parse::CodeRange,
    simplify,
    symexp::{BoolExp, NumExp, NumKind, NumUop, ShapeExp, StrExp},
    value::{LENGTH_ATTR, Value},
};

pub(crate) fn dispatch(
    interp: &mut Interp,
    ctx: &Context,
    func: &str,
    args: &Args,
    span: Option<CodeRange>,
) -> ContextSet {
    match func {
        "import" => import(ctx, args, span),
        "genList" | "genTuple" => gen_list(ctx, args, span),
        "genDict" => gen_dict(ctx, args, span),
        "setDefault" => set_default(ctx, args, span),
        "callKV" => call_kv(interp, ctx, args, span),
        "getAttr" => get_attr(interp, ctx, args, span),
        "exportGlobal" => export_global(ctx, args, span),
        "raise" => raise(ctx, args, span),
        "explicit" => unsupported_call(ctx, "explicit", span),
        "DEBUG" => debug(ctx, args, span),
        "objectClass" => object_class(ctx, args, span),
        "super" => super_proxy(ctx, args, span),
        "assert" => assert_(interp, ctx, args, span),
        "unsupported" => unsupported(ctx, args, span),
        "ifExp" => if_exp(interp, ctx, args, span),
        "slice" => slice(ctx, args, span),
        "len" => len(ctx, args, span),
        "range" => range(ctx, args, span),
        "isinstance" => isinstance(ctx, args, span),
        "cast.int" => cast_int(ctx, args, span),
        "cast.float" => cast_float(ctx, args, span),
        "cast.str" => cast_str(ctx, args, span),
        "cast.bool" => cast_bool(ctx, args, span),
        "cast.list" => cast_list(ctx, args, span),
        other => unsupported_call(ctx, other, span),
    }
}

/// Module import. Known modules resolve to their pre-allocated objects and
/// are recorded in the context's import table; `wildcard` merges the module
/// bindings into the caller's environment and sweeps the heap afterwards.
fn import(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let qual_path = match args.get("qualPath") {
        Some(Value::Str(path)) => path.as_const().unwrap_or("").to_owned(),
        _ => return ContextSet::single(ctx.set_ret_val(missing_arg("import", "qualPath", span))),
    };
    let Some(module_addr) = builtins::module_addr(&qual_path) else {
        let warned = ctx.warn(ErrorKind::Unsupported, format!("unknown module '{qual_path}'"), span);
        let (addr, warned) = warned.place_object(span, |obj| {
            obj.with_attr("__name__", Value::string(qual_path.clone(), span))
                .with_attr("$class", Value::Addr(builtins::MODULE_CLASS_ADDR))
        });
        let mut out = warned.set_ret_val(Value::Addr(addr));
        out.imported = out.imported.set_id(qual_path, addr);
        return ContextSet::single(out);
    };

    let mut out = ctx.clone();
    out.imported = out.imported.set_id(qual_path.clone(), module_addr);

    let wildcard = matches!(args.get("wildcard"), Some(Value::Bool(flag)) if flag.as_const() == Some(true));
    if wildcard {
        if let Value::Object(module) = out.deref(&Value::Addr(module_addr)) {
            for (name, value) in &module.attrs {
                if name.starts_with('$') || name.starts_with("__") {
                    continue;
                }
                let (cell, next) = out.alloc(value.clone(), span);
                out = next.with_env(next.env.set_id(name.as_str(), cell));
            }
        }
        // Imports are the one place the machine merges stores, so sweep
        // unreachable cells afterwards.
        let roots: Vec<_> = out.env.addrs().chain(out.imported.addrs()).collect();
        out = out.with_heap(out.heap.run_gc(roots));
    }
    ContextSet::single(out.set_ret_val(Value::Addr(module_addr)))
}

/// List literal: a fresh object with positional indices.
fn gen_list(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let items: Vec<Value> = args.values().cloned().collect();
    let (addr, ctx) = crate::interp::make_tuple(ctx, items, span);
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// Dict literal with string keys.
fn gen_dict(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (addr, ctx) = ctx.place_object(span, |mut obj| {
        let count = args.len() as i64;
        for (key, value) in args {
            obj.key_values.insert(key.clone(), value.clone());
        }
        obj.set_attr(LENGTH_ATTR, Value::int(count, span));
        obj
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// `dict.setdefault` semantics: insert when absent, return the entry.
fn set_default(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (Some(object), Some(Value::Str(key))) = (args.get("object"), args.get("key")) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("setDefault", "object/key", span)));
    };
    let default = args.get("default").cloned().unwrap_or(Value::None);
    let Some(key) = key.as_const().map(str::to_owned) else {
        return ContextSet::single(ctx.warn(ErrorKind::Unsupported, "symbolic setdefault key", span));
    };
    let Some(addr) = object.as_addr() else {
        return ContextSet::single(ctx.set_ret_val(error_value(ErrorKind::TypeMismatch, "setdefault on non-object", span)));
    };
    match ctx.heap.follow(addr) {
        Some(Value::Object(obj)) => {
            if let Some(existing) = obj.key_values.get(&key) {
                return ContextSet::single(ctx.set_ret_val(existing.clone()));
            }
            let mut updated = (**obj).clone();
            updated.key_values.insert(key, default.clone());
            let cell = updated.addr;
            let heap = ctx.heap.set_val(cell, Value::Object(Box::new(updated)));
            ContextSet::single(ctx.with_heap(heap).set_ret_val(default))
        }
        _ => ContextSet::single(ctx.set_ret_val(error_value(ErrorKind::TypeMismatch, "setdefault on non-object", span))),
    }
}

/// Keyword-argument call: `$func` plus numeric positionals plus keywords.
fn call_kv(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(callee) = args.get("$func") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("callKV", "$func", span)));
    };
    let mut positional: Vec<(usize, Value)> = Vec::new();
    let mut keywords = IndexMap::new();
    for (name, value) in args {
        if name == "$func" {
            continue;
        }
        match name.parse::<usize>() {
            Ok(index) => positional.push((index, value.clone())),
            Err(_) => {
                keywords.insert(name.clone(), value.clone());
            }
        }
    }
    positional.sort_by_key(|(index, _)| *index);
    let positional: Vec<Value> = positional.into_iter().map(|(_, value)| value).collect();
    interp.call_value(ctx, callee, positional, keywords, span)
}

/// Dynamic attribute access.
fn get_attr(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (Some(object), Some(Value::Str(name))) = (args.get("object"), args.get("name")) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("getAttr", "object/name", span)));
    };
    let Some(name) = name.as_const().map(str::to_owned) else {
        return ContextSet::single(ctx.warn(ErrorKind::Unsupported, "symbolic attribute name", span));
    };
    interp.attr_access(ctx, object, &name, span)
}

/// Records a module-level binding for importers; diagnostic only.
fn export_global(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let name = match args.get("name") {
        Some(Value::Str(name)) => name.as_const().unwrap_or("?").to_owned(),
        _ => "?".to_owned(),
    };
    ContextSet::single(
        ctx.add_log(Diagnostic::log(format!("export global '{name}'"), span))
            .set_ret_val(Value::None),
    )
}

/// Python `raise`: the path fails with a `Raised` record.
fn raise(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let message = match args.get("value") {
        Some(value) => match ctx.deref(value) {
            Value::Str(text) => text
                .as_const()
                .map_or_else(|| "raised exception".to_owned(), str::to_owned),
            Value::Object(obj) => {
                let class_name = obj
                    .attrs
                    .get("$class")
                    .and_then(|class| match ctx.deref(class) {
                        Value::Object(class) => match class.attrs.get("__name__") {
                            Some(Value::Str(name)) => name.as_const().map(str::to_owned),
                            _ => None,
                        },
                        _ => None,
                    })
                    .unwrap_or_else(|| "Exception".to_owned());
                format!("raised {class_name}")
            }
            other => format!("raised {}", other.type_name()),
        },
        None => "raised exception".to_owned(),
    };
    ContextSet::single(ctx.fail(Diagnostic::error(ErrorKind::Raised, message, span)))
}

/// `print` and explicit trace calls: log-level record of the values.
fn debug(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let mut rendered = Vec::new();
    for value in args.values() {
        match tuple_items(ctx, value) {
            Some(items) => rendered.extend(items.iter().map(|item| ctx.deref(item).to_string())),
            None => rendered.push(ctx.deref(value).to_string()),
        }
    }
    ContextSet::single(
        ctx.add_log(Diagnostic::log(rendered.join(" "), span))
            .set_ret_val(Value::None),
    )
}

/// Class object creation for lowered `class` statements.
fn object_class(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let name = match args.get("name") {
        Some(Value::Str(name)) => name.as_const().unwrap_or("<class>").to_owned(),
        _ => "<class>".to_owned(),
    };
    let base = args.get("base0").and_then(Value::as_addr);
    let (addr, ctx) = ctx.place_object(span, |mut obj| {
        obj.set_attr("$isclass", Value::bool_const(true, span));
        obj.set_attr("__name__", Value::string(name, span));
        if let Some(base) = base {
            obj.set_attr("$base", Value::Addr(base));
        }
        obj
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// `super()`: a proxy whose attribute lookups start at the base class but
/// bind methods to the original receiver.
fn super_proxy(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(receiver) = args.get("self").and_then(Value::as_addr) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "super() outside a method",
            span,
        )));
    };
    let base = match ctx.heap.follow(receiver) {
        Some(Value::Object(instance)) => instance
            .attrs
            .get("$class")
            .and_then(Value::as_addr)
            .and_then(|class| match ctx.heap.follow(class) {
                Some(Value::Object(class)) => class.attrs.get("$base").and_then(Value::as_addr),
                _ => None,
            }),
        _ => None,
    };
    let Some(base) = base else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "super(): no base class",
            span,
        )));
    };
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(base))
            .with_attr("$super_self", Value::Addr(receiver))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// Python `assert`, honoring the `ignore_assert` option.
fn assert_(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    if interp.opts.ignore_assert {
        return ContextSet::single(ctx.set_ret_val(Value::None));
    }
    let Some(test) = args.get("test") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("assert", "test", span)));
    };
    let message = match args.get("msg") {
        Some(Value::Str(msg)) => msg
            .as_const()
            .map_or_else(|| "assertion failed".to_owned(), |m| format!("assertion failed: {m}")),
        _ => "assertion failed".to_owned(),
    };
    match truthiness(ctx, test, span) {
        Truth::Known(true) => ContextSet::single(ctx.set_ret_val(Value::None)),
        Truth::Known(false) => {
            ContextSet::single(ctx.fail(Diagnostic::error(ErrorKind::ObligationViolated, message, span)))
        }
        Truth::Sym(cond) => {
            let out = crate::handlers::require(interp, ctx, &[cond], &message, span);
            out.return_value(Value::None)
        }
        Truth::Err(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag)))),
    }
}

/// Degraded construct: warning plus a fresh symbol of the hinted sort.
fn unsupported(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let reason = match args.get("reason") {
        Some(Value::Str(reason)) => reason.as_const().unwrap_or("construct").to_owned(),
        _ => "construct".to_owned(),
    };
    let warned = ctx.warn(ErrorKind::Unsupported, format!("unsupported: {reason}"), span);
    let sort = match args.get("sort") {
        Some(Value::Str(sort)) => sort.as_const().unwrap_or("num").to_owned(),
        _ => "num".to_owned(),
    };
    match sort.as_str() {
        "str" => {
            let fresh = warned.syms.fresh_str("unsupported", span);
            ContextSet::single(warned.set_ret_val(Value::Str(fresh)))
        }
        "bool" => {
            let fresh = warned.syms.fresh_bool("unsupported", span);
            ContextSet::single(warned.set_ret_val(Value::Bool(fresh)))
        }
        "list" => {
            let length = warned.syms.fresh_num("unsupported_len", span);
            let (addr, warned) = warned.place_object(span, |obj| obj.with_attr(LENGTH_ATTR, Value::Int(length)));
            ContextSet::single(warned.set_ret_val(Value::Addr(addr)))
        }
        _ => {
            let fresh = warned.syms.fresh_num("unsupported", span);
            ContextSet::single(warned.set_ret_val(Value::Int(fresh)))
        }
    }
}

/// Conditional expression over already-evaluated operands: forks on a
/// symbolic test, otherwise selects one side.
fn if_exp(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (Some(test), Some(then_value), Some(else_value)) = (args.get("test"), args.get("then"), args.get("else"))
    else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("ifExp", "test/then/else", span)));
    };
    match truthiness(ctx, test, span) {
        Truth::Known(true) => ContextSet::single(ctx.set_ret_val(then_value.clone())),
        Truth::Known(false) => ContextSet::single(ctx.set_ret_val(else_value.clone())),
        Truth::Sym(cond) => {
            let (then_set, else_set) = ContextSet::single(ctx.clone()).if_then_else(|_| cond.clone(), span, interp.oracle);
            interp.tracer.on_fork(then_set.live().len(), else_set.live().len(), span);
            then_set
                .return_value(then_value.clone())
                .join(&else_set.return_value(else_value.clone()))
        }
        Truth::Err(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag)))),
    }
}

/// Slicing over Sizes, tensors, strings and index containers.
fn slice(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(object) = args.get("object") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("slice", "object", span)));
    };
    let start = opt_arg(args, "start").and_then(num_exp);
    let end = opt_arg(args, "end").and_then(num_exp);

    match ctx.deref(object) {
        Value::Object(obj) => {
            // Size: slice of the shape itself.
            if let Some(shape) = &obj.shape {
                let sliced = simplify::shape(&ShapeExp::slice(shape.clone(), start, end, span));
                let (addr, ctx) = make_size(ctx, &sliced, span);
                return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
            }
            // Tensor: slicing narrows the leading dimension.
            if let Some(shape) = crate::handlers::object_shape(ctx, &obj) {
                let dim0 = simplify::num(&NumExp::index(shape.clone(), NumExp::int(0, span), span));
                let lo = start.unwrap_or_else(|| NumExp::int(0, span));
                let hi = end.unwrap_or_else(|| dim0.clone());
                let hi = simplify::num(&NumExp::min_of(vec![hi, dim0.clone()], span));
                let length = simplify::num(&NumExp::max_of(
                    vec![NumExp::int(0, span), NumExp::sub(hi, lo, span)],
                    span,
                ));
                let new_shape = ShapeExp::set(shape, NumExp::int(0, span), length, span);
                let dtype = crate::handlers::tensor_dtype(ctx, object);
                let (addr, ctx) = crate::handlers::make_tensor(ctx, &new_shape, &dtype, span);
                return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
            }
            // Plain containers with a constant length and bounds.
            if let (Some(len), lo, hi) = (
                obj.length(),
                start.as_ref().map_or(Some(0), NumExp::as_int),
                end.as_ref().map(|e| e.as_int()),
            ) {
                let lo = lo.unwrap_or(0);
                let hi = match hi {
                    Some(Some(hi)) => hi,
                    Some(None) => {
                        let warned = ctx.warn(ErrorKind::Unsupported, "symbolic slice bound", span);
                        let fresh = warned.syms.fresh_num("slice", span);
                        return ContextSet::single(warned.set_ret_val(Value::Int(fresh)));
                    }
                    None => len,
                };
                let lo = if lo < 0 { lo + len } else { lo }.clamp(0, len);
                let hi = if hi < 0 { hi + len } else { hi }.clamp(0, len);
                let items: Vec<Value> = (lo..hi.max(lo)).map(|i| index_value(&obj, i, span)).collect();
                let (addr, ctx) = crate::interp::make_tuple(ctx, items, span);
                return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
            }
            let warned = ctx.warn(ErrorKind::Unsupported, "slice of unbounded container", span);
            let fresh = warned.syms.fresh_num("slice", span);
            ContextSet::single(warned.set_ret_val(Value::Int(fresh)))
        }
        Value::Str(text) => {
            let sliced = simplify::string(&StrExp::slice(text, start, end, span));
            ContextSet::single(ctx.set_ret_val(Value::Str(sliced)))
        }
        other => ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            format!("cannot slice {}", other.type_name()),
            span,
        ))),
    }
}

fn len(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(object) = args.get("object") else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("len", "object", span)));
    };
    match ctx.deref(object) {
        Value::Object(obj) => match obj.length_exp() {
            Some(length) => ContextSet::single(ctx.set_ret_val(Value::Int(length.clone()))),
            None => ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "object has no length",
                span,
            ))),
        },
        Value::Str(text) => match text.as_const() {
            Some(text) => ContextSet::single(ctx.set_ret_val(Value::int(text.chars().count() as i64, span))),
            None => {
                let fresh = ctx.syms.fresh_num("strlen", span);
                let bounded = ctx.guarantee(&BoolExp::lte(NumExp::int(0, span), fresh.clone(), span));
                ContextSet::single(bounded.set_ret_val(Value::Int(fresh)))
            }
        },
        other => ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            format!("{} has no len()", other.type_name()),
            span,
        ))),
    }
}

/// `range(stop)` / `range(start, stop[, step])`.
fn range(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(items) = args.get("args").and_then(|value| tuple_items(ctx, value)) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("range", "args", span)));
    };
    let exps: Option<Vec<NumExp>> = items.iter().map(num_exp).collect();
    let Some(exps) = exps else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "range() expects integers",
            span,
        )));
    };
    let (start, stop, step) = match exps.as_slice() {
        [stop] => (NumExp::int(0, span), stop.clone(), NumExp::int(1, span)),
        [start, stop] => (start.clone(), stop.clone(), NumExp::int(1, span)),
        [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
        _ => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "range() takes 1 to 3 arguments",
                span,
            )));
        }
    };
    // ceil((stop - start) / step), clamped at zero.
    let delta = NumExp::sub(stop, start.clone(), span);
    let length = match step.as_int() {
        Some(1) => delta,
        _ => NumExp::floor_div(
            NumExp::add(delta, NumExp::sub(step.clone(), NumExp::int(1, span), span), span),
            step.clone(),
            span,
        ),
    };
    let length = simplify::num(&NumExp::max_of(vec![NumExp::int(0, span), length], span));
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$range", Value::bool_const(true, span))
            .with_attr("$start", Value::Int(start))
            .with_attr("$step", Value::Int(step))
            .with_attr(LENGTH_ATTR, Value::Int(length))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn isinstance(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let (Some(object), Some(classinfo)) = (args.get("object"), args.get("classinfo")) else {
        return ContextSet::single(ctx.set_ret_val(missing_arg("isinstance", "object/classinfo", span)));
    };
    // Builtin converters double as the primitive classes.
    if let Value::Func(func) = ctx.deref(classinfo) {
        let matched = match func.name.as_str() {
            "int" => matches!(object, Value::Int(_)),
            "float" => matches!(object, Value::Float(_)),
            "str" => matches!(object, Value::Str(_)),
            "bool" => matches!(object, Value::Bool(_)),
            _ => {
                let warned = ctx.warn(ErrorKind::Unsupported, "isinstance against this callable", span);
                let fresh = warned.syms.fresh_bool("isinstance", span);
                return ContextSet::single(warned.set_ret_val(Value::Bool(fresh)));
            }
        };
        return ContextSet::single(ctx.set_ret_val(Value::bool_const(matched, span)));
    }
    if let (Value::Object(obj), Some(class_addr)) = (ctx.deref(object), classinfo.as_addr()) {
        let mut current = obj.attrs.get("$class").and_then(Value::as_addr);
        for _ in 0..32 {
            match current {
                Some(addr) if addr == class_addr => {
                    return ContextSet::single(ctx.set_ret_val(Value::bool_const(true, span)));
                }
                Some(addr) => {
                    current = match ctx.heap.follow(addr) {
                        Some(Value::Object(class)) => class.attrs.get("$base").and_then(Value::as_addr),
                        _ => None,
                    };
                }
                None => break,
            }
        }
        return ContextSet::single(ctx.set_ret_val(Value::bool_const(false, span)));
    }
    let warned = ctx.warn(ErrorKind::Unsupported, "isinstance on this value", span);
    let fresh = warned.syms.fresh_bool("isinstance", span);
    ContextSet::single(warned.set_ret_val(Value::Bool(fresh)))
}

fn cast_int(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let value = args.get("value").cloned().unwrap_or(Value::int(0, span));
    let out = match &value {
        Value::Int(_) => value,
        Value::Float(exp) => Value::Int(simplify::num(&NumExp::new(
            NumKind::Uop {
                op: NumUop::Floor,
                operand: Box::new(exp.clone()),
            },
            span,
        ))),
        Value::Bool(flag) => match flag.as_const() {
            Some(flag) => Value::int(i64::from(flag), span),
            None => {
                let fresh = ctx.syms.fresh_num("int", span);
                return ContextSet::single(ctx.set_ret_val(Value::Int(fresh)));
            }
        },
        Value::Str(text) => match text.as_const().and_then(|text| text.trim().parse::<i64>().ok()) {
            Some(parsed) => Value::int(parsed, span),
            None => {
                let fresh = ctx.syms.fresh_num("int", span);
                return ContextSet::single(ctx.set_ret_val(Value::Int(fresh)));
            }
        },
        other => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("int() argument of type {}", other.type_name()),
                span,
            )));
        }
    };
    ContextSet::single(ctx.set_ret_val(out))
}

fn cast_float(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let value = args.get("value").cloned().unwrap_or(Value::float(0.0, span));
    let out = match &value {
        Value::Float(_) => value,
        Value::Int(exp) => Value::Float(exp.clone()),
        Value::Bool(flag) => match flag.as_const() {
            Some(flag) => Value::float(f64::from(u8::from(flag)), span),
            None => Value::Float(ctx.syms.fresh_num("float", span)),
        },
        Value::Str(text) => match text.as_const().and_then(|text| text.trim().parse::<f64>().ok()) {
            Some(parsed) => Value::float(parsed, span),
            None => Value::Float(ctx.syms.fresh_num("float", span)),
        },
        other => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("float() argument of type {}", other.type_name()),
                span,
            )));
        }
    };
    ContextSet::single(ctx.set_ret_val(out))
}

fn cast_str(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let value = args.get("value").cloned().unwrap_or(Value::string("", span));
    let out = match &value {
        Value::Str(_) => value,
        Value::Int(exp) | Value::Float(exp) => match exp.as_const() {
            Some(c) => Value::string(c.to_string(), span),
            None => Value::Str(ctx.syms.fresh_str("str", span)),
        },
        Value::Bool(flag) => match flag.as_const() {
            Some(true) => Value::string("True", span),
            Some(false) => Value::string("False", span),
            None => Value::Str(ctx.syms.fresh_str("str", span)),
        },
        Value::None => Value::string("None", span),
        _ => Value::Str(ctx.syms.fresh_str("str", span)),
    };
    ContextSet::single(ctx.set_ret_val(out))
}

fn cast_bool(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let value = args.get("value").cloned().unwrap_or(Value::bool_const(false, span));
    match truthiness(ctx, &value, span) {
        Truth::Known(flag) => ContextSet::single(ctx.set_ret_val(Value::bool_const(flag, span))),
        Truth::Sym(cond) => ContextSet::single(ctx.set_ret_val(Value::Bool(cond))),
        Truth::Err(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag)))),
    }
}

/// `list(x)` / `tuple(x)`: shallow copy of an index container.
fn cast_list(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let value = args.get("iterable").cloned().unwrap_or(Value::None);
    if matches!(value, Value::None) {
        let (addr, ctx) = crate::interp::make_tuple(ctx, Vec::new(), span);
        return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
    }
    match tuple_items(ctx, &value) {
        Some(items) => {
            let (addr, ctx) = crate::interp::make_tuple(ctx, items, span);
            ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
        }
        None => {
            // Sizes convert to a tuple of their dims when the rank is known.
            if let Some(shape) = crate::handlers::tensor_shape(ctx, &value)
                && let Some(dims) = simplify::shape(&shape).as_const_dims()
            {
                let items: Vec<Value> = dims.iter().map(|dim| Value::Int(dim.clone())).collect();
                let (addr, ctx) = crate::interp::make_tuple(ctx, items, span);
                return ContextSet::single(ctx.set_ret_val(Value::Addr(addr)));
            }
            let warned = ctx.warn(ErrorKind::Unsupported, "list() of this value", span);
            let length = warned.syms.fresh_num("list_len", span);
            let (addr, warned) = warned.place_object(span, |obj| obj.with_attr(LENGTH_ATTR, Value::Int(length)));
            ContextSet::single(warned.set_ret_val(Value::Addr(addr)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symexp::SymGen;

    #[test]
    fn gen_dict_collects_string_keys() {
        let ctx = Context::new();
        let mut args = Args::new();
        args.insert("lr".to_owned(), Value::float(0.1, None));
        let out = gen_dict(&ctx, &args, None);
        let ctx = &out.live()[0];
        let Value::Object(obj) = ctx.deref(&ctx.ret_val.value()) else {
            panic!("expected object")
        };
        assert_eq!(obj.key_values.get("lr"), Some(&Value::float(0.1, None)));
    }

    #[test]
    fn range_length_folds_for_constants() {
        let ctx = Context::new();
        let (tuple_addr, ctx) = crate::interp::make_tuple(&ctx, vec![Value::int(2, None), Value::int(8, None)], None);
        let mut args = Args::new();
        args.insert("args".to_owned(), Value::Addr(tuple_addr));
        let out = range(&ctx, &args, None);
        let ctx = &out.live()[0];
        let Value::Object(obj) = ctx.deref(&ctx.ret_val.value()) else {
            panic!("expected range object")
        };
        assert_eq!(obj.length(), Some(6));
    }

    #[test]
    fn raise_fails_the_path() {
        let ctx = Context::new();
        let out = raise(&ctx, &Args::new(), None);
        assert!(out.live().is_empty());
        assert_eq!(out.failed().len(), 1);
        assert_eq!(out.failed()[0].failed.as_ref().unwrap().kind, ErrorKind::Raised);
    }

    #[test]
    fn unsupported_hints_pick_the_sort() {
        let g = SymGen::new();
        let _ = g;
        let ctx = Context::new();
        let mut args = Args::new();
        args.insert("reason".to_owned(), Value::string("f-string", None));
        args.insert("sort".to_owned(), Value::string("str", None));
        let out = unsupported(&ctx, &args, None);
        let ctx = &out.live()[0];
        assert!(matches!(ctx.ret_val.value(), Value::Str(_)));
        assert!(ctx.logs.iter().any(|d| d.kind == ErrorKind::Unsupported));
    }
}
