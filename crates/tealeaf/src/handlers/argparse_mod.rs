//! argparse emulation: command-line flags become concrete or symbolic
//! values depending on what the host `ArgSource` provides.

use crate::{
    builtins,
    config::CmdVal,
    context::{Context, ContextSet},
    error::ErrorKind,
    handlers::{Args, unsupported_call},
    interp::{Interp, error_value},
    parse::CodeRange,
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
        "ArgumentParser" => argument_parser(ctx, span),
        "inject_argument" => inject_argument(interp, ctx, args, span),
        "parse_args" => parse_args(ctx, args, span),
        "set_defaults" => ContextSet::single(ctx.set_ret_val(Value::None)),
        "set_subcommand" => set_subcommand(interp, ctx, span),
        other => unsupported_call(ctx, &format!("argparse.{other}"), span),
    }
}

fn argument_parser(ctx: &Context, span: Option<CodeRange>) -> ContextSet {
    let (addr, ctx) = ctx.place_object(span, |obj| {
        obj.with_attr("$class", Value::Addr(builtins::ARGPARSE_PARSER_CLASS_ADDR))
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

/// `--flag-name` to the attribute name argparse would bind.
fn dest_name(flag: &str) -> String {
    flag.trim_start_matches('-').replace('-', "_")
}

/// `parser.add_argument(...)`: seeds the declared flag from the host's
/// `ArgSource`, or mints a fresh symbol of the declared type.
fn inject_argument(interp: &mut Interp, ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(parser) = args.get("self").and_then(Value::as_addr) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "add_argument outside a parser",
            span,
        )));
    };
    let Some(Value::Str(flag)) = args.get("name") else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "add_argument: flag name must be a string",
            span,
        )));
    };
    let Some(flag) = flag.as_const() else {
        return ContextSet::single(ctx.warn(ErrorKind::Unsupported, "symbolic flag name", span));
    };
    let dest = dest_name(flag);

    // Declared type: the builtin converter functions double as type tags.
    let declared = match args.get("type") {
        Some(Value::Func(func)) => Some(func.name.clone()),
        _ => None,
    };
    let store_true = matches!(args.get("action"), Some(Value::Str(action)) if action.as_const() == Some("store_true"));

    let value = match interp.arg_source.get(&dest) {
        Some(seed) => seeded_value(&seed, declared.as_deref(), span),
        None => match args.get("default") {
            Some(default) if !matches!(default, Value::None) => default.clone(),
            _ if store_true => Value::bool_const(false, span),
            _ => fresh_argument(ctx, &dest, declared.as_deref(), span),
        },
    };

    let ctx = match ctx.heap.follow(parser) {
        Some(Value::Object(obj)) => {
            let mut updated = (**obj).clone();
            updated.key_values.insert(dest, value);
            let cell = updated.addr;
            ctx.with_heap(ctx.heap.set_val(cell, Value::Object(Box::new(updated))))
        }
        _ => {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                "add_argument outside a parser",
                span,
            )));
        }
    };
    ContextSet::single(ctx.set_ret_val(Value::None))
}

/// Coerces a host-provided value through the declared flag type.
fn seeded_value(seed: &CmdVal, declared: Option<&str>, span: Option<CodeRange>) -> Value {
    match declared {
        Some("float") => match seed {
            CmdVal::Float(v) => Value::float(*v, span),
            CmdVal::Int(v) => Value::float(*v as f64, span),
            CmdVal::Bool(v) => Value::float(f64::from(u8::from(*v)), span),
            CmdVal::Str(raw) => raw
                .parse::<f64>()
                .map_or_else(|_| Value::string(raw.clone(), span), |v| Value::float(v, span)),
        },
        Some("int") => match seed {
            CmdVal::Int(v) => Value::int(*v, span),
            CmdVal::Float(v) => Value::int(*v as i64, span),
            CmdVal::Bool(v) => Value::int(i64::from(*v), span),
            CmdVal::Str(raw) => raw
                .parse::<i64>()
                .map_or_else(|_| Value::string(raw.clone(), span), |v| Value::int(v, span)),
        },
        Some("bool") => match seed {
            CmdVal::Bool(v) => Value::bool_const(*v, span),
            CmdVal::Int(v) => Value::bool_const(*v != 0, span),
            CmdVal::Float(v) => Value::bool_const(*v != 0.0, span),
            CmdVal::Str(raw) => Value::bool_const(!raw.is_empty(), span),
        },
        _ => match seed {
            CmdVal::Bool(v) => Value::bool_const(*v, span),
            CmdVal::Int(v) => Value::int(*v, span),
            CmdVal::Float(v) => Value::float(*v, span),
            CmdVal::Str(raw) => Value::string(raw.clone(), span),
        },
    }
}

/// A fresh symbol named after the flag, of the declared sort.
fn fresh_argument(ctx: &Context, dest: &str, declared: Option<&str>, span: Option<CodeRange>) -> Value {
    let name = format!("arg_{dest}");
    match declared {
        Some("int") => Value::Int(ctx.syms.fresh_num(name, span)),
        Some("float") => Value::Float(ctx.syms.fresh_num(name, span)),
        Some("bool") => Value::Bool(ctx.syms.fresh_bool(name, span)),
        Some("str") | None => Value::Str(ctx.syms.fresh_str(name, span)),
        Some(_) => Value::Int(ctx.syms.fresh_num(name, span)),
    }
}

/// `parser.parse_args()`: a namespace object exposing every declared flag
/// as an attribute.
fn parse_args(ctx: &Context, args: &Args, span: Option<CodeRange>) -> ContextSet {
    let Some(parser) = args.get("self").and_then(Value::as_addr) else {
        return ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            "parse_args outside a parser",
            span,
        )));
    };
    let entries: Vec<(String, Value)> = match ctx.heap.follow(parser) {
        Some(Value::Object(obj)) => obj
            .key_values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        _ => Vec::new(),
    };
    let (addr, ctx) = ctx.place_object(span, |mut obj| {
        for (name, value) in entries {
            obj.attrs.insert(name, value);
        }
        obj
    });
    ContextSet::single(ctx.set_ret_val(Value::Addr(addr)))
}

fn set_subcommand(interp: &mut Interp, ctx: &Context, span: Option<CodeRange>) -> ContextSet {
    match &interp.opts.subcommand {
        Some(subcommand) => ContextSet::single(ctx.set_ret_val(Value::string(subcommand.clone(), span))),
        None => {
            let fresh = ctx.syms.fresh_str("subcommand", span);
            ContextSet::single(ctx.set_ret_val(Value::Str(fresh)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dest_names_strip_dashes() {
        assert_eq!(dest_name("--lr"), "lr");
        assert_eq!(dest_name("--batch-size"), "batch_size");
        assert_eq!(dest_name("epochs"), "epochs");
    }

    #[test]
    fn seeded_float_coerces_strings() {
        let value = seeded_value(&CmdVal::Str("0.1".to_owned()), Some("float"), None);
        assert_eq!(value, Value::float(0.1, None));
    }
}
