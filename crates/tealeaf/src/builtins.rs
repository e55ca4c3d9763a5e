//! Pre-allocated built-in environment.
//!
//! Built-ins live at negative heap addresses, which are shared by every path
//! and immune to offsetting. Library functions are ordinary [`Func`] values
//! whose bodies are a single `Return` of a lib-call, so user code reaches
//! handler semantics through the normal call machinery; nothing here is
//! special-cased in the interpreter.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    context::Context,
    env::Env,
    heap::{Addr, Heap},
    ir::{Expr, Stmt, StmtKind},
    value::{Func, ObjGen, Object, Value},
};

// Well-known class and module addresses, referenced from the interpreter and
// handlers. Everything else is allocated downward from BUILTIN_DYNAMIC_BASE.
pub const OBJECT_CLASS_ADDR: Addr = Addr::new(-1);
pub const TUPLE_CLASS_ADDR: Addr = Addr::new(-2);
pub const TENSOR_CLASS_ADDR: Addr = Addr::new(-3);
pub const MODULE_CLASS_ADDR: Addr = Addr::new(-4);

pub const TORCH_MODULE_ADDR: Addr = Addr::new(-10);
pub const TORCH_NN_ADDR: Addr = Addr::new(-11);
pub const TORCH_NN_FUNCTIONAL_ADDR: Addr = Addr::new(-12);
pub const NUMPY_MODULE_ADDR: Addr = Addr::new(-13);
pub const MATH_MODULE_ADDR: Addr = Addr::new(-14);
pub const ARGPARSE_MODULE_ADDR: Addr = Addr::new(-15);
pub const PIL_MODULE_ADDR: Addr = Addr::new(-16);
pub const PIL_IMAGE_MODULE_ADDR: Addr = Addr::new(-17);

pub const CONV2D_CLASS_ADDR: Addr = Addr::new(-30);
pub const LINEAR_CLASS_ADDR: Addr = Addr::new(-31);
pub const IDENTITY_MODULE_CLASS_ADDR: Addr = Addr::new(-32);
pub const BATCHNORM2D_CLASS_ADDR: Addr = Addr::new(-33);
pub const POOL2D_CLASS_ADDR: Addr = Addr::new(-34);
pub const ARGPARSE_PARSER_CLASS_ADDR: Addr = Addr::new(-35);
pub const FLATTEN_CLASS_ADDR: Addr = Addr::new(-36);
pub const PIL_IMAGE_CLASS_ADDR: Addr = Addr::new(-37);

const BUILTIN_DYNAMIC_BASE: i64 = -100;

/// Resolves a qualified import path to a pre-allocated module address.
#[must_use]
pub fn module_addr(qual_path: &str) -> Option<Addr> {
    match qual_path {
        "torch" => Some(TORCH_MODULE_ADDR),
        "torch.nn" => Some(TORCH_NN_ADDR),
        "torch.nn.functional" => Some(TORCH_NN_FUNCTIONAL_ADDR),
        "numpy" => Some(NUMPY_MODULE_ADDR),
        "math" => Some(MATH_MODULE_ADDR),
        "argparse" => Some(ARGPARSE_MODULE_ADDR),
        "PIL" => Some(PIL_MODULE_ADDR),
        "PIL.Image" => Some(PIL_IMAGE_MODULE_ADDR),
        _ => None,
    }
}

/// One declared parameter of a native function: name plus optional default.
type NativeParam<'s> = (&'s str, Option<Value>);

/// Builds a native function value: a `Func` whose body returns a single
/// lib-call forwarding every parameter by name.
fn native(name: &str, lib: &str, params: &[NativeParam<'_>], varargs: Option<&str>) -> Value {
    let mut call_args = Vec::with_capacity(params.len() + 1);
    let mut defaults = IndexMap::new();
    let mut param_names = Vec::with_capacity(params.len());
    for (param, default) in params {
        param_names.push((*param).to_owned());
        call_args.push(((*param).to_owned(), Expr::name(*param, None)));
        if let Some(default) = default {
            defaults.insert((*param).to_owned(), default.clone());
        }
    }
    if let Some(varargs) = varargs {
        call_args.push((varargs.to_owned(), Expr::name(varargs, None)));
    }
    let body = Stmt::new(
        StmtKind::Return(Some(Expr::lib_call(lib, call_args, None))),
        None,
    );
    Value::Func(Box::new(Func {
        id: crate::value::ObjId::builtin(),
        name: name.to_owned(),
        params: param_names,
        defaults,
        body: Arc::new(body),
        captured: Env::new(),
        has_closure: false,
        varargs: varargs.map(str::to_owned),
        kwargs: None,
        key_only_count: 0,
        bound_self: None,
    }))
}

struct Builder {
    heap: Heap,
    env: Env,
    objs: ObjGen,
    next: i64,
}

impl Builder {
    fn place(&mut self, addr: Addr, build: impl FnOnce(Object) -> Object) {
        let object = build(Object::new(self.objs.fresh(), addr));
        self.heap = self.heap.set_builtin(addr, Value::Object(Box::new(object)));
    }

    /// Binds a global name to a fresh builtin cell holding `value`.
    fn bind(&mut self, name: &str, value: Value) {
        let addr = Addr::new(self.next);
        self.next -= 1;
        self.heap = self.heap.set_builtin(addr, value);
        self.env = self.env.set_id(name, addr);
    }
}

/// Installs the built-in heap cells and environment into a fresh context.
#[must_use]
pub fn install(ctx: Context) -> Context {
    let mut b = Builder {
        heap: ctx.heap.clone(),
        env: ctx.env.clone(),
        objs: ctx.objs.clone(),
        next: BUILTIN_DYNAMIC_BASE,
    };

    install_core_classes(&mut b);
    install_global_functions(&mut b);
    install_torch(&mut b);
    install_numpy(&mut b);
    install_math(&mut b);
    install_argparse(&mut b);
    install_pil(&mut b);

    let mut out = ctx.with_heap(b.heap);
    out.env = b.env;
    out
}

fn install_core_classes(b: &mut Builder) {
    b.place(OBJECT_CLASS_ADDR, |obj| {
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("object", None))
    });
    b.place(TUPLE_CLASS_ADDR, |obj| {
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("tuple", None))
            .with_attr("$base", Value::Addr(OBJECT_CLASS_ADDR))
    });
    b.place(MODULE_CLASS_ADDR, |obj| {
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("module", None))
    });

    // Methods of tensor values; instances carry `$class` pointing here.
    b.place(TENSOR_CLASS_ADDR, |obj| {
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Tensor", None))
            .with_attr("$base", Value::Addr(OBJECT_CLASS_ADDR))
            .with_attr("size", native("size", "shape.extractShape", &[("self", None)], None))
            .with_attr(
                "view",
                native("view", "torch.view", &[("self", None)], Some("dims")),
            )
            .with_attr(
                "reshape",
                native("reshape", "torch.view", &[("self", None)], Some("dims")),
            )
            .with_attr(
                "repeat",
                native("repeat", "shape.repeat", &[("self", None)], Some("sizes")),
            )
            .with_attr(
                "expand",
                native("expand", "torch.expand", &[("self", None)], Some("sizes")),
            )
            .with_attr(
                "permute",
                native("permute", "torch.permute", &[("self", None)], Some("dims")),
            )
            .with_attr(
                "transpose",
                native(
                    "transpose",
                    "torch.transpose",
                    &[("input", None), ("dim0", None), ("dim1", None)],
                    None,
                ),
            )
            .with_attr(
                "flatten",
                native(
                    "flatten",
                    "torch.flatten",
                    &[
                        ("input", None),
                        ("start_dim", Some(Value::int(0, None))),
                        ("end_dim", Some(Value::int(-1, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "squeeze",
                native("squeeze", "torch.squeeze", &[("input", None), ("dim", Some(Value::None))], None),
            )
            .with_attr(
                "unsqueeze",
                native("unsqueeze", "torch.unsqueeze", &[("input", None), ("dim", None)], None),
            )
            .with_attr(
                "matmul",
                native("matmul", "torch.matmul", &[("input", None), ("other", None)], None),
            )
            .with_attr(
                "sum",
                native(
                    "sum",
                    "torch.sum",
                    &[
                        ("input", None),
                        ("dim", Some(Value::None)),
                        ("keepdim", Some(Value::bool_const(false, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "mean",
                native(
                    "mean",
                    "torch.mean",
                    &[
                        ("input", None),
                        ("dim", Some(Value::None)),
                        ("keepdim", Some(Value::bool_const(false, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "narrow",
                native(
                    "narrow",
                    "torch.narrow",
                    &[("input", None), ("dim", None), ("start", None), ("length", None)],
                    None,
                ),
            )
            .with_attr("item", native("item", "torch.item", &[("self", None)], None))
            .with_attr("cuda", native("cuda", "torch.unary", &[("input", None)], None))
            .with_attr("cpu", native("cpu", "torch.unary", &[("input", None)], None))
            .with_attr("detach", native("detach", "torch.unary", &[("input", None)], None))
            .with_attr("contiguous", native("contiguous", "torch.unary", &[("input", None)], None))
            .with_attr(
                "to",
                native("to", "torch.unary", &[("input", None)], Some("args")),
            )
            .with_attr(
                "__add__",
                native("__add__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__radd__",
                native("__radd__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__sub__",
                native("__sub__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__rsub__",
                native("__rsub__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__mul__",
                native("__mul__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__rmul__",
                native("__rmul__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__truediv__",
                native("__truediv__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__rtruediv__",
                native("__rtruediv__", "torch.broadcast", &[("self", None), ("other", None)], None),
            )
            .with_attr(
                "__matmul__",
                native("__matmul__", "torch.matmul", &[("input", None), ("other", None)], None),
            )
            .with_attr(
                "__getitem__",
                native("__getitem__", "torch.getitem", &[("self", None), ("index", None)], None),
            )
    });
}

fn install_global_functions(b: &mut Builder) {
    b.bind("len", native("len", "len", &[("object", None)], None));
    b.bind("print", native("print", "DEBUG", &[], Some("values")));
    b.bind("range", native("range", "range", &[], Some("args")));
    b.bind(
        "isinstance",
        native("isinstance", "isinstance", &[("object", None), ("classinfo", None)], None),
    );
    b.bind("int", native("int", "cast.int", &[("value", Some(Value::int(0, None)))], None));
    b.bind(
        "float",
        native("float", "cast.float", &[("value", Some(Value::float(0.0, None)))], None),
    );
    b.bind("str", native("str", "cast.str", &[("value", Some(Value::string("", None)))], None));
    b.bind(
        "bool",
        native("bool", "cast.bool", &[("value", Some(Value::bool_const(false, None)))], None),
    );
    b.bind("abs", native("abs", "math.abs", &[("value", None)], None));
    b.bind("max", native("max", "math.max", &[], Some("args")));
    b.bind("min", native("min", "math.min", &[], Some("args")));
    b.bind("sum", native("sum", "math.sum", &[("iterable", None)], None));
    b.bind("list", native("list", "cast.list", &[("iterable", Some(Value::None))], None));
    b.bind("tuple", native("tuple", "cast.list", &[("iterable", Some(Value::None))], None));
    b.bind("object", Value::Addr(OBJECT_CLASS_ADDR));
}

fn install_torch(b: &mut Builder) {
    // nn module classes: factory functions build module objects whose
    // `forward` is routed through a dedicated handler.
    b.place(CONV2D_CLASS_ADDR, |obj| {
        let forward = native("forward", "torch.conv2d_forward", &[("self", None), ("input", None)], None);
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Conv2d", None))
            .with_attr("__call__", forward.clone())
            .with_attr("forward", forward)
    });
    b.place(LINEAR_CLASS_ADDR, |obj| {
        let forward = native("forward", "torch.linear_forward", &[("self", None), ("input", None)], None);
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Linear", None))
            .with_attr("__call__", forward.clone())
            .with_attr("forward", forward)
    });
    b.place(IDENTITY_MODULE_CLASS_ADDR, |obj| {
        let forward = native("forward", "torch.unary", &[("input", None)], None);
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Identity", None))
            .with_attr("__call__", forward.clone())
            .with_attr("forward", forward)
    });
    b.place(BATCHNORM2D_CLASS_ADDR, |obj| {
        let forward = native(
            "forward",
            "torch.batchnorm2d_forward",
            &[("self", None), ("input", None)],
            None,
        );
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("BatchNorm2d", None))
            .with_attr("__call__", forward.clone())
            .with_attr("forward", forward)
    });
    b.place(POOL2D_CLASS_ADDR, |obj| {
        let forward = native("forward", "torch.pool2d_forward", &[("self", None), ("input", None)], None);
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Pool2d", None))
            .with_attr("__call__", forward.clone())
            .with_attr("forward", forward)
    });
    b.place(FLATTEN_CLASS_ADDR, |obj| {
        let forward = native("forward", "torch.flatten_forward", &[("self", None), ("input", None)], None);
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Flatten", None))
            .with_attr("__call__", forward.clone())
            .with_attr("forward", forward)
    });

    let conv2d = native(
        "conv2d",
        "torch.conv2d",
        &[
            ("input", None),
            ("weight", None),
            ("bias", Some(Value::None)),
            ("stride", Some(Value::int(1, None))),
            ("padding", Some(Value::int(0, None))),
            ("dilation", Some(Value::int(1, None))),
            ("groups", Some(Value::int(1, None))),
        ],
        None,
    );
    let relu = native("relu", "torch.unary", &[("input", None)], None);

    b.place(TORCH_NN_FUNCTIONAL_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("torch.nn.functional", None))
            .with_attr("conv2d", conv2d.clone())
            .with_attr("relu", relu.clone())
            .with_attr(
                "linear",
                native(
                    "linear",
                    "torch.linear",
                    &[("input", None), ("weight", None), ("bias", Some(Value::None))],
                    None,
                ),
            )
            .with_attr(
                "max_pool2d",
                native(
                    "max_pool2d",
                    "torch.pool2d",
                    &[
                        ("input", None),
                        ("kernel_size", None),
                        ("stride", Some(Value::None)),
                        ("padding", Some(Value::int(0, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "avg_pool2d",
                native(
                    "avg_pool2d",
                    "torch.pool2d",
                    &[
                        ("input", None),
                        ("kernel_size", None),
                        ("stride", Some(Value::None)),
                        ("padding", Some(Value::int(0, None))),
                    ],
                    None,
                ),
            )
            .with_attr("softmax", native("softmax", "torch.unary_dim", &[("input", None), ("dim", Some(Value::None))], None))
    });

    b.place(TORCH_NN_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("torch.nn", None))
            .with_attr("functional", Value::Addr(TORCH_NN_FUNCTIONAL_ADDR))
            .with_attr("Module", Value::Addr(OBJECT_CLASS_ADDR))
            .with_attr(
                "Conv2d",
                native(
                    "Conv2d",
                    "torch.nn.Conv2d",
                    &[
                        ("in_channels", None),
                        ("out_channels", None),
                        ("kernel_size", None),
                        ("stride", Some(Value::int(1, None))),
                        ("padding", Some(Value::int(0, None))),
                        ("dilation", Some(Value::int(1, None))),
                        ("groups", Some(Value::int(1, None))),
                        ("bias", Some(Value::bool_const(true, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "Linear",
                native(
                    "Linear",
                    "torch.nn.Linear",
                    &[
                        ("in_features", None),
                        ("out_features", None),
                        ("bias", Some(Value::bool_const(true, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "BatchNorm2d",
                native("BatchNorm2d", "torch.nn.BatchNorm2d", &[("num_features", None)], None),
            )
            .with_attr(
                "MaxPool2d",
                native(
                    "MaxPool2d",
                    "torch.nn.Pool2d",
                    &[
                        ("kernel_size", None),
                        ("stride", Some(Value::None)),
                        ("padding", Some(Value::int(0, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "AvgPool2d",
                native(
                    "AvgPool2d",
                    "torch.nn.Pool2d",
                    &[
                        ("kernel_size", None),
                        ("stride", Some(Value::None)),
                        ("padding", Some(Value::int(0, None))),
                    ],
                    None,
                ),
            )
            .with_attr("ReLU", native("ReLU", "torch.nn.Identity", &[], Some("args")))
            .with_attr("Sigmoid", native("Sigmoid", "torch.nn.Identity", &[], Some("args")))
            .with_attr("Tanh", native("Tanh", "torch.nn.Identity", &[], Some("args")))
            .with_attr("Dropout", native("Dropout", "torch.nn.Identity", &[], Some("args")))
            .with_attr("Flatten", native("Flatten", "torch.nn.Flatten", &[], Some("args")))
    });

    b.place(TORCH_MODULE_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("torch", None))
            .with_attr("nn", Value::Addr(TORCH_NN_ADDR))
            .with_attr("Tensor", Value::Addr(TENSOR_CLASS_ADDR))
            .with_attr("float", Value::string("torch.float", None))
            .with_attr("float32", Value::string("torch.float32", None))
            .with_attr("int64", Value::string("torch.int64", None))
            .with_attr("long", Value::string("torch.long", None))
            .with_attr("tensor", native("tensor", "torch.tensor", &[("data", None)], None))
            .with_attr("zeros", native("zeros", "torch.full", &[], Some("size")))
            .with_attr("ones", native("ones", "torch.full", &[], Some("size")))
            .with_attr("rand", native("rand", "torch.full", &[], Some("size")))
            .with_attr("randn", native("randn", "torch.full", &[], Some("size")))
            .with_attr("empty", native("empty", "torch.full", &[], Some("size")))
            .with_attr("conv2d", conv2d)
            .with_attr("relu", relu)
            .with_attr("sigmoid", native("sigmoid", "torch.unary", &[("input", None)], None))
            .with_attr("tanh", native("tanh", "torch.unary", &[("input", None)], None))
            .with_attr(
                "matmul",
                native("matmul", "torch.matmul", &[("input", None), ("other", None)], None),
            )
            .with_attr("mm", native("mm", "torch.mm", &[("input", None), ("mat2", None)], None))
            .with_attr("bmm", native("bmm", "torch.bmm", &[("input", None), ("mat2", None)], None))
            .with_attr(
                "cat",
                native("cat", "torch.cat", &[("tensors", None), ("dim", Some(Value::int(0, None)))], None),
            )
            .with_attr(
                "stack",
                native(
                    "stack",
                    "torch.stack",
                    &[("tensors", None), ("dim", Some(Value::int(0, None)))],
                    None,
                ),
            )
            .with_attr(
                "flatten",
                native(
                    "flatten",
                    "torch.flatten",
                    &[
                        ("input", None),
                        ("start_dim", Some(Value::int(0, None))),
                        ("end_dim", Some(Value::int(-1, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "transpose",
                native(
                    "transpose",
                    "torch.transpose",
                    &[("input", None), ("dim0", None), ("dim1", None)],
                    None,
                ),
            )
            .with_attr(
                "reshape",
                native("reshape", "torch.reshape", &[("input", None), ("shape", None)], None),
            )
            .with_attr(
                "squeeze",
                native("squeeze", "torch.squeeze", &[("input", None), ("dim", Some(Value::None))], None),
            )
            .with_attr(
                "unsqueeze",
                native("unsqueeze", "torch.unsqueeze", &[("input", None), ("dim", None)], None),
            )
            .with_attr(
                "sum",
                native(
                    "sum",
                    "torch.sum",
                    &[
                        ("input", None),
                        ("dim", Some(Value::None)),
                        ("keepdim", Some(Value::bool_const(false, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "mean",
                native(
                    "mean",
                    "torch.mean",
                    &[
                        ("input", None),
                        ("dim", Some(Value::None)),
                        ("keepdim", Some(Value::bool_const(false, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "argmax",
                native(
                    "argmax",
                    "torch.argmax",
                    &[
                        ("input", None),
                        ("dim", Some(Value::None)),
                        ("keepdim", Some(Value::bool_const(false, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "topk",
                native(
                    "topk",
                    "torch.topk",
                    &[("input", None), ("k", None), ("dim", Some(Value::int(-1, None)))],
                    None,
                ),
            )
            .with_attr(
                "narrow",
                native(
                    "narrow",
                    "torch.narrow",
                    &[("input", None), ("dim", None), ("start", None), ("length", None)],
                    None,
                ),
            )
    });
}

fn install_numpy(b: &mut Builder) {
    b.place(NUMPY_MODULE_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("numpy", None))
            .with_attr("array", native("array", "numpy.array", &[("object", None)], None))
            .with_attr("zeros", native("zeros", "numpy.full", &[("shape", None)], None))
            .with_attr("ones", native("ones", "numpy.full", &[("shape", None)], None))
            .with_attr("ndarray", Value::Addr(TENSOR_CLASS_ADDR))
    });
}

fn install_math(b: &mut Builder) {
    b.place(MATH_MODULE_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("math", None))
            .with_attr("pi", Value::float(std::f64::consts::PI, None))
            .with_attr("e", Value::float(std::f64::consts::E, None))
            .with_attr("floor", native("floor", "math.floor", &[("value", None)], None))
            .with_attr("ceil", native("ceil", "math.ceil", &[("value", None)], None))
            .with_attr("sqrt", native("sqrt", "math.opaque", &[("value", None)], None))
            .with_attr("log", native("log", "math.opaque", &[("value", None)], None))
            .with_attr("exp", native("exp", "math.opaque", &[("value", None)], None))
            .with_attr("pow", native("pow", "math.opaque", &[("base", None), ("exp", None)], None))
    });
}

fn install_argparse(b: &mut Builder) {
    b.place(ARGPARSE_PARSER_CLASS_ADDR, |obj| {
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("ArgumentParser", None))
            .with_attr(
                "add_argument",
                native(
                    "add_argument",
                    "argparse.inject_argument",
                    &[
                        ("self", None),
                        ("name", None),
                        ("type", Some(Value::None)),
                        ("default", Some(Value::None)),
                        ("help", Some(Value::None)),
                        ("action", Some(Value::None)),
                        ("required", Some(Value::bool_const(false, None))),
                    ],
                    None,
                ),
            )
            .with_attr(
                "parse_args",
                native("parse_args", "argparse.parse_args", &[("self", None)], Some("rest")),
            )
            .with_attr(
                "set_defaults",
                native("set_defaults", "argparse.set_defaults", &[("self", None)], Some("rest")),
            )
            .with_attr(
                "add_subparsers",
                native("add_subparsers", "argparse.set_subcommand", &[("self", None)], Some("rest")),
            )
    });
    b.place(ARGPARSE_MODULE_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("argparse", None))
            .with_attr(
                "ArgumentParser",
                native("ArgumentParser", "argparse.ArgumentParser", &[], Some("args")),
            )
    });
}

fn install_pil(b: &mut Builder) {
    b.place(PIL_IMAGE_CLASS_ADDR, |obj| {
        obj.with_attr("$isclass", Value::bool_const(true, None))
            .with_attr("__name__", Value::string("Image", None))
            .with_attr(
                "convert",
                native("convert", "PIL.identity", &[("self", None)], Some("args")),
            )
            .with_attr(
                "resize",
                native("resize", "PIL.resize", &[("self", None), ("size", None)], None),
            )
    });
    b.place(PIL_IMAGE_MODULE_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("PIL.Image", None))
            .with_attr("open", native("open", "PIL.open", &[("fp", None)], None))
    });
    b.place(PIL_MODULE_ADDR, |obj| {
        obj.with_attr("$class", Value::Addr(MODULE_CLASS_ADDR))
            .with_attr("__name__", Value::string("PIL", None))
            .with_attr("Image", Value::Addr(PIL_IMAGE_MODULE_ADDR))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_binds_core_globals() {
        let ctx = install(Context::new());
        for name in ["len", "print", "range", "isinstance", "int", "float"] {
            let addr = ctx.env.get_id(name).unwrap_or_else(|| panic!("{name} missing"));
            assert!(addr.is_builtin());
            assert!(ctx.heap.get_val(addr).is_some());
        }
    }

    #[test]
    fn module_addresses_resolve() {
        assert_eq!(module_addr("torch"), Some(TORCH_MODULE_ADDR));
        assert_eq!(module_addr("torch.nn.functional"), Some(TORCH_NN_FUNCTIONAL_ADDR));
        assert_eq!(module_addr("os"), None);
    }

    #[test]
    fn torch_module_exposes_conv2d() {
        let ctx = install(Context::new());
        let module = ctx.heap.get_val(TORCH_MODULE_ADDR).unwrap();
        let Value::Object(module) = module else {
            panic!("torch module is not an object")
        };
        assert!(matches!(module.attrs.get("conv2d"), Some(Value::Func(_))));
        assert_eq!(module.attrs.get("nn"), Some(&Value::Addr(TORCH_NN_ADDR)));
    }
}
