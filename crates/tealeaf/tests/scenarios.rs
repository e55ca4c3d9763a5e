//! End-to-end analysis scenarios driven from Python source.

use ahash::AHashSet;
use pretty_assertions::assert_eq;
use tealeaf::{
    Analyzer, CmdVal, Context, ContextSet, Options, PathVerdict, Value,
    symexp::{NumKind, ShapeExp},
};

fn analyze(code: &str) -> (tealeaf::AnalysisReport, ContextSet) {
    analyze_with_opts(code, Options::default())
}

fn analyze_with_opts(code: &str, opts: Options) -> (tealeaf::AnalysisReport, ContextSet) {
    let analyzer = Analyzer::new(opts);
    let arg_source = tealeaf::MapArgSource::new(analyzer.options().cmd_args.clone());
    let mut tracer = tealeaf::tracer::NoopTracer;
    analyzer
        .analyze_with(
            code,
            &tealeaf::RangeOracle,
            &arg_source,
            &mut tracer,
            tealeaf::CancelToken::new(),
        )
        .expect("analysis should not fail to parse")
}

/// Looks a variable up and follows it to its heap value.
fn value_of(ctx: &Context, name: &str) -> Value {
    let addr = ctx.env.get_id(name).unwrap_or_else(|| panic!("'{name}' not bound"));
    ctx.heap.get_val(addr).unwrap_or_else(|| panic!("'{name}' dangling")).clone()
}

/// The shape of a tensor variable, as concrete dims.
fn shape_of(ctx: &Context, name: &str) -> Vec<i64> {
    let shape = shape_exp_of(ctx, name);
    let dims = shape.as_const_dims().unwrap_or_else(|| panic!("'{name}' has symbolic rank"));
    dims.iter()
        .map(|dim| dim.as_int().unwrap_or_else(|| panic!("'{name}' has symbolic dims: {shape}")))
        .collect()
}

fn shape_exp_of(ctx: &Context, name: &str) -> ShapeExp {
    let value = value_of(ctx, name);
    let addr = value.as_addr().unwrap_or_else(|| panic!("'{name}' is not a tensor: {value}"));
    let Some(Value::Object(obj)) = ctx.heap.follow(addr) else {
        panic!("'{name}' is not an object");
    };
    if let Some(shape) = &obj.shape {
        return shape.clone();
    }
    let Some(size) = obj.attrs.get("shape").and_then(Value::as_addr) else {
        panic!("'{name}' has no shape attribute");
    };
    let Some(Value::Object(size)) = ctx.heap.follow(size) else {
        panic!("'{name}' has a dangling Size");
    };
    size.shape.clone().expect("Size without a shape")
}

#[test]
fn conv_then_view() {
    let (report, set) = analyze(
        "import torch\n\
         x = torch.zeros(4, 3, 32, 32)\n\
         w = torch.zeros(6, 3, 5, 5)\n\
         y = torch.conv2d(x, w, None, (1, 1), (0, 0), (1, 1), 1)\n\
         z = y.view(4, -1)\n",
    );
    assert_eq!(report.failure_count(), 0);
    assert_eq!(set.live().len(), 1);
    assert!(set.failed().is_empty());
    let ctx = &set.live()[0];
    assert_eq!(shape_of(ctx, "y"), vec![4, 6, 28, 28]);
    assert_eq!(shape_of(ctx, "z"), vec![4, 6 * 28 * 28]);
    // all obligations were decided on the spot
    assert!(ctx.ctr_set.constraints().is_empty());
}

#[test]
fn broadcast_mismatch_fails_the_path() {
    let (report, set) = analyze(
        "import torch\n\
         a = torch.zeros(2, 3)\n\
         b = torch.zeros(4, 3)\n\
         c = a + b\n",
    );
    assert_eq!(set.live().len(), 0);
    assert_eq!(set.failed().len(), 1);
    assert_eq!(report.failure_count(), 1);
    let failure = set.failed()[0].failed.as_ref().expect("failure record");
    assert!(failure.message.contains("broadcastable"), "message: {}", failure.message);
}

#[test]
fn symbolic_batch_matmul() {
    let (report, set) = analyze(
        "import argparse\n\
         import torch\n\
         parser = argparse.ArgumentParser()\n\
         parser.add_argument(\"--n\", type=int)\n\
         args = parser.parse_args()\n\
         x = torch.zeros(args.n, 10)\n\
         w = torch.zeros(10, 4)\n\
         y = torch.matmul(x, w)\n",
    );
    assert_eq!(report.failure_count(), 0);
    assert_eq!(set.live().len(), 1);
    let ctx = &set.live()[0];
    let shape = shape_exp_of(ctx, "y");
    let dims = shape.as_const_dims().expect("result rank is known");
    assert_eq!(dims.len(), 2);
    assert!(matches!(dims[0].kind, NumKind::Symbol(_)), "batch dim stays symbolic");
    assert_eq!(dims[1].as_int(), Some(4));
    // the matmul precondition on the symbolic batch was recorded
    assert!(
        !ctx.ctr_set.constraints().is_empty(),
        "expected a recorded constraint on the batch dim"
    );
}

#[test]
fn for_loop_sums_symbolic_elements() {
    let (report, set) = analyze(
        "import argparse\n\
         parser = argparse.ArgumentParser()\n\
         parser.add_argument(\"--a\", type=int)\n\
         parser.add_argument(\"--b\", type=int)\n\
         parser.add_argument(\"--c\", type=int)\n\
         args = parser.parse_args()\n\
         total = 0\n\
         for i in [args.a, args.b, args.c]:\n\
             total = total + i\n",
    );
    assert_eq!(report.failure_count(), 0);
    assert_eq!(set.live().len(), 1);
    let ctx = &set.live()[0];
    let Value::Int(total) = value_of(ctx, "total") else {
        panic!("total is not an int");
    };
    let mut symbols = AHashSet::new();
    total.collect_symbols(&mut symbols);
    assert_eq!(symbols.len(), 3, "total sums the three element symbols: {total}");
}

#[test]
fn conditional_shapes_fork() {
    let (report, set) = analyze(
        "import argparse\n\
         import torch\n\
         parser = argparse.ArgumentParser()\n\
         parser.add_argument(\"--flag\", type=bool)\n\
         args = parser.parse_args()\n\
         x = torch.zeros(6)\n\
         if args.flag:\n\
             y = torch.reshape(x, (2, 3))\n\
         else:\n\
             y = torch.reshape(x, (3, 2))\n",
    );
    assert_eq!(report.failure_count(), 0);
    assert_eq!(set.live().len(), 2);
    let shapes: Vec<Vec<i64>> = set.live().iter().map(|ctx| shape_of(ctx, "y")).collect();
    assert_eq!(shapes, vec![vec![2, 3], vec![3, 2]]);
    for ctx in set.live() {
        assert!(
            !ctx.ctr_set.constraints().is_empty(),
            "each branch carries its flag constraint"
        );
    }
}

#[test]
fn argparse_injects_concrete_values() {
    let mut opts = Options::default();
    opts.cmd_args.insert("lr".to_owned(), CmdVal::Str("0.1".to_owned()));
    let (_, set) = analyze_with_opts(
        "import argparse\n\
         parser = argparse.ArgumentParser()\n\
         parser.add_argument(\"--lr\", type=float)\n\
         args = parser.parse_args()\n\
         lr = args.lr\n",
        opts,
    );
    let ctx = &set.live()[0];
    assert_eq!(value_of(ctx, "lr"), Value::float(0.1, None));
}

#[test]
fn argparse_falls_back_to_a_named_symbol() {
    let (_, set) = analyze(
        "import argparse\n\
         parser = argparse.ArgumentParser()\n\
         parser.add_argument(\"--lr\", type=float)\n\
         args = parser.parse_args()\n\
         lr = args.lr\n",
    );
    let ctx = &set.live()[0];
    let Value::Float(exp) = value_of(ctx, "lr") else {
        panic!("lr is not a float");
    };
    let NumKind::Symbol(sym) = &exp.kind else {
        panic!("lr is not symbolic: {exp}");
    };
    assert_eq!(sym.name, "arg_lr");
}

#[test]
fn rank_zero_conv_input_fails() {
    let (report, set) = analyze(
        "import torch\n\
         x = torch.zeros()\n\
         w = torch.zeros(6, 3, 5, 5)\n\
         y = torch.conv2d(x, w)\n",
    );
    assert_eq!(report.failure_count(), 1);
    assert_eq!(set.failed().len(), 1);
    let failure = set.failed()[0].failed.as_ref().expect("failure record");
    assert!(failure.message.contains("conv2d"), "message: {}", failure.message);
}

#[test]
fn negative_shape_index_is_normalized() {
    let (_, set) = analyze(
        "import torch\n\
         x = torch.zeros(4, 7)\n\
         last = x.shape[-1]\n\
         first = x.shape[0]\n",
    );
    let ctx = &set.live()[0];
    assert_eq!(value_of(ctx, "last"), Value::int(7, None));
    assert_eq!(value_of(ctx, "first"), Value::int(4, None));
}

#[test]
fn broadcasting_follows_the_right_aligned_rule() {
    let (report, set) = analyze(
        "import torch\n\
         a = torch.zeros(3)\n\
         b = torch.zeros(1, 3)\n\
         c = a + b\n\
         d = torch.zeros(2, 3)\n\
         e = a + d\n",
    );
    assert_eq!(report.failure_count(), 0);
    let ctx = &set.live()[0];
    assert_eq!(shape_of(ctx, "c"), vec![1, 3]);
    assert_eq!(shape_of(ctx, "e"), vec![2, 3]);
}

#[test]
fn incompatible_rank1_broadcast_is_an_error() {
    let (report, set) = analyze(
        "import torch\n\
         a = torch.zeros(2)\n\
         b = torch.zeros(3)\n\
         c = a + b\n",
    );
    assert_eq!(report.failure_count(), 1);
    assert_eq!(set.live().len(), 0);
}

#[test]
fn nn_module_pipeline_composes() {
    let (report, set) = analyze(
        "import torch\n\
         import torch.nn as nn\n\
         conv = nn.Conv2d(3, 16, 3, 1, 1)\n\
         x = torch.zeros(8, 3, 64, 64)\n\
         y = conv(x)\n\
         z = y.flatten(1, -1)\n",
    );
    assert_eq!(report.failure_count(), 0, "report: {report}");
    let ctx = &set.live()[0];
    assert_eq!(shape_of(ctx, "y"), vec![8, 16, 64, 64]);
    assert_eq!(shape_of(ctx, "z"), vec![8, 16 * 64 * 64]);
}

#[test]
fn linear_mismatch_is_reported() {
    let (report, _) = analyze(
        "import torch\n\
         import torch.nn as nn\n\
         fc = nn.Linear(100, 10)\n\
         x = torch.zeros(32, 99)\n\
         y = fc(x)\n",
    );
    assert_eq!(report.failure_count(), 1);
}

#[test]
fn assert_statements_add_obligations() {
    let (report, set) = analyze(
        "import torch\n\
         x = torch.zeros(3, 5)\n\
         assert x.shape[0] == 3\n\
         assert x.shape[1] == 4\n",
    );
    assert_eq!(report.failure_count(), 1);
    assert!(set.live().is_empty());
}

#[test]
fn ignore_assert_option_skips_them() {
    let mut opts = Options::default();
    opts.ignore_assert = true;
    let (report, _) = analyze_with_opts(
        "import torch\n\
         x = torch.zeros(3, 5)\n\
         assert x.shape[1] == 4\n",
        opts,
    );
    assert_eq!(report.failure_count(), 0);
}

#[test]
fn unsupported_constructs_keep_the_path_alive() {
    let (report, set) = analyze(
        "import torch\n\
         x = torch.zeros(2, 2)\n\
         while True:\n\
             pass\n\
         y = x + x\n",
    );
    assert_eq!(report.failure_count(), 0);
    assert_eq!(set.live().len(), 1);
    let ctx = &set.live()[0];
    assert_eq!(shape_of(ctx, "y"), vec![2, 2]);
    assert_eq!(report.paths[0].verdict, PathVerdict::Warning);
}

#[test]
fn cat_accumulates_the_chosen_dim() {
    let (report, set) = analyze(
        "import torch\n\
         a = torch.zeros(2, 5)\n\
         b = torch.zeros(3, 5)\n\
         c = torch.cat([a, b], 0)\n",
    );
    assert_eq!(report.failure_count(), 0, "report: {report}");
    let ctx = &set.live()[0];
    assert_eq!(shape_of(ctx, "c"), vec![5, 5]);
}

#[test]
fn rerunning_a_handler_on_its_output_adds_no_obligations() {
    let (report, set) = analyze(
        "import torch\n\
         x = torch.zeros(2, 3)\n\
         y = x.view(3, 2)\n\
         z = y.view(3, 2)\n\
         w = z + z\n",
    );
    assert_eq!(report.failure_count(), 0);
    let ctx = &set.live()[0];
    assert_eq!(shape_of(ctx, "z"), vec![3, 2]);
    assert_eq!(shape_of(ctx, "w"), vec![3, 2]);
    assert!(ctx.ctr_set.constraints().is_empty(), "no residual obligations");
}

#[test]
fn squeeze_forks_on_an_undecided_dim() {
    let (report, set) = analyze(
        "import argparse\n\
         import torch\n\
         parser = argparse.ArgumentParser()\n\
         parser.add_argument(\"--n\", type=int)\n\
         args = parser.parse_args()\n\
         x = torch.zeros(args.n, 3)\n\
         y = torch.squeeze(x, 0)\n",
    );
    assert_eq!(report.failure_count(), 0);
    assert_eq!(set.live().len(), 2, "squeeze forks on n == 1");
}
