//! The path-forking evaluator of the lowered language.
//!
//! Evaluation is single-threaded and deterministic: forking is explicit in
//! the [`ContextSet`] and exploration follows insertion order. Every
//! operation runs to completion; the only call-outs are synchronous handler
//! dispatches and oracle queries. Errors never use host exceptions: a failed
//! evaluation produces a `Value::Error` temporary that short-circuits the
//! rest of its path until the next statement boundary.

use indexmap::IndexMap;

use crate::{
    builtins,
    config::{ArgSource, CancelToken, Options},
    context::{Context, ContextSet, Flow, RetVal},
    error::{Diagnostic, ErrorKind},
    handlers,
    heap::Addr,
    ir::{BinOp, ConstVal, Expr, ExprKind, FunDef, Stmt, StmtKind, UnOp},
    parse::CodeRange,
    simplify,
    solver::SolverOracle,
    symexp::{BoolExp, NumBop, NumExp, NumUop, SymExp},
    tracer::ExecTracer,
    value::{Func, Object, Value},
};

/// Truthiness of a value, classified exactly as Python does for concrete
/// values and symbolically otherwise.
pub(crate) enum Truth {
    Known(bool),
    Sym(BoolExp),
    Err(Diagnostic),
}

/// The symbolic interpreter.
///
/// Owns no path state: every method threads a [`ContextSet`] through. The
/// struct carries the run-wide collaborators (options, oracle, argument
/// source, tracer, cancellation) and the current call depth.
pub struct Interp<'a> {
    pub opts: &'a Options,
    pub oracle: &'a dyn SolverOracle,
    pub arg_source: &'a dyn ArgSource,
    pub tracer: &'a mut dyn ExecTracer,
    pub cancel: CancelToken,
    pub(crate) call_depth: u32,
}

impl<'a> Interp<'a> {
    pub fn new(
        opts: &'a Options,
        oracle: &'a dyn SolverOracle,
        arg_source: &'a dyn ArgSource,
        tracer: &'a mut dyn ExecTracer,
        cancel: CancelToken,
    ) -> Self {
        Self {
            opts,
            oracle,
            arg_source,
            tracer,
            cancel,
            call_depth: 0,
        }
    }

    /// Executes a whole lowered module over the given initial paths.
    pub fn exec_module(&mut self, stmt: &Stmt, set: ContextSet) -> ContextSet {
        let result = self.exec_stmt(stmt, set);
        // Whatever flow state paths ended in, the module boundary resets it.
        result.map(|ctx| ctx.with_flow(Flow::Run))
    }

    // -- statements ---------------------------------------------------------

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, set: ContextSet) -> ContextSet {
        if self.cancel.is_cancelled() {
            return set.cancel();
        }
        let set = absorb_errors(set);
        if set.is_empty() {
            return set;
        }
        self.tracer.on_stmt(set.live().len(), stmt.span);
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Pass => set,
            StmtKind::Expr(expr) => self.eval_expr(expr, set),
            StmtKind::Seq(stmts) => self.exec_seq(stmts, set),
            StmtKind::Assign { target, value } => self.exec_assign(target, value, set, span),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.exec_if(cond, then_branch, else_branch, set, span),
            StmtKind::ForIn { target, iter, body } => self.exec_for(target, iter, body, set, span),
            StmtKind::Return(value) => {
                let set = match value {
                    Some(value) => self.eval_expr(value, set),
                    None => set.return_value(Value::None),
                };
                set.map(|ctx| ctx.with_flow(Flow::Ret))
            }
            StmtKind::Break => set.map(|ctx| ctx.with_flow(Flow::Brk)),
            StmtKind::Continue => set.map(|ctx| ctx.with_flow(Flow::Cnt)),
            StmtKind::Let { name, init, scope } => self.exec_let(name, init.as_ref(), scope, set, span),
            StmtKind::FunDef(def) => self.exec_fundef(def, set, span),
        }
    }

    fn exec_seq(&mut self, stmts: &[Stmt], set: ContextSet) -> ContextSet {
        let mut acc = set;
        for stmt in stmts {
            let (running, parked) = acc.partition_live(|ctx| ctx.flow == Flow::Run);
            if running.is_empty() {
                return running.absorb(parked);
            }
            acc = self.exec_stmt(stmt, running).absorb(parked);
        }
        acc
    }

    fn exec_assign(&mut self, target: &Expr, value: &Expr, set: ContextSet, span: Option<CodeRange>) -> ContextSet {
        let set = self.eval_expr(value, set);
        match &target.kind {
            ExprKind::Name(name) => set.map(|ctx| {
                if ctx.is_short_circuiting() {
                    return ctx.clone();
                }
                assign_name(ctx, name, ctx.ret_val.value())
            }),
            ExprKind::Attr { object, attr } => self.for_each_ctx(set, |interp, ctx| {
                let assigned = ctx.ret_val.value();
                let evaluated = interp.eval_expr(object, ContextSet::single(ctx.clone()));
                interp.for_each_ctx(evaluated, |_, octx| {
                    let target = octx.ret_val.value();
                    ContextSet::single(set_object_field(octx, &target, Field::Attr(attr), assigned.clone(), span))
                })
            }),
            ExprKind::Subscript { object, index } => self.for_each_ctx(set, |interp, ctx| {
                let assigned = ctx.ret_val.value();
                let pair = interp.eval_expr_list(&[(**object).clone(), (**index).clone()], ContextSet::single(ctx.clone()));
                interp.for_each_ctx(pair, |_, octx| {
                    let RetVal::Values(values) = &octx.ret_val else {
                        return ContextSet::single(octx.clone());
                    };
                    if let Some(diag) = first_error(values) {
                        return ContextSet::single(octx.set_ret_val(Value::Error(Box::new(diag))));
                    }
                    let (target, idx) = (values[0].clone(), values[1].clone());
                    let field = match index_field(octx, &idx) {
                        Ok(field) => field,
                        Err(diag) => return ContextSet::single(octx.set_ret_val(Value::Error(Box::new(diag)))),
                    };
                    ContextSet::single(set_object_field(octx, &target, field, assigned.clone(), span))
                })
            }),
            _ => set.map(|ctx| {
                ctx.warn(ErrorKind::Unsupported, "unsupported assignment target", span)
            }),
        }
    }

    fn exec_if(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: &Stmt,
        set: ContextSet,
        span: Option<CodeRange>,
    ) -> ContextSet {
        let cond_set = self.eval_expr(cond, set);
        let (live, failed, cancelled) = cond_set.into_parts();
        let mut then_in = Vec::new();
        let mut else_in = Vec::new();
        let mut sym_in = Vec::new();
        let mut pass_through = Vec::new();
        for ctx in live {
            if ctx.is_short_circuiting() {
                pass_through.push(ctx);
                continue;
            }
            match truthiness(&ctx, &ctx.ret_val.value(), span) {
                Truth::Known(true) => then_in.push(ctx),
                Truth::Known(false) => else_in.push(ctx),
                Truth::Sym(cond) => {
                    let boxed = Value::Bool(cond);
                    sym_in.push(ctx.set_ret_val(boxed));
                }
                Truth::Err(diag) => pass_through.push(ctx.set_ret_val(Value::Error(Box::new(diag)))),
            }
        }
        let sym_set = ContextSet::from_parts(sym_in, failed, cancelled);
        let (forked_then, forked_else) = sym_set.if_then_else(
            |ctx| match &ctx.ret_val {
                RetVal::Value(Value::Bool(cond)) => cond.clone(),
                _ => BoolExp::constant(true, span),
            },
            span,
            self.oracle,
        );
        let then_all = forked_then.absorb(then_in);
        let else_all = forked_else.absorb(else_in);
        self.tracer.on_fork(then_all.live().len(), else_all.live().len(), span);

        let then_out = if then_all.is_empty() {
            then_all
        } else {
            self.exec_stmt(then_branch, then_all)
        };
        let else_out = if else_all.is_empty() {
            else_all
        } else {
            self.exec_stmt(else_branch, else_all)
        };
        then_out
            .join(&else_out)
            .absorb(pass_through)
            .apply_path_cap(self.opts.path_cap, span)
    }

    fn exec_for(&mut self, target: &str, iter: &Expr, body: &Stmt, set: ContextSet, span: Option<CodeRange>) -> ContextSet {
        let iter_set = self.eval_expr(iter, set);
        let out = self.for_each_ctx(iter_set, |interp, ctx| {
            let value = ctx.ret_val.value();
            match interp.plan_iteration(ctx, &value, span) {
                IterPlan::Items(items) => interp.run_loop(target, &items, body, ContextSet::single(ctx.clone()), span),
                IterPlan::Ranged { object, length, lo, hi } => {
                    let mut joined = ContextSet::default();
                    for k in lo..=hi {
                        let pinned = ctx.guarantee(&BoolExp::eq_num(length.clone(), NumExp::int(k, span), span));
                        let items: Vec<Value> = (0..k).map(|i| index_value(&object, i, span)).collect();
                        let run = interp.run_loop(target, &items, body, ContextSet::single(pinned), span);
                        joined = joined.join(&run);
                    }
                    joined.apply_path_cap(interp.opts.path_cap, span)
                }
                IterPlan::Once { ctx, item } => {
                    let bound = assign_name(&ctx, target, item);
                    let run = interp.exec_stmt(body, ContextSet::single(bound));
                    run.map(|c| match c.flow {
                        Flow::Brk | Flow::Cnt => c.with_flow(Flow::Run),
                        _ => c.clone(),
                    })
                }
                IterPlan::Skip(ctx) => ContextSet::single(ctx),
            }
        });
        out.map(|ctx| match ctx.flow {
            Flow::Brk => ctx.with_flow(Flow::Run),
            _ => ctx.clone(),
        })
    }

    fn run_loop(
        &mut self,
        target: &str,
        items: &[Value],
        body: &Stmt,
        set: ContextSet,
        span: Option<CodeRange>,
    ) -> ContextSet {
        let _ = span;
        let mut acc = set;
        for item in items {
            let (running, parked) = acc.partition_live(|ctx| ctx.flow == Flow::Run);
            if running.is_empty() {
                acc = running.absorb(parked);
                break;
            }
            let bound = running.map(|ctx| assign_name(ctx, target, item.clone()));
            let after = self.exec_stmt(body, bound);
            // `continue` only skips to the next iteration.
            let after = after.map(|ctx| match ctx.flow {
                Flow::Cnt => ctx.with_flow(Flow::Run),
                _ => ctx.clone(),
            });
            acc = after.absorb(parked);
        }
        // `break` is consumed by the loop itself.
        acc.map(|ctx| match ctx.flow {
            Flow::Brk => ctx.with_flow(Flow::Run),
            _ => ctx.clone(),
        })
    }

    fn plan_iteration(&mut self, ctx: &Context, value: &Value, span: Option<CodeRange>) -> IterPlan {
        let target = ctx.deref(value);
        let Value::Object(obj) = target else {
            return IterPlan::Skip(ctx.warn(
                ErrorKind::Unsupported,
                format!("cannot iterate over {}", value.type_name()),
                span,
            ));
        };
        let Some(length_exp) = obj.length_exp().cloned() else {
            return IterPlan::Skip(ctx.warn(ErrorKind::Unsupported, "iterable has no known length", span));
        };
        // Tensors expose a length but their elements are sub-tensors, which
        // this analysis does not materialize per iteration.
        if obj.shape.is_none() && obj.attrs.contains_key("shape") {
            return IterPlan::Skip(ctx.warn(ErrorKind::Unsupported, "iterating a tensor is not modeled", span));
        }
        if let Some(n) = length_exp.as_int() {
            let n = n.clamp(0, self.opts.max_unroll);
            let items = (0..n).map(|i| index_value(&obj, i, span)).collect();
            return IterPlan::Items(items);
        }
        // Symbolic length: unroll over a small constant range when the path
        // conditions pin one down. Only containers whose elements can be
        // produced at an arbitrary index qualify.
        let indexable = obj.shape.is_some() || obj.attrs.contains_key("$range");
        let range = ctx.ctr_set.eval_range(&length_exp);
        if indexable
            && let (Some(lo), Some(hi)) = (
                range.low.as_ref().and_then(crate::rational::Rational::as_i64),
                range.high.as_ref().and_then(crate::rational::Rational::as_i64),
            )
            && lo >= 0
            && hi >= lo
            && hi - lo <= 4
            && hi <= self.opts.max_unroll
        {
            return IterPlan::Ranged {
                object: (*obj).clone(),
                length: length_exp,
                lo,
                hi,
            };
        }
        // Fallback: one pass with a fresh bounded index symbol.
        let warned = ctx.warn(
            ErrorKind::Unsupported,
            "loop bound is unbounded; body analyzed once with a symbolic index",
            span,
        );
        let index = warned.syms.fresh_num("loop_index", span);
        let bounded = warned
            .guarantee(&BoolExp::lte(NumExp::int(0, span), index.clone(), span))
            .guarantee(&BoolExp::lt(index.clone(), length_exp, span));
        let item = symbolic_index_value(&bounded, &obj, &index, span);
        IterPlan::Once { ctx: bounded, item }
    }

    fn exec_let(
        &mut self,
        name: &str,
        init: Option<&Expr>,
        scope: &Stmt,
        set: ContextSet,
        span: Option<CodeRange>,
    ) -> ContextSet {
        let set = match init {
            Some(init) => self.eval_expr(init, set),
            None => set.return_value(Value::Undef),
        };
        self.for_each_ctx(set, |interp, ctx| {
            let saved = ctx.env.get_id(name);
            let init_value = match init {
                Some(_) => ctx.ret_val.value(),
                None => Value::Undef,
            };
            let (addr, ctx) = ctx.alloc(init_value, span);
            let bound = ctx.with_env(ctx.env.set_id(name, addr));
            let result = interp.exec_stmt(scope, ContextSet::single(bound));
            // The binding is scoped to the inner statement.
            result.map(|c| {
                let env = match saved {
                    Some(old) => c.env.set_id(name, old),
                    None => c.env.remove_id(name),
                };
                c.with_env(env)
            })
        })
    }

    fn exec_fundef(&mut self, def: &FunDef, set: ContextSet, span: Option<CodeRange>) -> ContextSet {
        // Default expressions are evaluated at definition time.
        let default_params: Vec<&crate::ir::Param> = def.params.iter().filter(|p| p.default.is_some()).collect();
        let default_exprs: Vec<Expr> = default_params
            .iter()
            .map(|p| p.default.clone().expect("filtered on default"))
            .collect();
        let default_names: Vec<String> = default_params.iter().map(|p| p.name.clone()).collect();
        let set = self.eval_expr_list(&default_exprs, set);
        set.map(|ctx| {
            if ctx.is_short_circuiting() {
                return ctx.clone();
            }
            let RetVal::Values(values) = &ctx.ret_val else {
                return ctx.clone();
            };
            if let Some(diag) = first_error(values) {
                return ctx.set_ret_val(Value::Error(Box::new(diag)));
            }
            let defaults: IndexMap<String, Value> = default_names.iter().cloned().zip(values.iter().cloned()).collect();
            // Python-style rebind: reuse the existing cell so closures that
            // captured the address observe the new function.
            let (addr, ctx) = match ctx.env.get_id(&def.name) {
                Some(addr) => (addr, ctx.clone()),
                None => {
                    let (addr, ctx) = ctx.alloc(Value::Undef, span);
                    (addr, ctx.with_env(ctx.env.set_id(def.name.as_str(), addr)))
                }
            };
            let func = Func {
                id: ctx.objs.fresh(),
                name: def.name.clone(),
                params: def.params.iter().map(|p| p.name.clone()).collect(),
                defaults,
                body: std::sync::Arc::new(def.body.clone()),
                captured: ctx.env.clone(),
                has_closure: true,
                varargs: def.varargs.clone(),
                kwargs: def.kwargs.clone(),
                key_only_count: def.key_only_count,
                bound_self: None,
            };
            let heap = ctx.heap.set_val(addr, Value::Func(Box::new(func)));
            ctx.with_heap(heap).set_ret_val(Value::None)
        })
    }

    // -- expressions --------------------------------------------------------

    pub(crate) fn eval_expr(&mut self, expr: &Expr, set: ContextSet) -> ContextSet {
        let (active, parked) = set.partition_live(|ctx| !ctx.is_short_circuiting());
        if active.is_empty() {
            return active.absorb(parked);
        }
        let result = self.eval_expr_inner(expr, active);
        result.absorb(parked)
    }

    fn eval_expr_inner(&mut self, expr: &Expr, set: ContextSet) -> ContextSet {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Const(value) => set.return_value(const_value(value, span)),
            ExprKind::Name(name) => set.map(|ctx| lookup_name(ctx, name, span)),
            ExprKind::Attr { object, attr } => {
                let set = self.eval_expr(object, set);
                self.for_each_ctx(set, |interp, ctx| {
                    let value = ctx.ret_val.value();
                    interp.attr_access(ctx, &value, attr, span)
                })
            }
            ExprKind::Subscript { object, index } => {
                let set = self.eval_expr_list(&[(**object).clone(), (**index).clone()], set);
                self.for_each_ctx(set, |interp, ctx| {
                    let RetVal::Values(values) = &ctx.ret_val else {
                        return ContextSet::single(ctx.clone());
                    };
                    if let Some(diag) = first_error(values) {
                        return ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag))));
                    }
                    let (object, index) = (values[0].clone(), values[1].clone());
                    interp.subscript_access(ctx, &object, &index, span)
                })
            }
            ExprKind::Call { callee, args } => {
                let mut exprs = Vec::with_capacity(args.len() + 1);
                exprs.push((**callee).clone());
                exprs.extend(args.iter().cloned());
                let set = self.eval_expr_list(&exprs, set);
                self.for_each_ctx(set, |interp, ctx| {
                    let RetVal::Values(values) = &ctx.ret_val else {
                        return ContextSet::single(ctx.clone());
                    };
                    if let Some(diag) = first_error(values) {
                        return ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag))));
                    }
                    let callee = values[0].clone();
                    let args = values[1..].to_vec();
                    interp.call_value(ctx, &callee, args, IndexMap::new(), span)
                })
            }
            ExprKind::LibCall { func, args } => {
                let names: Vec<String> = args.iter().map(|(name, _)| name.clone()).collect();
                let exprs: Vec<Expr> = args.iter().map(|(_, expr)| expr.clone()).collect();
                let set = self.eval_expr_list(&exprs, set);
                self.for_each_ctx(set, |interp, ctx| {
                    let RetVal::Values(values) = &ctx.ret_val else {
                        return ContextSet::single(ctx.clone());
                    };
                    if let Some(diag) = first_error(values) {
                        return ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag))));
                    }
                    let map: IndexMap<String, Value> = names.iter().cloned().zip(values.iter().cloned()).collect();
                    interp.tracer.on_libcall(func, span);
                    handlers::dispatch(interp, ctx, func, &map, span)
                })
            }
            ExprKind::BinOp { op, left, right } => match op {
                BinOp::And | BinOp::Or => self.eval_bool_op(*op, left, right, set, span),
                _ => {
                    let set = self.eval_expr_list(&[(**left).clone(), (**right).clone()], set);
                    self.for_each_ctx(set, |interp, ctx| {
                        let RetVal::Values(values) = &ctx.ret_val else {
                            return ContextSet::single(ctx.clone());
                        };
                        if let Some(diag) = first_error(values) {
                            return ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag))));
                        }
                        let (l, r) = (values[0].clone(), values[1].clone());
                        interp.binop_values(ctx, *op, &l, &r, span)
                    })
                }
            },
            ExprKind::UnaryOp { op, operand } => {
                let set = self.eval_expr(operand, set);
                set.map(|ctx| {
                    if ctx.is_short_circuiting() {
                        return ctx.clone();
                    }
                    let value = ctx.ret_val.value();
                    unary_value(ctx, *op, &value, span)
                })
            }
            ExprKind::Tuple(items) => {
                let set = self.eval_expr_list(items, set);
                set.map(|ctx| {
                    if ctx.is_short_circuiting() {
                        return ctx.clone();
                    }
                    let RetVal::Values(values) = &ctx.ret_val else {
                        return ctx.clone();
                    };
                    if let Some(diag) = first_error(values) {
                        return ctx.set_ret_val(Value::Error(Box::new(diag)));
                    }
                    let (addr, ctx) = make_tuple(ctx, values.clone(), span);
                    ctx.set_ret_val(Value::Addr(addr))
                })
            }
        }
    }

    /// Evaluates expressions in order, accumulating each path's values into
    /// `RetVal::Values`. Errors land inside the list and are handled by the
    /// consumer.
    pub(crate) fn eval_expr_list(&mut self, exprs: &[Expr], set: ContextSet) -> ContextSet {
        let mut acc = set.map(|ctx| ctx.set_ret_vals(Vec::new()));
        for expr in exprs {
            let (active, parked) = acc.partition_live(|_| true);
            let (live, mut failed, mut cancelled) = active.into_parts();
            let mut next = Vec::new();
            for ctx in live {
                let saved = match &ctx.ret_val {
                    RetVal::Values(values) => values.clone(),
                    RetVal::Value(_) => Vec::new(),
                };
                // A pending error freezes the rest of the argument list.
                if saved.iter().any(Value::is_error) {
                    next.push(ctx);
                    continue;
                }
                let result = self.eval_expr(expr, ContextSet::single(ctx.set_ret_val(Value::Undef)));
                let (rl, rf, rc) = result.into_parts();
                failed.extend(rf);
                cancelled |= rc;
                for rctx in rl {
                    let mut list = saved.clone();
                    list.push(rctx.ret_val.value());
                    next.push(rctx.set_ret_vals(list));
                }
            }
            acc = ContextSet::from_parts(next, failed, cancelled).absorb(parked);
        }
        acc
    }

    fn eval_bool_op(&mut self, op: BinOp, left: &Expr, right: &Expr, set: ContextSet, span: Option<CodeRange>) -> ContextSet {
        let left_set = self.eval_expr(left, set);
        self.for_each_ctx(left_set, |interp, ctx| {
            let left_value = ctx.ret_val.value();
            match truthiness(ctx, &left_value, span) {
                Truth::Known(known) => {
                    // Python returns the deciding operand itself.
                    let short = matches!((op, known), (BinOp::And, false) | (BinOp::Or, true));
                    if short {
                        ContextSet::single(ctx.clone())
                    } else {
                        interp.eval_expr(right, ContextSet::single(ctx.clone()))
                    }
                }
                Truth::Sym(left_cond) => {
                    let right_set = interp.eval_expr(right, ContextSet::single(ctx.clone()));
                    right_set.map(|rctx| {
                        if rctx.is_short_circuiting() {
                            return rctx.clone();
                        }
                        let right_value = rctx.ret_val.value();
                        match truthiness(rctx, &right_value, span) {
                            Truth::Known(b) => {
                                let right_cond = BoolExp::constant(b, span);
                                let combined = combine_bool(op, left_cond.clone(), right_cond, span);
                                rctx.set_ret_val(Value::Bool(combined))
                            }
                            Truth::Sym(right_cond) => {
                                let combined = combine_bool(op, left_cond.clone(), right_cond, span);
                                rctx.set_ret_val(Value::Bool(combined))
                            }
                            Truth::Err(diag) => rctx.set_ret_val(Value::Error(Box::new(diag))),
                        }
                    })
                }
                Truth::Err(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(Box::new(diag)))),
            }
        })
    }

    // -- attribute and subscript access -------------------------------------

    pub(crate) fn attr_access(&mut self, ctx: &Context, value: &Value, attr: &str, span: Option<CodeRange>) -> ContextSet {
        let target = ctx.deref(value);
        match &target {
            Value::Object(obj) => {
                if let Some(found) = obj.attrs.get(attr) {
                    return ContextSet::single(ctx.set_ret_val(found.clone()));
                }
                if let Some(found) = lookup_class_attr(ctx, obj, attr) {
                    let receiver = obj.attrs.get("$super_self").and_then(Value::as_addr).unwrap_or(obj.addr);
                    let found = match found {
                        Value::Func(func) => Value::Func(Box::new(func.bind(receiver))),
                        other => other,
                    };
                    return ContextSet::single(ctx.set_ret_val(found));
                }
                if let Some(Value::Func(getattr)) = lookup_attr_raw(ctx, obj, "__getattr__") {
                    let getattr = getattr.bind(obj.addr);
                    return self.call_func(ctx, &getattr, vec![Value::string(attr, span)], IndexMap::new(), span);
                }
                ContextSet::single(ctx.set_ret_val(error_value(
                    ErrorKind::UnboundName,
                    format!("object has no attribute '{attr}'"),
                    span,
                )))
            }
            Value::Error(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(diag.clone()))),
            other => ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("attribute '{attr}' on {}", other.type_name()),
                span,
            ))),
        }
    }

    pub(crate) fn subscript_access(&mut self, ctx: &Context, object: &Value, index: &Value, span: Option<CodeRange>) -> ContextSet {
        let target = ctx.deref(object);
        match &target {
            Value::Object(obj) => {
                // A Size indexed by an integer yields the dim directly.
                if let (Some(shape), Value::Int(idx)) = (&obj.shape, index) {
                    let normalized = normalize_index(idx, &shape.rank(), span);
                    let dim = simplify::num(&NumExp::index(shape.clone(), normalized, span));
                    return ContextSet::single(ctx.set_ret_val(Value::Int(dim)));
                }
                if let Some(Value::Func(getitem)) = lookup_attr_raw(ctx, obj, "__getitem__") {
                    let getitem = getitem.bind(obj.addr);
                    return self.call_func(ctx, &getitem, vec![index.clone()], IndexMap::new(), span);
                }
                match index {
                    Value::Int(idx) => match idx.as_int() {
                        Some(k) => {
                            let k = match obj.length() {
                                Some(len) if k < 0 => k + len,
                                _ => k,
                            };
                            ContextSet::single(ctx.set_ret_val(index_value(obj, k, span)))
                        }
                        None => {
                            let warned = ctx.warn(ErrorKind::Unsupported, "symbolic subscript on a container", span);
                            let fresh = warned.syms.fresh_num("item", span);
                            ContextSet::single(warned.set_ret_val(Value::Int(fresh)))
                        }
                    },
                    Value::Str(key) => match key.as_const() {
                        Some(key) => match obj.key_values.get(key) {
                            Some(found) => ContextSet::single(ctx.set_ret_val(found.clone())),
                            None => ContextSet::single(ctx.set_ret_val(error_value(
                                ErrorKind::UnboundName,
                                format!("key '{key}' not present"),
                                span,
                            ))),
                        },
                        None => {
                            let warned = ctx.warn(ErrorKind::Unsupported, "symbolic string key", span);
                            let fresh = warned.syms.fresh_num("item", span);
                            ContextSet::single(warned.set_ret_val(Value::Int(fresh)))
                        }
                    },
                    other => ContextSet::single(ctx.set_ret_val(error_value(
                        ErrorKind::TypeMismatch,
                        format!("subscript index has type {}", other.type_name()),
                        span,
                    ))),
                }
            }
            Value::Str(s) => match index {
                Value::Int(idx) => {
                    let end = NumExp::add(idx.clone(), NumExp::int(1, span), span);
                    let sliced = crate::symexp::StrExp::slice(s.clone(), Some(idx.clone()), Some(end), span);
                    ContextSet::single(ctx.set_ret_val(Value::Str(simplify::string(&sliced))))
                }
                other => ContextSet::single(ctx.set_ret_val(error_value(
                    ErrorKind::TypeMismatch,
                    format!("string index has type {}", other.type_name()),
                    span,
                ))),
            },
            Value::Error(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(diag.clone()))),
            other => ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("{} is not subscriptable", other.type_name()),
                span,
            ))),
        }
    }

    // -- calls --------------------------------------------------------------

    /// Dispatches a call on an arbitrary callee value.
    pub(crate) fn call_value(
        &mut self,
        ctx: &Context,
        callee: &Value,
        args: Vec<Value>,
        kwargs: IndexMap<String, Value>,
        span: Option<CodeRange>,
    ) -> ContextSet {
        let target = ctx.deref(callee);
        match &target {
            Value::Func(func) => self.call_func(ctx, func, args, kwargs, span),
            Value::Object(obj) => {
                if obj.attrs.contains_key("$isclass") {
                    let class_addr = callee.as_addr().unwrap_or(obj.addr);
                    return self.instantiate(ctx, class_addr, args, kwargs, span);
                }
                if let Some(Value::Func(call)) = lookup_attr_raw(ctx, obj, "__call__") {
                    let call = call.bind(obj.addr);
                    return self.call_func(ctx, &call, args, kwargs, span);
                }
                ContextSet::single(ctx.set_ret_val(error_value(
                    ErrorKind::TypeMismatch,
                    "object is not callable",
                    span,
                )))
            }
            Value::Error(diag) => ContextSet::single(ctx.set_ret_val(Value::Error(diag.clone()))),
            other => ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("{} is not callable", other.type_name()),
                span,
            ))),
        }
    }

    /// Calls a function value: binds parameters per Python's rules, executes
    /// the body, and restores the caller's environment on every resulting
    /// path.
    pub(crate) fn call_func(
        &mut self,
        ctx: &Context,
        func: &Func,
        mut args: Vec<Value>,
        kwargs: IndexMap<String, Value>,
        span: Option<CodeRange>,
    ) -> ContextSet {
        if self.call_depth >= self.opts.max_call_depth {
            let warned = ctx.warn(ErrorKind::Unsupported, format!("call depth limit at '{}'", func.name), span);
            let fresh = warned.syms.fresh_num(format!("{}_ret", func.name), span);
            return ContextSet::single(warned.set_ret_val(Value::Int(fresh)));
        }
        self.tracer.on_call(&func.name, self.call_depth);
        if let Some(receiver) = func.bound_self {
            args.insert(0, Value::Addr(receiver));
        }

        let caller_env = ctx.env.clone();
        let mut current = ctx.with_env(func.captured.clone());
        let pos_limit = func.params.len() - func.key_only_count;

        // Cells for every parameter, defaults first.
        let mut param_addrs: IndexMap<&str, Addr> = IndexMap::new();
        for param in &func.params {
            let init = func.defaults.get(param).cloned().unwrap_or(Value::Undef);
            let (addr, next) = current.alloc(init, span);
            current = next.with_env(next.env.set_id(param.as_str(), addr));
            param_addrs.insert(param.as_str(), addr);
        }
        // Positional arguments, overflow into *varargs.
        let mut overflow = Vec::new();
        for (i, arg) in args.into_iter().enumerate() {
            if i < pos_limit {
                let param = &func.params[i];
                let addr = param_addrs[param.as_str()];
                current = current.with_heap(current.heap.set_val(addr, arg));
            } else {
                overflow.push(arg);
            }
        }
        if !overflow.is_empty() && func.varargs.is_none() {
            return ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("'{}' got too many positional arguments", func.name),
                span,
            )));
        }
        if let Some(varargs) = &func.varargs {
            let (addr, next) = make_tuple(&current, overflow, span);
            current = next.with_env(next.env.set_id(varargs.as_str(), addr));
        }
        // Keywords: declared parameters by name, the rest into **kwargs.
        let mut extra_keywords: Vec<(String, Value)> = Vec::new();
        for (name, value) in kwargs {
            match param_addrs.get(name.as_str()) {
                Some(addr) => current = current.with_heap(current.heap.set_val(*addr, value)),
                None => extra_keywords.push((name, value)),
            }
        }
        match (&func.kwargs, extra_keywords.is_empty()) {
            (Some(kwargs_name), _) => {
                let (addr, next) = current.place_object(span, |mut obj| {
                    let count = extra_keywords.len() as i64;
                    for (name, value) in &extra_keywords {
                        obj.key_values.insert(name.clone(), value.clone());
                    }
                    obj.set_attr(crate::value::LENGTH_ATTR, Value::int(count, span));
                    obj
                });
                current = next.with_env(next.env.set_id(kwargs_name.as_str(), addr));
            }
            (None, false) => {
                let (name, _) = &extra_keywords[0];
                return ContextSet::single(ctx.set_ret_val(error_value(
                    ErrorKind::TypeMismatch,
                    format!("'{}' got an unexpected keyword argument '{name}'", func.name),
                    span,
                )));
            }
            (None, true) => {}
        }

        self.call_depth += 1;
        let result = self.exec_stmt(&func.body, ContextSet::single(current.with_flow(Flow::Run).set_ret_val(Value::Undef)));
        self.call_depth -= 1;

        result.map(|c| {
            let returned = match c.flow {
                Flow::Ret => c.ret_val.value(),
                _ => {
                    if c.is_short_circuiting() {
                        c.ret_val.value()
                    } else {
                        Value::None
                    }
                }
            };
            c.with_env(caller_env.clone()).with_flow(Flow::Run).set_ret_val(returned)
        })
    }

    /// Instantiates a class object: fresh instance, then `__init__`.
    pub(crate) fn instantiate(
        &mut self,
        ctx: &Context,
        class_addr: Addr,
        args: Vec<Value>,
        kwargs: IndexMap<String, Value>,
        span: Option<CodeRange>,
    ) -> ContextSet {
        let (instance_addr, ctx) = ctx.place_object(span, |obj| obj.with_attr("$class", Value::Addr(class_addr)));
        let instance = match ctx.deref(&Value::Addr(instance_addr)) {
            Value::Object(obj) => *obj,
            _ => return ContextSet::single(ctx.set_ret_val(error_value(ErrorKind::HeapMiss, "lost instance", span))),
        };
        match lookup_class_attr(&ctx, &instance, "__init__") {
            Some(Value::Func(init)) => {
                let init = init.bind(instance_addr);
                let called = self.call_func(&ctx, &init, args, kwargs, span);
                called.map(|c| {
                    if c.is_short_circuiting() {
                        c.clone()
                    } else {
                        c.set_ret_val(Value::Addr(instance_addr))
                    }
                })
            }
            _ => ContextSet::single(ctx.set_ret_val(Value::Addr(instance_addr))),
        }
    }

    // -- binary operators ----------------------------------------------------

    pub(crate) fn binop_values(
        &mut self,
        ctx: &Context,
        op: BinOp,
        left: &Value,
        right: &Value,
        span: Option<CodeRange>,
    ) -> ContextSet {
        match op {
            BinOp::Is | BinOp::IsNot => {
                let result = identity_compare(left, right, span);
                let result = if op == BinOp::IsNot {
                    simplify::boolean(&BoolExp::not(result, span))
                } else {
                    result
                };
                return ContextSet::single(ctx.set_ret_val(Value::Bool(result)));
            }
            BinOp::In | BinOp::NotIn => return self.contains_op(ctx, op, left, right, span),
            _ => {}
        }

        // Primitive numeric ladder: Bool <= Int <= Float.
        if let (Some((ln, lf)), Some((rn, rf))) = (as_num(left), as_num(right)) {
            let value = match op {
                BinOp::Lt => Value::Bool(simplify::boolean(&BoolExp::lt(ln, rn, span))),
                BinOp::Lte => Value::Bool(simplify::boolean(&BoolExp::lte(ln, rn, span))),
                BinOp::Eq => Value::Bool(simplify::boolean(&BoolExp::eq_num(ln, rn, span))),
                BinOp::Neq => Value::Bool(simplify::boolean(&BoolExp::neq_exp(
                    SymExp::Num(ln),
                    SymExp::Num(rn),
                    span,
                ))),
                BinOp::Pow => match pow_num(&ln, &rn, span) {
                    Some(exp) => wrap_num(exp, lf || rf),
                    None => {
                        let warned = ctx.warn(ErrorKind::Unsupported, "non-constant exponent", span);
                        let fresh = warned.syms.fresh_num("pow", span);
                        return ContextSet::single(warned.set_ret_val(Value::Int(fresh)));
                    }
                },
                BinOp::MatMul => {
                    return ContextSet::single(ctx.set_ret_val(error_value(
                        ErrorKind::TypeMismatch,
                        "matmul on scalar operands",
                        span,
                    )));
                }
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::TrueDiv | BinOp::FloorDiv | BinOp::Mod => {
                    let num_op = match op {
                        BinOp::Add => NumBop::Add,
                        BinOp::Sub => NumBop::Sub,
                        BinOp::Mul => NumBop::Mul,
                        BinOp::TrueDiv => NumBop::TrueDiv,
                        BinOp::FloorDiv => NumBop::FloorDiv,
                        _ => NumBop::Mod,
                    };
                    let folded = simplify::num(&NumExp::bop(num_op, ln, rn, span));
                    wrap_num(folded, lf || rf || op == BinOp::TrueDiv)
                }
                BinOp::And | BinOp::Or | BinOp::Is | BinOp::IsNot | BinOp::In | BinOp::NotIn => unreachable!(),
            };
            return ContextSet::single(ctx.set_ret_val(value));
        }

        // Strings.
        if let (Value::Str(l), Value::Str(r)) = (left, right) {
            let value = match op {
                BinOp::Add => Value::Str(simplify::string(&crate::symexp::StrExp::concat(l.clone(), r.clone(), span))),
                BinOp::Eq => Value::Bool(simplify::boolean(&BoolExp::eq_exp(
                    SymExp::Str(l.clone()),
                    SymExp::Str(r.clone()),
                    span,
                ))),
                BinOp::Neq => Value::Bool(simplify::boolean(&BoolExp::neq_exp(
                    SymExp::Str(l.clone()),
                    SymExp::Str(r.clone()),
                    span,
                ))),
                _ => {
                    return ContextSet::single(ctx.set_ret_val(error_value(
                        ErrorKind::TypeMismatch,
                        format!("operator '{op}' on strings"),
                        span,
                    )));
                }
            };
            return ContextSet::single(ctx.set_ret_val(value));
        }

        // Structural equality across remaining combinations.
        if matches!(op, BinOp::Eq | BinOp::Neq)
            && let Some(result) = values_equal(ctx, left, right, span)
        {
            let result = if op == BinOp::Neq {
                simplify::boolean(&BoolExp::not(result, span))
            } else {
                result
            };
            return ContextSet::single(ctx.set_ret_val(Value::Bool(result)));
        }

        // Object protocol: left `__op__`, then right's reflected method.
        if let Some(dunder) = op.dunder() {
            if let Value::Object(obj) = &ctx.deref(left)
                && let Some(Value::Func(method)) = lookup_attr_raw(ctx, obj, dunder)
            {
                let method = method.bind(obj.addr);
                let called = self.call_func(ctx, &method, vec![right.clone()], IndexMap::new(), span);
                return self.retry_reflected(called, op, left, right, span);
            }
            if let Some(reflected) = op.reflected_dunder()
                && let Value::Object(obj) = &ctx.deref(right)
                && let Some(Value::Func(method)) = lookup_attr_raw(ctx, obj, reflected)
            {
                let method = method.bind(obj.addr);
                return self.call_func(ctx, &method, vec![left.clone()], IndexMap::new(), span);
            }
        }

        ContextSet::single(ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            format!(
                "unsupported operand types for '{op}': {} and {}",
                left.type_name(),
                right.type_name()
            ),
            span,
        )))
    }

    /// After a `__op__` returned `NotImplemented`, retries the reflected
    /// method on the right operand.
    fn retry_reflected(
        &mut self,
        called: ContextSet,
        op: BinOp,
        left: &Value,
        right: &Value,
        span: Option<CodeRange>,
    ) -> ContextSet {
        self.for_each_ctx(called, |interp, ctx| {
            if !matches!(ctx.ret_val.value(), Value::NotImpl(_)) {
                return ContextSet::single(ctx.clone());
            }
            if let Some(reflected) = op.reflected_dunder()
                && let Value::Object(obj) = &ctx.deref(right)
                && let Some(Value::Func(method)) = lookup_attr_raw(ctx, obj, reflected)
            {
                let method = method.bind(obj.addr);
                return interp.call_func(ctx, &method, vec![left.clone()], IndexMap::new(), span);
            }
            ContextSet::single(ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("unsupported operand types for '{op}'"),
                span,
            )))
        })
    }

    /// `in` / `not in`: `__contains__` when present, otherwise a disjunction
    /// over a known container's items.
    fn contains_op(&mut self, ctx: &Context, op: BinOp, left: &Value, right: &Value, span: Option<CodeRange>) -> ContextSet {
        let negate = op == BinOp::NotIn;
        let finish = move |ctx: &Context, result: BoolExp| {
            let result = if negate {
                simplify::boolean(&BoolExp::not(result, span))
            } else {
                result
            };
            ContextSet::single(ctx.set_ret_val(Value::Bool(result)))
        };
        if let Value::Object(obj) = &ctx.deref(right) {
            if let Some(Value::Func(contains)) = lookup_attr_raw(ctx, obj, "__contains__") {
                let contains = contains.bind(obj.addr);
                let called = self.call_func(ctx, &contains, vec![left.clone()], IndexMap::new(), span);
                return called.map(|c| {
                    if c.is_short_circuiting() {
                        return c.clone();
                    }
                    let value = c.ret_val.value();
                    match truthiness(c, &value, span) {
                        Truth::Known(b) => {
                            let b = if negate { !b } else { b };
                            c.set_ret_val(Value::bool_const(b, span))
                        }
                        Truth::Sym(cond) => {
                            let cond = if negate {
                                simplify::boolean(&BoolExp::not(cond, span))
                            } else {
                                cond
                            };
                            c.set_ret_val(Value::Bool(cond))
                        }
                        Truth::Err(diag) => c.set_ret_val(Value::Error(Box::new(diag))),
                    }
                });
            }
            if !obj.indices.is_empty() {
                let mut disjuncts = Vec::new();
                for item in obj.indices.values() {
                    match values_equal(ctx, left, item, span) {
                        Some(eq) => disjuncts.push(eq),
                        None => {
                            let warned = ctx.warn(ErrorKind::Unsupported, "membership over mixed items", span);
                            let fresh = warned.syms.fresh_bool("contains", span);
                            return ContextSet::single(warned.set_ret_val(Value::Bool(fresh)));
                        }
                    }
                }
                let mut iter = disjuncts.into_iter();
                let first = iter.next().unwrap_or_else(|| BoolExp::constant(false, span));
                let any = iter.fold(first, |acc, item| BoolExp::or(acc, item, span));
                return finish(ctx, simplify::boolean(&any));
            }
            if let Value::Str(key) = left
                && let Some(key) = key.as_const()
            {
                return finish(ctx, BoolExp::constant(obj.key_values.contains_key(key), span));
            }
        }
        let warned = ctx.warn(ErrorKind::Unsupported, "membership test on this container", span);
        let fresh = warned.syms.fresh_bool("contains", span);
        ContextSet::single(warned.set_ret_val(Value::Bool(fresh)))
    }
}

// -- free helpers ------------------------------------------------------------

enum IterPlan {
    Items(Vec<Value>),
    Ranged {
        object: Object,
        length: NumExp,
        lo: i64,
        hi: i64,
    },
    Once {
        ctx: Context,
        item: Value,
    },
    Skip(Context),
}

/// Manual `for_each` over live paths with access to `&mut Interp`.
impl Interp<'_> {
    pub(crate) fn for_each_ctx(
        &mut self,
        set: ContextSet,
        mut f: impl FnMut(&mut Self, &Context) -> ContextSet,
    ) -> ContextSet {
        let (live, mut failed, mut cancelled) = set.into_parts();
        let mut out = Vec::new();
        for ctx in live {
            if ctx.is_short_circuiting() {
                out.push(ctx);
                continue;
            }
            let result = f(self, &ctx);
            let (rl, rf, rc) = result.into_parts();
            out.extend(rl);
            failed.extend(rf);
            cancelled |= rc;
        }
        ContextSet::from_parts(out, failed, cancelled)
    }
}

/// First error value in an evaluated argument list, if any.
fn first_error(values: &[Value]) -> Option<Diagnostic> {
    values.iter().find_map(|value| match value {
        Value::Error(diag) => Some((**diag).clone()),
        _ => None,
    })
}

/// Logs and clears non-fatal error temporaries at a statement boundary, so a
/// path reports many issues per run instead of dying on the first one.
fn absorb_errors(set: ContextSet) -> ContextSet {
    set.map(|ctx| {
        if let RetVal::Value(Value::Error(diag)) = &ctx.ret_val {
            ctx.add_log((**diag).clone()).set_ret_val(Value::Undef)
        } else {
            ctx.clone()
        }
    })
}

fn const_value(value: &ConstVal, span: Option<CodeRange>) -> Value {
    match value {
        ConstVal::Int(v) => Value::int(*v, span),
        ConstVal::Float(v) => Value::float(*v, span),
        ConstVal::Bool(v) => Value::bool_const(*v, span),
        ConstVal::Str(v) => Value::string(v.clone(), span),
        ConstVal::None => Value::None,
    }
}

fn lookup_name(ctx: &Context, name: &str, span: Option<CodeRange>) -> Context {
    let Some(addr) = ctx.env.get_id(name) else {
        return ctx.set_ret_val(error_value(
            ErrorKind::UnboundName,
            format!("name '{name}' is not defined"),
            span,
        ));
    };
    match ctx.heap.get_val(addr) {
        None => ctx.set_ret_val(error_value(ErrorKind::HeapMiss, format!("dangling cell for '{name}'"), span)),
        Some(Value::Undef) => ctx.set_ret_val(error_value(
            ErrorKind::UnboundName,
            format!("name '{name}' used before assignment"),
            span,
        )),
        Some(value) => ctx.set_ret_val(value.clone()),
    }
}

pub(crate) fn assign_name(ctx: &Context, name: &str, value: Value) -> Context {
    match ctx.env.get_id(name) {
        Some(addr) => ctx.with_heap(ctx.heap.set_val(addr, value)),
        None => {
            let (addr, ctx) = ctx.alloc(value, None);
            ctx.with_env(ctx.env.set_id(name, addr))
        }
    }
}

/// Field selector for assignments into objects.
enum Field<'s> {
    Attr(&'s str),
    Index(i64),
    Key(String),
}

fn index_field<'s>(_ctx: &Context, index: &Value) -> Result<Field<'s>, Diagnostic> {
    match index {
        Value::Int(idx) => match idx.as_int() {
            Some(k) => Ok(Field::Index(k)),
            None => Err(Diagnostic::error(ErrorKind::Unsupported, "symbolic subscript target", None)),
        },
        Value::Str(key) => match key.as_const() {
            Some(key) => Ok(Field::Key(key.to_owned())),
            None => Err(Diagnostic::error(ErrorKind::Unsupported, "symbolic key target", None)),
        },
        other => Err(Diagnostic::error(
            ErrorKind::TypeMismatch,
            format!("subscript target index has type {}", other.type_name()),
            None,
        )),
    }
}

fn set_object_field(ctx: &Context, target: &Value, field: Field<'_>, value: Value, span: Option<CodeRange>) -> Context {
    let Some(addr) = target.as_addr() else {
        return ctx
            .set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("cannot assign into {}", target.type_name()),
                span,
            ));
    };
    match ctx.heap.follow(addr) {
        Some(Value::Object(obj)) => {
            let mut updated = (**obj).clone();
            match field {
                Field::Attr(name) => {
                    updated.attrs.insert(name.to_owned(), value);
                }
                Field::Index(k) => {
                    let k = match (updated.length(), k < 0) {
                        (Some(len), true) => k + len,
                        _ => k,
                    };
                    updated.indices.insert(k, value);
                }
                Field::Key(key) => {
                    updated.key_values.insert(key, value);
                }
            }
            let obj_addr = updated.addr;
            ctx.with_heap(ctx.heap.set_val(obj_addr, Value::Object(Box::new(updated))))
        }
        _ => ctx.set_ret_val(error_value(
            ErrorKind::TypeMismatch,
            format!("cannot assign into {}", target.type_name()),
            span,
        )),
    }
}

/// Classifies a value's truthiness.
pub(crate) fn truthiness(ctx: &Context, value: &Value, span: Option<CodeRange>) -> Truth {
    match value {
        Value::Bool(b) => match b.as_const() {
            Some(b) => Truth::Known(b),
            None => Truth::Sym(b.clone()),
        },
        Value::Int(n) | Value::Float(n) => match n.as_const() {
            Some(c) => Truth::Known(c.as_f64() != 0.0),
            None => Truth::Sym(simplify::boolean(&BoolExp::neq_exp(
                SymExp::Num(n.clone()),
                SymExp::Num(NumExp::int(0, span)),
                span,
            ))),
        },
        Value::Str(s) => match s.as_const() {
            Some(s) => Truth::Known(!s.is_empty()),
            None => Truth::Sym(simplify::boolean(&BoolExp::neq_exp(
                SymExp::Str(s.clone()),
                SymExp::Str(crate::symexp::StrExp::constant("", span)),
                span,
            ))),
        },
        Value::None => Truth::Known(false),
        Value::NotImpl(_) => Truth::Known(true),
        Value::Func(_) => Truth::Known(true),
        Value::Addr(_) | Value::Object(_) => match ctx.deref(value) {
            Value::Object(obj) => match obj.length_exp() {
                Some(len) => match len.as_int() {
                    Some(n) => Truth::Known(n != 0),
                    None => Truth::Sym(simplify::boolean(&BoolExp::neq_exp(
                        SymExp::Num(len.clone()),
                        SymExp::Num(NumExp::int(0, span)),
                        span,
                    ))),
                },
                None => Truth::Known(true),
            },
            Value::Error(diag) => Truth::Err(*diag),
            other => truthiness(ctx, &other, span),
        },
        Value::Undef => Truth::Err(Diagnostic::error(ErrorKind::UnboundName, "undefined value in condition", span)),
        Value::Error(diag) => Truth::Err((**diag).clone()),
    }
}

fn combine_bool(op: BinOp, left: BoolExp, right: BoolExp, span: Option<CodeRange>) -> BoolExp {
    let combined = match op {
        BinOp::And => BoolExp::and(left, right, span),
        _ => BoolExp::or(left, right, span),
    };
    simplify::boolean(&combined)
}

/// `is` / `is not`: address identity for heap values; primitive equality for
/// small immediates, matching the analyzed system rather than CPython's
/// interning rules.
fn identity_compare(left: &Value, right: &Value, span: Option<CodeRange>) -> BoolExp {
    match (left, right) {
        (Value::Addr(l), Value::Addr(r)) => BoolExp::constant(l == r, span),
        (Value::None, Value::None) => BoolExp::constant(true, span),
        (Value::None, _) | (_, Value::None) => BoolExp::constant(false, span),
        (Value::Int(l), Value::Int(r)) => simplify::boolean(&BoolExp::eq_num(l.clone(), r.clone(), span)),
        (Value::Bool(l), Value::Bool(r)) => simplify::boolean(&BoolExp::eq_exp(
            SymExp::Bool(l.clone()),
            SymExp::Bool(r.clone()),
            span,
        )),
        _ => BoolExp::constant(false, span),
    }
}

/// Structural equality between values when it can be expressed symbolically.
pub(crate) fn values_equal(ctx: &Context, left: &Value, right: &Value, span: Option<CodeRange>) -> Option<BoolExp> {
    if let (Some((ln, _)), Some((rn, _))) = (as_num(left), as_num(right)) {
        return Some(simplify::boolean(&BoolExp::eq_num(ln, rn, span)));
    }
    if let (Value::Str(l), Value::Str(r)) = (left, right) {
        return Some(simplify::boolean(&BoolExp::eq_exp(
            SymExp::Str(l.clone()),
            SymExp::Str(r.clone()),
            span,
        )));
    }
    match (left, right) {
        (Value::None, Value::None) => return Some(BoolExp::constant(true, span)),
        (Value::None, _) | (_, Value::None) => return Some(BoolExp::constant(false, span)),
        _ => {}
    }
    // Sizes and tuples of dims compare as shapes.
    if let (Some(l), Some(r)) = (value_to_shape(ctx, left), value_to_shape(ctx, right)) {
        return Some(simplify::boolean(&BoolExp::eq_exp(
            SymExp::Shape(l),
            SymExp::Shape(r),
            span,
        )));
    }
    if let (Value::Addr(l), Value::Addr(r)) = (left, right)
        && l == r
    {
        return Some(BoolExp::constant(true, span));
    }
    None
}

/// Numeric view of a primitive value: the expression and whether it is a
/// float. Symbolic booleans have no numeric view.
pub(crate) fn as_num(value: &Value) -> Option<(NumExp, bool)> {
    match value {
        Value::Int(e) => Some((e.clone(), false)),
        Value::Float(e) => Some((e.clone(), true)),
        Value::Bool(b) => b.as_const().map(|b| (NumExp::int(i64::from(b), None), false)),
        _ => None,
    }
}

fn wrap_num(exp: NumExp, is_float: bool) -> Value {
    if is_float { Value::Float(exp) } else { Value::Int(exp) }
}

/// Power with a small constant non-negative exponent expands to repeated
/// multiplication; anything else is out of the algebra.
fn pow_num(base: &NumExp, exponent: &NumExp, span: Option<CodeRange>) -> Option<NumExp> {
    let k = exponent.as_int()?;
    if !(0..=8).contains(&k) {
        return None;
    }
    let mut acc = NumExp::int(1, span);
    for _ in 0..k {
        acc = NumExp::mul(acc, base.clone(), span);
    }
    Some(simplify::num(&acc))
}

fn unary_value(ctx: &Context, op: UnOp, value: &Value, span: Option<CodeRange>) -> Context {
    match op {
        UnOp::Not => match truthiness(ctx, value, span) {
            Truth::Known(b) => ctx.set_ret_val(Value::bool_const(!b, span)),
            Truth::Sym(cond) => ctx.set_ret_val(Value::Bool(simplify::boolean(&BoolExp::not(cond, span)))),
            Truth::Err(diag) => ctx.set_ret_val(Value::Error(Box::new(diag))),
        },
        UnOp::Neg => match as_num(value) {
            Some((exp, is_float)) => {
                let negated = simplify::num(&NumExp::uop(NumUop::Neg, exp, span));
                ctx.set_ret_val(wrap_num(negated, is_float))
            }
            None => ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("cannot negate {}", value.type_name()),
                span,
            )),
        },
        UnOp::Pos => match as_num(value) {
            Some((exp, is_float)) => ctx.set_ret_val(wrap_num(exp, is_float)),
            None => ctx.set_ret_val(error_value(
                ErrorKind::TypeMismatch,
                format!("cannot apply unary plus to {}", value.type_name()),
                span,
            )),
        },
    }
}

/// Attribute lookup through own attrs, then the class chain, no binding.
pub(crate) fn lookup_attr_raw(ctx: &Context, obj: &Object, attr: &str) -> Option<Value> {
    if let Some(found) = obj.attrs.get(attr) {
        return Some(found.clone());
    }
    lookup_class_attr(ctx, obj, attr)
}

/// Looks `attr` up along the `$class` / `$base` chain.
pub(crate) fn lookup_class_attr(ctx: &Context, obj: &Object, attr: &str) -> Option<Value> {
    let mut class_addr = obj.attrs.get("$class").and_then(Value::as_addr)?;
    for _ in 0..32 {
        let Value::Object(class) = ctx.deref(&Value::Addr(class_addr)) else {
            return None;
        };
        if let Some(found) = class.attrs.get(attr) {
            return Some(found.clone());
        }
        match class.attrs.get("$base").and_then(Value::as_addr) {
            Some(base) => class_addr = base,
            None => return None,
        }
    }
    None
}

/// Element of a container at a known index.
pub(crate) fn index_value(obj: &Object, index: i64, span: Option<CodeRange>) -> Value {
    if let Some(shape) = &obj.shape {
        let dim = simplify::num(&NumExp::index(shape.clone(), NumExp::int(index, span), span));
        return Value::Int(dim);
    }
    if let Some(found) = obj.indices.get(&index) {
        return found.clone();
    }
    if obj.attrs.contains_key("$range") {
        return range_element(obj, &NumExp::int(index, span), span);
    }
    error_value(ErrorKind::TypeMismatch, format!("index {index} out of range"), span)
}

/// Element at a symbolic index, for the single-pass loop fallback.
fn symbolic_index_value(ctx: &Context, obj: &Object, index: &NumExp, span: Option<CodeRange>) -> Value {
    if let Some(shape) = &obj.shape {
        return Value::Int(simplify::num(&NumExp::index(shape.clone(), index.clone(), span)));
    }
    if obj.attrs.contains_key("$range") {
        return range_element(obj, index, span);
    }
    Value::Int(ctx.syms.fresh_num("item", span))
}

fn range_element(obj: &Object, index: &NumExp, span: Option<CodeRange>) -> Value {
    let start = match obj.attrs.get("$start") {
        Some(Value::Int(e)) => e.clone(),
        _ => NumExp::int(0, span),
    };
    let step = match obj.attrs.get("$step") {
        Some(Value::Int(e)) => e.clone(),
        _ => NumExp::int(1, span),
    };
    Value::Int(simplify::num(&NumExp::add(
        start,
        NumExp::mul(index.clone(), step, span),
        span,
    )))
}

/// Normalizes a possibly negative index against a rank expression.
pub(crate) fn normalize_index(index: &NumExp, rank: &NumExp, span: Option<CodeRange>) -> NumExp {
    match index.as_int() {
        Some(k) if k < 0 => simplify::num(&NumExp::add(index.clone(), rank.clone(), span)),
        _ => index.clone(),
    }
}

/// Allocates a fresh tuple object over the given items.
pub(crate) fn make_tuple(ctx: &Context, items: Vec<Value>, span: Option<CodeRange>) -> (Addr, Context) {
    ctx.place_object(span, |mut obj| {
        let count = items.len() as i64;
        for (i, item) in items.into_iter().enumerate() {
            obj.indices.insert(i as i64, item);
        }
        obj.set_attr(crate::value::LENGTH_ATTR, Value::int(count, span));
        obj.set_attr("$class", Value::Addr(builtins::TUPLE_CLASS_ADDR));
        obj
    })
}

/// Interprets a value as a shape: a Size directly, or a tuple/list object
/// whose elements are integers.
pub(crate) fn value_to_shape(ctx: &Context, value: &Value) -> Option<crate::symexp::ShapeExp> {
    match ctx.deref(value) {
        Value::Object(obj) => {
            if let Some(shape) = &obj.shape {
                return Some(shape.clone());
            }
            let len = obj.length()?;
            let mut dims = crate::symexp::Dims::with_capacity(len as usize);
            for i in 0..len {
                match obj.indices.get(&i) {
                    Some(Value::Int(dim)) => dims.push(dim.clone()),
                    _ => return None,
                }
            }
            Some(crate::symexp::ShapeExp::constant(dims, None))
        }
        _ => None,
    }
}

pub(crate) fn error_value(kind: ErrorKind, message: impl Into<String>, span: Option<CodeRange>) -> Value {
    Value::Error(Box::new(Diagnostic::error(kind, message, span)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MapArgSource,
        solver::RangeOracle,
        tracer::NoopTracer,
    };

    fn run_ir(tree: &Stmt) -> ContextSet {
        let opts = Options::default();
        let oracle = RangeOracle;
        let args = MapArgSource::default();
        let mut tracer = NoopTracer;
        let mut interp = Interp::new(&opts, &oracle, &args, &mut tracer, CancelToken::new());
        let ctx = builtins::install(Context::new());
        interp.exec_module(tree, ContextSet::single(ctx))
    }

    fn run_source(code: &str) -> ContextSet {
        let tree = crate::parse::parse_module(code, 0).unwrap();
        run_ir(&tree)
    }

    fn final_value(set: &ContextSet, name: &str) -> Value {
        let ctx = &set.live()[0];
        let addr = ctx.env.get_id(name).unwrap_or_else(|| panic!("{name} not bound"));
        ctx.heap.get_val(addr).unwrap().clone()
    }

    #[test]
    fn arithmetic_folds_along_a_path() {
        let set = run_source("x = 2 + 3 * 4\n");
        assert_eq!(set.live().len(), 1);
        assert_eq!(final_value(&set, "x"), Value::int(14, None));
    }

    #[test]
    fn conditional_on_concrete_value_takes_one_branch() {
        let set = run_source("x = 1\nif x > 0:\n    y = 10\nelse:\n    y = 20\n");
        assert_eq!(set.live().len(), 1);
        assert_eq!(final_value(&set, "y"), Value::int(10, None));
    }

    #[test]
    fn unbound_name_reports_and_continues() {
        let set = run_source("x = missing\ny = 1\n");
        assert_eq!(set.live().len(), 1);
        let ctx = &set.live()[0];
        assert!(ctx.logs.iter().any(|d| d.kind == ErrorKind::UnboundName));
        assert_eq!(final_value(&set, "y"), Value::int(1, None));
    }

    #[test]
    fn function_call_with_defaults_and_return() {
        let set = run_source("def f(a, b=10):\n    return a + b\nr = f(1)\ns = f(1, 2)\n");
        assert_eq!(set.live().len(), 1);
        assert_eq!(final_value(&set, "r"), Value::int(11, None));
        assert_eq!(final_value(&set, "s"), Value::int(3, None));
    }

    #[test]
    fn function_without_return_yields_none() {
        let set = run_source("def f():\n    x = 1\nr = f()\n");
        assert_eq!(final_value(&set, "r"), Value::None);
    }

    #[test]
    fn for_loop_over_tuple_accumulates() {
        let set = run_source("total = 0\nfor i in (1, 2, 3):\n    total = total + i\n");
        assert_eq!(set.live().len(), 1);
        assert_eq!(final_value(&set, "total"), Value::int(6, None));
    }

    #[test]
    fn break_stops_iteration() {
        let set = run_source("total = 0\nfor i in (1, 2, 3):\n    if i == 2:\n        break\n    total = total + i\n");
        assert_eq!(set.live().len(), 1);
        assert_eq!(final_value(&set, "total"), Value::int(1, None));
    }

    #[test]
    fn continue_skips_to_next_iteration() {
        let set = run_source("total = 0\nfor i in (1, 2, 3):\n    if i == 2:\n        continue\n    total = total + i\n");
        assert_eq!(final_value(&set, "total"), Value::int(4, None));
    }

    #[test]
    fn tuple_subscript_and_negative_index() {
        let set = run_source("t = (10, 20, 30)\na = t[0]\nb = t[-1]\n");
        assert_eq!(final_value(&set, "a"), Value::int(10, None));
        assert_eq!(final_value(&set, "b"), Value::int(30, None));
    }

    #[test]
    fn varargs_collect_overflow() {
        let set = run_source("def f(a, *rest):\n    return rest[1]\nr = f(1, 2, 3)\n");
        assert_eq!(final_value(&set, "r"), Value::int(3, None));
    }

    #[test]
    fn closures_see_rebound_functions() {
        let set = run_source("def f():\n    return 1\ndef g():\n    return f()\ndef f():\n    return 2\nr = g()\n");
        assert_eq!(final_value(&set, "r"), Value::int(2, None));
    }

    #[test]
    fn class_definition_and_instance_attrs() {
        let set = run_source(
            "class Point:\n    def __init__(self, x):\n        self.x = x\n    def double(self):\n        return self.x + self.x\np = Point(21)\nr = p.double()\n",
        );
        assert_eq!(set.live().len(), 1);
        assert_eq!(final_value(&set, "r"), Value::int(42, None));
    }

    #[test]
    fn boolean_operators_short_circuit_on_constants() {
        let set = run_source("a = 0 and missing\nb = 1 or missing\n");
        let ctx = &set.live()[0];
        // neither branch evaluated `missing`
        assert!(ctx.logs.iter().all(|d| d.kind != ErrorKind::UnboundName));
        assert_eq!(final_value(&set, "a"), Value::int(0, None));
        assert_eq!(final_value(&set, "b"), Value::int(1, None));
    }

    #[test]
    fn is_on_none_compares_identity() {
        let set = run_source("x = None\nr = x is None\ns = x is not None\n");
        assert_eq!(final_value(&set, "r"), Value::bool_const(true, None));
        assert_eq!(final_value(&set, "s"), Value::bool_const(false, None));
    }

    #[test]
    fn while_degrades_to_warning() {
        let set = run_source("x = 0\nwhile x < 10:\n    x = x + 1\n");
        let ctx = &set.live()[0];
        assert!(ctx.logs.iter().any(|d| d.kind == ErrorKind::Unsupported));
    }
}
