//! Single-path state and the multi-path set algebra.
//!
//! A [`Context`] is one hypothesized execution: environment, heap, constraint
//! set, diagnostics and the current temporary value. Every transition builds
//! a new `Context`; the persistent structures underneath make that cheap.
//!
//! A [`ContextSet`] is the non-empty collection of live paths plus the paths
//! that already failed, kept separately so their diagnostics survive pruning.
//! `require` is the single place obligations enter the system, and
//! `if_then_else` is the single place paths fork.

use crate::{
    constraint::{ConstraintSet, Entailment},
    env::Env,
    error::{Diagnostic, ErrorKind, Severity},
    heap::{Addr, Heap},
    parse::CodeRange,
    solver::SolverOracle,
    symexp::{BoolExp, SymGen},
    value::{ObjGen, Object, Value},
};

/// Continuation state of a path after executing a statement.
///
/// Sequencing only proceeds while a path is `Run`; `Brk` and `Cnt` are
/// consumed by the innermost loop and `Ret` by the enclosing function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    #[default]
    Run,
    Brk,
    Cnt,
    Ret,
}

/// The temporary value a context carries between evaluation stages.
#[derive(Debug, Clone, PartialEq)]
pub enum RetVal {
    Value(Value),
    /// Multiple values, used while argument lists are being evaluated.
    Values(Vec<Value>),
}

impl Default for RetVal {
    fn default() -> Self {
        Self::Value(Value::Undef)
    }
}

impl RetVal {
    /// The single value; `Undef` when the context carries a value list.
    #[must_use]
    pub fn value(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Values(_) => Value::Undef,
        }
    }
}

/// Immutable single-path analysis state.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub env: Env,
    pub heap: Heap,
    /// Imported-module table: qualified path to module object address.
    pub imported: Env,
    pub ret_val: RetVal,
    pub ctr_set: ConstraintSet,
    /// Diagnostics in evaluation order.
    pub logs: Vec<Diagnostic>,
    /// Relative path of the module currently being evaluated.
    pub rel_path: String,
    /// Set when the path has fatally failed; kept for reporting.
    pub failed: Option<Diagnostic>,
    /// Continuation state after the last executed statement.
    pub flow: Flow,
    /// Session-shared symbol id generator.
    pub syms: SymGen,
    /// Session-shared object id generator.
    pub objs: ObjGen,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set_ret_val(&self, value: Value) -> Self {
        let mut out = self.clone();
        out.ret_val = RetVal::Value(value);
        out
    }

    #[must_use]
    pub fn set_ret_vals(&self, values: Vec<Value>) -> Self {
        let mut out = self.clone();
        out.ret_val = RetVal::Values(values);
        out
    }

    #[must_use]
    pub fn with_env(&self, env: Env) -> Self {
        let mut out = self.clone();
        out.env = env;
        out
    }

    #[must_use]
    pub fn with_heap(&self, heap: Heap) -> Self {
        let mut out = self.clone();
        out.heap = heap;
        out
    }

    #[must_use]
    pub fn with_flow(&self, flow: Flow) -> Self {
        let mut out = self.clone();
        out.flow = flow;
        out
    }

    #[must_use]
    pub fn add_log(&self, diagnostic: Diagnostic) -> Self {
        let mut out = self.clone();
        out.logs.push(diagnostic);
        out
    }

    /// Appends a warning diagnostic; warnings never end a path.
    #[must_use]
    pub fn warn(&self, kind: ErrorKind, message: impl Into<String>, span: Option<CodeRange>) -> Self {
        self.add_log(Diagnostic::warning(kind, message, span))
    }

    /// Marks the path failed with the given diagnostic; the error is also
    /// placed into `ret_val` so evaluation short-circuits.
    #[must_use]
    pub fn fail(&self, diagnostic: Diagnostic) -> Self {
        let mut out = self.clone();
        out.logs.push(diagnostic.clone());
        out.ret_val = RetVal::Value(Value::Error(Box::new(diagnostic.clone())));
        out.failed = Some(diagnostic);
        out
    }

    /// Whether the current temporary is an error that must short-circuit.
    #[must_use]
    pub fn is_short_circuiting(&self) -> bool {
        matches!(&self.ret_val, RetVal::Value(Value::Error(_)))
    }

    #[must_use]
    pub fn guarantee(&self, constraint: &BoolExp) -> Self {
        let mut out = self.clone();
        out.ctr_set = out.ctr_set.guarantee(constraint);
        out
    }

    /// Allocates `value` at a fresh address.
    #[must_use]
    pub fn alloc(&self, value: Value, span: Option<CodeRange>) -> (Addr, Self) {
        let (addr, heap) = self.heap.alloc_new(value, span);
        (addr, self.with_heap(heap))
    }

    /// Allocates a fresh object, letting the builder see its id and address.
    #[must_use]
    pub fn place_object(&self, span: Option<CodeRange>, build: impl FnOnce(Object) -> Object) -> (Addr, Self) {
        let (addr, heap) = self.heap.malloc(span);
        let object = build(Object::new(self.objs.fresh(), addr));
        let heap = heap.set_val(addr, Value::Object(Box::new(object)));
        (addr, self.with_heap(heap))
    }

    /// Resolves a value to its heap cell contents, following one address hop.
    #[must_use]
    pub fn deref(&self, value: &Value) -> Value {
        match value {
            Value::Addr(addr) => match self.heap.follow(*addr) {
                Some(found) => found.clone(),
                None => Value::Error(Box::new(Diagnostic::error(
                    ErrorKind::HeapMiss,
                    format!("dangling address {addr}"),
                    None,
                ))),
            },
            other => other.clone(),
        }
    }

    /// Decides a query against this path's constraints, then the oracle.
    #[must_use]
    pub fn decide(&self, query: &BoolExp, oracle: &dyn SolverOracle) -> Entailment {
        match self.ctr_set.decide_local(query) {
            Entailment::Unknown => {
                let slice = self.ctr_set.relevant_slice(&{
                    let mut syms = ahash::AHashSet::new();
                    query.collect_symbols(&mut syms);
                    syms
                });
                oracle.entails(&slice, query)
            }
            decided => decided,
        }
    }

    /// Stable ordering key: constraints and failure state, hashed. Used to
    /// sort terminal paths so reports are reproducible.
    #[must_use]
    pub fn path_key(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = ahash::AHasher::default();
        for constraint in self.ctr_set.constraints() {
            constraint.to_string().hash(&mut hasher);
        }
        self.failed.is_some().hash(&mut hasher);
        self.logs.len().hash(&mut hasher);
        hasher.finish()
    }
}

/// A non-empty ordered collection of live paths, plus failed paths.
#[derive(Debug, Clone, Default)]
pub struct ContextSet {
    ctxs: Vec<Context>,
    failed: Vec<Context>,
    /// Set when an external cancellation interrupted the run.
    pub cancelled: bool,
}

impl ContextSet {
    #[must_use]
    pub fn single(ctx: Context) -> Self {
        Self {
            ctxs: vec![ctx],
            failed: Vec::new(),
            cancelled: false,
        }
    }

    /// Rebuilds a set from raw parts, sweeping failed paths.
    #[must_use]
    pub(crate) fn from_parts(ctxs: Vec<Context>, failed: Vec<Context>, cancelled: bool) -> Self {
        let mut out = Self {
            ctxs,
            failed,
            cancelled,
        };
        out.sweep_failed();
        out
    }

    #[must_use]
    pub(crate) fn into_parts(self) -> (Vec<Context>, Vec<Context>, bool) {
        (self.ctxs, self.failed, self.cancelled)
    }

    /// Splits live paths on a predicate: matching paths stay in the set,
    /// the rest are handed back for later re-absorption.
    #[must_use]
    pub(crate) fn partition_live(mut self, pred: impl Fn(&Context) -> bool) -> (Self, Vec<Context>) {
        let (keep, park): (Vec<Context>, Vec<Context>) = self.ctxs.drain(..).partition(pred);
        self.ctxs = keep;
        (self, park)
    }

    /// Re-absorbs previously parked paths, preserving order.
    #[must_use]
    pub(crate) fn absorb(mut self, parked: Vec<Context>) -> Self {
        self.ctxs.extend(parked);
        self.sweep_failed();
        self
    }

    #[must_use]
    pub fn live(&self) -> &[Context] {
        &self.ctxs
    }

    #[must_use]
    pub fn failed(&self) -> &[Context] {
        &self.failed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ctxs.is_empty()
    }

    /// Applies `f` to every live path.
    #[must_use]
    pub fn map(&self, f: impl Fn(&Context) -> Context) -> Self {
        let mut out = self.clone();
        out.ctxs = out.ctxs.iter().map(f).collect();
        out.sweep_failed();
        out
    }

    /// Applies a path-splitting `f` to every live path and flattens.
    #[must_use]
    pub fn flat_map(&self, f: impl Fn(&Context) -> Self) -> Self {
        let mut ctxs = Vec::new();
        let mut failed = self.failed.clone();
        let mut cancelled = self.cancelled;
        for ctx in &self.ctxs {
            let mapped = f(ctx);
            ctxs.extend(mapped.ctxs);
            failed.extend(mapped.failed);
            cancelled |= mapped.cancelled;
        }
        let mut out = Self {
            ctxs,
            failed,
            cancelled,
        };
        out.sweep_failed();
        out
    }

    /// Sets every live path's temporary to `value`.
    #[must_use]
    pub fn return_value(&self, value: Value) -> Self {
        self.map(|ctx| ctx.set_ret_val(value.clone()))
    }

    /// Set union preserving order; used at control-flow merge points.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.ctxs.extend(other.ctxs.iter().cloned());
        out.failed.extend(other.failed.iter().cloned());
        out.cancelled |= other.cancelled;
        out
    }

    /// Moves freshly failed paths into the failed list.
    fn sweep_failed(&mut self) {
        let (failed, live): (Vec<Context>, Vec<Context>) = self.ctxs.drain(..).partition(|ctx| ctx.failed.is_some());
        self.ctxs = live;
        self.failed.extend(failed);
    }

    /// Introduces path obligations: the only place they enter the system.
    ///
    /// For each live path and each constraint: a provable constraint is kept
    /// (and with `immediate_check` not recorded at all), a provably false
    /// one fails the path with `ObligationViolated`, and an undecided one is
    /// assumed into the path condition with a log-level note.
    #[must_use]
    pub fn require(
        &self,
        constraints: &[BoolExp],
        message: &str,
        span: Option<CodeRange>,
        oracle: &dyn SolverOracle,
        immediate_check: bool,
    ) -> Self {
        self.flat_map(|ctx| {
            let mut current = ctx.clone();
            for constraint in constraints {
                if current.failed.is_some() {
                    break;
                }
                match current.decide(constraint, oracle) {
                    Entailment::Valid => {
                        if !immediate_check {
                            current.ctr_set = current.ctr_set.guarantee(constraint);
                        }
                    }
                    Entailment::Invalid => {
                        let diagnostic = Diagnostic::error(
                            ErrorKind::ObligationViolated,
                            format!("{message} (violated: {constraint})"),
                            span.or(constraint.span),
                        );
                        current = current.fail(diagnostic);
                    }
                    Entailment::Unknown => {
                        let mut next = current.clone();
                        next.ctr_set = next.ctr_set.add(constraint);
                        next.logs.push(Diagnostic::new(
                            ErrorKind::ObligationUnknown,
                            Severity::Log,
                            format!("{message} (assumed: {constraint})"),
                            span.or(constraint.span),
                        ));
                        current = next;
                    }
                }
            }
            Self::single(current)
        })
    }

    /// Splits every live path on a condition.
    ///
    /// A path where the condition is provable goes only to the then-set; a
    /// provably false condition goes only to the else-set; otherwise the
    /// path is cloned into both with the respective literal added.
    #[must_use]
    pub fn if_then_else(
        &self,
        cond_of: impl Fn(&Context) -> BoolExp,
        span: Option<CodeRange>,
        oracle: &dyn SolverOracle,
    ) -> (Self, Self) {
        let mut then_set = Self {
            ctxs: Vec::new(),
            failed: self.failed.clone(),
            cancelled: self.cancelled,
        };
        let mut else_set = Self::default();
        for ctx in &self.ctxs {
            let cond = cond_of(ctx);
            match ctx.decide(&cond, oracle) {
                Entailment::Valid => then_set.ctxs.push(ctx.clone()),
                Entailment::Invalid => else_set.ctxs.push(ctx.clone()),
                Entailment::Unknown => {
                    let mut then_ctx = ctx.clone();
                    then_ctx.ctr_set = then_ctx.ctr_set.add(&cond);
                    then_set.ctxs.push(then_ctx);
                    let negated = BoolExp::not(cond, span);
                    let mut else_ctx = ctx.clone();
                    else_ctx.ctr_set = else_ctx.ctr_set.add(&negated);
                    else_set.ctxs.push(else_ctx);
                }
            }
        }
        (then_set, else_set)
    }

    /// Bounds path explosion: beyond `cap` live paths, the tail is folded
    /// into a single path that keeps the tail's path conditions as one
    /// disjunction. The join is recorded in diagnostics.
    #[must_use]
    pub fn apply_path_cap(&self, cap: usize, span: Option<CodeRange>) -> Self {
        if cap == 0 || self.ctxs.len() <= cap {
            return self.clone();
        }
        let mut out = self.clone();
        let tail = out.ctxs.split_off(cap - 1);
        let folded = fold_paths(&tail, span);
        out.ctxs.push(folded);
        out
    }

    /// Marks the set as interrupted; live paths are returned as-is.
    #[must_use]
    pub fn cancel(&self) -> Self {
        let mut out = self.clone();
        out.cancelled = true;
        out
    }
}

/// Structural join of several paths into one, weakening their constraints
/// into a disjunction. The first path's heap and environment win.
fn fold_paths(paths: &[Context], span: Option<CodeRange>) -> Context {
    let base = paths.first().expect("fold_paths needs at least one path");
    let mut folded = base.clone();
    let mut disjunction: Option<BoolExp> = None;
    for path in paths {
        let conj = BoolExp::all_of(path.ctr_set.constraints().to_vec(), span);
        disjunction = Some(match disjunction {
            None => conj,
            Some(acc) => BoolExp::or(acc, conj, span),
        });
    }
    if let Some(disjunction) = disjunction {
        folded.ctr_set = ConstraintSet::new().guarantee(&disjunction);
    }
    folded.logs.push(Diagnostic::warning(
        ErrorKind::Unsupported,
        format!("path cap reached; {} paths merged into a weaker one", paths.len()),
        span,
    ));
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        solver::{RangeOracle, UnknownOracle},
        symexp::{NumExp, SymSort},
    };

    fn base_set() -> ContextSet {
        ContextSet::single(Context::new())
    }

    #[test]
    fn require_keeps_valid_obligations() {
        let set = base_set();
        let out = set.require(
            &[BoolExp::lt(NumExp::int(1, None), NumExp::int(2, None), None)],
            "trivial",
            None,
            &RangeOracle,
            true,
        );
        assert_eq!(out.live().len(), 1);
        assert!(out.failed().is_empty());
        assert!(out.live()[0].ctr_set.constraints().is_empty());
    }

    #[test]
    fn require_fails_refuted_obligations() {
        let set = base_set();
        let out = set.require(
            &[BoolExp::lt(NumExp::int(2, None), NumExp::int(1, None), None)],
            "rank mismatch",
            None,
            &RangeOracle,
            true,
        );
        assert!(out.live().is_empty());
        assert_eq!(out.failed().len(), 1);
        let failure = out.failed()[0].failed.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::ObligationViolated);
        assert!(failure.message.contains("rank mismatch"));
    }

    #[test]
    fn require_assumes_unknown_obligations() {
        let ctx = Context::new();
        let n = ctx.syms.fresh_num("n", None);
        let constraint = BoolExp::lte(NumExp::int(1, None), n, None);
        let out = ContextSet::single(ctx).require(&[constraint.clone()], "needs n >= 1", None, &RangeOracle, true);
        assert_eq!(out.live().len(), 1);
        assert!(out.live()[0].ctr_set.contains(&constraint));
    }

    #[test]
    fn require_list_equals_chained_requires() {
        let ctx = Context::new();
        let a = ctx.syms.fresh_num("a", None);
        let b = ctx.syms.fresh_num("b", None);
        let c1 = BoolExp::lte(NumExp::int(0, None), a, None);
        let c2 = BoolExp::lte(NumExp::int(0, None), b, None);
        let batched = ContextSet::single(ctx.clone()).require(&[c1.clone(), c2.clone()], "m", None, &RangeOracle, true);
        let chained = ContextSet::single(ctx)
            .require(&[c1], "m", None, &RangeOracle, true)
            .require(&[c2], "m", None, &RangeOracle, true);
        assert_eq!(
            batched.live()[0].ctr_set.constraints(),
            chained.live()[0].ctr_set.constraints()
        );
    }

    #[test]
    fn fork_splits_unknown_conditions_both_ways() {
        let ctx = Context::new();
        let flag = ctx.syms.fresh_bool("flag", None);
        let set = ContextSet::single(ctx);
        let (then_set, else_set) = set.if_then_else(|_| flag.clone(), None, &RangeOracle);
        assert_eq!(then_set.live().len(), 1);
        assert_eq!(else_set.live().len(), 1);
        assert!(then_set.live()[0].ctr_set.contains(&flag));
        let negated = BoolExp::not(flag, None);
        assert!(else_set.live()[0].ctr_set.contains(&negated));
    }

    #[test]
    fn fork_routes_decided_conditions_one_way() {
        let set = base_set();
        let (then_set, else_set) = set.if_then_else(|_| BoolExp::constant(true, None), None, &RangeOracle);
        assert_eq!(then_set.live().len(), 1);
        assert!(else_set.is_empty());
    }

    #[test]
    fn fork_branch_constraints_cover_the_split() {
        // After a split, each original context appears in both branches with
        // complementary literals.
        let ctx = Context::new();
        let n = ctx.syms.fresh_num("n", None);
        let cond = BoolExp::lt(n, NumExp::int(5, None), None);
        let (then_set, else_set) = ContextSet::single(ctx).if_then_else(|_| cond.clone(), None, &UnknownOracle);
        let then_has = then_set.live()[0].ctr_set.contains(&cond);
        let else_has = else_set.live()[0].ctr_set.contains(&BoolExp::not(cond, None));
        assert!(then_has && else_has);
    }

    #[test]
    fn path_cap_folds_the_tail() {
        let ctx = Context::new();
        let mut set = ContextSet::single(ctx.clone());
        for _ in 0..5 {
            set = set.join(&ContextSet::single(ctx.clone()));
        }
        assert_eq!(set.live().len(), 6);
        let capped = set.apply_path_cap(3, None);
        assert_eq!(capped.live().len(), 3);
        let last = capped.live().last().unwrap();
        assert!(last.logs.iter().any(|d| d.message.contains("path cap")));
    }

    #[test]
    fn failed_paths_survive_mapping() {
        let failing = Context::new().fail(Diagnostic::error(ErrorKind::ObligationViolated, "boom", None));
        let set = ContextSet::single(Context::new()).join(&ContextSet::single(failing));
        let mapped = set.map(|ctx| ctx.set_ret_val(Value::None));
        assert_eq!(mapped.live().len(), 1);
        assert_eq!(mapped.failed().len(), 1);
    }
}
