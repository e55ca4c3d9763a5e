//! Path constraint sets and per-symbol numeric ranges.
//!
//! A `ConstraintSet` holds the conjunction of boolean constraints collected
//! along one path, plus a cached interval per numeric symbol. The cache uses
//! exact rational bounds so floor-division and modulo predicates never lose
//! precision. Cheap entailment decisions happen here; anything the intervals
//! cannot settle is delegated to the `SolverOracle` by the caller.

use ahash::{AHashMap, AHashSet};

use crate::{
    rational::Rational,
    simplify,
    symexp::{BoolExp, BoolKind, NumConst, NumExp, NumKind, NumUop, SymExp, SymId},
};

/// Outcome of an entailment decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entailment {
    /// The query holds on every model of the conjunction.
    Valid,
    /// The negation holds on every model.
    Invalid,
    /// Undecided by the available reasoning.
    Unknown,
}

impl Entailment {
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Valid => Self::Invalid,
            Self::Invalid => Self::Valid,
            Self::Unknown => Self::Unknown,
        }
    }
}

/// Closed, open or unbounded rational interval.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Range {
    pub low: Option<Rational>,
    pub high: Option<Rational>,
    /// Whether the lower bound is strict.
    pub low_open: bool,
    /// Whether the upper bound is strict.
    pub high_open: bool,
}

impl Range {
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn point(value: Rational) -> Self {
        Self {
            low: Some(value.clone()),
            high: Some(value),
            low_open: false,
            high_open: false,
        }
    }

    #[must_use]
    pub fn at_least(value: Rational, open: bool) -> Self {
        Self {
            low: Some(value),
            low_open: open,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn at_most(value: Rational, open: bool) -> Self {
        Self {
            high: Some(value),
            high_open: open,
            ..Self::default()
        }
    }

    /// Intersection, tightening both ends.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let (low, low_open) = match (&self.low, &other.low) {
            (None, None) => (None, false),
            (Some(a), None) => (Some(a.clone()), self.low_open),
            (None, Some(b)) => (Some(b.clone()), other.low_open),
            (Some(a), Some(b)) => {
                if a > b {
                    (Some(a.clone()), self.low_open)
                } else if b > a {
                    (Some(b.clone()), other.low_open)
                } else {
                    (Some(a.clone()), self.low_open || other.low_open)
                }
            }
        };
        let (high, high_open) = match (&self.high, &other.high) {
            (None, None) => (None, false),
            (Some(a), None) => (Some(a.clone()), self.high_open),
            (None, Some(b)) => (Some(b.clone()), other.high_open),
            (Some(a), Some(b)) => {
                if a < b {
                    (Some(a.clone()), self.high_open)
                } else if b < a {
                    (Some(b.clone()), other.high_open)
                } else {
                    (Some(a.clone()), self.high_open || other.high_open)
                }
            }
        };
        Self {
            low,
            high,
            low_open,
            high_open,
        }
    }

    /// Whether no rational satisfies the interval.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match (&self.low, &self.high) {
            (Some(low), Some(high)) => low > high || (low == high && (self.low_open || self.high_open)),
            _ => false,
        }
    }

    /// `Some(true)` when every value of `self` is strictly below every value
    /// of `other`; `Some(false)` when no value is; `None` when undecided.
    #[must_use]
    pub fn lt_always(&self, other: &Self) -> Option<bool> {
        if let (Some(sup), Some(inf)) = (&self.high, &other.low)
            && (sup < inf || (sup == inf && (self.high_open || other.low_open)))
        {
            return Some(true);
        }
        if let (Some(inf), Some(sup)) = (&self.low, &other.high)
            && inf >= sup
        {
            return Some(false);
        }
        None
    }

    /// `Some(true)` when every value of `self` is at most every value of
    /// `other`; `Some(false)` when every value is strictly above.
    #[must_use]
    pub fn lte_always(&self, other: &Self) -> Option<bool> {
        if let (Some(sup), Some(inf)) = (&self.high, &other.low)
            && sup <= inf
        {
            return Some(true);
        }
        if let (Some(inf), Some(sup)) = (&self.low, &other.high)
            && (inf > sup || (inf == sup && (self.low_open || other.high_open)))
        {
            return Some(false);
        }
        None
    }

    /// Ranges that cannot share a value.
    #[must_use]
    pub fn disjoint(&self, other: &Self) -> bool {
        self.intersect(other).is_empty()
    }

    /// The single value when the interval is a closed point.
    #[must_use]
    pub fn as_point(&self) -> Option<&Rational> {
        match (&self.low, &self.high) {
            (Some(low), Some(high)) if low == high && !self.low_open && !self.high_open => Some(low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let open = if self.low_open { '(' } else { '[' };
        let close = if self.high_open { ')' } else { ']' };
        match &self.low {
            Some(low) => write!(f, "{open}{low}, ")?,
            None => write!(f, "(-inf, ")?,
        }
        match &self.high {
            Some(high) => write!(f, "{high}{close}"),
            None => write!(f, "inf)"),
        }
    }
}

/// Conjunction of path constraints plus the per-symbol range cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintSet {
    constraints: Vec<BoolExp>,
    ranges: AHashMap<SymId, Range>,
}

impl ConstraintSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a constraint after normalization and re-tightens the range
    /// cache. Trivially true constraints are dropped.
    #[must_use]
    pub fn add(&self, constraint: &BoolExp) -> Self {
        let normalized = simplify::boolean(constraint);
        if normalized.as_const() == Some(true) {
            return self.clone();
        }
        let mut out = self.clone();
        out.absorb_ranges(&normalized);
        out.constraints.push(normalized);
        out
    }

    /// Adds an assumption introduced by the analyzer itself. Identical to
    /// `add` at this level; obligation bookkeeping happens in the path set.
    #[must_use]
    pub fn guarantee(&self, constraint: &BoolExp) -> Self {
        self.add(constraint)
    }

    /// Syntactic membership after normalization.
    #[must_use]
    pub fn contains(&self, constraint: &BoolExp) -> bool {
        let normalized = simplify::boolean(constraint);
        self.constraints.contains(&normalized)
    }

    pub fn constraints(&self) -> &[BoolExp] {
        &self.constraints
    }

    #[must_use]
    pub fn symbol_range(&self, sym: SymId) -> Range {
        self.ranges.get(&sym).cloned().unwrap_or_default()
    }

    /// Whether some accumulated constraint already emptied a symbol range.
    #[must_use]
    pub fn known_inconsistent(&self) -> bool {
        self.ranges.values().any(Range::is_empty) || self.constraints.iter().any(|c| c.as_const() == Some(false))
    }

    /// Constraints sharing symbols (transitively) with `syms`. This is the
    /// slice forwarded to the solver oracle so queries stay small.
    #[must_use]
    pub fn relevant_slice(&self, syms: &AHashSet<SymId>) -> Vec<BoolExp> {
        let mut closure = syms.clone();
        let with_syms: Vec<(AHashSet<SymId>, &BoolExp)> = self
            .constraints
            .iter()
            .map(|c| {
                let mut set = AHashSet::new();
                c.collect_symbols(&mut set);
                (set, c)
            })
            .collect();
        let mut selected = vec![false; with_syms.len()];
        loop {
            let mut changed = false;
            for (i, (set, _)) in with_syms.iter().enumerate() {
                if !selected[i] && !set.is_disjoint(&closure) {
                    selected[i] = true;
                    closure.extend(set.iter().copied());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        with_syms
            .into_iter()
            .zip(selected)
            .filter_map(|((_, c), keep)| keep.then(|| c.clone()))
            .collect()
    }

    /// Cheap decision procedure over the cached intervals.
    ///
    /// Returns `Valid` when the query normalizes to true, already appears in
    /// the conjunction, or the intervals force it; `Invalid` symmetrically;
    /// `Unknown` otherwise. Callers escalate `Unknown` to the oracle.
    #[must_use]
    pub fn decide_local(&self, query: &BoolExp) -> Entailment {
        let normalized = simplify::boolean(query);
        if let Some(b) = normalized.as_const() {
            return if b { Entailment::Valid } else { Entailment::Invalid };
        }
        if self.constraints.contains(&normalized) {
            return Entailment::Valid;
        }
        let negated = simplify::boolean(&BoolExp::not(normalized.clone(), None));
        if self.constraints.contains(&negated) {
            return Entailment::Invalid;
        }
        self.decide_by_ranges(&normalized)
    }

    fn decide_by_ranges(&self, query: &BoolExp) -> Entailment {
        match &query.kind {
            BoolKind::Const(b) => {
                if *b {
                    Entailment::Valid
                } else {
                    Entailment::Invalid
                }
            }
            BoolKind::Lt(left, right) => {
                let l = self.eval_range(left);
                let r = self.eval_range(right);
                match l.lt_always(&r) {
                    Some(true) => Entailment::Valid,
                    Some(false) => Entailment::Invalid,
                    None => Entailment::Unknown,
                }
            }
            BoolKind::Lte(left, right) => {
                let l = self.eval_range(left);
                let r = self.eval_range(right);
                match l.lte_always(&r) {
                    Some(true) => Entailment::Valid,
                    Some(false) => Entailment::Invalid,
                    None => Entailment::Unknown,
                }
            }
            BoolKind::Eq(left, right) => match (left.as_ref(), right.as_ref()) {
                (SymExp::Num(l), SymExp::Num(r)) => {
                    let lr = self.eval_range(l);
                    let rr = self.eval_range(r);
                    if lr.disjoint(&rr) {
                        Entailment::Invalid
                    } else if let (Some(a), Some(b)) = (lr.as_point(), rr.as_point()) {
                        if a == b { Entailment::Valid } else { Entailment::Invalid }
                    } else {
                        Entailment::Unknown
                    }
                }
                _ => Entailment::Unknown,
            },
            BoolKind::Neq(left, right) => self
                .decide_by_ranges(&BoolExp::eq_exp((**left).clone(), (**right).clone(), query.span))
                .negate(),
            BoolKind::Not(inner) => self.decide_by_ranges(inner).negate(),
            BoolKind::And(left, right) => match (self.decide_by_ranges(left), self.decide_by_ranges(right)) {
                (Entailment::Valid, Entailment::Valid) => Entailment::Valid,
                (Entailment::Invalid, _) | (_, Entailment::Invalid) => Entailment::Invalid,
                _ => Entailment::Unknown,
            },
            BoolKind::Or(left, right) => match (self.decide_by_ranges(left), self.decide_by_ranges(right)) {
                (Entailment::Valid, _) | (_, Entailment::Valid) => Entailment::Valid,
                (Entailment::Invalid, Entailment::Invalid) => Entailment::Invalid,
                _ => Entailment::Unknown,
            },
            BoolKind::Symbol(_) => Entailment::Unknown,
        }
    }

    /// Interval evaluation of a numeric expression under the cached ranges.
    #[must_use]
    pub fn eval_range(&self, exp: &NumExp) -> Range {
        match &exp.kind {
            NumKind::Const(NumConst::Int(v)) => Range::point(Rational::from_int(*v)),
            NumKind::Const(NumConst::Float(v)) => Rational::from_f64(*v).map_or_else(Range::unbounded, Range::point),
            NumKind::Symbol(sym) => self.symbol_range(sym.id),
            NumKind::Bop { op, left, right } => {
                let l = self.eval_range(left);
                let r = self.eval_range(right);
                eval_bop_range(*op, &l, &r)
            }
            NumKind::Uop { op, operand } => eval_uop_range(*op, &self.eval_range(operand)),
            NumKind::Max(items) => {
                let mut out: Option<Range> = None;
                for item in items {
                    let range = self.eval_range(item);
                    out = Some(match out {
                        None => range,
                        Some(acc) => Range {
                            low: max_bound(acc.low, range.low),
                            high: match (acc.high, range.high) {
                                (Some(a), Some(b)) => Some(a.max(b)),
                                _ => None,
                            },
                            low_open: false,
                            high_open: false,
                        },
                    });
                }
                out.unwrap_or_default()
            }
            NumKind::Min(items) => {
                let mut out: Option<Range> = None;
                for item in items {
                    let range = self.eval_range(item);
                    out = Some(match out {
                        None => range,
                        Some(acc) => Range {
                            low: match (acc.low, range.low) {
                                (Some(a), Some(b)) => Some(a.min(b)),
                                _ => None,
                            },
                            high: min_bound(acc.high, range.high),
                            low_open: false,
                            high_open: false,
                        },
                    });
                }
                out.unwrap_or_default()
            }
            NumKind::Index { .. } | NumKind::Numel { .. } => Range::unbounded(),
        }
    }

    /// Updates the range cache from one normalized constraint.
    fn absorb_ranges(&mut self, constraint: &BoolExp) {
        match &constraint.kind {
            BoolKind::Lt(left, right) => self.absorb_cmp(left, right, true),
            BoolKind::Lte(left, right) => self.absorb_cmp(left, right, false),
            BoolKind::Eq(left, right) => {
                if let (SymExp::Num(l), SymExp::Num(r)) = (left.as_ref(), right.as_ref()) {
                    if let NumKind::Symbol(sym) = &l.kind {
                        let range = self.eval_range(r);
                        self.tighten(sym.id, &range);
                    }
                    if let NumKind::Symbol(sym) = &r.kind {
                        let range = self.eval_range(l);
                        self.tighten(sym.id, &range);
                    }
                }
            }
            BoolKind::And(left, right) => {
                self.absorb_ranges(left);
                self.absorb_ranges(right);
            }
            _ => {}
        }
    }

    /// Records `left < right` (strict) or `left <= right` into the cache when
    /// either side is a bare symbol.
    fn absorb_cmp(&mut self, left: &NumExp, right: &NumExp, strict: bool) {
        if let NumKind::Symbol(sym) = &left.kind {
            let bound = self.eval_range(right);
            if let Some(high) = bound.high {
                self.tighten(sym.id, &Range::at_most(high, strict || bound.high_open));
            }
        }
        if let NumKind::Symbol(sym) = &right.kind {
            let bound = self.eval_range(left);
            if let Some(low) = bound.low {
                self.tighten(sym.id, &Range::at_least(low, strict || bound.low_open));
            }
        }
    }

    fn tighten(&mut self, sym: SymId, range: &Range) {
        let entry = self.ranges.entry(sym).or_default();
        *entry = entry.intersect(range);
    }
}

fn max_bound(a: Option<Rational>, b: Option<Rational>) -> Option<Rational> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn min_bound(a: Option<Rational>, b: Option<Rational>) -> Option<Rational> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn eval_bop_range(op: crate::symexp::NumBop, l: &Range, r: &Range) -> Range {
    use crate::symexp::NumBop;
    match op {
        NumBop::Add => Range {
            low: add_bounds(&l.low, &r.low),
            high: add_bounds(&l.high, &r.high),
            low_open: l.low_open || r.low_open,
            high_open: l.high_open || r.high_open,
        },
        NumBop::Sub => Range {
            low: sub_bounds(&l.low, &r.high),
            high: sub_bounds(&l.high, &r.low),
            low_open: l.low_open || r.high_open,
            high_open: l.high_open || r.low_open,
        },
        NumBop::Mul => mul_range(l, r),
        NumBop::TrueDiv => {
            if let Some(point) = r.as_point()
                && !point.is_zero()
            {
                scale_range(l, point)
            } else {
                Range::unbounded()
            }
        }
        NumBop::FloorDiv => {
            if let Some(point) = r.as_point()
                && !point.is_zero()
            {
                let scaled = scale_range(l, point);
                Range {
                    low: scaled.low.map(|b| b.floor()),
                    high: scaled.high.map(|b| b.floor()),
                    low_open: false,
                    high_open: false,
                }
            } else {
                Range::unbounded()
            }
        }
        NumBop::Mod => {
            // x % n with a known positive n lands in [0, n).
            if let Some(point) = r.as_point()
                && *point > Rational::zero()
            {
                Range {
                    low: Some(Rational::zero()),
                    high: Some(point.clone()),
                    low_open: false,
                    high_open: true,
                }
            } else {
                Range::unbounded()
            }
        }
    }
}

fn eval_uop_range(op: NumUop, operand: &Range) -> Range {
    match op {
        NumUop::Neg => Range {
            low: operand.high.clone().map(|b| -b),
            high: operand.low.clone().map(|b| -b),
            low_open: operand.high_open,
            high_open: operand.low_open,
        },
        NumUop::Floor => Range {
            low: operand.low.clone().map(|b| b.floor()),
            high: operand.high.clone().map(|b| b.floor()),
            low_open: false,
            high_open: false,
        },
        NumUop::Ceil => Range {
            low: operand.low.clone().map(|b| b.ceil()),
            high: operand.high.clone().map(|b| b.ceil()),
            low_open: false,
            high_open: false,
        },
        NumUop::Abs => {
            let nonneg = Range::at_least(Rational::zero(), false);
            let flipped = eval_uop_range(NumUop::Neg, operand);
            let widened = Range {
                low: Some(Rational::zero()),
                high: match (&operand.high, &flipped.high) {
                    (Some(a), Some(b)) => Some(a.clone().max(b.clone())),
                    _ => None,
                },
                low_open: false,
                high_open: operand.high_open || flipped.high_open,
            };
            widened.intersect(&nonneg)
        }
    }
}

fn add_bounds(a: &Option<Rational>, b: &Option<Rational>) -> Option<Rational> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.clone() + b.clone()),
        _ => None,
    }
}

fn sub_bounds(a: &Option<Rational>, b: &Option<Rational>) -> Option<Rational> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.clone() - b.clone()),
        _ => None,
    }
}

fn mul_range(l: &Range, r: &Range) -> Range {
    // Exact when one side is a known point; otherwise only the
    // fully-bounded product is computed.
    if let Some(point) = r.as_point() {
        return scale_mul_range(l, point);
    }
    if let Some(point) = l.as_point() {
        return scale_mul_range(r, point);
    }
    match (&l.low, &l.high, &r.low, &r.high) {
        (Some(ll), Some(lh), Some(rl), Some(rh)) => {
            let products = [
                ll.clone() * rl.clone(),
                ll.clone() * rh.clone(),
                lh.clone() * rl.clone(),
                lh.clone() * rh.clone(),
            ];
            let low = products.iter().cloned().reduce(Rational::min);
            let high = products.into_iter().reduce(Rational::max);
            // Openness is dropped: widening an open bound to closed is sound.
            Range {
                low,
                high,
                low_open: false,
                high_open: false,
            }
        }
        _ => Range::unbounded(),
    }
}

fn scale_mul_range(range: &Range, factor: &Rational) -> Range {
    if factor.is_zero() {
        return Range::point(Rational::zero());
    }
    let scaled = Range {
        low: range.low.clone().map(|b| b * factor.clone()),
        high: range.high.clone().map(|b| b * factor.clone()),
        low_open: range.low_open,
        high_open: range.high_open,
    };
    if *factor > Rational::zero() {
        scaled
    } else {
        Range {
            low: scaled.high,
            high: scaled.low,
            low_open: scaled.high_open,
            high_open: scaled.low_open,
        }
    }
}

fn scale_range(range: &Range, divisor: &Rational) -> Range {
    let inverse = (Rational::one() / divisor.clone()).expect("divisor checked non-zero");
    scale_mul_range(range, &inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symexp::{SymGen, SymSort, Symbol};

    fn sym_exp(sym: &Symbol) -> NumExp {
        NumExp::symbol(sym.clone(), None)
    }

    fn int(v: i64) -> NumExp {
        NumExp::int(v, None)
    }

    #[test]
    fn add_records_symbol_bounds() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new()
            .add(&BoolExp::lte(int(1), sym_exp(&n), None))
            .add(&BoolExp::lt(sym_exp(&n), int(10), None));
        let range = set.symbol_range(n.id);
        assert_eq!(range.low, Some(Rational::from_int(1)));
        assert!(!range.low_open);
        assert_eq!(range.high, Some(Rational::from_int(10)));
        assert!(range.high_open);
    }

    #[test]
    fn ranges_decide_simple_queries() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new().add(&BoolExp::lte(int(2), sym_exp(&n), None));
        assert_eq!(set.decide_local(&BoolExp::lte(int(0), sym_exp(&n), None)), Entailment::Valid);
        assert_eq!(set.decide_local(&BoolExp::lt(sym_exp(&n), int(2), None)), Entailment::Invalid);
        assert_eq!(
            set.decide_local(&BoolExp::lt(sym_exp(&n), int(100), None)),
            Entailment::Unknown
        );
    }

    #[test]
    fn eq_constraint_pins_a_point() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new().add(&BoolExp::eq_num(sym_exp(&n), int(4), None));
        assert_eq!(set.symbol_range(n.id).as_point(), Some(&Rational::from_int(4)));
        assert_eq!(
            set.decide_local(&BoolExp::eq_num(sym_exp(&n), int(4), None)),
            Entailment::Valid
        );
        assert_eq!(
            set.decide_local(&BoolExp::eq_num(sym_exp(&n), int(5), None)),
            Entailment::Invalid
        );
    }

    #[test]
    fn interval_arithmetic_through_expressions() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new()
            .add(&BoolExp::lte(int(0), sym_exp(&n), None))
            .add(&BoolExp::lte(sym_exp(&n), int(10), None));
        // 2*n + 1 in [1, 21]
        let exp = NumExp::add(NumExp::mul(int(2), sym_exp(&n), None), int(1), None);
        let range = set.eval_range(&exp);
        assert_eq!(range.low, Some(Rational::from_int(1)));
        assert_eq!(range.high, Some(Rational::from_int(21)));
    }

    #[test]
    fn modulo_by_positive_constant_bounds() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new();
        let exp = NumExp::bop(crate::symexp::NumBop::Mod, sym_exp(&n), int(4), None);
        let range = set.eval_range(&exp);
        assert_eq!(range.low, Some(Rational::from_int(0)));
        assert_eq!(range.high, Some(Rational::from_int(4)));
        assert!(range.high_open);
    }

    #[test]
    fn valid_and_invalid_never_hold_together() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new().add(&BoolExp::lte(int(3), sym_exp(&n), None));
        let queries = [
            BoolExp::lt(sym_exp(&n), int(3), None),
            BoolExp::lte(int(0), sym_exp(&n), None),
            BoolExp::eq_num(sym_exp(&n), int(7), None),
        ];
        for query in &queries {
            let direct = set.decide_local(query);
            let negated = set.decide_local(&BoolExp::not(query.clone(), None));
            assert!(
                !(direct == Entailment::Valid && negated == Entailment::Valid),
                "both {query} and its negation decided valid"
            );
        }
    }

    #[test]
    fn contradictory_bounds_are_flagged() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let set = ConstraintSet::new()
            .add(&BoolExp::lt(sym_exp(&n), int(0), None))
            .add(&BoolExp::lte(int(1), sym_exp(&n), None));
        assert!(set.known_inconsistent());
    }

    #[test]
    fn relevant_slice_follows_shared_symbols() {
        let g = SymGen::new();
        let a = g.fresh(SymSort::Num, "a");
        let b = g.fresh(SymSort::Num, "b");
        let c = g.fresh(SymSort::Num, "c");
        let set = ConstraintSet::new()
            .add(&BoolExp::lt(sym_exp(&a), sym_exp(&b), None))
            .add(&BoolExp::lt(sym_exp(&b), int(9), None))
            .add(&BoolExp::lt(sym_exp(&c), int(1), None));
        let mut syms = AHashSet::new();
        syms.insert(a.id);
        let slice = set.relevant_slice(&syms);
        assert_eq!(slice.len(), 2);
    }

    #[test]
    fn contains_is_syntactic_after_normalization() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let raw = BoolExp::lt(NumExp::add(sym_exp(&n), int(0), None), int(5), None);
        let set = ConstraintSet::new().add(&raw);
        assert!(set.contains(&BoolExp::lt(sym_exp(&n), int(5), None)));
    }
}
