//! Oracle seam for hard entailment queries.
//!
//! The interpreter decides most obligations with the constraint set's
//! interval reasoning; what remains is forwarded to a [`SolverOracle`]. The
//! trait keeps the analysis independent of any particular solver back end: a
//! deployment can plug an SMT process in, while the default [`RangeOracle`]
//! re-runs interval reasoning over the forwarded slice and otherwise reports
//! `Unknown`. An `Unknown` (including oracle timeouts) always keeps both
//! branches alive, so a weak oracle degrades precision, never soundness.

use ahash::AHashMap;

use crate::{
    constraint::{ConstraintSet, Entailment, Range},
    symexp::{BoolExp, SymId},
};

/// Decides entailment of a query by a conjunction of path constraints.
pub trait SolverOracle {
    /// Whether `conjunction` entails `query`.
    fn entails(&self, conjunction: &[BoolExp], query: &BoolExp) -> Entailment;

    /// Primes the caller's range cache for the given symbols. The default
    /// implementation derives ranges from the conjunction alone.
    fn ranges(&self, conjunction: &[BoolExp], symbols: &[SymId]) -> AHashMap<SymId, Range> {
        let mut set = ConstraintSet::new();
        for constraint in conjunction {
            set = set.add(constraint);
        }
        symbols.iter().map(|sym| (*sym, set.symbol_range(*sym))).collect()
    }
}

/// Interval-arithmetic oracle, the default back end.
///
/// Rebuilds a constraint set from the forwarded slice and answers with its
/// local decision procedure. Has no notion of timeouts because every check
/// is bounded by the slice size.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOracle;

impl SolverOracle for RangeOracle {
    fn entails(&self, conjunction: &[BoolExp], query: &BoolExp) -> Entailment {
        let mut set = ConstraintSet::new();
        for constraint in conjunction {
            set = set.add(constraint);
        }
        if set.known_inconsistent() {
            // An inconsistent path entails anything; report Unknown so the
            // caller keeps the path visible instead of silently passing it.
            return Entailment::Unknown;
        }
        set.decide_local(query)
    }
}

/// Oracle that never decides. Used in tests to exercise the Unknown paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnknownOracle;

impl SolverOracle for UnknownOracle {
    fn entails(&self, _conjunction: &[BoolExp], _query: &BoolExp) -> Entailment {
        Entailment::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symexp::{NumExp, SymGen, SymSort};

    #[test]
    fn range_oracle_decides_from_slice() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let sym = NumExp::symbol(n.clone(), None);
        let conj = vec![BoolExp::lte(NumExp::int(1, None), sym.clone(), None)];
        let oracle = RangeOracle;
        assert_eq!(
            oracle.entails(&conj, &BoolExp::lte(NumExp::int(0, None), sym.clone(), None)),
            Entailment::Valid
        );
        assert_eq!(
            oracle.entails(&conj, &BoolExp::lt(sym.clone(), NumExp::int(0, None), None)),
            Entailment::Invalid
        );
        assert_eq!(
            oracle.entails(&conj, &BoolExp::lt(sym, NumExp::int(5, None), None)),
            Entailment::Unknown
        );
    }

    #[test]
    fn ranges_default_impl_reads_conjunction() {
        let g = SymGen::new();
        let n = g.fresh(SymSort::Num, "n");
        let sym = NumExp::symbol(n.clone(), None);
        let conj = vec![BoolExp::lte(NumExp::int(2, None), sym, None)];
        let map = RangeOracle.ranges(&conj, &[n.id]);
        assert_eq!(map[&n.id].low, Some(crate::rational::Rational::from_int(2)));
    }
}
