//! Sound, incomplete satisfiability checks used by partition pruning.
//!
//! Top-level conjuncts of the inputs are folded into per-column domains, then
//! each input is evaluated over those domains in three-valued logic. A pair is
//! reported unsatisfiable only when some domain is empty or an input can never
//! evaluate to `true`.

use std::{cmp::Ordering, collections::BTreeMap, convert::Infallible, sync::Arc};

use super::{
    ComparisonOp, Operand, Predicate, PredicateNode, PredicateVisitor, ScalarValue, VisitOutcome,
};

/// Returns true when no row can satisfy both `lhs` and `rhs`.
///
/// False negatives are possible; false positives are not.
#[must_use]
pub fn is_unsatisfiable(lhs: &Predicate, rhs: &Predicate) -> bool {
    let mut guarantee = Guarantee::default();
    guarantee.constrain(lhs);
    guarantee.constrain(rhs);
    if guarantee.is_contradiction() {
        return true;
    }
    let mut evaluator = DomainEvaluator {
        guarantee: &guarantee,
    };
    for side in [lhs, rhs] {
        let outcome = match side.accept(&mut evaluator) {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        };
        if outcome.value.is_some_and(|value| !value.may_be_true()) {
            return true;
        }
    }
    false
}

/// Column values pinned by the top-level conjuncts of `guarantee`.
///
/// `column = literal` yields the literal; `column IS NULL` yields [`ScalarValue::Null`].
#[must_use]
pub fn known_values(guarantee: &Predicate) -> BTreeMap<Arc<str>, ScalarValue> {
    let mut known = BTreeMap::new();
    for conjunct in guarantee.conjuncts() {
        match conjunct.kind() {
            PredicateNode::Compare {
                left: Operand::Column(column),
                op: ComparisonOp::Equal,
                right: Operand::Literal(value),
            }
            | PredicateNode::Compare {
                left: Operand::Literal(value),
                op: ComparisonOp::Equal,
                right: Operand::Column(column),
            } if !value.is_null() => {
                known.insert(column.name.clone(), value.clone());
            }
            PredicateNode::InList {
                expr: Operand::Column(column),
                list,
                negated: false,
            } if list.len() == 1 && !list[0].is_null() => {
                known.insert(column.name.clone(), list[0].clone());
            }
            PredicateNode::IsNull {
                expr: Operand::Column(column),
                negated: false,
            } => {
                known.insert(column.name.clone(), ScalarValue::Null);
            }
            _ => {}
        }
    }
    known
}

#[derive(Clone, Debug)]
struct Bound {
    value: ScalarValue,
    inclusive: bool,
}

/// Set of values a column may take under a guarantee.
#[derive(Clone, Debug, Default)]
struct Domain {
    point: Option<ScalarValue>,
    lower: Option<Bound>,
    upper: Option<Bound>,
    excluded: Vec<ScalarValue>,
    /// `Some(true)`: always null. `Some(false)`: never null.
    nullness: Option<bool>,
    empty: bool,
}

impl Domain {
    fn require_null(&mut self) {
        if self.nullness == Some(false) {
            self.empty = true;
        }
        self.nullness = Some(true);
    }

    fn require_not_null(&mut self) {
        if self.nullness == Some(true) {
            self.empty = true;
        }
        self.nullness = Some(false);
    }

    fn restrict(&mut self, op: ComparisonOp, value: &ScalarValue) {
        if value.is_null() {
            self.empty = true;
            return;
        }
        self.require_not_null();
        match op {
            ComparisonOp::Equal => match &self.point {
                Some(point) => {
                    if matches!(point.compare(value), Some(ord) if ord != Ordering::Equal) {
                        self.empty = true;
                    }
                }
                None => self.point = Some(value.clone()),
            },
            ComparisonOp::NotEqual => self.excluded.push(value.clone()),
            ComparisonOp::LessThan => self.tighten_upper(value, false),
            ComparisonOp::LessThanOrEqual => self.tighten_upper(value, true),
            ComparisonOp::GreaterThan => self.tighten_lower(value, false),
            ComparisonOp::GreaterThanOrEqual => self.tighten_lower(value, true),
        }
        self.check();
    }

    fn tighten_upper(&mut self, value: &ScalarValue, inclusive: bool) {
        match &mut self.upper {
            None => {
                self.upper = Some(Bound {
                    value: value.clone(),
                    inclusive,
                })
            }
            Some(bound) => match value.compare(&bound.value) {
                Some(Ordering::Less) => {
                    *bound = Bound {
                        value: value.clone(),
                        inclusive,
                    }
                }
                Some(Ordering::Equal) => bound.inclusive &= inclusive,
                _ => {}
            },
        }
    }

    fn tighten_lower(&mut self, value: &ScalarValue, inclusive: bool) {
        match &mut self.lower {
            None => {
                self.lower = Some(Bound {
                    value: value.clone(),
                    inclusive,
                })
            }
            Some(bound) => match value.compare(&bound.value) {
                Some(Ordering::Greater) => {
                    *bound = Bound {
                        value: value.clone(),
                        inclusive,
                    }
                }
                Some(Ordering::Equal) => bound.inclusive &= inclusive,
                _ => {}
            },
        }
    }

    fn check(&mut self) {
        if let Some(point) = self.point.clone() {
            if !self.admits(&point) {
                self.empty = true;
            }
        }
        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            match lower.value.compare(&upper.value) {
                Some(Ordering::Greater) => self.empty = true,
                Some(Ordering::Equal) => {
                    let value = lower.value.clone();
                    if !(lower.inclusive && upper.inclusive) || self.is_excluded(&value) {
                        self.empty = true;
                    }
                }
                _ => {}
            }
        }
    }

    fn is_excluded(&self, value: &ScalarValue) -> bool {
        self.excluded
            .iter()
            .any(|excluded| excluded.compare(value) == Some(Ordering::Equal))
    }

    /// Whether a non-null `value` may belong to the domain.
    fn admits(&self, value: &ScalarValue) -> bool {
        if let Some(point) = &self.point {
            if matches!(point.compare(value), Some(ord) if ord != Ordering::Equal) {
                return false;
            }
        }
        if let Some(lower) = &self.lower {
            match value.compare(&lower.value) {
                Some(Ordering::Less) => return false,
                Some(Ordering::Equal) if !lower.inclusive => return false,
                _ => {}
            }
        }
        if let Some(upper) = &self.upper {
            match value.compare(&upper.value) {
                Some(Ordering::Greater) => return false,
                Some(Ordering::Equal) if !upper.inclusive => return false,
                _ => {}
            }
        }
        !self.is_excluded(value)
    }

    /// Whether some non-null member of the domain satisfies `member op value`.
    fn may_satisfy(&self, op: ComparisonOp, value: &ScalarValue) -> bool {
        let below = |bound: &Option<Bound>, strict: bool| match bound {
            None => true,
            Some(bound) => match bound.value.compare(value) {
                Some(Ordering::Less) | None => true,
                Some(Ordering::Equal) => !strict && bound.inclusive,
                Some(Ordering::Greater) => false,
            },
        };
        let above = |bound: &Option<Bound>, strict: bool| match bound {
            None => true,
            Some(bound) => match bound.value.compare(value) {
                Some(Ordering::Greater) | None => true,
                Some(Ordering::Equal) => !strict && bound.inclusive,
                Some(Ordering::Less) => false,
            },
        };
        match op {
            ComparisonOp::Equal => self.admits(value),
            ComparisonOp::NotEqual => !self.is_singleton(value),
            ComparisonOp::LessThan => below(&self.lower, true),
            ComparisonOp::LessThanOrEqual => below(&self.lower, false),
            ComparisonOp::GreaterThan => above(&self.upper, true),
            ComparisonOp::GreaterThanOrEqual => above(&self.upper, false),
        }
    }

    fn is_singleton(&self, value: &ScalarValue) -> bool {
        match (&self.lower, &self.upper) {
            (Some(lower), Some(upper)) => {
                lower.inclusive
                    && upper.inclusive
                    && lower.value.compare(value) == Some(Ordering::Equal)
                    && upper.value.compare(value) == Some(Ordering::Equal)
            }
            _ => false,
        }
    }

    fn null_outcomes(&self) -> Outcomes {
        if self.nullness == Some(false) {
            Outcomes::NONE
        } else {
            Outcomes::of(None)
        }
    }
}

#[derive(Debug, Default)]
struct Guarantee {
    columns: BTreeMap<Arc<str>, Domain>,
    contradiction: bool,
}

impl Guarantee {
    fn domain(&mut self, column: &Arc<str>) -> &mut Domain {
        self.columns.entry(column.clone()).or_default()
    }

    fn constrain(&mut self, predicate: &Predicate) {
        for conjunct in predicate.conjuncts() {
            self.constrain_one(conjunct);
        }
    }

    fn constrain_one(&mut self, conjunct: &Predicate) {
        match conjunct.kind() {
            PredicateNode::Compare {
                left: Operand::Column(column),
                op,
                right: Operand::Literal(value),
            } => self.domain(&column.name).restrict(*op, value),
            PredicateNode::Compare {
                left: Operand::Literal(value),
                op,
                right: Operand::Column(column),
            } => self.domain(&column.name).restrict(op.flipped(), value),
            PredicateNode::Compare {
                left: Operand::Literal(lhs),
                op,
                right: Operand::Literal(rhs),
            } => {
                if matches!(lhs.compare(rhs), Some(ord) if !op.test_ordering(ord))
                    || lhs.is_null()
                    || rhs.is_null()
                {
                    self.contradiction = true;
                }
            }
            PredicateNode::InList {
                expr: Operand::Column(column),
                list,
                negated,
            } => {
                if !negated && list.len() == 1 {
                    self.domain(&column.name)
                        .restrict(ComparisonOp::Equal, &list[0]);
                } else if *negated {
                    let domain = self.domain(&column.name);
                    for value in list {
                        domain.restrict(ComparisonOp::NotEqual, value);
                    }
                }
            }
            PredicateNode::IsNull {
                expr: Operand::Column(column),
                negated,
            } => {
                let domain = self.domain(&column.name);
                if *negated {
                    domain.require_not_null();
                } else {
                    domain.require_null();
                }
            }
            PredicateNode::Not(inner) => {
                let negated = inner.as_ref().clone().negate();
                match negated.kind() {
                    PredicateNode::Not(child) if child.is_trivially_true() => {
                        self.contradiction = true;
                    }
                    PredicateNode::Not(_) | PredicateNode::Or(_) => {}
                    _ => self.constrain(&negated),
                }
            }
            _ => {}
        }
    }

    fn is_contradiction(&self) -> bool {
        self.contradiction || self.columns.values().any(|domain| domain.empty)
    }
}

/// Possible three-valued results of a predicate over a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Outcomes(u8);

impl Outcomes {
    const NONE: Outcomes = Outcomes(0);
    const TRUE: u8 = 0b001;
    const FALSE: u8 = 0b010;
    const NULL: u8 = 0b100;
    const ANY: Outcomes = Outcomes(0b111);
    const BOOLEAN: Outcomes = Outcomes(0b011);

    fn of(value: Option<bool>) -> Self {
        match value {
            Some(true) => Outcomes(Self::TRUE),
            Some(false) => Outcomes(Self::FALSE),
            None => Outcomes(Self::NULL),
        }
    }

    fn union(self, other: Outcomes) -> Self {
        Outcomes(self.0 | other.0)
    }

    fn may_be_true(self) -> bool {
        self.0 & Self::TRUE != 0
    }

    fn negate(self) -> Self {
        let mut out = self.0 & Self::NULL;
        if self.0 & Self::TRUE != 0 {
            out |= Self::FALSE;
        }
        if self.0 & Self::FALSE != 0 {
            out |= Self::TRUE;
        }
        Outcomes(out)
    }

    fn values(self) -> impl Iterator<Item = Option<bool>> {
        [
            (Self::TRUE, Some(true)),
            (Self::FALSE, Some(false)),
            (Self::NULL, None),
        ]
        .into_iter()
        .filter(move |(bit, _)| self.0 & bit != 0)
        .map(|(_, value)| value)
    }

    fn combine(self, other: Outcomes, op: fn(Option<bool>, Option<bool>) -> Option<bool>) -> Self {
        let mut out = Outcomes::NONE;
        for lhs in self.values() {
            for rhs in other.values() {
                out = out.union(Outcomes::of(op(lhs, rhs)));
            }
        }
        out
    }
}

fn kleene_and(lhs: Option<bool>, rhs: Option<bool>) -> Option<bool> {
    match (lhs, rhs) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn kleene_or(lhs: Option<bool>, rhs: Option<bool>) -> Option<bool> {
    match (lhs, rhs) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

struct DomainEvaluator<'a> {
    guarantee: &'a Guarantee,
}

impl DomainEvaluator<'_> {
    fn compare(&self, column: &Arc<str>, op: ComparisonOp, value: &ScalarValue) -> Outcomes {
        let Some(domain) = self.guarantee.columns.get(column) else {
            return Outcomes::ANY;
        };
        if value.is_null() || domain.nullness == Some(true) {
            return Outcomes::of(None);
        }
        let non_null = match &domain.point {
            Some(point) => match point.compare(value) {
                Some(ord) => Outcomes::of(Some(op.test_ordering(ord))),
                None => Outcomes::BOOLEAN,
            },
            None => {
                let mut out = Outcomes::NONE;
                if domain.may_satisfy(op, value) {
                    out = out.union(Outcomes::of(Some(true)));
                }
                if domain.may_satisfy(op.negated(), value) {
                    out = out.union(Outcomes::of(Some(false)));
                }
                out
            }
        };
        non_null.union(domain.null_outcomes())
    }

    fn in_list(&self, column: &Arc<str>, list: &[ScalarValue], negated: bool) -> Outcomes {
        let Some(domain) = self.guarantee.columns.get(column) else {
            return Outcomes::ANY;
        };
        if domain.nullness == Some(true) {
            return Outcomes::of(None);
        }
        let has_null = list.iter().any(ScalarValue::is_null);
        let mut membership = Outcomes::of(Some(false));
        for value in list.iter().filter(|value| !value.is_null()) {
            membership = membership.combine(
                self.compare(column, ComparisonOp::Equal, value),
                kleene_or,
            );
        }
        if has_null {
            membership = membership.combine(Outcomes::of(None), kleene_or);
        }
        if negated {
            membership.negate()
        } else {
            membership
        }
    }

    fn null_check(&self, column: &Arc<str>, negated: bool) -> Outcomes {
        let outcome = match self.guarantee.columns.get(column).and_then(|d| d.nullness) {
            Some(is_null) => Outcomes::of(Some(is_null)),
            None => Outcomes::BOOLEAN,
        };
        if negated {
            outcome.negate()
        } else {
            outcome
        }
    }
}

impl PredicateVisitor for DomainEvaluator<'_> {
    type Error = Infallible;
    type Value = Outcomes;

    fn visit_leaf(&mut self, leaf: &PredicateNode) -> Result<VisitOutcome<Outcomes>, Infallible> {
        let outcome = match leaf {
            PredicateNode::True => Outcomes::of(Some(true)),
            PredicateNode::Compare {
                left: Operand::Column(column),
                op,
                right: Operand::Literal(value),
            } => self.compare(&column.name, *op, value),
            PredicateNode::Compare {
                left: Operand::Literal(value),
                op,
                right: Operand::Column(column),
            } => self.compare(&column.name, op.flipped(), value),
            PredicateNode::Compare {
                left: Operand::Literal(lhs),
                op,
                right: Operand::Literal(rhs),
            } => match lhs.compare(rhs) {
                Some(ord) => Outcomes::of(Some(op.test_ordering(ord))),
                None if lhs.is_null() || rhs.is_null() => Outcomes::of(None),
                None => Outcomes::ANY,
            },
            PredicateNode::InList {
                expr: Operand::Column(column),
                list,
                negated,
            } => self.in_list(&column.name, list, *negated),
            PredicateNode::IsNull {
                expr: Operand::Column(column),
                negated,
            } => self.null_check(&column.name, *negated),
            PredicateNode::IsNull {
                expr: Operand::Literal(value),
                negated,
            } => Outcomes::of(Some(value.is_null() != *negated)),
            _ => Outcomes::ANY,
        };
        Ok(VisitOutcome::value(outcome))
    }

    fn combine_not(
        &mut self,
        _original: &Predicate,
        child: VisitOutcome<Outcomes>,
    ) -> Result<VisitOutcome<Outcomes>, Infallible> {
        let value = child.value.unwrap_or(Outcomes::ANY);
        Ok(VisitOutcome::value(value.negate()))
    }

    fn combine_and(
        &mut self,
        _original: &Predicate,
        children: Vec<VisitOutcome<Outcomes>>,
    ) -> Result<VisitOutcome<Outcomes>, Infallible> {
        let value = children.into_iter().fold(Outcomes::of(Some(true)), |acc, child| {
            acc.combine(child.value.unwrap_or(Outcomes::ANY), kleene_and)
        });
        Ok(VisitOutcome::value(value))
    }

    fn combine_or(
        &mut self,
        _original: &Predicate,
        children: Vec<VisitOutcome<Outcomes>>,
    ) -> Result<VisitOutcome<Outcomes>, Infallible> {
        let value = children.into_iter().fold(Outcomes::of(Some(false)), |acc, child| {
            acc.combine(child.value.unwrap_or(Outcomes::ANY), kleene_or)
        });
        Ok(VisitOutcome::value(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ColumnRef;

    fn col(name: &str) -> ColumnRef {
        ColumnRef::new(name)
    }

    #[test]
    fn conflicting_points_are_unsatisfiable() {
        let root = Predicate::eq(col("country"), "US");
        assert!(is_unsatisfiable(&Predicate::eq(col("country"), "FR"), &root));
        assert!(!is_unsatisfiable(&Predicate::eq(col("country"), "US"), &root));
    }

    #[test]
    fn unrelated_columns_never_prune() {
        let node = Predicate::and([
            Predicate::eq(col("state"), "NY"),
            Predicate::eq(col("city"), "New York"),
        ]);
        assert!(!is_unsatisfiable(&Predicate::gt(col("population"), 10i64), &node));
        assert!(!is_unsatisfiable(
            &Predicate::eq(col("city"), "Franklin"),
            &Predicate::eq(col("state"), "NY")
        ));
        assert!(is_unsatisfiable(&Predicate::eq(col("city"), "Franklin"), &node));
    }

    #[test]
    fn ranges_against_points() {
        let point = Predicate::eq(col("year"), 2020i64);
        assert!(is_unsatisfiable(&Predicate::gt(col("year"), 2020i64), &point));
        assert!(!is_unsatisfiable(&Predicate::gte(col("year"), 2020i64), &point));
        assert!(is_unsatisfiable(
            &Predicate::gt(col("year"), 2021i64),
            &Predicate::lt(col("year"), 2021i64),
        ));
        assert!(!is_unsatisfiable(
            &Predicate::lte(col("year"), 2021i64),
            &Predicate::gte(col("year"), 2021i64),
        ));
    }

    #[test]
    fn disjunctions_and_negations_evaluate_over_domains() {
        let node = Predicate::eq(col("state"), "TX");
        let either = Predicate::or([
            Predicate::eq(col("state"), "NY"),
            Predicate::eq(col("state"), "CA"),
        ]);
        assert!(is_unsatisfiable(&either, &node));
        assert!(is_unsatisfiable(
            &Predicate::in_list(col("state"), ["NY", "CA"]),
            &node
        ));
        assert!(is_unsatisfiable(
            &Predicate::not(Predicate::eq(col("state"), "TX")),
            &node
        ));
        assert!(!is_unsatisfiable(
            &Predicate::not(Predicate::eq(col("state"), "NY")),
            &node
        ));
    }

    #[test]
    fn null_partitions() {
        let null_node = Predicate::is_null(col("state"));
        assert!(is_unsatisfiable(&Predicate::eq(col("state"), "NY"), &null_node));
        assert!(!is_unsatisfiable(&Predicate::is_null(col("state")), &null_node));
        assert!(is_unsatisfiable(
            &Predicate::not(Predicate::is_null(col("state"))),
            &null_node
        ));
        assert!(is_unsatisfiable(
            &Predicate::always_false(),
            &Predicate::always_true()
        ));
    }

    #[test]
    fn known_values_reads_equalities() {
        let guarantee = Predicate::and([
            Predicate::eq(col("state"), "CA"),
            Predicate::is_null(col("city")),
            Predicate::gt(col("year"), 2000i64),
        ]);
        let known = known_values(&guarantee);
        assert_eq!(known.len(), 2);
        assert_eq!(known.get("state"), Some(&ScalarValue::from("CA")));
        assert_eq!(known.get("city"), Some(&ScalarValue::Null));
    }
}
