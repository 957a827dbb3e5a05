//! Predicate tree used for filters and partition expressions.
//!
//! Predicates are built unbound (column references by name), bound against a
//! schema with [`Predicate::bind`], evaluated against record batches with
//! [`evaluate`], and compared against partition guarantees with
//! [`is_unsatisfiable`] during pruning.

mod bind;
mod error;
mod eval;
mod guarantee;
mod value;
mod visitor;

use std::{cmp::Ordering, collections::BTreeSet, fmt, sync::Arc};

pub use error::ResolveError;
pub(crate) use eval::filter_batch;
pub use eval::evaluate;
pub use guarantee::{is_unsatisfiable, known_values};
pub use value::ScalarValue;
pub use visitor::{PredicateVisitor, VisitOutcome};

/// Reference identifying a column used inside predicates.
///
/// The index is filled in by [`Predicate::bind`]; unbound references carry only the name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// Canonical column name.
    pub name: Arc<str>,
    /// Ordinal of the column within the bound schema.
    pub index: Option<usize>,
}

impl ColumnRef {
    /// Creates an unbound column reference.
    #[must_use]
    pub fn new<N>(name: N) -> Self
    where
        N: Into<Arc<str>>,
    {
        Self {
            name: name.into(),
            index: None,
        }
    }
}

/// Operand used by predicate comparisons.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Reference to a column.
    Column(ColumnRef),
    /// Literal value.
    Literal(ScalarValue),
}

impl From<ColumnRef> for Operand {
    fn from(value: ColumnRef) -> Self {
        Self::Column(value)
    }
}

impl From<ScalarValue> for Operand {
    fn from(value: ScalarValue) -> Self {
        Self::Literal(value)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(column) => f.write_str(&column.name),
            Operand::Literal(value) => write!(f, "{value}"),
        }
    }
}

/// Comparison operator used by binary predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// Equals (`=`).
    Equal,
    /// Not equals (`!=`).
    NotEqual,
    /// Less than (`<`).
    LessThan,
    /// Less than or equal to (`<=`).
    LessThanOrEqual,
    /// Greater than (`>`).
    GreaterThan,
    /// Greater than or equal to (`>=`).
    GreaterThanOrEqual,
}

impl ComparisonOp {
    /// Returns a textual representation of the operator.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        }
    }

    /// Returns the operator that swaps the left/right side of the comparison.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::Equal,
            ComparisonOp::NotEqual => ComparisonOp::NotEqual,
            ComparisonOp::LessThan => ComparisonOp::GreaterThan,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::GreaterThan => ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThanOrEqual,
        }
    }

    /// Returns the logical negation of this operator.
    #[must_use]
    pub fn negated(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::NotEqual,
            ComparisonOp::NotEqual => ComparisonOp::Equal,
            ComparisonOp::LessThan => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThan,
            ComparisonOp::GreaterThan => ComparisonOp::LessThanOrEqual,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThan,
        }
    }

    /// Evaluates the operator against a comparison ordering.
    #[must_use]
    pub fn test_ordering(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Equal => ordering == Ordering::Equal,
            ComparisonOp::NotEqual => ordering != Ordering::Equal,
            ComparisonOp::LessThan => ordering == Ordering::Less,
            ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
            ComparisonOp::GreaterThan => ordering == Ordering::Greater,
            ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recursive predicate node; leaf and branch variants coexist.
#[derive(Clone, Debug, PartialEq)]
pub enum PredicateNode {
    /// Always-true literal; matches all rows.
    True,
    /// Binary comparison.
    Compare {
        /// Left operand.
        left: Operand,
        /// Operator.
        op: ComparisonOp,
        /// Right operand.
        right: Operand,
    },
    /// Membership test against a literal list.
    InList {
        /// Value to test.
        expr: Operand,
        /// Literal candidates.
        list: Vec<ScalarValue>,
        /// True when representing `NOT IN`.
        negated: bool,
    },
    /// Null check (`IS NULL` / `IS NOT NULL`).
    IsNull {
        /// Operand under inspection.
        expr: Operand,
        /// True when representing `IS NOT NULL`.
        negated: bool,
    },
    /// Logical negation.
    Not(Box<Predicate>),
    /// Conjunction over multiple predicates.
    And(Vec<Predicate>),
    /// Disjunction over multiple predicates.
    Or(Vec<Predicate>),
}

impl PredicateNode {
    /// Returns true when the node has no child predicates.
    #[must_use]
    pub(crate) fn is_leaf(&self) -> bool {
        matches!(
            self,
            PredicateNode::True
                | PredicateNode::Compare { .. }
                | PredicateNode::InList { .. }
                | PredicateNode::IsNull { .. }
        )
    }
}

/// Logical predicate shared by filters, partition expressions, and pruning.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    kind: PredicateNode,
}

impl Default for Predicate {
    fn default() -> Self {
        Self::always_true()
    }
}

impl Predicate {
    /// Predicate matching every row.
    #[must_use]
    pub fn always_true() -> Self {
        Self::from_kind(PredicateNode::True)
    }

    /// Predicate matching no row.
    #[must_use]
    pub fn always_false() -> Self {
        Self::from_kind(PredicateNode::Not(Box::new(Self::always_true())))
    }

    /// Builds `column op value`.
    #[must_use]
    pub fn compare(column: ColumnRef, op: ComparisonOp, value: impl Into<ScalarValue>) -> Self {
        Self::from_kind(PredicateNode::Compare {
            left: Operand::Column(column),
            op,
            right: Operand::Literal(value.into()),
        })
    }

    /// Builds `column = value`.
    #[must_use]
    pub fn eq(column: ColumnRef, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::Equal, value)
    }

    /// Builds `column != value`.
    #[must_use]
    pub fn neq(column: ColumnRef, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::NotEqual, value)
    }

    /// Builds `column < value`.
    #[must_use]
    pub fn lt(column: ColumnRef, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::LessThan, value)
    }

    /// Builds `column <= value`.
    #[must_use]
    pub fn lte(column: ColumnRef, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::LessThanOrEqual, value)
    }

    /// Builds `column > value`.
    #[must_use]
    pub fn gt(column: ColumnRef, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::GreaterThan, value)
    }

    /// Builds `column >= value`.
    #[must_use]
    pub fn gte(column: ColumnRef, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::GreaterThanOrEqual, value)
    }

    /// Builds `column IN (values...)`.
    #[must_use]
    pub fn in_list<I, V>(column: ColumnRef, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        Self::from_kind(PredicateNode::InList {
            expr: Operand::Column(column),
            list: values.into_iter().map(Into::into).collect(),
            negated: false,
        })
    }

    /// Builds `column IS NULL`.
    #[must_use]
    pub fn is_null(column: ColumnRef) -> Self {
        Self::from_kind(PredicateNode::IsNull {
            expr: Operand::Column(column),
            negated: false,
        })
    }

    /// Builds `column IS NOT NULL`.
    #[must_use]
    pub fn is_not_null(column: ColumnRef) -> Self {
        Self::from_kind(PredicateNode::IsNull {
            expr: Operand::Column(column),
            negated: true,
        })
    }

    /// Builds `NOT predicate`.
    #[must_use]
    pub fn not(predicate: Predicate) -> Self {
        Self::from_kind(PredicateNode::Not(Box::new(predicate)))
    }

    /// Returns a reference to the underlying node.
    #[must_use]
    pub fn kind(&self) -> &PredicateNode {
        &self.kind
    }

    /// Builds a conjunction from the supplied clauses.
    ///
    /// Nested conjunctions are flattened and `true` clauses dropped; an empty
    /// clause list yields `true`.
    #[must_use]
    pub fn and<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let mut acc = Vec::new();
        for clause in clauses {
            match clause.into_kind() {
                PredicateNode::And(mut nested) => acc.append(&mut nested),
                PredicateNode::True => {}
                other => acc.push(Predicate::from_kind(other)),
            }
        }
        match acc.len() {
            0 => Self::always_true(),
            1 => acc.pop().unwrap_or_default(),
            _ => Self::from_kind(PredicateNode::And(acc)),
        }
    }

    /// Builds a disjunction from the supplied clauses.
    ///
    /// Nested disjunctions are flattened; a `true` clause makes the result `true`;
    /// an empty clause list yields `false`.
    #[must_use]
    pub fn or<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let mut acc = Vec::new();
        for clause in clauses {
            match clause.into_kind() {
                PredicateNode::Or(mut nested) => acc.append(&mut nested),
                PredicateNode::True => return Self::always_true(),
                other => acc.push(Predicate::from_kind(other)),
            }
        }
        match acc.len() {
            0 => Self::always_false(),
            1 => acc.pop().unwrap_or_default(),
            _ => Self::from_kind(PredicateNode::Or(acc)),
        }
    }

    /// Conjunction that drops clauses already present, preserving first-seen order.
    #[must_use]
    pub fn and_distinct<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let flattened = Self::and(clauses);
        match flattened.into_kind() {
            PredicateNode::And(children) => {
                let mut unique: Vec<Predicate> = Vec::with_capacity(children.len());
                for child in children {
                    if !unique.contains(&child) {
                        unique.push(child);
                    }
                }
                Self::and(unique)
            }
            other => Self::from_kind(other),
        }
    }

    /// Returns true for the literal `true` predicate.
    #[must_use]
    pub fn is_trivially_true(&self) -> bool {
        matches!(self.kind, PredicateNode::True)
    }

    /// Top-level conjuncts of this predicate.
    #[must_use]
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match &self.kind {
            PredicateNode::And(children) => children.iter().flat_map(Self::conjuncts).collect(),
            PredicateNode::True => Vec::new(),
            _ => vec![self],
        }
    }

    /// Applies simple simplification rules to reduce nesting.
    #[must_use]
    pub fn simplify(self) -> Self {
        match self.kind {
            PredicateNode::True
            | PredicateNode::Compare { .. }
            | PredicateNode::InList { .. }
            | PredicateNode::IsNull { .. } => self,
            PredicateNode::Not(inner) => {
                let simplified_child = inner.simplify();
                match simplified_child.into_kind() {
                    PredicateNode::Not(grandchild) => *grandchild,
                    other => Self::from_kind(PredicateNode::Not(Box::new(Self::from_kind(other)))),
                }
            }
            PredicateNode::And(clauses) => {
                Predicate::and(clauses.into_iter().map(Predicate::simplify))
            }
            PredicateNode::Or(clauses) => {
                Predicate::or(clauses.into_iter().map(Predicate::simplify))
            }
        }
    }

    /// Returns the logical negation of this predicate.
    #[must_use]
    pub fn negate(self) -> Self {
        let negated = match self.kind {
            PredicateNode::True
            | PredicateNode::Compare { .. }
            | PredicateNode::InList { .. }
            | PredicateNode::IsNull { .. } => Predicate::negate_leaf(self.into_kind()),
            PredicateNode::Not(inner) => *inner,
            PredicateNode::And(children) => {
                Predicate::or(children.into_iter().map(Predicate::negate))
            }
            PredicateNode::Or(children) => {
                Predicate::and(children.into_iter().map(Predicate::negate))
            }
        };
        negated.simplify()
    }

    /// Names of every column referenced by the predicate.
    #[must_use]
    pub fn referenced_columns(&self) -> BTreeSet<Arc<str>> {
        let mut out = BTreeSet::new();
        self.collect_columns(&mut out);
        out
    }

    /// Accepts a visitor that walks the predicate tree bottom-up.
    pub fn accept<V>(&self, visitor: &mut V) -> Result<VisitOutcome<V::Value>, V::Error>
    where
        V: PredicateVisitor + ?Sized,
    {
        visitor.visit_predicate(self)
    }

    pub(crate) fn from_kind(kind: PredicateNode) -> Self {
        Self { kind }
    }

    fn into_kind(self) -> PredicateNode {
        self.kind
    }

    fn collect_columns(&self, out: &mut BTreeSet<Arc<str>>) {
        let mut push = |operand: &Operand| {
            if let Operand::Column(column) = operand {
                out.insert(Arc::clone(&column.name));
            }
        };
        match &self.kind {
            PredicateNode::True => {}
            PredicateNode::Compare { left, right, .. } => {
                push(left);
                push(right);
            }
            PredicateNode::InList { expr, .. } | PredicateNode::IsNull { expr, .. } => push(expr),
            PredicateNode::Not(inner) => inner.collect_columns(out),
            PredicateNode::And(children) | PredicateNode::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
        }
    }

    fn negate_leaf(leaf: PredicateNode) -> Predicate {
        let negated = match leaf {
            PredicateNode::True => return Predicate::always_false(),
            PredicateNode::Compare { left, op, right } => PredicateNode::Compare {
                left,
                op: op.negated(),
                right,
            },
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => PredicateNode::InList {
                expr,
                list,
                negated: !negated,
            },
            PredicateNode::IsNull { expr, negated } => PredicateNode::IsNull {
                expr,
                negated: !negated,
            },
            other @ (PredicateNode::Not(_) | PredicateNode::And(_) | PredicateNode::Or(_)) => {
                return Predicate::not(Predicate::from_kind(other));
            }
        };
        Predicate::from_kind(negated)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PredicateNode::True => f.write_str("true"),
            PredicateNode::Compare { left, op, right } => write!(f, "({left} {op} {right})"),
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(ToString::to_string).collect();
                let not = if *negated { " NOT" } else { "" };
                write!(f, "({expr}{not} IN [{}])", items.join(", "))
            }
            PredicateNode::IsNull { expr, negated } => {
                let not = if *negated { " NOT" } else { "" };
                write!(f, "({expr} IS{not} NULL)")
            }
            PredicateNode::Not(inner) => write!(f, "NOT {inner}"),
            PredicateNode::And(children) | PredicateNode::Or(children) => {
                let sep = if matches!(self.kind, PredicateNode::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                let parts: Vec<String> = children.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(sep))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmp_predicate(op: ComparisonOp) -> Predicate {
        Predicate::compare(ColumnRef::new("a"), op, 1i64)
    }

    #[test]
    fn comparison_op_flipped_and_display() {
        assert_eq!(ComparisonOp::Equal.flipped(), ComparisonOp::Equal);
        assert_eq!(ComparisonOp::LessThan.flipped(), ComparisonOp::GreaterThan);
        assert_eq!(
            ComparisonOp::GreaterThanOrEqual.flipped(),
            ComparisonOp::LessThanOrEqual
        );
        assert_eq!(ComparisonOp::NotEqual.to_string(), "!=");
    }

    #[test]
    fn predicate_and_or_flattens_nested() {
        let a = cmp_predicate(ComparisonOp::Equal);
        let b = cmp_predicate(ComparisonOp::NotEqual);
        let nested = Predicate::from_kind(PredicateNode::And(vec![a.clone(), b.clone()]));
        let combined = Predicate::and([a.clone(), nested, b.clone()]);
        match combined.kind() {
            PredicateNode::And(clauses) => assert_eq!(clauses.len(), 4),
            other => panic!("expected And, got {other:?}"),
        }

        let nested_or = Predicate::from_kind(PredicateNode::Or(vec![a.clone(), b.clone()]));
        let combined_or = Predicate::or([a, nested_or, b]);
        match combined_or.kind() {
            PredicateNode::Or(clauses) => assert_eq!(clauses.len(), 4),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn and_drops_true_and_distinct_dedupes() {
        let state = Predicate::eq(ColumnRef::new("state"), "CA");
        let city = Predicate::eq(ColumnRef::new("city"), "Franklin");
        assert!(Predicate::and(Vec::new()).is_trivially_true());
        assert_eq!(
            Predicate::and([Predicate::always_true(), state.clone()]),
            state
        );

        let merged = Predicate::and_distinct([
            state.clone(),
            Predicate::and([state.clone(), city.clone()]),
        ]);
        assert_eq!(merged, Predicate::and([state, city]));
    }

    #[test]
    fn predicate_simplify_collapses_double_not() {
        let wrapped = Predicate::not(Predicate::not(Predicate::always_true()));
        assert_eq!(wrapped.simplify().kind(), &PredicateNode::True);
    }

    #[test]
    fn predicate_negate_leaf_variants() {
        let negated = cmp_predicate(ComparisonOp::Equal).negate();
        match negated.kind() {
            PredicateNode::Compare { op, .. } => assert_eq!(*op, ComparisonOp::NotEqual),
            other => panic!("expected Compare, got {other:?}"),
        }

        let toggled = Predicate::in_list(ColumnRef::new("b"), [1i64]).negate();
        match toggled.kind() {
            PredicateNode::InList { negated, .. } => assert!(*negated),
            other => panic!("expected InList, got {other:?}"),
        }

        let not_null = Predicate::is_null(ColumnRef::new("c")).negate();
        assert_eq!(not_null, Predicate::is_not_null(ColumnRef::new("c")));
    }

    #[test]
    fn referenced_columns_and_display() {
        let predicate = Predicate::and([
            Predicate::eq(ColumnRef::new("state"), "NY"),
            Predicate::or([
                Predicate::gt(ColumnRef::new("pop"), 10i64),
                Predicate::is_null(ColumnRef::new("pop")),
            ]),
        ]);
        let columns: Vec<String> = predicate
            .referenced_columns()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(columns, vec!["pop".to_string(), "state".to_string()]);
        assert_eq!(
            predicate.to_string(),
            "((state = \"NY\") AND ((pop > 10) OR (pop IS NULL)))"
        );
    }
}
