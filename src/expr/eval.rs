use std::cmp::Ordering;

use arrow::{
    array::{Array, ArrayRef, BooleanArray, Datum, RecordBatch, Scalar},
    compute::{
        and_kleene, cast, is_not_null, is_null,
        kernels::cmp::{eq, gt, gt_eq, lt, lt_eq, neq},
        not, or_kleene,
    },
    datatypes::DataType,
    error::ArrowError,
};

use super::{
    ComparisonOp, Operand, Predicate, PredicateNode, PredicateVisitor, ScalarValue, VisitOutcome,
};
use crate::error::{DatasetError, Result};

/// Evaluates `predicate` against every row of `batch`.
///
/// Rows where the predicate is unknown (null comparisons) come back as nulls;
/// filter kernels treat them as non-matching.
pub fn evaluate(predicate: &Predicate, batch: &RecordBatch) -> Result<BooleanArray> {
    let mut evaluator = BatchEvaluator { batch };
    let outcome = predicate.accept(&mut evaluator)?;
    outcome
        .value
        .ok_or_else(|| DatasetError::not_supported(format!("cannot evaluate {predicate}")))
}

/// Filters `batch` down to the rows where `predicate` is true.
pub(crate) fn filter_batch(predicate: &Predicate, batch: &RecordBatch) -> Result<RecordBatch> {
    if predicate.is_trivially_true() {
        return Ok(batch.clone());
    }
    let mask = evaluate(predicate, batch)?;
    Ok(arrow::compute::filter_record_batch(batch, &mask)?)
}

enum Resolved {
    Array(ArrayRef),
    Literal(ScalarValue),
}

struct BatchEvaluator<'a> {
    batch: &'a RecordBatch,
}

impl BatchEvaluator<'_> {
    fn rows(&self) -> usize {
        self.batch.num_rows()
    }

    fn resolve(&self, operand: &Operand) -> Result<Resolved> {
        match operand {
            Operand::Literal(value) => Ok(Resolved::Literal(value.clone())),
            Operand::Column(column) => {
                let schema = self.batch.schema();
                let index = match column.index {
                    Some(index)
                        if schema
                            .fields()
                            .get(index)
                            .is_some_and(|field| field.name().as_str() == &*column.name) =>
                    {
                        index
                    }
                    _ => schema.index_of(&column.name).map_err(|_| {
                        DatasetError::Type(super::ResolveError::UnknownColumn(
                            column.name.to_string(),
                        ))
                    })?,
                };
                Ok(Resolved::Array(self.batch.column(index).clone()))
            }
        }
    }

    fn constant(&self, value: Option<bool>) -> BooleanArray {
        match value {
            Some(value) => BooleanArray::from(vec![value; self.rows()]),
            None => BooleanArray::new_null(self.rows()),
        }
    }

    fn compare(&self, left: &Operand, op: ComparisonOp, right: &Operand) -> Result<BooleanArray> {
        match (self.resolve(left)?, self.resolve(right)?) {
            (Resolved::Literal(lhs), Resolved::Literal(rhs)) => {
                Ok(self.constant(lhs.compare(&rhs).map(|ord| op.test_ordering(ord))))
            }
            (Resolved::Array(array), Resolved::Literal(literal)) => {
                self.compare_literal(&array, op, &literal)
            }
            (Resolved::Literal(literal), Resolved::Array(array)) => {
                self.compare_literal(&array, op.flipped(), &literal)
            }
            (Resolved::Array(lhs), Resolved::Array(rhs)) => {
                let (lhs, rhs) = if lhs.data_type() == rhs.data_type() {
                    (lhs, rhs)
                } else {
                    (
                        cast(&lhs, &DataType::Float64)?,
                        cast(&rhs, &DataType::Float64)?,
                    )
                };
                Ok(apply_cmp(op, &lhs, &rhs)?)
            }
        }
    }

    fn compare_literal(
        &self,
        array: &ArrayRef,
        op: ComparisonOp,
        literal: &ScalarValue,
    ) -> Result<BooleanArray> {
        if literal.is_null() {
            return Ok(self.constant(None));
        }
        let target = comparison_type(array.data_type(), literal);
        let array = if array.data_type() == &target {
            array.clone()
        } else {
            cast(array, &target)?
        };
        let scalar = Scalar::new(literal.to_array(&target, 1)?);
        Ok(apply_cmp(op, &array, &scalar)?)
    }

    fn in_list(&self, expr: &Operand, list: &[ScalarValue], negated: bool) -> Result<BooleanArray> {
        let mut acc = self.constant(Some(false));
        for literal in list {
            let matched = match self.resolve(expr)? {
                Resolved::Array(array) => {
                    self.compare_literal(&array, ComparisonOp::Equal, literal)?
                }
                Resolved::Literal(value) => self.constant(
                    value
                        .compare(literal)
                        .map(|ord| ord == Ordering::Equal),
                ),
            };
            acc = or_kleene(&acc, &matched)?;
        }
        if negated {
            Ok(not(&acc)?)
        } else {
            Ok(acc)
        }
    }

    fn null_check(&self, expr: &Operand, negated: bool) -> Result<BooleanArray> {
        match self.resolve(expr)? {
            Resolved::Array(array) if negated => Ok(is_not_null(&array)?),
            Resolved::Array(array) => Ok(is_null(&array)?),
            Resolved::Literal(value) => Ok(self.constant(Some(value.is_null() != negated))),
        }
    }
}

impl PredicateVisitor for BatchEvaluator<'_> {
    type Error = DatasetError;
    type Value = BooleanArray;

    fn visit_leaf(&mut self, leaf: &PredicateNode) -> Result<VisitOutcome<BooleanArray>> {
        let mask = match leaf {
            PredicateNode::True => self.constant(Some(true)),
            PredicateNode::Compare { left, op, right } => self.compare(left, *op, right)?,
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => self.in_list(expr, list, *negated)?,
            PredicateNode::IsNull { expr, negated } => self.null_check(expr, *negated)?,
            PredicateNode::Not(_) | PredicateNode::And(_) | PredicateNode::Or(_) => {
                return Err(DatasetError::not_supported("branch node passed as leaf"))
            }
        };
        Ok(VisitOutcome::value(mask))
    }

    fn combine_not(
        &mut self,
        original: &Predicate,
        child: VisitOutcome<BooleanArray>,
    ) -> Result<VisitOutcome<BooleanArray>> {
        let value = child
            .value
            .ok_or_else(|| DatasetError::not_supported(format!("cannot evaluate {original}")))?;
        Ok(VisitOutcome::value(not(&value)?))
    }

    fn combine_and(
        &mut self,
        original: &Predicate,
        children: Vec<VisitOutcome<BooleanArray>>,
    ) -> Result<VisitOutcome<BooleanArray>> {
        fold(self.constant(Some(true)), original, children, and_kleene)
    }

    fn combine_or(
        &mut self,
        original: &Predicate,
        children: Vec<VisitOutcome<BooleanArray>>,
    ) -> Result<VisitOutcome<BooleanArray>> {
        fold(self.constant(Some(false)), original, children, or_kleene)
    }
}

fn fold(
    init: BooleanArray,
    original: &Predicate,
    children: Vec<VisitOutcome<BooleanArray>>,
    kernel: fn(&BooleanArray, &BooleanArray) -> std::result::Result<BooleanArray, ArrowError>,
) -> Result<VisitOutcome<BooleanArray>> {
    let mut acc = init;
    for child in children {
        let value = child
            .value
            .ok_or_else(|| DatasetError::not_supported(format!("cannot evaluate {original}")))?;
        acc = kernel(&acc, &value)?;
    }
    Ok(VisitOutcome::value(acc))
}

fn apply_cmp(
    op: ComparisonOp,
    lhs: &dyn Datum,
    rhs: &dyn Datum,
) -> std::result::Result<BooleanArray, ArrowError> {
    match op {
        ComparisonOp::Equal => eq(lhs, rhs),
        ComparisonOp::NotEqual => neq(lhs, rhs),
        ComparisonOp::LessThan => lt(lhs, rhs),
        ComparisonOp::LessThanOrEqual => lt_eq(lhs, rhs),
        ComparisonOp::GreaterThan => gt(lhs, rhs),
        ComparisonOp::GreaterThanOrEqual => gt_eq(lhs, rhs),
    }
}

/// Common type a column and a literal are compared in.
fn comparison_type(column: &DataType, literal: &ScalarValue) -> DataType {
    let signed = matches!(
        column,
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
    );
    let unsigned = matches!(
        column,
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64
    );
    match literal {
        ScalarValue::Int64(_) if signed => DataType::Int64,
        ScalarValue::UInt64(_) if unsigned => DataType::UInt64,
        ScalarValue::Int64(_) | ScalarValue::UInt64(_) | ScalarValue::Float64(_)
            if column.is_numeric() =>
        {
            DataType::Float64
        }
        _ => column.clone(),
    }
}
