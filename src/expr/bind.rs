use arrow::datatypes::{DataType, Schema};

use super::{ColumnRef, ComparisonOp, Operand, Predicate, PredicateNode, ResolveError, ScalarValue};

impl Predicate {
    /// Resolves every column reference against `schema` and type-checks literals.
    ///
    /// Returns a copy of the predicate with column ordinals filled in.
    pub fn bind(&self, schema: &Schema) -> Result<Predicate, ResolveError> {
        let kind = match self.kind() {
            PredicateNode::True => PredicateNode::True,
            PredicateNode::Compare { left, op, right } => {
                let left = bind_operand(left, schema)?;
                let right = bind_operand(right, schema)?;
                check_compare(&left, *op, &right, schema)?;
                PredicateNode::Compare {
                    left,
                    op: *op,
                    right,
                }
            }
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => {
                let expr = bind_operand(expr, schema)?;
                if list.is_empty() {
                    return Err(ResolveError::InvalidArity {
                        op: "IN",
                        expected: "at least one literal",
                        got: 0,
                    });
                }
                if let Operand::Column(column) = &expr {
                    let data_type = column_type(column, schema)?;
                    for literal in list {
                        check_literal(column, literal, data_type)?;
                    }
                }
                PredicateNode::InList {
                    expr,
                    list: list.clone(),
                    negated: *negated,
                }
            }
            PredicateNode::IsNull { expr, negated } => PredicateNode::IsNull {
                expr: bind_operand(expr, schema)?,
                negated: *negated,
            },
            PredicateNode::Not(inner) => PredicateNode::Not(Box::new(inner.bind(schema)?)),
            PredicateNode::And(children) => PredicateNode::And(
                children
                    .iter()
                    .map(|child| child.bind(schema))
                    .collect::<Result<_, _>>()?,
            ),
            PredicateNode::Or(children) => PredicateNode::Or(
                children
                    .iter()
                    .map(|child| child.bind(schema))
                    .collect::<Result<_, _>>()?,
            ),
        };
        Ok(Predicate::from_kind(kind))
    }

    /// Returns true when every column reference carries a resolved ordinal.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        let operand_bound = |operand: &Operand| match operand {
            Operand::Column(column) => column.index.is_some(),
            Operand::Literal(_) => true,
        };
        match self.kind() {
            PredicateNode::True => true,
            PredicateNode::Compare { left, right, .. } => {
                operand_bound(left) && operand_bound(right)
            }
            PredicateNode::InList { expr, .. } | PredicateNode::IsNull { expr, .. } => {
                operand_bound(expr)
            }
            PredicateNode::Not(inner) => inner.is_bound(),
            PredicateNode::And(children) | PredicateNode::Or(children) => {
                children.iter().all(Predicate::is_bound)
            }
        }
    }
}

fn bind_operand(operand: &Operand, schema: &Schema) -> Result<Operand, ResolveError> {
    match operand {
        Operand::Column(column) => {
            let index = schema
                .index_of(&column.name)
                .map_err(|_| ResolveError::UnknownColumn(column.name.to_string()))?;
            Ok(Operand::Column(ColumnRef {
                name: column.name.clone(),
                index: Some(index),
            }))
        }
        Operand::Literal(value) => Ok(Operand::Literal(value.clone())),
    }
}

fn column_type<'a>(column: &ColumnRef, schema: &'a Schema) -> Result<&'a DataType, ResolveError> {
    schema
        .field_with_name(&column.name)
        .map(|field| field.data_type())
        .map_err(|_| ResolveError::UnknownColumn(column.name.to_string()))
}

fn check_literal(
    column: &ColumnRef,
    literal: &ScalarValue,
    data_type: &DataType,
) -> Result<(), ResolveError> {
    if literal.is_comparable_with(data_type) {
        Ok(())
    } else {
        Err(ResolveError::TypeMismatch {
            column: column.name.to_string(),
            literal: literal.to_string(),
            actual: data_type.clone(),
        })
    }
}

fn check_compare(
    left: &Operand,
    op: ComparisonOp,
    right: &Operand,
    schema: &Schema,
) -> Result<(), ResolveError> {
    match (left, right) {
        (Operand::Column(column), Operand::Literal(literal))
        | (Operand::Literal(literal), Operand::Column(column)) => {
            let data_type = column_type(column, schema)?;
            ensure_orderable(column, data_type, op)?;
            check_literal(column, literal, data_type)
        }
        (Operand::Column(lhs), Operand::Column(rhs)) => {
            let lhs_type = column_type(lhs, schema)?;
            let rhs_type = column_type(rhs, schema)?;
            ensure_orderable(lhs, lhs_type, op)?;
            let compatible =
                lhs_type == rhs_type || (lhs_type.is_numeric() && rhs_type.is_numeric());
            if compatible {
                Ok(())
            } else {
                Err(ResolveError::TypeMismatch {
                    column: lhs.name.to_string(),
                    literal: rhs.name.to_string(),
                    actual: lhs_type.clone(),
                })
            }
        }
        (Operand::Literal(_), Operand::Literal(_)) => Ok(()),
    }
}

fn ensure_orderable(
    column: &ColumnRef,
    data_type: &DataType,
    op: ComparisonOp,
) -> Result<(), ResolveError> {
    if data_type.is_nested() {
        return Err(ResolveError::UnsupportedOperator {
            column: column.name.to_string(),
            data_type: data_type.clone(),
            op: op.as_str(),
        });
    }
    Ok(())
}
