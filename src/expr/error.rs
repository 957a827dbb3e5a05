use arrow::datatypes::DataType;
use thiserror::Error;

/// Failure binding a predicate against a schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// Referenced column does not exist in the schema.
    #[error("Unknown column: {0}")]
    UnknownColumn(String),
    /// Literal cannot be compared with the column's type.
    #[error("Type mismatch for column '{column}': cannot compare {literal} with {actual:?}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Rendered literal.
        literal: String,
        /// Column type in the schema.
        actual: DataType,
    },
    /// Operator has no kernel for the column type.
    #[error("Unsupported operator {op} for column '{column}' of type {data_type:?}")]
    UnsupportedOperator {
        /// Column name.
        column: String,
        /// Column type in the schema.
        data_type: DataType,
        /// Operator text.
        op: &'static str,
    },
    /// Operator received the wrong number of operands.
    #[error("Invalid arity for {op}: expected {expected}, got {got}")]
    InvalidArity {
        /// Operator text.
        op: &'static str,
        /// Expected operand shape.
        expected: &'static str,
        /// Operands supplied.
        got: usize,
    },
}
