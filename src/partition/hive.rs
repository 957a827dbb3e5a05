use arrow::datatypes::SchemaRef;

use super::{segment_text, Partitioning};
use crate::{
    error::{DatasetError, Result},
    expr::{ColumnRef, Predicate, ScalarValue},
};

/// Segment value standing for a null partition value.
pub const HIVE_NULL_FALLBACK: &str = "__HIVE_DEFAULT_PARTITION__";

/// Self-describing `key=value` partitioning.
///
/// Segment position does not matter; unknown keys and undecodable values are
/// ignored.
#[derive(Clone, Debug)]
pub struct HivePartitioning {
    schema: SchemaRef,
    null_fallback: String,
}

impl HivePartitioning {
    /// Partitioning over the columns of `schema`.
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            null_fallback: HIVE_NULL_FALLBACK.to_string(),
        }
    }

    /// Overrides the segment value used for nulls.
    #[must_use]
    pub fn with_null_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.null_fallback = fallback.into();
        self
    }
}

impl Partitioning for HivePartitioning {
    fn type_name(&self) -> &'static str {
        "hive"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse_segment(&self, _depth: usize, segment: &str) -> Option<Predicate> {
        let (key, text) = segment.split_once('=')?;
        let (_, field) = self.schema.column_with_name(key)?;
        let column = ColumnRef::new(field.name().as_str());
        if text == self.null_fallback {
            return Some(Predicate::is_null(column));
        }
        let value = ScalarValue::parse_as(text, field.data_type())?;
        Some(Predicate::eq(column, value))
    }

    fn format(&self, values: &[ScalarValue]) -> Result<String> {
        if values.len() != self.schema.fields().len() {
            return Err(DatasetError::invalid_argument(format!(
                "hive partitioning expects {} values, got {}",
                self.schema.fields().len(),
                values.len()
            )));
        }
        let segments = self
            .schema
            .fields()
            .iter()
            .zip(values)
            .map(|(field, value)| {
                let text = if value.is_null() {
                    self.null_fallback.clone()
                } else {
                    segment_text(field.name(), value)?
                };
                Ok(format!("{}={text}", field.name()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn partitioning() -> HivePartitioning {
        HivePartitioning::new(Arc::new(Schema::new(vec![
            Field::new("alpha", DataType::Int32, true),
            Field::new("beta", DataType::Utf8, true),
        ])))
    }

    #[test]
    fn key_value_segments() {
        let partitioning = partitioning();
        assert_eq!(
            partitioning.parse_segment(3, "beta=x"),
            Some(Predicate::eq(ColumnRef::new("beta"), "x"))
        );
        assert_eq!(
            partitioning.parse_segment(0, "alpha=__HIVE_DEFAULT_PARTITION__"),
            Some(Predicate::is_null(ColumnRef::new("alpha")))
        );
        assert_eq!(partitioning.parse_segment(0, "gamma=1"), None);
        assert_eq!(partitioning.parse_segment(0, "alpha=abc"), None);
        assert_eq!(partitioning.parse_segment(0, "alpha"), None);
    }

    #[test]
    fn format_round_trips_through_parse() {
        let partitioning = partitioning();
        let path = partitioning
            .format(&[ScalarValue::Null, ScalarValue::from("x")])
            .unwrap();
        assert_eq!(path, "alpha=__HIVE_DEFAULT_PARTITION__/beta=x");
        assert_eq!(
            partitioning.parse(&format!("{path}/0.arrow")),
            Predicate::and([
                Predicate::is_null(ColumnRef::new("alpha")),
                Predicate::eq(ColumnRef::new("beta"), "x"),
            ])
        );
    }

    #[test]
    fn custom_null_fallback() {
        let partitioning = partitioning().with_null_fallback("NULL");
        assert_eq!(
            partitioning.format(&[ScalarValue::Int64(3), ScalarValue::Null]).unwrap(),
            "alpha=3/beta=NULL"
        );
    }
}
