use arrow::datatypes::SchemaRef;

use super::{segment_text, Partitioning};
use crate::{
    error::{DatasetError, Result},
    expr::{ColumnRef, Predicate, ScalarValue},
};

/// Positional partitioning: the n-th directory holds the n-th partition column.
///
/// `/2009/11` with schema `(year: int16, month: int8)` decodes to
/// `year = 2009 AND month = 11`.
#[derive(Clone, Debug)]
pub struct DirectoryPartitioning {
    schema: SchemaRef,
}

impl DirectoryPartitioning {
    /// Partitioning whose columns appear in `schema` order.
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }
}

impl Partitioning for DirectoryPartitioning {
    fn type_name(&self) -> &'static str {
        "directory"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse_segment(&self, depth: usize, segment: &str) -> Option<Predicate> {
        let field = self.schema.fields().get(depth)?;
        let value = ScalarValue::parse_as(segment, field.data_type())?;
        Some(Predicate::eq(ColumnRef::new(field.name().as_str()), value))
    }

    fn format(&self, values: &[ScalarValue]) -> Result<String> {
        if values.len() != self.schema.fields().len() {
            return Err(DatasetError::invalid_argument(format!(
                "directory partitioning expects {} values, got {}",
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
                if value.is_null() {
                    return Err(DatasetError::invalid_partition_value(
                        field.name(),
                        "directory partitioning cannot encode null",
                    ));
                }
                segment_text(field.name(), value)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(segments.join("/"))
    }
}
