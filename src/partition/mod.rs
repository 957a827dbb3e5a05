//! Mapping between directory segments and partition predicates.
//!
//! A [`Partitioning`] decodes path segments into predicates over partition
//! columns and encodes partition values back into segments for the writer.
//! The [`tree`] module builds the pruning hierarchy from a file listing.

mod directory;
mod hive;
pub mod tree;

use std::{collections::HashMap, fmt, sync::Arc};

use arrow::{
    array::{ArrayRef, RecordBatch, UInt32Array},
    compute::take_record_batch,
    datatypes::{Schema, SchemaRef},
    row::{RowConverter, SortField},
};

pub use self::{
    directory::DirectoryPartitioning,
    hive::{HivePartitioning, HIVE_NULL_FALLBACK},
    tree::PartitionTree,
};
use crate::{
    error::{DatasetError, Result},
    expr::{ColumnRef, Predicate, ScalarValue},
    fs::relative_segments,
    schema::without_fields,
};

/// Bidirectional mapping between path segments and partition predicates.
pub trait Partitioning: fmt::Debug + Send + Sync + 'static {
    /// Short identifier used in logs.
    fn type_name(&self) -> &'static str;

    /// Partition columns, in segment order.
    fn schema(&self) -> &SchemaRef;

    /// Predicate implied by the directory `segment` found at `depth` below the
    /// partition base. Returns `None` when the segment carries no partition
    /// information or fails to parse.
    fn parse_segment(&self, depth: usize, segment: &str) -> Option<Predicate>;

    /// Encodes one value per partition column into a relative directory path.
    fn format(&self, values: &[ScalarValue]) -> Result<String>;

    /// Conjunction of the predicates implied by every directory of `path`.
    ///
    /// The final segment is treated as the file name and ignored.
    fn parse(&self, path: &str) -> Predicate {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let directories = segments.len().saturating_sub(1);
        Predicate::and_distinct(
            segments[..directories]
                .iter()
                .enumerate()
                .filter_map(|(depth, segment)| self.parse_segment(depth, segment)),
        )
    }
}

/// Partitioning over zero columns: every row lands in the base directory.
pub fn no_partitioning() -> Arc<dyn Partitioning> {
    Arc::new(DirectoryPartitioning::new(Arc::new(Schema::empty())))
}

/// Partition predicate for `path` relative to `base_dir`.
///
/// Paths outside `base_dir` carry no partition information.
pub fn parse_relative(partitioning: &dyn Partitioning, base_dir: &str, path: &str) -> Predicate {
    match relative_segments(base_dir, path) {
        Some(segments) => partitioning.parse(&segments.join("/")),
        None => Predicate::always_true(),
    }
}

/// Partition values of one group of rows plus the directory they map to.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionKey {
    /// One value per partition column.
    pub values: Vec<ScalarValue>,
    /// Relative directory produced by [`Partitioning::format`].
    pub path: String,
}

impl PartitionKey {
    /// Predicate pinning each partition column to its value.
    pub fn to_predicate(&self, schema: &Schema) -> Predicate {
        Predicate::and(
            schema
                .fields()
                .iter()
                .zip(&self.values)
                .map(|(field, value)| {
                    let column = ColumnRef::new(field.name().as_str());
                    if value.is_null() {
                        Predicate::is_null(column)
                    } else {
                        Predicate::eq(column, value.clone())
                    }
                }),
        )
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.path)
        }
    }
}

/// Splits `batch` into one sub-batch per distinct partition key.
///
/// Keys appear in the order their first row appears; rows keep their relative
/// order within a key. Partition columns are removed from the sub-batches.
pub fn split_batch(
    partitioning: &dyn Partitioning,
    batch: &RecordBatch,
) -> Result<Vec<(PartitionKey, RecordBatch)>> {
    let partition_schema = partitioning.schema();
    let names: Vec<&str> = partition_schema
        .fields()
        .iter()
        .map(|field| field.name().as_str())
        .collect();
    let data_schema = without_fields(batch.schema().as_ref(), &names);
    let data_indices: Vec<usize> = data_schema
        .fields()
        .iter()
        .filter_map(|field| batch.schema().index_of(field.name()).ok())
        .collect();
    let data = batch.project(&data_indices)?;

    if batch.num_rows() == 0 {
        return Ok(Vec::new());
    }
    if names.is_empty() {
        let key = PartitionKey {
            values: Vec::new(),
            path: partitioning.format(&[])?,
        };
        return Ok(vec![(key, data)]);
    }

    let mut key_columns: Vec<ArrayRef> = Vec::with_capacity(names.len());
    for field in partition_schema.fields() {
        let column = batch.column_by_name(field.name()).ok_or_else(|| {
            DatasetError::schema_mismatch(format!(
                "batch lacks partition column `{}`",
                field.name()
            ))
        })?;
        key_columns.push(column.clone());
    }
    let converter = RowConverter::new(
        key_columns
            .iter()
            .map(|column| SortField::new(column.data_type().clone()))
            .collect(),
    )?;
    let rows = converter.convert_columns(&key_columns)?;

    let mut slots = HashMap::new();
    let mut groups: Vec<(usize, Vec<u32>)> = Vec::new();
    for (row, encoded) in rows.iter().enumerate() {
        let slot = *slots.entry(encoded.owned()).or_insert_with(|| {
            groups.push((row, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row as u32);
    }

    groups
        .into_iter()
        .map(|(first_row, indices)| {
            let values = key_columns
                .iter()
                .zip(partition_schema.fields())
                .map(|(column, field)| {
                    ScalarValue::try_from_array(column.as_ref(), first_row).ok_or_else(|| {
                        DatasetError::invalid_partition_value(
                            field.name(),
                            format!("type {} cannot be encoded in a path", field.data_type()),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let path = partitioning.format(&values)?;
            let rows = take_record_batch(&data, &UInt32Array::from(indices))?;
            Ok((PartitionKey { values, path }, rows))
        })
        .collect()
}

/// Validates a value before it is encoded into a path segment.
pub(crate) fn segment_text(field: &str, value: &ScalarValue) -> Result<String> {
    let text = value.to_path_text().ok_or_else(|| {
        DatasetError::invalid_partition_value(field, format!("{value} has no path encoding"))
    })?;
    if text.is_empty() {
        return Err(DatasetError::invalid_partition_value(
            field,
            "empty strings cannot be encoded in a path",
        ));
    }
    if text.contains('/') {
        return Err(DatasetError::invalid_partition_value(
            field,
            format!("`{text}` contains a path separator"),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use arrow::{
        array::{Int32Array, StringArray},
        datatypes::{DataType, Field},
    };

    use super::*;
    use crate::error::ErrorKind;

    fn region_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("region", DataType::Utf8, true)]))
    }

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("region", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![0, 1, 2, 3, 4])),
                Arc::new(StringArray::from(vec!["b", "a", "b", "a", "b"])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn split_is_stable_and_drops_partition_columns() {
        let partitioning = HivePartitioning::new(region_schema());
        let groups = split_batch(&partitioning, &batch()).unwrap();

        let paths: Vec<_> = groups.iter().map(|(key, _)| key.path.as_str()).collect();
        assert_eq!(paths, vec!["region=b", "region=a"]);

        let (_, first) = &groups[0];
        assert_eq!(first.num_columns(), 1);
        let ids = first
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(ids.values(), &[0, 2, 4]);

        let (key, second) = &groups[1];
        assert_eq!(key.values, vec![ScalarValue::from("a")]);
        assert_eq!(second.num_rows(), 2);
    }

    #[test]
    fn empty_partitioning_keeps_one_group() {
        let groups = split_batch(no_partitioning().as_ref(), &batch()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0.path, "");
        assert_eq!(groups[0].1.num_columns(), 2);
    }

    #[test]
    fn missing_partition_column_is_rejected() {
        let partitioning = DirectoryPartitioning::new(Arc::new(Schema::new(vec![Field::new(
            "country",
            DataType::Utf8,
            false,
        )])));
        let err = split_batch(&partitioning, &batch()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    }

    #[test]
    fn relative_parse_ignores_base_and_file_name() {
        let partitioning = DirectoryPartitioning::new(Arc::new(Schema::new(vec![
            Field::new("state", DataType::Utf8, false),
            Field::new("city", DataType::Utf8, false),
        ])));
        let predicate = parse_relative(&partitioning, "data", "data/NY/Franklin/0.parquet");
        let expected = Predicate::and([
            Predicate::eq(ColumnRef::new("state"), "NY"),
            Predicate::eq(ColumnRef::new("city"), "Franklin"),
        ]);
        assert_eq!(predicate, expected);
        assert!(parse_relative(&partitioning, "other", "data/NY/x").is_trivially_true());
    }

    #[test]
    fn keys_render_as_predicates() {
        let key = PartitionKey {
            values: vec![ScalarValue::Null],
            path: "region=__HIVE_DEFAULT_PARTITION__".into(),
        };
        assert_eq!(
            key.to_predicate(&region_schema()),
            Predicate::is_null(ColumnRef::new("region"))
        );
    }
}
