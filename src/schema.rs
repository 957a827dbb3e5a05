//! Schema compatibility checks and batch conformance.

use std::{collections::BTreeMap, sync::Arc};

use arrow::{
    array::{new_null_array, ArrayRef, RecordBatch, RecordBatchOptions},
    datatypes::{Field, Schema, SchemaRef},
};

use crate::{
    error::{DatasetError, Result},
    expr::{ResolveError, ScalarValue},
};

/// Checks that batches of schema `from` can be projected onto `to`.
///
/// Every field of `to` sharing a name with a field of `from` must keep its type,
/// and must stay nullable when the source field is nullable. Fields of `to` that
/// `from` lacks are materialized as nulls and therefore must be nullable.
pub fn check_projectable(from: &Schema, to: &Schema) -> Result<()> {
    for field in to.fields() {
        match from.field_with_name(field.name()) {
            Ok(source) => {
                if source.data_type() != field.data_type() {
                    return Err(DatasetError::schema_mismatch(format!(
                        "field `{}` changes type from {} to {}",
                        field.name(),
                        source.data_type(),
                        field.data_type()
                    )));
                }
                if source.is_nullable() && !field.is_nullable() {
                    return Err(DatasetError::schema_mismatch(format!(
                        "field `{}` narrows from nullable to non-nullable",
                        field.name()
                    )));
                }
            }
            Err(_) if !field.is_nullable() => {
                return Err(DatasetError::schema_mismatch(format!(
                    "added field `{}` must be nullable",
                    field.name()
                )));
            }
            Err(_) => {}
        }
    }
    Ok(())
}

/// Scan-time variant of [`check_projectable`] for a fragment's physical schema.
///
/// Fields pinned by the fragment's partition expression may be absent and
/// non-nullable. Failures are reported as physical drift.
pub(crate) fn check_physical(
    fragment: &str,
    physical: &Schema,
    dataset: &Schema,
    known: &BTreeMap<Arc<str>, ScalarValue>,
) -> Result<()> {
    let relaxed: Vec<Field> = dataset
        .fields()
        .iter()
        .map(|field| {
            let pinned = physical.field_with_name(field.name()).is_err()
                && known
                    .get(field.name().as_str())
                    .is_some_and(|value| !value.is_null());
            if pinned {
                field.as_ref().clone().with_nullable(true)
            } else {
                field.as_ref().clone()
            }
        })
        .collect();
    check_projectable(physical, &Schema::new(relaxed)).map_err(|err| {
        DatasetError::PhysicalSchemaDrift {
            fragment: fragment.to_string(),
            reason: match err {
                DatasetError::SchemaMismatch(reason) => reason,
                other => other.to_string(),
            },
        }
    })
}

/// Reshapes `batch` to `target`, materializing absent fields.
///
/// Absent fields become constants when `known` pins them, nulls otherwise.
pub(crate) fn conform_batch(
    batch: &RecordBatch,
    target: &SchemaRef,
    known: &BTreeMap<Arc<str>, ScalarValue>,
) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(target.fields().len());
    for field in target.fields() {
        let column = match batch.column_by_name(field.name()) {
            Some(column) => column.clone(),
            None => match known.get(field.name().as_str()) {
                Some(value) => value.to_array(field.data_type(), rows)?,
                None => new_null_array(field.data_type(), rows),
            },
        };
        columns.push(column);
    }
    let options = RecordBatchOptions::new().with_row_count(Some(rows));
    Ok(RecordBatch::try_new_with_options(
        target.clone(),
        columns,
        &options,
    )?)
}

/// Resolves projected column names into a schema in the requested order.
pub(crate) fn project_schema(schema: &SchemaRef, names: &[String]) -> Result<SchemaRef> {
    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        let index = schema
            .index_of(name)
            .map_err(|_| ResolveError::UnknownColumn(name.clone()))?;
        indices.push(index);
    }
    Ok(Arc::new(schema.project(&indices)?))
}

/// Selects the columns of `projected` from `batch`, which must contain them all.
pub(crate) fn select_columns(batch: &RecordBatch, projected: &SchemaRef) -> Result<RecordBatch> {
    if batch.schema().as_ref() == projected.as_ref() {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let mut indices = Vec::with_capacity(projected.fields().len());
    for field in projected.fields() {
        indices.push(schema.index_of(field.name())?);
    }
    Ok(batch.project(&indices)?)
}

/// Removes the named fields from `schema`.
pub(crate) fn without_fields(schema: &Schema, names: &[&str]) -> SchemaRef {
    let fields: Vec<_> = schema
        .fields()
        .iter()
        .filter(|field| !names.contains(&field.name().as_str()))
        .cloned()
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

/// Merges schemas field by field, failing on conflicting types.
pub fn unify_schemas<I>(schemas: I) -> Result<Schema>
where
    I: IntoIterator<Item = SchemaRef>,
{
    let owned = schemas
        .into_iter()
        .map(Arc::unwrap_or_clone)
        .collect::<Vec<_>>();
    Schema::try_merge(owned).map_err(|err| DatasetError::schema_mismatch(err.to_string()))
}

#[cfg(test)]
mod tests {
    use arrow::{
        array::{Int32Array, StringArray},
        datatypes::DataType,
    };

    use super::*;
    use crate::error::ErrorKind;

    fn base() -> Schema {
        Schema::new(vec![
            Field::new("i32", DataType::Int32, true),
            Field::new("f64", DataType::Float64, true),
        ])
    }

    #[test]
    fn projectable_rules() {
        let drop = Schema::new(vec![Field::new("i32", DataType::Int32, true)]);
        assert!(check_projectable(&base(), &drop).is_ok());

        let add_nullable = Schema::new(vec![Field::new("str", DataType::Utf8, true)]);
        assert!(check_projectable(&base(), &add_nullable).is_ok());

        let retype = Schema::new(vec![Field::new("i32", DataType::Utf8, true)]);
        let err = check_projectable(&base(), &retype).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

        let narrow = Schema::new(vec![Field::new("f64", DataType::Float64, false)]);
        assert!(check_projectable(&base(), &narrow).is_err());

        let add_required = Schema::new(vec![Field::new("str", DataType::Utf8, false)]);
        assert!(check_projectable(&base(), &add_required).is_err());
    }

    #[test]
    fn physical_check_allows_pinned_partition_fields() {
        let physical = Schema::new(vec![Field::new("value", DataType::Int32, false)]);
        let dataset = Schema::new(vec![
            Field::new("value", DataType::Int32, false),
            Field::new("state", DataType::Utf8, false),
        ]);
        let mut known = BTreeMap::new();
        assert_eq!(
            check_physical("a", &physical, &dataset, &known)
                .unwrap_err()
                .kind(),
            ErrorKind::IoFailure
        );
        known.insert(Arc::from("state"), ScalarValue::from("CA"));
        assert!(check_physical("a", &physical, &dataset, &known).is_ok());
    }

    #[test]
    fn conform_materializes_missing_columns() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("value", DataType::Int32, false)])),
            vec![Arc::new(Int32Array::from(vec![1, 2]))],
        )
        .unwrap();
        let target = Arc::new(Schema::new(vec![
            Field::new("state", DataType::Utf8, true),
            Field::new("value", DataType::Int32, false),
            Field::new("note", DataType::Utf8, true),
        ]));
        let mut known = BTreeMap::new();
        known.insert(Arc::from("state"), ScalarValue::from("CA"));

        let conformed = conform_batch(&batch, &target, &known).unwrap();
        assert_eq!(conformed.num_rows(), 2);
        let states = conformed
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(states.value(1), "CA");
        assert_eq!(conformed.column(2).null_count(), 2);
    }
}
