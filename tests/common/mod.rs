//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use arrow::{
    array::{Array, Int32Array, RecordBatch, StringArray},
    datatypes::SchemaRef,
};
use futures::future::BoxFuture;
use tonbo_dataset::{format::FileFormat, fs::FileSystem, BatchHook, BatchOrdinal, Result};

/// Delays every batch by a seeded random amount, and fragment 0 more than the rest.
pub fn jitter(seed: u64) -> BatchHook {
    counted_jitter(seed, Arc::new(AtomicUsize::new(0)))
}

/// [`jitter`] that also counts its invocations in `calls`.
pub fn counted_jitter(seed: u64, calls: Arc<AtomicUsize>) -> BatchHook {
    Arc::new(
        move |ordinal: BatchOrdinal,
              batch: RecordBatch|
              -> BoxFuture<'static, Result<RecordBatch>> {
            calls.fetch_add(1, Ordering::SeqCst);
            let salt = ((ordinal.fragment as u64) << 16) ^ ordinal.batch as u64;
            let mut millis = fastrand::Rng::with_seed(seed ^ salt).u64(0..4);
            if ordinal.fragment == 0 {
                millis += 25;
            }
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(batch)
            })
        },
    )
}

/// Writes `batches` as one file at `path`.
pub async fn put_file(
    fs: &dyn FileSystem,
    format: &Arc<dyn FileFormat>,
    path: &str,
    schema: SchemaRef,
    batches: &[RecordBatch],
) {
    let output = fs.open_output(path).await.expect("open output");
    let mut writer = format
        .make_writer(output, schema, &format.default_write_options())
        .expect("writer");
    for batch in batches {
        writer.write(batch).await.expect("write batch");
    }
    writer.finish().await.expect("finish file");
}

/// Values of the Int32 column `name` across `batches`, nulls skipped.
pub fn i32_column(batches: &[RecordBatch], name: &str) -> Vec<i32> {
    batches
        .iter()
        .flat_map(|batch| {
            let column = batch
                .column_by_name(name)
                .unwrap_or_else(|| panic!("column {name}"));
            let values = column
                .as_any()
                .downcast_ref::<Int32Array>()
                .expect("int32 column");
            values.iter().flatten().collect::<Vec<_>>()
        })
        .collect()
}

/// Values of the Utf8 column `name` across `batches`; nulls become `None`.
pub fn str_column(batches: &[RecordBatch], name: &str) -> Vec<Option<String>> {
    batches
        .iter()
        .flat_map(|batch| {
            let column = batch
                .column_by_name(name)
                .unwrap_or_else(|| panic!("column {name}"));
            let values = column
                .as_any()
                .downcast_ref::<StringArray>()
                .expect("utf8 column");
            (0..values.len())
                .map(|row| values.is_valid(row).then(|| values.value(row).to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Field names of `schema` in order.
pub fn field_names(schema: &SchemaRef) -> Vec<String> {
    schema
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect()
}
