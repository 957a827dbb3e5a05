use std::{collections::BTreeSet, fmt, sync::Arc};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use async_lock::OnceCell;
use futures_util::{future::BoxFuture, stream, StreamExt};

use crate::{
    error::{DatasetError, Result},
    expr::{filter_batch, known_values, Predicate},
    format::{rechunk, BatchStream, FileFormat, FormatScanOptions},
    fs::FileSource,
    observability::log_debug,
    schema::{check_physical, conform_batch, select_columns},
};

/// Physical access to one scannable unit of data.
pub trait FragmentScan: fmt::Debug + Send + Sync + 'static {
    /// Human-readable identity used in logs and errors.
    fn describe(&self) -> String;

    /// Reads the physical schema. Called at most once per [`Fragment`].
    fn inspect(&self) -> BoxFuture<'_, Result<SchemaRef>>;

    /// Streams batches holding the requested physical columns.
    fn scan(&self, options: FormatScanOptions) -> BoxFuture<'_, Result<BatchStream>>;

    /// Source file, for file-backed fragments.
    fn file_source(&self) -> Option<&FileSource> {
        None
    }
}

/// What the scanner asks of one fragment.
#[derive(Clone, Debug)]
pub struct FragmentScanOptions {
    /// Schema of the owning dataset.
    pub dataset_schema: SchemaRef,
    /// Columns to emit, in order.
    pub projection: SchemaRef,
    /// Filter bound against the dataset schema.
    pub filter: Predicate,
    /// Upper bound on rows per batch.
    pub batch_size: usize,
}

struct FragmentInner {
    partition: Predicate,
    known_schema: Option<SchemaRef>,
    physical: OnceCell<Result<SchemaRef, Arc<DatasetError>>>,
    scan: Arc<dyn FragmentScan>,
}

/// One independently scannable unit of a dataset.
///
/// Clones share the memoized physical schema.
#[derive(Clone)]
pub struct Fragment {
    inner: Arc<FragmentInner>,
}

impl Fragment {
    /// Fragment over `scan` whose rows all satisfy `partition`.
    pub fn new(scan: Arc<dyn FragmentScan>, partition: Predicate) -> Self {
        Self::build(scan, partition, None)
    }

    /// Fragment whose physical schema is known upfront and never inspected.
    pub fn with_physical_schema(
        scan: Arc<dyn FragmentScan>,
        partition: Predicate,
        schema: SchemaRef,
    ) -> Self {
        Self::build(scan, partition, Some(schema))
    }

    fn build(scan: Arc<dyn FragmentScan>, partition: Predicate, known: Option<SchemaRef>) -> Self {
        Self {
            inner: Arc::new(FragmentInner {
                partition,
                known_schema: known,
                physical: OnceCell::new(),
                scan,
            }),
        }
    }

    /// Predicate every row of this fragment satisfies.
    pub fn partition_predicate(&self) -> &Predicate {
        &self.inner.partition
    }

    /// Identity of the underlying data.
    pub fn describe(&self) -> String {
        self.inner.scan.describe()
    }

    /// Source file of a file-backed fragment.
    pub fn file_source(&self) -> Option<&FileSource> {
        self.inner.scan.file_source()
    }

    /// Resolves the physical schema.
    ///
    /// The first caller inspects the data; concurrent callers wait for that
    /// inspection. Both success and failure are memoized.
    pub async fn physical_schema(&self) -> Result<SchemaRef> {
        if let Some(schema) = &self.inner.known_schema {
            return Ok(schema.clone());
        }
        let resolved = self
            .inner
            .physical
            .get_or_init(|| async {
                log_debug!(
                    component = "fragment",
                    event = "schema_resolve",
                    fragment = %self.inner.scan.describe(),
                );
                self.inner.scan.inspect().await.map_err(Arc::new)
            })
            .await;
        resolved.clone().map_err(DatasetError::Shared)
    }

    /// Streams batches shaped to `options.projection`.
    ///
    /// Dataset fields missing from the file are materialized from the
    /// partition predicate when it pins them, and as nulls otherwise. The
    /// filter is applied to every batch before projection.
    pub async fn scan_batches(&self, options: &FragmentScanOptions) -> Result<BatchStream> {
        let physical = self.physical_schema().await?;
        let known = known_values(&self.inner.partition);
        check_physical(&self.describe(), &physical, &options.dataset_schema, &known)?;

        let referenced = options.filter.referenced_columns();
        let mut needed: BTreeSet<&str> = options
            .projection
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect();
        needed.extend(referenced.iter().map(AsRef::as_ref));

        let working = Arc::new(arrow::datatypes::Schema::new(
            options
                .dataset_schema
                .fields()
                .iter()
                .filter(|field| needed.contains(field.name().as_str()))
                .cloned()
                .collect::<Vec<_>>(),
        ));
        let columns = physical
            .fields()
            .iter()
            .filter(|field| needed.contains(field.name().as_str()))
            .map(|field| field.name().clone())
            .collect();

        let batches = self
            .inner
            .scan
            .scan(FormatScanOptions {
                columns: Some(columns),
                filter: options.filter.clone(),
                batch_size: options.batch_size,
            })
            .await?;

        let projection = options.projection.clone();
        let filter = options.filter.clone();
        Ok(batches
            .map(move |batch| {
                let conformed = conform_batch(&batch?, &working, &known)?;
                let filtered = if filter.is_trivially_true() {
                    conformed
                } else {
                    filter_batch(&filter, &conformed)?
                };
                select_columns(&filtered, &projection)
            })
            .boxed())
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("source", &self.inner.scan.describe())
            .field("partition", &self.inner.partition.to_string())
            .finish()
    }
}

/// Fragment over record batches held in memory.
#[derive(Debug)]
pub struct InMemoryFragment {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl InMemoryFragment {
    /// Fragment yielding `batches`, all of which share `schema`.
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }
}

impl FragmentScan for InMemoryFragment {
    fn describe(&self) -> String {
        format!("<in-memory: {} batches>", self.batches.len())
    }

    fn inspect(&self) -> BoxFuture<'_, Result<SchemaRef>> {
        Box::pin(async move { Ok(self.schema.clone()) })
    }

    fn scan(&self, options: FormatScanOptions) -> BoxFuture<'_, Result<BatchStream>> {
        Box::pin(async move {
            let indices = options.column_indices(&self.schema);
            let mut out = Vec::with_capacity(self.batches.len());
            for batch in &self.batches {
                let projected = match &indices {
                    Some(indices) => batch.project(indices)?,
                    None => batch.clone(),
                };
                out.extend(rechunk(projected, options.batch_size).into_iter().map(Ok));
            }
            Ok(stream::iter(out).boxed())
        })
    }
}

/// Fragment backed by one file in a given format.
#[derive(Debug)]
pub struct FileFragment {
    source: FileSource,
    format: Arc<dyn FileFormat>,
}

impl FileFragment {
    /// Fragment reading `source` with `format`.
    pub fn new(source: FileSource, format: Arc<dyn FileFormat>) -> Self {
        Self { source, format }
    }

    /// Format used to decode the file.
    pub fn format(&self) -> &Arc<dyn FileFormat> {
        &self.format
    }
}

impl FragmentScan for FileFragment {
    fn describe(&self) -> String {
        self.source.to_string()
    }

    fn inspect(&self) -> BoxFuture<'_, Result<SchemaRef>> {
        self.format.inspect(&self.source)
    }

    fn scan(&self, options: FormatScanOptions) -> BoxFuture<'_, Result<BatchStream>> {
        self.format.scan_batches(&self.source, options)
    }

    fn file_source(&self) -> Option<&FileSource> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use arrow::{
        array::{Int32Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use futures_util::TryStreamExt;

    use super::*;
    use crate::{error::ErrorKind, expr::ColumnRef};

    #[derive(Debug, Default)]
    struct FailingInspect {
        calls: AtomicUsize,
    }

    impl FragmentScan for FailingInspect {
        fn describe(&self) -> String {
            "failing".into()
        }

        fn inspect(&self) -> BoxFuture<'_, Result<SchemaRef>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Err(DatasetError::not_supported("cannot inspect"))
            })
        }

        fn scan(&self, _options: FormatScanOptions) -> BoxFuture<'_, Result<BatchStream>> {
            Box::pin(async move { Ok(stream::empty().boxed()) })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn schema_failure_is_resolved_once_and_shared() {
        let scan = Arc::new(FailingInspect::default());
        let fragment = Fragment::new(scan.clone(), Predicate::always_true());

        let waiters = (0..8).map(|_| {
            let fragment = fragment.clone();
            tokio::spawn(async move { fragment.physical_schema().await })
        });
        for waiter in waiters {
            let err = waiter.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotSupported);
        }
        assert!(fragment.physical_schema().await.is_err());
        assert_eq!(scan.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partition_constants_fill_missing_columns() {
        let physical = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(
            physical.clone(),
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let fragment = Fragment::new(
            Arc::new(InMemoryFragment::new(physical, vec![batch])),
            Predicate::eq(ColumnRef::new("region"), "emea"),
        );

        let dataset_schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("region", DataType::Utf8, false),
            Field::new("note", DataType::Utf8, true),
        ]));
        let filter = Predicate::gt(ColumnRef::new("id"), 1)
            .bind(&dataset_schema)
            .unwrap();
        let options = FragmentScanOptions {
            dataset_schema: dataset_schema.clone(),
            projection: Arc::new(dataset_schema.project(&[2, 1]).unwrap()),
            filter,
            batch_size: 1024,
        };
        let batches: Vec<RecordBatch> = fragment
            .scan_batches(&options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(0).name(), "note");
        assert_eq!(batch.column(0).null_count(), 2);
        let regions = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(regions.value(0), "emea");
        assert_eq!(regions.value(1), "emea");
    }

    #[tokio::test]
    async fn drifted_physical_schema_is_an_io_failure() {
        let physical = Arc::new(Schema::new(vec![Field::new("id", DataType::Utf8, false)]));
        let fragment = Fragment::with_physical_schema(
            Arc::new(InMemoryFragment::new(physical.clone(), Vec::new())),
            Predicate::always_true(),
            physical,
        );
        let dataset_schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
        let options = FragmentScanOptions {
            dataset_schema: dataset_schema.clone(),
            projection: dataset_schema,
            filter: Predicate::always_true(),
            batch_size: 16,
        };
        let err = fragment.scan_batches(&options).await.err().unwrap();
        assert!(matches!(err, DatasetError::PhysicalSchemaDrift { .. }));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }
}
