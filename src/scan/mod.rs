//! Scanning a dataset into a stream of record batches.
//!
//! The [`Scanner`] binds the filter and projection once, enumerates the
//! fragments that survive partition pruning, and reads them either
//! sequentially or through a bounded window of concurrent producers. With
//! `preserve_order` a sequencer restores `(fragment, batch)` order before
//! batches reach the caller.

mod pipeline;
mod sequencer;

use std::{fmt, sync::Arc};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use futures_util::{future::BoxFuture, stream::BoxStream, StreamExt, TryStreamExt};

use self::pipeline::Pipeline;
use crate::{
    dataset::{Dataset, Fragment, FragmentScanOptions},
    error::{DatasetError, Result},
    executor::{self, Executor},
    expr::Predicate,
    format::BatchStream,
    observability::log_debug,
    schema::project_schema,
};

/// Default upper bound on rows per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1 << 17;
/// Default number of fragments read concurrently.
pub const DEFAULT_FRAGMENT_READAHEAD: usize = 4;
/// Default number of batches buffered between producers and the consumer.
pub const DEFAULT_BATCH_READAHEAD: usize = 16;

/// Position of a batch in the deterministic scan order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchOrdinal {
    /// Index of the fragment in enumeration order.
    pub fragment: usize,
    /// Index of the batch within its fragment.
    pub batch: usize,
}

/// A scanned batch together with where it came from.
#[derive(Clone, Debug)]
pub struct TaggedBatch {
    /// Position in scan order.
    pub ordinal: BatchOrdinal,
    /// Fragment that produced the batch.
    pub fragment: Fragment,
    /// Projected, filtered rows.
    pub batch: RecordBatch,
}

/// Stream of batches with their ordinals.
pub type TaggedStream = BoxStream<'static, Result<TaggedBatch>>;

/// Per-batch asynchronous transform applied by fragment producers before the
/// batch is handed to the consumer.
pub type BatchHook =
    Arc<dyn Fn(BatchOrdinal, RecordBatch) -> BoxFuture<'static, Result<RecordBatch>> + Send + Sync>;

/// Scan configuration.
#[derive(Clone)]
pub struct ScanOptions {
    /// Columns to emit, in order; `None` emits the dataset schema.
    pub projection: Option<Vec<String>>,
    /// Row filter; also used to prune fragments.
    pub filter: Predicate,
    /// Upper bound on rows per batch.
    pub batch_size: usize,
    /// Read fragments concurrently on the executor.
    pub use_threads: bool,
    /// Number of fragments read at the same time.
    pub fragment_readahead: usize,
    /// Batches buffered between producers and the consumer.
    pub batch_readahead: usize,
    /// Emit batches in `(fragment, batch)` order.
    pub preserve_order: bool,
    /// Worker pool; defaults to the ambient tokio runtime.
    pub executor: Option<Arc<dyn Executor>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            projection: None,
            filter: Predicate::always_true(),
            batch_size: DEFAULT_BATCH_SIZE,
            use_threads: true,
            fragment_readahead: DEFAULT_FRAGMENT_READAHEAD,
            batch_readahead: DEFAULT_BATCH_READAHEAD,
            preserve_order: false,
            executor: None,
        }
    }
}

impl ScanOptions {
    /// Restricts and reorders the emitted columns.
    #[must_use]
    pub fn with_projection<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the row filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the upper bound on rows per batch.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enables or disables concurrent fragment reads.
    #[must_use]
    pub fn with_use_threads(mut self, use_threads: bool) -> Self {
        self.use_threads = use_threads;
        self
    }

    /// Sets the number of fragments read concurrently.
    #[must_use]
    pub fn with_fragment_readahead(mut self, fragments: usize) -> Self {
        self.fragment_readahead = fragments;
        self
    }

    /// Sets the number of batches buffered ahead of the consumer.
    #[must_use]
    pub fn with_batch_readahead(mut self, batches: usize) -> Self {
        self.batch_readahead = batches;
        self
    }

    /// Requests output in ordinal order.
    #[must_use]
    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    /// Runs producers on `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DatasetError::invalid_argument("batch_size must be positive"));
        }
        if self.fragment_readahead == 0 {
            return Err(DatasetError::invalid_argument(
                "fragment_readahead must be positive",
            ));
        }
        if self.batch_readahead == 0 {
            return Err(DatasetError::invalid_argument(
                "batch_readahead must be positive",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("projection", &self.projection)
            .field("filter", &self.filter.to_string())
            .field("batch_size", &self.batch_size)
            .field("use_threads", &self.use_threads)
            .field("fragment_readahead", &self.fragment_readahead)
            .field("batch_readahead", &self.batch_readahead)
            .field("preserve_order", &self.preserve_order)
            .finish_non_exhaustive()
    }
}

/// Reads a dataset according to [`ScanOptions`].
#[derive(Clone)]
pub struct Scanner {
    dataset: Dataset,
    options: ScanOptions,
    filter: Predicate,
    projection: SchemaRef,
    hook: Option<BatchHook>,
}

impl Scanner {
    /// Validates `options` and binds the filter and projection against the
    /// dataset schema.
    pub fn new(dataset: Dataset, options: ScanOptions) -> Result<Self> {
        options.validate()?;
        let filter = options.filter.bind(dataset.schema())?;
        let projection = match &options.projection {
            Some(columns) => project_schema(dataset.schema(), columns)?,
            None => dataset.schema().clone(),
        };
        Ok(Self {
            dataset,
            options,
            filter,
            projection,
            hook: None,
        })
    }

    /// Installs a transform run on every batch inside its producer.
    #[must_use]
    pub fn with_batch_hook(mut self, hook: BatchHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Schema of emitted batches.
    pub fn projected_schema(&self) -> &SchemaRef {
        &self.projection
    }

    /// Scanned dataset.
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Effective options.
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    fn fragment_options(&self) -> FragmentScanOptions {
        FragmentScanOptions {
            dataset_schema: self.dataset.schema().clone(),
            projection: self.projection.clone(),
            filter: self.filter.clone(),
            batch_size: self.options.batch_size,
        }
    }

    /// Streams batches tagged with their ordinal and fragment.
    ///
    /// In threaded mode the producers start immediately; dropping the stream
    /// cancels them.
    pub fn scan_tagged(&self) -> Result<TaggedStream> {
        let fragments = self.dataset.get_fragments(Some(&self.filter));
        let options = self.fragment_options();
        log_debug!(
            component = "scan",
            event = "scan_started",
            use_threads = self.options.use_threads,
            preserve_order = self.options.preserve_order,
            filter = %self.filter,
        );
        if !self.options.use_threads {
            let hook = self.hook.clone();
            return Ok(Box::pin(async_stream::stream! {
                for (index, fragment) in fragments.enumerate() {
                    let mut batches = match fragment.scan_batches(&options).await {
                        Ok(batches) => batches,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    let mut emitted = 0;
                    while let Some(batch) = batches.next().await {
                        let batch = match batch {
                            Ok(batch) if batch.num_rows() == 0 => continue,
                            Ok(batch) => batch,
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        };
                        let ordinal = BatchOrdinal { fragment: index, batch: emitted };
                        emitted += 1;
                        let batch = match &hook {
                            Some(hook) => match hook(ordinal, batch).await {
                                Ok(batch) => batch,
                                Err(err) => {
                                    yield Err(err);
                                    return;
                                }
                            },
                            None => batch,
                        };
                        yield Ok(TaggedBatch {
                            ordinal,
                            fragment: fragment.clone(),
                            batch,
                        });
                    }
                }
            }));
        }
        let executor = executor::resolve(self.options.executor.as_ref())?;
        Ok(Pipeline {
            executor,
            fragments,
            options,
            hook: self.hook.clone(),
            fragment_readahead: self.options.fragment_readahead,
            batch_readahead: self.options.batch_readahead,
            preserve_order: self.options.preserve_order,
        }
        .spawn())
    }

    /// Streams projected, filtered batches.
    pub fn scan_batches(&self) -> Result<BatchStream> {
        Ok(self.scan_tagged()?.map_ok(|tagged| tagged.batch).boxed())
    }

    /// Collects every batch.
    pub async fn to_batches(&self) -> Result<Vec<RecordBatch>> {
        self.scan_batches()?.try_collect().await
    }

    /// Counts matching rows.
    pub async fn count_rows(&self) -> Result<usize> {
        self.scan_batches()?
            .try_fold(0, |rows, batch| async move { Ok(rows + batch.num_rows()) })
            .await
    }

    /// First `limit` rows in scan order.
    ///
    /// Stops reading once enough rows are collected.
    pub async fn head(&self, limit: usize) -> Result<Vec<RecordBatch>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        let mut remaining = limit;
        let mut batches = self.scan_batches()?;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            if batch.num_rows() >= remaining {
                out.push(batch.slice(0, remaining));
                break;
            }
            remaining -= batch.num_rows();
            out.push(batch);
        }
        Ok(out)
    }
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("dataset", &self.dataset)
            .field("options", &self.options)
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}
