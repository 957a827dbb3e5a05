//! Partitioned dataset writer.
//!
//! Batches are pulled from the input by a feeder, split by partition key on
//! one or more dispatchers, and handed to one writer lane per key. Lanes stage
//! rows into groups and rotate files; the registry bounds how many lanes keep
//! a file open at once.

mod lane;
mod registry;

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use futures_core::Stream;
use futures_util::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use self::registry::Registry;
use crate::{
    error::{DatasetError, Result},
    executor::{self, Executor},
    format::{BatchStream, FileFormat, FileWriteOptions},
    fs::{FileSelector, FileSystem},
    observability::{log_info, log_warn},
    partition::{no_partitioning, split_batch, PartitionKey, Partitioning},
    scan::Scanner,
};

/// Placeholder replaced by the per-partition file ordinal.
pub const ORDINAL_PLACEHOLDER: &str = "{i}";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{i\}").expect("valid pattern"));

/// Default cap on rows per row group.
pub const DEFAULT_MAX_ROWS_PER_GROUP: usize = 1 << 20;
/// Default cap on simultaneously open files.
pub const DEFAULT_MAX_OPEN_FILES: usize = 900;
/// Default number of dispatchers when order is not preserved.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 4;

const TEE_QUEUE: usize = 8;

/// What to do with data already present under the base directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExistingDataBehavior {
    /// Refuse to write into a base directory that contains files.
    #[default]
    Error,
    /// Keep existing files; files with colliding names are replaced.
    OverwriteOrIgnore,
    /// Clear a partition directory the first time the run writes to it.
    DeleteMatchingPartitions,
}

/// Configuration of one dataset write.
#[derive(Clone)]
pub struct WriteOptions {
    /// Destination filesystem.
    pub filesystem: Arc<dyn FileSystem>,
    /// Directory all partition directories are created under.
    pub base_dir: String,
    /// Maps rows to partition directories.
    pub partitioning: Arc<dyn Partitioning>,
    /// Output codec.
    pub format: Arc<dyn FileFormat>,
    /// Codec options; the format's defaults when `None`.
    pub file_write_options: Option<FileWriteOptions>,
    /// File name pattern containing exactly one `{i}`.
    pub basename_template: String,
    /// Upper bound on rows per row group.
    pub max_rows_per_group: usize,
    /// Rows staged before a group is written; the tail is written regardless.
    pub min_rows_per_group: usize,
    /// Rotate to a new file after this many rows.
    pub max_rows_per_file: usize,
    /// Rotate to a new file once the writer reports this many bytes.
    pub max_bytes_per_file: Option<u64>,
    /// Upper bound on files open at the same time.
    pub max_open_files: usize,
    /// Keep input order within every partition.
    pub preserve_order: bool,
    /// Handling of data already under the base directory.
    pub existing_data_behavior: ExistingDataBehavior,
    /// Dispatchers splitting batches when order is not preserved.
    pub write_concurrency: usize,
    /// Worker pool for dispatchers and lanes.
    pub executor: Option<Arc<dyn Executor>>,
}

impl WriteOptions {
    /// Unpartitioned write of `format` files into `base_dir`.
    pub fn new(
        filesystem: Arc<dyn FileSystem>,
        base_dir: impl Into<String>,
        format: Arc<dyn FileFormat>,
    ) -> Self {
        let basename_template = format!("part-{ORDINAL_PLACEHOLDER}.{}", format.extension());
        Self {
            filesystem,
            base_dir: base_dir.into(),
            partitioning: no_partitioning(),
            format,
            file_write_options: None,
            basename_template,
            max_rows_per_group: DEFAULT_MAX_ROWS_PER_GROUP,
            min_rows_per_group: 0,
            max_rows_per_file: usize::MAX,
            max_bytes_per_file: None,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            preserve_order: false,
            existing_data_behavior: ExistingDataBehavior::default(),
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
            executor: None,
        }
    }

    /// Splits rows into directories with `partitioning`.
    #[must_use]
    pub fn with_partitioning(mut self, partitioning: Arc<dyn Partitioning>) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Overrides the codec options.
    #[must_use]
    pub fn with_file_write_options(mut self, options: FileWriteOptions) -> Self {
        self.file_write_options = Some(options);
        self
    }

    /// Sets the file name pattern.
    #[must_use]
    pub fn with_basename_template(mut self, template: impl Into<String>) -> Self {
        self.basename_template = template.into();
        self
    }

    /// Caps rows per row group.
    #[must_use]
    pub fn with_max_rows_per_group(mut self, rows: usize) -> Self {
        self.max_rows_per_group = rows;
        self
    }

    /// Stages at least `rows` rows before writing a group.
    #[must_use]
    pub fn with_min_rows_per_group(mut self, rows: usize) -> Self {
        self.min_rows_per_group = rows;
        self
    }

    /// Caps rows per file.
    #[must_use]
    pub fn with_max_rows_per_file(mut self, rows: usize) -> Self {
        self.max_rows_per_file = rows;
        self
    }

    /// Caps bytes per file.
    #[must_use]
    pub fn with_max_bytes_per_file(mut self, bytes: u64) -> Self {
        self.max_bytes_per_file = Some(bytes);
        self
    }

    /// Caps simultaneously open files.
    #[must_use]
    pub fn with_max_open_files(mut self, files: usize) -> Self {
        self.max_open_files = files;
        self
    }

    /// Keeps input order within partitions by using a single dispatcher.
    #[must_use]
    pub fn with_preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    /// Sets how existing data is treated.
    #[must_use]
    pub fn with_existing_data_behavior(mut self, behavior: ExistingDataBehavior) -> Self {
        self.existing_data_behavior = behavior;
        self
    }

    /// Sets the number of dispatchers for unordered writes.
    #[must_use]
    pub fn with_write_concurrency(mut self, dispatchers: usize) -> Self {
        self.write_concurrency = dispatchers;
        self
    }

    /// Runs dispatchers and lanes on `executor`.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Checks the template and the limits.
    pub fn validate(&self) -> Result<()> {
        let placeholders = PLACEHOLDER.find_iter(&self.basename_template).count();
        if placeholders != 1 {
            return Err(DatasetError::invalid_argument(format!(
                "basename template `{}` must contain `{ORDINAL_PLACEHOLDER}` exactly once",
                self.basename_template
            )));
        }
        if self.basename_template.contains('/') {
            return Err(DatasetError::invalid_argument(format!(
                "basename template `{}` must not contain a path separator",
                self.basename_template
            )));
        }
        if self.max_rows_per_group == 0 || self.max_rows_per_file == 0 {
            return Err(DatasetError::invalid_argument(
                "row limits must be positive",
            ));
        }
        if self.max_rows_per_group > self.max_rows_per_file {
            return Err(DatasetError::invalid_argument(format!(
                "max_rows_per_group ({}) exceeds max_rows_per_file ({})",
                self.max_rows_per_group, self.max_rows_per_file
            )));
        }
        if self.min_rows_per_group > self.max_rows_per_group {
            return Err(DatasetError::invalid_argument(format!(
                "min_rows_per_group ({}) exceeds max_rows_per_group ({})",
                self.min_rows_per_group, self.max_rows_per_group
            )));
        }
        if self.max_bytes_per_file == Some(0) {
            return Err(DatasetError::invalid_argument(
                "max_bytes_per_file must be positive",
            ));
        }
        if self.max_open_files == 0 || self.write_concurrency == 0 {
            return Err(DatasetError::invalid_argument(
                "max_open_files and write_concurrency must be positive",
            ));
        }
        Ok(())
    }

    fn dispatchers(&self) -> usize {
        if self.preserve_order {
            1
        } else {
            self.write_concurrency
        }
    }
}

impl fmt::Debug for WriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOptions")
            .field("filesystem", &self.filesystem)
            .field("base_dir", &self.base_dir)
            .field("partitioning", &self.partitioning)
            .field("format", &self.format)
            .field("basename_template", &self.basename_template)
            .field("max_rows_per_group", &self.max_rows_per_group)
            .field("min_rows_per_group", &self.min_rows_per_group)
            .field("max_rows_per_file", &self.max_rows_per_file)
            .field("max_bytes_per_file", &self.max_bytes_per_file)
            .field("max_open_files", &self.max_open_files)
            .field("preserve_order", &self.preserve_order)
            .field("existing_data_behavior", &self.existing_data_behavior)
            .field("write_concurrency", &self.write_concurrency)
            .finish_non_exhaustive()
    }
}

/// One file produced by a write.
#[derive(Clone, Debug, PartialEq)]
pub struct WrittenFile {
    /// Path on the destination filesystem.
    pub path: String,
    /// Partition the rows belong to.
    pub partition: PartitionKey,
    /// Rows in the file.
    pub rows: usize,
    /// Encoded size.
    pub bytes: u64,
}

/// Outcome of a successful write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteSummary {
    /// Written files sorted by path.
    pub files: Vec<WrittenFile>,
}

impl WriteSummary {
    /// Total rows across files.
    pub fn total_rows(&self) -> usize {
        self.files.iter().map(|file| file.rows).sum()
    }

    /// Written paths in sorted order.
    pub fn paths(&self) -> Vec<&str> {
        self.files.iter().map(|file| file.path.as_str()).collect()
    }
}

/// State shared by the feeder, dispatchers, and lanes of one write.
pub(crate) struct WriteContext {
    pub(crate) options: WriteOptions,
    pub(crate) file_options: FileWriteOptions,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) cancel: CancellationToken,
    pub(crate) registry: async_lock::Mutex<Registry>,
    failure: Mutex<Option<DatasetError>>,
    written: Mutex<Vec<WrittenFile>>,
}

impl WriteContext {
    /// Records the first failure and stops every task of the write.
    pub(crate) fn fail(&self, err: DatasetError) {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            log_warn!(component = "write", event = "write_failed", error = %err);
            *failure = Some(err);
        }
        drop(failure);
        self.cancel.cancel();
    }

    pub(crate) fn record(&self, file: WrittenFile) {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(file);
    }

    fn take_failure(&self) -> Option<DatasetError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn take_written(&self) -> Vec<WrittenFile> {
        std::mem::take(&mut *self.written.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Writes everything `scanner` produces.
pub async fn write_dataset(scanner: &Scanner, options: WriteOptions) -> Result<WriteSummary> {
    let schema = scanner.projected_schema().clone();
    write_stream(schema, scanner.scan_batches()?, options).await
}

/// Writes `input`, whose batches share `schema`, into partitioned files.
///
/// Resolves after the input is exhausted and every file is closed. The first
/// failure stops the write and is returned; files closed before it stay on
/// the filesystem.
pub async fn write_stream<S>(
    schema: SchemaRef,
    input: S,
    options: WriteOptions,
) -> Result<WriteSummary>
where
    S: Stream<Item = Result<RecordBatch>> + Send,
{
    let mut input = Box::pin(input);
    options.validate()?;
    check_partition_fields(&schema, options.partitioning.as_ref())?;
    check_existing_data(&options).await?;
    options.filesystem.create_dir(&options.base_dir).await?;

    let executor = executor::resolve(options.executor.as_ref())?;
    let file_options = options
        .file_write_options
        .clone()
        .unwrap_or_else(|| options.format.default_write_options());
    let dispatchers = options.dispatchers();
    let context = Arc::new(WriteContext {
        registry: async_lock::Mutex::new(Registry::new(options.max_open_files)),
        options,
        file_options,
        executor: executor.clone(),
        cancel: CancellationToken::new(),
        failure: Mutex::new(None),
        written: Mutex::new(Vec::new()),
    });
    let _guard = context.cancel.clone().drop_guard();
    log_info!(
        component = "write",
        event = "write_started",
        base_dir = %context.options.base_dir,
        format = context.options.format.type_name(),
        partitioning = context.options.partitioning.type_name(),
        dispatchers = dispatchers,
    );

    let (queue_tx, queue_rx) = flume::bounded::<RecordBatch>(dispatchers * 2);
    let mut finished = Vec::with_capacity(dispatchers);
    for _ in 0..dispatchers {
        let (done_tx, done_rx) = oneshot::channel();
        let context = context.clone();
        let queue = queue_rx.clone();
        executor.spawn(Box::pin(async move {
            dispatch_all(&context, queue).await;
            let _ = done_tx.send(());
        }));
        finished.push(done_rx);
    }
    drop(queue_rx);

    loop {
        let next = tokio::select! {
            _ = context.cancel.cancelled() => break,
            next = input.next() => next,
        };
        let batch = match next {
            Some(Ok(batch)) => batch,
            Some(Err(err)) => {
                context.fail(err);
                break;
            }
            None => break,
        };
        if batch.num_rows() == 0 {
            continue;
        }
        let sent = tokio::select! {
            _ = context.cancel.cancelled() => break,
            sent = queue_tx.send_async(batch) => sent,
        };
        if sent.is_err() {
            break;
        }
    }
    drop(queue_tx);
    drop(input);

    for done in finished {
        let _ = done.await;
    }
    let lanes = context.registry.lock().await.close_all();
    for done in lanes {
        let _ = done.await;
    }

    if let Some(err) = context.take_failure() {
        return Err(err);
    }
    let mut files = context.take_written();
    files.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));
    log_info!(
        component = "write",
        event = "write_finished",
        files = files.len(),
        rows = files.iter().map(|file| file.rows).sum::<usize>(),
    );
    Ok(WriteSummary { files })
}

enum TeeEvent {
    Batch(RecordBatch),
    Drained,
    Finished(Result<WriteSummary>),
}

/// Writes `input` like [`write_stream`] and passes every batch it takes on.
///
/// Batches are yielded in input order as the writer pulls them. The stream
/// ends once the write has completed; a failed write yields its error last.
/// Dropping the stream cancels the write.
pub fn write_tee<S>(schema: SchemaRef, input: S, options: WriteOptions) -> BatchStream
where
    S: Stream<Item = Result<RecordBatch>> + Send + 'static,
{
    let (tee_tx, tee_rx) = flume::bounded::<RecordBatch>(TEE_QUEUE);
    let input = input.then(move |item| {
        let tee_tx = tee_tx.clone();
        async move {
            if let Ok(batch) = &item {
                if batch.num_rows() > 0 {
                    let _ = tee_tx.send_async(batch.clone()).await;
                }
            }
            item
        }
    });
    Box::pin(async_stream::stream! {
        let write = write_stream(schema, input, options);
        tokio::pin!(write);
        let mut outcome = None;
        loop {
            let event = if outcome.is_some() {
                match tee_rx.recv_async().await {
                    Ok(batch) => TeeEvent::Batch(batch),
                    Err(_) => TeeEvent::Drained,
                }
            } else {
                tokio::select! {
                    batch = tee_rx.recv_async() => match batch {
                        Ok(batch) => TeeEvent::Batch(batch),
                        Err(_) => TeeEvent::Drained,
                    },
                    done = &mut write => TeeEvent::Finished(done),
                }
            };
            match event {
                TeeEvent::Batch(batch) => yield Ok(batch),
                TeeEvent::Finished(done) => outcome = Some(done),
                TeeEvent::Drained => break,
            }
        }
        let done = match outcome {
            Some(done) => done,
            None => write.await,
        };
        if let Err(err) = done {
            yield Err(err);
        }
    })
}

async fn dispatch_all(context: &Arc<WriteContext>, queue: flume::Receiver<RecordBatch>) {
    while let Ok(batch) = queue.recv_async().await {
        if context.cancel.is_cancelled() {
            break;
        }
        if let Err(err) = dispatch(context, &batch).await {
            context.fail(err);
            break;
        }
    }
}

async fn dispatch(context: &Arc<WriteContext>, batch: &RecordBatch) -> Result<()> {
    for (key, rows) in split_batch(context.options.partitioning.as_ref(), batch)? {
        let lane = context
            .registry
            .lock()
            .await
            .acquire(&key, rows.schema(), context);
        lane.send_async(rows)
            .await
            .map_err(|_| DatasetError::Cancelled)?;
    }
    Ok(())
}

fn check_partition_fields(schema: &SchemaRef, partitioning: &dyn Partitioning) -> Result<()> {
    for field in partitioning.schema().fields() {
        match schema.field_with_name(field.name()) {
            Ok(column) if column.data_type() == field.data_type() => {}
            Ok(column) => {
                return Err(DatasetError::schema_mismatch(format!(
                    "partition field `{}` is {} but the input column is {}",
                    field.name(),
                    field.data_type(),
                    column.data_type()
                )))
            }
            Err(_) => {
                return Err(DatasetError::schema_mismatch(format!(
                    "input lacks partition field `{}`",
                    field.name()
                )))
            }
        }
    }
    Ok(())
}

async fn check_existing_data(options: &WriteOptions) -> Result<()> {
    if options.existing_data_behavior != ExistingDataBehavior::Error {
        return Ok(());
    }
    let selector = FileSelector {
        base_dir: options.base_dir.clone(),
        recursive: true,
        allow_not_found: true,
    };
    let listing = options.filesystem.list(&selector).await?;
    if listing.iter().any(|info| info.is_file()) {
        return Err(DatasetError::invalid_argument(format!(
            "`{}` already contains data; choose another existing data behavior to write into it",
            options.base_dir
        )));
    }
    Ok(())
}
