//! File format codecs: schema inspection, batch scanning, and writers.

mod ipc;
mod parquet;

use std::{fmt, sync::Arc};

use arrow::{
    array::RecordBatch,
    datatypes::{Schema, SchemaRef},
    ipc::writer::IpcWriteOptions,
};
use futures_util::{future::BoxFuture, stream::BoxStream};
use ::parquet::file::properties::WriterProperties;

pub use self::{ipc::IpcFormat, parquet::ParquetFormat};
use crate::{
    error::{DatasetError, Result},
    expr::Predicate,
    fs::{FileSource, OutputFile},
};

/// Lazy, finite stream of record batches.
pub type BatchStream = BoxStream<'static, Result<RecordBatch>>;

/// What a format is asked to read from one file.
#[derive(Clone, Debug)]
pub struct FormatScanOptions {
    /// Physical columns to read; `None` reads every column.
    pub columns: Option<Vec<String>>,
    /// Filter the caller applies afterwards; formats may use it to skip data.
    pub filter: Predicate,
    /// Upper bound on rows per emitted batch.
    pub batch_size: usize,
}

impl FormatScanOptions {
    /// Indices of the requested columns inside `schema`, skipping absent ones.
    pub(crate) fn column_indices(&self, schema: &Schema) -> Option<Vec<usize>> {
        self.columns.as_ref().map(|columns| {
            let mut indices: Vec<usize> = columns
                .iter()
                .filter_map(|name| schema.index_of(name).ok())
                .collect();
            indices.sort_unstable();
            indices.dedup();
            indices
        })
    }
}

/// Format-specific writer configuration.
#[derive(Clone, Debug)]
pub enum FileWriteOptions {
    /// Parquet writer properties.
    Parquet(WriterProperties),
    /// Arrow IPC file writer options.
    Ipc(IpcWriteOptions),
}

/// Codec capability set for one file format.
pub trait FileFormat: fmt::Debug + Send + Sync + 'static {
    /// Short identifier used in logs.
    fn type_name(&self) -> &'static str;

    /// Conventional file extension without the dot.
    fn extension(&self) -> &'static str;

    /// Whether `source` looks like a file of this format.
    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<bool>>;

    /// Reads the physical schema of `source`.
    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<SchemaRef>>;

    /// Opens a batch stream over `source`.
    ///
    /// Fails with `NotSupported` when the options cannot be honored.
    fn scan_batches<'a>(
        &'a self,
        source: &'a FileSource,
        options: FormatScanOptions,
    ) -> BoxFuture<'a, Result<BatchStream>>;

    /// Creates a writer that encodes batches of `schema` into `destination`.
    fn make_writer(
        &self,
        destination: OutputFile,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>>;

    /// Writer options used when the caller supplies none.
    fn default_write_options(&self) -> FileWriteOptions;
}

/// Encoder for one output file.
pub trait FileWriter: Send {
    /// Appends a batch to the current row group.
    fn write<'a>(&'a mut self, batch: &'a RecordBatch) -> BoxFuture<'a, Result<()>>;

    /// Closes the current row group.
    fn flush(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Writes the footer and closes the destination.
    fn finish(self: Box<Self>) -> BoxFuture<'static, Result<()>>;

    /// Bytes encoded so far, including buffered data.
    fn bytes_written(&self) -> u64;
}

pub(crate) fn ensure_uncompressed(format: &str, source: &FileSource) -> Result<()> {
    if source.compression() == crate::fs::Compression::Uncompressed {
        Ok(())
    } else {
        Err(DatasetError::not_supported(format!(
            "{format} cannot read {source} with {:?} stream compression",
            source.compression()
        )))
    }
}

/// Splits batches larger than `batch_size` rows.
pub(crate) fn rechunk(batch: RecordBatch, batch_size: usize) -> Vec<RecordBatch> {
    let rows = batch.num_rows();
    if batch_size == 0 || rows <= batch_size {
        return vec![batch];
    }
    (0..rows)
        .step_by(batch_size)
        .map(|offset| batch.slice(offset, batch_size.min(rows - offset)))
        .collect()
}

/// Shared default-format handle.
pub fn parquet() -> Arc<dyn FileFormat> {
    Arc::new(ParquetFormat::default())
}

/// Shared IPC-format handle.
pub fn ipc() -> Arc<dyn FileFormat> {
    Arc::new(IpcFormat::default())
}
