use std::io::Cursor;

use arrow::{
    array::RecordBatch,
    datatypes::SchemaRef,
    ipc::{
        reader::FileReader,
        writer::{FileWriter as IpcFileWriter, IpcWriteOptions},
    },
};
use futures_util::{future::BoxFuture, stream, StreamExt};
use tokio::io::AsyncWriteExt;

use super::{
    ensure_uncompressed, rechunk, BatchStream, FileFormat, FileWriteOptions, FileWriter,
    FormatScanOptions,
};
use crate::{
    error::{DatasetError, Result},
    fs::{FileSource, OutputFile},
};

const MAGIC: &[u8; 6] = b"ARROW1";

/// Arrow IPC file format (Feather v2).
///
/// Files are decoded from an in-memory copy; writers buffer the encoded file and
/// upload it on finish.
#[derive(Clone, Debug, Default)]
pub struct IpcFormat;

impl FileFormat for IpcFormat {
    fn type_name(&self) -> &'static str {
        "ipc"
    }

    fn extension(&self) -> &'static str {
        "arrow"
    }

    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if ensure_uncompressed(self.type_name(), source).is_err() {
                return Ok(false);
            }
            let data = source.read_all().await?;
            Ok(data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC)
        })
    }

    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<SchemaRef>> {
        Box::pin(async move {
            ensure_uncompressed(self.type_name(), source)?;
            let data = source.read_all().await?;
            let reader = FileReader::try_new(Cursor::new(data), None)?;
            Ok(reader.schema())
        })
    }

    fn scan_batches<'a>(
        &'a self,
        source: &'a FileSource,
        options: FormatScanOptions,
    ) -> BoxFuture<'a, Result<BatchStream>> {
        Box::pin(async move {
            ensure_uncompressed(self.type_name(), source)?;
            let data = source.read_all().await?;
            let schema = FileReader::try_new(Cursor::new(data.clone()), None)?.schema();
            let reader = FileReader::try_new(Cursor::new(data), options.column_indices(&schema))?;
            let batch_size = options.batch_size;
            let batches = stream::iter(reader).flat_map(move |batch| {
                let chunks = match batch {
                    Ok(batch) => rechunk(batch, batch_size).into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(DatasetError::from(err))],
                };
                stream::iter(chunks)
            });
            Ok(batches.boxed())
        })
    }

    fn make_writer(
        &self,
        destination: OutputFile,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>> {
        let FileWriteOptions::Ipc(ipc_options) = options else {
            return Err(DatasetError::invalid_argument(
                "ipc writer requires ipc write options",
            ));
        };
        let encoder =
            IpcFileWriter::try_new_with_options(Vec::new(), &schema, ipc_options.clone())?;
        Ok(Box::new(IpcBufferedWriter {
            encoder,
            destination,
            estimated_bytes: 0,
        }))
    }

    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::Ipc(IpcWriteOptions::default())
    }
}

struct IpcBufferedWriter {
    encoder: IpcFileWriter<Vec<u8>>,
    destination: OutputFile,
    estimated_bytes: u64,
}

impl FileWriter for IpcBufferedWriter {
    fn write<'a>(&'a mut self, batch: &'a RecordBatch) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.encoder.write(batch)?;
            self.estimated_bytes += batch.get_array_memory_size() as u64;
            Ok(())
        })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { Ok(()) })
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let IpcBufferedWriter {
                mut encoder,
                mut destination,
                ..
            } = *self;
            encoder.finish()?;
            let encoded = encoder.into_inner()?;
            destination.write_all(&encoded).await?;
            destination.shutdown().await?;
            Ok(())
        })
    }

    fn bytes_written(&self) -> u64 {
        self.estimated_bytes
    }
}
