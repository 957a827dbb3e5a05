use arrow::{array::RecordBatch, datatypes::SchemaRef};
use futures_util::{future::BoxFuture, StreamExt, TryStreamExt};
use parquet::{
    arrow::{async_reader::ParquetRecordBatchStreamBuilder, AsyncArrowWriter, ProjectionMask},
    file::properties::WriterProperties,
};
use tokio::io::AsyncReadExt;

use super::{
    ensure_uncompressed, BatchStream, FileFormat, FileWriteOptions, FileWriter, FormatScanOptions,
};
use crate::{
    error::{DatasetError, Result},
    fs::{FileSource, OutputFile},
};

const MAGIC: &[u8; 4] = b"PAR1";

/// Parquet codec built on the async arrow reader and writer.
#[derive(Clone, Debug, Default)]
pub struct ParquetFormat {
    properties: Option<WriterProperties>,
}

impl ParquetFormat {
    /// Format whose default writer options use `properties`.
    pub fn with_properties(properties: WriterProperties) -> Self {
        Self {
            properties: Some(properties),
        }
    }
}

impl FileFormat for ParquetFormat {
    fn type_name(&self) -> &'static str {
        "parquet"
    }

    fn extension(&self) -> &'static str {
        "parquet"
    }

    fn is_supported<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if ensure_uncompressed(self.type_name(), source).is_err() {
                return Ok(false);
            }
            let mut input = source.open().await?;
            let mut header = [0u8; 4];
            match input.read_exact(&mut header).await {
                Ok(_) => Ok(&header == MAGIC),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn inspect<'a>(&'a self, source: &'a FileSource) -> BoxFuture<'a, Result<SchemaRef>> {
        Box::pin(async move {
            ensure_uncompressed(self.type_name(), source)?;
            let builder = ParquetRecordBatchStreamBuilder::new(source.open().await?).await?;
            Ok(builder.schema().clone())
        })
    }

    fn scan_batches<'a>(
        &'a self,
        source: &'a FileSource,
        options: FormatScanOptions,
    ) -> BoxFuture<'a, Result<BatchStream>> {
        Box::pin(async move {
            ensure_uncompressed(self.type_name(), source)?;
            let mut builder = ParquetRecordBatchStreamBuilder::new(source.open().await?)
                .await?
                .with_batch_size(options.batch_size.max(1));
            if let Some(indices) = options.column_indices(builder.schema()) {
                let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
                builder = builder.with_projection(mask);
            }
            let stream = builder.build()?;
            Ok(stream.map_err(DatasetError::from).boxed())
        })
    }

    fn make_writer(
        &self,
        destination: OutputFile,
        schema: SchemaRef,
        options: &FileWriteOptions,
    ) -> Result<Box<dyn FileWriter>> {
        let FileWriteOptions::Parquet(properties) = options else {
            return Err(DatasetError::invalid_argument(
                "parquet writer requires parquet write options",
            ));
        };
        let inner = AsyncArrowWriter::try_new(destination, schema, Some(properties.clone()))?;
        Ok(Box::new(ParquetFileWriter { inner }))
    }

    fn default_write_options(&self) -> FileWriteOptions {
        FileWriteOptions::Parquet(self.properties.clone().unwrap_or_default())
    }
}

struct ParquetFileWriter {
    inner: AsyncArrowWriter<OutputFile>,
}

impl FileWriter for ParquetFileWriter {
    fn write<'a>(&'a mut self, batch: &'a RecordBatch) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.write(batch).await?;
            Ok(())
        })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.flush().await?;
            Ok(())
        })
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.inner.close().await?;
            Ok(())
        })
    }

    fn bytes_written(&self) -> u64 {
        self.inner.bytes_written() as u64
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{Int32Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use futures_util::TryStreamExt;

    use super::*;
    use crate::{
        expr::Predicate,
        fs::{FileSystem, MemoryFileSystem},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn write_then_scan_projected_columns() {
        let fs = Arc::new(MemoryFileSystem::new());
        let format = ParquetFormat::default();
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap();

        let output = fs.open_output("data/0.parquet").await.unwrap();
        let mut writer = format
            .make_writer(output, schema.clone(), &format.default_write_options())
            .unwrap();
        writer.write(&batch).await.unwrap();
        writer.flush().await.unwrap();
        assert!(writer.bytes_written() > 0);
        writer.finish().await.unwrap();

        let source = FileSource::from_path("data/0.parquet", fs.clone());
        assert!(format.is_supported(&source).await.unwrap());
        assert_eq!(format.inspect(&source).await.unwrap(), schema);

        let options = FormatScanOptions {
            columns: Some(vec!["name".into()]),
            filter: Predicate::always_true(),
            batch_size: 2,
        };
        let batches: Vec<RecordBatch> = format
            .scan_batches(&source, options)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].num_columns(), 1);
        assert_eq!(batches[0].schema().field(0).name(), "name");

        let garbage = FileSource::from_buffer(b"not parquet".to_vec());
        assert!(!format.is_supported(&garbage).await.unwrap());
    }
}
