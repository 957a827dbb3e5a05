use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use arrow::{array::RecordBatch, compute::concat_batches, datatypes::SchemaRef};
use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;

use super::{
    registry::{LaneClosed, PartitionDir},
    ExistingDataBehavior, WriteContext, WrittenFile, ORDINAL_PLACEHOLDER,
};
use crate::{
    error::{DatasetError, Result},
    format::FileWriter,
    fs::{join_path, OutputFile},
    observability::log_debug,
    partition::PartitionKey,
};

pin_project! {
    /// Output handle that counts the bytes handed to the destination.
    struct CountingOutput {
        #[pin]
        inner: OutputFile,
        written: Arc<AtomicU64>,
    }
}

impl AsyncWrite for CountingOutput {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        let poll = this.inner.poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = &poll {
            this.written.fetch_add(*written as u64, Ordering::Relaxed);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

struct OpenFile {
    writer: Box<dyn FileWriter>,
    path: String,
    rows: usize,
    written: Arc<AtomicU64>,
}

/// Writer for one partition directory.
///
/// Rows are staged until `min_rows_per_group` accumulate, then written in
/// groups of at most `max_rows_per_group`; a file is closed once it reaches
/// the row or byte limit and the next group opens a new one.
pub(crate) struct Lane {
    key: PartitionKey,
    dir: String,
    schema: SchemaRef,
    partition: Arc<PartitionDir>,
    context: Arc<WriteContext>,
    staged: Vec<RecordBatch>,
    staged_rows: usize,
    file: Option<OpenFile>,
}

impl Lane {
    pub(crate) fn new(
        key: PartitionKey,
        dir: String,
        schema: SchemaRef,
        partition: Arc<PartitionDir>,
        context: Arc<WriteContext>,
    ) -> Self {
        Self {
            key,
            dir,
            schema,
            partition,
            context,
            staged: Vec::new(),
            staged_rows: 0,
            file: None,
        }
    }

    /// Writes everything sent on `rx`, after `evicted` (the lane whose slot
    /// this one took) has closed.
    pub(crate) async fn run(
        mut self,
        rx: flume::Receiver<RecordBatch>,
        evicted: Option<LaneClosed>,
    ) {
        let cancel = self.context.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(DatasetError::Cancelled),
            outcome = async {
                if let Some(evicted) = evicted {
                    let _ = evicted.await;
                }
                self.prepare().await?;
                self.drive(&rx).await
            } => outcome,
        };
        if let Err(err) = outcome {
            if let Some(file) = self.file.take() {
                let _ = file.writer.finish().await;
            }
            self.context.fail(err);
        }
    }

    async fn prepare(&mut self) -> Result<()> {
        let context = &self.context;
        let dir = &self.dir;
        let key = &self.key;
        self.partition
            .prepared
            .get_or_try_init(|| async move {
                let filesystem = &context.options.filesystem;
                if context.options.existing_data_behavior
                    == ExistingDataBehavior::DeleteMatchingPartitions
                    && filesystem.exists(dir).await?
                {
                    log_debug!(
                        component = "write",
                        event = "partition_cleared",
                        partition = %key,
                    );
                    filesystem.delete_dir_contents(dir).await?;
                }
                filesystem.create_dir(dir).await
            })
            .await?;
        Ok(())
    }

    async fn drive(&mut self, rx: &flume::Receiver<RecordBatch>) -> Result<()> {
        let threshold = self.context.options.min_rows_per_group.max(1);
        while let Ok(batch) = rx.recv_async().await {
            self.staged_rows += batch.num_rows();
            self.staged.push(batch);
            while self.staged_rows >= threshold {
                self.write_group().await?;
            }
        }
        while self.staged_rows > 0 {
            self.write_group().await?;
        }
        if let Some(file) = self.file.take() {
            self.close(file).await?;
        }
        Ok(())
    }

    async fn write_group(&mut self) -> Result<()> {
        let options = &self.context.options;
        let file_rows = self.file.as_ref().map_or(0, |file| file.rows);
        let take = self
            .staged_rows
            .min(options.max_rows_per_group)
            .min(options.max_rows_per_file - file_rows);
        let group = self.take_staged(take)?;

        let mut file = match self.file.take() {
            Some(file) => file,
            None => self.open().await?,
        };
        let outcome = match file.writer.write(&group).await {
            Ok(()) => file.writer.flush().await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            let _ = file.writer.finish().await;
            return Err(err);
        }
        file.rows += take;

        let options = &self.context.options;
        let full = file.rows >= options.max_rows_per_file
            || options
                .max_bytes_per_file
                .is_some_and(|limit| file.writer.bytes_written() >= limit);
        if full {
            self.close(file).await
        } else {
            self.file = Some(file);
            Ok(())
        }
    }

    fn take_staged(&mut self, rows: usize) -> Result<RecordBatch> {
        let merged = if self.staged.len() == 1 {
            self.staged.remove(0)
        } else {
            let merged = concat_batches(&self.schema, &self.staged)?;
            self.staged.clear();
            merged
        };
        let rest = merged.num_rows() - rows;
        if rest > 0 {
            self.staged.push(merged.slice(rows, rest));
        }
        self.staged_rows -= rows;
        Ok(merged.slice(0, rows))
    }

    async fn open(&mut self) -> Result<OpenFile> {
        let options = &self.context.options;
        let ordinal = self.partition.ordinal.fetch_add(1, Ordering::Relaxed);
        let name = options
            .basename_template
            .replace(ORDINAL_PLACEHOLDER, &ordinal.to_string());
        let path = join_path(&self.dir, &name);
        let written = Arc::new(AtomicU64::new(0));
        let output: OutputFile = Box::new(CountingOutput {
            inner: options.filesystem.open_output(&path).await?,
            written: written.clone(),
        });
        let writer =
            options
                .format
                .make_writer(output, self.schema.clone(), &self.context.file_options)?;
        log_debug!(
            component = "write",
            event = "file_opened",
            partition = %self.key,
            path = %path,
            file_ordinal = ordinal,
        );
        Ok(OpenFile {
            writer,
            path,
            rows: 0,
            written,
        })
    }

    async fn close(&mut self, file: OpenFile) -> Result<()> {
        let OpenFile {
            writer,
            path,
            rows,
            written,
        } = file;
        writer.finish().await?;
        let bytes = written.load(Ordering::Relaxed);
        log_debug!(
            component = "write",
            event = "file_closed",
            partition = %self.key,
            path = %path,
            rows = rows,
            bytes = bytes,
        );
        self.context.record(WrittenFile {
            path,
            partition: self.key.clone(),
            rows,
            bytes,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::fs::{FileSystem, MemoryFileSystem};

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn lane_task_is_send() {
        let _ = |lane: Lane, rx: flume::Receiver<RecordBatch>, evicted: Option<LaneClosed>| {
            let task = lane.run(rx, evicted);
            assert_send(&task);
        };
    }

    #[tokio::test]
    async fn counting_output_tracks_bytes() {
        let fs = MemoryFileSystem::new();
        let written = Arc::new(AtomicU64::new(0));
        let mut output = CountingOutput {
            inner: fs.open_output("a/0.bin").await.unwrap(),
            written: written.clone(),
        };
        output.write_all(b"hello").await.unwrap();
        output.write_all(b"!").await.unwrap();
        output.shutdown().await.unwrap();
        assert_eq!(written.load(Ordering::Relaxed), 6);
        assert_eq!(fs.get("a/0.bin").unwrap().as_ref(), b"hello!");
    }
}
