//! Threaded scan: a sliding window of fragment producers feeding one channel.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{
    sequencer::{Gate, Sequencer},
    BatchHook, BatchOrdinal, TaggedBatch, TaggedStream,
};
use crate::{
    dataset::{Fragment, FragmentIter, FragmentScanOptions},
    error::{DatasetError, Result},
    executor::Executor,
    observability::{log_debug, log_warn},
};

enum Item {
    Batch(TaggedBatch),
    FragmentEnd { fragment: usize, batches: usize },
}

pub(crate) struct Pipeline {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) fragments: FragmentIter,
    pub(crate) options: FragmentScanOptions,
    pub(crate) hook: Option<BatchHook>,
    pub(crate) fragment_readahead: usize,
    pub(crate) batch_readahead: usize,
    pub(crate) preserve_order: bool,
}

impl Pipeline {
    /// Starts the producers and returns the consumer side.
    ///
    /// Dropping the returned stream cancels every producer.
    pub(crate) fn spawn(self) -> TaggedStream {
        let Pipeline {
            executor,
            fragments,
            options,
            hook,
            fragment_readahead,
            batch_readahead,
            preserve_order,
        } = self;

        let cancel = CancellationToken::new();
        let (tx, rx) = flume::bounded::<Result<Item>>(batch_readahead.max(1));
        let (gate_tx, gate) = if preserve_order {
            let (gate_tx, gate) = Gate::new();
            (Some(gate_tx), gate)
        } else {
            (None, Gate::open())
        };

        let launcher = {
            let cancel = cancel.clone();
            let spawner = executor.clone();
            async move {
                let window = stream::iter(fragments.enumerate())
                    .map(|(index, fragment)| {
                        let producer = Producer {
                            index,
                            fragment,
                            options: options.clone(),
                            hook: hook.clone(),
                            tx: tx.clone(),
                            gate: gate.clone(),
                            cancel: cancel.clone(),
                        };
                        let spawner = spawner.clone();
                        let mut gate = gate.clone();
                        async move {
                            gate.admit(index).await;
                            let (done_tx, done_rx) = oneshot::channel();
                            spawner.spawn(Box::pin(async move {
                                producer.run().await;
                                let _ = done_tx.send(());
                            }));
                            let _ = done_rx.await;
                        }
                    })
                    .buffer_unordered(fragment_readahead.max(1))
                    .for_each(|()| async {});
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = window => {}
                }
            }
        };
        executor.spawn(Box::pin(launcher));

        let capacity = fragment_readahead.max(1) * batch_readahead.max(1);
        let guard = cancel.drop_guard();
        Box::pin(async_stream::stream! {
            let _guard = guard;
            let mut sequencer = gate_tx.map(|gate_tx| Sequencer::new(capacity, gate_tx));
            while let Ok(item) = rx.recv_async().await {
                let released = match (item, sequencer.as_mut()) {
                    (Err(err), _) => {
                        yield Err(err);
                        return;
                    }
                    (Ok(Item::Batch(batch)), None) => vec![batch],
                    (Ok(Item::FragmentEnd { .. }), None) => Vec::new(),
                    (Ok(Item::Batch(batch)), Some(sequencer)) => sequencer.push(batch),
                    (Ok(Item::FragmentEnd { fragment, batches }), Some(sequencer)) => {
                        sequencer.end_fragment(fragment, batches)
                    }
                };
                for batch in released {
                    yield Ok(batch);
                }
            }
            if let Some(sequencer) = sequencer {
                if sequencer.buffered() > 0 {
                    log_warn!(
                        component = "scan",
                        event = "sequencer_stranded",
                        buffered = sequencer.buffered(),
                    );
                    yield Err(DatasetError::Cancelled);
                }
            }
        })
    }
}

struct Producer {
    index: usize,
    fragment: Fragment,
    options: FragmentScanOptions,
    hook: Option<BatchHook>,
    tx: flume::Sender<Result<Item>>,
    gate: Gate,
    cancel: CancellationToken,
}

impl Producer {
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = self.produce() => outcome,
        };
        if let Err(err) = outcome {
            log_warn!(
                component = "scan",
                event = "fragment_failed",
                fragment = %self.fragment.describe(),
                error = %err,
            );
            let _ = self.tx.send_async(Err(err)).await;
            cancel.cancel();
        }
    }

    async fn produce(&mut self) -> Result<()> {
        log_debug!(
            component = "scan",
            event = "fragment_started",
            fragment_index = self.index,
            fragment = %self.fragment.describe(),
        );
        let mut batches = self.fragment.scan_batches(&self.options).await?;
        let mut emitted = 0;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            if batch.num_rows() == 0 {
                continue;
            }
            let ordinal = BatchOrdinal {
                fragment: self.index,
                batch: emitted,
            };
            emitted += 1;
            let batch = match &self.hook {
                Some(hook) => hook(ordinal, batch).await?,
                None => batch,
            };
            self.gate.admit(self.index).await;
            let item = Item::Batch(TaggedBatch {
                ordinal,
                fragment: self.fragment.clone(),
                batch,
            });
            if self.tx.send_async(Ok(item)).await.is_err() {
                return Ok(());
            }
        }
        let end = Item::FragmentEnd {
            fragment: self.index,
            batches: emitted,
        };
        let _ = self.tx.send_async(Ok(end)).await;
        Ok(())
    }
}
