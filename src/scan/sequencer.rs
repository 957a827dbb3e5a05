//! Reorder buffer restoring ordinal order across concurrently scanned fragments.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::watch;

use super::{BatchOrdinal, TaggedBatch};
use crate::observability::log_debug;

/// Cooperative pause signal shared by the sequencer and fragment producers.
///
/// While paused the gate holds the fragment the sequencer is waiting on;
/// producers of later fragments hold their batches until it reopens or the
/// awaited fragment moves past them.
#[derive(Clone, Debug)]
pub(crate) struct Gate {
    state: watch::Receiver<Option<usize>>,
}

impl Gate {
    pub(crate) fn new() -> (watch::Sender<Option<usize>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { state: rx })
    }

    /// Gate that never pauses.
    pub(crate) fn open() -> Self {
        let (_, gate) = Self::new();
        gate
    }

    /// Waits until producers of `fragment` may proceed.
    pub(crate) async fn admit(&mut self, fragment: usize) {
        // A dropped sender means the consumer is gone; cancellation handles shutdown.
        let _ = self
            .state
            .wait_for(|awaited| awaited.map_or(true, |awaited| fragment <= awaited))
            .await;
    }
}

/// Releases batches strictly in `(fragment, batch)` order.
#[derive(Debug)]
pub(crate) struct Sequencer {
    awaited: usize,
    next_batch: usize,
    buffer: BTreeMap<BatchOrdinal, TaggedBatch>,
    ended: HashMap<usize, usize>,
    capacity: usize,
    gate: watch::Sender<Option<usize>>,
}

impl Sequencer {
    pub(crate) fn new(capacity: usize, gate: watch::Sender<Option<usize>>) -> Self {
        Self {
            awaited: 0,
            next_batch: 0,
            buffer: BTreeMap::new(),
            ended: HashMap::new(),
            capacity: capacity.max(1),
            gate,
        }
    }

    /// Accepts an out-of-order batch and returns everything now releasable.
    pub(crate) fn push(&mut self, batch: TaggedBatch) -> Vec<TaggedBatch> {
        self.buffer.insert(batch.ordinal, batch);
        self.release()
    }

    /// Records that `fragment` produced `batches` batches in total.
    pub(crate) fn end_fragment(&mut self, fragment: usize, batches: usize) -> Vec<TaggedBatch> {
        self.ended.insert(fragment, batches);
        self.release()
    }

    /// Number of batches held back.
    pub(crate) fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn release(&mut self) -> Vec<TaggedBatch> {
        let mut ready = Vec::new();
        loop {
            let ordinal = BatchOrdinal {
                fragment: self.awaited,
                batch: self.next_batch,
            };
            if let Some(batch) = self.buffer.remove(&ordinal) {
                self.next_batch += 1;
                ready.push(batch);
                continue;
            }
            if self.ended.get(&self.awaited) == Some(&self.next_batch) {
                self.ended.remove(&self.awaited);
                self.awaited += 1;
                self.next_batch = 0;
                continue;
            }
            break;
        }
        self.publish();
        ready
    }

    fn publish(&self) {
        let desired = (self.buffer.len() >= self.capacity).then_some(self.awaited);
        self.gate.send_if_modified(|state| {
            if *state == desired {
                return false;
            }
            match desired {
                Some(awaited) => log_debug!(
                    component = "scan",
                    event = "sequencer_paused",
                    awaited_fragment = awaited,
                    buffered = self.buffer.len(),
                ),
                None => log_debug!(component = "scan", event = "sequencer_resumed"),
            }
            *state = desired;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{Int32Array, RecordBatch},
        datatypes::{DataType, Field, Schema},
    };

    use super::*;
    use crate::dataset::{Fragment, InMemoryFragment};
    use crate::expr::Predicate;

    fn tagged(fragment: usize, batch: usize) -> TaggedBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int32, false)]));
        let record = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int32Array::from(vec![batch as i32]))],
        )
        .unwrap();
        TaggedBatch {
            ordinal: BatchOrdinal { fragment, batch },
            fragment: Fragment::new(
                Arc::new(InMemoryFragment::new(schema, Vec::new())),
                Predicate::always_true(),
            ),
            batch: record,
        }
    }

    fn ordinals(batches: Vec<TaggedBatch>) -> Vec<(usize, usize)> {
        batches
            .into_iter()
            .map(|batch| (batch.ordinal.fragment, batch.ordinal.batch))
            .collect()
    }

    #[test]
    fn releases_in_ordinal_order() {
        let (tx, _gate) = Gate::new();
        let mut sequencer = Sequencer::new(16, tx);

        assert!(sequencer.push(tagged(1, 0)).is_empty());
        assert_eq!(ordinals(sequencer.push(tagged(0, 0))), vec![(0, 0)]);
        assert!(sequencer.end_fragment(1, 1).is_empty());
        assert_eq!(ordinals(sequencer.end_fragment(0, 1)), vec![(1, 0)]);
        assert_eq!(sequencer.buffered(), 0);
        assert_eq!(ordinals(sequencer.push(tagged(2, 0))), vec![(2, 0)]);
    }

    #[test]
    fn empty_fragments_are_skipped() {
        let (tx, _gate) = Gate::new();
        let mut sequencer = Sequencer::new(16, tx);
        assert!(sequencer.push(tagged(2, 0)).is_empty());
        assert!(sequencer.end_fragment(1, 0).is_empty());
        assert_eq!(ordinals(sequencer.end_fragment(0, 0)), vec![(2, 0)]);
    }

    #[tokio::test]
    async fn full_buffer_pauses_later_fragments() {
        let (tx, gate) = Gate::new();
        let mut sequencer = Sequencer::new(2, tx);
        sequencer.push(tagged(1, 0));
        sequencer.push(tagged(2, 0));
        assert_eq!(*gate.state.borrow(), Some(0));

        let mut awaited = gate.clone();
        tokio::time::timeout(std::time::Duration::from_millis(50), awaited.admit(0))
            .await
            .expect("the awaited fragment is never paused");

        let mut later = gate.clone();
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), later.admit(3)).await;
        assert!(blocked.is_err());

        sequencer.end_fragment(0, 0);
        assert_eq!(*gate.state.borrow(), None);
        later.admit(3).await;
    }
}
