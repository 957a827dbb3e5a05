use std::{
    collections::HashMap,
    sync::{atomic::AtomicU32, Arc},
};

use arrow::{array::RecordBatch, datatypes::SchemaRef};
use tokio::sync::oneshot;

use super::{lane::Lane, WriteContext};
use crate::{fs::join_path, observability::log_debug, partition::PartitionKey};

const LANE_QUEUE: usize = 4;

/// Resolves when a lane has closed its file.
pub(crate) type LaneClosed = oneshot::Receiver<()>;

/// Per-partition state that outlives the lanes writing into it.
#[derive(Default)]
pub(crate) struct PartitionDir {
    /// Next file ordinal.
    pub(crate) ordinal: AtomicU32,
    /// Set once the directory has been cleared and created.
    pub(crate) prepared: async_lock::OnceCell<()>,
}

struct LaneHandle {
    tx: flume::Sender<RecordBatch>,
    closed: LaneClosed,
    last_used: u64,
}

/// Open writer lanes keyed by partition directory.
///
/// File ordinals outlive lanes so a partition reopened after eviction keeps
/// counting where it stopped. The registry never touches the filesystem; a
/// new lane prepares its directory on its own task.
pub(crate) struct Registry {
    lanes: HashMap<String, LaneHandle>,
    partitions: HashMap<String, Arc<PartitionDir>>,
    max_open: usize,
    clock: u64,
}

impl Registry {
    pub(crate) fn new(max_open: usize) -> Self {
        Self {
            lanes: HashMap::new(),
            partitions: HashMap::new(),
            max_open: max_open.max(1),
            clock: 0,
        }
    }

    /// Returns the input queue of the lane for `key`, opening it if needed.
    ///
    /// A lane opened in place of an evicted one waits for the evicted lane to
    /// close before it touches the filesystem.
    pub(crate) fn acquire(
        &mut self,
        key: &PartitionKey,
        schema: SchemaRef,
        context: &Arc<WriteContext>,
    ) -> flume::Sender<RecordBatch> {
        self.clock += 1;
        if let Some(lane) = self.lanes.get_mut(&key.path) {
            lane.last_used = self.clock;
            return lane.tx.clone();
        }

        let evicted = if self.lanes.len() >= self.max_open {
            self.evict_least_recent()
        } else {
            None
        };

        let dir = join_path(&context.options.base_dir, &key.path);
        let partition = self.partitions.entry(key.path.clone()).or_default().clone();
        let (tx, rx) = flume::bounded(LANE_QUEUE);
        let (closed_tx, closed) = oneshot::channel();
        let lane = Lane::new(key.clone(), dir, schema, partition, context.clone());
        context.executor.spawn(Box::pin(async move {
            lane.run(rx, evicted).await;
            let _ = closed_tx.send(());
        }));
        log_debug!(
            component = "write",
            event = "lane_opened",
            partition = %key,
            open_lanes = self.lanes.len() + 1,
        );
        self.lanes.insert(
            key.path.clone(),
            LaneHandle {
                tx: tx.clone(),
                closed,
                last_used: self.clock,
            },
        );
        tx
    }

    fn evict_least_recent(&mut self) -> Option<LaneClosed> {
        let path = self
            .lanes
            .iter()
            .min_by_key(|(_, lane)| lane.last_used)
            .map(|(path, _)| path.clone())?;
        let lane = self.lanes.remove(&path)?;
        log_debug!(component = "write", event = "lane_evicted", partition = %path);
        Some(lane.closed)
    }

    /// Closes every lane's input and returns their completions.
    pub(crate) fn close_all(&mut self) -> Vec<LaneClosed> {
        self.lanes.drain().map(|(_, lane)| lane.closed).collect()
    }
}
