mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use arrow::{
    array::{Int32Array, RecordBatch},
    datatypes::{DataType, Field, Schema, SchemaRef},
};
use common::{counted_jitter, jitter};
use futures::{future::BoxFuture, TryStreamExt};
use tonbo_dataset::{BatchHook, BatchOrdinal, Dataset, Result, ScanOptions, TaggedBatch};

const FRAGMENTS: i32 = 8;
const ROWS_PER_FRAGMENT: i32 = 12;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]))
}

fn dataset() -> Dataset {
    let batches = (0..FRAGMENTS)
        .map(|fragment| {
            let ids: Vec<i32> = (0..ROWS_PER_FRAGMENT)
                .map(|row| fragment * ROWS_PER_FRAGMENT + row)
                .collect();
            RecordBatch::try_new(schema(), vec![Arc::new(Int32Array::from(ids))])
                .expect("record batch")
        })
        .collect();
    Dataset::in_memory(schema(), batches).expect("dataset")
}

fn options() -> ScanOptions {
    ScanOptions::default()
        .with_batch_size(4)
        .with_fragment_readahead(4)
        .with_batch_readahead(2)
}

async fn ordinals(options: ScanOptions, seed: u64) -> Vec<BatchOrdinal> {
    let scanner = dataset()
        .scanner(options)
        .expect("scanner")
        .with_batch_hook(jitter(seed));
    let tagged: Vec<TaggedBatch> = scanner
        .scan_tagged()
        .expect("scan")
        .try_collect()
        .await
        .expect("collect");
    tagged.into_iter().map(|batch| batch.ordinal).collect()
}

fn expected() -> Vec<BatchOrdinal> {
    let batches = (ROWS_PER_FRAGMENT as usize).div_ceil(4);
    (0..FRAGMENTS as usize)
        .flat_map(|fragment| (0..batches).map(move |batch| BatchOrdinal { fragment, batch }))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn preserve_order_is_always_ordered() {
    for seed in 0..5 {
        let seen = ordinals(options().with_preserve_order(true), seed).await;
        assert_eq!(seen, expected(), "seed {seed}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_reorder_buffer_still_orders() {
    let options = options()
        .with_preserve_order(true)
        .with_fragment_readahead(3)
        .with_batch_readahead(1);
    let seen = ordinals(options, 42).await;
    assert_eq!(seen, expected());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unordered_scan_reorders_under_delay() {
    let mut reordered = false;
    for seed in 0..10 {
        let seen = ordinals(options(), seed).await;
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(sorted, expected(), "every batch arrives exactly once");

        for fragment in 0..FRAGMENTS as usize {
            let within: Vec<usize> = seen
                .iter()
                .filter(|ordinal| ordinal.fragment == fragment)
                .map(|ordinal| ordinal.batch)
                .collect();
            assert!(within.windows(2).all(|pair| pair[0] < pair[1]));
        }
        if seen != expected() {
            reordered = true;
            break;
        }
    }
    assert!(reordered, "delayed first fragment never let another fragment overtake it");
}

#[tokio::test(flavor = "multi_thread")]
async fn sequential_scan_is_deterministic() {
    let options = options().with_use_threads(false);
    let first = ordinals(options.clone(), 1).await;
    let second = ordinals(options, 2).await;
    assert_eq!(first, expected());
    assert_eq!(first, second);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_stream_stops_producers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let scanner = dataset()
        .scanner(options().with_preserve_order(true))
        .expect("scanner")
        .with_batch_hook(counted_jitter(3, calls.clone()));
    let mut stream = scanner.scan_tagged().expect("scan");
    let first = stream.try_next().await.expect("first batch").expect("some batch");
    assert_eq!(first.ordinal, BatchOrdinal { fragment: 0, batch: 0 });
    drop(stream);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), settled, "producers kept running");
    assert!(
        settled < expected().len(),
        "{settled} hook calls for {} batches",
        expected().len()
    );

    let rows = scanner.count_rows().await.expect("count");
    assert_eq!(rows, (FRAGMENTS * ROWS_PER_FRAGMENT) as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fragment_window_bounds_concurrent_producers() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let hook: BatchHook = {
        let active = active.clone();
        let peak = peak.clone();
        Arc::new(
            move |_: BatchOrdinal, batch: RecordBatch| -> BoxFuture<'static, Result<RecordBatch>> {
                let active = active.clone();
                let peak = peak.clone();
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(batch)
                })
            },
        )
    };
    for preserve_order in [false, true] {
        peak.store(0, Ordering::SeqCst);
        let scanner = dataset()
            .scanner(
                options()
                    .with_fragment_readahead(3)
                    .with_batch_readahead(4)
                    .with_preserve_order(preserve_order),
            )
            .expect("scanner")
            .with_batch_hook(hook.clone());
        let rows = scanner.count_rows().await.expect("count");
        assert_eq!(rows, (FRAGMENTS * ROWS_PER_FRAGMENT) as usize);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{peak} fragments in flight with a window of 3");
        assert!(peak >= 2, "fragments never overlapped");
    }
}
