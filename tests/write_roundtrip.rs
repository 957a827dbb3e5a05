mod common;

use std::sync::Arc;

use arrow::{
    array::{Int32Array, RecordBatch, StringArray},
    datatypes::{DataType, Field, Schema, SchemaRef},
};
use common::{field_names, i32_column, jitter, str_column};
use futures::TryStreamExt;
use tonbo_dataset::{
    format,
    fs::{FileSelector, FileSystem, LocalFileSystem, MemoryFileSystem},
    write_dataset, write_tee, ColumnRef, Dataset, DatasetFactory, ExistingDataBehavior,
    FactoryOptions, FinishOptions, HivePartitioning, Partitioning, Predicate, ScanOptions,
    WriteOptions,
};

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("state", DataType::Utf8, true),
    ]))
}

fn rows(ids: Vec<i32>, states: Vec<&str>) -> RecordBatch {
    RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int32Array::from(ids)),
            Arc::new(StringArray::from(states)),
        ],
    )
    .expect("record batch")
}

fn state_partitioning() -> Arc<dyn Partitioning> {
    Arc::new(HivePartitioning::new(Arc::new(Schema::new(vec![
        Field::new("state", DataType::Utf8, true),
    ]))))
}

#[tokio::test(flavor = "multi_thread")]
async fn write_projected_ipc_into_memory() {
    let fs = Arc::new(MemoryFileSystem::new());
    let dataset = Dataset::in_memory(schema(), vec![rows(vec![1, 2, 3], vec!["a", "b", "c"])])
        .expect("dataset");
    let scanner = dataset
        .scanner(ScanOptions::default().with_projection(["id"]))
        .expect("scanner");

    let summary = write_dataset(
        &scanner,
        WriteOptions::new(fs.clone(), "root", format::ipc()).with_basename_template("{i}.feather"),
    )
    .await
    .expect("write");

    assert_eq!(summary.paths(), vec!["root/0.feather"]);
    let factory = DatasetFactory::from_paths(
        fs.clone(),
        ["root/0.feather"],
        format::ipc(),
        FactoryOptions::default(),
    )
    .await
    .expect("factory");
    let written = factory.finish(FinishOptions::default()).await.expect("finish");
    assert_eq!(field_names(written.schema()), vec!["id"]);
    let batches = written
        .scanner(ScanOptions::default())
        .expect("scanner")
        .to_batches()
        .await
        .expect("scan");
    assert_eq!(i32_column(&batches, "id"), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn hive_split_round_trips() {
    let fs = Arc::new(MemoryFileSystem::new());
    let dataset = Dataset::in_memory(
        schema(),
        vec![
            rows(vec![1, 2, 3, 4], vec!["NY", "CA", "NY", "TX"]),
            rows(vec![5, 6], vec!["CA", "NY"]),
        ],
    )
    .expect("dataset");
    let scanner = dataset
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner");
    let summary = write_dataset(
        &scanner,
        WriteOptions::new(fs.clone(), "out", format::ipc())
            .with_partitioning(state_partitioning())
            .with_preserve_order(true),
    )
    .await
    .expect("write");
    assert_eq!(
        summary.paths(),
        vec![
            "out/state=CA/part-0.arrow",
            "out/state=NY/part-0.arrow",
            "out/state=TX/part-0.arrow",
        ]
    );
    let ny = summary
        .files
        .iter()
        .find(|file| file.partition.path == "state=NY")
        .expect("NY file");
    assert_eq!(ny.rows, 3);

    let factory = DatasetFactory::from_selector(
        fs.clone(),
        &FileSelector::recursive("out"),
        format::ipc(),
        FactoryOptions::default().with_partitioning(state_partitioning()),
    )
    .await
    .expect("factory");
    let reread = factory.finish(FinishOptions::default()).await.expect("finish");
    assert_eq!(field_names(reread.schema()), vec!["id", "state"]);

    let batches = reread
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner")
        .to_batches()
        .await
        .expect("scan");
    assert_eq!(i32_column(&batches, "id"), vec![2, 5, 1, 3, 6, 4]);
    assert_eq!(
        str_column(&batches, "state"),
        ["CA", "CA", "NY", "NY", "NY", "TX"]
            .iter()
            .map(|state| Some(state.to_string()))
            .collect::<Vec<_>>()
    );

    let ny_only = reread
        .scanner(
            ScanOptions::default()
                .with_preserve_order(true)
                .with_filter(Predicate::eq(ColumnRef::new("state"), "NY")),
        )
        .expect("scanner");
    let fragments: Vec<String> = reread
        .get_fragments(Some(
            &Predicate::eq(ColumnRef::new("state"), "NY")
                .bind(reread.schema())
                .expect("bind"),
        ))
        .map(|fragment| fragment.describe())
        .collect();
    assert_eq!(fragments, vec!["out/state=NY/part-0.arrow"]);
    let batches = ny_only.to_batches().await.expect("scan");
    assert_eq!(i32_column(&batches, "id"), vec![1, 3, 6]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rotation_and_eviction_keep_ordinals_monotonic() {
    let fs = Arc::new(MemoryFileSystem::new());
    let states = ["A", "B", "C"];
    let batches: Vec<RecordBatch> = (0..6)
        .map(|round| {
            let ids: Vec<i32> = (0..5).map(|row| round * 5 + row).collect();
            rows(ids, vec![states[round as usize % 3]; 5])
        })
        .collect();
    let dataset = Dataset::in_memory(schema(), batches).expect("dataset");
    let scanner = dataset
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner");

    let summary = write_dataset(
        &scanner,
        WriteOptions::new(fs.clone(), "out", format::ipc())
            .with_partitioning(state_partitioning())
            .with_basename_template("chunk-{i}.arrow")
            .with_max_rows_per_group(4)
            .with_max_rows_per_file(4)
            .with_max_open_files(1)
            .with_preserve_order(true),
    )
    .await
    .expect("write");

    assert_eq!(summary.total_rows(), 30);
    assert!(summary.files.iter().all(|file| file.rows <= 4));
    for state in states {
        let dir = format!("out/state={state}/");
        let mut ordinals: Vec<u32> = summary
            .paths()
            .into_iter()
            .filter_map(|path| path.strip_prefix(&dir))
            .map(|name| {
                name.trim_start_matches("chunk-")
                    .trim_end_matches(".arrow")
                    .parse()
                    .expect("ordinal")
            })
            .collect();
        ordinals.sort_unstable();
        let expected: Vec<u32> = (0..ordinals.len() as u32).collect();
        assert_eq!(ordinals, expected, "{state}");
        assert!(ordinals.len() >= 3, "{state} spans several files");
    }
    assert_eq!(fs.file_paths().len(), summary.files.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn min_rows_per_group_batches_small_inputs() {
    let fs = Arc::new(MemoryFileSystem::new());
    let batches: Vec<RecordBatch> = (0..10).map(|id| rows(vec![id], vec!["X"])).collect();
    let dataset = Dataset::in_memory(schema(), batches).expect("dataset");
    let scanner = dataset
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner");
    let summary = write_dataset(
        &scanner,
        WriteOptions::new(fs.clone(), "out", format::ipc())
            .with_min_rows_per_group(4)
            .with_max_rows_per_group(4)
            .with_max_rows_per_file(8)
            .with_preserve_order(true),
    )
    .await
    .expect("write");
    let per_file: Vec<usize> = summary.files.iter().map(|file| file.rows).collect();
    assert_eq!(per_file, vec![8, 2]);

    let factory = DatasetFactory::from_selector(
        fs.clone(),
        &FileSelector::recursive("out"),
        format::ipc(),
        FactoryOptions::default(),
    )
    .await
    .expect("factory");
    let reread = factory.finish(FinishOptions::default()).await.expect("finish");
    let batches = reread
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner")
        .to_batches()
        .await
        .expect("scan");
    assert_eq!(i32_column(&batches, "id"), (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn parquet_on_local_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(dir.path()));
    let dataset = Dataset::in_memory(
        schema(),
        vec![rows(vec![10, 20, 30], vec!["WA", "OR", "WA"])],
    )
    .expect("dataset");
    let scanner = dataset
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner");
    let options = WriteOptions::new(fs.clone(), "warehouse", format::parquet())
        .with_partitioning(state_partitioning())
        .with_preserve_order(true);
    let summary = write_dataset(&scanner, options.clone())
        .await
        .expect("write");
    assert_eq!(
        summary.paths(),
        vec![
            "warehouse/state=OR/part-0.parquet",
            "warehouse/state=WA/part-0.parquet",
        ]
    );
    assert!(dir.path().join("warehouse/state=WA/part-0.parquet").exists());

    let err = write_dataset(&scanner, options.clone())
        .await
        .expect_err("base directory already holds data");
    assert_eq!(err.kind(), tonbo_dataset::ErrorKind::InvalidArgument);

    let overwrite = write_dataset(
        &scanner,
        options.with_existing_data_behavior(ExistingDataBehavior::DeleteMatchingPartitions),
    )
    .await
    .expect("overwrite");
    assert_eq!(overwrite.paths(), summary.paths());

    let factory = DatasetFactory::from_selector(
        fs.clone(),
        &FileSelector::recursive("warehouse"),
        format::parquet(),
        FactoryOptions::default().with_partitioning(state_partitioning()),
    )
    .await
    .expect("factory");
    let reread = factory.finish(FinishOptions::default()).await.expect("finish");
    let batches = reread
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner")
        .to_batches()
        .await
        .expect("scan");
    assert_eq!(i32_column(&batches, "id"), vec![20, 10, 30]);
}

fn sequence(fragments: i32, rows: i32) -> Dataset {
    let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
    let batches = (0..fragments)
        .map(|fragment| {
            let ids: Vec<i32> = (0..rows).map(|row| fragment * rows + row).collect();
            RecordBatch::try_new(schema.clone(), vec![Arc::new(Int32Array::from(ids))])
                .expect("record batch")
        })
        .collect();
    Dataset::in_memory(schema, batches).expect("dataset")
}

async fn reread_ids(fs: Arc<MemoryFileSystem>, base_dir: &str) -> Vec<i32> {
    let factory = DatasetFactory::from_selector(
        fs,
        &FileSelector::recursive(base_dir),
        format::ipc(),
        FactoryOptions::default(),
    )
    .await
    .expect("factory");
    let batches = factory
        .finish(FinishOptions::default())
        .await
        .expect("finish")
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner")
        .to_batches()
        .await
        .expect("scan");
    i32_column(&batches, "id")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delayed_scan_keeps_order_through_the_write() {
    let dataset = sequence(8, 12);
    let all: Vec<i32> = (0..96).collect();
    for seed in 0..3 {
        let fs = Arc::new(MemoryFileSystem::new());
        let scan = ScanOptions::default()
            .with_batch_size(4)
            .with_fragment_readahead(4)
            .with_batch_readahead(2);

        let ordered = dataset
            .scanner(scan.clone().with_preserve_order(true))
            .expect("scanner")
            .with_batch_hook(jitter(seed));
        write_dataset(
            &ordered,
            WriteOptions::new(fs.clone(), "ordered", format::ipc())
                .with_preserve_order(true)
                .with_write_concurrency(4),
        )
        .await
        .expect("ordered write");
        let ids = reread_ids(fs.clone(), "ordered").await;
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]), "seed {seed}");
        assert_eq!(ids, all);

        let unordered = dataset
            .scanner(scan)
            .expect("scanner")
            .with_batch_hook(jitter(seed));
        write_dataset(
            &unordered,
            WriteOptions::new(fs.clone(), "unordered", format::ipc()).with_write_concurrency(4),
        )
        .await
        .expect("unordered write");
        let mut ids = reread_ids(fs, "unordered").await;
        ids.sort_unstable();
        assert_eq!(ids, all, "seed {seed}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn tee_yields_what_lands_on_disk() {
    let fs = Arc::new(MemoryFileSystem::new());
    let scanner = sequence(3, 5)
        .scanner(ScanOptions::default().with_preserve_order(true))
        .expect("scanner");
    let teed: Vec<RecordBatch> = write_tee(
        scanner.projected_schema().clone(),
        scanner.scan_batches().expect("scan"),
        WriteOptions::new(fs.clone(), "tee", format::ipc()).with_preserve_order(true),
    )
    .try_collect()
    .await
    .expect("tee");
    assert_eq!(teed.len(), 3);
    let teed_ids = i32_column(&teed, "id");
    assert_eq!(teed_ids, (0..15).collect::<Vec<_>>());
    assert_eq!(reread_ids(fs, "tee").await, teed_ids);
}
