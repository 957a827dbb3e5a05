#![deny(missing_docs)]
//! Partition-aware Arrow datasets for Tonbo.
//!
//! A [`Dataset`] is a schema plus a set of independently scannable
//! [`Fragment`]s, usually files laid out under partition directories such as
//! `year=2024/month=05/`. The crate discovers those files, prunes fragments
//! whose directory-encoded partition values contradict a filter, scans the
//! survivors concurrently with optional order preservation, and writes
//! record batch streams back into partitioned directories.
//!
//! ```ignore
//! let factory = DatasetFactory::from_selector(
//!     fs.clone(),
//!     &FileSelector::recursive("warehouse/events"),
//!     format::parquet(),
//!     FactoryOptions::default().with_partitioning(Arc::new(HivePartitioning::new(schema))),
//! )
//! .await?;
//! let dataset = factory.finish(FinishOptions::default()).await?;
//! let scanner = dataset.scanner(
//!     ScanOptions::default().with_filter(Predicate::eq(ColumnRef::new("year"), 2024)),
//! )?;
//! let batches = scanner.to_batches().await?;
//! ```
//!
//! Logging goes through `tracing` with target `tonbo_dataset`; the crate never
//! installs a subscriber.

mod observability;

/// Fragments, datasets, and file discovery.
pub mod dataset;
/// Error taxonomy.
pub mod error;
/// Worker pool abstraction for scan producers and writer lanes.
pub mod executor;
/// Predicate tree, binding, evaluation, and satisfiability checks.
pub mod expr;
/// File format codecs.
pub mod format;
/// Filesystem abstraction and byte sources.
pub mod fs;
/// Partitioning schemes and the pruning tree.
pub mod partition;
/// Scanner and scan pipeline.
pub mod scan;
/// Schema projection rules.
pub mod schema;
/// Partitioned dataset writer.
pub mod write;

pub use crate::{
    dataset::{
        Dataset, DatasetFactory, FactoryOptions, FinishOptions, Fragment, FragmentScan,
        FragmentScanOptions,
    },
    error::{DatasetError, ErrorKind, Result},
    expr::{ColumnRef, Predicate, ScalarValue},
    partition::{DirectoryPartitioning, HivePartitioning, PartitionTree, Partitioning},
    scan::{BatchHook, BatchOrdinal, ScanOptions, Scanner, TaggedBatch},
    write::{
        write_dataset, write_stream, write_tee, ExistingDataBehavior, WriteOptions, WriteSummary,
        WrittenFile,
    },
};
