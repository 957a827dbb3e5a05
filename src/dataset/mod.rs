//! Datasets and the fragments they are made of.
//!
//! A [`Dataset`] couples a declared schema and a root partition predicate with
//! a source of [`Fragment`]s: an eager list, a partition tree over files, or a
//! generator invoked on every enumeration.

mod factory;
mod fragment;

use std::{fmt, sync::Arc};

use arrow::{array::RecordBatch, datatypes::SchemaRef};

pub use self::{
    factory::{DatasetFactory, FactoryOptions, FinishOptions},
    fragment::{FileFragment, Fragment, FragmentScan, FragmentScanOptions, InMemoryFragment},
};
use crate::{
    error::Result,
    expr::{is_unsatisfiable, Predicate},
    format::FileFormat,
    fs::{FileSource, FileSystem},
    partition::PartitionTree,
    scan::{ScanOptions, Scanner},
    schema::check_projectable,
};

/// Iterator over fragments returned by [`Dataset::get_fragments`].
pub type FragmentIter = Box<dyn Iterator<Item = Fragment> + Send>;

/// Lazily produces the fragments of a dataset on each enumeration.
pub type FragmentGenerator = Arc<dyn Fn() -> FragmentIter + Send + Sync>;

#[derive(Clone)]
enum FragmentSource {
    List(Arc<[Fragment]>),
    Tree {
        tree: Arc<PartitionTree>,
        fragments: Arc<[Fragment]>,
    },
    Generator(FragmentGenerator),
}

/// Collection of fragments sharing one declared schema.
///
/// Cloning is cheap; clones share fragments and their memoized schemas.
#[derive(Clone)]
pub struct Dataset {
    schema: SchemaRef,
    root: Predicate,
    source: FragmentSource,
}

impl Dataset {
    /// Dataset with one fragment per batch.
    pub fn in_memory(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        let mut fragments = Vec::with_capacity(batches.len());
        for batch in batches {
            check_projectable(batch.schema().as_ref(), &schema)?;
            let physical = batch.schema();
            fragments.push(Fragment::with_physical_schema(
                Arc::new(InMemoryFragment::new(physical.clone(), vec![batch])),
                Predicate::always_true(),
                physical,
            ));
        }
        Ok(Self::from_fragments(
            schema,
            Predicate::always_true(),
            fragments,
        ))
    }

    /// Dataset over an eager fragment list.
    pub fn from_fragments(schema: SchemaRef, root: Predicate, fragments: Vec<Fragment>) -> Self {
        Self {
            schema,
            root,
            source: FragmentSource::List(fragments.into()),
        }
    }

    /// Dataset whose fragments are produced by `generator` on each enumeration.
    pub fn from_generator(
        schema: SchemaRef,
        root: Predicate,
        generator: FragmentGenerator,
    ) -> Self {
        Self {
            schema,
            root,
            source: FragmentSource::Generator(generator),
        }
    }

    /// Dataset over the file leaves of `tree`, read with `format`.
    pub fn from_file_tree(
        schema: SchemaRef,
        root: Predicate,
        format: Arc<dyn FileFormat>,
        filesystem: Arc<dyn FileSystem>,
        tree: PartitionTree,
    ) -> Self {
        let fragments: Vec<Fragment> = (0..tree.len())
            .filter_map(|index| {
                let path = tree.fragment_path(index)?;
                let partition = tree.partition_predicate(index)?;
                let source = FileSource::from_path(path, filesystem.clone());
                Some(Fragment::new(
                    Arc::new(FileFragment::new(source, format.clone())),
                    partition,
                ))
            })
            .collect();
        Self {
            schema,
            root,
            source: FragmentSource::Tree {
                tree: Arc::new(tree),
                fragments: fragments.into(),
            },
        }
    }

    /// Declared schema.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Predicate every row of the dataset satisfies.
    pub fn root_predicate(&self) -> &Predicate {
        &self.root
    }

    /// Fragments that may contain rows matching `predicate`.
    ///
    /// Only fragments whose partition predicate provably contradicts the
    /// filter are skipped; no data is read. `None` or an unbound predicate
    /// yields every fragment.
    pub fn get_fragments(&self, predicate: Option<&Predicate>) -> FragmentIter {
        let filter = match predicate {
            Some(predicate) if predicate.is_bound() && !predicate.is_trivially_true() => {
                predicate.clone()
            }
            _ => return self.all_fragments(),
        };
        let root = self.root.clone();
        match &self.source {
            FragmentSource::Tree { tree, fragments } => {
                let fragments = fragments.clone();
                let survivors = tree.prune(&filter, &root);
                Box::new(
                    survivors
                        .into_iter()
                        .map(move |index| fragments[index].clone()),
                )
            }
            _ => {
                if is_unsatisfiable(&filter, &root) {
                    return Box::new(std::iter::empty());
                }
                Box::new(self.all_fragments().filter(move |fragment| {
                    let guarantee = Predicate::and_distinct([
                        root.clone(),
                        fragment.partition_predicate().clone(),
                    ]);
                    !is_unsatisfiable(&filter, &guarantee)
                }))
            }
        }
    }

    fn all_fragments(&self) -> FragmentIter {
        match &self.source {
            FragmentSource::List(fragments) | FragmentSource::Tree { fragments, .. } => {
                let fragments = fragments.clone();
                Box::new((0..fragments.len()).map(move |index| fragments[index].clone()))
            }
            FragmentSource::Generator(generator) => generator(),
        }
    }

    /// Paths of file-backed fragments, in fragment order.
    pub fn files(&self) -> Vec<String> {
        self.all_fragments()
            .filter_map(|fragment| {
                fragment
                    .file_source()
                    .and_then(FileSource::path)
                    .map(str::to_string)
            })
            .collect()
    }

    /// Same fragments under a different declared schema.
    ///
    /// Fails with `SchemaMismatch` when the current schema cannot be projected
    /// onto `schema`.
    pub fn replace_schema(&self, schema: SchemaRef) -> Result<Self> {
        check_projectable(&self.schema, &schema)?;
        Ok(Self {
            schema,
            root: self.root.clone(),
            source: self.source.clone(),
        })
    }

    /// Scanner over this dataset.
    pub fn scanner(&self, options: ScanOptions) -> Result<Scanner> {
        Scanner::new(self.clone(), options)
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            FragmentSource::List(fragments) => format!("list of {}", fragments.len()),
            FragmentSource::Tree { fragments, .. } => format!("tree of {}", fragments.len()),
            FragmentSource::Generator(_) => "generator".to_string(),
        };
        f.debug_struct("Dataset")
            .field("schema", &self.schema)
            .field("root", &self.root.to_string())
            .field("fragments", &source)
            .finish()
    }
}
