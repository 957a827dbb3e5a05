use std::sync::Arc;

use arrow::datatypes::SchemaRef;

use super::Dataset;
use crate::{
    error::{DatasetError, Result},
    expr::Predicate,
    format::FileFormat,
    fs::{relative_segments, FileInfo, FileSelector, FileSource, FileSystem},
    observability::{log_debug, log_info},
    partition::{no_partitioning, PartitionTree, Partitioning},
    schema::unify_schemas,
};

/// Discovery settings for [`DatasetFactory`].
#[derive(Clone, Debug)]
pub struct FactoryOptions {
    /// Decodes directory segments into partition predicates.
    pub partitioning: Arc<dyn Partitioning>,
    /// Directory segments are decoded relative to this path. Defaults to the
    /// selector's base directory.
    pub partition_base_dir: Option<String>,
    /// Drop files the format does not recognize instead of failing later.
    pub exclude_invalid_files: bool,
    /// Files with any path segment below the base starting with one of these
    /// prefixes are skipped.
    pub selector_ignore_prefixes: Vec<String>,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        Self {
            partitioning: no_partitioning(),
            partition_base_dir: None,
            exclude_invalid_files: false,
            selector_ignore_prefixes: vec![".".to_string(), "_".to_string()],
        }
    }
}

impl FactoryOptions {
    /// Uses `partitioning` for directory segments.
    #[must_use]
    pub fn with_partitioning(mut self, partitioning: Arc<dyn Partitioning>) -> Self {
        self.partitioning = partitioning;
        self
    }

    /// Decodes segments relative to `base_dir`.
    #[must_use]
    pub fn with_partition_base_dir(mut self, base_dir: impl Into<String>) -> Self {
        self.partition_base_dir = Some(base_dir.into());
        self
    }

    /// Drops unrecognized files during discovery.
    #[must_use]
    pub fn with_exclude_invalid_files(mut self, exclude: bool) -> Self {
        self.exclude_invalid_files = exclude;
        self
    }
}

/// How [`DatasetFactory::finish`] settles the dataset schema.
#[derive(Clone, Debug)]
pub struct FinishOptions {
    /// Use this schema instead of inspecting files.
    pub schema: Option<SchemaRef>,
    /// Number of files inspected to infer the schema; `usize::MAX` inspects all.
    pub fragments_to_inspect: usize,
    /// Check every file against the final schema.
    pub validate_fragments: bool,
}

impl Default for FinishOptions {
    fn default() -> Self {
        Self {
            schema: None,
            fragments_to_inspect: 1,
            validate_fragments: false,
        }
    }
}

/// Discovers files and turns them into a file-backed [`Dataset`].
#[derive(Debug)]
pub struct DatasetFactory {
    filesystem: Arc<dyn FileSystem>,
    format: Arc<dyn FileFormat>,
    files: Vec<FileInfo>,
    base_dir: String,
    options: FactoryOptions,
}

impl DatasetFactory {
    /// Lists files matching `selector`.
    pub async fn from_selector(
        filesystem: Arc<dyn FileSystem>,
        selector: &FileSelector,
        format: Arc<dyn FileFormat>,
        options: FactoryOptions,
    ) -> Result<Self> {
        let base_dir = options
            .partition_base_dir
            .clone()
            .unwrap_or_else(|| selector.base_dir.clone());
        let listing = filesystem.list(selector).await?;
        let files = listing
            .into_iter()
            .filter(FileInfo::is_file)
            .filter(|info| !is_ignored(&selector.base_dir, &info.path, &options))
            .collect();
        Self::build(filesystem, format, files, base_dir, options).await
    }

    /// Uses an explicit list of file paths.
    pub async fn from_paths<I, P>(
        filesystem: Arc<dyn FileSystem>,
        paths: I,
        format: Arc<dyn FileFormat>,
        options: FactoryOptions,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let base_dir = options.partition_base_dir.clone().unwrap_or_default();
        let files = paths
            .into_iter()
            .map(FileInfo::file)
            .collect();
        Self::build(filesystem, format, files, base_dir, options).await
    }

    async fn build(
        filesystem: Arc<dyn FileSystem>,
        format: Arc<dyn FileFormat>,
        mut files: Vec<FileInfo>,
        base_dir: String,
        options: FactoryOptions,
    ) -> Result<Self> {
        if options.exclude_invalid_files {
            let mut supported = Vec::with_capacity(files.len());
            for info in files {
                let source = FileSource::from_path(info.path.clone(), filesystem.clone());
                if format.is_supported(&source).await? {
                    supported.push(info);
                } else {
                    log_debug!(
                        component = "discovery",
                        event = "file_excluded",
                        path = %info.path,
                        format = format.type_name(),
                    );
                }
            }
            files = supported;
        }
        files.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));
        log_info!(
            component = "discovery",
            event = "files_discovered",
            count = files.len(),
            base_dir = %base_dir,
            partitioning = options.partitioning.type_name(),
        );
        Ok(Self {
            filesystem,
            format,
            files,
            base_dir,
            options,
        })
    }

    /// Replaces the partitioning used to decode directory segments.
    #[must_use]
    pub fn with_partitioning(mut self, partitioning: Arc<dyn Partitioning>) -> Self {
        self.options.partitioning = partitioning;
        self
    }

    /// Discovered file paths, sorted.
    pub fn files(&self) -> impl Iterator<Item = &str> + '_ {
        self.files.iter().map(|info| info.path.as_str())
    }

    /// Physical schemas of up to `fragments_to_inspect` files, followed by the
    /// partition schema.
    pub async fn inspect_schemas(&self, fragments_to_inspect: usize) -> Result<Vec<SchemaRef>> {
        let mut schemas = Vec::new();
        for info in self.files.iter().take(fragments_to_inspect) {
            let source = FileSource::from_path(info.path.clone(), self.filesystem.clone());
            schemas.push(self.format.inspect(&source).await?);
        }
        schemas.push(self.options.partitioning.schema().clone());
        Ok(schemas)
    }

    /// Unified schema of the inspected files with partition fields appended.
    pub async fn inspect(&self, options: &FinishOptions) -> Result<SchemaRef> {
        let schemas = self.inspect_schemas(options.fragments_to_inspect).await?;
        Ok(Arc::new(unify_schemas(schemas)?))
    }

    /// Builds the dataset.
    pub async fn finish(&self, options: FinishOptions) -> Result<Dataset> {
        let schema = match &options.schema {
            Some(schema) => schema.clone(),
            None => self.inspect(&options).await?,
        };
        if options.validate_fragments {
            for info in &self.files {
                let source = FileSource::from_path(info.path.clone(), self.filesystem.clone());
                let physical = self.format.inspect(&source).await?;
                unify_schemas([schema.clone(), physical]).map_err(|err| match err {
                    DatasetError::SchemaMismatch(reason) => {
                        DatasetError::schema_mismatch(format!("{}: {reason}", info.path))
                    }
                    other => other,
                })?;
            }
        }
        let tree = PartitionTree::from_listing(
            self.files.iter().cloned(),
            &self.base_dir,
            self.options.partitioning.as_ref(),
        );
        Ok(Dataset::from_file_tree(
            schema,
            Predicate::always_true(),
            self.format.clone(),
            self.filesystem.clone(),
            tree,
        ))
    }
}

fn is_ignored(base_dir: &str, path: &str, options: &FactoryOptions) -> bool {
    let Some(segments) = relative_segments(base_dir, path) else {
        return false;
    };
    segments.iter().any(|segment| {
        options
            .selector_ignore_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && segment.starts_with(prefix.as_str()))
    })
}
