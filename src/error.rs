//! Error taxonomy shared by discovery, scanning, and writing.

use std::sync::Arc;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

use crate::expr::ResolveError;

/// Convenience alias used across the crate.
pub type Result<T, E = DatasetError> = std::result::Result<T, E>;

/// Coarse classification of a [`DatasetError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Incompatible type or nullability on schema replacement or write.
    SchemaMismatch,
    /// A codec or filesystem cannot service the request.
    NotSupported,
    /// Underlying read/write or decode failure.
    IoFailure,
    /// A value cannot be encoded into or decoded from a partition path.
    InvalidPartitionValue,
    /// A predicate failed to bind against a schema.
    TypeError,
    /// Options failed validation.
    InvalidArgument,
    /// The operation was aborted.
    Cancelled,
}

/// Error returned by dataset operations.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Schema replacement or write target is not projectable.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// Capability missing from a format or filesystem.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Arrow kernel or IPC failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet codec failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Physical file schema no longer matches the dataset schema.
    #[error("physical schema of `{fragment}` drifted from dataset schema: {reason}")]
    PhysicalSchemaDrift {
        /// Fragment description.
        fragment: String,
        /// What made the physical schema incompatible.
        reason: String,
    },
    /// No file exists at the requested path.
    #[error("path not found: {0}")]
    NotFound(String),
    /// Value cannot be represented in a partition path.
    #[error("invalid partition value for `{field}`: {reason}")]
    InvalidPartitionValue {
        /// Partition field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },
    /// Predicate binding failure.
    #[error("type error: {0}")]
    Type(#[from] ResolveError),
    /// Option validation failure.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Aborted by an explicit stop or a sibling failure.
    #[error("operation cancelled")]
    Cancelled,
    /// A memoized failure re-raised to a later caller.
    #[error(transparent)]
    Shared(Arc<DatasetError>),
}

impl DatasetError {
    /// Classifies the error into the public taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatasetError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            DatasetError::NotSupported(_) => ErrorKind::NotSupported,
            DatasetError::Io(_)
            | DatasetError::Arrow(_)
            | DatasetError::Parquet(_)
            | DatasetError::PhysicalSchemaDrift { .. }
            | DatasetError::NotFound(_) => ErrorKind::IoFailure,
            DatasetError::InvalidPartitionValue { .. } => ErrorKind::InvalidPartitionValue,
            DatasetError::Type(_) => ErrorKind::TypeError,
            DatasetError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DatasetError::Cancelled => ErrorKind::Cancelled,
            DatasetError::Shared(inner) => inner.kind(),
        }
    }

    pub(crate) fn schema_mismatch(msg: impl Into<String>) -> Self {
        DatasetError::SchemaMismatch(msg.into())
    }

    pub(crate) fn not_supported(msg: impl Into<String>) -> Self {
        DatasetError::NotSupported(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        DatasetError::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_partition_value(
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DatasetError::InvalidPartitionValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_errors_keep_inner_kind() {
        let inner = Arc::new(DatasetError::not_supported("no codec"));
        let shared = DatasetError::Shared(inner);
        assert_eq!(shared.kind(), ErrorKind::NotSupported);
        assert_eq!(shared.to_string(), "not supported: no codec");
    }

    #[test]
    fn format_failures_classify_as_io() {
        let err = DatasetError::from(ParquetError::General("bad footer".into()));
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        let drift = DatasetError::PhysicalSchemaDrift {
            fragment: "a.parquet".into(),
            reason: "type changed".into(),
        };
        assert_eq!(drift.kind(), ErrorKind::IoFailure);
    }
}
