//! Logging infrastructure for dataset observability.
//!
//! The crate uses `tracing` for structured logging. All events use target
//! `tonbo_dataset` and include an `event` field for filtering.
//!
//! ## Library Integration
//!
//! The crate never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: subsystem (e.g., "scan", "write", "discovery")
//! - Use `%` for Display, `?` for Debug formatting
//! - Per-batch events stay at debug level

/// Target for all dataset log events.
pub(crate) const DATASET_TARGET: &str = "tonbo_dataset";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "write",
///     event = "lane_opened",
///     partition = %key,
///     file_ordinal = ordinal,
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::DATASET_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::DATASET_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::DATASET_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_info;
pub(crate) use log_warn;
