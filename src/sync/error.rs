//! Error types for sync runs and per-record tasks.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::client::{RemoteServiceError, SearchParams};

/// Fatal errors that abort a sync run.
///
/// Per-record download and tag failures are not represented here; they are
/// collected as [`TaskError`]s in the run's report.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The sync directory was populated by a different query.
    #[error(
        "sync directory {dir} belongs to query {stored:?}, refusing to sync {requested:?} into it"
    )]
    Consistency {
        /// The query directory.
        dir: PathBuf,
        /// Query read from the directory's marker file.
        stored: String,
        /// Query requested for this run.
        requested: String,
    },

    /// A search page could not be fetched; pagination cannot continue.
    #[error("search failed: {0}")]
    Remote(#[from] RemoteServiceError),

    /// Incremental mode needs newest-first results.
    #[error(
        "incremental sync requires newest-first ordering (created_at or id, desc), got {sort_field} {sort_direction}"
    )]
    UnsafeIncrementalOrder {
        sort_field: String,
        sort_direction: String,
    },

    /// An option value that can never produce a meaningful run.
    #[error("invalid sync option: {0}")]
    InvalidOption(String),

    /// Filesystem error while preparing the sync directory.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Creates a query-marker mismatch error.
    pub fn consistency(
        dir: impl Into<PathBuf>,
        stored: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::Consistency {
            dir: dir.into(),
            stored: stored.into(),
            requested: requested.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsafe_incremental_order(params: &SearchParams) -> Self {
        Self::UnsafeIncrementalOrder {
            sort_field: params.sort_field.to_string(),
            sort_direction: params.sort_direction.to_string(),
        }
    }
}

/// Failure of one record's download or tag-save task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Fetching the image failed.
    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    /// The record does not offer the requested representation.
    #[error("record {id} has no {representation:?} representation")]
    MissingRepresentation { id: u64, representation: String },

    /// Reading or writing the record's file failed.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The task panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
