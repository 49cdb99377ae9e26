//! Incremental mirroring of one search query to a local directory.
//!
//! A run:
//!
//! 1. claims `<base>/<sanitized query>/` (a different query already stored
//!    there is a fatal [`SyncError::Consistency`], raised before any request),
//! 2. plans the records to process with [`SyncPlanner`],
//! 3. saves tag files (when asked), then downloads images, with
//!    [`FanOutExecutor`].
//!
//! Page failures abort the run. Per-record failures are collected in the
//! returned [`SyncReport`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use booru_sync::client::{SearchClient, SearchClientConfig};
//! use booru_sync::sync::{SyncOptions, sync_by_query};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SearchClient::new(SearchClientConfig::default())?;
//! let report = sync_by_query(&client, "oc:hardy", Path::new("downloads/sync"), &SyncOptions::default()).await?;
//! println!("{} records, {} failed downloads", report.records().len(), report.downloads.failed());
//! # Ok(())
//! # }
//! ```

mod cursor;
mod error;
mod executor;
mod planner;
mod store;
#[cfg(test)]
pub(crate) mod test_support;

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::client::{Record, SearchBackend, SearchParams};

pub use cursor::{RemoteTotal, SearchCursor};
pub use error::{SyncError, TaskError};
pub use executor::{
    DEFAULT_REPRESENTATION, FanOutExecutor, FanOutReport, RecordOutcome, TaskKind, TaskOutcome,
};
pub use planner::{DEFAULT_FETCH_LIMIT, PlanOptions, StopReason, SyncPlan, SyncPlanner};
pub use store::{QUERY_FILE_NAME, SyncLayout, dir_name_for_query};

/// Base directory used when none is given.
pub const DEFAULT_BASE_DIR: &str = "downloads/sync";

/// Options for one [`sync_by_query`] run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Stop paginating at the first page ending in an already-downloaded record.
    pub incremental: bool,
    /// Write `tags/<id>.txt` for every planned record.
    pub save_tags: bool,
    /// Maximum records per run; `None` disables the limit.
    pub fetch_limit: Option<usize>,
    /// First page to request (1-based).
    pub start_page: u32,
    pub params: SearchParams,
    /// Representation to download.
    pub representation: String,
    /// Draw a download progress bar on stderr.
    pub show_progress: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            incremental: true,
            save_tags: true,
            fetch_limit: Some(DEFAULT_FETCH_LIMIT),
            start_page: 1,
            params: SearchParams::default(),
            representation: DEFAULT_REPRESENTATION.to_string(),
            show_progress: false,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            params: self.params.clone(),
            start_page: self.start_page,
            incremental: self.incremental,
            fetch_limit: self.fetch_limit,
        }
    }
}

/// What a completed run did.
#[derive(Debug)]
pub struct SyncReport {
    /// The query as requested.
    pub query: String,
    /// The query's sync directory.
    pub directory: PathBuf,
    /// Planned records and how pagination ended.
    pub plan: SyncPlan,
    /// Tag-save outcomes; `None` when tags were not requested.
    pub tags: Option<FanOutReport>,
    pub downloads: FanOutReport,
}

impl SyncReport {
    /// The planned records, in page order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.plan.records
    }

    /// Consumes the report, returning the planned records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.plan.records
    }

    /// Whether any download or tag-save task failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.downloads.failed() > 0 || self.tags.as_ref().is_some_and(|t| t.failed() > 0)
    }
}

/// Mirrors the results of `query` into `base_dir`.
///
/// # Errors
///
/// - [`SyncError::InvalidOption`] / [`SyncError::UnsafeIncrementalOrder`]
///   for unusable options, before anything is touched
/// - [`SyncError::Consistency`] when the directory holds another query
/// - [`SyncError::Remote`] when a search page cannot be fetched
/// - [`SyncError::Io`] when the directory cannot be prepared
///
/// Individual download or tag failures do not fail the run; they are in the
/// returned report.
#[instrument(skip(backend, base_dir, options), fields(base_dir = %base_dir.display()))]
pub async fn sync_by_query(
    backend: &dyn SearchBackend,
    query: &str,
    base_dir: &Path,
    options: &SyncOptions,
) -> Result<SyncReport, SyncError> {
    let plan_options = options.plan_options();
    plan_options.validate()?;

    let layout = SyncLayout::new(base_dir, query);
    info!(dir = %layout.root().display(), "preparing to sync");
    layout.claim(query).await?;
    layout.prepare(options.save_tags).await?;

    let plan = SyncPlanner::new(backend, &layout)
        .plan(query, &plan_options)
        .await?;
    info!(
        records = plan.records.len(),
        incremental = options.incremental,
        stop_reason = ?plan.stop_reason,
        "found records to sync"
    );

    let executor = FanOutExecutor::new(backend, &layout)
        .with_representation(options.representation.clone())
        .with_progress(options.show_progress);

    let tags = if options.save_tags {
        let report = executor.save_tags(&plan.records).await;
        if report.failed() > 0 {
            warn!(failed = report.failed(), "some tag files could not be saved");
        }
        Some(report)
    } else {
        None
    };

    let downloads = executor.download(&plan.records).await;
    if downloads.failed() > 0 {
        warn!(
            failed = downloads.failed(),
            ids = ?downloads.failed_ids(),
            "some images could not be downloaded"
        );
    }
    info!(
        downloaded = downloads.written(),
        already_present = downloads.skipped(),
        failed = downloads.failed(),
        "sync complete"
    );

    Ok(SyncReport {
        query: query.to_string(),
        directory: layout.root().to_path_buf(),
        plan,
        tags,
        downloads,
    })
}
