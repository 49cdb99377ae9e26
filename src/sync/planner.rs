//! Decides which records a sync run should process.
//!
//! The planner pulls pages from a [`SearchCursor`] and appends their records
//! in page order. After each page it checks, in this order:
//!
//! 1. **Incremental cutoff**: the last record of the page is already on disk.
//!    Results are newest-first, so everything after it was mirrored by an
//!    earlier run. Records collected so far are kept (their downloads are
//!    skipped as already present).
//! 2. **Fetch limit**: the plan holds at least `fetch_limit` records; it is
//!    truncated to exactly that many.
//!
//! Otherwise it continues until the cursor is exhausted.
//!
//! When the result set shifts between page requests, a record can show up
//! on two pages. Only its first occurrence is planned.
//!
//! Incremental mode is only sound for newest-first ordering. Planning with
//! `incremental` and any other sort fails with
//! [`SyncError::UnsafeIncrementalOrder`] before any request is made.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use super::cursor::{RemoteTotal, SearchCursor};
use super::error::SyncError;
use super::store::SyncLayout;
use crate::client::{Record, SearchBackend, SearchParams};

/// Default maximum number of records per run.
pub const DEFAULT_FETCH_LIMIT: usize = 300;

/// Why planning stopped requesting pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The remote total was reached.
    Exhausted,
    /// Incremental cutoff: a page ended with an already-downloaded record.
    AlreadySynced,
    /// The fetch limit was reached.
    FetchLimit,
    /// An empty page arrived before the remote total was reached.
    EmptyPage,
}

/// Pagination options for one planning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub params: SearchParams,
    /// First page to request (1-based).
    pub start_page: u32,
    /// Stop at the first page whose last record is already downloaded.
    pub incremental: bool,
    /// Maximum records to plan; `None` disables the limit.
    pub fetch_limit: Option<usize>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            params: SearchParams::default(),
            start_page: 1,
            incremental: true,
            fetch_limit: Some(DEFAULT_FETCH_LIMIT),
        }
    }
}

/// Result of planning: the ordered records plus how pagination ended.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    /// Records to process, in page order.
    pub records: Vec<Record>,
    pub stop_reason: StopReason,
    /// Last page that returned records, if any did.
    pub last_page: Option<u32>,
    /// Remote total as of the last page fetched.
    pub remote_total: RemoteTotal,
    /// Times the remote total changed during pagination.
    pub drift_warnings: usize,
}

/// Builds a [`SyncPlan`] for one query directory.
pub struct SyncPlanner<'a> {
    backend: &'a dyn SearchBackend,
    layout: &'a SyncLayout,
}

impl<'a> SyncPlanner<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn SearchBackend, layout: &'a SyncLayout) -> Self {
        Self { backend, layout }
    }

    /// Paginates `query` and returns the records to process.
    ///
    /// # Errors
    ///
    /// Anything [`PlanOptions::validate`] rejects, and [`SyncError::Remote`]
    /// when a page cannot be fetched.
    #[instrument(skip(self, options), fields(start_page = options.start_page, incremental = options.incremental))]
    pub async fn plan(&self, query: &str, options: &PlanOptions) -> Result<SyncPlan, SyncError> {
        options.validate()?;

        let mut cursor = SearchCursor::new(
            self.backend,
            query,
            options.params.clone(),
            options.start_page,
        );
        let mut records: Vec<Record> = Vec::new();
        let mut stop_reason = StopReason::Exhausted;
        let mut last_page = None;

        let mut seen: HashSet<u64> = HashSet::new();

        while let Some(batch) = cursor.next_batch().await? {
            let page = cursor.next_page() - 1;
            last_page = Some(page);
            let page_last = batch.records.last().cloned();
            let received = batch.records.len();
            let before = records.len();
            records.extend(batch.records.into_iter().filter(|r| seen.insert(r.id)));
            let repeated = received - (records.len() - before);
            if repeated > 0 {
                debug!(page, repeated, "dropped records already planned from an earlier page");
            }
            debug!(page, planned = records.len(), "records collected");

            if options.incremental
                && let Some(last) = page_last.as_ref()
                && self.layout.has_image(last).await
            {
                info!(page, id = last.id, "reached previously downloaded record");
                stop_reason = StopReason::AlreadySynced;
                break;
            }

            if let Some(limit) = options.fetch_limit
                && records.len() >= limit
            {
                warn!(
                    fetch_limit = limit,
                    page,
                    total = batch.total,
                    "fetch limit reached; to get more, raise --limit, continue with --start-page {page}, or pass --no-limit"
                );
                records.truncate(limit);
                stop_reason = StopReason::FetchLimit;
                break;
            }
        }

        if stop_reason == StopReason::Exhausted && cursor.hit_empty_page() {
            stop_reason = StopReason::EmptyPage;
        }

        Ok(SyncPlan {
            records,
            stop_reason,
            last_page,
            remote_total: cursor.total(),
            drift_warnings: cursor.drift_warnings(),
        })
    }
}

impl PlanOptions {
    /// Rejects option combinations that cannot produce a sound plan.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidOption`] for a zero fetch limit or page size,
    /// [`SyncError::UnsafeIncrementalOrder`] for incremental mode without
    /// newest-first ordering.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.fetch_limit == Some(0) {
            return Err(SyncError::InvalidOption(
                "fetch limit must be at least 1 (use no limit instead of 0)".to_string(),
            ));
        }
        if self.params.per_page == 0 {
            return Err(SyncError::InvalidOption(
                "page size must be at least 1".to_string(),
            ));
        }
        if self.incremental && !self.params.is_recency_ordered() {
            return Err(SyncError::unsafe_incremental_order(&self.params));
        }
        Ok(())
    }
}
