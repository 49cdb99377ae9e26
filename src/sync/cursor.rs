//! Page-by-page iteration over one search query.

use tracing::{debug, warn};

use crate::client::{Batch, RemoteServiceError, SearchBackend, SearchParams};

/// Remote match count as last observed by a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteTotal {
    /// No page fetched yet.
    #[default]
    Unknown,
    /// Total reported by the most recent page.
    Known(u64),
}

impl RemoteTotal {
    /// The known total, if any.
    #[must_use]
    pub fn value(self) -> Option<u64> {
        match self {
            Self::Unknown => None,
            Self::Known(total) => Some(total),
        }
    }
}

/// Lazily fetches consecutive result pages for one query.
///
/// The cursor is one-shot: once it returns `None` it stays finished, and a
/// later run must build a new cursor because the remote result set may have
/// changed in between.
///
/// Iteration ends once the number of records accounted for reaches the
/// remote total. When starting at page `k`, the records of pages `1..k` are
/// counted as already seen so a resumed run does not misread its offset as
/// drift. A page with no records while the total says more should exist
/// stops iteration early with a warning instead of retrying.
pub struct SearchCursor<'a> {
    backend: &'a dyn SearchBackend,
    query: String,
    params: SearchParams,
    next_page: u32,
    fetched: u64,
    total: RemoteTotal,
    drift_warnings: usize,
    hit_empty_page: bool,
    finished: bool,
}

impl<'a> SearchCursor<'a> {
    /// Creates a cursor starting at `start_page` (1-based; 0 is treated as 1).
    #[must_use]
    pub fn new(
        backend: &'a dyn SearchBackend,
        query: impl Into<String>,
        params: SearchParams,
        start_page: u32,
    ) -> Self {
        let start_page = start_page.max(1);
        let skipped = u64::from(start_page - 1) * u64::from(params.per_page);
        Self {
            backend,
            query: query.into(),
            params,
            next_page: start_page,
            fetched: skipped,
            total: RemoteTotal::Unknown,
            drift_warnings: 0,
            hit_empty_page: false,
            finished: false,
        }
    }

    /// Fetches the next page.
    ///
    /// Returns `Ok(None)` once the result set is exhausted or the empty-page
    /// anomaly was hit.
    ///
    /// # Errors
    ///
    /// Propagates [`RemoteServiceError`] from the backend. The cursor is
    /// finished afterwards.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>, RemoteServiceError> {
        if self.finished {
            return Ok(None);
        }
        if let RemoteTotal::Known(total) = self.total
            && self.fetched >= total
        {
            self.finished = true;
            return Ok(None);
        }

        let page = self.next_page;
        let batch = match self.backend.search(&self.query, &self.params, page).await {
            Ok(batch) => batch,
            Err(e) => {
                self.finished = true;
                return Err(e);
            }
        };

        if let RemoteTotal::Known(previous) = self.total
            && previous != batch.total
        {
            self.drift_warnings += 1;
            warn!(
                query = %self.query,
                page,
                previous,
                current = batch.total,
                "number of results matching the query changed during iteration"
            );
        }
        self.total = RemoteTotal::Known(batch.total);

        if batch.records.is_empty() {
            self.finished = true;
            if batch.total > self.fetched {
                self.hit_empty_page = true;
                warn!(
                    query = %self.query,
                    page,
                    fetched = self.fetched,
                    total = batch.total,
                    "empty page before reaching the reported total; stopping early"
                );
            }
            return Ok(None);
        }

        self.fetched += batch.records.len() as u64;
        self.next_page += 1;
        debug!(
            page,
            records = batch.records.len(),
            fetched = self.fetched,
            total = batch.total,
            "page fetched"
        );
        Ok(Some(batch))
    }

    /// Page number the next call will request.
    #[must_use]
    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    /// Records accounted for so far, including pages skipped by `start_page`.
    #[must_use]
    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    #[must_use]
    pub fn total(&self) -> RemoteTotal {
        self.total
    }

    /// Number of times the remote total changed between pages.
    #[must_use]
    pub fn drift_warnings(&self) -> usize {
        self.drift_warnings
    }

    /// Whether iteration stopped on an empty page before the total was reached.
    #[must_use]
    pub fn hit_empty_page(&self) -> bool {
        self.hit_empty_page
    }
}

impl std::fmt::Debug for SearchCursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCursor")
            .field("query", &self.query)
            .field("next_page", &self.next_page)
            .field("fetched", &self.fetched)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}
