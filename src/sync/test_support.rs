//! Scripted backend and record builders for sync unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::client::{Batch, Record, RemoteServiceError, SearchBackend, SearchParams};

pub(crate) fn record(id: u64, format: &str) -> Record {
    Record {
        id,
        format: format.to_string(),
        tags: vec!["safe".to_string(), format!("tag{id}")],
        representations: HashMap::from([(
            "full".to_string(),
            format!("https://cdn.test/img/{id}.{format}"),
        )]),
        created_at: Utc.timestamp_opt(1_600_000_000 + i64::try_from(id).unwrap(), 0).unwrap(),
        name: None,
        description: None,
        score: 0,
        wilson_score: 0.0,
        upvotes: 0,
        downvotes: 0,
        faves: 0,
        width: 0,
        height: 0,
        tag_count: 2,
        view_url: None,
        uploader: None,
        uploader_id: None,
    }
}

pub(crate) fn params(per_page: u32) -> SearchParams {
    SearchParams {
        per_page,
        ..SearchParams::default()
    }
}

#[derive(Default)]
struct Script {
    requested_pages: Vec<u32>,
    total_overrides: HashMap<u32, u64>,
    empty_pages: HashSet<u32>,
    repeated: HashMap<u32, u64>,
    moved_downloads: HashSet<u64>,
    failing_pages: HashMap<u32, u16>,
    failing_downloads: HashSet<u64>,
    panicking_downloads: HashSet<u64>,
    downloads: Vec<String>,
}

/// Serves `total` records newest-first (ids `total..=1`), `per_page` at a time.
pub(crate) struct ScriptedBackend {
    total: u64,
    script: Mutex<Script>,
}

impl ScriptedBackend {
    pub(crate) fn with_results(total: u64) -> Self {
        Self {
            total,
            script: Mutex::new(Script::default()),
        }
    }

    pub(crate) fn set_total_for_page(&self, page: u32, total: u64) {
        self.script.lock().unwrap().total_overrides.insert(page, total);
    }

    pub(crate) fn empty_page(&self, page: u32) {
        self.script.lock().unwrap().empty_pages.insert(page);
    }

    /// Serves record `id` again at the top of `page`, as if new uploads
    /// pushed it down from the previous page.
    pub(crate) fn repeat_on_page(&self, page: u32, id: u64) {
        self.script.lock().unwrap().repeated.insert(page, id);
    }

    pub(crate) fn fail_page(&self, page: u32, status: u16) {
        self.script.lock().unwrap().failing_pages.insert(page, status);
    }

    /// Downloads of URLs for record `id` fail with HTTP 500.
    pub(crate) fn fail_download(&self, id: u64) {
        self.script.lock().unwrap().failing_downloads.insert(id);
    }

    /// Downloads for record `id` land the finished image directly, as if a
    /// concurrent writer completed it, leaving no partial file behind.
    pub(crate) fn finish_elsewhere(&self, id: u64) {
        self.script.lock().unwrap().moved_downloads.insert(id);
    }

    /// Downloads of URLs for record `id` panic mid-task.
    pub(crate) fn panic_on_download(&self, id: u64) {
        self.script.lock().unwrap().panicking_downloads.insert(id);
    }

    pub(crate) fn requested_pages(&self) -> Vec<u32> {
        self.script.lock().unwrap().requested_pages.clone()
    }

    pub(crate) fn downloaded_urls(&self) -> Vec<String> {
        self.script.lock().unwrap().downloads.clone()
    }
}

#[async_trait]
impl SearchBackend for ScriptedBackend {
    async fn search(
        &self,
        _query: &str,
        params: &SearchParams,
        page: u32,
    ) -> Result<Batch, RemoteServiceError> {
        let mut script = self.script.lock().unwrap();
        script.requested_pages.push(page);
        if let Some(status) = script.failing_pages.get(&page) {
            return Err(RemoteServiceError::http_status("scripted://search", *status));
        }
        let total = script.total_overrides.get(&page).copied().unwrap_or(self.total);
        if script.empty_pages.contains(&page) {
            return Ok(Batch {
                records: Vec::new(),
                total,
            });
        }

        let per_page = u64::from(params.per_page);
        let start = u64::from(page - 1) * per_page;
        let end = (start + per_page).min(self.total);
        let mut records: Vec<Record> = (start..end)
            .map(|index| record(self.total - index, "png"))
            .collect();
        if let Some(id) = script.repeated.get(&page) {
            records.insert(0, record(*id, "png"));
        }
        Ok(Batch { records, total })
    }

    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, RemoteServiceError> {
        let matches = |id: &u64| url.contains(&format!("/{id}."));
        let (failing, panicking, moved) = {
            let mut script = self.script.lock().unwrap();
            script.downloads.push(url.to_string());
            (
                script.failing_downloads.iter().any(matches),
                script.panicking_downloads.iter().any(matches),
                script.moved_downloads.iter().any(matches),
            )
        };
        tokio::task::yield_now().await;
        assert!(!panicking, "scripted panic downloading {url}");
        if failing {
            return Err(RemoteServiceError::http_status(url, 500));
        }
        let body = format!("bytes of {url}");
        if moved {
            let finished = dest.with_extension("");
            tokio::fs::write(&finished, &body)
                .await
                .map_err(|e| RemoteServiceError::io(&finished, e))?;
            return Ok(body.len() as u64);
        }
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| RemoteServiceError::io(dest, e))?;
        Ok(body.len() as u64)
    }

    async fn featured(&self) -> Result<Record, RemoteServiceError> {
        Ok(record(self.total, "png"))
    }
}
