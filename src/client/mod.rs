//! Client for the image-board JSON API.
//!
//! [`SearchClient`] issues paginated search queries and fetches image bytes.
//! All requests made through one client (and its clones) share a bounded
//! connection pool: a request waits for a free slot before it is sent and
//! holds the slot until its body has been fully read or written to disk.
//!
//! # Example
//!
//! ```no_run
//! use booru_sync::client::{SearchBackend, SearchClient, SearchClientConfig, SearchParams};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = SearchClient::new(SearchClientConfig::default())?;
//! let batch = client.search("oc:hardy", &SearchParams::default(), 1).await?;
//! println!("{} of {} results", batch.records.len(), batch.total);
//! # Ok(())
//! # }
//! ```

mod error;
mod types;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::user_agent;

pub use error::RemoteServiceError;
pub use types::{
    Batch, DEFAULT_PAGE_SIZE, Filters, Record, SearchParams, SortDirection, SortField,
};

use types::FeaturedResponse;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://derpibooru.org/api/v1/json";

/// Default size of the shared connection pool.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large images).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// The remote capabilities the sync engine consumes.
///
/// [`SearchClient`] is the production implementation; tests drive the
/// cursor, planner and executor through scripted implementations.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Fetches one page of results for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteServiceError`] on any non-2xx status or malformed body.
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
        page: u32,
    ) -> Result<Batch, RemoteServiceError>;

    /// Streams the body at `url` into the file at `dest`, returning bytes written.
    ///
    /// On failure no file is left at `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteServiceError`] on transport, status or IO failure.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, RemoteServiceError>;

    /// Fetches the currently featured record.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteServiceError`] on any non-2xx status or malformed body.
    async fn featured(&self) -> Result<Record, RemoteServiceError>;
}

/// Construction options for [`SearchClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchClientConfig {
    /// API root, e.g. `https://derpibooru.org/api/v1/json`.
    pub base_url: String,
    /// Filter applied when a search does not name one.
    pub filter_id: u64,
    /// Maximum concurrent connections across all calls on this client.
    pub max_connections: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for SearchClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            filter_id: Filters::DEFAULT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// HTTP client for the image-board API with a bounded connection pool.
///
/// Cheap to clone; clones share both the underlying connection pool and the
/// concurrency limit.
#[derive(Debug, Clone)]
pub struct SearchClient {
    client: Client,
    base_url: String,
    filter_id: u64,
    pool: Arc<Semaphore>,
    max_connections: usize,
}

impl SearchClient {
    /// Builds a client from `config`.
    ///
    /// A `max_connections` of zero is raised to one.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteServiceError::Build`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip_all, fields(base_url = %config.base_url))]
    pub fn new(config: SearchClientConfig) -> Result<Self, RemoteServiceError> {
        let max_connections = if config.max_connections == 0 {
            warn!("max_connections of 0 would block every request; using 1");
            1
        } else {
            config.max_connections
        };

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.read_timeout_secs))
            .pool_max_idle_per_host(max_connections)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(|source| RemoteServiceError::Build { source })?;

        debug!(max_connections, filter_id = config.filter_id, "search client ready");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            filter_id: config.filter_id,
            pool: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Returns the configured connection limit.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Returns the API root this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for a free connection slot.
    async fn checkout(&self) -> Result<SemaphorePermit<'_>, RemoteServiceError> {
        self.pool
            .acquire()
            .await
            .map_err(|_| RemoteServiceError::PoolClosed)
    }

    /// Sends a GET and fails on non-2xx statuses.
    async fn get(&self, url: &str) -> Result<reqwest::Response, RemoteServiceError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteServiceError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "remote returned error status");
            return Err(RemoteServiceError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }

    /// GETs `url` and decodes the JSON body as `T`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, RemoteServiceError> {
        let _slot = self.checkout().await?;
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| RemoteServiceError::transport(url, e))?;
        serde_json::from_slice(&body).map_err(|e| RemoteServiceError::decode(url, e))
    }

    fn search_url(
        &self,
        query: &str,
        params: &SearchParams,
        page: u32,
    ) -> Result<Url, RemoteServiceError> {
        let endpoint = format!("{}/search/images", self.base_url);
        let filter_id = params.filter_id.unwrap_or(self.filter_id).to_string();
        let per_page = params.per_page.to_string();
        let page = page.to_string();
        Url::parse_with_params(
            &endpoint,
            [
                ("q", query),
                ("sf", params.sort_field.as_str()),
                ("sd", params.sort_direction.as_str()),
                ("filter_id", filter_id.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ],
        )
        .map_err(|_| RemoteServiceError::invalid_url(endpoint))
    }
}

#[async_trait]
impl SearchBackend for SearchClient {
    #[instrument(skip(self, params), fields(sf = %params.sort_field, sd = %params.sort_direction, per_page = params.per_page))]
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
        page: u32,
    ) -> Result<Batch, RemoteServiceError> {
        let url = self.search_url(query, params, page)?;
        debug!(url = %url, "searching");
        let batch: Batch = self.get_json(url.as_str()).await?;
        debug!(
            records = batch.records.len(),
            total = batch.total,
            "search page received"
        );
        Ok(batch)
    }

    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, RemoteServiceError> {
        Url::parse(url).map_err(|_| RemoteServiceError::invalid_url(url))?;

        let _slot = self.checkout().await?;
        let response = self.get(url).await?;

        let mut file = File::create(dest)
            .await
            .map_err(|e| RemoteServiceError::io(dest, e))?;
        let result = stream_to_file(&mut file, response, url, dest).await;
        drop(file);

        if result.is_err() {
            debug!("cleaning up partial file after error");
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    #[instrument(skip(self))]
    async fn featured(&self) -> Result<Record, RemoteServiceError> {
        let url = format!("{}/images/featured", self.base_url);
        let featured: FeaturedResponse = self.get_json(&url).await?;
        Ok(featured.image)
    }
}

/// Streams a response body to `file`, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    path: &Path,
) -> Result<u64, RemoteServiceError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RemoteServiceError::transport(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| RemoteServiceError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| RemoteServiceError::io(path, e))?;

    Ok(bytes_written)
}
