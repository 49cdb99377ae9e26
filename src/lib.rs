//! Booru Sync Library
//!
//! Incrementally mirrors the results of an image-board search query
//! (Derpibooru-compatible JSON API) into a local directory: image files,
//! optional per-image tag files, and a marker recording which query owns the
//! directory.
//!
//! # Architecture
//!
//! - [`client`] - HTTP search client with a bounded connection pool
//! - [`sync`] - pagination, planning, concurrent fan-out and the top-level
//!   [`sync_by_query`] operation

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod sync;
mod user_agent;

// Re-export commonly used types
pub use client::{
    Batch, Filters, Record, RemoteServiceError, SearchBackend, SearchClient, SearchClientConfig,
    SearchParams, SortDirection, SortField,
};
pub use sync::{
    DEFAULT_BASE_DIR, DEFAULT_FETCH_LIMIT, FanOutReport, StopReason, SyncError, SyncOptions,
    SyncReport, sync_by_query,
};
