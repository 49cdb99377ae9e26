//! Wire types for the image-board JSON API.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known server-side filter ids.
pub struct Filters;

impl Filters {
    /// The site's default filter (hides content most users opt out of).
    pub const DEFAULT: u64 = 100_073;
    /// The "everything" filter (hides nothing).
    pub const EVERYTHING: u64 = 56_027;
}

/// Default number of records per search page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// One remote image with its metadata.
///
/// Records are read-only to this crate: they are decoded from search
/// responses and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique numeric identifier.
    pub id: u64,
    /// File extension of the original upload (`png`, `jpg`, `gif`, ...).
    pub format: String,
    /// Tag list in server order.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Representation name (`full`, `large`, `thumb`, ...) to source URL.
    #[serde(default)]
    pub representations: HashMap<String, String>,
    /// Upload time (UTC).
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub wilson_score: f64,
    #[serde(default)]
    pub upvotes: u64,
    #[serde(default)]
    pub downvotes: u64,
    #[serde(default)]
    pub faves: u64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub tag_count: u32,
    #[serde(default)]
    pub view_url: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub uploader_id: Option<u64>,
}

impl Record {
    /// Returns the URL of the named representation, if the server offers it.
    #[must_use]
    pub fn representation(&self, name: &str) -> Option<&str> {
        self.representations.get(name).map(String::as_str)
    }

    /// Tag text as stored on disk: tags joined by `,` in server order.
    #[must_use]
    pub fn tag_text(&self) -> String {
        self.tags.join(",")
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Records on this page, in server order.
    #[serde(rename = "images")]
    pub records: Vec<Record>,
    /// Total number of matches for the query at fetch time.
    pub total: u64,
}

/// Body of the featured-image endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct FeaturedResponse {
    pub image: Record,
}

/// Field the server sorts search results by.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SortField {
    /// Upload time. Together with [`SortDirection::Desc`] this is recency order.
    #[default]
    CreatedAt,
    /// Numeric id; ids are assigned in upload order.
    Id,
    Score,
    WilsonScore,
    Width,
    Height,
    /// Any other field name the server understands.
    Other(String),
}

impl SortField {
    /// The `sf` query-parameter value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Id => "id",
            Self::Score => "score",
            Self::WilsonScore => "wilson_score",
            Self::Width => "width",
            Self::Height => "height",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SortField {
    fn from(value: &str) -> Self {
        match value {
            "created_at" => Self::CreatedAt,
            "id" => Self::Id,
            "score" => Self::Score,
            "wilson_score" => Self::WilsonScore,
            "width" => Self::Width,
            "height" => Self::Height,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Sort direction (`sd` query parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Desc,
    Asc,
}

impl SortDirection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desc => "desc",
            Self::Asc => "asc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything about a search request except the query text and page number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub sort_field: SortField,
    pub sort_direction: SortDirection,
    /// Records per page.
    pub per_page: u32,
    /// Server-side filter; `None` uses the client's configured filter.
    pub filter_id: Option<u64>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            sort_field: SortField::default(),
            sort_direction: SortDirection::default(),
            per_page: DEFAULT_PAGE_SIZE,
            filter_id: None,
        }
    }
}

impl SearchParams {
    /// Whether results come newest-first.
    ///
    /// Incremental sync relies on this: once a known record shows up, every
    /// later result must be older and therefore already mirrored.
    #[must_use]
    pub fn is_recency_ordered(&self) -> bool {
        self.sort_direction == SortDirection::Desc
            && matches!(self.sort_field, SortField::CreatedAt | SortField::Id)
    }
}
