//! On-disk layout of one synced query.
//!
//! ```text
//! <base>/<sanitized query>/
//!     query.txt          exact query string, written once
//!     images/<id>.<ext>  downloaded image bytes
//!     tags/<id>.txt      comma-joined tags (only when tags are saved)
//! ```
//!
//! An image file's presence is the only record that a download happened.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use super::error::SyncError;
use crate::client::Record;

/// Name of the persisted query marker inside a sync directory.
pub const QUERY_FILE_NAME: &str = "query.txt";

const IMAGES_DIR_NAME: &str = "images";
const TAGS_DIR_NAME: &str = "tags";

#[allow(clippy::expect_used)]
static UNSAFE_DIR_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w= ]+").expect("static regex is valid"));

/// Derives a directory name from a search query.
///
/// `:` becomes `=`, then everything except word characters, `=` and spaces is
/// dropped. Word characters are Unicode-aware, so non-Latin tags survive.
///
/// ```
/// use booru_sync::sync::dir_name_for_query;
///
/// assert_eq!(dir_name_for_query("oc:hardy"), "oc=hardy");
/// assert_eq!(dir_name_for_query("safe, pony || cat*"), "safe pony  cat");
/// ```
#[must_use]
pub fn dir_name_for_query(query: &str) -> String {
    UNSAFE_DIR_CHARS
        .replace_all(&query.replace(':', "="), "")
        .into_owned()
}

/// Paths and blob access for one query's sync directory.
#[derive(Debug, Clone)]
pub struct SyncLayout {
    root: PathBuf,
    images_dir: PathBuf,
    tags_dir: PathBuf,
}

impl SyncLayout {
    /// Layout for `query` under `base_dir`. Nothing is created on disk.
    #[must_use]
    pub fn new(base_dir: &Path, query: &str) -> Self {
        let root = base_dir.join(dir_name_for_query(query));
        Self {
            images_dir: root.join(IMAGES_DIR_NAME),
            tags_dir: root.join(TAGS_DIR_NAME),
            root,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    #[must_use]
    pub fn tags_dir(&self) -> &Path {
        &self.tags_dir
    }

    #[must_use]
    pub fn query_file(&self) -> PathBuf {
        self.root.join(QUERY_FILE_NAME)
    }

    /// Final location of a record's image.
    #[must_use]
    pub fn image_path(&self, record: &Record) -> PathBuf {
        self.images_dir
            .join(format!("{}.{}", record.id, record.format))
    }

    /// Temporary location a download streams into before it is renamed.
    #[must_use]
    pub fn partial_image_path(&self, record: &Record) -> PathBuf {
        self.images_dir
            .join(format!("{}.{}.part", record.id, record.format))
    }

    #[must_use]
    pub fn tag_path(&self, record: &Record) -> PathBuf {
        self.tags_dir.join(format!("{}.txt", record.id))
    }

    /// Whether the image for `record` was downloaded by an earlier run.
    ///
    /// A path that cannot be checked counts as missing; the error is logged.
    pub async fn has_image(&self, record: &Record) -> bool {
        match self.check_image(record).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(
                    id = record.id,
                    error = %e,
                    "cannot check for downloaded image; treating it as missing"
                );
                false
            }
        }
    }

    /// Like [`has_image`](Self::has_image), but surfaces lookup failures
    /// other than "not found".
    ///
    /// # Errors
    ///
    /// [`SyncError::Io`] when the image path cannot be inspected.
    pub async fn check_image(&self, record: &Record) -> Result<bool, SyncError> {
        let path = self.image_path(record);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SyncError::io(&path, e))
    }

    /// Creates the query root and verifies or writes the query marker.
    ///
    /// An existing marker must hold exactly `query`; anything else means the
    /// directory belongs to another query.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Consistency`] on a marker mismatch and
    /// [`SyncError::Io`] when the directory or marker cannot be accessed.
    pub async fn claim(&self, query: &str) -> Result<(), SyncError> {
        let marker = self.query_file();
        match tokio::fs::read_to_string(&marker).await {
            Ok(stored) => {
                if stored != query {
                    return Err(SyncError::consistency(&self.root, stored, query));
                }
                debug!(marker = %marker.display(), "query marker matches");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                create_dir(&self.root).await?;
                tokio::fs::write(&marker, query)
                    .await
                    .map_err(|e| SyncError::io(&marker, e))?;
                debug!(marker = %marker.display(), "query marker written");
                Ok(())
            }
            Err(e) => Err(SyncError::io(&marker, e)),
        }
    }

    /// Creates `images/`, and `tags/` when `with_tags` is set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if a directory cannot be created.
    pub async fn prepare(&self, with_tags: bool) -> Result<(), SyncError> {
        create_dir(&self.images_dir).await?;
        if with_tags {
            create_dir(&self.tags_dir).await?;
        }
        Ok(())
    }
}

async fn create_dir(path: &Path) -> Result<(), SyncError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| SyncError::io(path, e))
}
