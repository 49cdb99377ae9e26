//! Concurrent per-record side effects: tag files and image downloads.
//!
//! Each fan-out launches one future per record and joins them all on the
//! calling task. A failing (or panicking) task is captured as that record's
//! outcome and logged with its id; siblings keep running and the fan-out
//! itself never fails. Concurrency is bounded only by the backend's
//! connection pool.

use std::any::Any;
use std::collections::HashSet;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io::ErrorKind;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use futures_util::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, error, instrument};

use super::error::TaskError;
use super::store::SyncLayout;
use crate::client::{Record, SearchBackend};

/// Representation downloaded when none is configured.
pub const DEFAULT_REPRESENTATION: &str = "full";

/// Which side effect a fan-out performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    TagSave,
    Download,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TagSave => "tag-save",
            Self::Download => "download",
        })
    }
}

/// Successful result of one record's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// A file was written.
    Written,
    /// Tag file already held identical text; nothing was written.
    Unchanged,
    /// Image already on disk; nothing was fetched.
    AlreadyPresent,
}

/// Outcome of one record's task.
#[derive(Debug)]
pub struct RecordOutcome {
    pub id: u64,
    pub result: Result<TaskOutcome, TaskError>,
}

/// Per-record outcomes of one fan-out, one per distinct id, in input order.
#[derive(Debug)]
pub struct FanOutReport {
    kind: TaskKind,
    outcomes: Vec<RecordOutcome>,
}

impl FanOutReport {
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    #[must_use]
    pub fn outcomes(&self) -> &[RecordOutcome] {
        &self.outcomes
    }

    /// Number of records that had a file written.
    #[must_use]
    pub fn written(&self) -> usize {
        self.count(|r| matches!(r, Ok(TaskOutcome::Written)))
    }

    /// Number of records that needed no write.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(|r| {
            matches!(
                r,
                Ok(TaskOutcome::Unchanged | TaskOutcome::AlreadyPresent)
            )
        })
    }

    /// Number of records whose task failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(Result::is_err)
    }

    /// Ids of records whose task failed, in input order.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<u64> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.id)
            .collect()
    }

    /// The outcome recorded for `id`, if that record was part of the fan-out.
    #[must_use]
    pub fn outcome_for(&self, id: u64) -> Option<&Result<TaskOutcome, TaskError>> {
        self.outcomes.iter().find(|o| o.id == id).map(|o| &o.result)
    }

    fn count(&self, pred: impl Fn(&Result<TaskOutcome, TaskError>) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }
}

/// Runs tag-save and download tasks for a planned record list.
pub struct FanOutExecutor<'a> {
    backend: &'a dyn SearchBackend,
    layout: &'a SyncLayout,
    representation: String,
    show_progress: bool,
}

impl<'a> FanOutExecutor<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn SearchBackend, layout: &'a SyncLayout) -> Self {
        Self {
            backend,
            layout,
            representation: DEFAULT_REPRESENTATION.to_string(),
            show_progress: false,
        }
    }

    /// Selects which representation to download (`full`, `large`, ...).
    #[must_use]
    pub fn with_representation(mut self, representation: impl Into<String>) -> Self {
        self.representation = representation.into();
        self
    }

    /// Draws a progress bar on stderr during downloads.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Writes each record's comma-joined tags to `tags/<id>.txt`.
    ///
    /// Files whose content already matches are left untouched.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn save_tags(&self, records: &[Record]) -> FanOutReport {
        fan_out(TaskKind::TagSave, records, |record| self.save_tags_for(record)).await
    }

    /// Downloads each record's image unless it is already on disk.
    #[instrument(skip_all, fields(records = records.len(), representation = %self.representation))]
    pub async fn download(&self, records: &[Record]) -> FanOutReport {
        let bar = if self.show_progress {
            visible_bar(records.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        self.download_with_progress(records, &bar).await
    }

    /// Like [`download`](Self::download), advancing `bar` once per record.
    ///
    /// The bar's length is set to the distinct record count and it is finished when
    /// the fan-out ends, even if a task panics.
    pub async fn download_with_progress(
        &self,
        records: &[Record],
        bar: &ProgressBar,
    ) -> FanOutReport {
        bar.set_length(distinct(records).len() as u64);
        let _finish = FinishOnDrop(bar);
        fan_out(TaskKind::Download, records, |record| {
            self.download_one(record, bar)
        })
        .await
    }

    async fn save_tags_for(&self, record: &Record) -> Result<TaskOutcome, TaskError> {
        let path = self.layout.tag_path(record);
        let text = record.tag_text();

        match tokio::fs::read_to_string(&path).await {
            Ok(existing) if existing == text => {
                debug!(id = record.id, "tags unchanged");
                return Ok(TaskOutcome::Unchanged);
            }
            // Changed, missing, or not UTF-8: rewrite.
            Ok(_) => {}
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::InvalidData) => {}
            Err(e) => return Err(TaskError::io(&path, e)),
        }

        tokio::fs::write(&path, text)
            .await
            .map_err(|e| TaskError::io(&path, e))?;
        debug!(id = record.id, path = %path.display(), "saved tags");
        Ok(TaskOutcome::Written)
    }

    async fn download_one(&self, record: &Record, bar: &ProgressBar) -> Result<TaskOutcome, TaskError> {
        let _tick = TickOnDrop(bar);

        if self.layout.has_image(record).await {
            debug!(id = record.id, "image already downloaded");
            return Ok(TaskOutcome::AlreadyPresent);
        }

        let url = record.representation(&self.representation).ok_or_else(|| {
            TaskError::MissingRepresentation {
                id: record.id,
                representation: self.representation.clone(),
            }
        })?;

        let partial = self.layout.partial_image_path(record);
        let bytes = self.backend.download_to(url, &partial).await?;

        let dest = self.layout.image_path(record);
        if let Err(e) = tokio::fs::rename(&partial, &dest).await {
            if e.kind() == ErrorKind::NotFound && self.layout.has_image(record).await {
                debug!(id = record.id, "image finished by another writer");
                return Ok(TaskOutcome::AlreadyPresent);
            }
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(TaskError::io(&dest, e));
        }
        debug!(id = record.id, bytes, path = %dest.display(), "saved image");
        Ok(TaskOutcome::Written)
    }
}

/// Runs `task` concurrently for the first occurrence of every record id and
/// collects every outcome. Two tasks on one id would race on the same files.
async fn fan_out<'r, F, Fut>(kind: TaskKind, records: &'r [Record], task: F) -> FanOutReport
where
    F: Fn(&'r Record) -> Fut,
    Fut: Future<Output = Result<TaskOutcome, TaskError>>,
{
    let unique = distinct(records);
    if unique.len() < records.len() {
        debug!(
            task = %kind,
            repeated = records.len() - unique.len(),
            "skipping repeated records"
        );
    }

    let tasks = unique.into_iter().map(|record| {
        let id = record.id;
        AssertUnwindSafe(task(record))
            .catch_unwind()
            .map(move |caught| RecordOutcome {
                id,
                result: caught.unwrap_or_else(|payload| {
                    Err(TaskError::Panicked(panic_message(payload.as_ref())))
                }),
            })
    });
    let outcomes = join_all(tasks).await;

    for outcome in &outcomes {
        if let Err(e) = &outcome.result {
            error!(id = outcome.id, task = %kind, error = %error_chain(e), "task failed");
        }
    }

    FanOutReport { kind, outcomes }
}

/// First occurrence of each record id, in input order.
fn distinct(records: &[Record]) -> Vec<&Record> {
    let mut seen = HashSet::with_capacity(records.len());
    records.iter().filter(|r| seen.insert(r.id)).collect()
}

/// Renders an error and its sources, skipping sources already in the message.
fn error_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = cause.source();
    }
    rendered
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn visible_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{msg} {wide_bar} {pos}/{len} [{elapsed_precise}<{eta}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("Downloading images");
    bar
}

/// Advances the bar by one when a download task ends, however it ends.
struct TickOnDrop<'a>(&'a ProgressBar);

impl Drop for TickOnDrop<'_> {
    fn drop(&mut self) {
        self.0.inc(1);
    }
}

/// Finishes the bar when the fan-out scope ends.
struct FinishOnDrop<'a>(&'a ProgressBar);

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}
