//! Paged streaming of source records through an importer.
//!
//! A [`PageSource`] pre-counts its records and hands out pages over a stable
//! order; a [`RecordSink`] imports one record at a time. The [`BatchRunner`]
//! drives the two:
//!
//! - it requests pages of a fixed size at increasing offsets and stops when a
//!   page comes back empty
//! - it checks for cancellation between pages
//! - a failing record is logged and counted, and the run goes on, unless the
//!   error means a store is unreachable ([`MigrateError::is_fatal`])
//! - progress is logged after every page

mod outcome;
mod progress;

pub use outcome::{PassStats, RecordOutcome, SkipReason};
pub use progress::{ProgressTracker, ProgressUpdate};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};

/// A page to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Source rows the page covered. The next page starts after them.
    pub rows: usize,
    /// Records to import, in processing order.
    pub items: Vec<T>,
}

impl<T> Page<T> {
    /// A page whose records are its rows.
    pub fn of(items: Vec<T>) -> Self {
        Self {
            rows: items.len(),
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            rows: 0,
            items: Vec::new(),
        }
    }
}

/// Paged access to the records of one pass.
#[async_trait]
pub trait PageSource: Send {
    type Item: Send + Sync;

    /// Number of records the pass will process.
    async fn total(&mut self) -> Result<u64>;

    /// Fetch a page. An empty page ends the pass.
    async fn fetch(&mut self, page: PageRequest) -> Result<Page<Self::Item>>;
}

/// Imports records of one pass.
#[async_trait]
pub trait RecordSink<T: Send + Sync>: Send {
    async fn import(&mut self, record: &T) -> Result<RecordOutcome>;

    /// Short description of a record for logs, e.g. `post 11`.
    fn describe(&self, record: &T) -> String;
}

/// Drives a [`PageSource`] into a [`RecordSink`].
pub struct BatchRunner {
    pass: String,
    batch_size: usize,
    cancel: Option<CancellationToken>,
    progress: bool,
}

impl BatchRunner {
    pub fn new(pass: impl Into<String>, batch_size: usize) -> Self {
        Self {
            pass: pass.into(),
            batch_size: batch_size.max(1),
            cancel: None,
            progress: false,
        }
    }

    /// Stop between pages once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Also print a JSON progress line to stderr after every page.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    pub async fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<PassStats>
    where
        S: PageSource,
        K: RecordSink<S::Item>,
    {
        let total = source.total().await?;
        info!("{}: {} records to process", self.pass, total);

        let mut stats = PassStats::new(&self.pass, total);
        let mut tracker = ProgressTracker::new(total);
        let mut offset = 0;

        loop {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                info!("{}: cancelled after {} records", self.pass, tracker.processed());
                return Err(MigrateError::Cancelled);
            }

            let page = source
                .fetch(PageRequest {
                    offset,
                    limit: self.batch_size,
                })
                .await?;
            if page.is_empty() {
                break;
            }

            for record in &page.items {
                match sink.import(record).await {
                    Ok(outcome) => {
                        match &outcome {
                            RecordOutcome::Skipped(SkipReason::AlreadyImported) => {
                                debug!("{}: {} already imported", self.pass, sink.describe(record));
                            }
                            RecordOutcome::Skipped(reason) => {
                                warn!("{}: skipped {}: {}", self.pass, sink.describe(record), reason);
                            }
                            RecordOutcome::Created | RecordOutcome::Updated => {}
                        }
                        stats.record(&outcome);
                    }
                    Err(e) if e.is_fatal() => {
                        warn!("{}: aborting at {}: {}", self.pass, sink.describe(record), e);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("{}: failed to import {}: {}", self.pass, sink.describe(record), e);
                        stats.record_failure();
                    }
                }
            }

            offset += page.rows;
            tracker.advance(page.items.len() as u64);
            stats.processed = tracker.processed();
            self.report(&stats, &tracker);
        }

        stats.processed = tracker.processed();
        info!(
            "{} in {:.1}s",
            stats,
            tracker.elapsed().as_secs_f64()
        );
        Ok(stats)
    }

    fn report(&self, stats: &PassStats, tracker: &ProgressTracker) {
        info!(
            "{}: {}/{} ({:.1}%, {:.0} records/s)",
            self.pass,
            tracker.processed(),
            tracker.total(),
            tracker.percent(),
            tracker.rate()
        );
        if self.progress {
            ProgressUpdate {
                pass: &self.pass,
                processed: tracker.processed(),
                total: tracker.total(),
                percent: tracker.percent(),
                created: stats.created,
                skipped: stats.skipped + stats.already_imported,
                failed: stats.failed,
            }
            .emit();
        }
    }
}

/// A [`PageSource`] over records already in memory.
pub struct VecPages<T> {
    items: Vec<T>,
}

impl<T> VecPages<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> PageSource for VecPages<T> {
    type Item = T;

    async fn total(&mut self) -> Result<u64> {
        Ok(self.items.len() as u64)
    }

    async fn fetch(&mut self, page: PageRequest) -> Result<Page<T>> {
        let start = page.offset.min(self.items.len());
        let end = (start + page.limit).min(self.items.len());
        Ok(Page::of(self.items[start..end].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Imports ids once, failing on the ids it is told to.
    struct Recorder {
        seen: HashSet<i64>,
        fail: HashSet<i64>,
        fatal_at: Option<i64>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                seen: HashSet::new(),
                fail: HashSet::new(),
                fatal_at: None,
            }
        }
    }

    #[async_trait]
    impl RecordSink<i64> for Recorder {
        async fn import(&mut self, record: &i64) -> Result<RecordOutcome> {
            if self.fatal_at == Some(*record) {
                return Err(MigrateError::pool("connection refused", "test"));
            }
            if self.fail.contains(record) {
                return Err(MigrateError::Validation(format!("bad row {}", record)));
            }
            if !self.seen.insert(*record) {
                return Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported));
            }
            Ok(RecordOutcome::Created)
        }

        fn describe(&self, record: &i64) -> String {
            format!("record {}", record)
        }
    }

    /// Counts fetches and reports a total lower than the real row count.
    struct Undercounted {
        inner: VecPages<i64>,
        fetches: usize,
    }

    #[async_trait]
    impl PageSource for Undercounted {
        type Item = i64;

        async fn total(&mut self) -> Result<u64> {
            Ok(3)
        }

        async fn fetch(&mut self, page: PageRequest) -> Result<Page<i64>> {
            self.fetches += 1;
            self.inner.fetch(page).await
        }
    }

    #[tokio::test]
    async fn test_stops_on_empty_page() {
        let mut source = Undercounted {
            inner: VecPages::new((1..=5).collect()),
            fetches: 0,
        };
        let mut sink = Recorder::new();
        let stats = BatchRunner::new("test", 2)
            .run(&mut source, &mut sink)
            .await
            .unwrap();

        // Pages [1,2] [3,4] [5] and the empty page that ends the run.
        assert_eq!(source.fetches, 4);
        assert_eq!(stats.created, 5);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processed, 3);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut source = VecPages::new((1..=4).collect());
        let mut sink = Recorder::new();
        sink.fail.insert(2);
        let stats = BatchRunner::new("test", 10)
            .run(&mut source, &mut sink)
            .await
            .unwrap();
        assert_eq!(stats.created, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.processed, 4);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts() {
        let mut source = VecPages::new((1..=4).collect());
        let mut sink = Recorder::new();
        sink.fatal_at = Some(3);
        let err = BatchRunner::new("test", 10)
            .run(&mut source, &mut sink)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!sink.seen.contains(&4));
    }

    #[tokio::test]
    async fn test_rerun_skips_already_imported() {
        let mut sink = Recorder::new();
        let runner = BatchRunner::new("test", 3);
        runner
            .run(&mut VecPages::new((1..=4).collect()), &mut sink)
            .await
            .unwrap();
        let second = runner
            .run(&mut VecPages::new((1..=4).collect()), &mut sink)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_imported, 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let token = CancellationToken::new();
        token.cancel();
        let mut sink = Recorder::new();
        let err = BatchRunner::new("test", 3)
            .with_cancel(token)
            .run(&mut VecPages::new(vec![1_i64]), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert!(sink.seen.is_empty());
    }
}
