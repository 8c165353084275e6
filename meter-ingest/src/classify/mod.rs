//! Classification pass: sampling class, monotonicity and grade per source.
//!
//! Sources are independent, so the pass fans out over a fixed set of workers.
//! A source is always routed to the same worker, which keeps its
//! read-merge-write of the `Source` record serialized.

use std::sync::Arc;

use energy_client::{
    domain::{Grade, Source},
    EnergyStore, StoreError,
};
use futures::StreamExt;
use time::{Duration, UtcOffset};

use crate::retry::RetryPolicy;
use crate::stats::RunStats;

pub mod grading;
pub mod monotonic;
pub mod sampling;

pub use grading::{GradeOutcome, GradeReason, GradingWindow, WindowError};
pub use monotonic::{MonotonicityChecker, Violation};

#[derive(thiserror::Error, Debug)]
pub enum ClassifyError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("worker error: {0}")]
    Worker(String),
}

#[derive(Debug, Clone)]
pub struct SourceClassification {
    pub source_name: String,
    pub outcome: GradeOutcome,
    pub violations: Vec<Violation>,
}

/// A source that could not be classified. It carries no grade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSource {
    pub source_name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ClassificationReport {
    pub window: GradingWindow,
    /// Sorted by source name.
    pub graded: Vec<SourceClassification>,
    /// Sorted by source name.
    pub skipped: Vec<SkippedSource>,
}

impl ClassificationReport {
    pub fn with_grade(&self, grade: Grade) -> impl Iterator<Item = &SourceClassification> {
        self.graded.iter().filter(move |c| c.outcome.grade == grade)
    }

    pub fn violations(&self) -> impl Iterator<Item = &Violation> {
        self.graded.iter().flat_map(|c| c.violations.iter())
    }

    pub fn record_into(&self, stats: &mut RunStats) {
        for c in &self.graded {
            stats.record_grade(c.outcome.grade);
        }
        stats.skipped_sources += self.skipped.len();
    }
}

fn shard_index(key: &str, workers: usize) -> usize {
    use std::hash::{Hash, Hasher};

    let mut h = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() as usize) % workers.max(1)
}

#[derive(Clone)]
pub struct Classifier {
    store: Arc<dyn EnergyStore>,
    offset: UtcOffset,
    lookback: Duration,
    retry: RetryPolicy,
    workers: usize,
}

impl Classifier {
    pub fn new(
        store: Arc<dyn EnergyStore>,
        offset: UtcOffset,
        lookback: Duration,
        retry: RetryPolicy,
        workers: usize,
    ) -> Self {
        Self {
            store,
            offset,
            lookback,
            retry,
            workers: workers.max(1),
        }
    }

    /// Classify one source and write its `samplingInterval` and `grade` back.
    pub async fn classify_source(
        &self,
        source_name: &str,
        window: &GradingWindow,
    ) -> Result<SourceClassification, ClassifyError> {
        let store = &self.store;
        let sampling = sampling::classify_day(
            store.as_ref(),
            &self.retry,
            source_name,
            window.start,
            self.offset,
        )
        .await?;

        // One fetch covers both the graded window and the monotonicity
        // history that precedes it.
        let (lo, hi) = window.bounds(self.offset);
        let history_start = monotonic::span_before(lo, self.lookback);
        let history = self
            .retry
            .call("get_readings", |ctx| async move {
                store.get_readings(&ctx, source_name, history_start, hi).await
            })
            .await?;

        let (_, violations) = monotonic::check_readings(&history, self.lookback);
        let violations: Vec<Violation> = violations.into_iter().filter(|v| v.ts >= lo).collect();
        let in_window: Vec<_> = history.into_iter().filter(|r| r.ts >= lo).collect();

        let outcome = grading::grade(&in_window, &violations, sampling, window, self.offset);

        let existing = match self
            .retry
            .call("get_source", |ctx| async move { store.get_source(&ctx, source_name).await })
            .await
        {
            Ok(source) => source,
            Err(StoreError::NotFound(_)) => Source::new(source_name),
            Err(e) => return Err(e.into()),
        };
        let updated = existing.classified(outcome.sampling, outcome.grade);
        let updated = &updated;
        self.retry
            .call("store_source", |ctx| async move { store.store_source(&ctx, updated, true).await })
            .await?;

        metrics::counter!("sources_graded_total", "grade" => outcome.grade.as_str()).increment(1);
        if !violations.is_empty() {
            metrics::counter!("monotonic_violations_total").increment(violations.len() as u64);
        }
        tracing::debug!(
            source = %source_name,
            grade = %outcome.grade,
            reason = %outcome.reason,
            sampling = %outcome.sampling,
            "source classified"
        );

        Ok(SourceClassification {
            source_name: source_name.to_string(),
            outcome,
            violations,
        })
    }

    /// Classify every source known to the store.
    pub async fn classify_all(&self, window: GradingWindow) -> Result<ClassificationReport, ClassifyError> {
        let store = &self.store;
        let sources = self
            .retry
            .call("get_sources", |ctx| async move { store.get_sources(&ctx).await })
            .await?;
        let names = sources.into_iter().map(|s| s.name).collect();
        self.classify_sources(names, window).await
    }

    /// Classify the named sources. Per-source failures end up in
    /// `skipped`; only a broken worker fails the whole pass.
    pub async fn classify_sources(
        &self,
        names: Vec<String>,
        window: GradingWindow,
    ) -> Result<ClassificationReport, ClassifyError> {
        let mut txs = Vec::with_capacity(self.workers);
        let mut joins = Vec::with_capacity(self.workers);

        for _ in 0..self.workers {
            let (tx, rx) = tokio::sync::mpsc::channel::<String>(64);
            txs.push(tx);

            let classifier = self.clone();
            let mut names = tokio_stream::wrappers::ReceiverStream::new(rx);
            joins.push(tokio::spawn(async move {
                let mut graded = Vec::new();
                let mut skipped = Vec::new();
                while let Some(name) = names.next().await {
                    match classifier.classify_source(&name, &window).await {
                        Ok(c) => graded.push(c),
                        Err(e) => {
                            tracing::warn!(source = %name, error = %e, "source skipped, classification failed");
                            skipped.push(SkippedSource {
                                source_name: name,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                (graded, skipped)
            }));
        }

        for name in names {
            let idx = shard_index(&name, self.workers);
            if txs[idx].send(name).await.is_err() {
                return Err(ClassifyError::Worker("classification worker channel closed".to_string()));
            }
        }

        drop(txs);

        let mut report = ClassificationReport {
            window,
            graded: Vec::new(),
            skipped: Vec::new(),
        };
        for j in joins {
            match j.await {
                Ok((graded, skipped)) => {
                    report.graded.extend(graded);
                    report.skipped.extend(skipped);
                }
                Err(e) => return Err(ClassifyError::Worker(format!("classification worker join error: {e}"))),
            }
        }

        report.graded.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        report.skipped.sort_by(|a, b| a.source_name.cmp(&b.source_name));

        tracing::info!(
            graded = report.graded.len(),
            skipped = report.skipped.len(),
            window = %report.window,
            "classification pass finished"
        );
        Ok(report)
    }
}
