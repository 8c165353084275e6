//! Import orchestration: files -> parse -> validate -> persist, followed by a
//! monotonicity pass over every source that received new readings.

use std::{path::Path, sync::Arc};

use energy_client::{domain::Reading, EnergyStore};
use time::{Duration, UtcOffset};

use crate::classify::{monotonic, MonotonicityChecker, Violation};
use crate::parse::{DeviceFamily, RowParser};
use crate::pipeline::{Pipeline, PipelineError, Transform};
use crate::retry::RetryPolicy;
use crate::sinks::reading_store::{ImportSummary, ReadingStoreSink};
use crate::sources::row_file::RowFileSource;
use crate::stats::RunStats;
use crate::transform::{validators::RangeCeiling, ParseRows, RateCeilingCheck};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Forces one device family instead of sniffing each row.
    pub family: Option<DeviceFamily>,
    /// Name for the readings of families whose rows carry none. Defaults to
    /// the file stem.
    pub source_name: Option<String>,
    pub delimiter: u8,
    pub has_headers: bool,
    pub offset: UtcOffset,
    /// Rate ceiling check; `None` disables it.
    pub rate_ceiling: Option<RangeCeiling>,
    pub monotonic_lookback: Duration,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            family: None,
            source_name: None,
            delimiter: b',',
            has_headers: false,
            offset: UtcOffset::UTC,
            rate_ceiling: None,
            monotonic_lookback: Duration::days(2),
        }
    }
}

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub stats: RunStats,
    pub violations: Vec<Violation>,
}

pub struct Importer {
    store: Arc<dyn EnergyStore>,
    retry: RetryPolicy,
    options: ImportOptions,
}

impl Importer {
    pub fn new(store: Arc<dyn EnergyStore>, retry: RetryPolicy, options: ImportOptions) -> Self {
        Self {
            store,
            retry,
            options,
        }
    }

    fn source_name_for(&self, path: &Path) -> String {
        self.options.source_name.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
    }

    /// Stream one file into the store.
    pub async fn import_file(&self, path: &Path) -> Result<ImportSummary, PipelineError> {
        let source_name = self.source_name_for(path);
        let parser = RowParser::new(self.options.family, source_name, self.options.offset);

        let mut transforms: Vec<Arc<dyn Transform<Reading, Reading> + Send + Sync>> = Vec::new();
        if let Some(ceiling) = self.options.rate_ceiling {
            transforms.push(Arc::new(RateCeilingCheck::new(
                self.store.clone(),
                ceiling,
                self.options.monotonic_lookback,
                self.retry,
            )));
        }

        let pipeline = Pipeline {
            source: RowFileSource::new(path, self.options.delimiter, self.options.has_headers),
            stage: Arc::new(ParseRows::new(parser)),
            transforms,
            sink: ReadingStoreSink::new(self.store.clone(), self.retry),
        };

        tracing::info!(file = %path.display(), "import started");
        let summary = pipeline.run().await?;
        tracing::info!(
            file = %path.display(),
            rows = summary.stats.rows_read,
            new = summary.stats.new_readings,
            existing = summary.stats.existing_readings,
            rejected = summary.stats.rejected.total(),
            "import finished"
        );
        Ok(summary)
    }

    /// Import every file in order, then check the touched sources for
    /// decreasing registers. A file that fails is logged and the run moves on.
    pub async fn import_files<P: AsRef<Path>>(&self, paths: &[P]) -> ImportOutcome {
        let mut summary = ImportSummary::default();
        for path in paths {
            let path = path.as_ref();
            match self.import_file(path).await {
                Ok(s) => summary.merge(s),
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "import failed");
                    summary.stats.files_failed += 1;
                }
            }
        }

        let mut outcome = ImportOutcome {
            stats: summary.stats,
            violations: Vec::new(),
        };

        let checker = MonotonicityChecker::new(
            self.store.clone(),
            self.options.monotonic_lookback,
            self.retry,
        );
        for (name, (first, last)) in summary.touched {
            // A new reading can also break the stream for its successors.
            let to = monotonic::span_after(last, checker.lookback());
            match checker.check_source(&name, first, to).await {
                Ok(found) => {
                    for v in &found {
                        tracing::warn!(violation = %v, "decreasing register");
                    }
                    if !found.is_empty() {
                        metrics::counter!("monotonic_violations_total").increment(found.len() as u64);
                    }
                    outcome.stats.monotonic_violations += found.len();
                    outcome.violations.extend(found);
                }
                Err(e) => {
                    tracing::warn!(source = %name, error = %e, "monotonicity check failed");
                    outcome.stats.monotonic_check_failures += 1;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_client::{domain::keys, InMemoryStore, StoreContext};
    use std::io::Write;
    use time::macros::datetime;

    fn legacy_file(rows: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        for r in rows {
            writeln!(file, "{r}").unwrap();
        }
        file
    }

    fn importer(store: Arc<InMemoryStore>, options: ImportOptions) -> Importer {
        Importer::new(store, RetryPolicy::none(), options)
    }

    #[tokio::test]
    async fn rows_are_counted_by_outcome() {
        let file = legacy_file(&[
            "2024-01-01 00:00:00,1.0,0.1,0.2,0.3",
            "2024-01-01 01:00:00,1.5,0.1,0.2,0.3",
            "2024-01-01 02:00:00,,0.1,0.2,0.3",
            "2024-01-01 03:00:00,abc,0.1,0.2,0.3",
            "2024-01-01 04:00:00,-50,0.1,0.2,0.3",
            "not,enough",
        ]);
        let store = Arc::new(InMemoryStore::new());
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            source_name: Some("panel-7".to_string()),
            ..ImportOptions::default()
        };

        let outcome = importer(store.clone(), options).import_files(&[file.path()]).await;

        let s = &outcome.stats;
        assert_eq!(s.rows_read, 6);
        assert_eq!(s.new_readings, 2);
        assert_eq!(s.new_sources, 1);
        assert_eq!(s.rejected.blank, 1);
        assert_eq!(s.rejected.not_numeric, 1);
        assert_eq!(s.rejected.negative, 1);
        assert_eq!(s.rejected.bad_shape, 1);
        assert_eq!(store.reading_count("panel-7").await, 2);
    }

    #[tokio::test]
    async fn reimport_counts_existing_and_stores_nothing_new() {
        let file = legacy_file(&["2024-01-01 00:00:00,1.0,0.1,0.2,0.3"]);
        let store = Arc::new(InMemoryStore::new());
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            ..ImportOptions::default()
        };
        let imp = importer(store.clone(), options);

        imp.import_files(&[file.path()]).await;
        let second = imp.import_files(&[file.path()]).await;

        assert_eq!(second.stats.new_readings, 0);
        assert_eq!(second.stats.existing_readings, 1);
        assert_eq!(second.stats.new_sources, 0);
    }

    #[tokio::test]
    async fn source_name_defaults_to_file_stem() {
        let file = legacy_file(&["2024-01-01 00:00:00,1.0,0.1,0.2,0.3"]);
        let stem = file.path().file_stem().unwrap().to_string_lossy().into_owned();
        let store = Arc::new(InMemoryStore::new());
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            ..ImportOptions::default()
        };

        importer(store.clone(), options).import_files(&[file.path()]).await;

        assert_eq!(store.reading_count(&stem).await, 1);
    }

    #[tokio::test]
    async fn decrease_against_stored_history_is_reported() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = StoreContext::background();
        store
            .store_source(&ctx, &energy_client::domain::Source::new("panel-7"), false)
            .await
            .unwrap();
        store
            .store_reading(
                &ctx,
                &energy_client::domain::Reading {
                    source_name: "panel-7".to_string(),
                    mtu_id: String::new(),
                    ts: datetime!(2024-01-01 05:00:00 UTC),
                    energy_wh: 9_000,
                    raw_fields: Default::default(),
                },
            )
            .await
            .unwrap();
        // Arrives later but sits between 04:00 and 05:00 in time.
        let file = legacy_file(&["2024-01-01 04:00:00,2.0,0.1,0.2,0.3", "2024-01-01 06:00:00,9.5,0.1,0.2,0.3"]);
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            source_name: Some("panel-7".to_string()),
            ..ImportOptions::default()
        };

        let outcome = importer(store.clone(), options).import_files(&[file.path()]).await;

        assert_eq!(outcome.stats.monotonic_violations, 0);
        assert!(outcome.violations.is_empty());

        let file = legacy_file(&["2024-01-01 07:00:00,3.0,0.1,0.2,0.3"]);
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            source_name: Some("panel-7".to_string()),
            ..ImportOptions::default()
        };
        let outcome = importer(store.clone(), options).import_files(&[file.path()]).await;

        assert_eq!(outcome.stats.monotonic_violations, 1);
        assert_eq!(outcome.violations[0].previous_reading, "9500");
        let source = store.get_source(&ctx, "panel-7").await.unwrap();
        assert_eq!(source.property(keys::GRADE), None);
    }

    #[tokio::test]
    async fn rate_ceiling_rejects_implausible_jump() {
        let file = legacy_file(&["2024-01-01 00:00:00,1.0,0,0,0", "2024-01-01 01:00:00,500.0,0,0,0"]);
        let store = Arc::new(InMemoryStore::new());
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            source_name: Some("panel-7".to_string()),
            rate_ceiling: Some(RangeCeiling {
                hourly_wh_per_hour: 50_000.0,
                daily_wh_per_hour: 5_000.0,
            }),
            ..ImportOptions::default()
        };

        let outcome = importer(store.clone(), options).import_files(&[file.path()]).await;

        assert_eq!(outcome.stats.new_readings, 1);
        assert_eq!(outcome.stats.rejected.rate_ceiling, 1);
    }

    #[tokio::test]
    async fn reading_at_the_end_of_the_calendar_is_imported_and_checked() {
        let file = legacy_file(&["2024-01-01 00:00:00,1.0,0,0,0", "9999-12-31 00:00:00,2.0,0,0,0"]);
        let store = Arc::new(InMemoryStore::new());
        let options = ImportOptions {
            family: Some(DeviceFamily::SubPanelLegacy),
            source_name: Some("panel-7".to_string()),
            ..ImportOptions::default()
        };

        let outcome = importer(store.clone(), options).import_files(&[file.path()]).await;

        assert_eq!(outcome.stats.rows_read, 2);
        assert_eq!(outcome.stats.new_readings, 2);
        assert_eq!(outcome.stats.monotonic_violations, 0);
        assert_eq!(outcome.stats.monotonic_check_failures, 0);
        assert_eq!(store.reading_count("panel-7").await, 2);
    }

    #[tokio::test]
    async fn missing_file_still_yields_stats() {
        let store = Arc::new(InMemoryStore::new());
        let outcome = importer(store, ImportOptions::default())
            .import_files(&["/definitely/not/here.csv"])
            .await;
        assert_eq!(outcome.stats.new_readings, 0);
        assert_eq!(outcome.stats.rows_read, 0);
        assert_eq!(outcome.stats.files_failed, 1);
        assert_eq!(outcome.stats.rejected.unreadable, 0);
        assert_eq!(outcome.stats.store_failures, 0);
    }
}
