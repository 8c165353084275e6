//! Plain-text run artifacts. They are for people, not for reloading.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::Context;
use energy_client::domain::Grade;

use crate::classify::{ClassificationReport, Violation};
use crate::stats::RunStats;

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Creates `dir` when missing.
    pub fn new<P: Into<PathBuf>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("creating report dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn create(&self, name: &str) -> anyhow::Result<BufWriter<File>> {
        let path = self.dir.join(name);
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        Ok(BufWriter::new(file))
    }

    /// One `grade_<GRADE>.txt` per grade, plus `skipped.txt`.
    pub fn write_classification(&self, report: &ClassificationReport) -> anyhow::Result<()> {
        for grade in Grade::ALL {
            let mut out = self.create(&format!("grade_{grade}.txt"))?;
            writeln!(out, "interval: {}", report.window)?;
            let mut n = 0;
            for c in report.with_grade(grade) {
                writeln!(out, "{}\t{}\t{}", c.source_name, c.outcome.sampling, c.outcome.reason)?;
                n += 1;
            }
            writeln!(out, "sources: {n}")?;
            out.flush()?;
        }

        let mut out = self.create("skipped.txt")?;
        writeln!(out, "interval: {}", report.window)?;
        for s in &report.skipped {
            writeln!(out, "{}\t{}", s.source_name, s.reason)?;
        }
        writeln!(out, "sources: {}", report.skipped.len())?;
        out.flush()?;
        Ok(())
    }

    pub fn write_violations<'a, I>(&self, violations: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = &'a Violation>,
    {
        let mut out = self.create("monotonicity.txt")?;
        for v in violations {
            writeln!(out, "{v}")?;
        }
        out.flush()?;
        Ok(())
    }

    /// `summary.txt` for people and `summary.json` for scripts.
    pub fn write_summary(&self, stats: &RunStats) -> anyhow::Result<()> {
        let mut out = self.create("summary.txt")?;
        writeln!(out, "{}", stats.summary())?;
        out.flush()?;

        let out = self.create("summary.json")?;
        serde_json::to_writer_pretty(out, stats).context("writing summary.json")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{GradeOutcome, GradeReason, GradingWindow, SkippedSource, SourceClassification};
    use energy_client::domain::SamplingInterval;
    use time::macros::date;

    fn report() -> ClassificationReport {
        let classified = |name: &str, grade, reason| SourceClassification {
            source_name: name.to_string(),
            outcome: GradeOutcome {
                grade,
                reason,
                sampling: SamplingInterval::Daily,
            },
            violations: Vec::new(),
        };
        ClassificationReport {
            window: GradingWindow::new(date!(2024-06-02), date!(2024-06-04), 1).unwrap(),
            graded: vec![
                classified("a", Grade::ADaily, GradeReason::Complete),
                classified("b", Grade::C, GradeReason::NoData),
                classified("c", Grade::C, GradeReason::NonMonotonic),
            ],
            skipped: vec![SkippedSource {
                source_name: "d".to_string(),
                reason: "store error: timed out".to_string(),
            }],
        }
    }

    #[test]
    fn every_grade_gets_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path().join("out")).unwrap();

        writer.write_classification(&report()).unwrap();

        let c = fs::read_to_string(writer.dir().join("grade_C.txt")).unwrap();
        assert!(c.starts_with("interval: 2024-06-02 .. 2024-06-04"));
        assert!(c.contains("b\tdaily\tno data in interval"));
        assert!(c.contains("c\tdaily\tnon-monotonic data"));
        assert!(c.contains("sources: 2"));

        let b = fs::read_to_string(writer.dir().join("grade_B.txt")).unwrap();
        assert!(b.contains("sources: 0"));

        let skipped = fs::read_to_string(writer.dir().join("skipped.txt")).unwrap();
        assert!(skipped.contains("d\tstore error: timed out"));
    }

    #[test]
    fn summary_is_written_even_for_an_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::new(dir.path()).unwrap();

        writer.write_summary(&RunStats::new()).unwrap();

        let text = fs::read_to_string(dir.path().join("summary.txt")).unwrap();
        assert!(text.contains("Rows: 0 read"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("summary.json")).unwrap()).unwrap();
        assert_eq!(json["new_readings"], 0);
    }
}
