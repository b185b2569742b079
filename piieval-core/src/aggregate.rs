//! Corpus-wide aggregation of per-file judge results.
//!
//! A `CorpusAggregate` is owned by one evaluation run. Each parsed
//! `FileResult` is recorded exactly once; recording is not idempotent and
//! recording the same result twice counts it twice. Per-label addition is
//! commutative and associative, so results collected independently can be
//! folded in any order with [`CorpusAggregate::merge`].
//!
//! Recording and merging are checked: a result whose counts would overflow
//! a per-label or pooled total is refused and leaves the aggregate untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::counts::ConfusionCounts;
use crate::error::EvalError;
use crate::labels::Label;
use crate::metrics::DerivedMetric;
use crate::report::{ParsedReport, SpanRatio};

/// Identifies one candidate / ground-truth document pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairId {
    pub candidate: String,
    pub ground_truth: String,
}

impl PairId {
    pub fn new(candidate: impl Into<String>, ground_truth: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ground_truth: ground_truth.into(),
        }
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs. {}", self.ground_truth, self.candidate)
    }
}

/// The evaluation of one document pair. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pair: PairId,
    coverage: Option<f64>,
    detected_over_total: Option<SpanRatio>,
    per_label: BTreeMap<Label, ConfusionCounts>,
    raw_report: String,
    warnings: Vec<String>,
}

impl FileResult {
    pub fn new(pair: PairId, parsed: ParsedReport, raw_report: impl Into<String>) -> Self {
        let mut warnings = parsed.warnings;
        warnings.extend(
            parsed
                .rejected_rows
                .into_iter()
                .map(|r| format!("line {} rejected ({}): {}", r.line, r.reason, r.text)),
        );
        Self {
            pair,
            coverage: parsed.coverage,
            detected_over_total: parsed.detected_over_total,
            per_label: parsed.per_label,
            raw_report: raw_report.into(),
            warnings,
        }
    }

    /// Attach an extra warning while the result is still being built.
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn pair(&self) -> &PairId {
        &self.pair
    }

    pub fn coverage(&self) -> Option<f64> {
        self.coverage
    }

    pub fn detected_over_total(&self) -> Option<SpanRatio> {
        self.detected_over_total
    }

    pub fn per_label(&self) -> &BTreeMap<Label, ConfusionCounts> {
        &self.per_label
    }

    pub fn raw_report(&self) -> &str {
        &self.raw_report
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Counts pooled over all labels of this file, `None` if they do not fit in a `u64`.
    pub fn totals(&self) -> Option<ConfusionCounts> {
        ConfusionCounts::checked_sum(self.per_label.values())
    }
}

/// Immutable view of the aggregate at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub per_label: BTreeMap<Label, ConfusionCounts>,
    pub totals: ConfusionCounts,
}

/// Running per-label totals plus every recorded file result.
#[derive(Debug, Clone, Default)]
pub struct CorpusAggregate {
    per_label: BTreeMap<Label, ConfusionCounts>,
    totals: ConfusionCounts,
    files: Vec<FileResult>,
}

impl CorpusAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file result's counts into the corpus totals.
    pub fn record(&mut self, result: FileResult) -> Result<(), EvalError> {
        let (updates, totals) = self.checked_updates(result.per_label())?;
        self.per_label.extend(updates);
        self.totals = totals;
        self.files.push(result);
        Ok(())
    }

    /// Fold another aggregate into this one.
    pub fn merge(&mut self, other: CorpusAggregate) -> Result<(), EvalError> {
        let (updates, totals) = self.checked_updates(&other.per_label)?;
        self.per_label.extend(updates);
        self.totals = totals;
        self.files.extend(other.files);
        Ok(())
    }

    /// New per-label and pooled values after adding `incoming`, computed
    /// without touching `self`.
    fn checked_updates(
        &self,
        incoming: &BTreeMap<Label, ConfusionCounts>,
    ) -> Result<(Vec<(Label, ConfusionCounts)>, ConfusionCounts), EvalError> {
        let mut totals = self.totals;
        let mut updates = Vec::with_capacity(incoming.len());
        for (label, counts) in incoming {
            if counts.is_zero() {
                continue;
            }
            let overflow = || EvalError::CountOverflow {
                label: label.to_string(),
            };
            let current = self.per_label.get(label).copied().unwrap_or_default();
            updates.push((label.clone(), current.checked_add(*counts).ok_or_else(overflow)?));
            totals = totals.checked_add(*counts).ok_or_else(overflow)?;
        }
        Ok((updates, totals))
    }

    pub fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot {
            per_label: self.per_label.clone(),
            totals: self.totals,
        }
    }

    pub fn files(&self) -> &[FileResult] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Mean coverage over files whose report stated one.
    pub fn average_coverage(&self) -> Option<f64> {
        let values: Vec<f64> = self.files.iter().filter_map(FileResult::coverage).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// Build the corpus report. The overall row is derived from pooled counts.
    pub fn report(&self, run_id: Uuid, skipped: Vec<SkippedPair>) -> CorpusReport {
        let snapshot = self.snapshot();
        CorpusReport {
            run_id,
            generated_at: Utc::now(),
            files_processed: self.files.len(),
            skipped,
            average_coverage: self.average_coverage(),
            labels: snapshot
                .per_label
                .iter()
                .map(|(label, counts)| (label.clone(), LabelMetrics::from(*counts)))
                .collect(),
            overall: LabelMetrics::from(snapshot.totals),
        }
    }
}

/// A pair that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPair {
    pub pair: PairId,
    pub reason: String,
}

/// Derived metrics together with the counts they came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
}

impl From<ConfusionCounts> for LabelMetrics {
    fn from(counts: ConfusionCounts) -> Self {
        let DerivedMetric {
            precision,
            recall,
            f1,
        } = counts.metrics();
        Self {
            precision,
            recall,
            f1,
            tp: counts.tp,
            fp: counts.fp,
            fn_: counts.fn_,
        }
    }
}

/// Final run-level report, persisted as JSON and printed as a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub files_processed: usize,
    pub skipped: Vec<SkippedPair>,
    pub average_coverage: Option<f64>,
    pub labels: BTreeMap<Label, LabelMetrics>,
    pub overall: LabelMetrics,
}

const RULE_WIDTH: usize = 80;

fn write_metrics_row(f: &mut fmt::Formatter<'_>, name: &str, m: &LabelMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:<15} {:<10.1} {:<8.1} {:<10.1} {:<4} {:<4} {:<4}",
        name, m.precision, m.recall, m.f1, m.tp, m.fp, m.fn_
    )
}

impl fmt::Display for CorpusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "RESULTS ACROSS ALL DOCUMENT PAIRS")?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;

        if self.files_processed == 0 {
            writeln!(f, "No results to summarize.")?;
            if !self.skipped.is_empty() {
                writeln!(f, "Skipped pairs: {}", self.skipped.len())?;
            }
            return Ok(());
        }

        match self.average_coverage {
            Some(avg) => writeln!(f, "Average coverage: {avg:.1}%")?,
            None => writeln!(f, "Average coverage: n/a")?,
        }
        writeln!(f, "Files processed: {}", self.files_processed)?;
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped pairs: {}", self.skipped.len())?;
        }

        writeln!(f)?;
        writeln!(f, "Aggregated metrics per label:")?;
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(
            f,
            "{:<15} {:<10} {:<8} {:<10} {:<4} {:<4} {:<4}",
            "Label Type", "Precision", "Recall", "F1-Score", "TP", "FP", "FN"
        )?;
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        for (label, metrics) in &self.labels {
            write_metrics_row(f, &format!("[{label}]"), metrics)?;
        }
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        write_metrics_row(f, "OVERALL", &self.overall)
    }
}
