//! Judge report parser.
//!
//! The judge answers in a fixed tabular format:
//!
//! ```text
//! ================================================================================
//! 📁 BEISPIEL: mail_03.txt
//! 🎯 GESAMTABDECKUNG: 66.7%   Erkannte Spans: 2/3
//! 📈 METRIKEN PRO LABEL-TYP:
//! --------------------------------------------------------------------------------
//! Label Type     Precision    Recall    F1-Score    TP    FP    FN
//! [GIVENNAME]    100.0%       100.0%    100.0%      1     0     0
//! [IBAN]         0.0%         0.0%      0.0%        0     0     1
//! ================================================================================
//! ```
//!
//! The English markers `coverage:` and `detected spans:` are accepted as well.
//! Everything else in the text is ignored. The parser never re-derives the
//! judge's classification; it only extracts what the report states.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::counts::ConfusionCounts;
use crate::error::ReportError;
use crate::labels::Label;

static COVERAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:GESAMTABDECKUNG|coverage)\**:[*\s]*\[?(\d+(?:\.\d*)?)\]?%")
        .expect("coverage pattern is valid")
});

static SPANS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Erkannte Spans|detected spans)\**:[*\s]*\[?(\d+)\]?\s*/\s*\[?(\d+)\]?")
        .expect("spans pattern is valid")
});

// Count cells are captured loosely so that negative or fractional values are
// seen and rejected instead of silently skipped or truncated.
static ROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\[([A-Z_]+)\][ \t]+",
        r"(\d+(?:\.\d*)?)%[ \t]+(\d+(?:\.\d*)?)%[ \t]+(\d+(?:\.\d*)?)%[ \t]+",
        r"(-?\d[\d.,]*)[ \t]+(-?\d[\d.,]*)[ \t]+(-?\d[\d.,]*)",
    ))
    .expect("row pattern is valid")
});

/// The `detected/total` span ratio stated by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRatio {
    pub detected: u64,
    pub total: u64,
}

impl fmt::Display for SpanRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.detected, self.total)
    }
}

/// One table row as printed by the judge.
///
/// The percentages are display-only; only the counts feed aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub counts: ConfusionCounts,
}

/// A table row that matched the row shape but carried unusable counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRejection {
    /// 1-based line number within the report.
    pub line: usize,
    pub text: String,
    pub reason: String,
}

/// Structured content extracted from one judge report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedReport {
    pub coverage: Option<f64>,
    pub detected_over_total: Option<SpanRatio>,
    /// Accepted rows in report order.
    pub rows: Vec<ReportRow>,
    /// Counts per label, summed over repeated rows.
    pub per_label: BTreeMap<Label, ConfusionCounts>,
    pub rejected_rows: Vec<RowRejection>,
    pub warnings: Vec<String>,
}

impl ParsedReport {
    /// Whether some expected field was missing or unusable.
    pub fn is_partial(&self) -> bool {
        self.coverage.is_none()
            || self.detected_over_total.is_none()
            || self.per_label.is_empty()
            || !self.rejected_rows.is_empty()
    }

    fn has_signal(&self) -> bool {
        self.coverage.is_some() || self.detected_over_total.is_some() || !self.rows.is_empty()
    }
}

/// Parse the full text of a judge report.
///
/// Fails only when the text is blank or carries no signal at all; missing
/// fields and malformed rows are recorded on the result instead.
pub fn parse_report(text: &str) -> Result<ParsedReport, ReportError> {
    if text.trim().is_empty() {
        return Err(ReportError::Empty);
    }

    let mut report = ParsedReport {
        coverage: parse_coverage(text),
        detected_over_total: parse_spans(text),
        ..Default::default()
    };

    if let Some(c) = report.coverage
        && !(0.0..=100.0).contains(&c)
    {
        report
            .warnings
            .push(format!("coverage {c}% is outside 0-100, ignored"));
        report.coverage = None;
    }
    if let Some(ratio) = report.detected_over_total
        && ratio.detected > ratio.total
    {
        report
            .warnings
            .push(format!("span ratio {ratio} has detected > total, ignored"));
        report.detected_over_total = None;
    }

    for (idx, line) in text.lines().enumerate() {
        let Some(caps) = ROW.captures(line) else {
            continue;
        };
        let accepted = parse_row(&caps).and_then(|row| {
            let current = report.per_label.get(&row.label).copied().unwrap_or_default();
            match current.checked_add(row.counts) {
                Some(summed) => Ok((row, summed)),
                None => Err(format!("[{}] counts overflow when added to earlier rows", row.label)),
            }
        });
        match accepted {
            Ok((row, summed)) => {
                report.per_label.insert(row.label.clone(), summed);
                report.rows.push(row);
            }
            Err(reason) => {
                warn!(line = idx + 1, reason = %reason, "Rejected malformed report row");
                report.rejected_rows.push(RowRejection {
                    line: idx + 1,
                    text: line.trim().to_string(),
                    reason,
                });
            }
        }
    }

    if !report.has_signal() {
        return Err(ReportError::NoSignal);
    }

    if report.coverage.is_none() {
        report.warnings.push("no coverage line found".to_string());
    }
    if report.detected_over_total.is_none() {
        report.warnings.push("no detected-spans line found".to_string());
    }
    if report.rows.is_empty() {
        report.warnings.push("no label rows found".to_string());
    }

    debug!(
        rows = report.rows.len(),
        labels = report.per_label.len(),
        rejected = report.rejected_rows.len(),
        coverage = ?report.coverage,
        "Parsed judge report"
    );

    Ok(report)
}

fn parse_coverage(text: &str) -> Option<f64> {
    COVERAGE
        .captures(text)
        .and_then(|caps| caps[1].parse::<f64>().ok())
}

fn parse_spans(text: &str) -> Option<SpanRatio> {
    let caps = SPANS.captures(text)?;
    Some(SpanRatio {
        detected: caps[1].parse().ok()?,
        total: caps[2].parse().ok()?,
    })
}

fn parse_row(caps: &regex::Captures<'_>) -> Result<ReportRow, String> {
    let percent = |i: usize| -> Result<f64, String> {
        caps[i]
            .parse::<f64>()
            .map_err(|_| format!("invalid percentage '{}'", &caps[i]))
    };
    // A count closing a sentence may carry one trailing '.' or ','.
    let count = |i: usize, name: &str| -> Result<u64, String> {
        let cell = &caps[i];
        cell.strip_suffix(['.', ','])
            .unwrap_or(cell)
            .parse::<u64>()
            .map_err(|_| format!("{name} '{}' is not a non-negative integer", &caps[i]))
    };

    Ok(ReportRow {
        label: Label::new(&caps[1]),
        precision: percent(2)?,
        recall: percent(3)?,
        f1: percent(4)?,
        counts: ConfusionCounts::new(count(5, "tp")?, count(6, "fp")?, count(7, "fn")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FULL_REPORT: &str = "\
================================================================================
📁 BEISPIEL: mail_03.txt
🎯 GESAMTABDECKUNG: 66.7%   Erkannte Spans: 2/3
📈 METRIKEN PRO LABEL-TYP:
--------------------------------------------------------------------------------
Label Type     Precision    Recall    F1-Score    TP    FP    FN
[GIVENNAME]    100.0%       100.0%    100.0%      1     0     0
[SURNAME]      100.0%       100.0%    100.0%      1     0     0
[IBAN]         0.0%         0.0%      0.0%        0     0     1
================================================================================";

    #[test]
    fn test_parse_full_report() {
        let report = parse_report(FULL_REPORT).unwrap();
        assert_eq!(report.coverage, Some(66.7));
        assert_eq!(
            report.detected_over_total,
            Some(SpanRatio {
                detected: 2,
                total: 3
            })
        );
        assert_eq!(report.rows.len(), 3);
        assert_eq!(
            report.per_label[&Label::from("IBAN")],
            ConfusionCounts::new(0, 0, 1)
        );
        assert!(!report.is_partial());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_format_template_line_is_not_a_row() {
        let text = "GESAMTABDECKUNG: 50%\n[LABEL]        [xx.x]%      [xx.x]%   [xx.x]%     [n]   [n]   [n]";
        let report = parse_report(text).unwrap();
        assert!(report.rows.is_empty());
        assert!(report.rejected_rows.is_empty());
    }

    #[test]
    fn test_english_markers() {
        let text = "coverage: 100%\ndetected spans: 3/3\n[AMOUNT] 100.0% 100.0% 100.0% 1 0 0";
        let report = parse_report(text).unwrap();
        assert_eq!(report.coverage, Some(100.0));
        assert_eq!(report.detected_over_total.unwrap().total, 3);
    }

    #[test]
    fn test_first_coverage_marker_wins() {
        let text = "GESAMTABDECKUNG: 40.0%\nGESAMTABDECKUNG: 90.0%\n[IBAN] 0.0% 0.0% 0.0% 0 0 1";
        assert_eq!(parse_report(text).unwrap().coverage, Some(40.0));
    }

    #[test]
    fn test_bracketed_values_from_template_echo() {
        let text = "GESAMTABDECKUNG: [75.0]%   Erkannte Spans: [3]/[4]";
        let report = parse_report(text).unwrap();
        assert_eq!(report.coverage, Some(75.0));
        assert_eq!(report.detected_over_total.unwrap().to_string(), "3/4");
    }

    #[test]
    fn test_repeated_label_is_summed() {
        let text = "\
[IBAN]         0.0%     0.0%     0.0%     0   0   1
[IBAN]         0.0%     0.0%     0.0%     0   0   1";
        let report = parse_report(text).unwrap();
        assert_eq!(report.per_label.len(), 1);
        assert_eq!(
            report.per_label[&Label::from("IBAN")],
            ConfusionCounts::new(0, 0, 2)
        );
        assert_eq!(report.rows.len(), 2);
    }

    #[test]
    fn test_missing_coverage_is_none_not_zero() {
        let text = "Erkannte Spans: 1/1\n[GIVENNAME] 100.0% 100.0% 100.0% 1 0 0";
        let report = parse_report(text).unwrap();
        assert_eq!(report.coverage, None);
        assert!(report.is_partial());
        assert!(report.warnings.iter().any(|w| w.contains("coverage")));
        assert_eq!(report.per_label.len(), 1);
    }

    #[test]
    fn test_coverage_without_rows_is_ok() {
        let report = parse_report("GESAMTABDECKUNG: 100.0%   Erkannte Spans: 0/0").unwrap();
        assert!(report.per_label.is_empty());
        assert!(report.is_partial());
    }

    #[test]
    fn test_empty_report_is_error() {
        assert_eq!(parse_report(""), Err(ReportError::Empty));
        assert_eq!(parse_report("  \n\t "), Err(ReportError::Empty));
    }

    #[test]
    fn test_report_without_signal_is_error() {
        let text = "I'm sorry, I cannot compare these documents.";
        assert_eq!(parse_report(text), Err(ReportError::NoSignal));
    }

    #[test]
    fn test_negative_count_row_is_rejected() {
        let text = "\
[GIVENNAME] 100.0% 100.0% 100.0% 1 0 0
[IBAN] 0.0% 0.0% 0.0% 0 -1 1";
        let report = parse_report(text).unwrap();
        assert_eq!(report.per_label.len(), 1);
        assert!(!report.per_label.contains_key(&Label::from("IBAN")));
        assert_eq!(report.rejected_rows.len(), 1);
        assert_eq!(report.rejected_rows[0].line, 2);
        assert!(report.rejected_rows[0].reason.contains("fp"));
        assert!(report.is_partial());
    }

    #[test]
    fn test_fractional_count_row_is_rejected() {
        let text = "[SURNAME] 50.0% 50.0% 50.0% 1.5 0 1";
        // The only row is rejected, so nothing is left to extract.
        assert_eq!(parse_report(text), Err(ReportError::NoSignal));
    }

    #[test]
    fn test_overflowing_count_row_is_rejected() {
        let text = "GESAMTABDECKUNG: 0%\n[DATE] 0.0% 0.0% 0.0% 0 0 99999999999999999999999";
        let report = parse_report(text).unwrap();
        assert!(report.per_label.is_empty());
        assert_eq!(report.rejected_rows.len(), 1);
    }

    #[test]
    fn test_repeated_label_overflow_rejects_later_row() {
        let text = "\
[IBAN] 0.0% 0.0% 0.0% 0 0 18446744073709551615
[IBAN] 0.0% 0.0% 0.0% 0 0 5";
        let report = parse_report(text).unwrap();
        assert_eq!(
            report.per_label[&Label::from("IBAN")],
            ConfusionCounts::new(0, 0, u64::MAX)
        );
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rejected_rows.len(), 1);
        assert_eq!(report.rejected_rows[0].line, 2);
        assert!(report.rejected_rows[0].reason.contains("overflow"));
    }

    #[test]
    fn test_count_with_trailing_punctuation_is_accepted() {
        let text = "\
[IBAN] 0.0% 0.0% 0.0% 0 0 1.
[EMAIL] 100.0% 100.0% 100.0% 2, 0 0";
        let report = parse_report(text).unwrap();
        assert!(report.rejected_rows.is_empty());
        assert_eq!(
            report.per_label[&Label::from("IBAN")],
            ConfusionCounts::new(0, 0, 1)
        );
        assert_eq!(
            report.per_label[&Label::from("EMAIL")],
            ConfusionCounts::new(2, 0, 0)
        );
    }

    #[test]
    fn test_table_percentages_are_not_validated() {
        // Percentages contradict the counts; the counts are taken as-is.
        let text = "[EMAIL] 12.0% 34.0% 56.0% 1 1 0";
        let report = parse_report(text).unwrap();
        assert_eq!(report.rows[0].precision, 12.0);
        assert_eq!(
            report.per_label[&Label::from("EMAIL")],
            ConfusionCounts::new(1, 1, 0)
        );
    }

    #[test]
    fn test_unknown_label_is_tracked() {
        let text = "[ACCOUNTNR] 0.0% 0.0% 0.0% 0 1 0\n[CUSTOMER_NUMBER] 0.0% 0.0% 0.0% 0 0 1";
        let report = parse_report(text).unwrap();
        assert_eq!(
            report.per_label[&Label::from("ACCOUNTNR")],
            ConfusionCounts::new(0, 1, 0)
        );
        assert_eq!(
            report.per_label[&Label::from("CUSTOMER_NUMBER")],
            ConfusionCounts::new(0, 0, 1)
        );
    }

    #[test]
    fn test_out_of_range_coverage_is_dropped() {
        let text = "GESAMTABDECKUNG: 150%\n[IBAN] 0.0% 0.0% 0.0% 0 0 1";
        let report = parse_report(text).unwrap();
        assert_eq!(report.coverage, None);
        assert!(report.warnings.iter().any(|w| w.contains("150")));
    }

    #[test]
    fn test_inverted_span_ratio_is_dropped() {
        let text = "Erkannte Spans: 5/3\n[IBAN] 0.0% 0.0% 0.0% 0 0 1";
        let report = parse_report(text).unwrap();
        assert_eq!(report.detected_over_total, None);
    }

    #[test]
    fn test_rows_do_not_span_lines() {
        let text = "GESAMTABDECKUNG: 0%\n[IBAN] 0.0% 0.0% 0.0%\n0 0 1";
        let report = parse_report(text).unwrap();
        assert!(report.rows.is_empty());
    }
}
