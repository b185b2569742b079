//! Precision, recall and F1 derivation.
//!
//! All values are percentages in `[0, 100]`. A zero denominator yields `0.0`
//! rather than NaN: no predictions means no evidence of correctness, and no
//! ground-truth instances means nothing was recalled.

use serde::{Deserialize, Serialize};

/// Derived percentages for one set of confusion counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetric {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Derive precision, recall and F1 (as percentages) from raw counts.
pub fn derive(tp: u64, fp: u64, fn_: u64) -> DerivedMetric {
    let tp = u128::from(tp);
    let precision = ratio_percent(tp, tp + u128::from(fp));
    let recall = ratio_percent(tp, tp + u128::from(fn_));
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    DerivedMetric {
        precision,
        recall,
        // Harmonic mean can land a ulp above 100.0.
        f1: f1.clamp(0.0, 100.0),
    }
}

fn ratio_percent(numerator: u128, denominator: u128) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (100.0 * numerator as f64 / denominator as f64).clamp(0.0, 100.0)
    }
}
