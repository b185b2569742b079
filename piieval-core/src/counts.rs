//! Confusion counts for one label.
//!
//! Counts are unsigned, so a negative count cannot be represented at all.
//! Parsing rejects anything that does not fit before it reaches this type.

use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use crate::metrics::{DerivedMetric, derive};

/// True-positive / false-positive / false-negative counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfusionCounts {
    /// Expected redactions that were applied with the right label.
    pub tp: u64,
    /// Redactions applied where none (or another label) was expected.
    pub fp: u64,
    /// Expected redactions that were missed; the real value leaked.
    #[serde(rename = "fn")]
    pub fn_: u64,
}

impl ConfusionCounts {
    pub const fn new(tp: u64, fp: u64, fn_: u64) -> Self {
        Self { tp, fp, fn_ }
    }

    /// Number of ground-truth instances: `tp + fn`. Widened so it cannot overflow.
    pub fn ground_truth_total(&self) -> u128 {
        u128::from(self.tp) + u128::from(self.fn_)
    }

    /// Number of predicted instances: `tp + fp`.
    pub fn predicted_total(&self) -> u128 {
        u128::from(self.tp) + u128::from(self.fp)
    }

    /// Element-wise sum, or `None` if any count would overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Some(Self {
            tp: self.tp.checked_add(rhs.tp)?,
            fp: self.fp.checked_add(rhs.fp)?,
            fn_: self.fn_.checked_add(rhs.fn_)?,
        })
    }

    /// Sum of all counts, or `None` on overflow.
    pub fn checked_sum<'a>(counts: impl IntoIterator<Item = &'a Self>) -> Option<Self> {
        counts
            .into_iter()
            .try_fold(Self::default(), |acc, c| acc.checked_add(*c))
    }

    pub fn is_zero(&self) -> bool {
        self.tp == 0 && self.fp == 0 && self.fn_ == 0
    }

    /// Precision, recall and F1 for these counts.
    pub fn metrics(&self) -> DerivedMetric {
        derive(self.tp, self.fp, self.fn_)
    }
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            tp: self.tp + rhs.tp,
            fp: self.fp + rhs.fp,
            fn_: self.fn_ + rhs.fn_,
        }
    }
}

impl AddAssign for ConfusionCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for ConfusionCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a ConfusionCounts> for ConfusionCounts {
    fn sum<I: Iterator<Item = &'a ConfusionCounts>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
