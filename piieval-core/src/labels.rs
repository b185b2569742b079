//! PII label taxonomy.
//!
//! Labels are opaque, case-sensitive identifiers such as `GIVENNAME` or `IBAN`.
//! The taxonomy lists the categories the redactor is asked to use, but it is
//! advisory: labels outside it are still accepted and tracked so that a wrong
//! label emitted by a redactor shows up in the per-label statistics.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// The recognized PII categories.
pub const TAXONOMY: &[&str] = &[
    "GIVENNAME",
    "SURNAME",
    "DATEOFBIRTH",
    "PASSWORD",
    "USERNAME",
    "LINK",
    "ACCOUNTNUM",
    "IDCARDNUM",
    "DRIVERLICENSENUM",
    "SOCIALNUM",
    "TAXNUM",
    "CITY",
    "STREET",
    "ZIPCODE",
    "BUILDINGNUM",
    "CREDITCARDNUMBER",
    "BIC",
    "AMOUNT",
    "IBAN",
    "TELEPHONENUM",
    "EMAIL",
    "BUNDLE_CODE",
    "CONTRACT_NUMBER",
    "METER_NUMBER",
    "METER_AMOUNT",
    "CUSTOMER_NUMBER",
    "COMPANY_REGISTER",
    "ACCOUNT_CONTRACT_NUMBER",
    "INVOICE_NUMBER",
    "DAY",
    "MONTH",
    "YEAR",
    "DATE",
    "ORGANISATION",
    "GENERIC_NUMBER",
];

static LABEL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Z_]+)\]").expect("label marker pattern is valid"));

/// A PII category identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this label belongs to the taxonomy.
    pub fn is_known(&self) -> bool {
        TAXONOMY.contains(&self.0.as_str())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Count the bracketed `[LABEL]` markers in a labeled text, per label.
///
/// Applied to a ground-truth text this yields the number of expected
/// redactions per label, which must equal `tp + fn` in a judge report.
pub fn count_label_occurrences(text: &str) -> BTreeMap<Label, u64> {
    let mut counts = BTreeMap::new();
    for caps in LABEL_MARKER.captures_iter(text) {
        *counts.entry(Label::new(&caps[1])).or_insert(0) += 1;
    }
    counts
}
