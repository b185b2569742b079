//! # PII Eval Core
//!
//! Core library for evaluating PII redaction quality.
//! Provides the label taxonomy, judge report parsing, confusion-count
//! aggregation and metrics, the evaluation driver, the redaction runner,
//! LLM providers, and configuration.

pub mod aggregate;
pub mod config;
pub mod counts;
pub mod driver;
pub mod error;
pub mod judge;
pub mod labels;
pub mod metrics;
pub mod providers;
pub mod redactor;
pub mod report;
pub mod retry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use aggregate::{CorpusAggregate, CorpusReport, FileResult, LabelMetrics, PairId, SkippedPair};
pub use config::{EvalConfig, LlmConfig, PairingMode, PathsConfig, RedactionConfig, RetryConfig};
pub use counts::ConfusionCounts;
pub use driver::{DocumentPair, EvaluationRun, Evaluator, discover_pairs};
pub use error::{ConfigError, EvalError, LlmError, ReportError, Result};
pub use judge::{Judge, LlmJudge};
pub use labels::{Label, TAXONOMY};
pub use metrics::{DerivedMetric, derive};
pub use providers::{LlmProvider, MockLlmProvider, create_provider};
pub use redactor::{LlmRedactor, RedactionRunner, Redactor, RunStats};
pub use report::{ParsedReport, parse_report};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
