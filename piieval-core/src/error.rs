//! Error types for the PII evaluation core.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering LLM transport, judge report parsing, configuration, and the
//! per-pair and per-file failures of the evaluation and redaction runs.

use std::path::PathBuf;

/// Top-level error type for the evaluation core.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pair '{pair}' unavailable: {source}")]
    PairUnavailable {
        pair: String,
        #[source]
        source: Box<EvalError>,
    },

    #[error("Counts for [{label}] overflow the corpus totals")]
    CountOverflow { label: String },

    #[error("Redaction of '{file}' failed after {attempts} attempts")]
    RedactionFailed { file: String, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions (judge and redactor calls).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Output rejected by validation: {reason}")]
    InvalidOutput { reason: String },
}

impl LlmError {
    /// Whether the error is transient and the call should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::Timeout { .. }
                | LlmError::Connection { .. }
                | LlmError::InvalidOutput { .. }
        )
    }
}

/// Errors from parsing a judge report.
///
/// Only total absence of signal is an error. Partial reports parse
/// successfully and carry warnings instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("Report is empty")]
    Empty,

    #[error("Report contains no coverage, span ratio, or label table")]
    NoSignal,
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Directory not readable: {path}")]
    DirectoryUnreadable { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `EvalError`.
pub type Result<T> = std::result::Result<T, EvalError>;
