//! Redaction of raw documents into labeled texts.
//!
//! A `Redactor` replaces PII spans with `[LABEL]` markers. The LLM-backed
//! implementation is asked to use the label taxonomy; its output is checked
//! for plausibility and retried with backoff when it fails. The
//! `RedactionRunner` applies a redactor to every document in a directory and
//! keeps run statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{LlmConfig, RedactionConfig, RetryConfig};
use crate::driver::list_text_files;
use crate::error::{EvalError, LlmError};
use crate::labels::{TAXONOMY, count_label_occurrences};
use crate::providers::LlmProvider;
use crate::retry::with_retry;
use crate::types::{CompletionRequest, Message};

/// Inputs longer than this are expected to contain at least one label.
const LABEL_EXPECTED_ABOVE_CHARS: usize = 100;

/// Trait for turning raw text into labeled text.
#[async_trait]
pub trait Redactor: Send + Sync {
    /// Redact all PII in `text`, returning the labeled text.
    async fn redact(&self, text: &str) -> Result<String, LlmError>;
}

/// Build the redactor instructions, listing every taxonomy label.
pub fn redactor_system_prompt() -> String {
    format!(
        "You are an anonymization module for sensitive texts such as e-mails.\n\
         Detect personal data and replace it with the matching label.\n\n\
         Use exactly these labels:\n{}\n\n\
         RULES:\n\
         1. Replace only data that is actually sensitive\n\
         2. Keep sentence structure and layout unchanged\n\
         3. Write labels as [LABEL_NAME]\n\
         4. Return only the anonymized text, without explanations\n\
         5. When in doubt, anonymize rather than leak\n\n\
         Example:\n\
         Input: \"Hallo Max Mustermann, Ihre IBAN DE123456789 wurde gespeichert.\"\n\
         Output: \"Hallo [GIVENNAME] [SURNAME], Ihre IBAN [IBAN] wurde gespeichert.\"",
        TAXONOMY.join("\n")
    )
}

/// Redactor backed by an LLM provider.
pub struct LlmRedactor {
    provider: Arc<dyn LlmProvider>,
    system_prompt: String,
    temperature: f32,
    min_output_chars: usize,
}

impl LlmRedactor {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig, min_output_chars: usize) -> Self {
        Self {
            provider,
            system_prompt: redactor_system_prompt(),
            temperature: config.temperature,
            min_output_chars,
        }
    }
}

#[async_trait]
impl Redactor for LlmRedactor {
    async fn redact(&self, text: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            messages: vec![Message::system(&self.system_prompt), Message::user(text)],
            temperature: self.temperature,
            max_tokens: None,
            model: None,
        };
        let response = self.provider.complete(request).await?;
        let redacted = response.message.content.trim().to_string();
        validate_redaction(text, &redacted, self.min_output_chars)?;
        Ok(redacted)
    }
}

/// Reject redactor output that is empty or implausibly short.
///
/// Output without any label for a long input is only logged: the text may
/// genuinely contain no personal data.
pub fn validate_redaction(
    original: &str,
    redacted: &str,
    min_output_chars: usize,
) -> Result<(), LlmError> {
    let len = redacted.chars().count();
    if len == 0 || len < min_output_chars {
        return Err(LlmError::InvalidOutput {
            reason: format!("output has {len} chars, expected at least {min_output_chars}"),
        });
    }
    if count_label_occurrences(redacted).is_empty()
        && original.chars().count() > LABEL_EXPECTED_ABOVE_CHARS
    {
        warn!("No labels found in redacted text");
    }
    Ok(())
}

/// Redact `text` with retries. Blank input is returned unchanged without a call.
pub async fn redact_with_retry(
    redactor: &dyn Redactor,
    text: &str,
    retry: &RetryConfig,
    file: &str,
) -> Result<String, EvalError> {
    if text.trim().is_empty() {
        warn!(file, "Empty text submitted for redaction");
        return Ok(text.to_string());
    }
    with_retry(retry, "redact", |_| redactor.redact(text))
        .await
        .map_err(|failure| {
            error!(file, attempts = failure.attempts, error = %failure.error, "Redaction failed");
            EvalError::RedactionFailed {
                file: file.to_string(),
                attempts: failure.attempts,
            }
        })
}

/// Statistics of one redaction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl RunStats {
    fn started_now() -> Self {
        Self {
            processed: 0,
            successful: 0,
            failed: 0,
            start_time: Utc::now(),
            end_time: None,
        }
    }
}

/// Applies a redactor to every text file in a directory.
pub struct RedactionRunner {
    redactor: Arc<dyn Redactor>,
    config: RedactionConfig,
    retry: RetryConfig,
    stats: RunStats,
}

impl RedactionRunner {
    pub fn new(redactor: Arc<dyn Redactor>, config: RedactionConfig, retry: RetryConfig) -> Self {
        Self {
            redactor,
            config,
            retry,
            stats: RunStats::started_now(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Redact one file and write the result under the same name in the output dir.
    pub async fn process_file(&self, path: &Path) -> Result<PathBuf, EvalError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let original = tokio::fs::read_to_string(path).await?;
        info!(file = %name, chars = original.chars().count(), "Redacting");

        let redacted = redact_with_retry(self.redactor.as_ref(), &original, &self.retry, &name).await?;

        let output_path = self.config.output_dir.join(&name);
        tokio::fs::write(&output_path, redacted).await?;
        info!(path = %output_path.display(), "Saved redacted text");
        Ok(output_path)
    }

    /// Redact every `.txt` file of the input dir. Per-file failures are
    /// counted, not returned.
    pub async fn process_all(&mut self) -> Result<RunStats, EvalError> {
        let files = list_text_files(&self.config.input_dir, "", "txt")?;
        if files.is_empty() {
            warn!(dir = %self.config.input_dir.display(), "No .txt files found");
            return Ok(self.stats.clone());
        }
        tokio::fs::create_dir_all(&self.config.output_dir).await?;

        info!(files = files.len(), "Starting redaction run");
        for path in &files {
            self.stats.processed += 1;
            match self.process_file(path).await {
                Ok(_) => self.stats.successful += 1,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "Failed to process file");
                    self.stats.failed += 1;
                }
            }
        }

        let end = Utc::now();
        self.stats.end_time = Some(end);
        info!(
            processed = self.stats.processed,
            successful = self.stats.successful,
            failed = self.stats.failed,
            elapsed_secs = (end - self.stats.start_time).num_seconds(),
            "Redaction run finished"
        );
        Ok(self.stats.clone())
    }

    /// Save the statistics as pretty JSON.
    pub fn save_statistics(&self, path: &Path) -> Result<(), EvalError> {
        let mut stats = self.stats.clone();
        stats.end_time.get_or_insert_with(Utc::now);
        std::fs::write(path, serde_json::to_string_pretty(&stats)?)?;
        Ok(())
    }
}
