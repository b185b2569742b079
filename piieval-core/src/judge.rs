//! The judge: an LLM that compares a ground-truth labeled text with a
//! candidate labeled text and answers with a fixed-format report.
//!
//! Only the report text crosses this boundary. Turning it into counts is the
//! job of [`crate::report::parse_report`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::providers::LlmProvider;
use crate::types::{CompletionRequest, Message};

/// Compares a ground-truth text with a candidate text.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Return the raw report text for one document pair.
    async fn judge(&self, ground_truth: &str, candidate: &str) -> Result<String, LlmError>;
}

/// Instructions for the judge model: classification rules and output format.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are a precise evaluator of anonymization quality. You compare two versions of the same text.

TASK:
- GroundTruth shows WHERE anonymization SHOULD happen (with [LABELS]).
- Candidate shows what was actually anonymized.
- Judge whether the candidate applied the correct anonymization.

NOT ANONYMIZED = PRIVACY LEAK:
- GroundTruth has [IBAN] but the candidate shows DE40926301819767992111 -> the real IBAN is visible.
- GroundTruth has [GIVENNAME] but the candidate shows Leo -> the real name is visible.

WRONG LABEL = FALSE POSITIVE AND FALSE NEGATIVE:
- GroundTruth has [CUSTOMER_NUMBER] but the candidate uses [ACCOUNTNR].
- Count a false positive for [ACCOUNTNR] AND a false negative for [CUSTOMER_NUMBER].

CLASSIFICATION:
- True Positive (TP): GroundTruth has [LABEL] and the candidate has the same [LABEL] at that place.
- False Negative (FN): GroundTruth has [LABEL] but the candidate shows real data.
- False Positive (FP): the candidate has a [LABEL] where GroundTruth has none (over-anonymization).

Every [LABEL] occurrence in GroundTruth is exactly one TP or one FN. If a label occurs several
times, report one row for it with the counts summed.

EXAMPLE:
GroundTruth: "Von [GIVENNAME] an [IBAN] mit [AMOUNT]."
Candidate: "Von [GIVENNAME] an DE123456789 mit [AMOUNT]."
Result:
[GIVENNAME]    100.0%   100.0%   100.0%   1   0   0
[IBAN]         0.0%     0.0%     0.0%     0   0   1
[AMOUNT]       100.0%   100.0%   100.0%   1   0   0

METHOD:
1. Find all [LABELS] in GroundTruth.
2. For each one, look at the corresponding place in the candidate: same [LABEL] -> TP, real data -> FN.
3. Additional [LABELS] in the candidate without a GroundTruth counterpart -> FP.

OUTPUT FORMAT (EXACTLY):
================================================================================
FILE: [file name]
COVERAGE: [xx.x]%   Detected spans: [TP]/[number of GroundTruth labels]
METRICS PER LABEL TYPE:
--------------------------------------------------------------------------------
Label Type     Precision    Recall    F1-Score    TP    FP    FN
[LABEL]        [xx.x]%      [xx.x]%   [xx.x]%     [n]   [n]   [n]
================================================================================"#;

/// Judge backed by an LLM provider.
pub struct LlmJudge {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmJudge {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    fn user_prompt(ground_truth: &str, candidate: &str) -> String {
        format!(
            "Evaluate this document pair:\n\n\
             **GroundTruth text:**\n{ground_truth}\n\n\
             **Candidate text:**\n{candidate}\n\n\
             Analyze carefully and report the metrics in the required format."
        )
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, ground_truth: &str, candidate: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            messages: vec![
                Message::system(JUDGE_SYSTEM_PROMPT),
                Message::user(Self::user_prompt(ground_truth.trim(), candidate.trim())),
            ],
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            model: None,
        };

        let response = self.provider.complete(request).await?;
        debug!(
            model = %response.model,
            output_tokens = response.usage.output_tokens,
            "Judge report received"
        );
        Ok(response.message.content)
    }
}
