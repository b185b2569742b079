//! Configuration system for piieval.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.piieval/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub pairing: PairingMode,
    /// Model used as the judge for document pairs.
    pub judge: LlmConfig,
    /// Model used to redact raw documents.
    pub redactor: LlmConfig,
    pub retry: RetryConfig,
    pub paths: PathsConfig,
    pub redaction: RedactionConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai" or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier (e.g., "gpt-4o").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    pub temperature: f32,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 2000,
            temperature: 0.0,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0-2.0",
                self.temperature
            ));
        }
        if self.temperature > 0.0 {
            warnings.push(format!(
                "temperature ({}) is non-zero; judgments will not be reproducible",
                self.temperature
            ));
        }
        if self.timeout_secs == 0 {
            warnings.push("timeout_secs is 0; every request will time out".to_string());
        }
        warnings
    }

    /// Resolve the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::EnvVarMissing {
                var: self.api_key_env.clone(),
            })
    }
}

/// Bounded exponential backoff for judge and redactor calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay_secs * 2^n` before the next try.
    pub retry_delay_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 1.0,
        }
    }
}

/// Upper bound on a single backoff wait.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

impl RetryConfig {
    /// Delay to wait after the given zero-based failed attempt.
    ///
    /// Negative or NaN delays wait zero; anything past [`MAX_RETRY_DELAY`],
    /// infinity included, waits `MAX_RETRY_DELAY`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(16) as i32);
        let secs = self.retry_delay_secs * factor;
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY))
    }
}

/// Input and output locations for an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory with the redactor's output (candidates).
    pub candidate_dir: PathBuf,
    /// Directory with the ground-truth labeled texts.
    pub ground_truth_dir: PathBuf,
    /// Where the corpus report is written.
    pub output_dir: PathBuf,
    pub candidate_prefix: String,
    pub ground_truth_prefix: String,
    /// File extension without the dot.
    pub extension: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            candidate_dir: PathBuf::from("TestingData/PIIRANHA_BaseModel_Anonymized_EMails"),
            ground_truth_dir: PathBuf::from("TestingData/GroundTruthDataset"),
            output_dir: PathBuf::from("evaluation_output"),
            candidate_prefix: "piiranha_".to_string(),
            ground_truth_prefix: "groundtruth_".to_string(),
            extension: "txt".to_string(),
        }
    }
}

/// How candidate files are matched to ground-truth files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Match on the file name with the side prefix and extension removed.
    #[default]
    ByIdentifier,
    /// Zip both sides in sorted order, ignoring names.
    Positional,
}

impl std::fmt::Display for PairingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PairingMode::ByIdentifier => write!(f, "by_identifier"),
            PairingMode::Positional => write!(f, "positional"),
        }
    }
}

/// Settings for the redaction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Redactor output shorter than this is rejected and retried.
    pub min_output_chars: usize,
    /// Where run statistics are saved as JSON.
    pub stats_file: PathBuf,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("TestingData/AllOriginalEmails"),
            output_dir: PathBuf::from("Anonymized_Output"),
            min_output_chars: 10,
            stats_file: PathBuf::from("anonymization_stats.json"),
        }
    }
}

impl EvalConfig {
    /// Collect warnings from all sections.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for w in self.judge.validate() {
            warnings.push(format!("[judge] {w}"));
        }
        for w in self.redactor.validate() {
            warnings.push(format!("[redactor] {w}"));
        }
        if self.retry.max_retries == 0 {
            warnings.push("retry.max_retries is 0; a single attempt is made".to_string());
        }
        if !self.retry.retry_delay_secs.is_finite() || self.retry.retry_delay_secs < 0.0 {
            warnings.push(format!(
                "retry.retry_delay_secs is {}; waits are clamped to 0-{}s",
                self.retry.retry_delay_secs,
                MAX_RETRY_DELAY.as_secs()
            ));
        }
        if self.pairing == PairingMode::Positional {
            warnings.push(
                "pairing is positional; files are matched by sort order, not by name".to_string(),
            );
        }
        warnings
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "piieval", "piieval")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `PIIEVAL_`)
/// 3. Workspace-local config (`.piieval/config.toml`)
/// 4. User config (`<config dir>/piieval/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&EvalConfig>,
) -> Result<EvalConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(EvalConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".piieval").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // PIIEVAL_JUDGE__MODEL, PIIEVAL_RETRY__MAX_RETRIES, etc.
    figment = figment.merge(Env::prefixed("PIIEVAL_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Check whether a configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs()
        && dirs.config_dir().join("config.toml").exists()
    {
        return true;
    }

    if let Some(ws) = workspace {
        if ws.join(".piieval").join("config.toml").exists() {
            return true;
        }
    }

    false
}

/// Write the default configuration to `<workspace>/.piieval/config.toml`.
///
/// Refuses to overwrite an existing file. Returns the path written.
pub fn write_default_config(workspace: &Path) -> anyhow::Result<PathBuf> {
    let config_dir = workspace.join(".piieval");
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }
    std::fs::write(&config_path, toml::to_string_pretty(&EvalConfig::default())?)?;
    Ok(config_path)
}
