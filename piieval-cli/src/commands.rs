//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use piieval_core::config::{EvalConfig, PairingMode, load_config, write_default_config};
use piieval_core::{
    Evaluator, LlmJudge, LlmRedactor, RedactionRunner, create_provider, discover_pairs,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Evaluate {
            candidates,
            ground_truth,
            output,
            positional,
            model,
            per_file,
        } => {
            let mut config = load(workspace)?;
            if let Some(dir) = candidates {
                config.paths.candidate_dir = dir;
            }
            if let Some(dir) = ground_truth {
                config.paths.ground_truth_dir = dir;
            }
            if let Some(dir) = output {
                config.paths.output_dir = dir;
            }
            if positional {
                config.pairing = PairingMode::Positional;
            }
            if let Some(model) = model {
                config.judge.model = model;
            }
            handle_evaluate(config, workspace, per_file).await
        }
        Commands::Redact {
            input,
            output,
            model,
        } => {
            let mut config = load(workspace)?;
            if let Some(dir) = input {
                config.redaction.input_dir = dir;
            }
            if let Some(dir) = output {
                config.redaction.output_dir = dir;
            }
            if let Some(model) = model {
                config.redactor.model = model;
            }
            handle_redact(config, workspace).await
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load(workspace: &Path) -> anyhow::Result<EvalConfig> {
    let config = load_config(Some(workspace), None)?;
    for w in config.validate() {
        warn!("{w}");
    }
    Ok(config)
}

/// Relative configured paths are taken from the workspace.
fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    workspace.join(path)
}

async fn handle_evaluate(
    mut config: EvalConfig,
    workspace: &Path,
    per_file: bool,
) -> anyhow::Result<()> {
    let api_key = config.judge.resolve_api_key()?;
    let provider = create_provider(&config.judge, api_key)?;
    let judge = Arc::new(LlmJudge::new(provider, &config.judge));

    config.paths.candidate_dir = resolve(workspace, &config.paths.candidate_dir);
    config.paths.ground_truth_dir = resolve(workspace, &config.paths.ground_truth_dir);
    let output_dir = resolve(workspace, &config.paths.output_dir);

    let discovery = discover_pairs(&config.paths, config.pairing)?;
    if discovery.pairs.is_empty() {
        println!("No document pairs found.");
    } else {
        println!(
            "Evaluating {} document pairs ({} pairing)",
            discovery.pairs.len(),
            discovery.mode
        );
    }

    let evaluator = Evaluator::new(judge, config.retry.clone());
    let run = evaluator.run(&discovery.pairs).await;

    if per_file {
        println!("{}", run.summary());
    } else {
        println!("{}", run.report());
    }

    let path = run.write_report(&output_dir)?;
    println!("Report saved to: {}", path.display());
    Ok(())
}

async fn handle_redact(mut config: EvalConfig, workspace: &Path) -> anyhow::Result<()> {
    let api_key = config.redactor.resolve_api_key()?;
    let provider = create_provider(&config.redactor, api_key)?;
    let redactor = Arc::new(LlmRedactor::new(
        provider,
        &config.redactor,
        config.redaction.min_output_chars,
    ));

    config.redaction.input_dir = resolve(workspace, &config.redaction.input_dir);
    config.redaction.output_dir = resolve(workspace, &config.redaction.output_dir);
    let stats_file = resolve(workspace, &config.redaction.stats_file);

    let mut runner = RedactionRunner::new(redactor, config.redaction.clone(), config.retry.clone());
    let stats = runner.process_all().await?;
    runner.save_statistics(&stats_file)?;

    println!("Processed: {}", stats.processed);
    println!("Successful: {}", stats.successful);
    println!("Failed: {}", stats.failed);
    println!("Statistics saved to: {}", stats_file.display());
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(".piieval").join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = write_default_config(workspace)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use piieval_core::ConfigError;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".piieval").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: EvalConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.judge.model, "gpt-4o");
        assert_eq!(parsed.pairing, PairingMode::ByIdentifier);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .await
        .unwrap();
        let config_path = workspace.join(".piieval").join("config.toml");
        std::fs::write(&config_path, "pairing = \"positional\"\n").unwrap();

        handle_command(
            Commands::Config {
                action: ConfigAction::Init,
            },
            workspace,
        )
        .await
        .unwrap();
        assert_eq!(
            std::fs::read_to_string(&config_path).unwrap(),
            "pairing = \"positional\"\n"
        );
    }

    #[tokio::test]
    async fn test_evaluate_without_api_key_fails() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        std::fs::create_dir_all(workspace.join(".piieval")).unwrap();
        std::fs::write(
            workspace.join(".piieval").join("config.toml"),
            "[judge]\napi_key_env = \"PIIEVAL_TEST_KEY_THAT_IS_NEVER_SET\"\n",
        )
        .unwrap();

        let command = Commands::Evaluate {
            candidates: None,
            ground_truth: None,
            output: None,
            positional: false,
            model: None,
            per_file: false,
        };
        let err = handle_command(command, workspace).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("PIIEVAL_TEST_KEY_THAT_IS_NEVER_SET")
        );
    }

    #[tokio::test]
    async fn test_malformed_config_surfaces_parse_error() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        std::fs::create_dir_all(workspace.join(".piieval")).unwrap();
        std::fs::write(
            workspace.join(".piieval").join("config.toml"),
            "pairing = [\n",
        )
        .unwrap();

        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        let err = handle_command(command, workspace).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_resolve_keeps_absolute_paths() {
        let ws = Path::new("/work");
        assert_eq!(resolve(ws, Path::new("data")), PathBuf::from("/work/data"));
        assert_eq!(resolve(ws, Path::new("/abs")), PathBuf::from("/abs"));
    }
}
