//! Evaluation driver: pairs documents, asks the judge, parses and records.
//!
//! Pairs are processed one at a time. Each pair moves through
//! `FetchingJudgment -> Parsing -> Aggregating -> Idle`; a pair that fails at
//! any step goes to `PairFailed`, is recorded as skipped and the loop moves
//! on. The aggregate is owned by the run and handed back in the
//! [`EvaluationRun`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregate::{CorpusAggregate, CorpusReport, FileResult, PairId, SkippedPair};
use crate::config::{PairingMode, PathsConfig, RetryConfig};
use crate::counts::ConfusionCounts;
use crate::error::{ConfigError, EvalError};
use crate::judge::Judge;
use crate::labels::{Label, count_label_occurrences};
use crate::report::parse_report;
use crate::retry::with_retry;

/// File name of the persisted corpus report.
pub const REPORT_FILE_NAME: &str = "evaluation_report.json";

/// Processing state of the driver, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Idle,
    FetchingJudgment,
    Parsing,
    Aggregating,
    PairFailed,
    Done,
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PairState::Idle => "idle",
            PairState::FetchingJudgment => "fetching_judgment",
            PairState::Parsing => "parsing",
            PairState::Aggregating => "aggregating",
            PairState::PairFailed => "pair_failed",
            PairState::Done => "done",
        };
        write!(f, "{s}")
    }
}

/// A candidate file and the ground-truth file it is judged against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPair {
    pub id: PairId,
    pub candidate_path: PathBuf,
    pub ground_truth_path: PathBuf,
}

impl DocumentPair {
    pub fn new(candidate_path: PathBuf, ground_truth_path: PathBuf) -> Self {
        let id = PairId::new(file_name(&candidate_path), file_name(&ground_truth_path));
        Self {
            id,
            candidate_path,
            ground_truth_path,
        }
    }
}

/// Result of pairing the two directories.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub pairs: Vec<DocumentPair>,
    /// The strategy that actually produced `pairs`.
    pub mode: PairingMode,
    pub warnings: Vec<String>,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// List files directly inside `dir` whose name starts with `prefix` and ends
/// with `.extension`, sorted by name.
pub fn list_text_files(dir: &Path, prefix: &str, extension: &str) -> Result<Vec<PathBuf>, EvalError> {
    if !dir.is_dir() {
        return Err(ConfigError::DirectoryUnreadable {
            path: dir.to_path_buf(),
        }
        .into());
    }
    let suffix = format!(".{extension}");
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| {
            EvalError::Io(std::io::Error::other(format!("{}: {e}", dir.display())))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(&suffix) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// The shared identifier of a file: its name without side prefix and extension.
fn identifier<'a>(name: &'a str, prefix: &str, extension: &str) -> &'a str {
    let name = name.strip_prefix(prefix).unwrap_or(name);
    name.strip_suffix(extension)
        .and_then(|n| n.strip_suffix('.'))
        .unwrap_or(name)
}

/// Match candidates and ground truths whose identifiers are equal.
pub fn pair_by_identifier(
    candidates: &[PathBuf],
    ground_truths: &[PathBuf],
    paths: &PathsConfig,
) -> (Vec<DocumentPair>, Vec<String>) {
    let mut by_id: BTreeMap<String, &PathBuf> = BTreeMap::new();
    for gt in ground_truths {
        let name = file_name(gt);
        let id = identifier(&name, &paths.ground_truth_prefix, &paths.extension);
        by_id.insert(id.to_string(), gt);
    }

    let mut pairs = Vec::new();
    let mut warnings = Vec::new();
    let mut matched = BTreeSet::new();
    for candidate in candidates {
        let name = file_name(candidate);
        let id = identifier(&name, &paths.candidate_prefix, &paths.extension);
        match by_id.get(id) {
            Some(gt) => {
                matched.insert(id.to_string());
                pairs.push(DocumentPair::new(candidate.clone(), (*gt).clone()));
            }
            None => warnings.push(format!("candidate {name} has no ground truth")),
        }
    }
    for (id, gt) in &by_id {
        if !matched.contains(id) {
            warnings.push(format!("ground truth {} has no candidate", file_name(gt)));
        }
    }
    (pairs, warnings)
}

/// Zip the sorted lists. The longer list's surplus is left out.
pub fn pair_positionally(
    candidates: &[PathBuf],
    ground_truths: &[PathBuf],
) -> (Vec<DocumentPair>, Vec<String>) {
    let mut warnings = Vec::new();
    if candidates.len() != ground_truths.len() {
        warnings.push(format!(
            "{} candidates vs. {} ground truths, processing {} pairs",
            candidates.len(),
            ground_truths.len(),
            candidates.len().min(ground_truths.len())
        ));
    }
    let pairs = candidates
        .iter()
        .zip(ground_truths)
        .map(|(c, g)| DocumentPair::new(c.clone(), g.clone()))
        .collect();
    (pairs, warnings)
}

/// List both directories and pair their files.
///
/// Identifier pairing that matches nothing while both sides have files falls
/// back to positional pairing.
pub fn discover_pairs(paths: &PathsConfig, mode: PairingMode) -> Result<Discovery, EvalError> {
    let candidates = list_text_files(&paths.candidate_dir, &paths.candidate_prefix, &paths.extension)?;
    let ground_truths = list_text_files(
        &paths.ground_truth_dir,
        &paths.ground_truth_prefix,
        &paths.extension,
    )?;
    info!(
        candidates = candidates.len(),
        ground_truths = ground_truths.len(),
        mode = %mode,
        "Discovered files"
    );

    let mut used = mode;
    let (pairs, mut warnings) = match mode {
        PairingMode::Positional => pair_positionally(&candidates, &ground_truths),
        PairingMode::ByIdentifier => {
            let (pairs, warnings) = pair_by_identifier(&candidates, &ground_truths, paths);
            if pairs.is_empty() && !candidates.is_empty() && !ground_truths.is_empty() {
                warn!("No file identifiers matched, falling back to positional pairing");
                used = PairingMode::Positional;
                let (pairs, mut positional) = pair_positionally(&candidates, &ground_truths);
                positional.insert(
                    0,
                    "no file identifiers matched, paired by sorted position".to_string(),
                );
                (pairs, positional)
            } else {
                (pairs, warnings)
            }
        }
    };

    if candidates.is_empty() {
        warnings.push(format!("no candidate files in {}", paths.candidate_dir.display()));
    }
    if ground_truths.is_empty() {
        warnings.push(format!(
            "no ground truth files in {}",
            paths.ground_truth_dir.display()
        ));
    }
    for w in &warnings {
        warn!("{w}");
    }

    Ok(Discovery {
        pairs,
        mode: used,
        warnings,
    })
}

/// Compare each label's reported `tp + fn` with its occurrences in the ground truth.
pub fn conservation_warnings(
    ground_truth: &str,
    per_label: &BTreeMap<Label, ConfusionCounts>,
) -> Vec<String> {
    let expected = count_label_occurrences(ground_truth);
    let labels: BTreeSet<&Label> = expected.keys().chain(per_label.keys()).collect();
    labels
        .into_iter()
        .filter_map(|label| {
            let occurrences = u128::from(expected.get(label).copied().unwrap_or(0));
            let reported = per_label
                .get(label)
                .map(ConfusionCounts::ground_truth_total)
                .unwrap_or(0);
            (occurrences != reported).then(|| {
                format!(
                    "[{label}] tp+fn is {reported} but ground truth has {occurrences} occurrences"
                )
            })
        })
        .collect()
}

/// Runs the judge over document pairs and aggregates the results.
pub struct Evaluator {
    judge: Arc<dyn Judge>,
    retry: RetryConfig,
    check_conservation: bool,
}

impl Evaluator {
    pub fn new(judge: Arc<dyn Judge>, retry: RetryConfig) -> Self {
        Self {
            judge,
            retry,
            check_conservation: true,
        }
    }

    /// Disable the per-label comparison against ground-truth occurrences.
    pub fn without_conservation_check(mut self) -> Self {
        self.check_conservation = false;
        self
    }

    /// Evaluate every pair in order.
    pub async fn run(&self, pairs: &[DocumentPair]) -> EvaluationRun {
        let mut run = EvaluationRun::new();
        info!(run_id = %run.run_id, pairs = pairs.len(), "Starting evaluation run");

        for (index, pair) in pairs.iter().enumerate() {
            info!(
                pair = %pair.id,
                position = index + 1,
                of = pairs.len(),
                "Evaluating pair"
            );
            match self.evaluate_pair(pair).await {
                Ok(result) => {
                    transition(&pair.id, PairState::Aggregating);
                    match run.aggregate.record(result) {
                        Ok(()) => transition(&pair.id, PairState::Idle),
                        Err(e) => {
                            transition(&pair.id, PairState::PairFailed);
                            error!(pair = %pair.id, error = %e, "Skipping pair");
                            run.skipped.push(SkippedPair {
                                pair: pair.id.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Err(e) => {
                    transition(&pair.id, PairState::PairFailed);
                    error!(pair = %pair.id, error = %e, "Skipping pair");
                    run.skipped.push(SkippedPair {
                        pair: pair.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            run_id = %run.run_id,
            state = %PairState::Done,
            evaluated = run.aggregate.files().len(),
            skipped = run.skipped.len(),
            "Evaluation run finished"
        );
        run
    }

    /// Judge and parse one pair. Does not touch any aggregate.
    pub async fn evaluate_pair(&self, pair: &DocumentPair) -> Result<FileResult, EvalError> {
        let unavailable = |source: EvalError| EvalError::PairUnavailable {
            pair: pair.id.to_string(),
            source: Box::new(source),
        };

        let ground_truth = tokio::fs::read_to_string(&pair.ground_truth_path)
            .await
            .map_err(|e| unavailable(e.into()))?;
        let candidate = tokio::fs::read_to_string(&pair.candidate_path)
            .await
            .map_err(|e| unavailable(e.into()))?;

        transition(&pair.id, PairState::FetchingJudgment);
        let raw = with_retry(&self.retry, "judge", |_| {
            self.judge.judge(&ground_truth, &candidate)
        })
        .await
        .map_err(|failure| unavailable(failure.error.into()))?;

        transition(&pair.id, PairState::Parsing);
        let parsed = parse_report(&raw).map_err(|e| unavailable(e.into()))?;
        if parsed.is_partial() {
            warn!(pair = %pair.id, warnings = ?parsed.warnings, "Partial judge report");
        }
        for rejected in &parsed.rejected_rows {
            warn!(pair = %pair.id, line = rejected.line, reason = %rejected.reason, "Row rejected");
        }

        let conservation = if self.check_conservation {
            conservation_warnings(&ground_truth, &parsed.per_label)
        } else {
            Vec::new()
        };
        let mut result = FileResult::new(pair.id.clone(), parsed, raw);
        for w in conservation {
            warn!(pair = %pair.id, "{w}");
            result = result.with_warning(w);
        }
        Ok(result)
    }
}

fn transition(pair: &PairId, state: PairState) {
    debug!(pair = %pair, state = %state, "Pair state");
}

/// Everything one evaluation run produced.
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    pub run_id: Uuid,
    pub aggregate: CorpusAggregate,
    pub skipped: Vec<SkippedPair>,
}

impl EvaluationRun {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            aggregate: CorpusAggregate::new(),
            skipped: Vec::new(),
        }
    }

    pub fn report(&self) -> CorpusReport {
        self.aggregate.report(self.run_id, self.skipped.clone())
    }

    /// Per-file section followed by the corpus table.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for file in self.aggregate.files() {
            let coverage = file
                .coverage()
                .map(|c| format!("{c:.1}%"))
                .unwrap_or_else(|| "n/a".to_string());
            let spans = file
                .detected_over_total()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let counts = file
                .totals()
                .map(|t| format!("tp {} fp {} fn {}", t.tp, t.fp, t.fn_))
                .unwrap_or_else(|| "counts overflow".to_string());
            let _ = writeln!(
                out,
                "{}: coverage {coverage}, spans {spans}, {counts}",
                file.pair()
            );
            for w in file.warnings() {
                let _ = writeln!(out, "  warning: {w}");
            }
        }
        for skipped in &self.skipped {
            let _ = writeln!(out, "{}: skipped ({})", skipped.pair, skipped.reason);
        }
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(out, "{}", self.report());
        out
    }

    /// Write the corpus report as pretty JSON into `output_dir`.
    pub fn write_report(&self, output_dir: &Path) -> Result<PathBuf, EvalError> {
        std::fs::create_dir_all(output_dir)?;
        let path = output_dir.join(REPORT_FILE_NAME);
        std::fs::write(&path, serde_json::to_string_pretty(&self.report())?)?;
        info!(path = %path.display(), "Saved evaluation report");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Judge replaying scripted outcomes.
    struct ScriptedJudge {
        script: Mutex<VecDeque<Result<String, LlmError>>>,
    }

    impl ScriptedJudge {
        fn new(script: Vec<Result<String, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Judge for ScriptedJudge {
        async fn judge(&self, _ground_truth: &str, _candidate: &str) -> Result<String, LlmError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::Connection {
                    message: "script exhausted".into(),
                }))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            retry_delay_secs: 0.0,
        }
    }

    fn paths_in(root: &Path) -> PathsConfig {
        PathsConfig {
            candidate_dir: root.join("cand"),
            ground_truth_dir: root.join("gt"),
            output_dir: root.join("out"),
            ..Default::default()
        }
    }

    fn write(dir: &Path, name: &str, text: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_identifier_strips_prefix_and_extension() {
        assert_eq!(identifier("piiranha_mail_07.txt", "piiranha_", "txt"), "mail_07");
        assert_eq!(identifier("mail_07.txt", "groundtruth_", "txt"), "mail_07");
    }

    #[test]
    fn test_discover_by_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        write(&paths.candidate_dir, "piiranha_1.txt", "a");
        write(&paths.candidate_dir, "piiranha_3.txt", "a");
        write(&paths.ground_truth_dir, "groundtruth_1.txt", "a");
        write(&paths.ground_truth_dir, "groundtruth_2.txt", "a");
        write(&paths.ground_truth_dir, "groundtruth_3.txt", "a");

        let discovery = discover_pairs(&paths, PairingMode::ByIdentifier).unwrap();
        assert_eq!(discovery.mode, PairingMode::ByIdentifier);
        let ids: Vec<_> = discovery.pairs.iter().map(|p| p.id.to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "groundtruth_1.txt vs. piiranha_1.txt",
                "groundtruth_3.txt vs. piiranha_3.txt"
            ]
        );
        assert_eq!(
            discovery.warnings,
            vec!["ground truth groundtruth_2.txt has no candidate".to_string()]
        );
    }

    #[test]
    fn test_discover_falls_back_to_positional() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        write(&paths.candidate_dir, "piiranha_a.txt", "a");
        write(&paths.candidate_dir, "piiranha_b.txt", "a");
        write(&paths.ground_truth_dir, "groundtruth_x.txt", "a");

        let discovery = discover_pairs(&paths, PairingMode::ByIdentifier).unwrap();
        assert_eq!(discovery.mode, PairingMode::Positional);
        assert_eq!(discovery.pairs.len(), 1);
        assert_eq!(discovery.pairs[0].id.candidate, "piiranha_a.txt");
        assert!(discovery.warnings[0].contains("paired by sorted position"));
        assert!(discovery.warnings[1].contains("2 candidates vs. 1 ground truths"));
    }

    #[test]
    fn test_discover_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        assert!(matches!(
            discover_pairs(&paths, PairingMode::Positional),
            Err(EvalError::Config(ConfigError::DirectoryUnreadable { .. }))
        ));
    }

    #[test]
    fn test_list_text_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["groundtruth_2.txt", "groundtruth_1.txt", "other_1.txt", "groundtruth_3.md"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let files = list_text_files(dir.path(), "groundtruth_", "txt").unwrap();
        let names: Vec<_> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["groundtruth_1.txt", "groundtruth_2.txt"]);
    }

    #[test]
    fn test_conservation_warnings() {
        let gt = "Hallo [GIVENNAME] [SURNAME], IBAN [IBAN] und [IBAN].";
        let report = parse_report(
            "[GIVENNAME] 100% 100% 100% 1 0 0\n\
             [SURNAME] 0% 0% 0% 0 0 1\n\
             [IBAN] 100% 50% 66.7% 1 0 0\n\
             [ACCOUNTNUM] 0% 0% 0% 0 1 0",
        )
        .unwrap();
        let warnings = conservation_warnings(gt, &report.per_label);
        assert_eq!(
            warnings,
            vec!["[IBAN] tp+fn is 1 but ground truth has 2 occurrences".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_records_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        write(&paths.candidate_dir, "piiranha_1.txt", "Von Anna an [IBAN]");
        write(&paths.ground_truth_dir, "groundtruth_1.txt", "Von [GIVENNAME] an [IBAN]");
        write(&paths.candidate_dir, "piiranha_2.txt", "x");
        write(&paths.ground_truth_dir, "groundtruth_2.txt", "[EMAIL]");

        let judge = Arc::new(ScriptedJudge::new(vec![
            Err(LlmError::Timeout { timeout_secs: 1 }),
            Ok("COVERAGE: 50.0%   Detected spans: 1/2\n\
                [GIVENNAME] 0.0% 0.0% 0.0% 0 0 1\n\
                [IBAN] 100.0% 100.0% 100.0% 1 0 0"
                .to_string()),
            Ok("nothing useful here".to_string()),
        ]));
        let evaluator = Evaluator::new(judge, fast_retry());
        let pairs = discover_pairs(&paths, PairingMode::ByIdentifier).unwrap().pairs;
        let run = evaluator.run(&pairs).await;

        assert_eq!(run.aggregate.files().len(), 1);
        assert!(run.aggregate.files()[0].warnings().is_empty());
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].pair.candidate, "piiranha_2.txt");
        assert!(run.skipped[0].reason.contains("no coverage"));

        let report = run.report();
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.average_coverage, Some(50.0));
        assert_eq!(report.overall.tp, 1);
        assert_eq!(report.overall.fn_, 1);
        assert_eq!(report.overall.recall, 50.0);

        let summary = run.summary();
        assert!(summary.contains("coverage 50.0%, spans 1/2"));
        assert!(summary.contains("skipped"));
        assert!(summary.contains("OVERALL"));
    }

    #[tokio::test]
    async fn test_judge_failure_skips_pair_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        write(&paths.candidate_dir, "piiranha_1.txt", "a");
        write(&paths.ground_truth_dir, "groundtruth_1.txt", "a");

        let judge = Arc::new(ScriptedJudge::new(vec![
            Err(LlmError::Connection {
                message: "reset".into(),
            }),
            Err(LlmError::Connection {
                message: "reset".into(),
            }),
            Ok("never reached".to_string()),
        ]));
        let evaluator = Evaluator::new(judge.clone(), fast_retry());
        let pairs = discover_pairs(&paths, PairingMode::Positional).unwrap().pairs;
        let run = evaluator.run(&pairs).await;

        assert!(run.aggregate.is_empty());
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(judge.script.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overflowing_counts_skip_pair_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        for i in 1..=2 {
            write(&paths.candidate_dir, &format!("piiranha_{i}.txt"), "a");
            write(&paths.ground_truth_dir, &format!("groundtruth_{i}.txt"), "[IBAN]");
        }
        let huge = "[IBAN] 50.0% 100.0% 66.7% 18446744073709551615 18446744073709551615 0";
        let judge = Arc::new(ScriptedJudge::new(vec![
            Ok(huge.to_string()),
            Ok(huge.to_string()),
        ]));
        let pairs = discover_pairs(&paths, PairingMode::ByIdentifier).unwrap().pairs;
        let run = Evaluator::new(judge, fast_retry()).run(&pairs).await;

        assert_eq!(run.aggregate.files().len(), 1);
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].pair.candidate, "piiranha_2.txt");
        assert!(run.skipped[0].reason.contains("overflow"));

        let report = run.report();
        assert_eq!(report.overall.tp, u64::MAX);
        assert_eq!(report.overall.recall, 100.0);
        assert!(
            run.aggregate.files()[0]
                .warnings()
                .iter()
                .any(|w| w.contains("ground truth has 1 occurrences"))
        );
    }

    #[test]
    fn test_write_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let run = EvaluationRun::new();
        let path = run.write_report(&dir.path().join("out")).unwrap();
        assert!(path.ends_with(REPORT_FILE_NAME));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["files_processed"], 0);
        assert_eq!(json["run_id"], run.run_id.to_string());
    }
}
