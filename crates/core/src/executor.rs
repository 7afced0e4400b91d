//! Test discovery and execution
//!
//! Iris tests themselves are opaque to the orchestrator. A [`TestExecutor`]
//! runs a [`TestPlan`] against a resolved [`Candidate`] and reports per-test
//! outcomes; [`CommandExecutor`] does so by launching a harness command once
//! per test.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::candidate::{Candidate, Provenance};
use crate::error::{IrisError, IrisResult};

/// File extensions recognised as test scripts
const TEST_EXTENSIONS: &[&str] = &["py", "yaml", "yml"];

/// Everything a test needs to know about the run it belongs to
#[derive(Debug, Clone)]
pub struct RunContext {
    pub work_directory: PathBuf,
    pub run_directory: PathBuf,
    pub temp_directory: PathBuf,
    /// Content server URL, if one is running
    pub base_url: Option<String>,
    pub locale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: String,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub executable_path: PathBuf,
    pub version: String,
    pub build_id: String,
    pub platform_tag: String,
    pub provenance: Provenance,
    pub origin_reference: String,
}

impl From<&Candidate> for CandidateInfo {
    fn from(c: &Candidate) -> Self {
        Self {
            executable_path: c.executable_path.clone(),
            version: c.version.clone(),
            build_id: c.build_id.clone(),
            platform_tag: c.platform_tag.to_string(),
            provenance: c.provenance,
            origin_reference: c.origin_reference.clone(),
        }
    }
}

/// Written to `results.json` in the run directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub candidate: CandidateInfo,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn new(candidate: &Candidate, results: Vec<TestResult>, duration_ms: u64) -> Self {
        let count = |o: Outcome| results.iter().filter(|r| r.outcome == o).count();
        Self {
            candidate: candidate.into(),
            total: results.len(),
            passed: count(Outcome::Passed),
            failed: count(Outcome::Failed),
            skipped: count(Outcome::Skipped),
            duration_ms,
            results,
        }
    }

    /// Failing test ids in execution order
    pub fn failed_ids(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .map(|r| r.id.clone())
            .collect()
    }
}

#[async_trait]
pub trait TestExecutor: Send + Sync {
    async fn run(&self, ctx: &RunContext, candidate: &Candidate) -> IrisResult<RunSummary>;
}

/// A test script and its stable identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    /// Path relative to the tests directory, without extension, `/`-separated
    pub id: String,
    pub path: PathBuf,
}

impl TestCase {
    /// File name used for this test's log inside the run directory
    pub fn log_file_name(&self) -> String {
        format!("{}.log", self.id.replace('/', "__"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestPlan {
    pub tests: Vec<TestCase>,
}

impl TestPlan {
    /// Collect test scripts below `dir`, sorted by id. Names starting with
    /// `_` (helpers, `__init__.py`) are not tests.
    pub fn discover(dir: &Path) -> IrisResult<Self> {
        if !dir.is_dir() {
            return Err(IrisError::InvalidConfig(format!(
                "tests directory {} does not exist",
                dir.display()
            )));
        }

        let mut tests = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|e| IrisError::Execution(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_test_file = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| TEST_EXTENSIONS.contains(&e));
            let hidden = entry.file_name().to_string_lossy().starts_with('_');
            if !is_test_file || hidden {
                continue;
            }

            let Ok(rel) = path.strip_prefix(dir) else {
                continue;
            };
            let id = rel
                .with_extension("")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            tests.push(TestCase {
                id,
                path: path.to_path_buf(),
            });
        }
        tests.sort_by(|a, b| a.id.cmp(&b.id));
        debug!("Discovered {} test(s) in {}", tests.len(), dir.display());
        Ok(Self { tests })
    }

    /// Keep tests whose id contains `pattern`
    pub fn filter(self, pattern: &str) -> Self {
        Self {
            tests: self
                .tests
                .into_iter()
                .filter(|t| t.id.contains(pattern))
                .collect(),
        }
    }

    /// Keep only the listed ids, preserving plan order
    pub fn only(self, ids: &[String]) -> Self {
        Self {
            tests: self.tests.into_iter().filter(|t| ids.contains(&t.id)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// Runs each test through an external harness command.
///
/// The harness is invoked as `<harness...> <test path>` with the candidate and
/// run described through `IRIS_*` environment variables. Exit status 0 passes.
pub struct CommandExecutor {
    plan: TestPlan,
    harness: Option<Vec<String>>,
}

impl CommandExecutor {
    pub fn new(plan: TestPlan, harness: Option<&str>) -> Self {
        let harness = harness
            .map(|h| h.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty());
        Self { plan, harness }
    }

    pub fn plan(&self) -> &TestPlan {
        &self.plan
    }

    async fn run_one(
        &self,
        argv: &[String],
        test: &TestCase,
        ctx: &RunContext,
        candidate: &Candidate,
    ) -> IrisResult<TestResult> {
        let log_path = ctx.run_directory.join(test.log_file_name());
        let log = std::fs::File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .arg(&test.path)
            .current_dir(&ctx.run_directory)
            .env("IRIS_FIREFOX", &candidate.executable_path)
            .env("IRIS_FIREFOX_VERSION", &candidate.version)
            .env("IRIS_BUILD_ID", &candidate.build_id)
            .env("IRIS_RUN_DIR", &ctx.run_directory)
            .env("IRIS_TEMP_DIR", &ctx.temp_directory)
            .env("IRIS_LOCALE", &ctx.locale)
            .env("IRIS_TEST_ID", &test.id)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if let Some(url) = &ctx.base_url {
            cmd.env("IRIS_BASE_URL", url);
        }

        let start = Instant::now();
        let status = cmd
            .status()
            .await
            .map_err(|e| IrisError::Execution(format!("cannot launch harness `{}`: {}", argv[0], e)))?;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = if status.success() {
            Outcome::Passed
        } else {
            Outcome::Failed
        };
        Ok(TestResult {
            id: test.id.clone(),
            outcome,
            duration_ms,
            exit_code: status.code(),
            log_path: Some(log_path),
        })
    }
}

#[async_trait]
impl TestExecutor for CommandExecutor {
    async fn run(&self, ctx: &RunContext, candidate: &Candidate) -> IrisResult<RunSummary> {
        let start = Instant::now();

        let Some(argv) = &self.harness else {
            if !self.plan.is_empty() {
                warn!("No test harness configured, {} test(s) not run", self.plan.len());
            }
            let results = self
                .plan
                .tests
                .iter()
                .map(|t| {
                    info!("Skipping {}", t.id);
                    TestResult {
                        id: t.id.clone(),
                        outcome: Outcome::Skipped,
                        duration_ms: 0,
                        exit_code: None,
                        log_path: None,
                    }
                })
                .collect();
            return Ok(RunSummary::new(candidate, results, 0));
        };

        info!("Running {} test(s)", self.plan.len());
        let mut results = Vec::with_capacity(self.plan.len());
        for test in &self.plan.tests {
            let result = self.run_one(argv, test, ctx, candidate).await?;
            match result.outcome {
                Outcome::Passed => info!("PASSED {} ({} ms)", test.id, result.duration_ms),
                _ => warn!("FAILED {} (exit code {:?})", test.id, result.exit_code),
            }
            results.push(result);
        }

        let summary = RunSummary::new(candidate, results, start.elapsed().as_millis() as u64);
        info!(
            "{} passed, {} failed, {} skipped",
            summary.passed, summary.failed, summary.skipped
        );
        Ok(summary)
    }
}
