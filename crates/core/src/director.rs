//! Run directories and the failed-test ledger

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

use crate::error::{IrisError, IrisResult};
use crate::executor::RunSummary;

pub const RUNS_DIR: &str = "runs";
pub const LAST_FAIL_FILE: &str = "last_fail.txt";
pub const RESULTS_FILE: &str = "results.json";

/// Run identifier for a run started at `now`
pub fn run_id(now: DateTime<Local>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Ordered identifiers of the tests that failed in a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureLedger {
    ids: Vec<String>,
}

impl FailureLedger {
    pub fn new(ids: Vec<String>) -> Self {
        Self { ids }
    }

    pub fn parse(text: &str) -> Self {
        Self {
            ids: text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// One identifier per line, newline-terminated
    pub fn render(&self) -> String {
        self.ids.iter().map(|id| format!("{id}\n")).collect()
    }
}

/// Owns `<workdir>/runs`
#[derive(Debug, Clone)]
pub struct RunDirector {
    workdir: PathBuf,
}

impl RunDirector {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn runs_root(&self) -> PathBuf {
        self.workdir.join(RUNS_DIR)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.runs_root().join(LAST_FAIL_FILE)
    }

    /// Create a fresh directory for this run, named after the current time.
    ///
    /// With `clear`, earlier runs are purged first; purge errors are logged and
    /// ignored. Failing to create the run directory itself is an error.
    pub fn prepare_run_directory(&self, clear: bool) -> IrisResult<PathBuf> {
        self.prepare_run_directory_at(clear, Local::now())
    }

    pub fn prepare_run_directory_at(&self, clear: bool, now: DateTime<Local>) -> IrisResult<PathBuf> {
        let runs = self.runs_root();
        if clear {
            info!("Clearing runs directory {}", runs.display());
            if let Err(e) = std::fs::remove_dir_all(&runs) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Unable to clear {}: {}", runs.display(), e);
                }
            }
        }
        std::fs::create_dir_all(&runs)?;

        let base = run_id(now);
        let mut suffix = 0u32;
        loop {
            let name = match suffix {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let dir = runs.join(name);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    info!("Run directory: {}", dir.display());
                    return Ok(dir);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(IrisError::Io(e)),
            }
        }
    }

    /// Persist failing test ids for `--rerun`. An empty list leaves any
    /// existing ledger untouched.
    pub fn record_failures(&self, failures: &[String]) -> IrisResult<()> {
        if failures.is_empty() {
            debug!("No failed tests to record");
            return Ok(());
        }
        let path = self.ledger_path();
        std::fs::write(&path, FailureLedger::new(failures.to_vec()).render())?;
        info!("Recorded {} failed test(s) in {}", failures.len(), path.display());
        Ok(())
    }

    /// Failing ids of the last run that had failures
    pub fn load_failures(&self) -> IrisResult<FailureLedger> {
        match std::fs::read_to_string(self.ledger_path()) {
            Ok(text) => Ok(FailureLedger::parse(&text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(FailureLedger::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_summary(&self, run_dir: &Path, summary: &RunSummary) -> IrisResult<PathBuf> {
        let path = run_dir.join(RESULTS_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        debug!("Wrote run summary to {}", path.display());
        Ok(path)
    }
}
