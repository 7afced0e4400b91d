//! Process-lifetime resources and the single exit path
//!
//! Everything a run allocates outside its work directory is registered here:
//! the temp directory, auxiliary processes such as the local web server, and
//! teardown hooks like console code page restoration. [`Lifecycle::exit`] is
//! the only way an Iris run terminates; it stops every process, runs every
//! cleanup and then exits with the given code.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, error, warn};

use crate::error::{IrisError, IrisResult};
use crate::platform::Platform;

/// A process started on behalf of the run
pub trait AuxiliaryProcess: Send {
    fn name(&self) -> &str;

    /// Stop the process. Called once, at exit.
    fn terminate(&mut self) -> anyhow::Result<()>;
}

impl AuxiliaryProcess for Box<dyn AuxiliaryProcess> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        (**self).terminate()
    }
}

type CleanupAction = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Handle of a registered auxiliary process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxiliaryId(usize);

/// What happened during teardown
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TeardownReport {
    pub processes_terminated: usize,
    pub cleanups_run: usize,
    /// Failures that were logged and skipped
    pub failures: Vec<String>,
}

#[derive(Default)]
pub struct Lifecycle {
    processes: Vec<Box<dyn AuxiliaryProcess>>,
    cleanups: Vec<(String, CleanupAction)>,
    temp_dir: Option<PathBuf>,
    torn_down: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the run's scratch directory; it is removed at exit
    pub fn acquire_temp_dir(&mut self) -> IrisResult<PathBuf> {
        if let Some(dir) = &self.temp_dir {
            return Ok(dir.clone());
        }

        let dir = tempfile::Builder::new().prefix("iris_").tempdir()?.into_path();
        debug!("Created temp dir {}", dir.display());

        let to_remove = dir.clone();
        self.register_cleanup("remove temp dir", move || {
            debug!("Removing temp dir {}", to_remove.display());
            match std::fs::remove_dir_all(&to_remove) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            }
        });
        self.temp_dir = Some(dir.clone());
        Ok(dir)
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }

    /// Start an auxiliary process and register it for termination at exit
    pub fn spawn_auxiliary<P, F>(&mut self, factory: F) -> IrisResult<AuxiliaryId>
    where
        P: AuxiliaryProcess + 'static,
        F: FnOnce() -> IrisResult<P>,
    {
        match factory() {
            Ok(process) => {
                debug!("Registered auxiliary process: {}", process.name());
                self.processes.push(Box::new(process));
                Ok(AuxiliaryId(self.processes.len() - 1))
            }
            Err(e) => {
                let e = match e {
                    spawn @ IrisError::Spawn { .. } => spawn,
                    other => IrisError::Spawn {
                        name: "auxiliary process".to_string(),
                        reason: other.to_string(),
                    },
                };
                error!("{}, aborting Iris.", e);
                Err(e)
            }
        }
    }

    pub fn process(&self, id: AuxiliaryId) -> Option<&dyn AuxiliaryProcess> {
        self.processes.get(id.0).map(|p| p.as_ref())
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Register a teardown action; actions run in registration order
    pub fn register_cleanup<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.cleanups.push((name.into(), Box::new(action)));
    }

    /// Switch the console to UTF-8 and restore the original code page at exit.
    ///
    /// Only platforms with a switchable code page are affected; failure to read
    /// the current code page skips the adjustment.
    pub fn adjust_terminal_encoding(&mut self, platform: Option<Platform>) {
        let Some(utf8) = platform.and_then(|p| p.utf8_code_page()) else {
            debug!("Platform does not require switching terminal encoding");
            return;
        };
        let Some(original) = read_code_page() else {
            return;
        };
        if original == utf8 {
            return;
        }

        if !set_code_page(utf8) {
            warn!("Can't set codepage for terminal");
            return;
        }
        self.register_cleanup("restore terminal encoding", move || {
            if !set_code_page(&original) {
                warn!("Can't restore codepage {} for terminal", original);
            }
            Ok(())
        });
    }

    /// Terminate auxiliary processes, then run cleanups, each in registration
    /// order. Failures are logged and do not stop the remaining steps. Only the
    /// first call does any work.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        debug!("There are {} queued process(es) to terminate.", self.processes.len());
        for mut process in self.processes.drain(..) {
            debug!("Terminating {}", process.name());
            match process.terminate() {
                Ok(()) => report.processes_terminated += 1,
                Err(e) => {
                    warn!("Failed to terminate {}: {:#}", process.name(), e);
                    report.failures.push(format!("{}: {}", process.name(), e));
                }
            }
        }

        for (name, action) in self.cleanups.drain(..) {
            report.cleanups_run += 1;
            match catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("Cleanup \"{}\" failed: {:#}", name, e);
                    report.failures.push(format!("{name}: {e}"));
                }
                Err(_) => {
                    warn!("Cleanup \"{}\" panicked", name);
                    report.failures.push(format!("{name}: panicked"));
                }
            }
        }

        report
    }

    /// Tear down and terminate the process with `code`
    pub fn exit(mut self, code: i32) -> ! {
        self.teardown();
        debug!("Exiting with code {}", code);
        std::process::exit(code)
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn read_code_page() -> Option<String> {
    debug!("Running \"chcp\" shell command");
    let output = Command::new("cmd")
        .args(["/C", "chcp"])
        .stdin(Stdio::null())
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    debug!("chcp output: \"{}\"", text.trim());
    parse_chcp_output(&text)
}

fn set_code_page(code_page: &str) -> bool {
    debug!("Setting codepage to \"{}\"", code_page);
    Command::new("cmd")
        .args(["/C", "chcp", code_page])
        .stdin(Stdio::null())
        .output()
        .map(|o| parse_chcp_output(&String::from_utf8_lossy(&o.stdout)).as_deref() == Some(code_page))
        .unwrap_or(false)
}

/// Active code page from `chcp` output such as `Active code page: 437`
pub fn parse_chcp_output(output: &str) -> Option<String> {
    let (_, code_page) = output.trim().rsplit_once(':')?;
    let code_page = code_page.trim().trim_end_matches('.');
    (!code_page.is_empty() && code_page.chars().all(|c| c.is_ascii_digit()))
        .then(|| code_page.to_string())
}
