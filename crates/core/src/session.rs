//! One Iris run, start to finish

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::candidate::Candidate;
use crate::director::RunDirector;
use crate::error::{exit_code, IrisResult};
use crate::executor::{RunContext, RunSummary, TestExecutor};
use crate::lifecycle::Lifecycle;
use crate::platform::Platform;
use crate::preflight::Preflight;
use crate::resolver::{expand_reference, Resolver};
use crate::server::{LocalWebServer, LocalWebServerConfig};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Build reference: release id, package file, build tree, installation or `local`
    pub firefox: String,
    pub workdir: PathBuf,
    /// Purge earlier runs before creating this run's directory
    pub clear: bool,
    pub locale: String,
    pub platform: Option<Platform>,
}

impl SessionOptions {
    pub fn new(firefox: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            firefox: firefox.into(),
            workdir: workdir.into(),
            clear: false,
            locale: "en-US".to_string(),
            platform: Platform::detect(),
        }
    }
}

/// Outcome of a run that got as far as executing tests
#[derive(Debug, Clone)]
pub struct RunReport {
    pub candidate: Candidate,
    pub run_directory: PathBuf,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.summary.failed > 0 {
            exit_code::TEST_FAILURES
        } else {
            exit_code::SUCCESS
        }
    }
}

/// Process exit code for a finished or aborted run
pub fn exit_code_for(result: &IrisResult<RunReport>) -> i32 {
    match result {
        Ok(report) => report.exit_code(),
        Err(e) => e.exit_code(),
    }
}

type WorkdirHook = Box<dyn FnOnce(&Path) + Send>;

pub struct Session {
    options: SessionOptions,
    preflight: Preflight,
    resolver: Resolver,
    executor: Box<dyn TestExecutor>,
    server: Option<LocalWebServerConfig>,
    workdir_ready: Option<WorkdirHook>,
}

impl Session {
    pub fn new(
        options: SessionOptions,
        preflight: Preflight,
        resolver: Resolver,
        executor: Box<dyn TestExecutor>,
    ) -> Self {
        Self {
            options,
            preflight,
            resolver,
            executor,
            server: None,
            workdir_ready: None,
        }
    }

    /// Start a local web server for the duration of the run
    pub fn with_server(mut self, config: LocalWebServerConfig) -> Self {
        self.server = Some(config);
        self
    }

    /// Called with the work directory once preflight has passed and the
    /// directory exists, before anything else is allocated
    pub fn on_workdir_ready(mut self, hook: impl FnOnce(&Path) + Send + 'static) -> Self {
        self.workdir_ready = Some(Box::new(hook));
        self
    }

    /// Drive the run. Every resource acquired along the way is registered
    /// with `lifecycle`, which releases it whatever this returns.
    pub async fn run(self, lifecycle: &mut Lifecycle) -> IrisResult<RunReport> {
        let Self {
            options,
            preflight,
            resolver,
            executor,
            server,
            workdir_ready,
        } = self;

        preflight.validate()?;

        std::fs::create_dir_all(&options.workdir)?;
        if let Some(hook) = workdir_ready {
            hook(&options.workdir);
        }
        debug!("Work directory: {}", options.workdir.display());

        lifecycle.adjust_terminal_encoding(options.platform);
        let temp_directory = lifecycle.acquire_temp_dir()?;

        let base_url = match server {
            Some(config) => {
                let spawned = LocalWebServer::spawn(&config).await;
                lifecycle.spawn_auxiliary(move || spawned)?;
                Some(config.base_url())
            }
            None => None,
        };

        let reference = expand_reference(&options.firefox, options.platform);
        let candidate = resolver
            .resolve(&reference, &options.workdir, &options.locale)
            .await?;
        info!(
            "Firefox {} ({}) at {}",
            candidate.version,
            candidate.provenance,
            candidate.executable_path.display()
        );

        let director = RunDirector::new(&options.workdir);
        let run_directory = director.prepare_run_directory(options.clear)?;

        let ctx = RunContext {
            work_directory: options.workdir.clone(),
            run_directory: run_directory.clone(),
            temp_directory,
            base_url,
            locale: options.locale.clone(),
        };
        let summary = executor.run(&ctx, &candidate).await?;

        director.write_summary(&run_directory, &summary)?;
        director.record_failures(&summary.failed_ids())?;

        Ok(RunReport {
            candidate,
            run_directory,
            summary,
        })
    }
}
