//! Assemble a [`Session`] from command-line arguments and configuration

use std::path::{Path, PathBuf};

use clap::Args;
use tracing::{info, warn};

use iris_core::config::default_workdir;
use iris_core::resolver::LOCAL_SENTINEL;
use iris_core::server::{DEFAULT_PORT, LOCAL_WEB_DIR};
use iris_core::{
    ArchiveExtractor, CommandExecutor, HttpFetcher, IrisConfig, IrisResult, LocalWebServerConfig,
    Platform, Preflight, Resolver, RunDirector, RunReport, Session, SessionOptions, TestPlan,
};

use crate::logging::LogLevel;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Firefox to test: local, a release (nightly, beta, devedition, release, esr),
    /// a package file, a build tree or an installation directory
    #[arg(short, long, default_value = LOCAL_SENTINEL)]
    pub firefox: String,

    /// Work directory for downloads, extractions and run output [default: ~/.iris]
    #[arg(short, long, env = "IRIS_WORKDIR")]
    pub workdir: Option<PathBuf>,

    /// Delete earlier run directories before starting
    #[arg(short, long)]
    pub clear: bool,

    /// Firefox locale to download
    #[arg(short, long, default_value = "en-US")]
    pub locale: String,

    /// Port of the local web server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log level
    #[arg(short = 'i', long, value_enum, default_value_t = LogLevel::Info)]
    pub level: LogLevel,

    /// Also write the log to iris_log.log in the work directory
    #[arg(long)]
    pub log_file: bool,

    /// Directory containing the test scripts
    #[arg(long)]
    pub tests: Option<PathBuf>,

    /// Only run tests whose id contains this string
    #[arg(short, long)]
    pub test: Option<String>,

    /// Only run the tests that failed last time
    #[arg(long)]
    pub rerun: bool,

    /// Command used to run each test, e.g. "python3 -m iris_harness"
    #[arg(long)]
    pub harness: Option<String>,

    /// Configuration file [default: <workdir>/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl RunArgs {
    pub fn workdir(&self) -> PathBuf {
        self.workdir.clone().unwrap_or_else(default_workdir)
    }
}

/// Build everything a run needs; nothing is allocated yet
pub fn build_session(args: &RunArgs, workdir: &Path) -> IrisResult<Session> {
    let config = IrisConfig::resolve(args.config.as_deref(), workdir)?;
    let platform = Platform::detect();

    let preflight = Preflight::new(platform)
        .with_tesseract_override(config.tesseract_path.clone())
        .with_archive_tool(config.archive_tool.clone());

    let fetcher = HttpFetcher::new(workdir.join("cache"), config.download_base_url.clone())?
        .with_read_timeout(config.download_read_timeout())?;
    let extractor = ArchiveExtractor::new(&config.archive_tool);
    let resolver = Resolver::new(Box::new(fetcher), Box::new(extractor))
        .with_cache_timeout(config.cache_timeout());

    let plan = test_plan(args, &config, workdir)?;
    let harness = args.harness.as_deref().or(config.harness.as_deref());
    let executor = CommandExecutor::new(plan, harness);

    let options = SessionOptions {
        firefox: args.firefox.clone(),
        workdir: workdir.to_path_buf(),
        clear: args.clear,
        locale: args.locale.clone(),
        platform,
    };

    let mut server = LocalWebServerConfig::current_exe(content_root(&config, workdir), args.port)?;
    server.settle = config.server_settle();

    Ok(Session::new(options, preflight, resolver, Box::new(executor)).with_server(server))
}

/// Directory the local web server exposes. Never the work directory itself,
/// which holds the download cache.
fn content_root(config: &IrisConfig, workdir: &Path) -> PathBuf {
    config
        .local_web_root
        .clone()
        .unwrap_or_else(|| workdir.join(LOCAL_WEB_DIR))
}

fn test_plan(args: &RunArgs, config: &IrisConfig, workdir: &Path) -> IrisResult<TestPlan> {
    let Some(dir) = args.tests.as_ref().or(config.tests_dir.as_ref()) else {
        return Ok(TestPlan::default());
    };

    let mut plan = TestPlan::discover(dir)?;
    if let Some(filter) = &args.test {
        plan = plan.filter(filter);
    }
    if args.rerun {
        let ledger = RunDirector::new(workdir).load_failures()?;
        if ledger.is_empty() {
            warn!("No failed tests recorded, running the full selection");
        } else {
            info!("Re-running {} failed test(s)", ledger.ids().len());
            plan = plan.only(ledger.ids());
        }
    }
    Ok(plan)
}

pub fn report(report: &RunReport) {
    let summary = &report.summary;
    info!(
        "Run finished: {} total, {} passed, {} failed, {} skipped",
        summary.total, summary.passed, summary.failed, summary.skipped
    );
    info!("Results: {}", report.run_directory.display());
}
