//! Local web server process handle
//!
//! The content server runs in its own OS process so that a wedged test cannot
//! take it down and it cannot block the run. Iris starts it by re-executing its
//! own binary with the `local-web` subcommand.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{IrisError, IrisResult};
use crate::lifecycle::AuxiliaryProcess;

pub const DEFAULT_PORT: u16 = 2000;

/// Content root under the work directory unless configured otherwise
pub const LOCAL_WEB_DIR: &str = "local_web";

/// How long a freshly spawned server must stay alive to count as started
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(250);

const NAME: &str = "local web server";

#[derive(Debug, Clone)]
pub struct LocalWebServerConfig {
    /// Binary to launch, normally the running `iris` executable
    pub program: PathBuf,
    /// Arguments placed before `--root`/`--port`, e.g. `["local-web"]`
    pub leading_args: Vec<OsString>,
    /// Directory served as static content
    pub root: PathBuf,
    pub port: u16,
    pub settle: Duration,
}

impl LocalWebServerConfig {
    /// Configuration that re-executes the current binary
    pub fn current_exe(root: impl Into<PathBuf>, port: u16) -> IrisResult<Self> {
        let program = std::env::current_exe().map_err(|e| IrisError::Spawn {
            name: NAME.to_string(),
            reason: format!("cannot locate own executable: {e}"),
        })?;
        Ok(Self {
            program,
            leading_args: vec!["local-web".into()],
            root: root.into(),
            port,
            settle: DEFAULT_SETTLE,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Handle to a running content server process
pub struct LocalWebServer {
    child: Child,
    base_url: String,
}

impl LocalWebServer {
    /// Launch the server and confirm it survived the settle interval.
    /// The content root is created if missing.
    pub async fn spawn(config: &LocalWebServerConfig) -> IrisResult<Self> {
        info!("Starting local web server on port {}", config.port);

        std::fs::create_dir_all(&config.root)
            .map_err(|e| spawn_error(format!("content root {}: {}", config.root.display(), e)))?;

        let mut child = Command::new(&config.program)
            .args(&config.leading_args)
            .arg("--root")
            .arg(&config.root)
            .arg("--port")
            .arg(config.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| spawn_error(format!("{}: {}", config.program.display(), e)))?;

        tokio::time::sleep(config.settle).await;
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => return Err(spawn_error(format!("exited early with {status}"))),
            Err(e) => {
                let _ = child.kill();
                return Err(spawn_error(e.to_string()));
            }
        }

        debug!("Local web server running (pid: {})", child.id());
        Ok(Self {
            child,
            base_url: config.base_url(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl AuxiliaryProcess for LocalWebServer {
    fn name(&self) -> &str {
        NAME
    }

    fn terminate(&mut self) -> anyhow::Result<()> {
        if self.child.try_wait()?.is_some() {
            debug!("Local web server already exited");
            return Ok(());
        }
        debug!("Stopping local web server (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                for _ in 0..10 {
                    if self.child.try_wait()?.is_some() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }

        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

fn spawn_error(reason: String) -> IrisError {
    IrisError::Spawn {
        name: NAME.to_string(),
        reason,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn config(program: &str, leading: &[&str], settle_ms: u64) -> LocalWebServerConfig {
        LocalWebServerConfig {
            program: PathBuf::from(program),
            leading_args: leading.iter().map(OsString::from).collect(),
            root: std::env::temp_dir(),
            port: 2000,
            settle: Duration::from_millis(settle_ms),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let err = LocalWebServer::spawn(&config("/nonexistent/iris", &[], 0))
            .await
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), crate::error::exit_code::SPAWN_FAILED);
    }

    #[tokio::test]
    async fn early_exit_is_spawn_error() {
        // `sh -c "exit 3" --root <tmp> --port 2000` exits immediately.
        let err = LocalWebServer::spawn(&config("sh", &["-c", "exit 3"], 200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IrisError::Spawn { .. }));
    }

    #[tokio::test]
    async fn running_process_is_terminated() {
        let mut server = LocalWebServer::spawn(&config("sh", &["-c", "sleep 30"], 50))
            .await
            .unwrap();
        assert_eq!(server.base_url(), "http://127.0.0.1:2000");
        server.terminate().unwrap();
        assert!(server.child.try_wait().unwrap().is_some());
        // A second terminate finds the process gone.
        server.terminate().unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn settle_wait_lets_other_tasks_run() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let mut server = LocalWebServer::spawn(&config("sh", &["-c", "sleep 30"], 100))
            .await
            .unwrap();
        assert!(ran.load(Ordering::SeqCst), "settle wait blocked the runtime thread");
        server.terminate().unwrap();
    }

    #[tokio::test]
    async fn missing_content_root_is_created() {
        let work = tempfile::tempdir().unwrap();
        let mut cfg = config("sh", &["-c", "sleep 30"], 20);
        cfg.root = work.path().join(LOCAL_WEB_DIR);

        let mut server = LocalWebServer::spawn(&cfg).await.unwrap();
        assert!(cfg.root.is_dir());
        server.terminate().unwrap();
    }
}
