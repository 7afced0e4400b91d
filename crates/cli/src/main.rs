//! Iris command-line entry point
//!
//! `iris [options]` validates the environment, resolves the Firefox build to
//! test, starts the local web server and runs the selected tests. Every exit
//! goes through [`Lifecycle::exit`] so that spawned processes and temporary
//! files are always cleaned up.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, warn};

use iris_core::server::DEFAULT_PORT;
use iris_core::{exit_code, exit_code_for, Lifecycle};

mod logging;
mod run;

use run::RunArgs;

/// Iris - visual regression testing for Firefox
#[derive(Parser)]
#[command(name = "iris")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve test content; started by iris itself
    #[command(hide = true)]
    LocalWeb {
        #[arg(long)]
        root: PathBuf,

        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::LocalWeb { root, port }) => {
            logging::init_child();
            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            if let Err(e) = iris_web::serve(&root, addr).await {
                error!("Local web server failed: {:#}", e);
                std::process::exit(exit_code::INTERNAL);
            }
        }
        None => {
            let (lifecycle, code) = run(cli.run).await;
            lifecycle.exit(code)
        }
    }
}

/// Run once; the caller exits through the returned lifecycle
async fn run(args: RunArgs) -> (Lifecycle, i32) {
    let mut lifecycle = Lifecycle::new();

    let workdir = args.workdir();
    let log_file = match logging::init(args.level) {
        Ok(log_file) => log_file,
        Err(e) => {
            eprintln!("Failed to initialise logging: {e:#}");
            return (lifecycle, exit_code::INTERNAL);
        }
    };

    let result = match run::build_session(&args, &workdir) {
        Ok(session) if args.log_file => {
            // The file lives in the work directory, so it opens only after preflight.
            session
                .on_workdir_ready(move |dir| {
                    let path = dir.join(logging::LOG_FILE);
                    if let Err(e) = log_file.attach(&path) {
                        warn!("Cannot write log file {}: {:#}", path.display(), e);
                    }
                })
                .run(&mut lifecycle)
                .await
        }
        Ok(session) => session.run(&mut lifecycle).await,
        Err(e) => Err(e),
    };

    match &result {
        Ok(report) => run::report(report),
        Err(e) => error!("{}", e),
    }
    let code = exit_code_for(&result);
    (lifecycle, code)
}
