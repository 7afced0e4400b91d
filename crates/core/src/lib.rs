//! Iris run orchestration core
//!
//! This crate turns a user-supplied Firefox build reference into a runnable
//! candidate and drives one Iris run around it:
//! - Validates the host environment before anything is allocated
//! - Owns the temp directory, the local web server process and every teardown hook
//! - Resolves releases, archives, build trees and installations into a [`Candidate`]
//! - Creates the per-run output directory and records failing tests for reruns
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Session::run                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Preflight::validate()        lock keys, tesseract, 7z      │
//! │  Lifecycle                                                  │
//! │    ├── adjust_terminal_encoding()                           │
//! │    ├── acquire_temp_dir()                                   │
//! │    └── spawn_auxiliary(LocalWebServer::spawn)               │
//! │  Resolver::resolve(reference)                               │
//! │    ├── installation dir   -> AppLayout::inspect             │
//! │    ├── release id         -> Fetcher + Extractor            │
//! │    ├── archive file       -> Extractor                      │
//! │    └── build tree (mach)  -> obj-*/dist                     │
//! │  RunDirector                                                │
//! │    ├── prepare_run_directory()  runs/<run_id>/              │
//! │    ├── TestExecutor::run()                                  │
//! │    └── record_failures()        runs/last_fail.txt          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Lifecycle::exit(code)  terminate processes, run cleanups   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two orchestrator instances must not share a work directory: the download
//! cache, extraction directories and the `runs` root are not locked.

pub mod candidate;
pub mod config;
pub mod director;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod fetcher;
pub mod lifecycle;
pub mod platform;
pub mod preflight;
pub mod resolver;
pub mod server;
pub mod session;

pub use candidate::{AppLayout, Candidate, Provenance};
pub use config::IrisConfig;
pub use director::{FailureLedger, RunDirector};
pub use error::{exit_code, EnvironmentError, IrisError, IrisResult};
pub use executor::{CommandExecutor, Outcome, RunContext, RunSummary, TestExecutor, TestPlan, TestResult};
pub use extractor::{ArchiveExtractor, Extractor};
pub use fetcher::{Fetcher, HttpFetcher};
pub use lifecycle::{AuxiliaryProcess, Lifecycle};
pub use platform::{BuildPlatform, Platform};
pub use preflight::{LockKey, Preflight};
pub use resolver::Resolver;
pub use server::{LocalWebServer, LocalWebServerConfig};
pub use session::{exit_code_for, RunReport, Session, SessionOptions};
