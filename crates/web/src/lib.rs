//! Iris local web server
//!
//! Serves the test content directory over HTTP on the loopback interface.
//! The orchestrator runs this in a child process (`iris local-web`) and
//! terminates it when the run ends.

pub mod server;

pub use server::{router, serve};
