//! `chatlog-worker`: runs one ingestion worker, or prints worker status.

pub mod app;
pub mod cli;

pub use app::{StartupError, run};
pub use cli::{Cli, Command};
