//! Shared foundations for the relayproc binary and configuration crates
//!
//! - `error`: user-facing error types and the [`error::UserFriendlyError`] trait
//! - `exit_codes`: the binary's exit code table
//! - `logging`: tracing subscriber setup

pub mod error;
pub mod exit_codes;
pub mod logging;

pub use error::{ConfigError, ErrorCategory, RelayprocError, UserFriendlyError};
pub use exit_codes::ExitCode;
