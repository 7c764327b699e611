//! Exit code constants and error mapping for the `relayproc` binary.
//!
//! # Exit Code Table
//!
//! | Code | Constant | Description |
//! |------|----------|-------------|
//! | 0 | `SUCCESS` | Operation completed successfully |
//! | 1 | `INTERNAL` | General/internal failure |
//! | 2 | `CLI_ARGS` | Invalid CLI arguments or configuration |
//! | 3 | `LAUNCH_FAILURE` | The child process could not be started |
//! | 4 | `TERMINATION_FAILURE` | Teardown reported errors |
//!
//! `relayproc run` otherwise exits with the child's own exit code.

use relayproc_runner::RunnerError;

use crate::error::RelayprocError;

/// Exit codes matching the documented exit code table.
///
/// Use the named constants for common exit codes, or [`as_i32()`](Self::as_i32)
/// to get the numeric value for `std::process::exit()`.
///
/// # Example
///
/// ```rust
/// use relayproc_utils::exit_codes::ExitCode;
///
/// assert_eq!(ExitCode::LAUNCH_FAILURE.as_i32(), 3);
/// assert_eq!(ExitCode::SUCCESS, ExitCode::from_i32(0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    /// Success - operation completed successfully
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// Internal error - general failure
    pub const INTERNAL: ExitCode = ExitCode(1);

    /// CLI arguments error - invalid arguments, configuration file or stream setup
    pub const CLI_ARGS: ExitCode = ExitCode(2);

    /// Launch failure - spawn, redirect, pipe or relay thread creation failed
    pub const LAUNCH_FAILURE: ExitCode = ExitCode(3);

    /// Termination failure - teardown collected one or more errors
    pub const TERMINATION_FAILURE: ExitCode = ExitCode(4);

    /// Get the numeric exit code value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Create an ExitCode from a raw i32 value, e.g. a child's exit code.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<i32> for ExitCode {
    fn from(code: i32) -> Self {
        ExitCode(code)
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.0
    }
}

impl RelayprocError {
    /// Map this error to the exit code the binary reports.
    #[must_use]
    pub fn to_exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::CLI_ARGS,
            Self::Runner(err) => runner_exit_code(err),
            Self::Io(_) => ExitCode::INTERNAL,
        }
    }
}

fn runner_exit_code(err: &RunnerError) -> ExitCode {
    match err {
        RunnerError::Configuration(_) => ExitCode::CLI_ARGS,
        RunnerError::Launch(_) => ExitCode::LAUNCH_FAILURE,
        RunnerError::Relay(_) | RunnerError::Termination(_) => ExitCode::TERMINATION_FAILURE,
    }
}

/// Exit code for an arbitrary error chain produced by the CLI.
///
/// Walks the `anyhow` chain looking for a known error type; anything else is
/// an internal failure.
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<RelayprocError>() {
            return err.to_exit_code();
        }
        if let Some(err) = cause.downcast_ref::<RunnerError>() {
            return runner_exit_code(err);
        }
        if cause.downcast_ref::<crate::error::ConfigError>().is_some() {
            return ExitCode::CLI_ARGS;
        }
    }
    ExitCode::INTERNAL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use relayproc_runner::{ConfigurationError, LaunchError, ShutdownKind, TerminationError};

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(ExitCode::SUCCESS.as_i32(), 0);
        assert_eq!(ExitCode::INTERNAL.as_i32(), 1);
        assert_eq!(ExitCode::CLI_ARGS.as_i32(), 2);
        assert_eq!(ExitCode::LAUNCH_FAILURE.as_i32(), 3);
        assert_eq!(ExitCode::TERMINATION_FAILURE.as_i32(), 4);
        assert_eq!(i32::from(ExitCode::from(137)), 137);
    }

    #[test]
    fn test_config_error_mapping() {
        let err = RelayprocError::Config(ConfigError::InvalidValue {
            key: "relay.chunk_bytes".to_string(),
            value: "0".to_string(),
        });
        assert_eq!(err.to_exit_code(), ExitCode::CLI_ARGS);

        let err = RelayprocError::from(ConfigurationError::MissingExecutable);
        assert_eq!(err.to_exit_code(), ExitCode::CLI_ARGS);
    }

    #[test]
    fn test_launch_and_termination_mapping() {
        let err = RelayprocError::from(LaunchError::Spawn {
            program: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(err.to_exit_code(), ExitCode::LAUNCH_FAILURE);

        let err = RelayprocError::from(TerminationError {
            kind: ShutdownKind::Graceful,
            pid: 1,
            exit_code: Some(0),
            failures: Vec::new(),
        });
        assert_eq!(err.to_exit_code(), ExitCode::TERMINATION_FAILURE);
    }

    #[test]
    fn test_anyhow_chain_is_searched() {
        let err = anyhow::Error::new(ConfigError::NotFound {
            path: "missing.toml".into(),
        })
        .context("loading configuration");
        assert_eq!(exit_code_for(&err), ExitCode::CLI_ARGS);

        let err = anyhow::Error::new(RunnerError::from(LaunchError::MissingPipe {
            stream: relayproc_runner::StdStream::Stdout,
        }));
        assert_eq!(exit_code_for(&err), ExitCode::LAUNCH_FAILURE);

        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for(&err), ExitCode::INTERNAL);
    }
}
