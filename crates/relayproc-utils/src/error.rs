use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use relayproc_runner::{
    ConfigurationError, LaunchError, RelayError, RunnerError, ShutdownKind, TeardownFailure,
    TerminationError,
};

/// Top-level error for the `relayproc` binary and library
#[derive(Error, Debug)]
pub enum RelayprocError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ConfigurationError> for RelayprocError {
    fn from(err: ConfigurationError) -> Self {
        Self::Runner(err.into())
    }
}

impl From<LaunchError> for RelayprocError {
    fn from(err: LaunchError) -> Self {
        Self::Runner(err.into())
    }
}

impl From<TerminationError> for RelayprocError {
    fn from(err: TerminationError) -> Self {
        Self::Runner(err.into())
    }
}

impl RelayprocError {
    /// Get a user-friendly error message with context and actionable suggestions.
    #[must_use]
    pub fn display_for_user(&self) -> String {
        render_report(self)
    }
}

/// Render any [`UserFriendlyError`] as the multi-line report the CLI prints.
#[must_use]
pub fn render_report(err: &dyn UserFriendlyError) -> String {
    let mut output = format!("Error: {}\n", err.user_message());

    if let Some(ctx) = err.context() {
        output.push_str(&format!("\nContext: {ctx}\n"));
    }

    let suggestions = err.suggestions();
    if !suggestions.is_empty() {
        output.push_str("\nSuggestions:\n");
        for suggestion in suggestions {
            output.push_str(&format!("  • {suggestion}\n"));
        }
    }

    output
}

impl UserFriendlyError for RelayprocError {
    fn user_message(&self) -> String {
        match self {
            Self::Config(err) => err.user_message(),
            Self::Runner(err) => err.user_message(),
            Self::Io(err) => format!("I/O operation failed: {err}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Config(err) => err.context(),
            Self::Runner(err) => err.context(),
            Self::Io(_) => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Config(err) => err.suggestions(),
            Self::Runner(err) => err.suggestions(),
            Self::Io(_) => vec!["Check file permissions and available disk space".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(err) => err.category(),
            Self::Runner(err) => err.category(),
            Self::Io(_) => ErrorCategory::FileSystem,
        }
    }
}

/// Trait for providing user-friendly error reporting with context and suggestions
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get contextual information about the error
    fn context(&self) -> Option<String>;

    /// Get suggested actions to resolve the error
    fn suggestions(&self) -> Vec<String>;

    /// Get the error category for grouping similar errors
    fn category(&self) -> ErrorCategory;
}

/// Categories of errors for better organization and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Launch,
    Relay,
    Teardown,
    FileSystem,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::Launch => write!(f, "Process Launch"),
            Self::Relay => write!(f, "Stream Relay"),
            Self::Teardown => write!(f, "Process Teardown"),
            Self::FileSystem => write!(f, "File System"),
        }
    }
}

// ============================================================================
// Configuration file errors
// ============================================================================

/// Errors raised while discovering, loading or validating `.relayproc/config.toml`
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration file {}: {reason}", .path.display())]
    InvalidFile { path: PathBuf, reason: String },

    #[error("Invalid configuration value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found at {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Configuration discovery failed: {reason}")]
    DiscoveryFailed { reason: String },

    #[error("Failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::InvalidFile { path, reason } => {
                format!(
                    "Configuration file {} has invalid format: {reason}",
                    path.display()
                )
            }
            Self::InvalidValue { key, value } => {
                format!("Configuration '{key}' has invalid value: {value}")
            }
            Self::NotFound { path } => {
                format!("Configuration file not found: {}", path.display())
            }
            Self::DiscoveryFailed { reason } => {
                format!("Failed to discover configuration: {reason}")
            }
            Self::Read { path, source } => {
                format!("Could not read {}: {source}", path.display())
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::InvalidFile { .. } => Some(
                "Configuration files must be valid TOML with optional [relay] and [streams] sections."
                    .to_string(),
            ),
            Self::InvalidValue { key, .. } => Some(format!(
                "The '{key}' configuration option has specific format requirements."
            )),
            Self::NotFound { .. } | Self::DiscoveryFailed { .. } => Some(
                "relayproc searches for .relayproc/config.toml from the current directory upward, stopping at the repository root."
                    .to_string(),
            ),
            Self::Read { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidFile { .. } => vec![
                "Check the TOML syntax using a TOML validator".to_string(),
                "Remove unknown keys; only [relay] and [streams] are recognised".to_string(),
            ],
            Self::InvalidValue { key, .. } => match key.as_str() {
                "relay.chunk_bytes" => vec![
                    "Use a value between 1 and 1048576".to_string(),
                    "The default of 8192 suits most workloads".to_string(),
                ],
                "relay.log_batch_bytes" => vec!["Use a positive integer value".to_string()],
                "relay.log_level" => {
                    vec!["Use one of: trace, debug, info, warn, error".to_string()]
                }
                "streams.stdin" | "streams.stdout" | "streams.stderr" => vec![
                    "Use interactive, discard, inherit, log, file:PATH or append:PATH".to_string(),
                    "stdin accepts neither log nor append:PATH".to_string(),
                ],
                _ => vec!["Remove the option to use the default value".to_string()],
            },
            Self::NotFound { .. } => vec![
                "Check the path passed to --config".to_string(),
                "Omit --config to use discovery and built-in defaults".to_string(),
            ],
            Self::DiscoveryFailed { .. } => vec![
                "Check read permissions on the directory tree".to_string(),
                "Use --config <path> to specify the configuration file explicitly".to_string(),
            ],
            Self::Read { .. } => vec!["Check that the file is readable".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

// ============================================================================
// Process execution errors
// ============================================================================

impl UserFriendlyError for RunnerError {
    fn user_message(&self) -> String {
        match self {
            Self::Configuration(err) => err.user_message(),
            Self::Launch(err) => err.user_message(),
            Self::Relay(err) => err.user_message(),
            Self::Termination(err) => err.user_message(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Configuration(err) => err.context(),
            Self::Launch(err) => err.context(),
            Self::Relay(err) => err.context(),
            Self::Termination(err) => err.context(),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Configuration(err) => err.suggestions(),
            Self::Launch(err) => err.suggestions(),
            Self::Relay(err) => err.suggestions(),
            Self::Termination(err) => err.suggestions(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(err) => err.category(),
            Self::Launch(err) => err.category(),
            Self::Relay(err) => err.category(),
            Self::Termination(err) => err.category(),
        }
    }
}

impl UserFriendlyError for ConfigurationError {
    fn user_message(&self) -> String {
        format!("Process configuration is invalid: {self}")
    }

    fn context(&self) -> Option<String> {
        Some("Nothing was launched; the configuration is checked before the child is spawned.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::MissingExecutable | Self::ArgumentBeforeExecutable { .. } => vec![
                "Pass the program after `--`, e.g. `relayproc run -- cat file.txt`".to_string(),
            ],
            Self::MissingRedirectTarget { .. } => {
                vec!["Use file:PATH or append:PATH to name the redirect target".to_string()]
            }
            Self::UnsupportedPolicy { .. } | Self::AppendOnStdin { .. } => vec![
                "stdin supports interactive, discard, inherit and file:PATH".to_string(),
            ],
            Self::MergeMismatch { .. } => vec![
                "Give stdout and stderr the same policy when using --merge".to_string(),
                "Or drop --merge to keep the streams separate".to_string(),
            ],
            Self::SharedRedirectTarget { .. } => vec![
                "Use --merge to send both streams to one file".to_string(),
                "Or redirect stderr to a different file".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl UserFriendlyError for LaunchError {
    fn user_message(&self) -> String {
        match self {
            Self::Spawn { program, source } => {
                format!("Could not start '{program}': {source}")
            }
            _ => format!("Process launch failed: {self}"),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Spawn { .. } => Some(
                "Programs are executed directly, without a shell, and resolved through PATH."
                    .to_string(),
            ),
            Self::Redirect { .. } => Some(
                "Redirect targets are opened before the child is spawned.".to_string(),
            ),
            Self::Pipe { .. } | Self::Worker { .. } | Self::MissingPipe { .. } => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound => vec![
                "Check the program name and your PATH".to_string(),
                "Use an absolute path to the executable".to_string(),
            ],
            Self::Spawn { .. } => vec!["Check that the program is executable".to_string()],
            Self::Redirect { .. } => vec![
                "Check that the directory exists and is writable".to_string(),
                "For stdin, check that the input file exists".to_string(),
            ],
            Self::Pipe { .. } | Self::Worker { .. } | Self::MissingPipe { .. } => vec![
                "Check system limits on open files and threads (ulimit -n, ulimit -u)".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Launch
    }
}

impl UserFriendlyError for RelayError {
    fn user_message(&self) -> String {
        format!("Copying the child's {} failed: {}", self.stream, self.source)
    }

    fn context(&self) -> Option<String> {
        Some("Relay threads copy data between the child's pipes and in-memory buffers.".to_string())
    }

    fn suggestions(&self) -> Vec<String> {
        vec!["Run with --verbose to see relay thread activity".to_string()]
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Relay
    }
}

impl UserFriendlyError for TerminationError {
    fn user_message(&self) -> String {
        let exit = self
            .exit_code
            .map_or_else(|| "unknown".to_string(), |code| code.to_string());
        format!(
            "Process {} ({} shutdown, exit code {exit}) reported {} teardown error(s)",
            self.pid,
            self.kind,
            self.failures.len()
        )
    }

    fn context(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("  - {failure}"))
            .collect();
        Some(lines.join("\n"))
    }

    fn suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        if self
            .failures
            .iter()
            .any(|failure| matches!(failure, TeardownFailure::Relay(_)))
        {
            suggestions.push("Run with --verbose to see relay thread activity".to_string());
        }
        if self.kind == ShutdownKind::Forced {
            suggestions.push(
                "Output still buffered when the process was killed may have been lost".to_string(),
            );
        }
        suggestions
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Teardown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayproc_runner::StdStream;

    #[test]
    fn test_config_error_suggestions_by_key() {
        let err = ConfigError::InvalidValue {
            key: "relay.log_level".to_string(),
            value: "loud".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.user_message().contains("loud"));
        assert!(err.suggestions()[0].contains("trace"));
    }

    #[test]
    fn test_runner_error_delegates_to_inner() {
        let err = RunnerError::from(ConfigurationError::MissingExecutable);
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(
            err.user_message(),
            "Process configuration is invalid: no executable was set"
        );
    }

    #[test]
    fn test_missing_program_suggests_path() {
        let err = LaunchError::Spawn {
            program: "nope".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.category(), ErrorCategory::Launch);
        assert!(err.suggestions().iter().any(|s| s.contains("PATH")));
    }

    #[test]
    fn test_termination_error_lists_failures() {
        let err = TerminationError {
            kind: ShutdownKind::Forced,
            pid: 7,
            exit_code: Some(137),
            failures: vec![TeardownFailure::Resource {
                resource: relayproc_runner::Resource::Stream(StdStream::Stdin),
                action: "close",
                source: std::sync::Arc::new(std::io::Error::other("boom")),
            }],
        };
        assert_eq!(
            err.user_message(),
            "Process 7 (forced shutdown, exit code 137) reported 1 teardown error(s)"
        );
        assert_eq!(
            err.context().as_deref(),
            Some("  - failed to close stdin stream: boom")
        );
        assert_eq!(err.suggestions().len(), 1);
    }

    #[test]
    fn test_display_for_user_sections() {
        let err = RelayprocError::from(ConfigurationError::MissingExecutable);
        let report = err.display_for_user();
        assert!(report.starts_with("Error: Process configuration is invalid"));
        assert!(report.contains("\nContext: Nothing was launched"));
        assert!(report.contains("\nSuggestions:\n  • Pass the program after `--`"));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Teardown.to_string(), "Process Teardown");
    }
}
