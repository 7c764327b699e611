//! Error types for process execution

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{StdStream, StreamPolicy};

/// Umbrella error for callers that want a single type across every stage.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Process configuration invalid: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Process launch failed: {0}")]
    Launch(#[from] LaunchError),

    #[error("Relay failed: {0}")]
    Relay(#[from] RelayError),

    #[error("Process teardown failed: {0}")]
    Termination(#[from] TerminationError),
}

/// Invalid builder state. Raised before anything is launched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no executable was set")]
    MissingExecutable,

    #[error("argument {argument:?} was added before the executable was set")]
    ArgumentBeforeExecutable { argument: String },

    #[error("{stream} uses a file redirect but no target path was given")]
    MissingRedirectTarget { stream: StdStream },

    #[error("{stream} does not support the {policy} policy")]
    UnsupportedPolicy {
        stream: StdStream,
        policy: StreamPolicy,
    },

    #[error("stdin cannot be opened in append mode ({})", .path.display())]
    AppendOnStdin { path: PathBuf },

    #[error(
        "merged streams need identical stdout and stderr settings (stdout: {stdout}, stderr: {stderr})"
    )]
    MergeMismatch { stdout: String, stderr: String },

    #[error("stdout and stderr both redirect to {} without merging", .path.display())]
    SharedRedirectTarget { path: PathBuf },
}

/// The native process or one of its launch-time resources could not be created.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open {stream} redirect target {}: {source}", .path.display())]
    Redirect {
        stream: StdStream,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create pipe for merged output: {source}")]
    Pipe {
        #[source]
        source: io::Error,
    },

    #[error("failed to start {stream} relay thread: {source}")]
    Worker {
        stream: StdStream,
        #[source]
        source: io::Error,
    },

    #[error("child process did not expose a {stream} pipe")]
    MissingPipe { stream: StdStream },
}

/// What a relay worker was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Read,
    Write,
    Close,
    Panic,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Self::Read => "reading",
            Self::Write => "writing",
            Self::Close => "closing",
            Self::Panic => "running",
        };
        f.write_str(stage)
    }
}

/// A relay worker failure, captured in the background and surfaced at the
/// next `wait_for()`/`close()`.
#[derive(Error, Debug, Clone)]
#[error("{stream} relay failed while {stage}: {source}")]
pub struct RelayError {
    pub stream: StdStream,
    pub stage: RelayStage,
    #[source]
    pub source: Arc<io::Error>,
}

impl RelayError {
    pub(crate) fn new(stream: StdStream, stage: RelayStage, source: io::Error) -> Self {
        Self {
            stream,
            stage,
            source: Arc::new(source),
        }
    }

    pub(crate) fn panicked(stream: StdStream, message: String) -> Self {
        Self::new(
            stream,
            RelayStage::Panic,
            io::Error::other(format!("relay thread panicked: {message}")),
        )
    }
}

/// The teardown resource a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Process,
    Stream(StdStream),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Stream(s) => write!(f, "{s} stream"),
        }
    }
}

/// One failure collected during teardown.
#[derive(Error, Debug, Clone)]
pub enum TeardownFailure {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("failed to {action} {resource}: {source}")]
    Resource {
        resource: Resource,
        action: &'static str,
        #[source]
        source: Arc<io::Error>,
    },
}

impl TeardownFailure {
    pub(crate) fn resource(resource: Resource, action: &'static str, source: io::Error) -> Self {
        Self::Resource {
            resource,
            action,
            source: Arc::new(source),
        }
    }
}

/// How a teardown was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    Graceful,
    Forced,
}

impl fmt::Display for ShutdownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Graceful => f.write_str("graceful"),
            Self::Forced => f.write_str("forced"),
        }
    }
}

/// Every failure encountered during one `wait_for()`/`close()` teardown.
///
/// The process exit code is carried along when it was obtained, so a teardown
/// failure never hides how the child actually exited.
#[derive(Error, Debug, Clone)]
#[error("{kind} shutdown of process {pid} finished with {} error(s){}", .failures.len(), describe_first(.failures))]
pub struct TerminationError {
    pub kind: ShutdownKind,
    pub pid: u32,
    pub exit_code: Option<i32>,
    pub failures: Vec<TeardownFailure>,
}

fn describe_first(failures: &[TeardownFailure]) -> String {
    match failures.first() {
        Some(first) => format!("; first: {first}"),
        None => String::new(),
    }
}

impl TerminationError {
    /// Relay failures included in the aggregate.
    pub fn relay_errors(&self) -> impl Iterator<Item = &RelayError> {
        self.failures.iter().filter_map(|failure| match failure {
            TeardownFailure::Relay(err) => Some(err),
            TeardownFailure::Resource { .. } => None,
        })
    }
}
