use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{ConfigurationError, RunnerError};
use crate::process::ManagedProcess;
use crate::settings::RelaySettings;
use crate::types::{RedirectTarget, StdStream, StreamConfig, StreamPolicy};

// ============================================================================
// ProcessConfiguration - What to launch and how its streams are wired
// ============================================================================

/// Everything needed to launch one child process.
///
/// Arguments and the executable are kept as discrete `OsString` elements and
/// handed to the OS argv-style; no shell is ever involved. A configuration is
/// consumed by [`ProcessConfiguration::create`].
#[derive(Debug, Clone, Default)]
pub struct ProcessConfiguration {
    executable: Option<OsString>,
    args: Vec<OsString>,
    /// First argument that was appended while no executable was set
    misplaced_argument: Option<String>,
    /// `Some` sets the variable, `None` removes it
    env: BTreeMap<OsString, Option<OsString>>,
    clear_env: bool,
    current_dir: Option<PathBuf>,
    stdin: StreamConfig,
    stdout: StreamConfig,
    stderr: StreamConfig,
    merge_streams: bool,
    settings: RelaySettings,
}

impl ProcessConfiguration {
    #[must_use]
    pub fn executable(&self) -> Option<&OsStr> {
        self.executable.as_deref()
    }

    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    /// Environment overrides; `None` marks a removed variable.
    pub fn env_overrides(&self) -> impl Iterator<Item = (&OsStr, Option<&OsStr>)> {
        self.env.iter().map(|(k, v)| (k.as_os_str(), v.as_deref()))
    }

    #[must_use]
    pub fn clears_env(&self) -> bool {
        self.clear_env
    }

    /// Policy and redirect target of one standard stream.
    #[must_use]
    pub fn stream(&self, stream: StdStream) -> &StreamConfig {
        match stream {
            StdStream::Stdin => &self.stdin,
            StdStream::Stdout => &self.stdout,
            StdStream::Stderr => &self.stderr,
        }
    }

    #[must_use]
    pub fn policy(&self, stream: StdStream) -> StreamPolicy {
        self.stream(stream).policy
    }

    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.merge_streams
    }

    #[must_use]
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Human-readable command line, used in log events and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        if let Some(exe) = &self.executable {
            parts.push(display_arg(exe));
        }
        parts.extend(self.args.iter().map(|a| display_arg(a)));
        parts.join(" ")
    }

    /// Check the invariants that must hold before anything is launched.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.executable.is_none() {
            return Err(ConfigurationError::MissingExecutable);
        }
        if let Some(argument) = &self.misplaced_argument {
            return Err(ConfigurationError::ArgumentBeforeExecutable {
                argument: argument.clone(),
            });
        }

        for stream in [StdStream::Stdin, StdStream::Stdout, StdStream::Stderr] {
            let config = self.stream(stream);
            if config.policy == StreamPolicy::FileRedirect && config.target.is_none() {
                return Err(ConfigurationError::MissingRedirectTarget { stream });
            }
        }

        if self.stdin.policy == StreamPolicy::Logged {
            return Err(ConfigurationError::UnsupportedPolicy {
                stream: StdStream::Stdin,
                policy: StreamPolicy::Logged,
            });
        }
        if let Some(target) = &self.stdin.target
            && target.append
        {
            return Err(ConfigurationError::AppendOnStdin {
                path: target.path.clone(),
            });
        }

        if self.merge_streams {
            if self.stdout != self.stderr {
                return Err(ConfigurationError::MergeMismatch {
                    stdout: describe(&self.stdout),
                    stderr: describe(&self.stderr),
                });
            }
        } else if let (Some(out), Some(err)) = (redirect_of(&self.stdout), redirect_of(&self.stderr))
            && out.same_file_as(err)
        {
            return Err(ConfigurationError::SharedRedirectTarget {
                path: out.path.clone(),
            });
        }

        Ok(())
    }

    /// Validate and launch the process.
    ///
    /// # Errors
    ///
    /// [`RunnerError::Configuration`] when validation fails (nothing is
    /// launched), [`RunnerError::Launch`] when the OS refuses to start it.
    pub fn create(self) -> Result<ManagedProcess, RunnerError> {
        self.validate()?;
        Ok(crate::launch::launch(self)?)
    }

    /// Build the argv/env/cwd part of the native command. Stdio is wired by
    /// the launcher.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(self.executable.as_deref().unwrap_or_default());
        cmd.args(&self.args);

        if self.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &self.env {
            match value {
                Some(value) => {
                    cmd.env(key, value);
                }
                None => {
                    cmd.env_remove(key);
                }
            }
        }

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}

fn redirect_of(config: &StreamConfig) -> Option<&RedirectTarget> {
    match config.policy {
        StreamPolicy::FileRedirect => config.target.as_ref(),
        _ => None,
    }
}

fn describe(config: &StreamConfig) -> String {
    match &config.target {
        Some(target) if target.append => {
            format!("{}(append {})", config.policy, target.path.display())
        }
        Some(target) => format!("{}({})", config.policy, target.path.display()),
        None => config.policy.to_string(),
    }
}

fn display_arg(arg: &OsStr) -> String {
    let text = arg.to_string_lossy();
    if text.is_empty() || text.chars().any(char::is_whitespace) {
        format!("\"{text}\"")
    } else {
        text.into_owned()
    }
}

// ============================================================================
// ProcessBuilder - Fluent construction of a ProcessConfiguration
// ============================================================================

/// Fluent builder for [`ProcessConfiguration`].
///
/// # Example
///
/// ```rust,no_run
/// use relayproc_runner::{ProcessBuilder, StreamPolicy};
///
/// let process = ProcessBuilder::command("sort")
///     .arg("-r")
///     .stderr(StreamPolicy::Discarded)
///     .create()?;
/// # Ok::<(), relayproc_runner::RunnerError>(())
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ProcessBuilder {
    config: ProcessConfiguration,
}

impl ProcessBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortcut for `ProcessBuilder::new().executable(exe)`.
    pub fn command(executable: impl AsRef<OsStr>) -> Self {
        Self::new().executable(executable)
    }

    pub fn executable(mut self, executable: impl AsRef<OsStr>) -> Self {
        self.config.executable = Some(executable.as_ref().to_os_string());
        self
    }

    /// Append one argument. Appending before an executable is set is an
    /// ordering error reported by `build()`/`create()`.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        let arg = arg.as_ref();
        if self.config.executable.is_none() && self.config.misplaced_argument.is_none() {
            self.config.misplaced_argument = Some(arg.to_string_lossy().into_owned());
        }
        self.config.args.push(arg.to_os_string());
        self
    }

    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        args.into_iter().fold(self, |builder, arg| builder.arg(arg))
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.config.env.insert(
            key.as_ref().to_os_string(),
            Some(value.as_ref().to_os_string()),
        );
        self
    }

    pub fn env_remove(mut self, key: impl AsRef<OsStr>) -> Self {
        self.config.env.insert(key.as_ref().to_os_string(), None);
        self
    }

    /// Start the child with an empty environment; later `env()` calls still apply.
    pub fn env_clear(mut self) -> Self {
        self.config.clear_env = true;
        self.config.env.clear();
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(self, policy: StreamPolicy) -> Self {
        self.policy(StdStream::Stdin, policy)
    }

    pub fn stdout(self, policy: StreamPolicy) -> Self {
        self.policy(StdStream::Stdout, policy)
    }

    pub fn stderr(self, policy: StreamPolicy) -> Self {
        self.policy(StdStream::Stderr, policy)
    }

    /// Feed the child's stdin from a file.
    pub fn read_stdin_from(self, path: impl Into<PathBuf>) -> Self {
        self.redirect(StdStream::Stdin, RedirectTarget::new(path, false))
    }

    pub fn write_stdout_to(self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.redirect(StdStream::Stdout, RedirectTarget::new(path, append))
    }

    pub fn write_stderr_to(self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.redirect(StdStream::Stderr, RedirectTarget::new(path, append))
    }

    /// Replace the whole configuration of one stream.
    pub fn stream(mut self, stream: StdStream, config: StreamConfig) -> Self {
        *self.slot(stream) = config;
        self
    }

    /// Send stderr into the same channel as stdout.
    pub fn merge_streams(mut self, merge: bool) -> Self {
        self.config.merge_streams = merge;
        self
    }

    pub fn settings(mut self, settings: RelaySettings) -> Self {
        self.config.settings = settings;
        self
    }

    /// Validate and return the configuration without launching.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] describing the first invalid setting.
    pub fn build(self) -> Result<ProcessConfiguration, ConfigurationError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Validate and launch.
    ///
    /// # Errors
    ///
    /// See [`ProcessConfiguration::create`].
    pub fn create(self) -> Result<ManagedProcess, RunnerError> {
        self.config.create()
    }

    fn policy(mut self, stream: StdStream, policy: StreamPolicy) -> Self {
        let slot = self.slot(stream);
        slot.policy = policy;
        if policy != StreamPolicy::FileRedirect {
            slot.target = None;
        }
        self
    }

    fn redirect(mut self, stream: StdStream, target: RedirectTarget) -> Self {
        *self.slot(stream) = StreamConfig::redirect(target);
        self
    }

    fn slot(&mut self, stream: StdStream) -> &mut StreamConfig {
        match stream {
            StdStream::Stdin => &mut self.config.stdin,
            StdStream::Stdout => &mut self.config.stdout,
            StdStream::Stderr => &mut self.config.stderr,
        }
    }
}
