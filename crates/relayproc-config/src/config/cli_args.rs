use std::path::PathBuf;

/// CLI overrides fed into [`Config::discover`](super::Config::discover).
///
/// `None` leaves the file or default value in place.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    /// Explicit configuration file; disables upward discovery.
    pub config_path: Option<PathBuf>,
    pub always_relay: Option<bool>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub merge: Option<bool>,
}
