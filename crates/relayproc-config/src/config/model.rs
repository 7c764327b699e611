use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use relayproc_runner::{RelaySettings, StreamConfig};

/// Source of a configuration value.
///
/// Precedence, highest first: CLI arguments, config file, programmatic
/// builder, built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// Value provided via CLI argument (highest precedence).
    Cli,
    /// Value loaded from configuration file.
    Config,
    /// Value provided through [`ConfigBuilder`](super::ConfigBuilder).
    Programmatic,
    /// Built-in default value (lowest precedence).
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Config => write!(f, "config"),
            Self::Programmatic => write!(f, "programmatic"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Configuration for relayproc.
///
/// `Config` provides hierarchical configuration with discovery and precedence:
/// CLI arguments > config file > built-in defaults.
///
/// # Discovery
///
/// [`Config::discover()`] searches for `.relayproc/config.toml` upward from
/// the current directory, stopping at a repository root (`.git`, `.hg`,
/// `.svn`), unless an explicit path is given.
///
/// # Configuration File Format
///
/// ```toml
/// [relay]
/// always_relay = false
/// chunk_bytes = 8192
/// log_batch_bytes = 4096
/// log_level = "info"
/// thread_name_prefix = "relay"
/// lower_worker_priority = true
///
/// [streams]
/// stdin = "interactive"
/// stdout = "interactive"
/// stderr = "file:build.log"
/// merge = false
/// ```
///
/// # Example
///
/// ```rust,no_run
/// use relayproc_config::{CliArgs, Config};
///
/// let config = Config::discover(&CliArgs::default())?;
/// let settings = config.relay_settings();
/// println!("chunk size: {}", settings.chunk_bytes);
/// # Ok::<(), relayproc_config::ConfigError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay worker tuning.
    pub relay: RelayConfig,
    /// Default stream policies for `relayproc run`.
    pub streams: StreamsConfig,
    /// Source attribution for each setting, keyed like `relay.chunk_bytes`.
    pub source_attribution: HashMap<String, ConfigSource>,
    /// The file values were loaded from, if any.
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let mut source_attribution = HashMap::new();
        for key in RelayConfig::KEYS.iter().chain(StreamsConfig::KEYS) {
            source_attribution.insert((*key).to_string(), ConfigSource::Default);
        }
        Self {
            relay: RelayConfig::default(),
            streams: StreamsConfig::default(),
            source_attribution,
            config_path: None,
        }
    }
}

/// `[relay]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    pub always_relay: Option<bool>,
    pub chunk_bytes: Option<usize>,
    pub log_batch_bytes: Option<usize>,
    pub log_level: Option<String>,
    pub thread_name_prefix: Option<String>,
    pub lower_worker_priority: Option<bool>,
}

impl RelayConfig {
    pub(crate) const KEYS: &'static [&'static str] = &[
        "relay.always_relay",
        "relay.chunk_bytes",
        "relay.log_batch_bytes",
        "relay.log_level",
        "relay.thread_name_prefix",
        "relay.lower_worker_priority",
    ];
}

impl Default for RelayConfig {
    fn default() -> Self {
        let settings = RelaySettings::default();
        Self {
            always_relay: Some(settings.always_relay),
            chunk_bytes: Some(settings.chunk_bytes),
            log_batch_bytes: Some(settings.log_batch_bytes),
            log_level: Some(settings.log_level),
            thread_name_prefix: Some(settings.thread_name_prefix),
            lower_worker_priority: Some(settings.lower_worker_priority),
        }
    }
}

/// `[streams]` section. Stream values use the spec syntax accepted by
/// [`parse_stream_spec`](super::parse_stream_spec).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StreamsConfig {
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub merge: Option<bool>,
}

impl StreamsConfig {
    pub(crate) const KEYS: &'static [&'static str] = &[
        "streams.stdin",
        "streams.stdout",
        "streams.stderr",
        "streams.merge",
    ];
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            stdin: Some("interactive".to_string()),
            stdout: Some("interactive".to_string()),
            stderr: Some("interactive".to_string()),
            merge: Some(false),
        }
    }
}

/// Resolved stream defaults, ready to hand to a `ProcessBuilder`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDefaults {
    pub stdin: StreamConfig,
    pub stdout: StreamConfig,
    pub stderr: StreamConfig,
    pub merge: bool,
}
