use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use relayproc_utils::error::ConfigError;

use super::{CliArgs, Config, ConfigSource, RelayConfig, StreamsConfig};

/// Directory searched for during discovery.
pub const CONFIG_DIR: &str = ".relayproc";
/// File name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "config.toml";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    relay: Option<RelayConfig>,
    streams: Option<StreamsConfig>,
}

impl Config {
    /// Discover and load configuration with precedence: CLI > file > defaults
    ///
    /// Uses the current working directory for discovery when no explicit
    /// path is given in `cli_args`.
    ///
    /// # Errors
    ///
    /// Fails when the current directory is unavailable, the file cannot be
    /// read or parsed, or a resulting value is invalid.
    pub fn discover(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let start_dir = std::env::current_dir().map_err(|e| ConfigError::DiscoveryFailed {
            reason: format!("failed to get current directory: {e}"),
        })?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory
    ///
    /// This is the path-driven variant used by tests to avoid process-global state.
    ///
    /// # Errors
    ///
    /// See [`Config::discover`].
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let config_path = match &cli_args.config_path {
            Some(explicit_path) => {
                if !explicit_path.is_file() {
                    return Err(ConfigError::NotFound {
                        path: explicit_path.clone(),
                    });
                }
                Some(explicit_path.clone())
            }
            None => Self::discover_config_file_from(start_dir)?,
        };

        if let Some(path) = &config_path {
            let file_config = Self::load_config_file(path)?;
            config.apply_file(file_config);
            config.config_path = Some(path.clone());
        }

        config.apply_cli(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Discover config file by searching upward from a given directory
    ///
    /// Walks up the directory tree looking for `.relayproc/config.toml`,
    /// stopping at repository root markers (.git, .hg, .svn) or the
    /// filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.is_file() {
                return Ok(Some(config_path));
            }

            // Stop at repository root if no config found
            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load configuration from TOML file
    fn load_config_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::InvalidFile {
            path: path.to_path_buf(),
            reason: e.message().to_string(),
        })
    }

    fn apply_file(&mut self, file_config: TomlConfig) {
        let source = ConfigSource::Config;
        if let Some(relay) = file_config.relay {
            self.overlay_relay(relay, &source);
        }
        if let Some(streams) = file_config.streams {
            self.overlay_streams(streams, &source);
        }
    }

    fn apply_cli(&mut self, cli_args: &CliArgs) {
        let source = ConfigSource::Cli;
        overlay(
            &mut self.relay.always_relay,
            cli_args.always_relay,
            "relay.always_relay",
            &source,
            &mut self.source_attribution,
        );
        self.overlay_streams(
            StreamsConfig {
                stdin: cli_args.stdin.clone(),
                stdout: cli_args.stdout.clone(),
                stderr: cli_args.stderr.clone(),
                merge: cli_args.merge,
            },
            &source,
        );
    }

    pub(crate) fn overlay_relay(&mut self, relay: RelayConfig, source: &ConfigSource) {
        let r = &mut self.relay;
        let attribution = &mut self.source_attribution;
        overlay(
            &mut r.always_relay,
            relay.always_relay,
            "relay.always_relay",
            source,
            attribution,
        );
        overlay(
            &mut r.chunk_bytes,
            relay.chunk_bytes,
            "relay.chunk_bytes",
            source,
            attribution,
        );
        overlay(
            &mut r.log_batch_bytes,
            relay.log_batch_bytes,
            "relay.log_batch_bytes",
            source,
            attribution,
        );
        overlay(&mut r.log_level, relay.log_level, "relay.log_level", source, attribution);
        overlay(
            &mut r.thread_name_prefix,
            relay.thread_name_prefix,
            "relay.thread_name_prefix",
            source,
            attribution,
        );
        overlay(
            &mut r.lower_worker_priority,
            relay.lower_worker_priority,
            "relay.lower_worker_priority",
            source,
            attribution,
        );
    }

    pub(crate) fn overlay_streams(&mut self, streams: StreamsConfig, source: &ConfigSource) {
        let s = &mut self.streams;
        let attribution = &mut self.source_attribution;
        overlay(&mut s.stdin, streams.stdin, "streams.stdin", source, attribution);
        overlay(&mut s.stdout, streams.stdout, "streams.stdout", source, attribution);
        overlay(&mut s.stderr, streams.stderr, "streams.stderr", source, attribution);
        overlay(&mut s.merge, streams.merge, "streams.merge", source, attribution);
    }
}

/// Replace `slot` when `value` is set and record where it came from.
fn overlay<T>(
    slot: &mut Option<T>,
    value: Option<T>,
    key: &str,
    source: &ConfigSource,
    attribution: &mut HashMap<String, ConfigSource>,
) {
    if value.is_some() {
        *slot = value;
        attribution.insert(key.to_string(), source.clone());
    }
}
