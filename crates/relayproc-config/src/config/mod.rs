//! Configuration management for relayproc
//!
//! This module provides hierarchical configuration with discovery and precedence:
//! CLI > file > defaults. Supports TOML configuration files with `[relay]` and
//! `[streams]` sections.

mod builder;
mod cli_args;
mod discovery;
mod model;
mod sources;
mod streams;
mod validation;

pub use builder::ConfigBuilder;
pub use cli_args::CliArgs;
pub use discovery::{CONFIG_DIR, CONFIG_FILE};
pub use model::*;
pub use streams::parse_stream_spec;

use relayproc_runner::{ProcessBuilder, RelaySettings, StdStream, StreamConfig};
use relayproc_utils::error::ConfigError;

impl Config {
    /// Runtime settings for relay workers, with defaults filled in.
    #[must_use]
    pub fn relay_settings(&self) -> RelaySettings {
        let defaults = RelaySettings::default();
        let relay = &self.relay;
        RelaySettings {
            always_relay: relay.always_relay.unwrap_or(defaults.always_relay),
            chunk_bytes: relay.chunk_bytes.unwrap_or(defaults.chunk_bytes),
            log_batch_bytes: relay.log_batch_bytes.unwrap_or(defaults.log_batch_bytes),
            log_level: relay
                .log_level
                .as_ref()
                .map_or(defaults.log_level, |level| level.to_ascii_lowercase()),
            thread_name_prefix: relay
                .thread_name_prefix
                .clone()
                .unwrap_or(defaults.thread_name_prefix),
            lower_worker_priority: relay
                .lower_worker_priority
                .unwrap_or(defaults.lower_worker_priority),
        }
    }

    /// Parsed stream defaults from `[streams]` and CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a spec does not parse; values
    /// loaded through discovery or the builder have already been checked.
    pub fn stream_defaults(&self) -> Result<StreamDefaults, ConfigError> {
        let parse = |stream: StdStream, spec: &Option<String>| match spec {
            Some(spec) => parse_stream_spec(stream, spec),
            None => Ok(StreamConfig::default()),
        };
        Ok(StreamDefaults {
            stdin: parse(StdStream::Stdin, &self.streams.stdin)?,
            stdout: parse(StdStream::Stdout, &self.streams.stdout)?,
            stderr: parse(StdStream::Stderr, &self.streams.stderr)?,
            merge: self.streams.merge.unwrap_or(false),
        })
    }

    /// Apply relay settings and stream defaults to a process builder.
    ///
    /// # Errors
    ///
    /// See [`Config::stream_defaults`].
    pub fn apply(&self, builder: ProcessBuilder) -> Result<ProcessBuilder, ConfigError> {
        let streams = self.stream_defaults()?;
        Ok(builder
            .settings(self.relay_settings())
            .stream(StdStream::Stdin, streams.stdin)
            .stream(StdStream::Stdout, streams.stdout)
            .stream(StdStream::Stderr, streams.stderr)
            .merge_streams(streams.merge))
    }
}
