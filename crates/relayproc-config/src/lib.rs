//! Configuration for relayproc
//!
//! Loads `.relayproc/config.toml` and merges it with CLI flags and built-in
//! defaults. The result converts into the runner's [`RelaySettings`] and
//! per-stream defaults for `relayproc run`.
//!
//! [`RelaySettings`]: relayproc_runner::RelaySettings

pub mod config;

pub use config::{
    CliArgs, Config, ConfigBuilder, ConfigSource, RelayConfig, StreamDefaults, StreamsConfig,
    parse_stream_spec,
};
pub use relayproc_utils::error::ConfigError;
