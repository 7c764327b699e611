use relayproc_utils::error::ConfigError;

use super::{Config, ConfigSource, RelayConfig, StreamsConfig};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Use this when embedding relayproc and the user's config files and
    /// environment should not influence behavior.
    ///
    /// # Example
    ///
    /// ```rust
    /// use relayproc_config::Config;
    ///
    /// let config = Config::builder()
    ///     .always_relay(true)
    ///     .chunk_bytes(16 * 1024)
    ///     .stderr("log")
    ///     .build()?;
    /// assert!(config.relay_settings().always_relay);
    /// # Ok::<(), relayproc_config::ConfigError>(())
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration.
///
/// All values set via the builder are attributed to
/// [`ConfigSource::Programmatic`]; unset values keep their defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    relay: RelayConfig,
    streams: StreamsConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new `ConfigBuilder` with no values set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            relay: RelayConfig {
                always_relay: None,
                chunk_bytes: None,
                log_batch_bytes: None,
                log_level: None,
                thread_name_prefix: None,
                lower_worker_priority: None,
            },
            streams: StreamsConfig {
                stdin: None,
                stdout: None,
                stderr: None,
                merge: None,
            },
        }
    }

    #[must_use]
    pub fn always_relay(mut self, always_relay: bool) -> Self {
        self.relay.always_relay = Some(always_relay);
        self
    }

    #[must_use]
    pub fn chunk_bytes(mut self, bytes: usize) -> Self {
        self.relay.chunk_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn log_batch_bytes(mut self, bytes: usize) -> Self {
        self.relay.log_batch_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.relay.log_level = Some(level.into());
        self
    }

    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.relay.thread_name_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn lower_worker_priority(mut self, lower: bool) -> Self {
        self.relay.lower_worker_priority = Some(lower);
        self
    }

    /// Default stdin spec, e.g. `"file:input.txt"`.
    #[must_use]
    pub fn stdin(mut self, spec: impl Into<String>) -> Self {
        self.streams.stdin = Some(spec.into());
        self
    }

    #[must_use]
    pub fn stdout(mut self, spec: impl Into<String>) -> Self {
        self.streams.stdout = Some(spec.into());
        self
    }

    #[must_use]
    pub fn stderr(mut self, spec: impl Into<String>) -> Self {
        self.streams.stderr = Some(spec.into());
        self
    }

    #[must_use]
    pub fn merge(mut self, merge: bool) -> Self {
        self.streams.merge = Some(merge);
        self
    }

    /// Build the configuration, validating it the same way file values are.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first invalid value.
    pub fn build(self) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        let source = ConfigSource::Programmatic;
        config.overlay_relay(self.relay, &source);
        config.overlay_streams(self.streams, &source);

        config.validate()?;
        Ok(config)
    }
}
