use relayproc_runner::{RelaySettings, StdStream};
use relayproc_utils::error::ConfigError;

use super::{Config, parse_stream_spec};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

fn invalid(key: &str, value: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    }
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Some(chunk_bytes) = self.relay.chunk_bytes {
            if chunk_bytes == 0 {
                return Err(invalid("relay.chunk_bytes", "must be greater than 0"));
            }
            if chunk_bytes > RelaySettings::MAX_CHUNK_BYTES {
                return Err(invalid(
                    "relay.chunk_bytes",
                    "exceeds maximum limit of 1048576 bytes (1 MiB)",
                ));
            }
        }

        if self.relay.log_batch_bytes == Some(0) {
            return Err(invalid("relay.log_batch_bytes", "must be greater than 0"));
        }

        if let Some(level) = &self.relay.log_level
            && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
        {
            return Err(invalid(
                "relay.log_level",
                format!("unknown level '{level}'"),
            ));
        }

        if let Some(prefix) = &self.relay.thread_name_prefix {
            if prefix.is_empty() {
                return Err(invalid("relay.thread_name_prefix", "must not be empty"));
            }
            if prefix.contains('\0') {
                return Err(invalid(
                    "relay.thread_name_prefix",
                    "must not contain NUL bytes",
                ));
            }
        }

        for (stream, spec) in [
            (StdStream::Stdin, &self.streams.stdin),
            (StdStream::Stdout, &self.streams.stdout),
            (StdStream::Stderr, &self.streams.stderr),
        ] {
            if let Some(spec) = spec {
                parse_stream_spec(stream, spec)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_of(err: ConfigError) -> String {
        match err {
            ConfigError::InvalidValue { key, .. } => key,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_chunk_bytes_bounds() {
        let mut config = Config::default();
        config.relay.chunk_bytes = Some(RelaySettings::MAX_CHUNK_BYTES);
        config.validate().unwrap();

        config.relay.chunk_bytes = Some(RelaySettings::MAX_CHUNK_BYTES + 1);
        assert_eq!(key_of(config.validate().unwrap_err()), "relay.chunk_bytes");

        config.relay.chunk_bytes = Some(0);
        assert_eq!(key_of(config.validate().unwrap_err()), "relay.chunk_bytes");
    }

    #[test]
    fn test_log_settings() {
        let mut config = Config::default();
        config.relay.log_level = Some("DEBUG".to_string());
        config.validate().unwrap();

        config.relay.log_level = Some("verbose".to_string());
        assert_eq!(key_of(config.validate().unwrap_err()), "relay.log_level");

        let mut config = Config::default();
        config.relay.log_batch_bytes = Some(0);
        assert_eq!(key_of(config.validate().unwrap_err()), "relay.log_batch_bytes");
    }

    #[test]
    fn test_thread_name_prefix() {
        let mut config = Config::default();
        config.relay.thread_name_prefix = Some(String::new());
        assert_eq!(
            key_of(config.validate().unwrap_err()),
            "relay.thread_name_prefix"
        );

        config.relay.thread_name_prefix = Some("re\0lay".to_string());
        assert_eq!(
            key_of(config.validate().unwrap_err()),
            "relay.thread_name_prefix"
        );
    }

    #[test]
    fn test_stream_specs_are_checked() {
        let mut config = Config::default();
        config.streams.stdin = Some("log".to_string());
        assert_eq!(key_of(config.validate().unwrap_err()), "streams.stdin");
    }
}
