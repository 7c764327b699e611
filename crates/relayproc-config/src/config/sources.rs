use std::collections::HashMap;

use super::{Config, ConfigSource};

fn source_label(source: Option<&ConfigSource>) -> String {
    source.unwrap_or(&ConfigSource::Default).to_string()
}

impl Config {
    /// Get effective configuration as key-value pairs with source attribution
    ///
    /// Keys follow the file layout, e.g. `relay.chunk_bytes`; values are
    /// `(value, source)` where source is `cli`, `config`, `programmatic` or
    /// `default`.
    #[must_use]
    pub fn effective_config(&self) -> HashMap<String, (String, String)> {
        let mut config = HashMap::new();

        let mut add_config = |key: &str, value: Option<String>| {
            if let Some(val) = value {
                let source = source_label(self.source_attribution.get(key));
                config.insert(key.to_string(), (val, source));
            }
        };

        let relay = &self.relay;
        add_config("relay.always_relay", relay.always_relay.map(|v| v.to_string()));
        add_config("relay.chunk_bytes", relay.chunk_bytes.map(|v| v.to_string()));
        add_config(
            "relay.log_batch_bytes",
            relay.log_batch_bytes.map(|v| v.to_string()),
        );
        add_config("relay.log_level", relay.log_level.clone());
        add_config("relay.thread_name_prefix", relay.thread_name_prefix.clone());
        add_config(
            "relay.lower_worker_priority",
            relay.lower_worker_priority.map(|v| v.to_string()),
        );

        let streams = &self.streams;
        add_config("streams.stdin", streams.stdin.clone());
        add_config("streams.stdout", streams.stdout.clone());
        add_config("streams.stderr", streams.stderr.clone());
        add_config("streams.merge", streams.merge.map(|v| v.to_string()));

        config
    }
}
