use serde::{Deserialize, Serialize};

/// Runtime knobs for relay workers.
///
/// Loaded from the `[relay]` section of the configuration file by
/// `relayproc-config`; the defaults are what a process gets when it is
/// created without any configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Insert a relay buffer for every interactive stream, even when only one
    /// stream is interactive (default: false)
    pub always_relay: bool,
    /// Size of the scratch buffer each copy loop reads into (default: 8 KiB)
    pub chunk_bytes: usize,
    /// Bytes a log-sink worker accumulates before it flushes a batch (default: 4 KiB)
    pub log_batch_bytes: usize,
    /// Level log-sink workers emit captured output at (default: "info")
    pub log_level: String,
    /// Prefix for relay thread names; the pid and stream name are appended
    pub thread_name_prefix: String,
    /// Drop relay threads to the lowest scheduling priority where supported
    pub lower_worker_priority: bool,
}

impl RelaySettings {
    pub const MAX_CHUNK_BYTES: usize = 1024 * 1024;

    pub(crate) fn effective_chunk_bytes(&self) -> usize {
        self.chunk_bytes.clamp(1, Self::MAX_CHUNK_BYTES)
    }

    pub(crate) fn effective_batch_bytes(&self) -> usize {
        self.log_batch_bytes.max(1)
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            always_relay: false,
            chunk_bytes: 8 * 1024,    // 8 KiB
            log_batch_bytes: 4 * 1024, // 4 KiB
            log_level: "info".to_string(),
            thread_name_prefix: "relay".to_string(),
            lower_worker_priority: true,
        }
    }
}
