use std::time::Duration;

use clap::Parser;

use crate::hash::HashFunction;

/// Error reporting. Only ERROR-level events are forwarded, so there is no
/// trace sampling to configure.
#[derive(Debug, Parser, Clone)]
pub struct SentryConfig {
    #[arg(long = "sentry-dsn", env = "SENTRY_DSN", default_value = "")]
    pub dsn: String,
}

/// OTLP metrics export. Metrics stay local when no endpoint is set.
#[derive(Debug, Parser, Clone)]
pub struct OtelConfig {
    #[arg(long = "otel-endpoint", env = "OTEL_EXPORTER_OTLP_ENDPOINT", default_value = "")]
    pub endpoint: String,
}

#[derive(Debug, Parser, Clone)]
pub struct RingConfig {
    /// Capacity of the engine port channels, which also bounds the number of
    /// commands awaiting a response.
    #[arg(long, env = "HASHRING_CHANNEL_CAPACITY", default_value_t = 1024)]
    pub channel_capacity: usize,

    /// Per-call wait limit in milliseconds; 0 waits forever.
    #[arg(long, env = "HASHRING_CALL_TIMEOUT_MS", default_value_t = 0)]
    pub call_timeout_ms: u64,

    #[arg(long, env = "HASHRING_DEFAULT_REPLICAS", default_value_t = 128)]
    pub default_replicas: u32,

    #[arg(long, env = "HASHRING_DEFAULT_HASH", value_enum, default_value_t = HashFunction::Default)]
    pub default_hash_function: HashFunction,
}

impl RingConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        match self.call_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            call_timeout_ms: 0,
            default_replicas: 128,
            default_hash_function: HashFunction::Default,
        }
    }
}
