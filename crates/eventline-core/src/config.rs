//! Process configuration, loaded once from the environment at startup.
//!
//! Every field maps 1:1 onto the configuration surface named by the
//! engine's external interfaces: broker/store connection strings, the
//! stream names, the consumer group, batch/timeout/TTL/retry knobs.

use std::time::Duration;

/// Typed process configuration. Constructed once via [`Config::from_env`]
/// and then treated as read-only for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection URL (broker + dedup store).
    pub redis_url: String,
    /// MongoDB connection URI (document store).
    pub database_uri: String,
    /// MongoDB database name.
    pub db_name: String,

    /// Primary inbox stream name.
    pub inbox_stream: String,
    /// Internal/secondary stream name.
    pub internal_stream: String,
    /// Dead-letter stream name.
    pub dlq_stream: String,

    /// Consumer group name, shared across all processes of this service.
    pub consumer_group: String,

    /// Number of entries requested per read/claim batch.
    pub batch_size: usize,
    /// Blocking timeout for `XREADGROUP`, in milliseconds.
    pub block_timeout_ms: u64,

    /// Dedup marker TTL, in seconds.
    pub dedup_ttl_seconds: u64,
    /// Delivery count at or above which a poison message is quarantined.
    pub max_retries: u64,

    /// Broker socket-connect timeout.
    pub broker_connect_timeout: Duration,
    /// Broker socket-read timeout.
    pub broker_read_timeout: Duration,
    /// Document-store server-selection timeout.
    pub store_selection_timeout: Duration,

    /// Port the health-check HTTP server binds to.
    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_uri: "mongodb://127.0.0.1:27017".to_string(),
            db_name: "eventline".to_string(),
            inbox_stream: "inbox".to_string(),
            internal_stream: "internal".to_string(),
            dlq_stream: "dlq".to_string(),
            consumer_group: "eventline-workers".to_string(),
            batch_size: 100,
            block_timeout_ms: 5_000,
            dedup_ttl_seconds: 86_400,
            max_retries: 3,
            broker_connect_timeout: Duration::from_secs(10),
            broker_read_timeout: Duration::from_secs(30),
            store_selection_timeout: Duration::from_secs(10),
            health_port: 8081,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// documented defaults for anything missing or unparsable. Does not
    /// validate connection strings — malformed URIs surface as the fatal
    /// configuration error class at connect time, not here.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: env_string("EVENTLINE_REDIS_URL", defaults.redis_url),
            database_uri: env_string("EVENTLINE_MONGO_URI", defaults.database_uri),
            db_name: env_string("EVENTLINE_MONGO_DB", defaults.db_name),
            inbox_stream: env_string("EVENTLINE_INBOX_STREAM", defaults.inbox_stream),
            internal_stream: env_string("EVENTLINE_INTERNAL_STREAM", defaults.internal_stream),
            dlq_stream: env_string("EVENTLINE_DLQ_STREAM", defaults.dlq_stream),
            consumer_group: env_string("EVENTLINE_CONSUMER_GROUP", defaults.consumer_group),
            batch_size: env_parsed("EVENTLINE_BATCH_SIZE", defaults.batch_size),
            block_timeout_ms: env_parsed("EVENTLINE_BLOCK_TIMEOUT_MS", defaults.block_timeout_ms),
            dedup_ttl_seconds: env_parsed(
                "EVENTLINE_DEDUP_TTL_SECONDS",
                defaults.dedup_ttl_seconds,
            ),
            max_retries: env_parsed("EVENTLINE_MAX_RETRIES", defaults.max_retries),
            broker_connect_timeout: Duration::from_millis(env_parsed(
                "EVENTLINE_BROKER_CONNECT_TIMEOUT_MS",
                defaults.broker_connect_timeout.as_millis() as u64,
            )),
            broker_read_timeout: Duration::from_millis(env_parsed(
                "EVENTLINE_BROKER_READ_TIMEOUT_MS",
                defaults.broker_read_timeout.as_millis() as u64,
            )),
            store_selection_timeout: defaults.store_selection_timeout,
            health_port: env_parsed("EVENTLINE_HEALTH_PORT", defaults.health_port),
        }
    }

    /// The two streams the supervisor ensures groups on and replays
    /// pending entries from at startup: inbox and internal (not the DLQ,
    /// which is write-only from the engine's perspective).
    pub fn managed_streams(&self) -> [&str; 2] {
        [&self.inbox_stream, &self.internal_stream]
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.batch_size, 100);
        assert_eq!(cfg.managed_streams(), ["inbox", "internal"]);
    }

    #[test]
    fn env_parsed_falls_back_on_missing() {
        std::env::remove_var("EVENTLINE_TEST_MISSING_KEY");
        let value: u64 = env_parsed("EVENTLINE_TEST_MISSING_KEY", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn env_parsed_falls_back_on_unparsable() {
        std::env::set_var("EVENTLINE_TEST_BAD_NUMBER", "not-a-number");
        let value: u64 = env_parsed("EVENTLINE_TEST_BAD_NUMBER", 7);
        assert_eq!(value, 7);
        std::env::remove_var("EVENTLINE_TEST_BAD_NUMBER");
    }
}
