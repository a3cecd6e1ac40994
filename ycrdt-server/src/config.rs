use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Server-wide tunables, matching the configuration table. Millisecond
/// `serde` helpers are hand-rolled rather than pulled from a `humantime`-style
/// crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Quiescence window before a dirty document is persisted.
    #[serde(with = "millis")]
    pub debounce: Duration,
    /// Hard ceiling on how long a document can stay dirty, regardless of
    /// ongoing activity, before it is force-flushed.
    #[serde(with = "millis")]
    pub max_debounce: Duration,
    /// Awareness entries older than this since their last update are swept.
    #[serde(with = "millis")]
    pub awareness_timeout: Duration,
    /// Upper bound on a single incoming message's payload size.
    pub max_message_bytes: usize,
    /// Interval between keepalive pings; a missed round trip closes the
    /// connection with `GoingAway`.
    #[serde(with = "millis")]
    pub keepalive_interval: Duration,
    /// How long an unauthenticated connection may sit idle before being
    /// closed. Not given an explicit default; resolved as an Open Question.
    #[serde(with = "millis")]
    pub auth_timeout: Duration,
    /// Capacity of each document's broadcast channel and connection queues.
    pub broadcast_capacity: usize,
    /// Bound on a still-unauthenticated connection's pending message queue;
    /// the oldest message is dropped on overflow.
    pub pending_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            debounce: Duration::from_secs(2),
            max_debounce: Duration::from_secs(10),
            awareness_timeout: Duration::from_secs(30),
            max_message_bytes: 10 * 1024 * 1024,
            keepalive_interval: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(10),
            broadcast_capacity: 256,
            pending_queue_capacity: 64,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_configured_table() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.debounce, Duration::from_secs(2));
        assert_eq!(cfg.max_debounce, Duration::from_secs(10));
        assert_eq!(cfg.awareness_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_message_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn roundtrips_through_json() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.debounce, cfg.debounce);
        assert_eq!(back.max_message_bytes, cfg.max_message_bytes);
    }
}
