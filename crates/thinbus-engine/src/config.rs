use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Default poll period.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(500);
/// Poll period for hosts that need prompt signal delivery.
pub const LOW_LATENCY_POLL_PERIOD: Duration = Duration::from_millis(50);
/// Longest a single tick waits for an inbound frame.
pub const DEFAULT_UNMARSHAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Default router connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
/// Default timeout stamped on outbound method calls.
pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll loop timing.
///
/// `period` trades poll overhead against signal-delivery latency: every tick
/// costs one native unmarshal, and an inbound frame waits up to one period
/// before it is picked up. `unmarshal_timeout` bounds how long a single tick
/// may block inside the native layer; ticks never overlap, so a blocking
/// unmarshal delays the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    #[serde(rename = "period_ms", deserialize_with = "millis")]
    pub period: Duration,
    #[serde(rename = "unmarshal_timeout_ms", deserialize_with = "millis")]
    pub unmarshal_timeout: Duration,
}

impl PollConfig {
    /// Short period for latency-sensitive signal listeners.
    pub fn low_latency() -> Self {
        Self {
            period: LOW_LATENCY_POLL_PERIOD,
            ..Self::default()
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_POLL_PERIOD,
            unmarshal_timeout: DEFAULT_UNMARSHAL_TIMEOUT,
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll: PollConfig,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Duration,
    #[serde(rename = "method_timeout_ms", deserialize_with = "millis")]
    pub method_timeout: Duration,
    /// Start a background poll thread when the bridge connects.
    pub spawn_poller: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            method_timeout: DEFAULT_METHOD_TIMEOUT,
            spawn_poller: true,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
