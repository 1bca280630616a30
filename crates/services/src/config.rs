use std::env;
use std::time::Duration as StdDuration;

use chrono::Duration;

/// Tunables for the session engine.
///
/// Wall-clock quantities that feed the session model use `chrono::Duration`;
/// timer and scheduling quantities use `std::time::Duration` so they can be
/// handed straight to tokio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Window that coalesces bursts of local writes.
    pub debounce: StdDuration,
    /// Length of the per-section instruction countdown.
    pub instruction_length: Duration,
    /// Period of the liveness tick.
    pub liveness_interval: StdDuration,
    /// Input older than this no longer counts as "user is present".
    pub inactivity_threshold: Duration,
    pub retry_base: StdDuration,
    pub retry_max: StdDuration,
    /// Consecutive local failures before the status reports `local_at_risk`.
    pub local_warn_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: StdDuration::from_millis(800),
            instruction_length: Duration::seconds(60),
            liveness_interval: StdDuration::from_secs(5),
            inactivity_threshold: Duration::seconds(30),
            retry_base: StdDuration::from_secs(1),
            retry_max: StdDuration::from_secs(64),
            local_warn_threshold: 3,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `EXAM_*` environment variables.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparseable setting");
                    None
                }
            }
        };
        let seconds =
            |value: u64| Duration::seconds(i64::from(u32::try_from(value).unwrap_or(u32::MAX)));

        let mut config = Self::default();
        if let Some(ms) = number("EXAM_DEBOUNCE_MS") {
            config.debounce = StdDuration::from_millis(ms);
        }
        if let Some(secs) = number("EXAM_INSTRUCTION_SECS") {
            config.instruction_length = seconds(secs);
        }
        if let Some(secs) = number("EXAM_LIVENESS_SECS").filter(|s| *s > 0) {
            config.liveness_interval = StdDuration::from_secs(secs);
        }
        if let Some(secs) = number("EXAM_INACTIVITY_SECS") {
            config.inactivity_threshold = seconds(secs);
        }
        if let Some(secs) = number("EXAM_SYNC_RETRY_MAX_SECS") {
            config.retry_max = StdDuration::from_secs(secs).max(config.retry_base);
        }
        config
    }
}

/// Endpoint settings for the remote server of record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteSyncConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl RemoteSyncConfig {
    /// Returns `None` (remote sync disabled) when no base URL is set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("EXAM_SYNC_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let token = env::var("EXAM_SYNC_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        Some(Self { base_url, token })
    }
}
