use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

/// Longest gap allowed between two idle sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Settings for one [`RateLimiterRegistry`](crate::RateLimiterRegistry).
///
/// Every value is validated on construction, including when the config is
/// deserialized:
///
/// ```rust
/// # use turnstile_limit::LimiterConfig;
/// let config: LimiterConfig =
///     serde_json::from_str(r#"{ "rate": 0.5, "burst": 2, "idle_ttl_secs": 600 }"#).unwrap();
/// assert_eq!(config.burst(), 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawLimiterConfig")]
pub struct LimiterConfig {
    rate: f64,
    burst: u32,
    idle_ttl: Duration,
}

#[derive(Deserialize)]
struct RawLimiterConfig {
    rate: f64,
    burst: u32,
    idle_ttl_secs: u64,
}

impl TryFrom<RawLimiterConfig> for LimiterConfig {
    type Error = ConfigError;

    fn try_from(raw: RawLimiterConfig) -> Result<Self, Self::Error> {
        LimiterConfig::new(raw.rate, raw.burst, Duration::from_secs(raw.idle_ttl_secs))
    }
}

impl LimiterConfig {
    /// Creates a validated config.
    ///
    /// # Arguments
    ///
    /// * `rate` - Tokens added per second (steady-state request rate).
    /// * `burst` - Bucket capacity (largest immediate burst).
    /// * `idle_ttl` - How long a key may stay untouched before its bucket is evicted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `rate` is not a positive finite number,
    /// `burst` is zero or `idle_ttl` is zero.
    pub fn new(rate: f64, burst: u32, idle_ttl: Duration) -> Result<Self, ConfigError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConfigError::Rate(rate));
        }
        if burst == 0 {
            return Err(ConfigError::Burst);
        }
        if idle_ttl.is_zero() {
            return Err(ConfigError::IdleTtl(idle_ttl));
        }
        Ok(Self {
            rate,
            burst,
            idle_ttl,
        })
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Interval between idle sweeps: half the idle TTL, but never longer
    /// than a minute.
    pub fn sweep_interval(&self) -> Duration {
        let half = self.idle_ttl / 2;
        if half.is_zero() {
            self.idle_ttl.min(MAX_SWEEP_INTERVAL)
        } else {
            half.min(MAX_SWEEP_INTERVAL)
        }
    }
}
