//! Long-window usage caps counted in a [`SharedStore`].
//!
//! A quota counter is a plain integer key. The increment that creates it
//! (the one that returns 1) also sets its expiry to the rule's window, and no
//! later increment touches the expiry again. That makes every window a fixed
//! window: it starts with the first request and ends `window` later no
//! matter how much traffic follows. Two instances racing on the very first
//! increment are separated by the store: exactly one of them sees 1.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use turnstile_limit::ConfigError;

use crate::context::KeyFn;
use crate::store::SharedStore;
use crate::store::StoreError;
use crate::store::bounded;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// What a quota does when its store cannot be reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutagePolicy {
    /// Let the request through unmetered. Quota becomes a soft cap during outages.
    #[default]
    FailOpen,
    /// Refuse the request. Quota stays a hard cap, at the cost of availability.
    FailClosed,
}

/// A usage cap: at most `limit` requests per key in each `window`.
#[derive(Clone)]
pub struct QuotaRule {
    limit: u64,
    window: Duration,
    key_fn: KeyFn,
    outage: OutagePolicy,
}

impl fmt::Debug for QuotaRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaRule")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("outage", &self.outage)
            .finish_non_exhaustive()
    }
}

impl QuotaRule {
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `limit` or `window` is zero.
    pub fn new(limit: u64, window: Duration, key_fn: KeyFn) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::QuotaLimit);
        }
        if window.is_zero() {
            return Err(ConfigError::QuotaWindow(window));
        }
        Ok(Self {
            limit,
            window,
            key_fn,
            outage: OutagePolicy::default(),
        })
    }

    pub fn with_outage_policy(mut self, outage: OutagePolicy) -> Self {
        self.outage = outage;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn key_fn(&self) -> &KeyFn {
        &self.key_fn
    }

    pub fn outage_policy(&self) -> OutagePolicy {
        self.outage
    }
}

/// Counter state after a charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used: u64,
    pub limit: u64,
}

impl QuotaUsage {
    /// Value of the `X-Quota-Used` header, `used/limit`.
    pub fn header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("{}/{}", self.used, self.limit))
            .unwrap_or_else(|_| HeaderValue::from_static("0/0"))
    }
}

/// Outcome of [`QuotaAccountant::charge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed(QuotaUsage),
    Denied(QuotaUsage),
    /// The store failed and the rule fails open.
    Unmetered,
    /// The store failed and the rule fails closed.
    Unverified,
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_) | Self::Unmetered)
    }
}

#[derive(Clone, Debug)]
struct QuotaMetrics {
    denied: Counter<u64>,
    unmetered: Counter<u64>,
}

/// Charges requests against quota counters kept in a shared store.
///
/// Holds no counters itself, so any number of server instances can charge
/// the same keys concurrently.
#[derive(Clone)]
pub struct QuotaAccountant {
    store: Arc<dyn SharedStore>,
    timeout: Duration,
    instruments: QuotaMetrics,
}

impl fmt::Debug for QuotaAccountant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaAccountant")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl QuotaAccountant {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        let meter = global::meter("turnstile");
        let instruments = QuotaMetrics {
            denied: meter.u64_counter("turnstile.quota.denied").build(),
            unmetered: meter.u64_counter("turnstile.quota.unmetered").build(),
        };
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
            instruments,
        }
    }

    /// Time budget for each store operation. A charge that exceeds it is
    /// treated as a store outage.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Counts one request against `key` under `rule`.
    pub async fn charge(&self, key: &str, rule: &QuotaRule) -> QuotaDecision {
        match self.try_charge(key, rule).await {
            Ok(usage) if usage.used > usage.limit => {
                tracing::warn!(key, used = usage.used, limit = usage.limit, "quota exceeded");
                self.instruments
                    .denied
                    .add(1, &[KeyValue::new("reason", "exceeded")]);
                QuotaDecision::Denied(usage)
            }
            Ok(usage) => QuotaDecision::Allowed(usage),
            Err(error) => match rule.outage {
                OutagePolicy::FailOpen => {
                    tracing::warn!(key, %error, "quota store unavailable; letting request through");
                    self.instruments.unmetered.add(1, &[]);
                    QuotaDecision::Unmetered
                }
                OutagePolicy::FailClosed => {
                    tracing::warn!(key, %error, "quota store unavailable; refusing request");
                    self.instruments
                        .denied
                        .add(1, &[KeyValue::new("reason", "unverified")]);
                    QuotaDecision::Unverified
                }
            },
        }
    }

    async fn try_charge(&self, key: &str, rule: &QuotaRule) -> Result<QuotaUsage, StoreError> {
        let count = bounded(self.timeout, self.store.incr(key)).await?;
        if count == 1 {
            // Only the request that opened the window may set its end.
            match bounded(self.timeout, self.store.expire(key, rule.window)).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(key, "quota counter vanished before its window was set"),
                Err(error) => {
                    tracing::warn!(key, %error, "could not set quota window; dropping counter");
                    self.discard_unbounded(key).await;
                }
            }
        }
        Ok(QuotaUsage {
            used: u64::try_from(count).unwrap_or(0),
            limit: rule.limit,
        })
    }

    // A counter without an expiry would deny its key forever once past the
    // limit. Removing it lets the next charge open a fresh window.
    async fn discard_unbounded(&self, key: &str) {
        if let Err(error) = bounded(self.timeout, self.store.del(key)).await {
            tracing::warn!(key, %error, "could not drop quota counter without a window");
        }
    }
}
