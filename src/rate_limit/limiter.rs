//! Admission Controller
//!
//! Central entry point for rate limiting. A check runs the four quota
//! gates in a fixed order (session-minute, session-day, global-minute,
//! global-day) and short-circuits on the first denial, so an exhausted
//! session quota never touches the shared store. Checking never spends a
//! token in either scope; consumption is a separate, explicit step the
//! caller performs once after the gated operation succeeds.

use anyhow::Result;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{Config, RateLimitsConfig};

use super::bucket::{Bucket, Granularity};
use super::decision::{Decision, Denial, DenyReason};
use super::global::GlobalStore;
use super::session::SessionStore;

/// Current unix time in seconds.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Admission controller for the gated generation call.
///
/// The quota maxima are re-read from the shared configuration handle on
/// every check cycle and may be updated between requests; shrinking them
/// is safe without a restart because refill clamps to the current
/// ceiling. The kill switch and the data directory are fixed at
/// construction and ignore later updates.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Quota configuration, hot-reloadable between requests
    config: Arc<RwLock<RateLimitsConfig>>,

    /// Per-session buckets
    sessions: SessionStore,

    /// Shared cross-process buckets
    global: GlobalStore,

    /// Kill switch, read once at startup
    enabled: bool,
}

impl RateLimiter {
    /// Build the controller from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails if rate limiting is disabled while the deployment
    /// environment is production.
    pub fn new(config: &Config) -> Result<Self> {
        if !config.rate_limits.enabled && config.is_production() {
            anyhow::bail!("refusing to start with rate limiting disabled in production");
        }
        if !config.rate_limits.enabled {
            warn!("rate limiting is DISABLED; every request will be admitted");
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config.rate_limits.clone())),
            sessions: SessionStore::new(),
            global: GlobalStore::new(&config.rate_limits.data_dir),
            enabled: config.rate_limits.enabled,
        })
    }

    /// Decide whether a request from `session_id` may proceed.
    pub async fn check(&self, session_id: &str) -> Decision {
        self.check_at(session_id, unix_now()).await
    }

    /// Decide at an explicit point in time.
    pub async fn check_at(&self, session_id: &str, now: u64) -> Decision {
        if !self.enabled {
            return Decision::Admit;
        }

        // One consistent snapshot of the limits per check cycle
        let limits = self.config.read().await.clone();

        // Session gates first: an exhausted session quota must not spend
        // a shared-store round-trip.
        for (granularity, max) in [
            (Granularity::Minute, limits.user.per_minute),
            (Granularity::Day, limits.user.per_day),
        ] {
            if let Some(denial) = self.check_session(session_id, granularity, max, now).await {
                debug!(session_id, code = denial.reason.code(), "request denied");
                return Decision::Deny(denial);
            }
        }

        for (granularity, max) in [
            (Granularity::Minute, limits.global.per_minute),
            (Granularity::Day, limits.global.per_day),
        ] {
            if let Some(denial) = self.check_shared(granularity, max, now).await {
                debug!(session_id, code = denial.reason.code(), "request denied");
                return Decision::Deny(denial);
            }
        }

        Decision::Admit
    }

    /// Spend one token from all four buckets.
    ///
    /// Call exactly once per admitted request, after the gated operation
    /// succeeded. A second invocation spends a second token.
    pub async fn consume(&self, session_id: &str) {
        self.consume_at(session_id, unix_now()).await
    }

    /// Spend at an explicit point in time.
    pub async fn consume_at(&self, session_id: &str, now: u64) {
        if !self.enabled {
            return;
        }

        let limits = self.config.read().await.clone();

        for (granularity, max) in [
            (Granularity::Minute, limits.user.per_minute),
            (Granularity::Day, limits.user.per_day),
        ] {
            let mut bucket = self.sessions.load(session_id, granularity, max, now).await;
            bucket.tokens = bucket.tokens.saturating_sub(1);
            self.sessions.save(session_id, granularity, bucket).await;
        }

        self.global
            .consume(Granularity::Minute, limits.global.per_minute, now)
            .await;
        self.global
            .consume(Granularity::Day, limits.global.per_day, now)
            .await;

        debug!(session_id, "tokens consumed");
    }

    /// Refill and test one session bucket. The refreshed bucket is saved
    /// back so refill progress persists even across denied requests.
    async fn check_session(
        &self,
        session_id: &str,
        granularity: Granularity,
        max: u64,
        now: u64,
    ) -> Option<Denial> {
        let bucket = self
            .sessions
            .load(session_id, granularity, max, now)
            .await
            .refill(now, max, granularity.window());
        self.sessions.save(session_id, granularity, bucket).await;

        if bucket.tokens < 1 {
            Some(Denial::new(DenyReason::for_user(granularity), now))
        } else {
            None
        }
    }

    /// Refill and test one shared bucket without spending a token.
    async fn check_shared(&self, granularity: Granularity, max: u64, now: u64) -> Option<Denial> {
        let bucket = self.global.peek(granularity, max, now).await;

        if bucket.tokens < 1 {
            Some(Denial::new(DenyReason::for_global(granularity), now))
        } else {
            None
        }
    }

    /// Current levels of the shared buckets, without spending.
    pub async fn global_status(&self) -> Vec<(Granularity, Bucket)> {
        let limits = self.config.read().await.clone();
        let now = unix_now();

        let mut status = Vec::with_capacity(2);
        for (granularity, max) in [
            (Granularity::Minute, limits.global.per_minute),
            (Granularity::Day, limits.global.per_day),
        ] {
            status.push((granularity, self.global.peek(granularity, max, now).await));
        }
        status
    }

    /// Replace the quota maxima between requests.
    ///
    /// The `enabled` flag and `data_dir` of the new value are ignored;
    /// both are fixed at construction.
    pub async fn update_limits(&self, limits: RateLimitsConfig) {
        let mut current = self.config.write().await;
        *current = limits;
    }

    /// Current quota configuration
    pub async fn limits(&self) -> RateLimitsConfig {
        self.config.read().await.clone()
    }

    /// Session bucket store (for inspection)
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Shared bucket store (for inspection)
    pub fn global(&self) -> &GlobalStore {
        &self.global
    }
}
