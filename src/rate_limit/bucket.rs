//! Token Buckets and Lazy Refill
//!
//! This module provides the bucket type shared by the session and global
//! stores, together with the pure refill transform. Refill is computed on
//! demand from elapsed wall-clock time; there are no background timers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Time window a bucket's cap resets over.
///
/// Windows are fixed and not user-configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// Per-minute window (60 seconds)
    Minute,
    /// Per-day window (86400 seconds)
    Day,
}

impl Granularity {
    /// Window length in seconds
    pub fn window(&self) -> u64 {
        match self {
            Granularity::Minute => 60,
            Granularity::Day => 86_400,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Minute => write!(f, "minute"),
            Granularity::Day => write!(f, "day"),
        }
    }
}

/// A token counter plus the timestamp of its last top-up.
///
/// The serialized form (`{"tokens": n, "last_refill": unix_ts}`) is the
/// entire content of a persisted global bucket file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Currently available admissions
    pub tokens: u64,

    /// Unix timestamp of the last refill
    pub last_refill: u64,
}

impl Bucket {
    /// A bucket holding the full configured capacity.
    ///
    /// Used for first-touch initialization of session buckets.
    pub fn full(max: u64, now: u64) -> Self {
        Self {
            tokens: max,
            last_refill: now,
        }
    }

    /// A bucket holding half the configured capacity.
    ///
    /// Substituted when the shared store cannot be read or locked, so the
    /// pipeline keeps admitting under a reduced ceiling instead of failing.
    pub fn conservative(max: u64, now: u64) -> Self {
        Self {
            tokens: max / 2,
            last_refill: now,
        }
    }

    /// Replenish tokens based on elapsed time.
    ///
    /// Pure transform: performs no I/O and never fails. Accrual is integer
    /// (`elapsed * max / window`, floored); fractional remainders are not
    /// carried forward. The result is always clamped to the current `max`,
    /// so a bucket persisted under a higher ceiling can never exceed a
    /// shrunken one.
    pub fn refill(mut self, now: u64, max: u64, window: u64) -> Bucket {
        if now > self.last_refill {
            let elapsed = now - self.last_refill;
            let tokens_to_add = elapsed.saturating_mul(max) / window;

            if tokens_to_add > 0 {
                self.tokens = max.min(self.tokens.saturating_add(tokens_to_add));
                self.last_refill = now;
            }
        }

        // The configured max may have been lowered since this bucket was
        // last saved; never report more than the current ceiling.
        self.tokens = self.tokens.min(max);
        self
    }
}
