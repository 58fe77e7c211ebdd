//! Admission Decisions
//!
//! Structured results of a rate limit check. Quota exhaustion is an
//! expected, user-facing outcome, never an error of the subsystem itself,
//! so denials carry a stable reason code, a human message that tells the
//! caller whether they personally are limited or the whole system is, and
//! a retry hint suitable for a `Retry-After` header.

use serde::{Deserialize, Serialize};

use super::bucket::Granularity;

/// Seconds a caller should wait before retrying a minute-scoped denial.
const MINUTE_RETRY_HINT_SECS: u64 = 30;

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// This session exhausted its per-minute quota
    UserMinute,
    /// This session exhausted its per-day quota
    UserDay,
    /// The deployment-wide per-minute quota is exhausted
    GlobalMinute,
    /// The deployment-wide per-day quota is exhausted
    GlobalDay,
}

impl DenyReason {
    /// Reason for an exhausted session bucket of the given granularity
    pub fn for_user(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Minute => DenyReason::UserMinute,
            Granularity::Day => DenyReason::UserDay,
        }
    }

    /// Reason for an exhausted shared bucket of the given granularity
    pub fn for_global(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Minute => DenyReason::GlobalMinute,
            Granularity::Day => DenyReason::GlobalDay,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::UserMinute => "user_rate_limit_minute",
            DenyReason::UserDay => "user_rate_limit_day",
            DenyReason::GlobalMinute => "global_rate_limit_minute",
            DenyReason::GlobalDay => "global_rate_limit_day",
        }
    }

    /// Human-readable message.
    ///
    /// User-scope messages ask the caller to slow down; global-scope
    /// messages explain that the system as a whole is busy, since the
    /// corrective action differs.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::UserMinute => {
                "Whoa whoa, slow down there! Please wait a minute before trying again."
            }
            DenyReason::UserDay => {
                "Daily limit reached; we're glad you like it so much! \
                 Please come back tomorrow to make more scenes."
            }
            DenyReason::GlobalMinute => {
                "Our system is really, really busy. Please come back in a few minutes."
            }
            DenyReason::GlobalDay => {
                "Our system has reached its daily limit. Please come back again tomorrow."
            }
        }
    }

    /// Seconds until a retry is worthwhile: a short fixed hint for minute
    /// windows, the time to the next UTC day boundary for day windows.
    pub fn retry_after_secs(&self, now: u64) -> u64 {
        match self {
            DenyReason::UserMinute | DenyReason::GlobalMinute => MINUTE_RETRY_HINT_SECS,
            DenyReason::UserDay | DenyReason::GlobalDay => {
                let day = Granularity::Day.window();
                day - (now % day)
            }
        }
    }
}

/// A denied admission, ready to be mapped to a 429 response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// Why the request was denied
    pub reason: DenyReason,

    /// Retry hint in seconds, computed at denial time
    pub retry_after_secs: u64,
}

impl Denial {
    /// Build a denial with its retry hint computed from `now`.
    pub fn new(reason: DenyReason, now: u64) -> Self {
        Self {
            reason,
            retry_after_secs: reason.retry_after_secs(now),
        }
    }

    /// The human-readable message for this denial.
    pub fn message(&self) -> &'static str {
        self.reason.message()
    }

    /// The JSON body a caller-facing collaborator returns with the 429.
    pub fn to_error_body(&self) -> RateLimitErrorBody {
        RateLimitErrorBody {
            error: true,
            kind: "rate_limit_error".to_string(),
            code: self.reason.code().to_string(),
            message: self.reason.message().to_string(),
        }
    }
}

/// Whether a request may proceed to the gated generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed; the caller must invoke `consume` once after success
    Admit,
    /// Denied with a structured reason
    Deny(Denial),
}

impl Decision {
    /// True when the request may proceed
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Wire shape of a denial response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitErrorBody {
    /// Always true
    pub error: bool,

    /// Always "rate_limit_error"
    #[serde(rename = "type")]
    pub kind: String,

    /// Stable reason code
    pub code: String,

    /// Human-readable message
    pub message: String,
}
