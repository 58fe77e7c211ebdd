//! Rate Limiting and Admission Control Module
//!
//! This module gates access to the expensive downstream scene generation
//! call. It enforces two independent quota scopes, per-session and
//! deployment-wide, each over two windows (per-minute, per-day), using
//! token buckets with lazy, time-based refill.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Rate Limiter                          │
//! │        check(): user-min → user-day → glob-min → glob-day   │
//! │        consume(): spend one token from all four buckets     │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  ┌────────────────────────┐  │  ┌────────────────────────┐  │
//! │  │   Session Store        │  │  │   Global Store         │  │
//! │  │   (in-memory, per      │  │  │   (JSON files under an │  │
//! │  │   client session)      │  │  │   advisory file lock)  │  │
//! │  └────────────────────────┘  │  └────────────────────────┘  │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! Checking never spends a token; consumption happens once, explicitly,
//! after the gated call succeeds, so a request that is admitted but then
//! fails downstream does not spend quota. All storage anomalies in the
//! shared store degrade to a conservative half-capacity default instead
//! of failing the request pipeline.

pub mod bucket;
pub mod decision;
pub mod global;
pub mod limiter;
pub mod session;

pub use bucket::{Bucket, Granularity};
pub use decision::{Decision, Denial, DenyReason, RateLimitErrorBody};
pub use global::GlobalStore;
pub use limiter::RateLimiter;
pub use session::SessionStore;
