//! Scene Gate Library
//!
//! This library provides the admission control layer for the scene
//! generation service: configuration loading and the two-scope,
//! two-window token bucket rate limiter that gates the expensive
//! generation call.

pub mod config;
pub mod rate_limit;
