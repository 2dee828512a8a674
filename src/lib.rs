//! In-process, multi-dimensional request rate limiting.
//!
//! This crate decides, per request, whether an action against a resource
//! should be allowed, enforcing fixed-window quotas along three identity
//! dimensions at once: the aggregate total, the caller's IP address, and the
//! caller's auth token. Quotas live in a fixed-capacity expirable store that
//! reclaims whole buckets of expired entries in the background, so memory
//! stays bounded under churn.
//!
//! # Quick start
//!
//! ```
//! use std::time::Duration;
//! use ratelimit::{Decision, Limit, LimitPer, Limiter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ratelimit::Error> {
//! let limits = vec![
//!     Limit::limited("target", "list", LimitPer::Total, 500, Duration::from_secs(60)),
//!     Limit::limited("target", "list", LimitPer::IpAddress, 100, Duration::from_secs(60)),
//!     Limit::limited("target", "list", LimitPer::AuthToken, 50, Duration::from_secs(60)),
//! ];
//! let limiter = Limiter::new(limits, 16_384)?;
//!
//! match limiter.allow("target", "list", "198.51.100.7", "token")? {
//!     Decision::Allowed { .. } => { /* serve the request */ }
//!     Decision::Denied { .. } => { /* respond 429 */ }
//! }
//! # limiter.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! Every policy must carry one limit per dimension; dimensions that should
//! not be constrained use [`Limit::unlimited`]. The limiter spawns a
//! background reclaimer task, so it must be constructed within a Tokio
//! runtime; the decision path itself is synchronous.

pub mod config;
pub mod error;
pub mod limit;
pub mod limiter;
pub mod metrics;
pub mod quota;

mod key;
mod policy;
mod store;

pub use config::{
    LimiterConfig, LimitSpec, LimitsFile, TimeUnit, DEFAULT_NUMBER_BUCKETS,
    DEFAULT_POLICY_HEADER, DEFAULT_USAGE_HEADER,
};
pub use error::{Error, Result};
pub use limit::{Limit, LimitPer, Limited, Unlimited};
pub use limiter::{Decision, Limiter, NopLimiter, RequestLimiter};
pub use quota::Quota;
