//! Error types for the rate limiter.

use std::time::Duration;

use thiserror::Error;

/// Main error type for limiter operations.
///
/// Every failure the crate can surface is a distinct variant so callers can
/// dispatch on kind with `matches!`. Construction errors are fatal for the
/// limiter instance being built; [`Error::LimiterFull`] and
/// [`Error::Stopped`] are the only errors a healthy limiter returns at
/// request time.
#[derive(Debug, Error)]
pub enum Error {
    /// No limits were provided to the limiter.
    #[error("limits must not be empty")]
    EmptyLimits,

    /// A limit failed validation.
    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    /// A limit's dimension tag is not one of the supported dimensions.
    #[error("invalid limit per: {0}")]
    InvalidLimitPer(String),

    /// A policy is missing a dimension, a resource, or an action.
    #[error("invalid limit policy: {0}")]
    InvalidLimitPolicy(String),

    /// Two limits share the same resource, action, and dimension.
    #[error("duplicate limit")]
    DuplicateLimit,

    /// Every provided limit is unlimited; the quota store would be dead
    /// weight.
    #[error("all limits are unlimited")]
    AllUnlimited,

    /// The quota store size must be greater than zero.
    #[error("invalid max size")]
    InvalidMaxSize,

    /// The number of expiration buckets must be greater than zero.
    #[error("invalid number of buckets")]
    InvalidNumberBuckets,

    /// A parameter failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No policy is registered for the requested resource and action.
    #[error("limit policy not found")]
    LimitPolicyNotFound,

    /// A policy has no limit for the requested dimension.
    #[error("limit not found")]
    LimitNotFound,

    /// The quota store cannot admit any additional quotas. `retry_in` is an
    /// estimate of when space will next be reclaimed.
    #[error("limiter full")]
    LimiterFull {
        /// Soonest time a bucket will roll over and free space.
        retry_in: Duration,
    },

    /// The limiter has been shut down.
    #[error("limiter stopped")]
    Stopped,

    /// A limits file could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while reading a limits file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, Error>;
