//! Request admission facade.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::LimiterConfig;
use crate::error::{Error, Result};
use crate::key::join;
use crate::limit::{Limit, LimitPer, Limited};
use crate::policy::LimitPolicy;
use crate::quota::Quota;
use crate::store::ExpirableStore;

/// The outcome of an admission check.
#[derive(Debug, Clone)]
pub enum Decision {
    /// The request may proceed. `quota` reports the most constrained
    /// dimension after consumption; it is `None` when every dimension of
    /// the policy is unlimited.
    Allowed {
        /// The quota with the smallest remaining count, if any.
        quota: Option<Arc<Quota>>,
    },
    /// The request exhausted the reported dimension's quota.
    Denied {
        /// The exhausted quota.
        quota: Arc<Quota>,
    },
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// The quota reported for the decision, if any.
    pub fn quota(&self) -> Option<&Arc<Quota>> {
        match self {
            Decision::Allowed { quota } => quota.as_ref(),
            Decision::Denied { quota } => Some(quota),
        }
    }
}

/// Interface shared by [`Limiter`] and [`NopLimiter`] so callers can disable
/// rate limiting without changing their plumbing.
pub trait RequestLimiter: Send + Sync {
    /// Check if a request for the given resource and action should be
    /// allowed.
    fn allow(&self, resource: &str, action: &str, ip: &str, auth_token: &str)
        -> Result<Decision>;

    /// Set the rate limit policy HTTP header for the provided resource and
    /// action.
    fn set_policy_header(
        &self,
        resource: &str,
        action: &str,
        headers: &mut HeaderMap,
    ) -> Result<()>;

    /// Set the quota usage HTTP header for a reported quota.
    fn set_usage_header(&self, quota: Option<&Quota>, headers: &mut HeaderMap);

    /// Stop the limiter.
    fn shutdown(&self);
}

/// Determines whether a request for a given resource and action should be
/// allowed, enforcing one limit per identity dimension.
///
/// A limiter is built from a flat list of limits, grouped into one policy
/// per (resource, action) pair; every policy must cover all three
/// dimensions. `max_size` bounds the number of quotas held in memory at any
/// one time: once reached, requests that would admit a new quota are refused
/// with [`Error::LimiterFull`] until expired quotas are reclaimed, while
/// requests matching stored quotas proceed as normal.
///
/// Construction spawns the store's background reclaimer and must happen
/// within a Tokio runtime.
pub struct Limiter {
    policies: RwLock<HashMap<String, LimitPolicy>>,
    policy_header: HeaderName,
    usage_header: HeaderName,
    store: ExpirableStore,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter").finish_non_exhaustive()
    }
}

impl Limiter {
    /// Create a limiter with default configuration.
    pub fn new(limits: Vec<Limit>, max_size: usize) -> Result<Self> {
        Self::with_config(limits, max_size, LimiterConfig::default())
    }

    /// Create a limiter with the provided configuration.
    pub fn with_config(
        limits: Vec<Limit>,
        max_size: usize,
        config: LimiterConfig,
    ) -> Result<Self> {
        if limits.is_empty() {
            return Err(Error::EmptyLimits);
        }

        let mut policies: HashMap<String, LimitPolicy> = HashMap::new();
        let mut max_entry_ttl = Duration::ZERO;
        let mut all_unlimited = true;

        for limit in limits {
            limit.validate()?;

            if let Limit::Limited(l) = &limit {
                all_unlimited = false;
                if l.period > max_entry_ttl {
                    max_entry_ttl = l.period;
                }
            }

            let policy_key = join(&[limit.resource(), limit.action()]);
            let policy = policies
                .entry(policy_key)
                .or_insert_with(|| LimitPolicy::new(limit.resource(), limit.action()));
            policy.add(limit)?;
        }

        for policy in policies.values() {
            policy.validate()?;
        }
        if all_unlimited {
            return Err(Error::AllUnlimited);
        }

        let policy_header = HeaderName::from_bytes(config.policy_header.as_bytes())
            .map_err(|e| Error::InvalidParameter(format!("policy header: {e}")))?;
        let usage_header = HeaderName::from_bytes(config.usage_header.as_bytes())
            .map_err(|e| Error::InvalidParameter(format!("usage header: {e}")))?;

        let store = ExpirableStore::new(max_size, max_entry_ttl, &config)?;
        debug!(
            policies = policies.len(),
            max_size, "rate limiter ready"
        );

        Ok(Self {
            policies: RwLock::new(policies),
            policy_header,
            usage_header,
            store,
        })
    }

    /// Check if a request for the given resource and action should be
    /// allowed.
    ///
    /// A request is refused with an error when no policy matches the
    /// resource and action, when a new quota cannot be stored
    /// ([`Error::LimiterFull`], carrying an estimate of when space frees
    /// up), or after shutdown. A request is denied without error when any
    /// dimension's quota is exhausted; the exhausted quota is reported and
    /// nothing is consumed. Otherwise one request is consumed from each
    /// limited dimension and the quota with the smallest remaining count is
    /// reported.
    pub fn allow(
        &self,
        resource: &str,
        action: &str,
        ip: &str,
        auth_token: &str,
    ) -> Result<Decision> {
        let policy_key = join(&[resource, action]);

        // Snapshot the limited dimensions so the policy lock is not held
        // across store calls.
        let dimensions: Vec<(LimitPer, Limited)> = {
            let policies = self.policies.read();
            let policy = policies
                .get(&policy_key)
                .ok_or(Error::LimitPolicyNotFound)?;

            let mut dimensions = Vec::with_capacity(LimitPer::ALL.len());
            for per in LimitPer::ALL {
                if let Limit::Limited(l) = policy.limit(per)? {
                    dimensions.push((per, l.clone()));
                }
            }
            dimensions
        };

        if dimensions.is_empty() {
            return Ok(Decision::Allowed { quota: None });
        }

        let mut quotas = Vec::with_capacity(dimensions.len());
        for (per, limit) in &dimensions {
            let id = match per {
                LimitPer::Total => LimitPer::Total.as_str(),
                LimitPer::IpAddress => ip,
                LimitPer::AuthToken => auth_token,
            };

            let quota = self.store.fetch(id, limit)?;
            if quota.remaining() == 0 {
                debug!(resource, action, per = %per, "quota exhausted");
                return Ok(Decision::Denied { quota });
            }
            quotas.push(quota);
        }

        let mut reported: Option<Arc<Quota>> = None;
        for quota in quotas {
            quota.consume();
            let replace = match &reported {
                Some(current) => quota.remaining() < current.remaining(),
                None => true,
            };
            if replace {
                reported = Some(quota);
            }
        }

        Ok(Decision::Allowed { quota: reported })
    }

    /// Set the rate limit policy HTTP header for the provided resource and
    /// action. Nothing is written when every dimension of the policy is
    /// unlimited.
    pub fn set_policy_header(
        &self,
        resource: &str,
        action: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        let policy_key = join(&[resource, action]);
        let policies = self.policies.read();
        let policy = policies
            .get(&policy_key)
            .ok_or(Error::LimitPolicyNotFound)?;

        let value = policy.header_value();
        if value.is_empty() {
            return Ok(());
        }

        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidParameter(format!("policy header value: {e}")))?;
        headers.insert(self.policy_header.clone(), value);
        Ok(())
    }

    /// Set the quota usage HTTP header for a reported quota. A decision
    /// that reported no quota writes nothing.
    pub fn set_usage_header(&self, quota: Option<&Quota>, headers: &mut HeaderMap) {
        let Some(quota) = quota else {
            return;
        };

        let value = format!(
            "limit={}, remaining={}, reset={}",
            quota.max_requests(),
            quota.remaining(),
            quota.resets_in().as_secs()
        );
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(self.usage_header.clone(), value);
        }
    }

    /// Stop the limiter. Any future call to [`Limiter::allow`] results in
    /// [`Error::Stopped`]. In-flight policy reads complete first.
    pub fn shutdown(&self) {
        let _policies = self.policies.write();
        self.store.shutdown();
    }
}

impl RequestLimiter for Limiter {
    fn allow(
        &self,
        resource: &str,
        action: &str,
        ip: &str,
        auth_token: &str,
    ) -> Result<Decision> {
        Limiter::allow(self, resource, action, ip, auth_token)
    }

    fn set_policy_header(
        &self,
        resource: &str,
        action: &str,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        Limiter::set_policy_header(self, resource, action, headers)
    }

    fn set_usage_header(&self, quota: Option<&Quota>, headers: &mut HeaderMap) {
        Limiter::set_usage_header(self, quota, headers)
    }

    fn shutdown(&self) {
        Limiter::shutdown(self)
    }
}

/// A limiter that allows every request, reports no quotas, and writes no
/// headers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLimiter;

impl RequestLimiter for NopLimiter {
    fn allow(
        &self,
        _resource: &str,
        _action: &str,
        _ip: &str,
        _auth_token: &str,
    ) -> Result<Decision> {
        Ok(Decision::Allowed { quota: None })
    }

    fn set_policy_header(
        &self,
        _resource: &str,
        _action: &str,
        _headers: &mut HeaderMap,
    ) -> Result<()> {
        Ok(())
    }

    fn set_usage_header(&self, _quota: Option<&Quota>, _headers: &mut HeaderMap) {}

    fn shutdown(&self) {}
}
