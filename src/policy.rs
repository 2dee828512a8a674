//! Per-(resource, action) limit policies.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::limit::{Limit, LimitPer};

/// A collection of limits for the same resource and action, one per identity
/// dimension.
///
/// The policy's HTTP header rendering follows the IETF rate limit headers
/// draft:
/// <https://datatracker.ietf.org/doc/draft-ietf-httpapi-ratelimit-headers/>
#[derive(Debug, Clone)]
pub(crate) struct LimitPolicy {
    resource: String,
    action: String,
    limits: HashMap<LimitPer, Limit>,
    header: String,
}

impl LimitPolicy {
    pub(crate) fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            limits: HashMap::with_capacity(LimitPer::ALL.len()),
            header: String::new(),
        }
    }

    /// Add a limit to the policy. The limit must validate, match the
    /// policy's resource and action, and cover a dimension the policy does
    /// not already have.
    pub(crate) fn add(&mut self, limit: Limit) -> Result<()> {
        limit.validate()?;

        if limit.resource() != self.resource {
            return Err(Error::InvalidLimit(
                "limit's resource does not match limit policy's".to_string(),
            ));
        }
        if limit.action() != self.action {
            return Err(Error::InvalidLimit(
                "limit's action does not match limit policy's".to_string(),
            ));
        }
        if self.limits.contains_key(&limit.per()) {
            return Err(Error::DuplicateLimit);
        }

        self.limits.insert(limit.per(), limit);
        self.rebuild_header();
        Ok(())
    }

    /// The limit for the given dimension.
    pub(crate) fn limit(&self, per: LimitPer) -> Result<&Limit> {
        self.limits.get(&per).ok_or(Error::LimitNotFound)
    }

    /// Check that the policy names a resource and an action and carries one
    /// limit for every dimension.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.resource.is_empty() {
            return Err(Error::InvalidLimitPolicy("missing resource".to_string()));
        }
        if self.action.is_empty() {
            return Err(Error::InvalidLimitPolicy("missing action".to_string()));
        }
        for per in LimitPer::ALL {
            if !self.limits.contains_key(&per) {
                return Err(Error::InvalidLimitPolicy(format!(
                    "missing limit for {per:?}"
                )));
            }
        }
        Ok(())
    }

    /// The cached policy header value. Empty when every dimension is
    /// unlimited.
    pub(crate) fn header_value(&self) -> &str {
        &self.header
    }

    fn rebuild_header(&mut self) {
        let mut parts = Vec::with_capacity(LimitPer::ALL.len());
        for per in LimitPer::ALL {
            if let Some(Limit::Limited(l)) = self.limits.get(&per) {
                parts.push(format!(
                    "{};w={};comment=\"{}\"",
                    l.max_requests,
                    l.period.as_secs(),
                    l.per
                ));
            }
        }
        self.header = parts.join(", ");
    }
}
