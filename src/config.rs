//! Limiter configuration and declarative limit descriptors.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limit::{Limit, LimitPer};
use crate::metrics::{Gauge, NoopGauge};

/// Default number of expiration buckets in the quota store.
pub const DEFAULT_NUMBER_BUCKETS: usize = 4096;

/// Default HTTP header key for the rate limit policy.
pub const DEFAULT_POLICY_HEADER: &str = "RateLimit-Policy";

/// Default HTTP header key for quota usage.
pub const DEFAULT_USAGE_HEADER: &str = "RateLimit";

/// Runtime knobs for limiter construction. All fields have defaults.
#[derive(Clone)]
pub struct LimiterConfig {
    /// Number of buckets used for expiring quotas. A larger number of
    /// buckets increases the efficiency at which expired quotas are deleted
    /// to free up space, at the cost of marginally more memory and more
    /// frequent wakeups of the delete routine.
    pub number_buckets: usize,

    /// HTTP header key used when setting the policy header.
    pub policy_header: String,

    /// HTTP header key used when setting the usage header.
    pub usage_header: String,

    /// Gauge recording the quota store's capacity, set once at
    /// construction.
    pub capacity_gauge: Arc<dyn Gauge>,

    /// Gauge recording the number of quotas currently stored, set whenever
    /// that number changes.
    pub usage_gauge: Arc<dyn Gauge>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            number_buckets: DEFAULT_NUMBER_BUCKETS,
            policy_header: DEFAULT_POLICY_HEADER.to_string(),
            usage_header: DEFAULT_USAGE_HEADER.to_string(),
            capacity_gauge: Arc::new(NoopGauge),
            usage_gauge: Arc::new(NoopGauge),
        }
    }
}

impl fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterConfig")
            .field("number_buckets", &self.number_buckets)
            .field("policy_header", &self.policy_header)
            .field("usage_header", &self.usage_header)
            .finish()
    }
}

/// Time unit for declarative limit descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// The duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

/// A declarative limit descriptor as it appears in a limits file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSpec {
    /// The resource the limit governs.
    pub resource: String,
    /// The action the limit governs.
    pub action: String,
    /// Identity dimension tag: `total`, `ip-address`, or `auth-token`.
    pub per: String,
    /// Whether the limit places no cap on requests.
    #[serde(default)]
    pub unlimited: bool,
    /// Number of requests allowed per unit of time.
    #[serde(default)]
    pub requests_per_unit: Option<u64>,
    /// The time unit.
    #[serde(default)]
    pub unit: Option<TimeUnit>,
}

impl TryFrom<&LimitSpec> for Limit {
    type Error = Error;

    fn try_from(spec: &LimitSpec) -> Result<Self> {
        let per: LimitPer = spec.per.parse()?;

        if spec.unlimited {
            if spec.requests_per_unit.is_some() || spec.unit.is_some() {
                return Err(Error::InvalidLimit(
                    "an unlimited limit must not carry requests_per_unit or unit".to_string(),
                ));
            }
            return Ok(Limit::unlimited(&spec.resource, &spec.action, per));
        }

        match (spec.requests_per_unit, spec.unit) {
            (Some(requests), Some(unit)) => Ok(Limit::limited(
                &spec.resource,
                &spec.action,
                per,
                requests,
                unit.duration(),
            )),
            _ => Err(Error::InvalidLimit(
                "a limit must carry requests_per_unit and unit unless it is unlimited"
                    .to_string(),
            )),
        }
    }
}

/// A set of limit descriptors, loadable from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsFile {
    /// The declared limits.
    #[serde(default)]
    pub limits: Vec<LimitSpec>,
}

impl LimitsFile {
    /// Load limit descriptors from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse limit descriptors from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("failed to parse limits: {e}")))
    }

    /// Convert the declared descriptors into limits.
    pub fn to_limits(&self) -> Result<Vec<Limit>> {
        self.limits.iter().map(Limit::try_from).collect()
    }
}
