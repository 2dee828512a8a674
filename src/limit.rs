//! Limit descriptors and identity dimensions.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Identity dimension a limit is allocated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitPer {
    /// The limit applies to all IP addresses and all auth tokens combined.
    Total,
    /// The limit applies per IP address.
    IpAddress,
    /// The limit applies per auth token.
    AuthToken,
}

impl LimitPer {
    /// All dimensions, in decision order.
    pub(crate) const ALL: [LimitPer; 3] =
        [LimitPer::Total, LimitPer::IpAddress, LimitPer::AuthToken];

    /// The dimension's tag as it appears in lookup keys and policy headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitPer::Total => "total",
            LimitPer::IpAddress => "ip-address",
            LimitPer::AuthToken => "auth-token",
        }
    }
}

impl fmt::Display for LimitPer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitPer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "total" => Ok(LimitPer::Total),
            "ip-address" => Ok(LimitPer::IpAddress),
            "auth-token" => Ok(LimitPer::AuthToken),
            other => Err(Error::InvalidLimitPer(other.to_string())),
        }
    }
}

/// A limit that caps requests at `max_requests` per `period`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limited {
    /// The resource being governed.
    pub resource: String,
    /// The action being governed.
    pub action: String,
    /// The identity dimension the limit is allocated against.
    pub per: LimitPer,
    /// Maximum number of requests allowed within one period.
    pub max_requests: u64,
    /// Length of the fixed window.
    pub period: Duration,
}

/// A limit that places no cap on requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlimited {
    /// The resource being governed.
    pub resource: String,
    /// The action being governed.
    pub action: String,
    /// The identity dimension the limit is allocated against.
    pub per: LimitPer,
}

/// Defines the number of requests that can be made to perform an action
/// against a resource in a time period, allocated per IP address, auth
/// token, or in total.
///
/// A limit is either [`Limited`] with a max request count and period, or
/// [`Unlimited`]; carrying counts and the unlimited tag at the same time is
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Limit {
    /// A capped limit.
    Limited(Limited),
    /// An uncapped limit.
    Unlimited(Unlimited),
}

impl Limit {
    /// Create a capped limit.
    pub fn limited(
        resource: impl Into<String>,
        action: impl Into<String>,
        per: LimitPer,
        max_requests: u64,
        period: Duration,
    ) -> Self {
        Limit::Limited(Limited {
            resource: resource.into(),
            action: action.into(),
            per,
            max_requests,
            period,
        })
    }

    /// Create an uncapped limit.
    pub fn unlimited(
        resource: impl Into<String>,
        action: impl Into<String>,
        per: LimitPer,
    ) -> Self {
        Limit::Unlimited(Unlimited {
            resource: resource.into(),
            action: action.into(),
            per,
        })
    }

    /// The resource this limit governs.
    pub fn resource(&self) -> &str {
        match self {
            Limit::Limited(l) => &l.resource,
            Limit::Unlimited(l) => &l.resource,
        }
    }

    /// The action this limit governs.
    pub fn action(&self) -> &str {
        match self {
            Limit::Limited(l) => &l.action,
            Limit::Unlimited(l) => &l.action,
        }
    }

    /// The identity dimension this limit is allocated against.
    pub fn per(&self) -> LimitPer {
        match self {
            Limit::Limited(l) => l.per,
            Limit::Unlimited(l) => l.per,
        }
    }

    /// Whether this limit places no cap on requests.
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Limit::Unlimited(_))
    }

    /// Check that the limit is well-formed. A [`Limited`] must have a
    /// non-zero max request count and a non-zero period.
    pub fn validate(&self) -> Result<()> {
        if let Limit::Limited(l) = self {
            if l.max_requests == 0 {
                return Err(Error::InvalidLimit(
                    "max requests must be greater than zero".to_string(),
                ));
            }
            if l.period.is_zero() {
                return Err(Error::InvalidLimit(
                    "period must be greater than zero".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_per_strings_round_trip() {
        for per in LimitPer::ALL {
            assert_eq!(per.as_str().parse::<LimitPer>().unwrap(), per);
        }
    }

    #[test]
    fn limit_per_rejects_unknown_tag() {
        let err = "invalid".parse::<LimitPer>().unwrap_err();
        assert!(matches!(err, Error::InvalidLimitPer(s) if s == "invalid"));
    }

    #[test]
    fn validate_limited() {
        let cases = [
            ("valid", 10, Duration::from_secs(60), true),
            ("zero_max_requests", 0, Duration::from_secs(60), false),
            ("zero_period", 10, Duration::ZERO, false),
        ];

        for (name, max_requests, period, want_ok) in cases {
            let limit = Limit::limited("resource", "action", LimitPer::Total, max_requests, period);
            assert_eq!(limit.validate().is_ok(), want_ok, "{name}");
        }
    }

    #[test]
    fn validate_unlimited() {
        for per in LimitPer::ALL {
            let limit = Limit::unlimited("resource", "action", per);
            assert!(limit.validate().is_ok());
            assert!(limit.is_unlimited());
        }
    }

    #[test]
    fn shared_accessors() {
        let limit = Limit::limited(
            "resource",
            "action",
            LimitPer::AuthToken,
            10,
            Duration::from_secs(60),
        );
        assert_eq!(limit.resource(), "resource");
        assert_eq!(limit.action(), "action");
        assert_eq!(limit.per(), LimitPer::AuthToken);
        assert!(!limit.is_unlimited());
    }
}
