//! Metric gauges for quota storage visibility.

/// A gauge the limiter publishes storage metrics to.
///
/// Gauges are called under the quota store's mutex, one `set` per admission
/// or reclamation event, so implementations must be wait-free.
pub trait Gauge: Send + Sync {
    /// Record the gauge's current value.
    fn set(&self, value: f64);
}

/// A gauge that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGauge;

impl Gauge for NoopGauge {
    fn set(&self, _value: f64) {}
}

#[cfg(feature = "prometheus")]
impl Gauge for prometheus::Gauge {
    fn set(&self, value: f64) {
        prometheus::core::GenericGauge::set(self, value);
    }
}
