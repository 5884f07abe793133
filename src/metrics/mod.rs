use serde::Serialize;
pub mod connection_health_tracker;
#[cfg_attr(feature = "test-helpers", mockall::automock)]
pub trait HealthCheck: Send + Sync {
    fn healthy(&self) -> bool;
}
#[cfg_attr(feature = "test-helpers", mockall::automock)]
pub trait HealthReporting: Send + Sync {
    fn report(&self) -> HealthReport;
}
pub trait HealthCheckReporting: HealthCheck + HealthReporting {}
impl<T: HealthCheck + HealthReporting> HealthCheckReporting for T {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub tracked_broadcasters: usize,
    pub connected_listeners: usize,
    /// Broadcasters whose listener has failed to connect too many times in a row.
    pub unhealthy_listeners: Vec<String>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.unhealthy_listeners.is_empty()
    }
}
