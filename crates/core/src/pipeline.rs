//! Pipeline trait -- the lifecycle contract the daemon drives.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::EmeraldError;

/// Boxed future used where a dyn-compatible signature is required.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Health of a module or worker.
///
/// Ordering of severity: `Healthy` < `Degraded` < `Unhealthy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Operating, but something needs attention
    Degraded(String),
    /// Not operating
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// Start/stop/health lifecycle implemented by long-running modules.
///
/// ```text
/// Initialized -> start() -> Running -> stop() -> Stopped
/// ```
pub trait Pipeline: Send + Sync {
    /// Spawn background work. Fails with `PipelineError::AlreadyRunning`
    /// when called twice.
    fn start(&mut self) -> impl Future<Output = Result<(), EmeraldError>> + Send;

    /// Signal background work to finish its current cycle and wait for it.
    fn stop(&mut self) -> impl Future<Output = Result<(), EmeraldError>> + Send;

    /// Report current health.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded("slow".to_owned()).is_degraded());
        assert!(HealthStatus::Unhealthy("down".to_owned()).is_unhealthy());
        assert!(!HealthStatus::Healthy.is_unhealthy());
    }

    #[test]
    fn health_status_display() {
        assert_eq!(HealthStatus::Healthy.to_string(), "healthy");
        assert_eq!(
            HealthStatus::Degraded("file missing".to_owned()).to_string(),
            "degraded: file missing"
        );
    }
}
