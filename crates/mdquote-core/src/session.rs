//! The `MarketDataSession` trait: the seam between the correlator and a feed.

use async_trait::async_trait;

use crate::error::SessionError;
use crate::event::CorrelationToken;

/// Session health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Logged in and accepting requests.
    Healthy,
    /// Connected but the login has not been accepted yet.
    Degraded,
    /// Disconnected or refused.
    Unhealthy,
    /// Not checked yet.
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A connection to an asynchronous market-data feed.
///
/// `subscribe` is fire-and-forget: it queues one batch request and returns.
/// Every answer comes back later, on the adapter's own task, as a
/// [`DeliveryEvent`](crate::event::DeliveryEvent) handed to the
/// [`BatchRegistry`](crate::registry::BatchRegistry) the adapter was built
/// with, exactly one event per requested key.
#[async_trait]
pub trait MarketDataSession: Send + Sync + 'static {
    /// Queue a request for `keys`, tagged with `token`.
    fn subscribe(&self, keys: &[String], token: CorrelationToken) -> Result<(), SessionError>;

    /// Current health of the underlying connection.
    fn health(&self) -> HealthStatus {
        HealthStatus::Unknown
    }

    /// Give up on whatever is still outstanding for `token`. Called once
    /// the requester stopped waiting without every answer.
    fn release(&self, _token: CorrelationToken) {}

    /// Close the connection and stop background work.
    async fn shutdown(&self);
}
