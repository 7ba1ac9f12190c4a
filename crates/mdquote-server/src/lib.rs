//! mdquote-server: HTTP quote service over the WebSocket session.
//!
//! Every `GET /quotes/:items` call becomes one batch request; the handler
//! blocks (on the blocking pool) until all items answered or the batch
//! timeout fired, then returns one record per requested item.

pub mod api;
pub mod config;
pub mod error;
pub mod telemetry;

pub use api::{create_router, AppState};
pub use config::{AppConfig, ConfigError, ConnectionMode};
pub use error::ApiError;
pub use telemetry::{init_tracing, LogConfig};
