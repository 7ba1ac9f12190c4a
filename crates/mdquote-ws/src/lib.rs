//! mdquote-ws: WebSocket JSON market-data session.
//!
//! # Features
//! - Login by user name or OAuth2 client-credentials token
//! - Non-streaming batch item requests with optional field views
//! - Stream-id correlation of item answers back to their batch
//! - Ping/pong keep-alive and auto-reconnect (exponential backoff)

pub mod auth;
pub mod client;
pub mod config;
pub mod protocol;
pub mod reconnect;

pub use client::WsSession;
pub use config::{Credentials, WsSessionConfig};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
