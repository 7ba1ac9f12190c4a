//! mdquote-core: batch correlation for synchronous quotes over an async feed.
//!
//! # Overview
//!
//! A caller asks for N items at once; the feed answers each item separately,
//! out of order, on its own task. The core crate defines:
//!
//! - [`BatchCorrelator`]: per-batch completion barrier with a timed wait
//! - [`PendingEntry`] / [`ItemState`]: per-item result slots
//! - [`DeliveryEvent`] / [`BatchRegistry`]: routing of async answers by token
//! - [`MarketDataSession`]: the trait every feed adapter implements
//! - [`QuoteService`]: the blocking request/response facade

pub mod batch;
pub mod entry;
pub mod error;
pub mod event;
pub mod registry;
pub mod service;
pub mod session;

pub use batch::{BatchCorrelator, BatchPhase};
pub use entry::{EntryStatus, ItemState, Outcome, Payload, PendingEntry};
pub use error::{CorrelatorError, QuoteError, SessionError};
pub use event::{CorrelationToken, DeliveryEvent};
pub use registry::{BatchRegistry, DispatchOutcome};
pub use service::{BatchReport, ItemRecord, QuoteService};
pub use session::{HealthStatus, MarketDataSession};
