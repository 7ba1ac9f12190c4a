//! Registry of in-flight batches, keyed by correlation token.
//!
//! A session adapter holds a clone of the registry and hands every decoded
//! event to [`BatchRegistry::dispatch`]. Events that cannot be placed (stale
//! token, foreign key, duplicate, late) are logged and dropped here so they
//! never reach an unrelated batch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::batch::BatchCorrelator;
use crate::entry::{Outcome, Payload};
use crate::error::CorrelatorError;
use crate::event::{CorrelationToken, DeliveryEvent};

/// What happened to a dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The entry was written; `remaining` keys are still pending.
    Recorded { remaining: usize },
    /// No batch is registered under the event's token.
    UnknownToken,
    /// The batch refused the event.
    Rejected(CorrelatorError),
}

/// Thread-safe map of active batches.
#[derive(Clone, Default)]
pub struct BatchRegistry {
    batches: Arc<Mutex<HashMap<CorrelationToken, Arc<BatchCorrelator>>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a batch; its token is derived from the batch id.
    pub fn register(&self, batch: Arc<BatchCorrelator>) -> CorrelationToken {
        let token = CorrelationToken(batch.id());
        self.batches.lock().insert(token, batch);
        token
    }

    /// Drop a batch once its requester has been released.
    pub fn remove(&self, token: CorrelationToken) -> Option<Arc<BatchCorrelator>> {
        self.batches.lock().remove(&token)
    }

    pub fn get(&self, token: CorrelationToken) -> Option<Arc<BatchCorrelator>> {
        self.batches.lock().get(&token).cloned()
    }

    /// Number of in-flight batches.
    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply one delivery event to the batch it belongs to.
    ///
    /// A `Result` whose data state is `Ok` completes the entry; anything
    /// else marks it failed.
    pub fn dispatch(&self, event: DeliveryEvent) -> DispatchOutcome {
        let token = event.token();
        // Release the registry lock before touching the batch.
        let Some(batch) = self.get(token) else {
            tracing::debug!(
                %token,
                key = event.key(),
                state = %event.state(),
                "event for unknown batch dropped"
            );
            return DispatchOutcome::UnknownToken;
        };

        let (key, state, outcome, payload) = match event {
            DeliveryEvent::Result { key, state, payload, .. } => {
                let outcome = if state.is_ok() { Outcome::Completed } else { Outcome::Failed };
                (key, state, outcome, payload)
            }
            DeliveryEvent::StatusOnly { key, state, .. } => {
                (key, state, Outcome::Failed, Payload::new())
            }
        };

        match batch.complete(&key, outcome, state.to_string(), payload) {
            Ok(remaining) => DispatchOutcome::Recorded { remaining },
            Err(e) => {
                match &e {
                    CorrelatorError::BatchClosed { .. } => {
                        tracing::debug!(%token, key = %key, "late event after timeout dropped");
                    }
                    _ => tracing::warn!(%token, key = %key, error = %e, "event dropped"),
                }
                DispatchOutcome::Rejected(e)
            }
        }
    }
}

impl std::fmt::Debug for BatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRegistry").field("len", &self.len()).finish()
    }
}
