//! Delivery events flowing from a session adapter back to the correlators.

use serde::{Deserialize, Serialize};

use crate::entry::{ItemState, Payload};

/// Routes a delivery event back to the batch that asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationToken(pub u64);

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One asynchronous answer for one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Data (refresh) for the item, with its decoded field list.
    Result {
        token: CorrelationToken,
        key: String,
        state: ItemState,
        payload: Payload,
    },
    /// State only, no data (not found, not entitled, stream closed).
    StatusOnly {
        token: CorrelationToken,
        key: String,
        state: ItemState,
    },
}

impl DeliveryEvent {
    pub fn token(&self) -> CorrelationToken {
        match self {
            Self::Result { token, .. } | Self::StatusOnly { token, .. } => *token,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Result { key, .. } | Self::StatusOnly { key, .. } => key,
        }
    }

    pub fn state(&self) -> &ItemState {
        match self {
            Self::Result { state, .. } | Self::StatusOnly { state, .. } => state,
        }
    }
}
