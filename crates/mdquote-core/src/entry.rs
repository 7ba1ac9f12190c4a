//! Per-item result slots.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Decoded field list of one item: field name → display value, in wire order.
pub type Payload = IndexMap<String, String>;

/// Lifecycle of a single [`PendingEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// No event has been delivered for the key yet.
    Pending,
    /// The feed delivered data for the key.
    Completed,
    /// The feed answered with a status only (not found, not entitled, ...).
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal outcome handed to [`BatchCorrelator::complete`](crate::batch::BatchCorrelator::complete).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
}

impl From<Outcome> for EntryStatus {
    fn from(o: Outcome) -> Self {
        match o {
            Outcome::Completed => Self::Completed,
            Outcome::Failed => Self::Failed,
        }
    }
}

/// Stream/data state reported by the feed for one item.
///
/// Rendered as `dataState|statusCode|statusText|streamState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    pub data_state: String,
    pub status_code: String,
    pub status_text: String,
    pub stream_state: String,
}

impl ItemState {
    pub fn new(
        data_state: impl Into<String>,
        status_code: impl Into<String>,
        status_text: impl Into<String>,
        stream_state: impl Into<String>,
    ) -> Self {
        Self {
            data_state: data_state.into(),
            status_code: status_code.into(),
            status_text: status_text.into(),
            stream_state: stream_state.into(),
        }
    }

    /// Marker state for an item that got no event before the deadline.
    pub fn no_response() -> Self {
        Self::new("NoResponse", "Timeout", "No response before batch deadline", "Open")
    }

    /// `true` when the feed marked the item's data as good.
    pub fn is_ok(&self) -> bool {
        self.data_state.eq_ignore_ascii_case("ok")
    }
}

impl std::fmt::Display for ItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.data_state, self.status_code, self.status_text, self.stream_state
        )
    }
}

/// The result slot for one key of a batch.
///
/// Created `Pending`, written exactly once by whichever thread delivers the
/// key's event, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub key: String,
    pub status: EntryStatus,
    pub status_detail: String,
    pub payload: Payload,
}

impl PendingEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: EntryStatus::Pending,
            status_detail: String::new(),
            payload: Payload::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    /// Move the entry to its terminal state. Returns `false` (and leaves the
    /// entry untouched) if it was already resolved.
    pub(crate) fn resolve(&mut self, outcome: Outcome, detail: String, payload: Payload) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = outcome.into();
        self.status_detail = detail;
        self.payload = payload;
        true
    }
}
