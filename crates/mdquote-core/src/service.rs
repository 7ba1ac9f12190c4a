//! `QuoteService`: synchronous request/response facade over a session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::BatchCorrelator;
use crate::entry::{EntryStatus, ItemState, Payload, PendingEntry};
use crate::error::QuoteError;
use crate::registry::BatchRegistry;
use crate::session::MarketDataSession;

/// One item of a response, as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub key: String,
    pub outcome: EntryStatus,
    /// `dataState|statusCode|statusText|streamState`
    pub status: String,
    pub fields: Payload,
}

impl From<PendingEntry> for ItemRecord {
    fn from(e: PendingEntry) -> Self {
        let status = if e.is_pending() {
            ItemState::no_response().to_string()
        } else {
            e.status_detail
        };
        Self {
            key: e.key,
            outcome: e.status,
            status,
            fields: e.payload,
        }
    }
}

/// Everything known about a batch once its requester was released.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub id: u64,
    /// `true` if every key answered before the deadline.
    pub fulfilled: bool,
    pub latency: Duration,
    pub records: Vec<ItemRecord>,
}

/// Blocks callers until their batch is answered or times out.
pub struct QuoteService {
    session: Arc<dyn MarketDataSession>,
    registry: BatchRegistry,
    default_timeout: Duration,
}

impl QuoteService {
    /// `registry` must be the one `session` dispatches its events to.
    pub fn new(
        session: Arc<dyn MarketDataSession>,
        registry: BatchRegistry,
        default_timeout: Duration,
    ) -> Self {
        Self {
            session,
            registry,
            default_timeout,
        }
    }

    pub fn session(&self) -> &Arc<dyn MarketDataSession> {
        &self.session
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Request `keys` and block until all answered or `timeout` (default if
    /// `None`) elapses. A timeout is not an error: unanswered keys come back
    /// with a "no response" status.
    ///
    /// Blocks the calling thread; async callers should go through
    /// `spawn_blocking`.
    pub fn request<I, K>(&self, keys: I, timeout: Option<Duration>) -> Result<BatchReport, QuoteError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let batch = Arc::new(BatchCorrelator::new(keys, timeout)?);
        let keys = batch.keys();
        // Register before subscribing so no early event is lost.
        let token = self.registry.register(batch.clone());

        batch.mark_started();
        if let Err(e) = self.session.subscribe(&keys, token) {
            self.registry.remove(token);
            return Err(e.into());
        }

        let fulfilled = batch.wait();
        self.registry.remove(token);
        if !fulfilled {
            self.session.release(token);
        }

        let latency = batch.fulfilment_latency().unwrap_or_default();
        let records: Vec<ItemRecord> = batch.snapshot().into_iter().map(ItemRecord::from).collect();
        tracing::info!(
            batch = batch.id(),
            size = records.len(),
            fulfilled,
            timeout_ms = batch.timeout().as_millis() as u64,
            latency_ms = latency.as_millis() as u64,
            "batch released"
        );

        Ok(BatchReport {
            id: batch.id(),
            fulfilled,
            latency,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CorrelatorError, SessionError};
    use crate::event::{CorrelationToken, DeliveryEvent};
    use async_trait::async_trait;

    /// Answers every key except the ones listed in `silent`, on a separate thread.
    struct MockSession {
        registry: BatchRegistry,
        silent: Vec<String>,
        fail: bool,
        released: parking_lot::Mutex<Vec<CorrelationToken>>,
    }

    #[async_trait]
    impl MarketDataSession for MockSession {
        fn subscribe(&self, keys: &[String], token: CorrelationToken) -> Result<(), SessionError> {
            if self.fail {
                return Err(SessionError::NotConnected);
            }
            let registry = self.registry.clone();
            let keys: Vec<String> = keys
                .iter()
                .filter(|k| !self.silent.contains(k))
                .cloned()
                .collect();
            std::thread::spawn(move || {
                for key in keys {
                    let mut payload = Payload::new();
                    payload.insert("DSPLY_NAME".into(), key.clone());
                    registry.dispatch(DeliveryEvent::Result {
                        token,
                        key,
                        state: ItemState::new("Ok", "None", "All is well", "NonStreaming"),
                        payload,
                    });
                }
            });
            Ok(())
        }

        fn release(&self, token: CorrelationToken) {
            self.released.lock().push(token);
        }

        async fn shutdown(&self) {}
    }

    fn service_with_mock(silent: &[&str], fail: bool) -> (QuoteService, Arc<MockSession>) {
        let registry = BatchRegistry::new();
        let session = Arc::new(MockSession {
            registry: registry.clone(),
            silent: silent.iter().map(|s| s.to_string()).collect(),
            fail,
            released: parking_lot::Mutex::new(Vec::new()),
        });
        let svc = QuoteService::new(session.clone(), registry, Duration::from_secs(2));
        (svc, session)
    }

    fn service(silent: &[&str], fail: bool) -> QuoteService {
        service_with_mock(silent, fail).0
    }

    #[test]
    fn full_batch_is_fulfilled() {
        let (svc, mock) = service_with_mock(&[], false);
        let report = svc.request(["IBM.N", "TRI.N"], None).unwrap();
        assert!(report.fulfilled);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].key, "IBM.N");
        assert_eq!(report.records[1].fields["DSPLY_NAME"], "TRI.N");
        assert!(svc.registry().is_empty());
        assert!(mock.released.lock().is_empty());
    }

    #[test]
    fn silent_key_reports_no_response() {
        let (svc, mock) = service_with_mock(&["B"], false);
        let report = svc
            .request(["A", "B"], Some(Duration::from_millis(50)))
            .unwrap();
        assert!(!report.fulfilled);
        assert_eq!(*mock.released.lock(), vec![CorrelationToken(report.id)]);
        assert_eq!(report.records[1].outcome, EntryStatus::Pending);
        assert_eq!(report.records[1].status, ItemState::no_response().to_string());
    }

    #[test]
    fn empty_request_is_invalid() {
        let svc = service(&[], false);
        let err = svc.request(Vec::<String>::new(), None).unwrap_err();
        assert!(matches!(err, QuoteError::Correlator(CorrelatorError::InvalidArgument(_))));
    }

    #[test]
    fn subscribe_failure_unregisters() {
        let svc = service(&[], true);
        let err = svc.request(["A"], None).unwrap_err();
        assert!(matches!(err, QuoteError::Session(SessionError::NotConnected)));
        assert!(svc.registry().is_empty());
    }
}
