//! WebSocket market-data session with auto-reconnect and batch correlation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use mdquote_core::{
    BatchRegistry, CorrelationToken, DeliveryEvent, HealthStatus, MarketDataSession, SessionError,
};

use crate::auth;
use crate::config::{Credentials, WsSessionConfig};
use crate::protocol::{self, Inbound, ItemRequest, LoginRequest, LOGIN_STREAM_ID, SUBPROTOCOL};
use crate::reconnect::ReconnectPolicy;

/// Command sent from callers to the background session task.
enum SessionCommand {
    Subscribe {
        keys: Vec<String>,
        token: CorrelationToken,
    },
    /// Forget the unanswered item streams of a batch that gave up waiting.
    Release { token: CorrelationToken },
    Close,
}

/// Maps item stream ids back to the batch that requested them.
///
/// A batch request with id `n` for `k` names gets its item answers on
/// streams `n+1 ..= n+k`; the next request starts after that range.
#[derive(Debug)]
pub(crate) struct StreamTable {
    next_id: i64,
    streams: HashMap<i64, CorrelationToken>,
}

impl StreamTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: LOGIN_STREAM_ID + 1,
            streams: HashMap::new(),
        }
    }

    /// Reserve ids for a batch of `len` items; returns the request id.
    pub(crate) fn allocate(&mut self, len: usize, token: CorrelationToken) -> i64 {
        let id = self.next_id;
        for offset in 1..=len as i64 {
            self.streams.insert(id + offset, token);
        }
        self.next_id = id + len as i64 + 1;
        id
    }

    /// Resolve (and retire) a non-streaming item stream.
    pub(crate) fn resolve(&mut self, id: i64) -> Option<CorrelationToken> {
        self.streams.remove(&id)
    }

    /// Retire every stream still reserved for `token`; returns how many.
    pub(crate) fn release(&mut self, token: CorrelationToken) -> usize {
        let before = self.streams.len();
        self.streams.retain(|_, t| *t != token);
        before - self.streams.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.len()
    }

    /// Forget every outstanding stream; ids restart after the login stream.
    pub(crate) fn clear(&mut self) {
        self.streams.clear();
        self.next_id = LOGIN_STREAM_ID + 1;
    }
}

/// What a text frame asks the connection loop to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct FrameEffects {
    pub reply_pong: bool,
    pub login: Option<bool>,
}

/// Decode one text frame and dispatch item answers to the registry.
pub(crate) fn handle_frame(
    text: &str,
    streams: &mut StreamTable,
    registry: &BatchRegistry,
) -> FrameEffects {
    let mut effects = FrameEffects::default();
    let messages = match protocol::decode_frame(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "failed to decode frame");
            return effects;
        }
    };

    for msg in messages {
        match protocol::classify(msg) {
            Inbound::Ping => effects.reply_pong = true,
            Inbound::Login { accepted, state } => {
                if !accepted {
                    tracing::warn!(state = %state, "login not accepted");
                }
                effects.login = Some(accepted);
            }
            Inbound::Refresh { id, name, state, payload } => {
                if let Some((token, key)) = route(streams, id, name) {
                    registry.dispatch(DeliveryEvent::Result { token, key, state, payload });
                }
            }
            Inbound::Status { id, name, state } => {
                if let Some((token, key)) = route(streams, id, name) {
                    registry.dispatch(DeliveryEvent::StatusOnly { token, key, state });
                }
            }
            Inbound::Other => {}
        }
    }
    effects
}

fn route(
    streams: &mut StreamTable,
    id: i64,
    name: Option<String>,
) -> Option<(CorrelationToken, String)> {
    // Batch request streams themselves carry no name and are not tracked.
    let name = name?;
    match streams.resolve(id) {
        Some(token) => Some((token, name)),
        None => {
            tracing::debug!(stream = id, item = %name, "answer on untracked stream dropped");
            None
        }
    }
}

/// WebSocket market-data session.
///
/// Maintains a background task that owns the connection, logs in, and
/// re-connects with exponential backoff. Batches in flight when the
/// connection drops are left to time out.
pub struct WsSession {
    endpoint: String,
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    health: watch::Receiver<HealthStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WsSession {
    /// Validate `config` and start the background task. Returns immediately;
    /// use [`wait_ready`](Self::wait_ready) to wait for the login.
    pub fn connect(config: WsSessionConfig, registry: BatchRegistry) -> Result<Self, SessionError> {
        config.validate()?;
        let endpoint = config.endpoint.clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
        let (health_tx, health_rx) = watch::channel(HealthStatus::Unknown);

        let task = tokio::spawn(async move {
            session_task(config, cmd_rx, registry, health_tx).await;
        });

        Ok(Self {
            endpoint,
            cmd_tx,
            health: health_rx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Wait until the login is accepted. Returns `false` on timeout.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.health.clone();
        time::timeout(timeout, async move {
            rx.wait_for(|h| *h == HealthStatus::Healthy).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SessionCommand::Close);
    }
}

#[async_trait]
impl MarketDataSession for WsSession {
    fn subscribe(&self, keys: &[String], token: CorrelationToken) -> Result<(), SessionError> {
        if *self.health.borrow() != HealthStatus::Healthy {
            return Err(SessionError::NotConnected);
        }
        self.cmd_tx
            .send(SessionCommand::Subscribe {
                keys: keys.to_vec(),
                token,
            })
            .map_err(|_| SessionError::Closed)
    }

    fn release(&self, token: CorrelationToken) {
        let _ = self.cmd_tx.send(SessionCommand::Release { token });
    }

    fn health(&self) -> HealthStatus {
        *self.health.borrow()
    }

    async fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Close);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "session task ended abnormally");
            }
        }
        tracing::info!(endpoint = %self.endpoint, "market data session closed");
    }
}

enum ConnectionEnd {
    Closed,
    Dropped,
}

/// Background task that owns the WebSocket connection.
async fn session_task(
    config: WsSessionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    registry: BatchRegistry,
    health: watch::Sender<HealthStatus>,
) {
    let policy = ReconnectPolicy::new(config.reconnect.clone());
    let http = reqwest::Client::builder()
        .timeout(config.auth_timeout)
        .build()
        .unwrap_or_default();
    let mut streams = StreamTable::new();
    let mut failures = 0u32;

    loop {
        tracing::info!(endpoint = %config.endpoint, "connecting market data session");
        let result = run_connection(&config, &http, &mut cmd_rx, &registry, &health, &mut streams).await;

        if *health.borrow() == HealthStatus::Healthy {
            failures = 0;
        }
        health.send_replace(HealthStatus::Unhealthy);
        if streams.len() > 0 {
            tracing::warn!(abandoned = streams.len(), "item streams abandoned by disconnect");
        }
        streams.clear();

        match result {
            Ok(ConnectionEnd::Closed) => return,
            Ok(ConnectionEnd::Dropped) => {}
            Err(e) if !e.is_retryable() => {
                tracing::error!(error = %e, "market data session stopped");
                return;
            }
            Err(e) => tracing::warn!(error = %e, "market data session failed"),
        }

        failures += 1;
        let delay = policy.next_delay(failures);
        tracing::warn!(endpoint = %config.endpoint, "reconnecting in {delay:?}");
        if !backoff(delay, &mut cmd_rx).await {
            return;
        }
    }
}

/// Sleep out the reconnect delay. Returns `false` if the session was closed.
async fn backoff(delay: Duration, cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                None | Some(SessionCommand::Close) => return false,
                Some(SessionCommand::Subscribe { token, .. }) => {
                    tracing::debug!(%token, "batch dropped while disconnected");
                }
                Some(SessionCommand::Release { .. }) => {}
            }
        }
    }
}

async fn run_connection(
    config: &WsSessionConfig,
    http: &reqwest::Client,
    cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
    registry: &BatchRegistry,
    health: &watch::Sender<HealthStatus>,
    streams: &mut StreamTable,
) -> Result<ConnectionEnd, SessionError> {
    let login = match &config.credentials {
        Credentials::User { name } => {
            LoginRequest::user(name, &config.application_id, &config.position)
        }
        Credentials::ClientCredentials { token_url, client_id, client_secret, scope } => {
            let token = auth::fetch_token(http, token_url, client_id, client_secret, scope).await?;
            LoginRequest::token(&token, &config.application_id, &config.position)
        }
    };

    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| SessionError::WebSocket(e.to_string()))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| SessionError::WebSocket(e.to_string()))?;
    let (mut sink, mut stream) = ws_stream.split();
    health.send_replace(HealthStatus::Degraded);
    send_json(&mut sink, &login).await?;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    None | Some(SessionCommand::Close) => {
                        let _ = sink.send(Message::Close(None)).await;
                        return Ok(ConnectionEnd::Closed);
                    }
                    Some(SessionCommand::Subscribe { keys, token }) => {
                        let id = streams.allocate(keys.len(), token);
                        let req = ItemRequest::batch(
                            id,
                            &config.service_name,
                            &keys,
                            config.view_fids.as_deref(),
                        );
                        tracing::debug!(%token, stream = id, items = keys.len(), "batch request sent");
                        send_json(&mut sink, &req).await?;
                    }
                    Some(SessionCommand::Release { token }) => {
                        let released = streams.release(token);
                        if released > 0 {
                            tracing::debug!(%token, streams = released, "unanswered item streams released");
                        }
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    None => return Ok(ConnectionEnd::Dropped),
                    Some(Err(e)) => return Err(SessionError::WebSocket(e.to_string())),
                    Some(Ok(Message::Text(text))) => {
                        let effects = handle_frame(&text, streams, registry);
                        if effects.reply_pong {
                            send_json(&mut sink, &protocol::pong()).await?;
                        }
                        match effects.login {
                            Some(true) => {
                                tracing::info!(endpoint = %config.endpoint, "login accepted");
                                health.send_replace(HealthStatus::Healthy);
                            }
                            Some(false) => {
                                return Err(SessionError::Auth("login refused".into()));
                            }
                            None => {}
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|e| SessionError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) => return Ok(ConnectionEnd::Dropped),
                    _ => {}
                }
            }
        }
    }
}

async fn send_json<S, T>(sink: &mut S, msg: &T) -> Result<(), SessionError>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    T: Serialize,
{
    let text = serde_json::to_string(msg).map_err(|e| SessionError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SessionError::WebSocket(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdquote_core::{BatchCorrelator, EntryStatus};
    use std::sync::Arc;

    fn batch(registry: &BatchRegistry, keys: &[&str]) -> (Arc<BatchCorrelator>, CorrelationToken) {
        let b = Arc::new(BatchCorrelator::new(keys.iter().copied(), Duration::from_secs(1)).unwrap());
        let token = registry.register(b.clone());
        (b, token)
    }

    #[test]
    fn stream_ids_are_reserved_per_batch() {
        let mut table = StreamTable::new();
        let a = table.allocate(3, CorrelationToken(10));
        let b = table.allocate(2, CorrelationToken(11));
        assert_eq!(a, 2);
        assert_eq!(b, 6);
        assert_eq!(table.resolve(4), Some(CorrelationToken(10)));
        assert_eq!(table.resolve(7), Some(CorrelationToken(11)));
        assert_eq!(table.resolve(4), None);
        assert_eq!(table.resolve(6), None);
        table.clear();
        assert_eq!(table.len(), 0);
        assert_eq!(table.allocate(1, CorrelationToken(12)), 2);
    }

    #[test]
    fn release_forgets_only_that_batch() {
        let mut table = StreamTable::new();
        table.allocate(3, CorrelationToken(20));
        let other = table.allocate(2, CorrelationToken(21));
        assert_eq!(table.resolve(3), Some(CorrelationToken(20)));

        assert_eq!(table.release(CorrelationToken(20)), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.release(CorrelationToken(20)), 0);
        assert_eq!(table.resolve(other + 1), Some(CorrelationToken(21)));
    }

    #[test]
    fn frame_routes_items_to_their_batch() {
        let registry = BatchRegistry::new();
        let (first, t1) = batch(&registry, &["IBM.N", "BAD.X"]);
        let (second, t2) = batch(&registry, &["IBM.N"]);
        let mut table = StreamTable::new();
        let id1 = table.allocate(2, t1);
        let id2 = table.allocate(1, t2);

        let frame = format!(
            r#"[{{"ID":{id1},"Type":"Status","State":{{"Stream":"Closed","Data":"Ok","Text":"Processed 2 total streams"}}}},
               {{"ID":{},"Type":"Refresh","Key":{{"Name":"IBM.N"}},"State":{{"Stream":"NonStreaming","Data":"Ok","Text":"All is well"}},"Fields":{{"BID":1.5}}}},
               {{"ID":{},"Type":"Status","Key":{{"Name":"BAD.X"}},"State":{{"Stream":"Closed","Data":"Suspect","Code":"NotFound","Text":"not found"}}}},
               {{"ID":{},"Type":"Refresh","Key":{{"Name":"IBM.N"}},"State":{{"Stream":"NonStreaming","Data":"Ok","Text":"All is well"}},"Fields":{{"BID":1.6}}}}]"#,
            id1 + 1,
            id1 + 2,
            id2 + 1,
        );
        let effects = handle_frame(&frame, &mut table, &registry);
        assert_eq!(effects, FrameEffects::default());

        assert!(first.wait());
        assert!(second.wait());
        let ibm = first.lookup("IBM.N").unwrap();
        assert_eq!(ibm.status, EntryStatus::Completed);
        assert_eq!(ibm.payload["BID"], "1.5");
        assert_eq!(first.lookup("BAD.X").unwrap().status, EntryStatus::Failed);
        assert_eq!(second.lookup("IBM.N").unwrap().payload["BID"], "1.6");
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn ping_and_login_effects() {
        let registry = BatchRegistry::new();
        let mut table = StreamTable::new();
        let frame = r#"[{"Type":"Ping"},{"ID":1,"Type":"Refresh","Domain":"Login","State":{"Stream":"Open","Data":"Ok"}}]"#;
        let effects = handle_frame(frame, &mut table, &registry);
        assert!(effects.reply_pong);
        assert_eq!(effects.login, Some(true));
    }

    #[test]
    fn undecodable_frame_is_ignored() {
        let registry = BatchRegistry::new();
        let mut table = StreamTable::new();
        assert_eq!(handle_frame("{oops", &mut table, &registry), FrameEffects::default());
    }

    #[tokio::test]
    async fn subscribe_before_login_is_rejected() {
        let registry = BatchRegistry::new();
        // Nothing listens here; the task keeps retrying in the background.
        let session = WsSession::connect(
            WsSessionConfig::direct("ws://127.0.0.1:9/WebSocket", "ELEKTRON_DD", "user1"),
            registry,
        )
        .unwrap();
        let err = session.subscribe(&["IBM.N".to_string()], CorrelationToken(1)).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected));
        assert!(!session.wait_ready(Duration::from_millis(50)).await);
        session.shutdown().await;
    }
}
