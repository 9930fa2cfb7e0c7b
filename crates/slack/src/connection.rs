//! Connection lifecycle for the Socket Mode stream.
//!
//! One [`ConnectionManager`] owns at most one live stream. `connect` always
//! validates, tears down whatever was there, re-tests the credentials and
//! only then opens a new stream. There is no automatic reconnect: when a
//! live stream fails the manager settles in `Disconnected`, publishes the
//! error on the status channel and waits for the caller.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    secrecy::ExposeSecret,
    serde::Serialize,
    tokio::{
        sync::{Mutex, mpsc, watch},
        task::JoinHandle,
        time::timeout_at,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    waigaya_common::Credentials,
};

#[cfg(feature = "metrics")]
use waigaya_metrics::{connection as conn_metrics, counter, histogram, labels};

use crate::{
    api::{AuthIdentity, EventStream, RemoteApi, StreamEvent},
    error::{ConnectionError, Result},
    event::InboundEvent,
    token::validate_credentials,
};

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Budget for opening the stream and receiving `hello`, together.
    pub connect_timeout: Duration,
    /// Budget for the `auth.test` round-trip.
    pub test_timeout: Duration,
    /// Capacity of the channel between the reader and the pipeline.
    pub event_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            test_timeout: Duration::from_secs(10),
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    TestingCredentials,
    Connecting,
    Ready,
    Disconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::TestingCredentials => "testing_credentials",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnecting => "disconnecting",
        })
    }
}

/// What observers see on the status channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Most recent failure; cleared by a successful connect or a
    /// caller-initiated disconnect.
    pub last_error: Option<ConnectionError>,
    /// Identity of the last successful `connect`.
    pub identity: Option<AuthIdentity>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            last_error: None,
            identity: None,
        }
    }
}

/// Returned by a successful [`ConnectionManager::connect`].
#[derive(Debug, Clone)]
pub struct ReadyInfo {
    pub identity: AuthIdentity,
    /// Time from starting the stream open to `hello`.
    pub handshake: Duration,
}

struct Session {
    generation: u64,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

pub struct ConnectionManager {
    api: Arc<dyn RemoteApi>,
    settings: ConnectionSettings,
    events: mpsc::Sender<InboundEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    /// Serializes connect/disconnect and holds the live session.
    session: Mutex<Option<Session>>,
    /// Bumped for every new session and every teardown.
    generation: Arc<AtomicU64>,
}

impl ConnectionManager {
    /// Create the manager and the receiving end of its event channel, which
    /// belongs to the ingestion pipeline.
    pub fn new(
        api: Arc<dyn RemoteApi>,
        settings: ConnectionSettings,
    ) -> (Self, mpsc::Receiver<InboundEvent>) {
        let (events, rx) = mpsc::channel(settings.event_buffer.max(1));
        let (status, _) = watch::channel(ConnectionStatus::default());
        let manager = Self {
            api,
            settings,
            events,
            status: Arc::new(status),
            session: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
        };
        (manager, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
        debug!(%state, "connection state");
    }

    fn fail(&self, err: &ConnectionError) {
        #[cfg(feature = "metrics")]
        counter!(conn_metrics::CONNECT_FAILURES_TOTAL, labels::CODE => waigaya_common::Coded::code(err).as_str())
            .increment(1);
        self.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.last_error = Some(err.clone());
        });
        warn!(error = %err, "connect failed");
    }

    /// Check the credentials against the remote without opening a stream.
    ///
    /// Malformed tokens are rejected before any network call.
    pub async fn test_connection(&self, credentials: &Credentials) -> Result<AuthIdentity> {
        validate_credentials(credentials)?;
        let call = self.api.test_auth(credentials.bot_token.expose_secret());
        let identity = tokio::time::timeout(self.settings.test_timeout, call)
            .await
            .map_err(|_| ConnectionError::TransportTimeout {
                timeout_ms: self.settings.test_timeout.as_millis() as u64,
            })??;
        info!(
            user = %identity.user,
            team = identity.team.as_deref().unwrap_or("-"),
            "credentials accepted"
        );
        Ok(identity)
    }

    /// Tear down any existing stream, then test, open and wait for ready.
    pub async fn connect(&self, credentials: &Credentials) -> Result<ReadyInfo> {
        #[cfg(feature = "metrics")]
        counter!(conn_metrics::CONNECT_ATTEMPTS_TOTAL).increment(1);

        // A malformed token leaves any live session alone.
        if let Err(e) = validate_credentials(credentials) {
            warn!(error = %e, "connect rejected");
            self.status.send_modify(|s| s.last_error = Some(e.clone()));
            return Err(e);
        }

        let mut slot = self.session.lock().await;
        self.teardown(&mut slot).await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.set_state(ConnectionState::TestingCredentials);
        let identity = match self.test_connection(credentials).await {
            Ok(identity) => identity,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            },
        };

        self.set_state(ConnectionState::Connecting);
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.connect_timeout;
        let (stream, early) = match self
            .open_until_ready(credentials.app_token.expose_secret(), deadline)
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            },
        };
        let handshake = started.elapsed();

        #[cfg(feature = "metrics")]
        histogram!(conn_metrics::HANDSHAKE_DURATION_SECONDS).record(handshake.as_secs_f64());

        // Ready must be published before the reader can observe a close.
        self.status.send_modify(|s| {
            s.state = ConnectionState::Ready;
            s.last_error = None;
            s.identity = Some(identity.clone());
        });
        info!(
            generation,
            handshake_ms = handshake.as_millis() as u64,
            buffered = early.len(),
            "socket mode ready"
        );

        let cancel = CancellationToken::new();
        let reader = tokio::spawn(run_reader(Reader {
            generation,
            current: Arc::clone(&self.generation),
            stream,
            early,
            events: self.events.clone(),
            status: Arc::clone(&self.status),
            cancel: cancel.clone(),
        }));
        *slot = Some(Session {
            generation,
            cancel,
            reader,
        });

        Ok(ReadyInfo {
            identity,
            handshake,
        })
    }

    /// Close the live stream, if any. Safe to call in any state.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        self.teardown(&mut slot).await;
        self.status.send_modify(|s| {
            s.state = ConnectionState::Disconnected;
            s.last_error = None;
        });
    }

    async fn teardown(&self, slot: &mut Option<Session>) {
        let Some(session) = slot.take() else {
            return;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        if session.reader.is_finished() {
            // The stream already ended on its own; state is already settled.
            return;
        }
        self.set_state(ConnectionState::Disconnecting);
        session.cancel.cancel();
        if let Err(e) = session.reader.await {
            warn!(generation = session.generation, error = %e, "reader task did not exit cleanly");
        }
        self.set_state(ConnectionState::Disconnected);
        info!(generation = session.generation, "socket mode disconnected");
    }

    /// Open the stream and wait for `hello`, all before `deadline`.
    ///
    /// On timeout an open still in flight is dropped; a stream that was
    /// already opened is closed explicitly.
    async fn open_until_ready(
        &self,
        app_token: &str,
        deadline: tokio::time::Instant,
    ) -> Result<(Box<dyn EventStream>, Vec<InboundEvent>)> {
        let timed_out = || ConnectionError::TransportTimeout {
            timeout_ms: self.settings.connect_timeout.as_millis() as u64,
        };

        let mut stream = timeout_at(deadline, self.api.open_event_stream(app_token))
            .await
            .map_err(|_| timed_out())??;

        match timeout_at(deadline, await_ready(stream.as_mut())).await {
            Ok(Ok(early)) => Ok((stream, early)),
            Ok(Err(e)) => {
                stream.close().await;
                Err(e)
            },
            Err(_) => {
                stream.close().await;
                Err(timed_out())
            },
        }
    }
}

/// Read until `hello`, holding on to any events that arrive first.
async fn await_ready(stream: &mut dyn EventStream) -> Result<Vec<InboundEvent>> {
    let mut early = Vec::new();
    loop {
        match stream.next_event().await {
            Some(StreamEvent::Authenticated) => debug!("socket mode authenticated"),
            Some(StreamEvent::Ready { num_connections }) => {
                debug!(?num_connections, "hello received");
                return Ok(early);
            },
            Some(StreamEvent::Event(event)) => early.push(event),
            Some(StreamEvent::Error(e)) => return Err(e),
            Some(StreamEvent::Close { reason }) => {
                return Err(ConnectionError::transport(format!(
                    "stream closed during handshake: {reason}"
                )));
            },
            None => return Err(ConnectionError::transport("stream ended during handshake")),
        }
    }
}

struct Reader {
    generation: u64,
    current: Arc<AtomicU64>,
    stream: Box<dyn EventStream>,
    early: Vec<InboundEvent>,
    events: mpsc::Sender<InboundEvent>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    cancel: CancellationToken,
}

enum ReaderExit {
    Cancelled,
    Failed(ConnectionError),
}

/// Forward events to the pipeline in receipt order until cancelled or the
/// stream fails.
async fn run_reader(reader: Reader) {
    let Reader {
        generation,
        current,
        mut stream,
        early,
        events,
        status,
        cancel,
    } = reader;

    let pipeline_gone = || ReaderExit::Failed(ConnectionError::transport("event pipeline closed"));

    let mut exit = None;
    for event in early {
        if events.send(event).await.is_err() {
            exit = Some(pipeline_gone());
            break;
        }
    }

    let exit = match exit {
        Some(exit) => exit,
        None => loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break ReaderExit::Cancelled,
                next = stream.next_event() => next,
            };
            match next {
                Some(StreamEvent::Event(event)) => {
                    #[cfg(feature = "metrics")]
                    counter!(conn_metrics::EVENTS_RECEIVED_TOTAL).increment(1);
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break ReaderExit::Cancelled,
                        sent = events.send(event) => sent,
                    };
                    if sent.is_err() {
                        break pipeline_gone();
                    }
                },
                Some(StreamEvent::Authenticated | StreamEvent::Ready { .. }) => {
                    debug!(generation, "repeated handshake frame ignored");
                },
                Some(StreamEvent::Error(e)) => break ReaderExit::Failed(e),
                Some(StreamEvent::Close { reason }) => {
                    break ReaderExit::Failed(ConnectionError::transport(format!(
                        "stream closed by remote: {reason}"
                    )));
                },
                None => break ReaderExit::Failed(ConnectionError::transport("stream ended")),
            }
        },
    };

    stream.close().await;

    match exit {
        ReaderExit::Cancelled => debug!(generation, "reader cancelled"),
        ReaderExit::Failed(err) => {
            #[cfg(feature = "metrics")]
            counter!(conn_metrics::UNEXPECTED_CLOSES_TOTAL).increment(1);
            if current.load(Ordering::SeqCst) != generation {
                debug!(generation, error = %err, "stale reader exit ignored");
                return;
            }
            warn!(generation, error = %err, "socket mode stream lost, reconnect required");
            status.send_modify(|s| {
                s.state = ConnectionState::Disconnected;
                s.last_error = Some(err);
            });
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use waigaya_common::{Coded, ErrorCode};

    use super::*;
    use crate::testing::{FakeApi, RecordingAcker, message};

    fn creds() -> Credentials {
        Credentials::new("xoxb-1-test", "xapp-1-test")
    }

    fn manager(api: &Arc<FakeApi>) -> (ConnectionManager, mpsc::Receiver<InboundEvent>) {
        ConnectionManager::new(api.clone(), ConnectionSettings::default())
    }

    /// Run `connect` while a helper task plays the server side.
    async fn connect_ready(
        api: &Arc<FakeApi>,
        manager: &ConnectionManager,
    ) -> crate::testing::StreamHandle {
        let handle = api.script_stream();
        handle.ready();
        manager.connect(&creds()).await.unwrap();
        handle
    }

    #[tokio::test]
    async fn malformed_tokens_make_no_network_calls() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);

        let err = manager
            .connect(&Credentials::new("xoxp-user", "xapp-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CredentialFormat);
        assert!(manager.test_connection(&Credentials::new("xoxb-1", "")).await.is_err());

        assert_eq!(api.total_calls(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.status().last_error, Some(err));
    }

    #[tokio::test]
    async fn test_connection_opens_no_stream() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);

        let identity = manager.test_connection(&creds()).await.unwrap();
        assert_eq!(identity.user_id, crate::testing::BOT_USER);
        assert_eq!(api.calls("apps.connections.open"), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn rejected_credentials_stop_before_opening() {
        let api = Arc::new(FakeApi::default());
        api.fail_with("auth.test", ConnectionError::from_api("invalid_auth", None));
        let (manager, _rx) = manager(&api);

        let err = manager.connect(&creds()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Authentication);
        assert_eq!(api.calls("apps.connections.open"), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn connect_forwards_events_in_order_including_early_ones() {
        let api = Arc::new(FakeApi::default());
        let (manager, mut rx) = manager(&api);
        let acker = Arc::new(RecordingAcker::default());

        let handle = api.script_stream();
        handle.send(StreamEvent::Authenticated);
        handle.send(StreamEvent::Event(message("e1", "C1", "U1", "early", &acker)));
        handle.send(StreamEvent::Ready {
            num_connections: None,
        });
        handle.send(StreamEvent::Event(message("e2", "C1", "U1", "late", &acker)));

        let ready = manager.connect(&creds()).await.unwrap();
        assert_eq!(ready.identity.bot_id.as_deref(), Some(crate::testing::BOT_ID));
        assert_eq!(manager.state(), ConnectionState::Ready);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.envelope_id.as_deref(), Some("e1"));
        assert_eq!(second.envelope_id.as_deref(), Some("e2"));
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_closes_opened_stream() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);
        let handle = api.script_stream();
        handle.send(StreamEvent::Authenticated);

        let err = manager.connect(&creds()).await.unwrap_err();
        assert_eq!(err, ConnectionError::TransportTimeout { timeout_ms: 30_000 });
        assert!(handle.is_closed());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_open_times_out() {
        let api = Arc::new(FakeApi::default());
        api.delay_open(Duration::from_secs(31));
        let _handle = api.script_stream();
        let (manager, _rx) = manager(&api);

        let err = manager.connect(&creds()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransportTimeout);
    }

    #[tokio::test]
    async fn remote_close_after_ready_disconnects_without_retry() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);
        let mut status = manager.subscribe();

        let handle = connect_ready(&api, &manager).await;
        handle.send(StreamEvent::Close {
            reason: "link_disabled".into(),
        });

        status
            .wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
        let last = manager.status().last_error.unwrap();
        assert_eq!(last.code(), ErrorCode::Transport);
        assert!(last.to_string().contains("link_disabled"));

        // Give a would-be reconnect loop a chance to run.
        tokio::task::yield_now().await;
        assert_eq!(api.calls("apps.connections.open"), 1);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn reconnect_after_remote_close_retests_credentials() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);
        let mut status = manager.subscribe();

        let first = connect_ready(&api, &manager).await;
        first.send(StreamEvent::Close {
            reason: "refresh_requested".into(),
        });
        status
            .wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
        assert_eq!(api.calls("auth.test"), 1);

        let _second = connect_ready(&api, &manager).await;
        assert_eq!(api.calls("auth.test"), 2);
        assert_eq!(api.calls("apps.connections.open"), 2);
        assert_eq!(manager.state(), ConnectionState::Ready);
        assert!(manager.status().last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_auth_test_times_out() {
        let api = Arc::new(FakeApi::default());
        api.delay_auth(Duration::from_secs(11));
        let (manager, _rx) = manager(&api);

        let err = manager.test_connection(&creds()).await.unwrap_err();
        assert_eq!(err, ConnectionError::TransportTimeout { timeout_ms: 10_000 });
        assert_eq!(api.calls("apps.connections.open"), 0);
    }

    #[tokio::test]
    async fn reconnect_tears_down_previous_stream() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);

        let first = connect_ready(&api, &manager).await;
        let second = connect_ready(&api, &manager).await;

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(manager.state(), ConnectionState::Ready);
        // The first reader's exit must not have clobbered the new session.
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let api = Arc::new(FakeApi::default());
        let (manager, _rx) = manager(&api);

        manager.disconnect().await;
        let handle = connect_ready(&api, &manager).await;
        manager.disconnect().await;
        manager.disconnect().await;

        assert!(handle.is_closed());
        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn missing_scope_is_reported_with_needed_scope() {
        let api = Arc::new(FakeApi::default());
        api.fail_with(
            "apps.connections.open",
            ConnectionError::from_api("missing_scope", Some("connections:write".into())),
        );
        let (manager, _rx) = manager(&api);

        let err = manager.connect(&creds()).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Permission { ref needed, .. } if needed.as_deref() == Some("connections:write")
        ));
    }
}
