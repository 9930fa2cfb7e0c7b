//! Scripted [`RemoteApi`] for unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::sync::mpsc,
    waigaya_common::{ChannelMeta, CustomEmoji, Profile},
};

use crate::{
    api::{AuthIdentity, EventStream, Page, RemoteApi, StreamEvent},
    error::{ConnectionError, Result},
    event::{AckHandle, Acknowledge, EventKind, InboundEvent, MessageEvent},
};

pub(crate) const BOT_USER: &str = "UBOT";
pub(crate) const BOT_ID: &str = "BBOT";

#[derive(Default)]
struct FakeState {
    users: Vec<Profile>,
    channels: Vec<ChannelMeta>,
    emojis: Vec<CustomEmoji>,
    page_size: Option<usize>,
    failing: HashMap<&'static str, ConnectionError>,
    fail_after: HashMap<&'static str, usize>,
    calls: HashMap<&'static str, usize>,
    streams: VecDeque<FakeStream>,
    open_delay: Option<Duration>,
    auth_delay: Option<Duration>,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub(crate) fn profile(id: &str, name: &str) -> Profile {
        Profile {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub(crate) fn channel(id: &str, name: &str, is_member: bool) -> ChannelMeta {
        ChannelMeta {
            id: id.into(),
            name: name.into(),
            is_private: false,
            is_member: Some(is_member),
            member_count: None,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn add_user(&self, profile: Profile) {
        self.state().users.push(profile);
    }

    pub(crate) fn set_users(&self, users: Vec<Profile>) {
        self.state().users = users;
    }

    pub(crate) fn add_channel(&self, meta: ChannelMeta) {
        self.state().channels.push(meta);
    }

    pub(crate) fn add_emoji(&self, name: &str) {
        self.state().emojis.push(CustomEmoji {
            name: name.into(),
            url: format!("https://emoji.test/{name}.png"),
        });
    }

    /// Fail `method` once the first `after` calls to it have succeeded.
    pub(crate) fn fail_after(&self, method: &'static str, after: usize) {
        self.state().fail_after.insert(method, after);
    }

    pub(crate) fn set_page_size(&self, size: usize) {
        self.state().page_size = Some(size);
    }

    pub(crate) fn fail_method(&self, method: &'static str) {
        self.fail_with(method, ConnectionError::transport(format!("{method} unavailable")));
    }

    pub(crate) fn fail_with(&self, method: &'static str, err: ConnectionError) {
        self.state().failing.insert(method, err);
    }

    pub(crate) fn delay_open(&self, delay: Duration) {
        self.state().open_delay = Some(delay);
    }

    pub(crate) fn delay_auth(&self, delay: Duration) {
        self.state().auth_delay = Some(delay);
    }

    /// Queue a stream for the next `open_event_stream`; the returned handle
    /// feeds it.
    pub(crate) fn script_stream(&self) -> StreamHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.state().streams.push_back(FakeStream {
            rx,
            closed: closed.clone(),
        });
        StreamHandle { tx, closed }
    }

    pub(crate) fn calls(&self, method: &str) -> usize {
        self.state().calls.get(method).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.state().calls.values().sum()
    }

    fn enter(&self, method: &'static str) -> Result<()> {
        let mut state = self.state();
        let calls = state.calls.entry(method).or_default();
        *calls += 1;
        let calls = *calls;
        if state.fail_after.get(method).is_some_and(|&after| calls > after) {
            return Err(ConnectionError::transport(format!("{method} failed mid-listing")));
        }
        match state.failing.get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn page<T: Clone>(items: &[T], page_size: Option<usize>, cursor: Option<&str>) -> Page<T> {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let size = page_size.unwrap_or(items.len().max(1));
        let end = (start + size).min(items.len());
        Page {
            items: items[start.min(end)..end].to_vec(),
            next_cursor: (end < items.len()).then(|| end.to_string()),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn test_auth(&self, _bot_token: &str) -> Result<AuthIdentity> {
        self.enter("auth.test")?;
        let delay = self.state().auth_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(AuthIdentity {
            user_id: BOT_USER.into(),
            user: "relay".into(),
            team: Some("Acme".into()),
            team_id: Some("T1".into()),
            bot_id: Some(BOT_ID.into()),
        })
    }

    async fn list_channels_page(
        &self,
        _bot_token: &str,
        cursor: Option<&str>,
    ) -> Result<Page<ChannelMeta>> {
        self.enter("conversations.list")?;
        let state = self.state();
        Ok(Self::page(&state.channels, state.page_size, cursor))
    }

    async fn list_users_page(&self, _bot_token: &str, cursor: Option<&str>) -> Result<Page<Profile>> {
        self.enter("users.list")?;
        let state = self.state();
        Ok(Self::page(&state.users, state.page_size, cursor))
    }

    async fn user_info(&self, _bot_token: &str, user_id: &str) -> Result<Profile> {
        self.enter("users.info")?;
        self.state()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or_else(|| ConnectionError::from_api("user_not_found", None))
    }

    async fn channel_info(&self, _bot_token: &str, channel_id: &str) -> Result<ChannelMeta> {
        self.enter("conversations.info")?;
        self.state()
            .channels
            .iter()
            .find(|c| c.id == channel_id)
            .cloned()
            .ok_or_else(|| ConnectionError::from_api("channel_not_found", None))
    }

    async fn list_emoji(&self, _bot_token: &str) -> Result<Vec<CustomEmoji>> {
        self.enter("emoji.list")?;
        Ok(self.state().emojis.clone())
    }

    async fn open_event_stream(&self, _app_token: &str) -> Result<Box<dyn EventStream>> {
        self.enter("apps.connections.open")?;
        let delay = self.state().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let stream = self
            .state()
            .streams
            .pop_front()
            .ok_or_else(|| ConnectionError::transport("no stream scripted"))?;
        Ok(Box::new(stream))
    }
}

pub(crate) struct FakeStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl EventStream for FakeStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

/// Test-side end of a [`FakeStream`].
pub(crate) struct StreamHandle {
    tx: mpsc::UnboundedSender<StreamEvent>,
    closed: Arc<AtomicBool>,
}

impl StreamHandle {
    pub(crate) fn send(&self, event: StreamEvent) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn ready(&self) {
        self.send(StreamEvent::Authenticated);
        self.send(StreamEvent::Ready {
            num_connections: Some(1),
        });
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Records every acknowledged envelope id.
#[derive(Default)]
pub(crate) struct RecordingAcker(Mutex<Vec<String>>);

impl RecordingAcker {
    pub(crate) fn acked(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Acknowledge for RecordingAcker {
    fn acknowledge(&self, envelope_id: &str) -> Result<()> {
        self.0.lock().unwrap().push(envelope_id.to_owned());
        Ok(())
    }
}

/// A `message` event in `channel` from `user`, acked through `acker`.
pub(crate) fn message(
    envelope_id: &str,
    channel: &str,
    user: &str,
    text: &str,
    acker: &Arc<RecordingAcker>,
) -> InboundEvent {
    let acker: Arc<dyn Acknowledge> = acker.clone();
    InboundEvent::new(EventKind::Message(MessageEvent {
        channel: Some(channel.into()),
        user: Some(user.into()),
        text: Some(text.into()),
        ts: Some(format!("1700000000.{envelope_id}")),
        ..Default::default()
    }))
    .with_envelope(envelope_id)
    .with_ack(AckHandle::new(envelope_id, acker))
}
