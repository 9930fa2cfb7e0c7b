//! Filters inbound events and turns the survivors into display messages.
//!
//! Events are handled one at a time, in the order the reader forwarded
//! them. Whatever happens to an event, its envelope is acknowledged once
//! routing is over.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use {
    tokio::sync::{mpsc, watch},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    waigaya_channels::{MessageSink, Watchlist},
    waigaya_common::NormalizedMessage,
};

#[cfg(feature = "metrics")]
use waigaya_metrics::{counter, ingest as ingest_metrics, labels};

use crate::{
    connection::ConnectionStatus,
    error::{ConnectionError, Result},
    event::{EventKind, InboundEvent, MessageEvent},
    identity::IdentityResolver,
    mentions::resolve_mentions,
};

pub const DEFAULT_DEDUP_CAPACITY: usize = 512;

/// Message subtypes that are still ordinary user posts.
const DISPLAYABLE_SUBTYPES: &[&str] = &["thread_broadcast", "file_share", "me_message"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotAMessage,
    /// Edits, deletions, joins and other housekeeping subtypes.
    Subtype,
    SelfAuthored,
    Unwatched,
    Duplicate,
    EmptyText,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAMessage => "not_a_message",
            Self::Subtype => "subtype",
            Self::SelfAuthored => "self_authored",
            Self::Unwatched => "unwatched",
            Self::Duplicate => "duplicate",
            Self::EmptyText => "empty_text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Emitted,
    Dropped(DropReason),
}

/// Bounded FIFO set of recently seen dedup keys.
#[derive(Debug)]
pub struct SeenKeys {
    capacity: usize,
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl SeenKeys {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            keys: HashSet::with_capacity(capacity),
        }
    }

    /// Record `key`. Returns `false` if it was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.keys.remove(&oldest);
        }
        self.order.push_back(key.to_owned());
        self.keys.insert(key.to_owned());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct IngestionPipeline {
    watchlist: Watchlist,
    identity: Arc<IdentityResolver>,
    status: watch::Receiver<ConnectionStatus>,
    sink: Arc<dyn MessageSink>,
    seen: Mutex<SeenKeys>,
}

impl IngestionPipeline {
    /// `status` supplies the authenticated identity used to spot our own
    /// messages; pass the connection manager's subscription.
    pub fn new(
        watchlist: Watchlist,
        identity: Arc<IdentityResolver>,
        status: watch::Receiver<ConnectionStatus>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        Self {
            watchlist,
            identity,
            status,
            sink,
            seen: Mutex::new(SeenKeys::new(DEFAULT_DEDUP_CAPACITY)),
        }
    }

    #[must_use]
    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.seen = Mutex::new(SeenKeys::new(capacity));
        self
    }

    /// Process events until the channel closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>, cancel: CancellationToken) {
        info!("ingestion pipeline started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            // Outcomes are logged and counted inside `handle`.
            self.handle(event).await.ok();
        }
        info!("ingestion pipeline stopped");
    }

    /// Route one event, then acknowledge it.
    pub async fn handle(&self, mut event: InboundEvent) -> Result<Routing> {
        // Held for the whole call: if routing unwinds, the drop still acks.
        let ack = event.take_ack();

        let routed = self.route(&event).await;
        match &routed {
            Ok(Routing::Emitted) => {
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::MESSAGES_EMITTED_TOTAL).increment(1);
            },
            Ok(Routing::Dropped(reason)) => {
                debug!(
                    envelope_id = event.envelope_id.as_deref().unwrap_or("-"),
                    reason = reason.as_str(),
                    "event dropped"
                );
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::MESSAGES_DROPPED_TOTAL, labels::REASON => reason.as_str())
                    .increment(1);
            },
            Err(e) => {
                warn!(
                    envelope_id = event.envelope_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "malformed event dropped"
                );
                #[cfg(feature = "metrics")]
                counter!(ingest_metrics::DATA_ERRORS_TOTAL).increment(1);
            },
        }

        if let Some(ack) = ack {
            let envelope_id = ack.envelope_id().to_owned();
            match ack.ack() {
                Ok(()) => {
                    #[cfg(feature = "metrics")]
                    counter!(ingest_metrics::ACKS_TOTAL).increment(1);
                },
                Err(e) => warn!(%envelope_id, error = %e, "ack failed"),
            }
        }
        routed
    }

    async fn route(&self, event: &InboundEvent) -> Result<Routing> {
        if let Some(key) = event.dedup_key()
            && !self.seen.lock().unwrap_or_else(|e| e.into_inner()).insert(key)
        {
            return Ok(Routing::Dropped(DropReason::Duplicate));
        }

        let EventKind::Message(msg) = &event.kind else {
            return Ok(Routing::Dropped(DropReason::NotAMessage));
        };
        if msg
            .subtype
            .as_deref()
            .is_some_and(|s| !DISPLAYABLE_SUBTYPES.contains(&s))
        {
            return Ok(Routing::Dropped(DropReason::Subtype));
        }

        if self.is_self_authored(msg) {
            return Ok(Routing::Dropped(DropReason::SelfAuthored));
        }
        let channel_id = required(msg.channel.as_deref(), "channel")?;
        if !self.watchlist.contains(channel_id) {
            return Ok(Routing::Dropped(DropReason::Unwatched));
        }
        let user_id = required(msg.user.as_deref(), "user")?;

        let raw_text = msg.text.as_deref().unwrap_or_default().trim();
        if raw_text.is_empty() {
            return Ok(Routing::Dropped(DropReason::EmptyText));
        }

        let author = self.identity.resolve_user(user_id).await;
        let text = resolve_mentions(raw_text, &self.identity).await;
        let message = NormalizedMessage {
            text,
            author: author.author_label().to_owned(),
            author_icon: author.icon_url.clone(),
            user_id: user_id.to_owned(),
            channel_id: channel_id.to_owned(),
            source_ts: msg.ts.clone().unwrap_or_default(),
        };
        debug!(channel_id, user_id, "message emitted");
        self.sink.deliver(message).await;
        Ok(Routing::Emitted)
    }

    fn is_self_authored(&self, msg: &MessageEvent) -> bool {
        let status = self.status.borrow();
        let Some(me) = status.identity.as_ref() else {
            return false;
        };
        msg.user.as_deref() == Some(me.user_id.as_str())
            || (me.bot_id.is_some() && msg.bot_id == me.bot_id)
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConnectionError::data(format!("message event without {field}")))
}
