//! Inbound events as the pipeline sees them, plus the acknowledgment handle
//! each one carries.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;

/// Writes an acknowledgment for one envelope back over the stream.
pub trait Acknowledge: Send + Sync {
    fn acknowledge(&self, envelope_id: &str) -> Result<()>;
}

/// One-shot acknowledgment for a single envelope.
///
/// [`AckHandle::ack`] consumes the handle. A handle dropped without being
/// used acknowledges on drop, so an event lost to a panic or an early
/// return is still acked exactly once.
pub struct AckHandle {
    envelope_id: String,
    acker: Arc<dyn Acknowledge>,
    sent: bool,
}

impl AckHandle {
    pub fn new(envelope_id: impl Into<String>, acker: Arc<dyn Acknowledge>) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            acker,
            sent: false,
        }
    }

    pub fn envelope_id(&self) -> &str {
        &self.envelope_id
    }

    pub fn ack(mut self) -> Result<()> {
        self.sent = true;
        self.acker.acknowledge(&self.envelope_id)
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        self.sent = true;
        match self.acker.acknowledge(&self.envelope_id) {
            Ok(()) => debug!(envelope_id = %self.envelope_id, "acknowledged on drop"),
            Err(e) => warn!(envelope_id = %self.envelope_id, error = %e, "ack on drop failed"),
        }
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("envelope_id", &self.envelope_id)
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

/// The fields of a Slack `message` event the pipeline cares about.
///
/// Everything is optional: validation happens in the pipeline, where a
/// missing field becomes a data error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message(MessageEvent),
    /// Any other event or envelope type, by name.
    Other(String),
}

/// One event read off the stream.
#[derive(Debug)]
pub struct InboundEvent {
    pub envelope_id: Option<String>,
    /// Slack's `event_id` from an `events_api` payload.
    pub event_id: Option<String>,
    pub kind: EventKind,
    /// Redelivery counter from the envelope (0 on first delivery).
    pub retry_attempt: u32,
    ack: Option<AckHandle>,
}

impl InboundEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            envelope_id: None,
            event_id: None,
            kind,
            retry_attempt: 0,
            ack: None,
        }
    }

    #[must_use]
    pub fn with_envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    #[must_use]
    pub fn with_ack(mut self, ack: AckHandle) -> Self {
        self.ack = Some(ack);
        self
    }

    /// Take ownership of the ack handle. Events without an envelope have none.
    pub fn take_ack(&mut self) -> Option<AckHandle> {
        self.ack.take()
    }

    /// Key used to drop redeliveries: the event id, else the envelope id.
    pub fn dedup_key(&self) -> Option<&str> {
        self.event_id
            .as_deref()
            .or(self.envelope_id.as_deref())
            .filter(|k| !k.is_empty())
    }
}
