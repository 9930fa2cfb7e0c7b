//! Socket Mode stream over a WebSocket.
//!
//! Reads envelopes off the socket and turns them into [`StreamEvent`]s.
//! Writes (acks, pongs, the close frame) go through an unbounded channel to
//! a dedicated writer task so that acknowledging never blocks the reader.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt, stream::SplitStream},
    serde::Deserialize,
    tokio::{net::TcpStream, sync::mpsc, task::JoinHandle},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, trace, warn},
};

use crate::{
    api::{EventStream, StreamEvent},
    error::{ConnectionError, Result},
    event::{AckHandle, Acknowledge, EventKind, InboundEvent, MessageEvent},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the writer to flush the close frame.
const CLOSE_FLUSH: Duration = Duration::from_secs(2);

/// Sends acks by queueing `{"envelope_id": …}` frames for the writer task.
struct SocketAcker {
    outbound: mpsc::UnboundedSender<Message>,
}

impl Acknowledge for SocketAcker {
    fn acknowledge(&self, envelope_id: &str) -> Result<()> {
        let frame = serde_json::json!({ "envelope_id": envelope_id }).to_string();
        self.outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| ConnectionError::transport("stream closed before ack"))?;
        trace!(envelope_id, "ack queued");
        Ok(())
    }
}

pub struct SocketModeStream {
    reader: SplitStream<Socket>,
    outbound: mpsc::UnboundedSender<Message>,
    acker: Arc<SocketAcker>,
    writer: JoinHandle<()>,
    pending: VecDeque<StreamEvent>,
    finished: bool,
}

impl SocketModeStream {
    /// Connect to a `wss://` URL issued by `apps.connections.open`.
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _response) = connect_async(url).await?;
        info!("socket mode websocket open");
        Ok(Self::from_socket(socket))
    }

    fn from_socket(socket: Socket) -> Self {
        let (mut sink, reader) = socket.split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "socket writer stopped");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let acker = Arc::new(SocketAcker {
            outbound: outbound.clone(),
        });

        Self {
            reader,
            outbound,
            acker,
            writer,
            pending: VecDeque::from([StreamEvent::Authenticated]),
            finished: false,
        }
    }
}

#[async_trait]
impl EventStream for SocketModeStream {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            match self.reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    let acker: Arc<dyn Acknowledge> = self.acker.clone();
                    if let Some(event) = decode_frame(&text, &acker) {
                        return Some(event);
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.outbound.send(Message::Pong(data));
                },
                Some(Ok(Message::Close(frame))) => {
                    self.finished = true;
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .unwrap_or_else(|| "close frame".into());
                    return Some(StreamEvent::Close { reason });
                },
                Some(Ok(_)) => {},
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(StreamEvent::Error(e.into()));
                },
                None => {
                    self.finished = true;
                    return None;
                },
            }
        }
    }

    async fn close(&mut self) {
        self.finished = true;
        self.pending.clear();
        if self.outbound.send(Message::Close(None)).is_ok()
            && tokio::time::timeout(CLOSE_FLUSH, &mut self.writer)
                .await
                .is_ok()
        {
            debug!("socket mode websocket closed");
            return;
        }
        self.writer.abort();
    }
}

impl Drop for SocketModeStream {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

// ── Envelope decoding ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    num_connections: Option<u32>,
    #[serde(default)]
    retry_attempt: Option<u32>,
}

#[derive(Deserialize)]
struct EventsApiPayload {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<RawEvent>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

impl From<RawEvent> for EventKind {
    fn from(raw: RawEvent) -> Self {
        match raw.kind.as_deref() {
            Some("message") => Self::Message(MessageEvent {
                channel: raw.channel,
                user: raw.user,
                bot_id: raw.bot_id,
                subtype: raw.subtype,
                text: raw.text,
                ts: raw.ts,
                thread_ts: raw.thread_ts,
            }),
            Some(other) => Self::Other(other.to_owned()),
            None => Self::Other("unknown".into()),
        }
    }
}

/// Turn one text frame into a stream event.
///
/// Frames that cannot be used are logged and skipped (`None`). If such a
/// frame still carried an envelope id it is acknowledged here so Slack does
/// not redeliver it.
fn decode_frame(text: &str, acker: &Arc<dyn Acknowledge>) -> Option<StreamEvent> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "undecodable socket mode frame");
            ack_raw(text, acker);
            return None;
        },
    };

    match envelope.kind.as_str() {
        "hello" => Some(StreamEvent::Ready {
            num_connections: envelope.num_connections,
        }),
        "disconnect" => Some(StreamEvent::Close {
            reason: envelope.reason.unwrap_or_else(|| "disconnect".into()),
        }),
        kind => {
            let Some(envelope_id) = envelope.envelope_id.filter(|id| !id.is_empty()) else {
                debug!(kind, "ignoring frame without envelope id");
                return None;
            };
            let (event_id, event_kind) = match (kind, envelope.payload) {
                ("events_api", Some(payload)) => {
                    match serde_json::from_value::<EventsApiPayload>(payload) {
                        Ok(payload) => (
                            payload.event_id,
                            payload
                                .event
                                .map(EventKind::from)
                                .unwrap_or_else(|| EventKind::Other("events_api".into())),
                        ),
                        Err(e) => {
                            warn!(%envelope_id, error = %e, "undecodable events_api payload");
                            (None, EventKind::Other("events_api".into()))
                        },
                    }
                },
                (other, _) => (None, EventKind::Other(other.to_owned())),
            };

            let mut event = InboundEvent::new(event_kind)
                .with_envelope(envelope_id.clone())
                .with_ack(AckHandle::new(envelope_id, Arc::clone(acker)));
            event.event_id = event_id;
            event.retry_attempt = envelope.retry_attempt.unwrap_or(0);
            Some(StreamEvent::Event(event))
        },
    }
}

fn ack_raw(text: &str, acker: &Arc<dyn Acknowledge>) {
    let envelope_id = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("envelope_id")?.as_str().map(str::to_owned));
    if let Some(id) = envelope_id
        && let Err(e) = acker.acknowledge(&id)
    {
        warn!(envelope_id = %id, error = %e, "failed to ack undecodable frame");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingAcker;

    fn acker() -> (Arc<RecordingAcker>, Arc<dyn Acknowledge>) {
        let rec = Arc::new(RecordingAcker::default());
        let dyn_acker: Arc<dyn Acknowledge> = rec.clone();
        (rec, dyn_acker)
    }

    #[test]
    fn hello_is_ready() {
        let (_, a) = acker();
        let event = decode_frame(r#"{"type":"hello","num_connections":1}"#, &a);
        assert!(matches!(
            event,
            Some(StreamEvent::Ready {
                num_connections: Some(1)
            })
        ));
    }

    #[test]
    fn disconnect_is_close() {
        let (_, a) = acker();
        let event = decode_frame(r#"{"type":"disconnect","reason":"refresh_requested"}"#, &a);
        assert!(matches!(event, Some(StreamEvent::Close { reason }) if reason == "refresh_requested"));
    }

    #[test]
    fn events_api_message_is_decoded_with_ack() {
        let (rec, a) = acker();
        let frame = r#"{
            "type":"events_api","envelope_id":"env-1","retry_attempt":2,
            "payload":{"event_id":"Ev1","event":{
                "type":"message","channel":"C1","user":"U1","text":"hi","ts":"1.2"}}
        }"#;
        let Some(StreamEvent::Event(mut event)) = decode_frame(frame, &a) else {
            panic!("expected event");
        };
        assert_eq!(event.dedup_key(), Some("Ev1"));
        assert_eq!(event.retry_attempt, 2);
        let EventKind::Message(msg) = &event.kind else {
            panic!("expected message");
        };
        assert_eq!(msg.channel.as_deref(), Some("C1"));
        assert_eq!(msg.text.as_deref(), Some("hi"));

        event.take_ack().unwrap().ack().unwrap();
        assert_eq!(rec.acked(), ["env-1"]);
    }

    #[test]
    fn slash_commands_become_other_events() {
        let (_, a) = acker();
        let frame = r#"{"type":"slash_commands","envelope_id":"env-9","payload":{"command":"/x"}}"#;
        let Some(StreamEvent::Event(event)) = decode_frame(frame, &a) else {
            panic!("expected event");
        };
        assert_eq!(event.kind, EventKind::Other("slash_commands".into()));
    }

    #[test]
    fn garbage_with_envelope_is_acked_and_skipped() {
        let (rec, a) = acker();
        assert!(decode_frame(r#"{"envelope_id":"env-3"}"#, &a).is_none());
        assert!(decode_frame("not json", &a).is_none());
        assert_eq!(rec.acked(), ["env-3"]);
    }
}
