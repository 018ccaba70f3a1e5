//! Change-event publication for the display board, ticket owners and the
//! staff dashboard.
//!
//! Every committed mutation publishes one [`ChangeEvent`]. Connected
//! WebSocket clients subscribe to topics and receive matching events;
//! everything in the payload is a hint; receivers re-fetch through the read
//! endpoints rather than trusting the event as truth. Clients without a live
//! subscription poll the same endpoints instead.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::shared::state::AppState;

const EVENT_BUFFER: usize = 256;

/// A committed state change, keyed by the affected entity.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    TicketCreated { id: Uuid, queue_number: i32 },
    TicketCalled { id: Uuid, window_id: Uuid },
    TicketCompleted { id: Uuid, window_id: Option<Uuid> },
    TicketCancelled { id: Uuid },
    WindowUpdated { id: Uuid },
    FeedbackReceived { queue_id: Uuid },
}

impl ChangeEvent {
    /// Topics this event is delivered on. Collection topics (`queue`,
    /// `windows`) serve the board and dashboard; entity topics serve the
    /// ticket owner's own page.
    pub fn topics(&self) -> Vec<String> {
        match self {
            ChangeEvent::TicketCreated { id, .. } => {
                vec!["queue".into(), format!("ticket:{id}")]
            }
            ChangeEvent::TicketCalled { id, window_id } => vec![
                "queue".into(),
                "windows".into(),
                format!("ticket:{id}"),
                format!("window:{window_id}"),
            ],
            ChangeEvent::TicketCompleted { id, window_id } => {
                let mut topics = vec!["queue".into(), "windows".into(), format!("ticket:{id}")];
                if let Some(w) = window_id {
                    topics.push(format!("window:{w}"));
                }
                topics
            }
            ChangeEvent::TicketCancelled { id } => {
                vec!["queue".into(), format!("ticket:{id}")]
            }
            ChangeEvent::WindowUpdated { id } => {
                vec!["windows".into(), format!("window:{id}")]
            }
            ChangeEvent::FeedbackReceived { queue_id } => {
                vec!["feedback".into(), format!("ticket:{queue_id}")]
            }
        }
    }
}

/// Fan-out point for committed changes. Publishing never blocks and never
/// fails the originating request; an event with no listeners is dropped.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    pub fn publish(&self, event: ChangeEvent) {
        debug!("publishing {event:?}");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    #[cfg(test)]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Subscribed {
        topics: Vec<String>,
    },
    Event {
        topic: String,
        event: ChangeEvent,
    },
    /// Sent when the client fell behind the event buffer; it should re-fetch
    /// current state through the read endpoints.
    Resync,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.events.subscribe();
    let mut topics: HashSet<String> = HashSet::new();

    info!("display client connected");

    loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { topics: requested }) => {
                                topics.extend(requested);
                                let ack = ServerMessage::Subscribed {
                                    topics: topics.iter().cloned().collect(),
                                };
                                if send_json(&mut sink, &ack).await.is_err() {
                                    break;
                                }
                            }
                            Ok(ClientMessage::Unsubscribe { topics: dropped }) => {
                                for t in dropped {
                                    topics.remove(&t);
                                }
                            }
                            Err(e) => {
                                debug!("ignoring malformed client message: {e}");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("websocket receive error: {e}");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Some(topic) = event
                            .topics()
                            .into_iter()
                            .find(|t| topics.contains(t))
                        else {
                            continue;
                        };
                        let msg = ServerMessage::Event { topic, event };
                        if send_json(&mut sink, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("websocket client lagged, skipped {skipped} events");
                        if send_json(&mut sink, &ServerMessage::Resync).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("display client disconnected");
}

async fn send_json<S>(sink: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let Ok(text) = serde_json::to_string(msg) else {
        return Err(());
    };
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_cover_collection_and_entity() {
        let id = Uuid::new_v4();
        let window = Uuid::new_v4();

        let created = ChangeEvent::TicketCreated {
            id,
            queue_number: 7,
        };
        assert!(created.topics().contains(&"queue".to_string()));
        assert!(created.topics().contains(&format!("ticket:{id}")));

        let called = ChangeEvent::TicketCalled { id, window_id: window };
        let topics = called.topics();
        assert!(topics.contains(&"windows".to_string()));
        assert!(topics.contains(&format!("window:{window}")));
    }

    #[test]
    fn completed_without_window_skips_window_topic() {
        let id = Uuid::new_v4();
        let event = ChangeEvent::TicketCompleted {
            id,
            window_id: None,
        };
        assert!(!event.topics().iter().any(|t| t.starts_with("window:")));
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let broadcaster = EventBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        let id = Uuid::new_v4();
        broadcaster.publish(ChangeEvent::TicketCancelled { id });
        match rx.recv().await {
            Ok(ChangeEvent::TicketCancelled { id: got }) => assert_eq!(got, id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let broadcaster = EventBroadcaster::new();
        assert_eq!(broadcaster.receiver_count(), 0);
        broadcaster.publish(ChangeEvent::WindowUpdated { id: Uuid::new_v4() });
    }

    #[test]
    fn client_message_parses_subscribe() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topics":["queue","windows"]}"#)
                .expect("valid subscribe message");
        match msg {
            ClientMessage::Subscribe { topics } => {
                assert_eq!(topics, vec!["queue".to_string(), "windows".to_string()]);
            }
            _ => panic!("expected subscribe"),
        }
    }
}
