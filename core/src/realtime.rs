/// Realtime rooms: the per-user inbox and the per-conversation room
///
/// Rooms are joined by name over `{ws_base}/ws/{room}`:
///   user_{user_id}_conversations   {"event": "new_conversation"} announcements
///   conversation_{id}              Message-shaped JSON, one per persisted message
///
/// Each open room is a spawned reader task that decodes frames and forwards
/// them as `ChannelEvent`s into one mpsc channel. Readers never touch the
/// conversation store. No reconnect: a dropped room reports `Closed` and
/// stays down until it is opened again.
use crate::error::{FridayError, Result};
use crate::models::{ConversationId, Message, UserId};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomName {
    Inbox(UserId),
    Conversation(ConversationId),
}

impl fmt::Display for RoomName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomName::Inbox(user_id) => write!(f, "user_{}_conversations", user_id),
            RoomName::Conversation(id) => write!(f, "conversation_{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboxEvent {
    /// The backend created a conversation for this user
    NewConversation,
    Other(serde_json::Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Inbox(InboxEvent),
    RoomMessage {
        room: ConversationId,
        message: Message,
    },
    /// The connection ended without being asked to. `generation` identifies
    /// which open of `room` dropped.
    Closed { room: RoomName, generation: u64 },
}

pub type EventSink = mpsc::UnboundedSender<ChannelEvent>;

/// Decode one text frame received on `room`. Undecodable frames are logged
/// and dropped.
pub fn decode_frame(room: &RoomName, text: &str) -> Option<ChannelEvent> {
    match room {
        RoomName::Inbox(_) => match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                if value.get("event").and_then(|e| e.as_str()) == Some("new_conversation") {
                    Some(ChannelEvent::Inbox(InboxEvent::NewConversation))
                } else {
                    debug!("Unhandled inbox event on {}: {}", room, value);
                    Some(ChannelEvent::Inbox(InboxEvent::Other(value)))
                }
            }
            Err(_) => {
                debug!("Raw frame on {}: {}", room, text);
                None
            }
        },
        RoomName::Conversation(id) => match serde_json::from_str::<Message>(text) {
            Ok(message) => Some(ChannelEvent::RoomMessage { room: *id, message }),
            Err(e) => {
                warn!("Undecodable frame on {}: {}", room, e);
                None
            }
        },
    }
}

/// Handle to one open room. Closing (or dropping) it stops the reader.
pub struct RoomSubscription {
    room: RoomName,
    generation: u64,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RoomSubscription {
    pub fn new(
        room: RoomName,
        generation: u64,
        shutdown: oneshot::Sender<()>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            room,
            generation,
            shutdown: Some(shutdown),
            task,
        }
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ask the reader to close the socket and wait briefly for it to finish.
    pub async fn close(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if timeout(CLOSE_GRACE, task).await.is_err() {
                warn!("Room {} did not close in time, aborting", self.room);
                abort.abort();
            }
        }
        info!("Left room {}", self.room);
    }
}

impl Drop for RoomSubscription {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Opens rooms. The WebSocket implementation is `WebSocketTransport`.
///
/// `generation` is unique per open within one `ChannelManager` and must be
/// carried on the `Closed` event for that connection.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    async fn open(&self, room: RoomName, generation: u64, sink: EventSink)
        -> Result<RoomSubscription>;
}

pub struct WebSocketTransport {
    ws_base: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(ws_base: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ws_base: ws_base.into(),
            connect_timeout,
        }
    }

    pub fn room_url(&self, room: &RoomName) -> String {
        format!("{}/ws/{}", self.ws_base.trim_end_matches('/'), room)
    }
}

#[async_trait]
impl RoomTransport for WebSocketTransport {
    async fn open(
        &self,
        room: RoomName,
        generation: u64,
        sink: EventSink,
    ) -> Result<RoomSubscription> {
        let url = self.room_url(&room);
        let (stream, _response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                FridayError::Timeout(format!(
                    "room {} connect timeout after {:?}",
                    room, self.connect_timeout
                ))
            })?
            .map_err(|e| FridayError::WebSocket(e.to_string()))?;

        info!("Joined room {}", room);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_room(stream, room.clone(), generation, sink, shutdown_rx));
        Ok(RoomSubscription::new(room, generation, shutdown_tx, Some(task)))
    }
}

async fn run_room(
    stream: WsStream,
    room: RoomName,
    generation: u64,
    sink: EventSink,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut writer, mut reader) = stream.split();
    let closed = || ChannelEvent::Closed {
        room: room.clone(),
        generation,
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                if let Err(e) = writer.send(WsMessage::Close(None)).await {
                    debug!("Close frame to {} failed: {}", room, e);
                }
                break;
            }
            frame = reader.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Some(event) = decode_frame(&room, &text) {
                        if sink.send(event).is_err() {
                            // Nobody is listening anymore
                            break;
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    debug!("Ping on {} ({} bytes)", room, payload.len());
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Room {} closed by server", room);
                    let _ = sink.send(closed());
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Room {} connection error: {}", room, e);
                    let _ = sink.send(closed());
                    break;
                }
            }
        }
    }
}

/// Owns the inbox room and the single conversation room.
pub struct ChannelManager {
    transport: Arc<dyn RoomTransport>,
    sink: EventSink,
    inbox: Option<RoomSubscription>,
    room: Option<RoomSubscription>,
    next_generation: u64,
}

impl ChannelManager {
    pub fn new(transport: Arc<dyn RoomTransport>) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (sink, events) = mpsc::unbounded_channel();
        (
            Self {
                transport,
                sink,
                inbox: None,
                room: None,
                next_generation: 0,
            },
            events,
        )
    }

    pub fn inbox_room(&self) -> Option<&RoomName> {
        self.inbox.as_ref().map(|s| s.room())
    }

    pub fn current_room(&self) -> Option<&RoomName> {
        self.room.as_ref().map(|s| s.room())
    }

    async fn open(&mut self, room: RoomName) -> Result<RoomSubscription> {
        self.next_generation += 1;
        self.transport
            .open(room, self.next_generation, self.sink.clone())
            .await
    }

    /// Join the user's inbox. One per session; reopening for the same user
    /// while connected is a no-op.
    pub async fn open_inbox(&mut self, user_id: UserId) -> Result<()> {
        let room = RoomName::Inbox(user_id);
        if self.inbox_room() == Some(&room) {
            return Ok(());
        }
        if let Some(old) = self.inbox.take() {
            old.close().await;
        }
        self.inbox = Some(self.open(room).await?);
        Ok(())
    }

    /// Follow the selection: close the previous conversation room, then join
    /// the new one. `None` leaves no conversation room open.
    pub async fn switch_room(&mut self, conversation: Option<ConversationId>) -> Result<()> {
        let target = conversation.map(RoomName::Conversation);
        if target.is_some() && self.current_room() == target.as_ref() {
            return Ok(());
        }
        if let Some(old) = self.room.take() {
            old.close().await;
        }
        if let Some(room) = target {
            self.room = Some(self.open(room).await?);
        }
        Ok(())
    }

    /// Forget a room whose connection dropped so the next switch reopens it.
    ///
    /// Reports from an earlier open of the same room are ignored. Returns
    /// whether a live subscription was dropped.
    pub fn handle_closed(&mut self, room: &RoomName, generation: u64) -> bool {
        let matches = |sub: &Option<RoomSubscription>| {
            sub.as_ref()
                .is_some_and(|s| s.room() == room && s.generation() == generation)
        };
        if matches(&self.room) {
            self.room = None;
            true
        } else if matches(&self.inbox) {
            self.inbox = None;
            true
        } else {
            debug!("Stale close for room {} (generation {})", room, generation);
            false
        }
    }

    pub async fn close_all(&mut self) {
        if let Some(room) = self.room.take() {
            room.close().await;
        }
        if let Some(inbox) = self.inbox.take() {
            inbox.close().await;
        }
    }
}
