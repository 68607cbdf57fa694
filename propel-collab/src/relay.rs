//! WebSocket relay with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (doc_id) ── presence + comment history
//! Client B ──┘          │
//!                       └── broadcast fan-out ──► every attached client
//! ```
//!
//! The relay is deliberately dumb about content: edit frames are
//! rebroadcast to every client in the room, sender included, and clients
//! suppress their own echoes. The relay is only authoritative for what it
//! actually owns — who is attached and the comment history — so presence
//! snapshots and init state originate here with a nil origin.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{
    ChannelMessage, Comment, InitState, MessageKind, Participant, PresenceUpdate,
};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// One document's room: who is attached, plus the comment history that
/// late joiners receive in their init snapshot.
struct Room {
    participants: HashMap<Uuid, Participant>,
    comments: Vec<Comment>,
    tx: broadcast::Sender<Arc<Vec<u8>>>,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            participants: HashMap::new(),
            comments: Vec::new(),
            tx,
        }
    }

    fn roster(&self) -> Vec<Participant> {
        self.participants.values().cloned().collect()
    }

    fn broadcast(&self, msg: &ChannelMessage) {
        if let Ok(encoded) = msg.encode() {
            // Send only fails when no receiver is subscribed, which is fine.
            let _ = self.tx.send(Arc::new(encoded));
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    /// Document rooms: doc_id → room
    rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the relay event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
        config: RelayConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        // State for this connection, set by the first join frame
        let mut user_id: Option<Uuid> = None;
        let mut doc_id: Option<Uuid> = None;
        let mut room_rx: Option<broadcast::Receiver<Arc<Vec<u8>>>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket frame
                frame = ws_receiver.next() => {
                    match frame {
                        Some(Ok(Message::Binary(data))) => {
                            let msg = match ChannelMessage::decode(&data) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    log::warn!("Failed to decode frame from {addr}: {e}");
                                    continue;
                                }
                            };

                            match msg.kind {
                                MessageKind::Join => {
                                    let participant = match msg.participant() {
                                        Ok(p) => p,
                                        Err(e) => {
                                            log::warn!("Malformed join from {addr}: {e}");
                                            continue;
                                        }
                                    };
                                    user_id = Some(participant.user_id);
                                    doc_id = Some(msg.doc_id);

                                    let init = {
                                        let mut rooms_w = rooms.write().await;
                                        let room = rooms_w
                                            .entry(msg.doc_id)
                                            .or_insert_with(|| Room::new(config.broadcast_capacity));
                                        room.participants.insert(participant.user_id, participant.clone());
                                        room_rx = Some(room.tx.subscribe());

                                        let init = ChannelMessage::init(
                                            msg.doc_id,
                                            &InitState {
                                                presence: room.roster(),
                                                comments: room.comments.clone(),
                                            },
                                        );
                                        if let Ok(presence) = ChannelMessage::presence(
                                            msg.doc_id,
                                            &PresenceUpdate { participants: room.roster() },
                                        ) {
                                            room.broadcast(&presence);
                                        }
                                        init
                                    };

                                    // Direct init reply to the joiner only; the
                                    // presence snapshot already went room-wide.
                                    // The participant is registered by now, so any
                                    // failure must fall through to cleanup below,
                                    // never return early.
                                    let frame = match init.and_then(|m| m.encode()) {
                                        Ok(bytes) => bytes,
                                        Err(e) => {
                                            log::error!("Failed to build init reply for {addr}: {e}");
                                            break;
                                        }
                                    };
                                    if ws_sender.send(Message::Binary(frame.into())).await.is_err() {
                                        break;
                                    }

                                    log::info!(
                                        "{} ({}) joined doc {}",
                                        participant.name, participant.user_id, msg.doc_id
                                    );
                                }

                                MessageKind::Edit => {
                                    // Last writer wins by arrival order: fan out
                                    // as-is, sender included.
                                    if let Some(did) = doc_id {
                                        let rooms_r = rooms.read().await;
                                        if let Some(room) = rooms_r.get(&did) {
                                            room.broadcast(&msg);
                                        }
                                    }
                                }

                                MessageKind::Comment => {
                                    if let Some(did) = doc_id {
                                        match msg.comment_body() {
                                            Ok(comment) => {
                                                let mut rooms_w = rooms.write().await;
                                                if let Some(room) = rooms_w.get_mut(&did) {
                                                    room.comments.push(comment);
                                                    room.broadcast(&msg);
                                                }
                                            }
                                            Err(e) => log::warn!("Malformed comment from {addr}: {e}"),
                                        }
                                    }
                                }

                                MessageKind::Leave => {
                                    log::info!("{:?} left doc {:?}", user_id, doc_id);
                                    break;
                                }

                                other => {
                                    log::debug!("Unhandled message kind from client: {other:?}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            if ws_sender.send(Message::Pong(data)).await.is_err() {
                                break;
                            }
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing room broadcast
                msg = async {
                    match room_rx {
                        Some(ref mut rx) => rx.recv().await,
                        // Not joined yet: wait forever
                        None => std::future::pending().await,
                    }
                } => {
                    match msg {
                        Ok(data) => {
                            // A dead socket can surface here before the read
                            // arm sees the close; breaking (not returning)
                            // keeps the participant cleanup below reachable.
                            if ws_sender.send(Message::Binary(data.to_vec().into())).await.is_err() {
                                log::debug!("Dropping dead connection for {user_id:?}");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!("Client {user_id:?} lagged by {n} messages");
                        }
                        Err(_) => break,
                    }
                }
            }
        }

        // Cleanup: drop the participant, tell the room, remove empty rooms
        if let (Some(uid), Some(did)) = (user_id, doc_id) {
            let mut rooms_w = rooms.write().await;
            if let Some(room) = rooms_w.get_mut(&did) {
                room.participants.remove(&uid);

                if room.participants.is_empty() {
                    rooms_w.remove(&did);
                    log::info!("Room {did} removed (empty)");
                } else if let Ok(presence) = ChannelMessage::presence(
                    did,
                    &PresenceUpdate { participants: room.roster() },
                ) {
                    room.broadcast(&presence);
                }
            }
        }

        Ok(())
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
