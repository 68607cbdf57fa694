//! WebSocket client for attaching a document channel to the relay.
//!
//! Provides:
//! - Attachment lifecycle (attach, detach; no automatic reconnect)
//! - Outbound edit/comment frames on every local mutation
//! - Inbound frame decoding routed through [`DocumentChannel`]
//!
//! If the connection drops, the channel is marked closed and stays that
//! way: the document degrades to single-user editing backed by autosave,
//! and a fresh attachment happens only when the document is reopened.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::channel::{ChannelState, DocumentChannel};
use crate::protocol::{ChannelMessage, Comment, ProtocolError};

/// Client-side channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("channel is closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// WebSocket attachment for one [`DocumentChannel`].
pub struct ChannelClient {
    channel: Arc<Mutex<DocumentChannel>>,
    server_url: String,
    /// Channel to the WebSocket writer task, present while attached.
    out_tx: Option<mpsc::Sender<Vec<u8>>>,
    reader_task: Option<JoinHandle<()>>,
}

impl ChannelClient {
    pub fn new(channel: Arc<Mutex<DocumentChannel>>, server_url: impl Into<String>) -> Self {
        Self {
            channel,
            server_url: server_url.into(),
            out_tx: None,
            reader_task: None,
        }
    }

    pub fn channel(&self) -> Arc<Mutex<DocumentChannel>> {
        self.channel.clone()
    }

    /// Attach to the relay.
    ///
    /// Connects, announces ourselves with a join frame, and spawns the
    /// reader/writer tasks. On success the channel is open and the server's
    /// init snapshot will arrive as the first inbound frames.
    pub async fn attach(&mut self) -> Result<(), ChannelError> {
        let url = {
            let mut channel = self.channel.lock().await;
            channel.mark_connecting();
            format!("{}/{}", self.server_url, channel.doc_id())
        };

        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| {
                let channel = self.channel.clone();
                tokio::spawn(async move { channel.lock().await.mark_closed() });
                ChannelError::Connect(e.to_string())
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.out_tx = Some(out_tx);

        // Writer task: drain the outgoing channel into the socket.
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        // Announce ourselves before anything else goes out.
        let join = {
            let channel = self.channel.lock().await;
            channel.compose_join()?
        };
        self.send_raw(join.encode()?).await?;

        self.channel.lock().await.mark_open();

        // Reader task: decode frames and hand them to the channel. Any
        // close or transport error ends the attachment for good.
        let channel = self.channel.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Binary(data)) => match ChannelMessage::decode(&data) {
                        Ok(msg) => channel.lock().await.handle_inbound(msg).await,
                        Err(e) => log::warn!("ignoring undecodable frame: {e}"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("channel transport error: {e}");
                        break;
                    }
                }
            }
            channel.lock().await.mark_closed();
        });
        self.reader_task = Some(reader);

        Ok(())
    }

    /// Detach cleanly: best-effort leave frame, then tear down the tasks.
    pub async fn detach(&mut self) {
        if let Some(tx) = self.out_tx.take() {
            let leave = self.channel.lock().await.compose_leave();
            if let Ok(encoded) = leave.encode() {
                let _ = tx.send(encoded).await;
            }
            // Dropping the sender lets the writer task flush and close.
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        self.channel.lock().await.mark_closed();
    }

    /// Broadcast one local section mutation.
    ///
    /// A closed channel is not an error: the edit is already in the model
    /// and autosave persists it, so a detached client just skips the send.
    pub async fn send_edit(&self, section_key: &str, content: &str) -> Result<(), ChannelError> {
        let msg = {
            let channel = self.channel.lock().await;
            if channel.state() != ChannelState::Open {
                return Ok(());
            }
            channel.compose_edit(section_key, content)?
        };
        self.send_raw(msg.encode()?).await
    }

    /// Broadcast one comment and append it to the local log.
    pub async fn send_comment(&self, comment: Comment) -> Result<(), ChannelError> {
        let msg = {
            let mut channel = self.channel.lock().await;
            if channel.state() != ChannelState::Open {
                return Ok(());
            }
            channel.compose_comment(comment)?
        };
        self.send_raw(msg.encode()?).await
    }

    async fn send_raw(&self, data: Vec<u8>) -> Result<(), ChannelError> {
        match &self.out_tx {
            Some(tx) => tx.send(data).await.map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propel_core::SectionSet;
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use crate::protocol::Participant;

    fn client() -> ChannelClient {
        let model = Arc::new(RwLock::new(SectionSet::new()));
        let channel = DocumentChannel::new(Uuid::new_v4(), Participant::new("Alice"), model);
        ChannelClient::new(Arc::new(Mutex::new(channel)), "ws://127.0.0.1:1")
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_is_a_quiet_noop() {
        let client = client();
        assert!(client.send_edit("summary", "text").await.is_ok());
        assert!(client
            .send_comment(Comment::new("Alice", "note", None))
            .await
            .is_ok());
        // nothing was appended locally either
        assert!(client.channel.lock().await.comments().is_empty());
    }

    #[tokio::test]
    async fn test_attach_to_unreachable_relay_fails_and_closes() {
        let mut client = client();
        let result = client.attach().await;
        assert!(matches!(result, Err(ChannelError::Connect(_))));
        // give the failure path's close task a tick to run
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(
            client.channel.lock().await.state(),
            ChannelState::Closed
        );
    }

    #[tokio::test]
    async fn test_detach_without_attach_is_safe() {
        let mut client = client();
        client.detach().await;
        assert_eq!(client.channel.lock().await.state(), ChannelState::Closed);
    }
}
