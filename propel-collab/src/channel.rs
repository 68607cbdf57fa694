//! The collaboration channel: per-document state machine and message
//! dispatch.
//!
//! Lifecycle per attachment: `Closed -> Connecting -> Open -> Closed`.
//! There is no automatic reconnect: a dropped channel stays `Closed` until
//! the document is reopened, and editing degrades to single-user autosave.
//!
//! Inbound messages mutate the shared [`SectionSet`] (via `merge_remote`,
//! which never re-broadcasts) and are surfaced to the orchestrator as
//! [`ChannelEvent`]s over an mpsc receiver. An inbound edit whose origin is
//! the local user is dropped outright — echo suppression for servers that
//! naively rebroadcast to every attached client including the sender.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use propel_core::{MergeOutcome, SectionSet};

use crate::presence::{CommentLog, PresenceRoster};
use crate::protocol::{
    ChannelMessage, Comment, EditEvent, MessageKind, Participant, ProtocolError,
};

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

/// Events surfaced to the orchestrator for re-rendering.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Opened,
    Closed,
    /// A remote edit was merged into the model. `merge` tells the view
    /// whether the control may refresh now or is held by local focus.
    RemoteEdit {
        section_key: String,
        origin_user: Uuid,
        merge: MergeOutcome,
    },
    PresenceChanged(Vec<Participant>),
    CommentReceived(Comment),
    /// Comment history replaced wholesale by an `init` snapshot.
    CommentHistory(Vec<Comment>),
}

/// One document's collaboration channel.
pub struct DocumentChannel {
    doc_id: Uuid,
    local_user: Participant,
    state: ChannelState,
    model: Arc<RwLock<SectionSet>>,
    roster: PresenceRoster,
    comments: CommentLog,
    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
}

impl DocumentChannel {
    pub fn new(doc_id: Uuid, local_user: Participant, model: Arc<RwLock<SectionSet>>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            doc_id,
            local_user,
            state: ChannelState::Closed,
            model,
            roster: PresenceRoster::new(),
            comments: CommentLog::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn doc_id(&self) -> Uuid {
        self.doc_id
    }

    pub fn local_user(&self) -> &Participant {
        &self.local_user
    }

    pub fn roster(&self) -> &PresenceRoster {
        &self.roster
    }

    pub fn comments(&self) -> &CommentLog {
        &self.comments
    }

    pub fn mark_connecting(&mut self) {
        self.state = ChannelState::Connecting;
    }

    pub fn mark_open(&mut self) {
        if self.state != ChannelState::Open {
            self.state = ChannelState::Open;
            self.emit(ChannelEvent::Opened);
        }
    }

    pub fn mark_closed(&mut self) {
        if self.state != ChannelState::Closed {
            self.state = ChannelState::Closed;
            self.emit(ChannelEvent::Closed);
        }
    }

    /// Dispatch one inbound message.
    ///
    /// Malformed payloads are logged and ignored; they never affect channel
    /// state. Kinds a client does not consume (`Join`/`Leave`) are ignored.
    pub async fn handle_inbound(&mut self, msg: ChannelMessage) {
        match msg.kind {
            MessageKind::Init => match msg.init_state() {
                Ok(state) => {
                    self.roster.replace_all(state.presence.clone());
                    self.comments.replace_all(state.comments.clone());
                    self.emit(ChannelEvent::PresenceChanged(state.presence));
                    self.emit(ChannelEvent::CommentHistory(state.comments));
                }
                Err(e) => log::warn!("ignoring malformed init message: {e}"),
            },
            MessageKind::Presence => match msg.presence_update() {
                Ok(update) => {
                    self.roster.replace_all(update.participants.clone());
                    self.emit(ChannelEvent::PresenceChanged(update.participants));
                }
                Err(e) => log::warn!("ignoring malformed presence message: {e}"),
            },
            MessageKind::Edit => match msg.edit_event() {
                Ok(event) => self.apply_remote_edit(event).await,
                Err(e) => log::warn!("ignoring malformed edit message: {e}"),
            },
            MessageKind::Comment => {
                // Already appended locally at compose time; the relay
                // rebroadcasts to every attached client including us.
                if msg.origin == self.local_user.user_id {
                    log::trace!("dropping self-echo comment");
                    return;
                }
                match msg.comment_body() {
                    Ok(comment) => {
                        self.comments.append(comment.clone());
                        self.emit(ChannelEvent::CommentReceived(comment));
                    }
                    Err(e) => log::warn!("ignoring malformed comment message: {e}"),
                }
            }
            MessageKind::Join | MessageKind::Leave => {
                log::debug!("ignoring server-bound {:?} message", msg.kind);
            }
        }
    }

    async fn apply_remote_edit(&mut self, event: EditEvent) {
        // Self-echo suppression: the origin tag travels with the event, so
        // this never depends on comparing names against mutable state.
        if event.origin_user == self.local_user.user_id {
            log::trace!("dropping self-echo for {}", event.section_key);
            return;
        }
        let merge = self
            .model
            .write()
            .await
            .merge_remote(&event.section_key, &event.content);
        self.emit(ChannelEvent::RemoteEdit {
            section_key: event.section_key,
            origin_user: event.origin_user,
            merge,
        });
    }

    /// Build the outbound message for a local mutation. Sent on every
    /// mutation with no debounce: the channel is not a durability
    /// mechanism, persistence is.
    pub fn compose_edit(&self, section_key: &str, content: &str) -> Result<ChannelMessage, ProtocolError> {
        let event = EditEvent {
            section_key: section_key.to_string(),
            content: content.to_string(),
            origin_user: self.local_user.user_id,
            timestamp: propel_core::now_millis(),
        };
        ChannelMessage::edit(self.doc_id, &event)
    }

    /// Build the outbound message for a local comment, appending it to the
    /// local log immediately (the relay's echo of it is dropped by origin).
    pub fn compose_comment(&mut self, comment: Comment) -> Result<ChannelMessage, ProtocolError> {
        self.comments.append(comment.clone());
        self.emit(ChannelEvent::CommentReceived(comment.clone()));
        ChannelMessage::comment(self.doc_id, self.local_user.user_id, &comment)
    }

    pub fn compose_join(&self) -> Result<ChannelMessage, ProtocolError> {
        ChannelMessage::join(self.doc_id, &self.local_user)
    }

    pub fn compose_leave(&self) -> ChannelMessage {
        ChannelMessage::leave(self.doc_id, self.local_user.user_id)
    }

    /// Non-blocking emit. The channel mutex is often held while dispatching
    /// inbound frames, so a stalled event consumer must cost dropped events,
    /// never a wedged reader task.
    fn emit(&self, event: ChannelEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            log::warn!("dropping channel event, consumer not draining: {e}");
        }
    }
}
