//! Binary wire protocol for the collaboration channel.
//!
//! Envelope (bincode-encoded):
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┐
//! │ kind     │ doc_id   │ origin   │ payload  │
//! │ 1 byte   │ 16 bytes │ 16 bytes │ variable │
//! └──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! `origin` is the sending user (`Uuid::nil()` for server-originated
//! messages). The payload is itself bincode, typed per kind. Frames that
//! fail to decode — malformed bytes or a kind this build does not know —
//! are logged and ignored by receivers, never fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use propel_core::now_millis;

/// Message kinds carried by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// Server → client, once on attach: full presence + comment history.
    Init = 1,
    /// Server → client: full presence set, replaces local state wholesale.
    Presence = 2,
    /// Bidirectional: one section mutation.
    Edit = 3,
    /// Bidirectional: one comment, appended in arrival order.
    Comment = 4,
    /// Client → server: attach to a document room.
    Join = 5,
    /// Client → server: clean detach.
    Leave = 6,
}

/// A participant attached to a document's channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub name: String,
}

impl Participant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    /// Create with explicit user_id (for testing)
    pub fn with_id(user_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            user_id,
            name: name.into(),
        }
    }
}

/// A mutation to one section.
///
/// Carries no ordering token beyond arrival order on the transport: the
/// last arriving edit for a section key wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEvent {
    pub section_key: String,
    pub content: String,
    pub origin_user: Uuid,
    pub timestamp: u64,
}

/// A comment on the response, optionally scoped to one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub content: String,
    pub section_key: Option<String>,
    pub created_at: u64,
}

impl Comment {
    pub fn new(
        author: impl Into<String>,
        content: impl Into<String>,
        section_key: Option<String>,
    ) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            section_key,
            created_at: now_millis(),
        }
    }
}

/// Initial room state sent once on attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitState {
    pub presence: Vec<Participant>,
    pub comments: Vec<Comment>,
}

/// Full presence snapshot. Clients replace, never merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub participants: Vec<Participant>,
}

/// Top-level channel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub kind: MessageKind,
    pub doc_id: Uuid,
    pub origin: Uuid,
    /// Typed payload, bincode-encoded per kind.
    pub payload: Vec<u8>,
}

impl ChannelMessage {
    fn with_payload<T: Serialize>(
        kind: MessageKind,
        doc_id: Uuid,
        origin: Uuid,
        body: &T,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(body, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(Self {
            kind,
            doc_id,
            origin,
            payload,
        })
    }

    pub fn init(doc_id: Uuid, state: &InitState) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageKind::Init, doc_id, Uuid::nil(), state)
    }

    pub fn presence(doc_id: Uuid, update: &PresenceUpdate) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageKind::Presence, doc_id, Uuid::nil(), update)
    }

    pub fn edit(doc_id: Uuid, event: &EditEvent) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageKind::Edit, doc_id, event.origin_user, event)
    }

    pub fn comment(doc_id: Uuid, origin: Uuid, comment: &Comment) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageKind::Comment, doc_id, origin, comment)
    }

    pub fn join(doc_id: Uuid, participant: &Participant) -> Result<Self, ProtocolError> {
        Self::with_payload(MessageKind::Join, doc_id, participant.user_id, participant)
    }

    pub fn leave(doc_id: Uuid, origin: Uuid) -> Self {
        Self {
            kind: MessageKind::Leave,
            doc_id,
            origin,
            payload: Vec::new(),
        }
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(msg)
    }

    fn parse_payload<T: for<'de> Deserialize<'de>>(
        &self,
        expected: MessageKind,
        label: &'static str,
    ) -> Result<T, ProtocolError> {
        if self.kind != expected {
            return Err(ProtocolError::WrongKind(label));
        }
        let (body, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(body)
    }

    pub fn init_state(&self) -> Result<InitState, ProtocolError> {
        self.parse_payload(MessageKind::Init, "init")
    }

    pub fn presence_update(&self) -> Result<PresenceUpdate, ProtocolError> {
        self.parse_payload(MessageKind::Presence, "presence")
    }

    pub fn edit_event(&self) -> Result<EditEvent, ProtocolError> {
        self.parse_payload(MessageKind::Edit, "edit")
    }

    pub fn comment_body(&self) -> Result<Comment, ProtocolError> {
        self.parse_payload(MessageKind::Comment, "comment")
    }

    pub fn participant(&self) -> Result<Participant, ProtocolError> {
        self.parse_payload(MessageKind::Join, "join")
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("message is not a {0} payload")]
    WrongKind(&'static str),
}
