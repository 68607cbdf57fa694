//! # propel-collab — Real-time collaboration layer for Propel
//!
//! WebSocket-based shared editing of a sectioned proposal draft, built on
//! a last-writer-wins model rather than CRDTs: edits carry whole-section
//! content, the relay fans them out in arrival order, and clients suppress
//! their own echoes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     WebSocket      ┌─────────────┐
//! │ ChannelClient │ ◄─────────────────► │ RelayServer │
//! │ (per user)    │    Binary Proto     │ (central)   │
//! └──────┬────────┘                     └──────┬──────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌───────────────┐                     ┌─────────────┐
//! │DocumentChannel│                     │ Room        │
//! │ roster/log/   │                     │ presence +  │
//! │ merge_remote  │                     │ comments    │
//! └──────┬────────┘                     └─────────────┘
//!        │
//!        ▼
//! ┌───────────────┐
//! │ SectionSet    │  (shared with the save path in propel-core)
//! └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary wire protocol (bincode-encoded ChannelMessage)
//! - [`presence`] — Participant roster and comment log
//! - [`channel`] — Per-document state machine and inbound dispatch
//! - [`client`] — WebSocket attachment (no reconnect by design)
//! - [`relay`] — Room-based relay server
//! - [`context`] — One open document wired end to end

pub mod channel;
pub mod client;
pub mod context;
pub mod presence;
pub mod protocol;
pub mod relay;

// Re-exports for convenience
pub use channel::{ChannelEvent, ChannelState, DocumentChannel};
pub use client::{ChannelClient, ChannelError};
pub use context::{ContextConfig, DocumentContext};
pub use presence::{CommentLog, PresenceRoster};
pub use protocol::{
    ChannelMessage, Comment, EditEvent, InitState, MessageKind, Participant, PresenceUpdate,
    ProtocolError,
};
pub use relay::{RelayConfig, RelayServer};
