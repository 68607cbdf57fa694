//! # propel-core — session persistence core for collaborative drafting
//!
//! The persistence half of the Propel proposal-drafting stack:
//!
//! ```text
//! local edit ──► SectionSet ──► AutosaveScheduler ──► SaveCoordinator
//!                   │               (debounce +           │ (at most one
//!                   │                periodic)            │  in-flight save)
//!                   └── snapshot() ───────────────────────┘
//!                                                         ▼
//!                                                  SessionStore (HTTP)
//! ```
//!
//! ## Modules
//!
//! - [`section`] — the section document model (keys, content, versions,
//!   focus-aware remote merge)
//! - [`session`] — session metadata and save payloads
//! - [`save`] — the save coordinator state machine
//! - [`scheduler`] — debounce + periodic autosave triggers
//! - [`http`] — persistence endpoint client

pub mod http;
pub mod save;
pub mod scheduler;
pub mod section;
pub mod session;

// Re-exports for convenience
pub use http::HttpSessionStore;
pub use save::{
    SaveCoordinator, SaveEvent, SaveOutcome, SaveState, SessionStore, StoreError,
};
pub use scheduler::{AutosaveConfig, AutosaveScheduler};
pub use section::{normalize_key, MergeOutcome, SectionDocument, SectionSet, SectionState};
pub use session::{now_millis, SaveAck, SavePayload, SaveRequest, Session};
