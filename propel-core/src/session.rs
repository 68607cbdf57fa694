//! Session metadata and persistence payloads.
//!
//! A session identifies one persisted draft. It is created implicitly on the
//! first successful save (until then `session_id` is `None`), rehydrated by a
//! load, and never deleted by this layer.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::section::SectionState;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One persisted draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// `None` until the first successful save creates the server-side
    /// session.
    pub session_id: Option<String>,
    /// Opaque association to the opportunity/record this draft belongs to.
    pub owner_context: String,
    /// Human-readable draft name.
    pub name: String,
    pub last_saved_at: Option<u64>,
}

impl Session {
    /// A brand-new draft with no server-side session yet.
    pub fn new(owner_context: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            session_id: None,
            owner_context: owner_context.into(),
            name: name.into(),
            last_saved_at: None,
        }
    }

    /// A draft rehydrated from a previously persisted session.
    pub fn rehydrated(
        session_id: impl Into<String>,
        owner_context: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: Some(session_id.into()),
            owner_context: owner_context.into(),
            name: name.into(),
            last_saved_at: None,
        }
    }
}

/// The serialized snapshot of all sections at one moment.
///
/// Ephemeral: constructed fresh for each persistence attempt, never mutated
/// in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRequest {
    pub sections: Vec<SectionState>,
    pub captured_at: u64,
}

impl SaveRequest {
    pub fn from_snapshot(sections: Vec<SectionState>) -> Self {
        Self {
            sections,
            captured_at: now_millis(),
        }
    }
}

/// What gets submitted to the persistence endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavePayload {
    pub session_id: Option<String>,
    pub owner_context: String,
    pub name: String,
    pub state: SaveRequest,
}

/// Persistence endpoint response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveAck {
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_has_no_id() {
        let session = Session::new("opportunity-17", "FY26 Response");
        assert!(session.session_id.is_none());
        assert!(session.last_saved_at.is_none());
        assert_eq!(session.owner_context, "opportunity-17");
    }

    #[test]
    fn test_rehydrated_session_keeps_id() {
        let session = Session::rehydrated("abc-123", "opportunity-17", "FY26 Response");
        assert_eq!(session.session_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_save_payload_serializes_null_session_id() {
        let payload = SavePayload {
            session_id: None,
            owner_context: "opp".into(),
            name: "draft".into(),
            state: SaveRequest::from_snapshot(Vec::new()),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["session_id"].is_null());
        assert!(json["state"]["sections"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_now_millis_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        assert!(a > 1_500_000_000_000); // sanity: later than 2017
    }
}
