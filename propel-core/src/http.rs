//! HTTP client for the persistence endpoint.
//!
//! The endpoint accepts a JSON `{session_id, owner_context, name, state}`
//! payload and answers `{session_id}`. A 404 means the referenced session
//! no longer exists server-side and is reported distinctly so the
//! coordinator can apply its one-shot recreate policy.

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::save::{SessionStore, StoreError};
use crate::session::{SaveAck, SavePayload};

pub struct HttpSessionStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSessionStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn save(&self, payload: SavePayload) -> Result<SaveAck, StoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::SessionNotFound),
            status if status.is_success() => response
                .json::<SaveAck>()
                .await
                .map_err(|e| StoreError::Backend(e.to_string())),
            status => Err(StoreError::Backend(format!(
                "unexpected status {status}"
            ))),
        }
    }
}
