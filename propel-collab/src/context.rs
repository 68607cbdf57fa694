//! Per-document orchestration: one open document wired end to end.
//!
//! A [`DocumentContext`] owns the shared section model and the three
//! moving parts around it — the save coordinator, the autosave scheduler,
//! and the collaboration channel. Opening a document attaches the channel
//! (tolerating failure: an unreachable relay degrades to single-user
//! editing), local edits flow to both the scheduler and the channel, and
//! closing detaches and stops autosave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use propel_core::{
    AutosaveConfig, AutosaveScheduler, SaveCoordinator, SaveEvent, SaveOutcome, SectionSet,
    Session, SessionStore,
};

use crate::channel::{ChannelEvent, DocumentChannel};
use crate::client::ChannelClient;
use crate::protocol::{Comment, Participant};

/// Everything needed to open one document.
pub struct ContextConfig {
    pub doc_id: Uuid,
    pub local_user: Participant,
    pub session: Session,
    pub store: Arc<dyn SessionStore>,
    /// Relay URL, e.g. `ws://127.0.0.1:9090`. `None` opens single-user.
    pub collab_url: Option<String>,
    pub autosave: AutosaveConfig,
    pub save_timeout: Duration,
}

/// One open document, wired end to end.
pub struct DocumentContext {
    model: Arc<RwLock<SectionSet>>,
    coordinator: Arc<SaveCoordinator>,
    scheduler: AutosaveScheduler,
    client: Option<ChannelClient>,
    save_events: Option<mpsc::Receiver<SaveEvent>>,
    channel_events: Option<mpsc::Receiver<ChannelEvent>>,
}

impl DocumentContext {
    /// Open a document: build the model and coordinator, start autosave,
    /// and attach the channel when a relay URL is configured.
    pub async fn open(config: ContextConfig) -> Self {
        let model = Arc::new(RwLock::new(SectionSet::new()));
        let session = Arc::new(RwLock::new(config.session));

        let coordinator = Arc::new(
            SaveCoordinator::new(model.clone(), session, config.store)
                .with_timeout(config.save_timeout),
        );
        let save_events = coordinator.take_event_rx().await;
        let scheduler = AutosaveScheduler::start(coordinator.clone(), config.autosave);

        let (client, channel_events) = match config.collab_url {
            Some(url) => {
                let mut channel =
                    DocumentChannel::new(config.doc_id, config.local_user, model.clone());
                let channel_events = channel.take_event_rx();
                let mut client = ChannelClient::new(Arc::new(Mutex::new(channel)), url);
                if let Err(e) = client.attach().await {
                    // Collaboration is additive: a dead relay never blocks
                    // editing or persistence.
                    log::warn!("collaboration unavailable, editing single-user: {e}");
                }
                (Some(client), channel_events)
            }
            None => (None, None),
        };

        Self {
            model,
            coordinator,
            scheduler,
            client,
            save_events,
            channel_events,
        }
    }

    pub fn model(&self) -> Arc<RwLock<SectionSet>> {
        self.model.clone()
    }

    /// Register a section by display name, returning its key.
    pub async fn register_section(&self, display_name: &str) -> String {
        let key = self.model.write().await.upsert(display_name);
        self.scheduler.note_mutation();
        key
    }

    /// Apply one local edit: update the model, arm autosave, broadcast.
    pub async fn edit_section(&self, key: &str, content: &str) {
        self.model.write().await.set_content(key, content);
        self.scheduler.note_mutation();
        if let Some(client) = &self.client {
            if let Err(e) = client.send_edit(key, content).await {
                log::debug!("edit broadcast skipped: {e}");
            }
        }
    }

    /// Post a comment to the document's channel.
    pub async fn add_comment(&self, comment: Comment) {
        if let Some(client) = &self.client {
            if let Err(e) = client.send_comment(comment).await {
                log::debug!("comment skipped: {e}");
            }
        }
    }

    /// Explicit save, e.g. the user pressed the save button.
    pub async fn save_now(&self) -> SaveOutcome {
        self.coordinator.request_save(true).await
    }

    /// Fire-and-forget save for teardown paths that cannot wait.
    pub fn flush_on_unload(&self) {
        self.coordinator.flush_detached();
    }

    pub async fn take_save_events(&mut self) -> Option<mpsc::Receiver<SaveEvent>> {
        self.save_events.take()
    }

    pub fn take_channel_events(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.channel_events.take()
    }

    /// Close the document: detach the channel and stop autosave.
    pub async fn close(&mut self) {
        if let Some(client) = &mut self.client {
            client.detach().await;
        }
        self.scheduler.shutdown();
    }
}
