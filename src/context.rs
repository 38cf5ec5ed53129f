//! Application context
//!
//! Wires the local store, the analytics aggregator, the AI client and the
//! conversation store together from one [`Config`]. Commands build one of
//! these instead of reaching for globals.

use crate::analytics::{AnalyticsService, AnalyticsSnapshot, SharedAnalytics};
use crate::chat::ConversationStore;
use crate::config::Config;
use crate::error::{HelpdeskError, Result};
use crate::providers::{create_provider, AiClient, OfflineProvider, Provider};
use crate::storage::{self, KeyValueStore};
use crate::upload::UploadClient;
use std::sync::Arc;

pub struct AppContext {
    pub config: Config,
    pub storage: Arc<dyn KeyValueStore>,
    pub analytics: SharedAnalytics,
}

impl AppContext {
    /// Open the configured store and start an analytics session on it
    pub fn new(config: Config) -> Self {
        let storage = storage::open_store(&config.storage);
        Self::with_storage(config, storage)
    }

    /// Build a context over an already opened store
    pub fn with_storage(config: Config, storage: Arc<dyn KeyValueStore>) -> Self {
        let analytics = AnalyticsService::new(storage.clone()).shared();
        Self {
            config,
            storage,
            analytics,
        }
    }

    /// AI client for the configured assistant
    ///
    /// # Errors
    ///
    /// Returns `HelpdeskError::MissingCredentials` when no valid API key is
    /// configured
    pub fn client(&self) -> Result<Arc<AiClient>> {
        create_provider(&self.config.assistant)
    }

    /// Conversation store that answers through `provider`
    pub fn conversation_store(&self, provider: Arc<dyn Provider>) -> ConversationStore {
        ConversationStore::new(provider, self.storage.clone(), Some(self.analytics.clone()))
    }

    /// Conversation store for commands that never send messages
    pub fn offline_store(&self) -> ConversationStore {
        self.conversation_store(Arc::new(OfflineProvider))
    }

    /// Client for the upload route of the service behind `proxy_url`
    ///
    /// # Errors
    ///
    /// Returns error if `proxy_url` is not a valid URL
    pub fn upload_client(&self) -> Result<UploadClient> {
        let base = self.config.assistant.service_base()?;
        Ok(UploadClient::new(&base, self.config.server.max_upload_bytes))
    }

    fn with_analytics<T>(&self, f: impl FnOnce(&mut AnalyticsService) -> T) -> Result<T> {
        let mut service = self
            .analytics
            .lock()
            .map_err(|_| HelpdeskError::Storage("analytics lock poisoned".to_string()))?;
        Ok(f(&mut service))
    }

    /// Current analytics report
    ///
    /// # Errors
    ///
    /// Returns error if the analytics lock is poisoned
    pub fn analytics_snapshot(&self) -> Result<AnalyticsSnapshot> {
        self.with_analytics(|a| a.snapshot())
    }

    /// Discard the analytics aggregate
    ///
    /// # Errors
    ///
    /// Returns error if the analytics lock is poisoned
    pub fn reset_analytics(&self) -> Result<()> {
        self.with_analytics(|a| a.reset())
    }
}
