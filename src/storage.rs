use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

use crate::error::StorageError;
use crate::types::{Frequency, GlobalSettings, RequestLog, WebhookConfig, WebhookId};

/// Append-only sink for request logs.
///
/// Implementations must accept concurrent appends from parallel jobs;
/// each call writes exactly one record.
#[async_trait]
pub trait RequestLogStore: Send + Sync {
    async fn append(&self, log: &RequestLog) -> Result<(), StorageError>;
}

/// Read access to webhook configuration, owned by the host application.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn get(&self, id: &WebhookId) -> Result<Option<WebhookConfig>, StorageError>;

    /// Every *enabled* webhook with the given frequency.
    async fn list_enabled(&self, frequency: Frequency) -> Result<Vec<WebhookConfig>, StorageError>;

    async fn settings(&self) -> Result<GlobalSettings, StorageError>;
}

/// In-memory request log for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryRequestLogStore {
    logs: Mutex<Vec<RequestLog>>,
}

impl InMemoryRequestLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<RequestLog> {
        self.logs.lock().await.clone()
    }

    pub async fn for_webhook(&self, id: &WebhookId) -> Vec<RequestLog> {
        self.logs
            .lock()
            .await
            .iter()
            .filter(|log| &log.webhook_id == id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RequestLogStore for InMemoryRequestLogStore {
    async fn append(&self, log: &RequestLog) -> Result<(), StorageError> {
        self.logs.lock().await.push(log.clone());
        Ok(())
    }
}

/// In-memory webhook configuration.
#[derive(Default)]
pub struct InMemoryWebhookStore {
    webhooks: RwLock<HashMap<WebhookId, WebhookConfig>>,
    settings: RwLock<GlobalSettings>,
}

impl InMemoryWebhookStore {
    pub fn new(settings: GlobalSettings) -> Self {
        Self {
            webhooks: RwLock::new(HashMap::new()),
            settings: RwLock::new(settings),
        }
    }

    /// Seed from a JSON document `{"settings": {...}, "webhooks": [...]}`.
    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        #[derive(serde::Deserialize)]
        struct Seed {
            #[serde(default)]
            settings: GlobalSettings,
            #[serde(default)]
            webhooks: Vec<WebhookConfig>,
        }

        let seed: Seed = serde_json::from_str(raw).map_err(|source| StorageError::Serde { source })?;
        let webhooks = seed
            .webhooks
            .into_iter()
            .map(|config| (config.id.clone(), config))
            .collect();
        Ok(Self {
            webhooks: RwLock::new(webhooks),
            settings: RwLock::new(seed.settings),
        })
    }

    pub async fn upsert(&self, config: WebhookConfig) {
        self.webhooks.write().await.insert(config.id.clone(), config);
    }

    pub async fn set_settings(&self, settings: GlobalSettings) {
        *self.settings.write().await = settings;
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn get(&self, id: &WebhookId) -> Result<Option<WebhookConfig>, StorageError> {
        Ok(self.webhooks.read().await.get(id).cloned())
    }

    async fn list_enabled(&self, frequency: Frequency) -> Result<Vec<WebhookConfig>, StorageError> {
        let mut due: Vec<WebhookConfig> = self
            .webhooks
            .read()
            .await
            .values()
            .filter(|config| config.enabled && config.frequency == frequency)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(due)
    }

    async fn settings(&self) -> Result<GlobalSettings, StorageError> {
        Ok(self.settings.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MethodSource, Source};

    #[tokio::test]
    async fn test_list_enabled_filters_frequency_and_flag() {
        let store = InMemoryWebhookStore::default();
        let source = || Source::Method(MethodSource::new("orders"));
        store.upsert(WebhookConfig::new("a", source()).with_frequency(Frequency::Daily)).await;
        store.upsert(WebhookConfig::new("b", source()).with_frequency(Frequency::Daily).with_enabled(false)).await;
        store.upsert(WebhookConfig::new("c", source()).with_frequency(Frequency::Weekly)).await;

        let due = store.list_enabled(Frequency::Daily).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, WebhookId::new("a"));
    }

    #[tokio::test]
    async fn test_from_json_seed() {
        let store = InMemoryWebhookStore::from_json(
            r#"{
                "settings": {"url": "https://fallback.example.com", "headers": [{"key": "X-A", "value": "1"}]},
                "webhooks": [{"id": "w", "source": {"kind": "method", "method": "orders"}}]
            }"#,
        )
        .unwrap();
        assert!(store.get(&WebhookId::new("w")).await.unwrap().is_some());
        assert_eq!(store.settings().await.unwrap().headers.len(), 1);
        assert!(InMemoryWebhookStore::from_json("{not json").is_err());
    }
}
