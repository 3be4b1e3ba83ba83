use async_trait::async_trait;
use tokio_postgres::Client;

use crate::error::StorageError;
use crate::storage::RequestLogStore;
use crate::types::{RequestLog, WebhookId};

/// Request logs stored one row per attempt.
pub struct PostgresRequestLogStore {
    client: Client,
}

impl PostgresRequestLogStore {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS webhook_request_log (
                    id UUID PRIMARY KEY,
                    webhook_id TEXT NOT NULL,
                    payload JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL
                )",
                &[],
            )
            .await?;

        Ok(Self { client })
    }

    /// Every log for one webhook, oldest first.
    pub async fn for_webhook(&self, id: &WebhookId) -> Result<Vec<RequestLog>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM webhook_request_log
                 WHERE webhook_id = $1
                 ORDER BY created_at",
                &[&id.0],
            )
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let value: serde_json::Value = row
                    .try_get(0)
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                serde_json::from_value(value).map_err(|source| StorageError::Serde { source })
            })
            .collect()
    }
}

#[async_trait]
impl RequestLogStore for PostgresRequestLogStore {
    async fn append(&self, log: &RequestLog) -> Result<(), StorageError> {
        let payload = serde_json::to_value(log).map_err(|source| StorageError::Serde { source })?;
        self.client
            .execute(
                "INSERT INTO webhook_request_log (id, webhook_id, payload, created_at)
                 VALUES ($1, $2, $3, $4)",
                &[&log.id, &log.webhook_id.0, &payload, &log.created_at],
            )
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
