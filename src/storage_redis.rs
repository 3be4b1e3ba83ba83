use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::StorageError;
use crate::storage::RequestLogStore;
use crate::types::RequestLog;

/// Request logs kept as JSON entries in a Redis list.
pub struct RedisRequestLogStore {
    client: redis::Client,
    prefix: String,
}

impl RedisRequestLogStore {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn log_key(&self) -> String {
        format!("{}:request_log", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::Connection, StorageError> {
        self.client
            .get_tokio_connection()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// The last `count` logs, oldest first.
    pub async fn recent(&self, count: usize) -> Result<Vec<RequestLog>, StorageError> {
        let mut conn = self.connection().await?;
        let start = -(count.max(1) as isize);
        let values: Vec<String> = conn
            .lrange(self.log_key(), start, -1)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        values
            .iter()
            .map(|v| serde_json::from_str(v).map_err(|source| StorageError::Serde { source }))
            .collect()
    }
}

#[async_trait]
impl RequestLogStore for RedisRequestLogStore {
    async fn append(&self, log: &RequestLog) -> Result<(), StorageError> {
        let payload = serde_json::to_string(log).map_err(|source| StorageError::Serde { source })?;
        let mut conn = self.connection().await?;
        conn.rpush::<_, _, ()>(self.log_key(), payload)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }
}
