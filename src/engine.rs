//! Delivery engine.
//!
//! One delivery job runs `produce → render → sign → send` for a single webhook.
//! Sending makes at most [`MAX_ATTEMPTS`] attempts, logging each one before the
//! next starts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::{ConfigError, DeliveryError, DeliveryOutcome, FailureReason};
use crate::headers::resolve_headers;
use crate::render::TemplateRenderer;
use crate::signing::sign_payload;
use crate::source::Producers;
use crate::storage::{RequestLogStore, WebhookStore};
use crate::transport::{OutboundRequest, Transport, TransportResponse};
use crate::types::{GlobalSettings, RequestLog, WebhookConfig, WebhookId};

/// Attempts per delivery job, including the first.
pub const MAX_ATTEMPTS: u32 = 3;

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout for a single HTTP attempt.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Unit of the `3 * attempt + 1` backoff.
    #[serde(default = "default_backoff_unit", with = "humantime_serde")]
    pub backoff_unit: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            backoff_unit: default_backoff_unit(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_backoff_unit() -> Duration {
    Duration::from_secs(1)
}

/// Pause after failed attempt `attempt_index` (0-based): 1, 4, 7 units.
pub fn backoff_delay(attempt_index: u32, unit: Duration) -> Duration {
    unit.saturating_mul(3 * attempt_index + 1)
}

/// State of one attempt, turned into a [`RequestLog`] once its outcome is known.
struct DeliveryAttempt<'a> {
    config: &'a WebhookConfig,
    request: &'a OutboundRequest,
    index: u32,
}

impl DeliveryAttempt<'_> {
    fn log(&self, response: Option<&TransportResponse>) -> RequestLog {
        RequestLog {
            id: Uuid::new_v4(),
            webhook_id: self.config.id.clone(),
            user: self.config.user.clone(),
            url: self.request.url.clone(),
            headers: self.request.headers.clone(),
            payload: String::from_utf8_lossy(&self.request.body).into_owned(),
            response: response.map(|r| r.body.clone()),
            status: response.map(|r| r.status),
            attempt: self.index + 1,
            created_at: Utc::now(),
        }
    }
}

pub struct DeliveryEngine {
    store: Arc<dyn WebhookStore>,
    logs: Arc<dyn RequestLogStore>,
    transport: Arc<dyn Transport>,
    producers: Producers,
    renderer: TemplateRenderer,
    config: EngineConfig,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        logs: Arc<dyn RequestLogStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            logs,
            transport,
            producers: Producers::default(),
            renderer: TemplateRenderer::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_producers(mut self, producers: Producers) -> Self {
        self.producers = producers;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn WebhookStore> {
        &self.store
    }

    /// Delivery job entry point.
    pub async fn deliver(&self, id: &WebhookId) -> Result<DeliveryOutcome, DeliveryError> {
        let (config, settings) = self.load(id).await?;
        self.deliver_config(&config, &settings).await
    }

    /// Delivery entry point for scheduled runs.
    ///
    /// A webhook disabled after it was scheduled ends as [`DeliveryOutcome::Skipped`].
    pub async fn deliver_if_enabled(&self, id: &WebhookId) -> Result<DeliveryOutcome, DeliveryError> {
        let (config, settings) = self.load(id).await?;
        if !config.enabled {
            tracing::debug!(webhook = %config.id, "webhook disabled since it was scheduled, skipping");
            metric_inc("webhook.delivery.skipped");
            return Ok(DeliveryOutcome::Skipped);
        }
        self.deliver_config(&config, &settings).await
    }

    async fn load(&self, id: &WebhookId) -> Result<(WebhookConfig, GlobalSettings), DeliveryError> {
        let config = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(id.clone()))?;
        let settings = self.store.settings().await?;
        Ok((config, settings))
    }

    /// Run the full pipeline against a config snapshot.
    pub async fn deliver_config(
        &self,
        config: &WebhookConfig,
        settings: &GlobalSettings,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let records = match self.producers.produce(config).await? {
            Some(records) if !records.is_empty() => records,
            _ => {
                tracing::debug!(webhook = %config.id, "no data, skipping");
                metric_inc("webhook.delivery.skipped");
                return Ok(DeliveryOutcome::Skipped);
            }
        };

        let Some(body) = self.renderer.render(&records, config.template.as_deref())? else {
            tracing::debug!(webhook = %config.id, "rendered payload is empty, skipping");
            metric_inc("webhook.delivery.skipped");
            return Ok(DeliveryOutcome::Skipped);
        };

        let url = config
            .resolve_url(settings)
            .ok_or(ConfigError::MissingUrl)?
            .to_string();
        let signature = sign_payload(config, &body)?;
        let headers = resolve_headers(config, settings, signature.as_deref())?;

        let request = OutboundRequest {
            method: config.request_method,
            url,
            headers,
            body,
            timeout: self.config.request_timeout,
        };
        self.send_with_retry(config, &request).await
    }

    async fn send_with_retry(
        &self,
        config: &WebhookConfig,
        request: &OutboundRequest,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let mut index = 0;
        loop {
            let attempt = DeliveryAttempt { config, request, index };
            tracing::debug!(
                webhook = %config.id,
                method = request.method.as_str(),
                url = %request.url,
                attempt = index + 1,
                "sending webhook"
            );
            let result = self.transport.send(request).await;
            self.logs.append(&attempt.log(result.as_ref().ok())).await?;

            let reason = match result {
                Ok(response) if response.is_success() => {
                    tracing::info!(
                        webhook = %config.id,
                        attempt = index + 1,
                        status = response.status,
                        "webhook delivered"
                    );
                    metric_inc("webhook.delivery.success");
                    return Ok(DeliveryOutcome::Delivered {
                        attempts: index + 1,
                        status: response.status,
                    });
                }
                Ok(response) => FailureReason::Status(response.status),
                Err(reason) => reason,
            };

            metric_inc("webhook.delivery.failure");
            if index + 1 >= MAX_ATTEMPTS {
                tracing::error!(webhook = %config.id, url = %request.url, error = %reason, "webhook delivery exhausted");
                metric_inc("webhook.delivery.exhausted");
                return Err(DeliveryError::Exhausted {
                    attempts: index + 1,
                    last: reason,
                });
            }

            let delay = backoff_delay(index, self.config.backoff_unit);
            tracing::warn!(
                webhook = %config.id,
                attempt = index + 1,
                error = %reason,
                retry_in = ?delay,
                "webhook attempt failed"
            );
            sleep(delay).await;
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(0, unit), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, unit), Duration::from_secs(4));
        assert_eq!(backoff_delay(2, unit), Duration::from_secs(7));
    }

    #[test]
    fn test_engine_config_parses_human_durations() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"request_timeout": "2s", "backoff_unit": "250ms"}"#).unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.backoff_unit, Duration::from_millis(250));

        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
