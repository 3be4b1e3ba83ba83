use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::Instrument;

use crate::engine::DeliveryEngine;
use crate::error::{DeliveryError, DeliveryOutcome};
use crate::types::{Frequency, WebhookId};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// What caused a job to be enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Scheduled { frequency: Frequency },
    Manual { user: String },
}

/// A unit of work consumed by workers.
///
/// Jobs carry only the webhook id; the worker loads a fresh config snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub webhook_id: WebhookId,
    pub trigger: Trigger,
}

/// Result of running one job, sent back to the dispatcher.
#[derive(Debug)]
pub struct JobReport {
    pub job: Job,
    pub result: Result<DeliveryOutcome, DeliveryError>,
}

/// Shared, read-only context for all workers.
pub struct WorkerContext {
    pub engine: Arc<DeliveryEngine>,

    /// Reports from workers to the dispatcher.
    pub report_tx: mpsc::Sender<JobReport>,
}

/// Main worker loop.
///
/// Each worker pulls jobs from the shared queue and runs them to completion,
/// retries and backoff included, before taking the next one.
pub async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(job) = job else { break };

        let report = process_job(job, &ctx).await;
        let _ = ctx.report_tx.send(report).await;
    }
}

async fn process_job(job: Job, ctx: &WorkerContext) -> JobReport {
    let span = tracing::info_span!("webhook_job", webhook = %job.webhook_id, trigger = ?job.trigger);
    let result = match job.trigger {
        Trigger::Scheduled { .. } => ctx.engine.deliver_if_enabled(&job.webhook_id).instrument(span).await,
        Trigger::Manual { .. } => ctx.engine.deliver(&job.webhook_id).instrument(span).await,
    };

    match &result {
        Ok(DeliveryOutcome::Delivered { .. }) => metric_inc("webhook.job.delivered"),
        Ok(DeliveryOutcome::Skipped) => metric_inc("webhook.job.skipped"),
        Err(err) => {
            tracing::error!(webhook = %job.webhook_id, error = %err, "webhook job failed");
            metric_inc("webhook.job.failed");
        }
    }

    JobReport { job, result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::source::{MethodRegistry, Producers};
    use crate::storage::{InMemoryRequestLogStore, InMemoryWebhookStore};
    use crate::transport::{OutboundRequest, Transport, TransportResponse};
    use crate::types::{GlobalSettings, MethodSource, Source, WebhookConfig};
    use crate::sandbox::ScriptSandbox;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport(AtomicUsize);

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _request: &OutboundRequest) -> Result<TransportResponse, FailureReason> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(TransportResponse { status: 200, body: String::new() })
        }
    }

    async fn context() -> (WorkerContext, Arc<CountingTransport>, mpsc::Receiver<JobReport>) {
        let store = Arc::new(InMemoryWebhookStore::new(GlobalSettings::default()));
        store
            .upsert(
                WebhookConfig::new("orders", Source::Method(MethodSource::new("orders")))
                    .with_url("https://hooks.example.com/in")
                    .with_enabled(false),
            )
            .await;

        let mut methods = MethodRegistry::new();
        methods.register_fn("orders", |_| Ok(serde_json::json!([{ "a": 1 }])));

        let transport = Arc::new(CountingTransport::default());
        let engine = DeliveryEngine::new(store, Arc::new(InMemoryRequestLogStore::new()), transport.clone())
            .with_producers(Producers::new(None, methods, ScriptSandbox::new()));
        let (report_tx, report_rx) = mpsc::channel(4);
        let ctx = WorkerContext {
            engine: Arc::new(engine),
            report_tx,
        };
        (ctx, transport, report_rx)
    }

    #[tokio::test]
    async fn test_scheduled_job_rechecks_enabled_flag() {
        let (ctx, transport, _rx) = context().await;
        let job = Job {
            webhook_id: WebhookId::new("orders"),
            trigger: Trigger::Scheduled { frequency: Frequency::Daily },
        };

        let report = process_job(job, &ctx).await;
        assert!(matches!(report.result, Ok(DeliveryOutcome::Skipped)));
        assert_eq!(transport.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_manual_job_sends_disabled_webhook() {
        let (ctx, transport, _rx) = context().await;
        let job = Job {
            webhook_id: WebhookId::new("orders"),
            trigger: Trigger::Manual { user: "alice".into() },
        };

        let report = process_job(job, &ctx).await;
        assert!(matches!(report.result, Ok(DeliveryOutcome::Delivered { attempts: 1, status: 200 })));
        assert_eq!(transport.0.load(Ordering::SeqCst), 1);
    }
}
