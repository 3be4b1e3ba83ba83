use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::engine::DeliveryEngine;
use crate::error::{DeliveryOutcome, DispatchError};
use crate::types::{Frequency, WebhookConfig, WebhookId};
use crate::worker::{worker_loop, Job, JobReport, Trigger, WorkerContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Number of jobs that may run at the same time.
    pub worker_count: usize,
    /// Jobs waiting for a worker before `dispatch_*` calls start to wait.
    pub queue_size: usize,
    /// Failed jobs kept for inspection; oldest are dropped first.
    pub failure_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            worker_count,
            queue_size: 1_000,
            failure_capacity: 1_000,
        }
    }
}

/// Decides who may trigger a webhook by hand.
#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn can_send(&self, user: &str, config: &WebhookConfig) -> bool;
}

/// Grants every user access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessControl for AllowAll {
    async fn can_send(&self, _user: &str, _config: &WebhookConfig) -> bool {
        true
    }
}

/// A job whose delivery failed, kept for operators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub job: Job,
    pub error: String,
    /// The webhook itself is misconfigured; retrying will not help.
    pub config_error: bool,
    pub failed_at: DateTime<Utc>,
}

/// Counters over the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl DispatchStats {
    /// Jobs that ran to an outcome.
    pub fn finished(&self) -> u64 {
        self.delivered + self.skipped + self.failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

/// Fans delivery jobs out to a pool of background workers.
///
/// Jobs are independent: a failing job never affects its siblings, and
/// callers never wait for delivery to finish.
pub struct Dispatcher {
    job_tx: Option<mpsc::Sender<Job>>,
    is_running: Arc<AtomicBool>,
    worker_handles: Vec<JoinHandle<()>>,
    report_handle: Option<JoinHandle<()>>,
    engine: Arc<DeliveryEngine>,
    access: Arc<dyn AccessControl>,
    failures: Arc<Mutex<VecDeque<JobFailure>>>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, engine: Arc<DeliveryEngine>) -> Self {
        let (job_tx, job_rx) = mpsc::channel(config.queue_size.max(1));
        let shared_job_rx = Arc::new(Mutex::new(job_rx));

        let (report_tx, report_rx) = mpsc::channel(config.queue_size.max(1));

        let ctx = Arc::new(WorkerContext {
            engine: engine.clone(),
            report_tx,
        });

        let mut worker_handles = Vec::new();
        for _ in 0..config.worker_count.max(1) {
            worker_handles.push(tokio::spawn(worker_loop(
                shared_job_rx.clone(),
                ctx.clone(),
            )));
        }
        // Workers own the only report senders; the report loop ends when they do.
        drop(ctx);

        let failures = Arc::new(Mutex::new(VecDeque::new()));
        let counters = Arc::new(Counters::default());
        let report_handle = tokio::spawn(report_loop(
            report_rx,
            failures.clone(),
            counters.clone(),
            config.failure_capacity,
        ));

        Self {
            job_tx: Some(job_tx),
            is_running: Arc::new(AtomicBool::new(true)),
            worker_handles,
            report_handle: Some(report_handle),
            engine,
            access: Arc::new(AllowAll),
            failures,
            counters,
        }
    }

    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    /// Enqueue one job per enabled webhook with the given frequency.
    ///
    /// Returns the number of jobs enqueued.
    pub async fn dispatch_due(&self, frequency: Frequency) -> Result<usize, DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Shutdown);
        }

        let due = self.engine.store().list_enabled(frequency).await?;
        let mut enqueued = 0usize;
        for config in due.into_iter().filter(|c| c.enabled && c.frequency == frequency) {
            self.enqueue(Job {
                webhook_id: config.id,
                trigger: Trigger::Scheduled { frequency },
            })
            .await?;
            enqueued += 1;
        }

        tracing::info!(?frequency, enqueued, "scheduled webhooks dispatched");
        Ok(enqueued)
    }

    /// Validate and enqueue a single webhook on behalf of `user`.
    pub async fn dispatch_now(&self, webhook_id: &WebhookId, user: &str) -> Result<(), DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Shutdown);
        }

        let store = self.engine.store();
        let config = store
            .get(webhook_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(webhook_id.clone()))?;

        if !self.access.can_send(user, &config).await {
            metric_inc("webhook.dispatch.denied");
            return Err(DispatchError::PermissionDenied {
                user: user.to_string(),
                webhook_id: webhook_id.clone(),
            });
        }

        let settings = store.settings().await?;
        config.validate(&settings)?;

        self.enqueue(Job {
            webhook_id: config.id,
            trigger: Trigger::Manual { user: user.to_string() },
        })
        .await
    }

    async fn enqueue(&self, job: Job) -> Result<(), DispatchError> {
        let tx = self.job_tx.as_ref().ok_or(DispatchError::Shutdown)?;
        tx.send(job).await.map_err(|_| DispatchError::Shutdown)?;
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        metric_inc("webhook.dispatch.enqueued");
        Ok(())
    }

    /// Stop accepting jobs, let queued ones finish, and wait for the workers.
    pub async fn shutdown(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.job_tx.take();

        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }

        if let Some(handle) = self.report_handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub async fn failed_jobs(&self) -> Vec<JobFailure> {
        let guard = self.failures.lock().await;
        guard.iter().cloned().collect()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

async fn report_loop(
    mut report_rx: mpsc::Receiver<JobReport>,
    failures: Arc<Mutex<VecDeque<JobFailure>>>,
    counters: Arc<Counters>,
    capacity: usize,
) {
    while let Some(report) = report_rx.recv().await {
        handle_report(report, &failures, &counters, capacity).await;
    }
}

async fn handle_report(
    report: JobReport,
    failures: &Mutex<VecDeque<JobFailure>>,
    counters: &Counters,
    capacity: usize,
) {
    match report.result {
        Ok(DeliveryOutcome::Delivered { .. }) => {
            counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(DeliveryOutcome::Skipped) => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            let entry = JobFailure {
                job: report.job,
                error: err.to_string(),
                config_error: err.is_config(),
                failed_at: Utc::now(),
            };
            let mut guard = failures.lock().await;
            guard.push_back(entry);
            while guard.len() > capacity {
                guard.pop_front();
            }
        }
    }
}
