#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulk_webhook::{
    DeliveryEngine, EngineConfig, FailureReason, GlobalSettings, InMemoryRequestLogStore,
    InMemoryWebhookStore, MethodRegistry, OutboundRequest, Producers, ReportEngine, ScriptSandbox,
    Transport, TransportResponse,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

pub type Reply = Result<TransportResponse, FailureReason>;

pub fn status(code: u16) -> Reply {
    Ok(TransportResponse {
        status: code,
        body: format!("status {code}"),
    })
}

/// Transport that replays scripted replies per URL and records every request.
///
/// URLs without a script (or whose script ran out) get a 200.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    sent: Mutex<Vec<(Instant, OutboundRequest)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn script(&self, url: &str, replies: Vec<Reply>) {
        self.replies.lock().await.insert(url.to_string(), replies.into());
    }

    pub async fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().await.iter().map(|(_, r)| r.clone()).collect()
    }

    pub async fn sent_at(&self) -> Vec<Instant> {
        self.sent.lock().await.iter().map(|(at, _)| *at).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> Reply {
        self.sent.lock().await.push((Instant::now(), request.clone()));
        let mut replies = self.replies.lock().await;
        replies
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| status(200))
    }
}

pub struct Harness {
    pub store: Arc<InMemoryWebhookStore>,
    pub logs: Arc<InMemoryRequestLogStore>,
    pub transport: Arc<ScriptedTransport>,
    pub engine: Arc<DeliveryEngine>,
}

pub fn harness(
    methods: MethodRegistry,
    report_engine: Option<Arc<dyn ReportEngine>>,
    backoff_unit: Duration,
) -> Harness {
    let store = Arc::new(InMemoryWebhookStore::new(GlobalSettings::default()));
    let logs = Arc::new(InMemoryRequestLogStore::new());
    let transport = ScriptedTransport::new();

    let engine = DeliveryEngine::new(store.clone(), logs.clone(), transport.clone())
        .with_producers(Producers::new(report_engine, methods, ScriptSandbox::new()))
        .with_config(EngineConfig {
            request_timeout: Duration::from_secs(5),
            backoff_unit,
        });

    Harness {
        store,
        logs,
        transport,
        engine: Arc::new(engine),
    }
}

/// A registry with `orders` returning `[{"a":1}]` and `nothing` returning `[]`.
pub fn sample_methods() -> MethodRegistry {
    let mut methods = MethodRegistry::new();
    methods.register_fn("orders", |_| Ok(serde_json::json!([{ "a": 1 }])));
    methods.register_fn("nothing", |_| Ok(serde_json::json!([])));
    methods
}
