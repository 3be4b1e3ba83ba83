use std::sync::Arc;

use bulk_webhook::{
    DeliveryEngine, Dispatcher, DispatcherConfig, Frequency, GlobalSettings, InMemoryRequestLogStore,
    InMemoryWebhookStore, MethodRegistry, MethodSource, Producers, ReqwestTransport, ScriptSandbox,
    Source, WebhookConfig,
};

#[tokio::main]
async fn main() {
    let mut methods = MethodRegistry::new();
    methods.register_fn("open_orders", |_| {
        Ok(serde_json::json!([{ "order": "SO-0001", "total": 120.5 }]))
    });

    let store = Arc::new(InMemoryWebhookStore::new(GlobalSettings::default()));
    store
        .upsert(
            WebhookConfig::new("orders", Source::Method(MethodSource::new("open_orders")))
                .with_url("https://example.com/webhook")
                .with_template(r#"{"orders": {{json data}} }"#)
                .with_secret("supersecret")
                .with_frequency(Frequency::Hourly),
        )
        .await;

    let logs = Arc::new(InMemoryRequestLogStore::new());
    let engine = DeliveryEngine::new(store, logs.clone(), Arc::new(ReqwestTransport::default()))
        .with_producers(Producers::new(None, methods, ScriptSandbox::new()));

    let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(engine));
    let _ = dispatcher.dispatch_due(Frequency::Hourly).await;
    dispatcher.shutdown().await;

    for log in logs.snapshot().await {
        println!("attempt {} -> {:?}", log.attempt, log.status);
    }
}
