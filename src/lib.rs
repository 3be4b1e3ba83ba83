//! Scheduled, signed, batched webhook delivery.
//!
//! A webhook config names a payload source (a report, a registered method or
//! a sandboxed script). A delivery job produces the records, optionally
//! renders them through a template, signs the exact body bytes and sends them
//! with a fixed retry budget. Every HTTP attempt leaves one request log.
//!
//! ## Guarantees
//! - At most 3 attempts per job, backing off 1, 4 and 7 units between them
//! - Exactly one request log per HTTP attempt
//! - Signature computed over the bytes actually sent
//! - Independent jobs; one failure never affects another
//!
//! ## Non-Guarantees
//! - Delivery beyond the retry budget
//! - Exactly-once delivery
//! - Durability of queued jobs across restarts
//!
//! Scheduling, configuration storage and the report backend belong to the
//! host; they plug in through [`WebhookStore`], [`ReportEngine`] and
//! [`AccessControl`].

mod autocomplete;
mod dispatcher;
mod engine;
mod error;
mod headers;
mod render;
mod sandbox;
mod signing;
mod source;
mod storage;
mod transport;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use autocomplete::{
    autocompletion_items,
    completion_items,
    invalidate_autocompletion_items,
    CompletionCache,
    CompletionItem,
    Namespace,
    NamespaceEntry,
};
pub use dispatcher::{AccessControl, AllowAll, DispatchStats, Dispatcher, DispatcherConfig, JobFailure};
pub use engine::{backoff_delay, DeliveryEngine, EngineConfig, MAX_ATTEMPTS};
pub use error::{
    ConfigError,
    DeliveryError,
    DeliveryOutcome,
    DispatchError,
    FailureReason,
    SourceError,
    StorageError,
};
pub use headers::{resolve_headers, validate_headers, Headers};
pub use render::{format_duration, stringify_records, validate_template, TemplateRenderer};
pub use sandbox::ScriptSandbox;
pub use signing::{
    compute_signature,
    sign_payload,
    verify_signature,
    verify_webhook_request,
    VerificationError,
    SIGNATURE_HEADER,
};
pub use source::{
    date_range,
    prepare_filters,
    records_from_value,
    MethodRegistry,
    MethodResult,
    ProduceContext,
    Producer,
    Producers,
    ReportEngine,
    ReportQuery,
    WebhookMethod,
    INDEX_FIELD,
    SCRIPT_GLOBALS,
};
pub use storage::{InMemoryRequestLogStore, InMemoryWebhookStore, RequestLogStore, WebhookStore};
pub use transport::{OutboundRequest, Transport, TransportResponse};
pub use types::{
    DatePeriod,
    DynamicDateFilter,
    Field,
    FilterMeta,
    Frequency,
    GlobalSettings,
    HeaderEntry,
    HttpMethod,
    MethodSource,
    Record,
    ReportSource,
    ReportType,
    RequestLog,
    ScriptSource,
    Source,
    WebhookConfig,
    WebhookId,
};
pub use worker::{Job, Trigger};

#[cfg(feature = "http")]
pub use transport::ReqwestTransport;

#[cfg(feature = "redis")]
pub use storage_redis::RedisRequestLogStore;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresRequestLogStore;

/// Completion items for the default script sandbox namespace.
pub fn script_autocompletion_items() -> std::sync::Arc<Vec<CompletionItem>> {
    autocompletion_items(|| ScriptSandbox::new().namespace(SCRIPT_GLOBALS))
}
