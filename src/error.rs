use std::fmt;

use crate::types::WebhookId;

/// Configuration problems. Raised before any network activity and never retried.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("no request URL configured and no global fallback URL set")]
    MissingUrl,

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("security is enabled but no webhook secret is set")]
    MissingSecret,

    #[error("filter metadata is declared but no filter values are set")]
    FiltersNotSet,

    #[error("missing values for required report filters: {}", .0.join(", "))]
    MissingFilters(Vec<String>),

    #[error("invalid template syntax: {source}")]
    TemplateSyntax {
        #[source]
        source: Box<handlebars::TemplateError>,
    },

    #[error("template rendering failed: {source}")]
    TemplateRender {
        #[source]
        source: Box<handlebars::RenderError>,
    },

    #[error("template output is not valid JSON: {source}")]
    TemplateOutput {
        #[source]
        source: serde_json::Error,
    },

    #[error("method {0} is not registered")]
    UnknownMethod(String),

    #[error("invalid parameters for method {method}: {reason}")]
    MethodParameters { method: String, reason: String },
}

/// Errors raised while producing records from a payload source.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum SourceError {
    #[error("report {report} failed: {message}")]
    Report { report: String, message: String },

    #[error("method {method} failed: {message}")]
    Method { method: String, message: String },

    #[error("script execution failed: {0}")]
    Script(String),

    #[error("{source_kind} source must yield an array of objects, got {found}")]
    NotRecords {
        source_kind: &'static str,
        found: String,
    },
}

/// Errors returned by request log and config stores.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {source}")]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

/// Reasons why an HTTP delivery attempt failed.
///
/// Every reason is transient; the engine retries until the budget is spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network(String),
    Status(u16),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network(detail) =>
                write!(f, "network error: {detail}"),
            FailureReason::Status(status) =>
                write!(f, "endpoint returned status {status}"),
        }
    }
}

/// Errors surfaced by a single delivery job.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("webhook {0} not found")]
    NotFound(WebhookId),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FailureReason },
}

impl DeliveryError {
    /// Configuration errors are surfaced to the user, never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, DeliveryError::Config(_))
    }
}

/// Errors returned when dispatching work fails *before* delivery begins.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    /// Dispatcher has been shut down.
    #[error("dispatcher is shut down")]
    Shutdown,

    #[error("webhook {0} not found")]
    NotFound(WebhookId),

    #[error("user {user} may not send webhook {webhook_id}")]
    PermissionDenied { user: String, webhook_id: WebhookId },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Final outcome of a delivery job that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Endpoint accepted the payload on attempt `attempts` (1-based).
    Delivered { attempts: u32, status: u16 },
    /// Nothing to send; no HTTP attempt and no log entry.
    Skipped,
}
