use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::headers::validate_headers;
use crate::render::validate_template;

/// Unique identifier for a webhook configuration.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of webhook IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WebhookId(pub String);

impl WebhookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// HTTP method used for delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Scheduling tag selecting which webhooks a trigger run dispatches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    All,
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// One key/value header row. Rows missing either side are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl HeaderEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            value: Some(value.into()),
        }
    }

    /// Returns the pair only when both key and value are non-empty.
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (self.key.as_deref(), self.value.as_deref()) {
            (Some(k), Some(v)) if !k.is_empty() && !v.is_empty() => Some((k, v)),
            _ => None,
        }
    }
}

/// Kind of report backing a `Report` source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    /// Plain list report over a single table. Supports the "modified since" lookback.
    #[default]
    ReportBuilder,
    QueryReport,
    ScriptReport,
}

/// Period used to compute a dynamic `[today - period, today]` date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePeriod {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    HalfYearly,
    Yearly,
}

/// Which filter fields receive the dynamic date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicDateFilter {
    pub period: DatePeriod,
    pub from_field: String,
    pub to_field: String,
}

/// Metadata describing one report filter field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterMeta {
    pub fieldname: String,
    #[serde(default)]
    pub label: String,
    /// Mandatory filter; must carry a non-empty value before dispatch.
    #[serde(default)]
    pub reqd: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSource {
    pub report: String,
    #[serde(default)]
    pub report_type: ReportType,
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub filter_meta: Vec<FilterMeta>,
    /// Lookback window in hours for the "modified since" filter.
    #[serde(default)]
    pub data_modified_till: Option<u32>,
    #[serde(default)]
    pub dynamic_dates: Option<DynamicDateFilter>,
}

impl ReportSource {
    pub fn new(report: impl Into<String>) -> Self {
        Self {
            report: report.into(),
            report_type: ReportType::default(),
            filters: Map::new(),
            filter_meta: Vec::new(),
            data_modified_till: None,
            dynamic_dates: None,
        }
    }

    /// Labels of mandatory filters that have no value.
    pub fn missing_mandatory_filters(&self) -> Vec<String> {
        self.filter_meta
            .iter()
            .filter(|meta| meta.reqd && !is_filled(self.filters.get(&meta.fieldname)))
            .map(|meta| {
                if meta.label.is_empty() {
                    meta.fieldname.clone()
                } else {
                    meta.label.clone()
                }
            })
            .collect()
    }
}

fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(n)) => n.as_f64() != Some(0.0),
        Some(Value::Bool(true)) => true,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSource {
    pub method: String,
    /// JSON object holding keyword arguments.
    #[serde(default)]
    pub parameters: Option<String>,
}

impl MethodSource {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            parameters: None,
        }
    }

    /// Decodes the keyword arguments. Absent parameters decode to an empty object.
    pub fn kwargs(&self) -> Result<Map<String, Value>, ConfigError> {
        let Some(raw) = self.parameters.as_deref().filter(|p| !p.trim().is_empty()) else {
            return Ok(Map::new());
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::MethodParameters {
                method: self.method.clone(),
                reason: "expected a JSON object".to_string(),
            }),
            Err(e) => Err(ConfigError::MethodParameters {
                method: self.method.clone(),
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSource {
    pub script: String,
    /// Name of the variable holding the result once the script finishes.
    pub result_variable: String,
}

/// Where the payload of a webhook comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Report(ReportSource),
    Method(MethodSource),
    Script(ScriptSource),
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Report(_) => "report",
            Source::Method(_) => "method",
            Source::Script(_) => "script",
        }
    }
}

/// Configuration for one webhook.
///
/// A `WebhookConfig` describes *what* to send, *where* and *how*.
/// It is never mutated by the delivery engine; each job works on
/// its own snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: WebhookId,

    /// Target URL. Falls back to `GlobalSettings::url` when absent.
    #[serde(default)]
    pub request_url: Option<String>,

    #[serde(default)]
    pub request_method: HttpMethod,

    pub source: Source,

    /// Optional Handlebars template producing the JSON body.
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub headers: Vec<HeaderEntry>,

    #[serde(default)]
    pub enable_security: bool,

    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub frequency: Frequency,

    #[serde(default)]
    pub skip_if_no_data: bool,

    /// User that reports run as; recorded on every request log.
    #[serde(default)]
    pub user: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl WebhookConfig {
    /// Create an enabled, daily, unsigned POST webhook.
    pub fn new(id: impl Into<String>, source: Source) -> Self {
        Self {
            id: WebhookId(id.into()),
            request_url: None,
            request_method: HttpMethod::default(),
            source,
            template: None,
            headers: Vec::new(),
            enable_security: false,
            secret: None,
            enabled: true,
            frequency: Frequency::default(),
            skip_if_no_data: false,
            user: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.request_url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.request_method = method;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(HeaderEntry::new(key, value));
        self
    }

    /// Enable signing with the given secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_security = true;
        self.secret = Some(secret.into());
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_skip_if_no_data(mut self, skip: bool) -> Self {
        self.skip_if_no_data = skip;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Resolve the target URL against the global fallback.
    pub fn resolve_url<'a>(&'a self, settings: &'a GlobalSettings) -> Option<&'a str> {
        self.request_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| settings.url.as_deref().filter(|u| !u.is_empty()))
    }

    /// Validate everything that can be checked without touching the network.
    pub fn validate(&self, settings: &GlobalSettings) -> Result<(), ConfigError> {
        self.validate_filters()?;
        self.validate_url(settings)?;
        validate_headers(self, settings)?;
        if let Some(template) = self.template.as_deref() {
            validate_template(template)?;
        }
        if self.enable_security && self.secret.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingSecret);
        }
        if let Source::Method(method) = &self.source {
            method.kwargs()?;
        }
        Ok(())
    }

    fn validate_url(&self, settings: &GlobalSettings) -> Result<(), ConfigError> {
        let raw = self.resolve_url(settings).ok_or(ConfigError::MissingUrl)?;
        let parsed = url::Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
        if parsed.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidUrl(raw.to_string()));
        }
        Ok(())
    }

    fn validate_filters(&self) -> Result<(), ConfigError> {
        let Source::Report(report) = &self.source else {
            return Ok(());
        };
        if !report.filter_meta.is_empty() && report.filters.is_empty() {
            return Err(ConfigError::FiltersNotSet);
        }
        let missing = report.missing_mandatory_filters();
        if !missing.is_empty() {
            return Err(ConfigError::MissingFilters(missing));
        }
        Ok(())
    }
}

/// Settings shared by every webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
}

/// One cell of a produced record.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Value(Value),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(TimeDelta),
}

impl From<Value> for Field {
    fn from(value: Value) -> Self {
        Field::Value(value)
    }
}

impl From<NaiveDateTime> for Field {
    fn from(value: NaiveDateTime) -> Self {
        Field::DateTime(value)
    }
}

impl From<NaiveDate> for Field {
    fn from(value: NaiveDate) -> Self {
        Field::Date(value)
    }
}

impl From<NaiveTime> for Field {
    fn from(value: NaiveTime) -> Self {
        Field::Time(value)
    }
}

impl From<TimeDelta> for Field {
    fn from(value: TimeDelta) -> Self {
        Field::Duration(value)
    }
}

/// A produced row, keyed by field name in source column order.
pub type Record = IndexMap<String, Field>;

/// Durable audit record of one HTTP attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: Uuid,
    pub webhook_id: WebhookId,
    pub user: Option<String>,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub payload: String,
    /// Response body; absent when no response was received.
    pub response: Option<String>,
    pub status: Option<u16>,
    /// 1-based attempt number within the job.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}
