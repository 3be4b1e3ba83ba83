//! Payload producers.
//!
//! Each [`Source`] variant has one producer behind the [`Producer`] trait.
//! Report engines and user methods are host collaborators; scripts run in the
//! crate's own [`ScriptSandbox`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Days, Local, Months, NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::{json, Map, Value};

use crate::error::{ConfigError, DeliveryError, SourceError};
use crate::sandbox::ScriptSandbox;
use crate::types::{
    DatePeriod, Field, MethodSource, Record, ReportSource, ReportType, ScriptSource, Source,
    WebhookConfig, WebhookId,
};

/// Field injected into report rows holding the 1-based row number.
pub const INDEX_FIELD: &str = "idx";

/// Filter key used for the "modified since" lookback.
pub const MODIFIED_FIELD: &str = "modified";

/// Per-job facts a producer may need besides its source parameters.
#[derive(Debug, Clone)]
pub struct ProduceContext<'a> {
    pub webhook_id: &'a WebhookId,
    pub user: Option<&'a str>,
    pub skip_if_no_data: bool,
}

impl<'a> ProduceContext<'a> {
    pub fn for_config(config: &'a WebhookConfig) -> Self {
        Self {
            webhook_id: &config.id,
            user: config.user.as_deref(),
            skip_if_no_data: config.skip_if_no_data,
        }
    }
}

/// Produces the records for one source kind.
///
/// `Ok(None)` means "no data": the job ends without an HTTP attempt.
#[async_trait]
pub trait Producer: Send + Sync {
    type Source: Send + Sync;

    async fn produce(
        &self,
        source: &Self::Source,
        ctx: &ProduceContext<'_>,
    ) -> Result<Option<Vec<Record>>, DeliveryError>;
}

/// A report query as handed to the host's report engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub report: String,
    pub report_type: ReportType,
    pub user: Option<String>,
    pub filters: Map<String, Value>,
}

/// Host-provided reporting backend.
#[async_trait]
pub trait ReportEngine: Send + Sync {
    async fn run(&self, query: &ReportQuery) -> Result<Vec<Record>, SourceError>;
}

pub struct ReportProducer {
    engine: Arc<dyn ReportEngine>,
}

impl ReportProducer {
    pub fn new(engine: Arc<dyn ReportEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Producer for ReportProducer {
    type Source = ReportSource;

    async fn produce(
        &self,
        source: &ReportSource,
        ctx: &ProduceContext<'_>,
    ) -> Result<Option<Vec<Record>>, DeliveryError> {
        let query = ReportQuery {
            report: source.report.clone(),
            report_type: source.report_type,
            user: ctx.user.map(str::to_string),
            filters: prepare_filters(source, Local::now().naive_local()),
        };

        let mut rows = self.engine.run(&query).await?;
        tracing::debug!(webhook = %ctx.webhook_id, report = %source.report, rows = rows.len(), "report produced");

        for (i, row) in rows.iter_mut().enumerate() {
            row.insert(INDEX_FIELD.to_string(), Field::Value(json!(i + 1)));
        }

        if rows.is_empty() && ctx.skip_if_no_data {
            return Ok(None);
        }
        Ok(Some(rows))
    }
}

/// Effective report filters at `now`.
///
/// Report Builder reports get the `modified > now - lookback` filter; other
/// report types get the dynamic date range when one is configured.
pub fn prepare_filters(source: &ReportSource, now: NaiveDateTime) -> Map<String, Value> {
    let mut filters = source.filters.clone();

    if source.report_type == ReportType::ReportBuilder {
        if let Some(hours) = source.data_modified_till.filter(|h| *h > 0) {
            let since = now - TimeDelta::hours(i64::from(hours));
            filters.insert(
                MODIFIED_FIELD.to_string(),
                json!([">", since.format("%Y-%m-%d %H:%M:%S%.6f").to_string()]),
            );
        }
    } else if let Some(dynamic) = source
        .dynamic_dates
        .as_ref()
        .filter(|d| !d.from_field.is_empty() && !d.to_field.is_empty())
    {
        let (from, to) = date_range(dynamic.period, now.date());
        filters.insert(dynamic.from_field.clone(), json!(from.format("%Y-%m-%d").to_string()));
        filters.insert(dynamic.to_field.clone(), json!(to.format("%Y-%m-%d").to_string()));
    }

    filters
}

/// `(today - period, today)`. Month arithmetic clamps to the last day of the month.
pub fn date_range(period: DatePeriod, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let from = match period {
        DatePeriod::Daily => today.checked_sub_days(Days::new(1)),
        DatePeriod::Weekly => today.checked_sub_days(Days::new(7)),
        DatePeriod::Monthly => today.checked_sub_months(Months::new(1)),
        DatePeriod::Quarterly => today.checked_sub_months(Months::new(3)),
        DatePeriod::HalfYearly => today.checked_sub_months(Months::new(6)),
        DatePeriod::Yearly => today.checked_sub_months(Months::new(12)),
    };
    (from.unwrap_or(NaiveDate::MIN), today)
}

/// Result type of a user method.
pub type MethodResult = Result<Value, Box<dyn std::error::Error + Send + Sync>>;

/// A named callable that can back a `Method` source.
#[async_trait]
pub trait WebhookMethod: Send + Sync {
    async fn call(&self, kwargs: Map<String, Value>) -> MethodResult;
}

struct FnMethod<F>(F);

#[async_trait]
impl<F> WebhookMethod for FnMethod<F>
where
    F: Fn(Map<String, Value>) -> MethodResult + Send + Sync,
{
    async fn call(&self, kwargs: Map<String, Value>) -> MethodResult {
        (self.0)(kwargs)
    }
}

/// Allow-list of callables addressable by name.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn WebhookMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, method: impl WebhookMethod + 'static) {
        self.methods.insert(name.into(), Arc::new(method));
    }

    /// Register a synchronous closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Map<String, Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.register(name, FnMethod(f));
    }

    fn get(&self, name: &str) -> Option<Arc<dyn WebhookMethod>> {
        self.methods.get(name).cloned()
    }
}

pub struct MethodProducer {
    registry: MethodRegistry,
}

impl MethodProducer {
    pub fn new(registry: MethodRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Producer for MethodProducer {
    type Source = MethodSource;

    async fn produce(
        &self,
        source: &MethodSource,
        ctx: &ProduceContext<'_>,
    ) -> Result<Option<Vec<Record>>, DeliveryError> {
        let method = self
            .registry
            .get(&source.method)
            .ok_or_else(|| ConfigError::UnknownMethod(source.method.clone()))?;
        let kwargs = source.kwargs()?;

        let value = method.call(kwargs).await.map_err(|e| SourceError::Method {
            method: source.method.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!(webhook = %ctx.webhook_id, method = %source.method, "method produced");

        Ok(records_from_value("method", value)?)
    }
}

/// Variables injected into every script scope.
pub const SCRIPT_GLOBALS: &[&str] = &["webhook", "user"];

pub struct ScriptProducer {
    sandbox: ScriptSandbox,
}

impl ScriptProducer {
    pub fn new(sandbox: ScriptSandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Producer for ScriptProducer {
    type Source = ScriptSource;

    async fn produce(
        &self,
        source: &ScriptSource,
        ctx: &ProduceContext<'_>,
    ) -> Result<Option<Vec<Record>>, DeliveryError> {
        let mut globals = Map::new();
        globals.insert("webhook".to_string(), json!(ctx.webhook_id.0));
        globals.insert("user".to_string(), json!(ctx.user));

        let value = self
            .sandbox
            .run(&source.script, globals, &source.result_variable)
            .await?;
        tracing::debug!(webhook = %ctx.webhook_id, variable = %source.result_variable, "script produced");

        match value {
            Some(value) => Ok(records_from_value("script", value)?),
            None => Ok(None),
        }
    }
}

/// Interpret a JSON value as a record sequence. `null` means no data.
pub fn records_from_value(source_kind: &'static str, value: Value) -> Result<Option<Vec<Record>>, SourceError> {
    let items = match value {
        Value::Null => return Ok(None),
        Value::Array(items) => items,
        other => {
            return Err(SourceError::NotRecords {
                source_kind,
                found: json_kind(&other).to_string(),
            })
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, Field::Value(v))).collect()),
            other => Err(SourceError::NotRecords {
                source_kind,
                found: format!("array of {}", json_kind(&other)),
            }),
        })
        .collect::<Result<Vec<Record>, _>>()
        .map(Some)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One producer per source kind, selected by the config's [`Source`] tag.
pub struct Producers {
    report: Option<ReportProducer>,
    method: MethodProducer,
    script: ScriptProducer,
}

impl Default for Producers {
    fn default() -> Self {
        Self::new(None, MethodRegistry::new(), ScriptSandbox::new())
    }
}

impl Producers {
    pub fn new(report_engine: Option<Arc<dyn ReportEngine>>, methods: MethodRegistry, sandbox: ScriptSandbox) -> Self {
        Self {
            report: report_engine.map(ReportProducer::new),
            method: MethodProducer::new(methods),
            script: ScriptProducer::new(sandbox),
        }
    }

    pub async fn produce(&self, config: &WebhookConfig) -> Result<Option<Vec<Record>>, DeliveryError> {
        let ctx = ProduceContext::for_config(config);
        match &config.source {
            Source::Report(source) => match &self.report {
                Some(producer) => producer.produce(source, &ctx).await,
                None => Err(SourceError::Report {
                    report: source.report.clone(),
                    message: "no report engine configured".to_string(),
                }
                .into()),
            },
            Source::Method(source) => self.method.produce(source, &ctx).await,
            Source::Script(source) => self.script.produce(source, &ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DynamicDateFilter;
    use chrono::NaiveTime;
    use tokio::sync::Mutex;

    struct FixedReport {
        rows: Vec<Record>,
        seen: Mutex<Vec<ReportQuery>>,
    }

    #[async_trait]
    impl ReportEngine for FixedReport {
        async fn run(&self, query: &ReportQuery) -> Result<Vec<Record>, SourceError> {
            self.seen.lock().await.push(query.clone());
            Ok(self.rows.clone())
        }
    }

    fn row(name: &str) -> Record {
        let mut r = Record::new();
        r.insert("name".into(), Field::Value(json!(name)));
        r
    }

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap())
    }

    #[test]
    fn test_date_ranges() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 31).unwrap();
        let ymd = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(date_range(DatePeriod::Daily, today).0, ymd(2024, 5, 30));
        assert_eq!(date_range(DatePeriod::Weekly, today).0, ymd(2024, 5, 24));
        assert_eq!(date_range(DatePeriod::Monthly, today).0, ymd(2024, 4, 30));
        assert_eq!(date_range(DatePeriod::Quarterly, today).0, ymd(2024, 2, 29));
        assert_eq!(date_range(DatePeriod::HalfYearly, today).0, ymd(2023, 11, 30));
        assert_eq!(date_range(DatePeriod::Yearly, today).0, ymd(2023, 5, 31));
        assert_eq!(date_range(DatePeriod::Yearly, today).1, today);
    }

    #[test]
    fn test_modified_lookback_only_for_report_builder() {
        let mut source = ReportSource::new("Orders");
        source.data_modified_till = Some(24);
        let filters = prepare_filters(&source, at(2024, 1, 2));
        assert_eq!(filters[MODIFIED_FIELD], json!([">", "2024-01-01 12:00:00.000000"]));

        source.report_type = ReportType::QueryReport;
        let filters = prepare_filters(&source, at(2024, 1, 2));
        assert!(!filters.contains_key(MODIFIED_FIELD));
    }

    #[test]
    fn test_dynamic_dates_for_query_reports() {
        let mut source = ReportSource::new("Ledger");
        source.report_type = ReportType::QueryReport;
        source.filters.insert("company".into(), json!("ACME"));
        source.dynamic_dates = Some(DynamicDateFilter {
            period: DatePeriod::Weekly,
            from_field: "from_date".into(),
            to_field: "to_date".into(),
        });
        let filters = prepare_filters(&source, at(2024, 3, 10));
        assert_eq!(filters["from_date"], json!("2024-03-03"));
        assert_eq!(filters["to_date"], json!("2024-03-10"));
        assert_eq!(filters["company"], json!("ACME"));
    }

    #[tokio::test]
    async fn test_report_rows_get_index_and_user() {
        let engine = Arc::new(FixedReport { rows: vec![row("a"), row("b")], seen: Mutex::new(vec![]) });
        let producer = ReportProducer::new(engine.clone());
        let id = WebhookId::new("r");
        let ctx = ProduceContext { webhook_id: &id, user: Some("ops@example.com"), skip_if_no_data: false };
        let rows = producer.produce(&ReportSource::new("Orders"), &ctx).await.unwrap().unwrap();
        assert_eq!(rows[0][INDEX_FIELD], Field::Value(json!(1)));
        assert_eq!(rows[1][INDEX_FIELD], Field::Value(json!(2)));
        assert_eq!(engine.seen.lock().await[0].user.as_deref(), Some("ops@example.com"));
    }

    #[tokio::test]
    async fn test_empty_report_with_skip_flag_is_none() {
        let engine = Arc::new(FixedReport { rows: vec![], seen: Mutex::new(vec![]) });
        let producer = ReportProducer::new(engine);
        let id = WebhookId::new("r");
        let ctx = ProduceContext { webhook_id: &id, user: None, skip_if_no_data: true };
        assert!(producer.produce(&ReportSource::new("Orders"), &ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_method_receives_kwargs() {
        let mut registry = MethodRegistry::new();
        registry.register_fn("orders", |kwargs| {
            let limit = kwargs.get("limit").and_then(Value::as_u64).unwrap_or(0);
            Ok(Value::Array((0..limit).map(|i| json!({ "n": i })).collect()))
        });
        let producers = Producers::new(None, registry, ScriptSandbox::new());

        let mut method = MethodSource::new("orders");
        method.parameters = Some(r#"{"limit": 2}"#.into());
        let config = WebhookConfig::new("m", Source::Method(method));
        let rows = producers.produce(&config).await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["n"], Field::Value(json!(1)));
    }

    #[tokio::test]
    async fn test_unknown_method_is_config_error() {
        let producers = Producers::new(None, MethodRegistry::new(), ScriptSandbox::new());
        let config = WebhookConfig::new("m", Source::Method(MethodSource::new("missing")));
        let err = producers.produce(&config).await.unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_records_from_value_rejects_non_records() {
        assert!(records_from_value("method", json!(null)).unwrap().is_none());
        assert!(records_from_value("method", json!({"a": 1})).is_err());
        assert!(records_from_value("method", json!([1, 2])).is_err());
        assert_eq!(records_from_value("method", json!([{"a": 1}])).unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_script_source() {
        let producers = Producers::new(None, MethodRegistry::new(), ScriptSandbox::new());
        let config = WebhookConfig::new(
            "s",
            Source::Script(ScriptSource {
                script: "let out = [#{ hook: webhook }];".into(),
                result_variable: "out".into(),
            }),
        );
        let rows = producers.produce(&config).await.unwrap().unwrap();
        assert_eq!(rows[0]["hook"], Field::Value(json!("s")));
    }
}
