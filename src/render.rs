//! Payload rendering.
//!
//! Turns produced records into the exact JSON bytes that are signed and sent.
//! Temporal fields are stringified first so templates and the signer only
//! ever see plain JSON.

use chrono::{TimeDelta, Utc};
use handlebars::{handlebars_helper, Handlebars, Template};
use serde_json::{json, Map, Value};

use crate::error::ConfigError;
use crate::types::{Field, Record};

handlebars_helper!(json_helper: |v: Json| serde_json::to_string(v).unwrap_or_default());

/// Check template syntax without rendering it.
pub fn validate_template(template: &str) -> Result<(), ConfigError> {
    Template::compile(template)
        .map(|_| ())
        .map_err(|e| ConfigError::TemplateSyntax { source: Box::new(e) })
}

/// Renders records into the final payload.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        // Output is JSON, not HTML.
        registry.register_escape_fn(handlebars::no_escape);
        registry.register_helper("json", Box::new(json_helper));
        Self { registry }
    }

    /// Render records into payload bytes.
    ///
    /// Returns `Ok(None)` when the resulting payload is empty (`null`, `[]`
    /// or `{}`), which callers treat as "no data".
    pub fn render(&self, records: &[Record], template: Option<&str>) -> Result<Option<Vec<u8>>, ConfigError> {
        let data = Value::Array(stringify_records(records).into_iter().map(Value::Object).collect());

        let payload = match template.filter(|t| !t.trim().is_empty()) {
            None => data,
            Some(template) => {
                let context = json!({ "data": data, "utils": utils() });
                let rendered = self
                    .registry
                    .render_template(template, &context)
                    .map_err(|e| ConfigError::TemplateRender { source: Box::new(e) })?;
                serde_json::from_str::<Value>(&rendered)
                    .map_err(|source| ConfigError::TemplateOutput { source })?
            }
        };

        if is_empty_payload(&payload) {
            return Ok(None);
        }

        serde_json::to_vec(&payload)
            .map(Some)
            .map_err(|source| ConfigError::TemplateOutput { source })
    }
}

/// Read-only helpers exposed to templates under `utils`.
fn utils() -> Value {
    let now = Utc::now().naive_utc();
    json!({
        "now": now.format("%Y-%m-%d %H:%M:%S").to_string(),
        "today": now.format("%Y-%m-%d").to_string(),
    })
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Convert records to JSON objects, stringifying temporal fields.
pub fn stringify_records(records: &[Record]) -> Vec<Map<String, Value>> {
    records
        .iter()
        .map(|record| {
            record
                .iter()
                .map(|(key, field)| (key.clone(), stringify_field(field)))
                .collect()
        })
        .collect()
}

fn stringify_field(field: &Field) -> Value {
    match field {
        Field::Value(value) => value.clone(),
        Field::DateTime(dt) => Value::String(dt.to_string()),
        Field::Date(date) => Value::String(date.to_string()),
        Field::Time(time) => Value::String(time.to_string()),
        Field::Duration(delta) => Value::String(format_duration(*delta)),
    }
}

/// Formats a duration as `[D day[s], ]H:MM:SS[.ffffff]`, days carrying the sign.
pub fn format_duration(delta: TimeDelta) -> String {
    const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

    let total = delta
        .num_microseconds()
        .unwrap_or_else(|| delta.num_milliseconds().saturating_mul(1_000));
    let days = total.div_euclid(MICROS_PER_DAY);
    let rest = total.rem_euclid(MICROS_PER_DAY);

    let hours = rest / 3_600_000_000;
    let minutes = rest / 60_000_000 % 60;
    let seconds = rest / 1_000_000 % 60;
    let micros = rest % 1_000_000;

    let mut out = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        out.push_str(&format!("{days} day{plural}, "));
    }
    out.push_str(&format!("{hours}:{minutes:02}:{seconds:02}"));
    if micros != 0 {
        out.push_str(&format!(".{micros:06}"));
    }
    out
}
