//! Restricted script execution for `Script` sources.
//!
//! Scripts run in a Rhai engine with operation, depth and size limits. The only
//! names visible besides the language built-ins are the injected globals and the
//! allow-listed `utils` module.

use std::sync::Arc;

use chrono::{Days, Local, Months, NaiveDate};
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, Module, Scope};
use serde_json::{Map, Value};

use crate::autocomplete::{Namespace, NamespaceEntry};
use crate::error::SourceError;

const MAX_OPERATIONS: u64 = 5_000_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_STRING_SIZE: usize = 4 * 1024 * 1024;
const MAX_ARRAY_SIZE: usize = 500_000;
const MAX_MAP_SIZE: usize = 10_000;

/// Names of the functions exported under `utils`.
const UTILS_FUNCTIONS: &[&str] = &["now", "today", "add_days", "add_months"];

#[derive(Clone)]
pub struct ScriptSandbox {
    engine: Arc<Engine>,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSandbox {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_ARRAY_SIZE);
        engine.set_max_map_size(MAX_MAP_SIZE);
        engine.disable_symbol("eval");
        engine.on_print(|text| tracing::debug!(target: "bulk_webhook::script", "{text}"));
        engine.on_debug(|text, _source, pos| {
            tracing::debug!(target: "bulk_webhook::script", position = %pos, "{text}")
        });
        engine.register_static_module("utils", utils_module().into());

        Self {
            engine: Arc::new(engine),
        }
    }

    /// Run `script` and return the value bound to `result_variable` afterwards.
    ///
    /// `None` means the variable was never defined.
    pub async fn run(
        &self,
        script: &str,
        globals: Map<String, Value>,
        result_variable: &str,
    ) -> Result<Option<Value>, SourceError> {
        let engine = Arc::clone(&self.engine);
        let script = script.to_string();
        let result_variable = result_variable.to_string();

        tokio::task::spawn_blocking(move || run_blocking(&engine, &script, globals, &result_variable))
            .await
            .map_err(|e| SourceError::Script(e.to_string()))?
    }

    /// Names a script can reference, for editor completion.
    pub fn namespace(&self, globals: &[&str]) -> Namespace {
        let mut utils = Namespace::new();
        for name in UTILS_FUNCTIONS {
            utils.insert(*name, NamespaceEntry::Function);
        }

        let mut namespace = Namespace::new();
        namespace.insert("utils", NamespaceEntry::Mapping(utils));
        for name in globals {
            namespace.insert(*name, NamespaceEntry::Value);
        }
        namespace
    }
}

fn run_blocking(
    engine: &Engine,
    script: &str,
    globals: Map<String, Value>,
    result_variable: &str,
) -> Result<Option<Value>, SourceError> {
    let mut scope = Scope::new();
    for (name, value) in globals {
        let value = rhai::serde::to_dynamic(value).map_err(script_error)?;
        scope.push_dynamic(name, value);
    }

    engine.run_with_scope(&mut scope, script).map_err(script_error)?;

    let Some(result) = scope.get_value::<Dynamic>(result_variable) else {
        return Ok(None);
    };
    rhai::serde::from_dynamic::<Value>(&result)
        .map(Some)
        .map_err(script_error)
}

fn script_error(err: Box<EvalAltResult>) -> SourceError {
    SourceError::Script(err.to_string())
}

fn utils_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("now", || -> Result<String, Box<EvalAltResult>> {
        Ok(Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string())
    });
    module.set_native_fn("today", || -> Result<String, Box<EvalAltResult>> {
        Ok(Local::now().date_naive().format("%Y-%m-%d").to_string())
    });
    module.set_native_fn("add_days", |date: ImmutableString, days: i64| -> Result<String, Box<EvalAltResult>> {
        let date = parse_date(&date)?;
        let shifted = if days >= 0 {
            date.checked_add_days(Days::new(days.unsigned_abs()))
        } else {
            date.checked_sub_days(Days::new(days.unsigned_abs()))
        };
        format_date(shifted)
    });
    module.set_native_fn("add_months", |date: ImmutableString, months: i64| -> Result<String, Box<EvalAltResult>> {
        let date = parse_date(&date)?;
        let months_abs = u32::try_from(months.unsigned_abs()).map_err(|e| e.to_string())?;
        let shifted = if months >= 0 {
            date.checked_add_months(Months::new(months_abs))
        } else {
            date.checked_sub_months(Months::new(months_abs))
        };
        format_date(shifted)
    });
    module
}

fn parse_date(date: &str) -> Result<NaiveDate, Box<EvalAltResult>> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|e| format!("invalid date '{date}': {e}").into())
}

fn format_date(date: Option<NaiveDate>) -> Result<String, Box<EvalAltResult>> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| "date out of range".into())
}
