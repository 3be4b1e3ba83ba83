use std::collections::BTreeMap;

use http::{HeaderName, HeaderValue};

use crate::error::ConfigError;
use crate::signing::SIGNATURE_HEADER;
use crate::types::{GlobalSettings, HeaderEntry, WebhookConfig};

/// Resolved request headers, keyed by header name.
pub type Headers = BTreeMap<String, String>;

/// Build the header set for one delivery.
///
/// The signature header comes first. Then either the webhook's own header
/// rows or, when it has none, the global rows. The two lists are never mixed.
/// A row that is not a legal HTTP header is a configuration error.
pub fn resolve_headers(
    config: &WebhookConfig,
    settings: &GlobalSettings,
    signature: Option<&str>,
) -> Result<Headers, ConfigError> {
    let mut headers = Headers::new();
    if let Some(signature) = signature {
        headers.insert(SIGNATURE_HEADER.to_string(), signature.to_string());
    }

    for (key, value) in effective_rows(config, settings).iter().filter_map(HeaderEntry::pair) {
        check_header(key, value)?;
        headers.insert(key.to_string(), value.to_string());
    }

    Ok(headers)
}

/// Check every header row that a delivery of `config` would send.
pub fn validate_headers(config: &WebhookConfig, settings: &GlobalSettings) -> Result<(), ConfigError> {
    effective_rows(config, settings)
        .iter()
        .filter_map(HeaderEntry::pair)
        .try_for_each(|(key, value)| check_header(key, value))
}

fn effective_rows<'a>(config: &'a WebhookConfig, settings: &'a GlobalSettings) -> &'a [HeaderEntry] {
    if config.headers.is_empty() {
        &settings.headers
    } else {
        &config.headers
    }
}

fn check_header(key: &str, value: &str) -> Result<(), ConfigError> {
    HeaderName::from_bytes(key.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
        name: key.to_string(),
        reason: e.to_string(),
    })?;
    HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
        name: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}
