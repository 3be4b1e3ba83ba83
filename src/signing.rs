use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ConfigError;
use crate::types::WebhookConfig;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Sign the final payload for a webhook, if security is enabled.
///
/// `payload` must be the exact bytes that go on the wire.
pub fn sign_payload(config: &WebhookConfig, payload: &[u8]) -> Result<Option<String>, ConfigError> {
    if !config.enable_security {
        return Ok(None);
    }
    let secret = config
        .secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingSecret)?;
    compute_signature(secret.as_bytes(), payload).map(Some)
}

/// Compute the base64 HMAC-SHA256 signature of `payload`.
pub fn compute_signature(secret: &[u8], payload: &[u8]) -> Result<String, ConfigError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ConfigError::MissingSecret)?;
    mac.update(payload);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a received base64 signature.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature_b64: &str) -> bool {
    let Ok(signature) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&signature).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    MissingSignature,
    InvalidSignature,
}

/// Verify an incoming webhook request in one call.
///
/// Header names are matched case-insensitively.
pub fn verify_webhook_request<'a, I>(
    headers: I,
    payload: &[u8],
    secret: &[u8],
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let signature = headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(SIGNATURE_HEADER))
        .map(|(_, value)| value)
        .ok_or(VerificationError::MissingSignature)?;

    if verify_signature(secret, payload, signature) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}
