//! HMAC-SHA256 webhook signatures.
use std::collections::HashMap;

use hmac::{Hmac, Mac};
use log::*;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::{descriptor::WebhookSpec, errors::GatewayError};

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded SHA-256 MAC.
const SIGNATURE_HEX_LEN: usize = 64;

/// Lower-case hex HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::InvalidDescriptor(format!("Unusable webhook secret. {e}")))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Compares two hex signatures in constant time.
///
/// The provided value is copied into a fixed-size buffer so the byte comparison always covers the full width, and the
/// length check is folded in afterwards instead of returning early.
fn signatures_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    let mut buf = [0u8; SIGNATURE_HEX_LEN];
    let n = provided.len().min(SIGNATURE_HEX_LEN);
    buf[..n].copy_from_slice(&provided[..n]);
    let mut reference = [0u8; SIGNATURE_HEX_LEN];
    let m = expected.len().min(SIGNATURE_HEX_LEN);
    reference[..m].copy_from_slice(&expected[..m]);
    let bytes_eq = reference[..].ct_eq(&buf[..]);
    let len_eq = (expected.len() as u64).ct_eq(&(provided.len() as u64));
    bool::from(bytes_eq & len_eq)
}

/// Checks the signature header of an incoming webhook against the channel's webhook settings.
///
/// `headers` must be keyed by lower-case header name. When the channel has no webhook settings, or they lack a header
/// name or secret, verification is skipped.
pub fn verify_signature(
    spec: Option<&WebhookSpec>,
    headers: &HashMap<String, String>,
    body: &[u8],
) -> Result<(), GatewayError> {
    let spec = match spec {
        Some(s) if s.is_enforced() => s,
        _ => {
            trace!("💳️ Webhook signature verification is not configured. Skipping.");
            return Ok(());
        },
    };
    let provided = headers
        .get(&spec.signature_header.to_ascii_lowercase())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            warn!("💳️ Webhook is missing the {} signature header", spec.signature_header);
            GatewayError::InvalidSignature
        })?;
    let expected = compute_signature(spec.secret.reveal(), body)?;
    if signatures_match(&expected, &provided) {
        Ok(())
    } else {
        warn!("💳️ Webhook signature mismatch");
        Err(GatewayError::InvalidSignature)
    }
}
