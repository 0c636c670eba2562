//! HMAC-SHA256 signature verification for the LINE webhook (spec §4.9),
//! plus the dynamic test/production bypass rules that sit in front of it.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `X-Line-Signature`: base64(HMAC-SHA256(channel_secret, body)).
pub fn verify_signature(channel_secret: &str, body: &[u8], signature_header: &str) -> Result<(), AppError> {
    let mut mac =
        HmacSha256::new_from_slice(channel_secret.as_bytes()).map_err(|err| AppError::Internal(err.to_string()))?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let provided = base64::engine::general_purpose::STANDARD
        .decode(signature_header)
        .map_err(|_| AppError::BadSignature)?;

    if provided.len() == expected.len() && constant_time_eq(&provided, &expected) {
        Ok(())
    } else {
        Err(AppError::BadSignature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Spec §4.9's signature-bypass rule: only ever active outside production,
/// and only when the operator has explicitly opted in via one of three
/// independent switches.
pub fn should_bypass_signature(
    node_env: &str,
    allow_test_webhook: bool,
    use_mock_line_service: bool,
    qa_mode_header: Option<&str>,
) -> bool {
    if node_env == "production" {
        return false;
    }
    allow_test_webhook || use_mock_line_service || qa_mode_header == Some("test")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_a_correctly_signed_body() {
        let secret = "s3cr3t";
        let body = b"{\"events\":[]}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &signature).is_ok());
    }

    #[test]
    fn rejects_a_tampered_body() {
        let secret = "s3cr3t";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(b"original");
        let signature = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, b"tampered", &signature).is_err());
    }

    #[test]
    fn bypass_never_applies_in_production() {
        assert!(!should_bypass_signature("production", true, true, Some("test")));
    }

    #[test]
    fn bypass_applies_outside_production_with_a_switch() {
        assert!(should_bypass_signature("development", true, false, None));
        assert!(should_bypass_signature("development", false, true, None));
        assert!(should_bypass_signature("development", false, false, Some("test")));
        assert!(!should_bypass_signature("development", false, false, None));
    }
}
