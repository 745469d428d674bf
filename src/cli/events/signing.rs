//! HMAC-SHA256 verification for inbound provider webhooks.
//!
//! The provider signs `timestamp.body` with the shared secret and sends
//! the hex signature plus the timestamp as headers. Verification uses a
//! constant-time comparison and rejects stale timestamps.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed timestamp drift in seconds (5 minutes).
const MAX_TIMESTAMP_DRIFT_SECS: u64 = 300;

/// Length of a generated shared secret in bytes (hex-encoded = 2x chars).
const SECRET_BYTES: usize = 32;

/// Compute the HMAC-SHA256 signature over `timestamp.body`, hex-encoded.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");

    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);

    hex::encode(mac.finalize().into_bytes())
}

/// Verify a request signature. The timestamp must be within the drift
/// window; the comparison is constant-time.
pub fn verify_signature(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> Result<()> {
    let ts: u64 = timestamp
        .parse()
        .map_err(|_| anyhow!("Invalid timestamp format"))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("System time error"))?
        .as_secs();

    let drift = if now > ts { now - ts } else { ts - now };

    if drift > MAX_TIMESTAMP_DRIFT_SECS {
        return Err(anyhow!(
            "Timestamp too far from current time (drift: {}s, max: {}s)",
            drift,
            MAX_TIMESTAMP_DRIFT_SECS
        ));
    }

    let expected = compute_signature(secret, timestamp, body);

    if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        Ok(())
    } else {
        Err(anyhow!("Signature verification failed"))
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Generate a new shared secret for the provider to sign webhooks with.
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..SECRET_BYTES).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

/// Current Unix timestamp as string.
pub fn current_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before Unix epoch")
        .as_secs()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let secret = "test-secret";
        let timestamp = current_timestamp();
        let body = br#"{"message_id": "abc", "event": "delivered"}"#;

        let signature = compute_signature(secret, &timestamp, body);
        assert!(verify_signature(secret, &timestamp, body, &signature).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let timestamp = current_timestamp();
        let body = b"payload";

        let signature = compute_signature("secret-a", &timestamp, body);
        assert!(verify_signature("secret-b", &timestamp, body, &signature).is_err());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "test-secret";
        let timestamp = current_timestamp();

        let signature = compute_signature(secret, &timestamp, b"original");
        assert!(verify_signature(secret, &timestamp, b"tampered", &signature).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let secret = "test-secret";
        let stale = (SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            - 3600)
            .to_string();
        let body = b"payload";

        let signature = compute_signature(secret, &stale, body);
        assert!(verify_signature(secret, &stale, body, &signature).is_err());
    }

    #[test]
    fn test_generated_secrets_are_unique_hex() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
