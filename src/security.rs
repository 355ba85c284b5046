//! Slack request signing and OAuth state tokens.

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Slack-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Slack-Request-Timestamp";

/// Requests older than this are treated as replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    MissingHeaders,
    InvalidTimestamp,
    Stale,
    Mismatch,
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::MissingHeaders => write!(f, "missing Slack signature headers"),
            SignatureError::InvalidTimestamp => write!(f, "invalid Slack request timestamp"),
            SignatureError::Stale => write!(f, "Slack request timestamp too old"),
            SignatureError::Mismatch => write!(f, "Slack signature mismatch"),
        }
    }
}

impl std::error::Error for SignatureError {}

pub fn compute_signature(signing_secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(signing_secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length
        Err(_) => return String::new(),
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Checks `v0=hex(hmac_sha256("v0:{ts}:{body}"))` in constant time.
pub fn verify_slack_signature(
    signing_secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now_unix: i64,
) -> Result<(), SignatureError> {
    let (timestamp, signature) = match (timestamp, signature) {
        (Some(t), Some(s)) if !t.is_empty() && !s.is_empty() => (t, s),
        _ => return Err(SignatureError::MissingHeaders),
    };

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidTimestamp)?;

    if (now_unix - ts).abs() > MAX_REQUEST_AGE_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = compute_signature(signing_secret, timestamp, body);
    if constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn generate_state_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

    #[test]
    fn test_valid_signature_passes() {
        let body = b"token=xyz&team_id=T1&command=%2Fsem-help";
        let sig = compute_signature(SECRET, "1531420618", body);
        assert!(sig.starts_with("v0="));
        assert_eq!(sig.len(), 3 + 64);

        let result =
            verify_slack_signature(SECRET, Some("1531420618"), Some(&sig), body, 1531420700);
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_tampered_body_fails() {
        let sig = compute_signature(SECRET, "1000", b"original");
        let result = verify_slack_signature(SECRET, Some("1000"), Some(&sig), b"tampered", 1000);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn test_stale_timestamp_fails() {
        let sig = compute_signature(SECRET, "1000", b"body");
        let result = verify_slack_signature(SECRET, Some("1000"), Some(&sig), b"body", 1000 + 301);
        assert_eq!(result, Err(SignatureError::Stale));
    }

    #[test]
    fn test_missing_headers_fail() {
        assert_eq!(
            verify_slack_signature(SECRET, None, Some("v0=abc"), b"", 0),
            Err(SignatureError::MissingHeaders)
        );
        assert_eq!(
            verify_slack_signature(SECRET, Some("abc"), Some("v0=abc"), b"", 0),
            Err(SignatureError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_state_token_shape() {
        let a = generate_state_token();
        let b = generate_state_token();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
