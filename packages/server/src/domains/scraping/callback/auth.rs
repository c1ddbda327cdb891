//! Callback authentication.
//!
//! The subprocess presents either the shared secret itself or, for older
//! scraper versions, an HMAC-SHA256 of the session id keyed by that secret.
//! Both comparisons are constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub fn verify_token(token: &str, secret: &str, session_id: i64) -> bool {
    if constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        return true;
    }
    match legacy_session_token(secret, session_id) {
        Some(expected) => constant_time_eq(token.as_bytes(), expected.as_bytes()),
        None => false,
    }
}

/// Legacy per-session token: hex(HMAC-SHA256(secret, session_id)).
pub fn legacy_session_token(secret: &str, session_id: i64) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(session_id.to_string().as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_the_shared_secret() {
        assert!(verify_token("s3cret", "s3cret", 1));
    }

    #[test]
    fn accepts_the_legacy_hmac_token() {
        let token = legacy_session_token("s3cret", 42).unwrap();
        assert!(verify_token(&token, "s3cret", 42));
    }

    #[test]
    fn legacy_token_is_bound_to_the_session() {
        let token = legacy_session_token("s3cret", 42).unwrap();
        assert!(!verify_token(&token, "s3cret", 43));
    }

    #[test]
    fn rejects_wrong_tokens() {
        assert!(!verify_token("nope", "s3cret", 1));
        assert!(!verify_token("", "s3cret", 1));
        assert!(!verify_token("s3cret ", "s3cret", 1));
    }
}
