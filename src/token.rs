//! Session-token codec.
//!
//! Tokens are self-certifying: `"{subject}_{role}_{issued_at_ms}_{sig}"`,
//! where `sig` is the first 10 hex characters of an HMAC-SHA256 over the
//! first three fields. Nothing is stored server-side; validity is recomputed
//! from the token contents and the shared secret on every request.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::auth::Role;

type HmacSha256 = Hmac<Sha256>;

/// Tokens older than this are rejected.
pub const MAX_AGE_MS: i64 = 30 * 24 * 60 * 60 * 1000;

const SIG_HEX_LEN: usize = 10;

/// Claims recovered from a successfully verified token.
///
/// Holding one of these proves the token was well-formed, signed with our
/// secret, and not expired. It does NOT prove the subject still exists or
/// still holds `role`; callers must re-fetch the authoritative record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub subject_id: String,
    pub role: Role,
    pub issued_at_ms: i64,
}

/// Verification failures. The HTTP layer collapses all of these into a
/// uniform 401; the variants exist for internal logging only.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("role mismatch")]
    RoleMismatch,
}

fn sign(secret: &str, message: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    let mut sig = hex::encode(mac.finalize().into_bytes());
    sig.truncate(SIG_HEX_LEN);
    sig
}

/// Mint a token for `subject_id` at the current wall-clock time.
pub fn issue(secret: &str, subject_id: &str, role: Role) -> String {
    issue_at(secret, subject_id, role, Utc::now().timestamp_millis())
}

/// Mint a token with an explicit issue time (epoch millis).
pub fn issue_at(secret: &str, subject_id: &str, role: Role, issued_at_ms: i64) -> String {
    let message = format!("{subject_id}_{role}_{issued_at_ms}");
    let sig = sign(secret, &message);
    format!("{message}_{sig}")
}

/// Verify `token` against `secret` as of `now_ms`.
///
/// Signature is checked before expiry so a forged timestamp can't select the
/// error path. The comparison is constant-time.
pub fn verify(secret: &str, token: &str, now_ms: i64) -> Result<VerifiedToken, TokenError> {
    let parts: Vec<&str> = token.split('_').collect();
    if parts.len() < 4 {
        return Err(TokenError::Malformed);
    }
    let (subject_id, role_str, ts_str, sig) = (parts[0], parts[1], parts[2], parts[3]);

    let expected = sign(secret, &format!("{subject_id}_{role_str}_{ts_str}"));
    if !bool::from(expected.as_bytes().ct_eq(sig.as_bytes())) {
        return Err(TokenError::BadSignature);
    }

    let issued_at_ms: i64 = ts_str.parse().map_err(|_| TokenError::Malformed)?;
    if now_ms - issued_at_ms > MAX_AGE_MS {
        return Err(TokenError::Expired);
    }
    let role: Role = role_str.parse().map_err(|_| TokenError::Malformed)?;

    Ok(VerifiedToken {
        subject_id: subject_id.to_string(),
        role,
        issued_at_ms,
    })
}

/// Role-scoped variant used by vendor-only routes: also fails when the
/// embedded role is not `required`.
pub fn verify_role(
    secret: &str,
    token: &str,
    required: Role,
    now_ms: i64,
) -> Result<VerifiedToken, TokenError> {
    let verified = verify(secret, token, now_ms)?;
    if verified.role != required {
        return Err(TokenError::RoleMismatch);
    }
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s";
    const ISSUED: i64 = 1_700_000_000_000;

    #[test]
    fn round_trip_returns_subject() {
        let token = issue_at(SECRET, "u1", Role::Vendor, ISSUED);
        let verified = verify(SECRET, &token, ISSUED + 1000).expect("valid");
        assert_eq!(verified.subject_id, "u1");
        assert_eq!(verified.role, Role::Vendor);
        assert_eq!(verified.issued_at_ms, ISSUED);
    }

    #[test]
    fn token_shape_is_deterministic() {
        let token = issue_at(SECRET, "u1", Role::Vendor, ISSUED);
        assert!(token.starts_with("u1_vendor_1700000000000_"));
        assert_eq!(token, issue_at(SECRET, "u1", Role::Vendor, ISSUED));
        let sig = token.rsplit('_').next().unwrap();
        assert_eq!(sig.len(), 10);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn any_signature_mutation_fails() {
        let token = issue_at(SECRET, "u1", Role::User, ISSUED);
        let sig_start = token.len() - SIG_HEX_LEN;
        for i in sig_start..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert_eq!(
                verify(SECRET, &mutated, ISSUED + 1),
                Err(TokenError::BadSignature),
                "mutation at byte {i} should invalidate the token"
            );
        }
    }

    #[test]
    fn expiry_boundary() {
        let token = issue_at(SECRET, "u1", Role::User, ISSUED);
        assert!(verify(SECRET, &token, ISSUED + MAX_AGE_MS - 1).is_ok());
        assert!(verify(SECRET, &token, ISSUED + MAX_AGE_MS).is_ok());
        assert_eq!(
            verify(SECRET, &token, ISSUED + MAX_AGE_MS + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn too_few_segments_is_malformed() {
        assert_eq!(verify(SECRET, "abc_def", 0), Err(TokenError::Malformed));
        assert_eq!(verify(SECRET, "", 0), Err(TokenError::Malformed));
        assert_eq!(verify(SECRET, "a_b_c", 0), Err(TokenError::Malformed));
    }

    #[test]
    fn wrong_secret_fails() {
        let token = issue_at(SECRET, "u1", Role::User, ISSUED);
        assert_eq!(
            verify("other-secret", &token, ISSUED + 1),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn legacy_unsigned_envelopes_are_rejected() {
        // base64 JSON `{id, exp}` blobs from the old scheme have no `_`
        // separators and must never verify.
        assert_eq!(
            verify(SECRET, "eyJpZCI6InUxIiwiZXhwIjo5OTk5OTk5OTk5OTk5fQ", 0),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn role_scoped_verification() {
        let token = issue_at(SECRET, "v1", Role::Vendor, ISSUED);
        assert!(verify_role(SECRET, &token, Role::Vendor, ISSUED + 1).is_ok());
        assert_eq!(
            verify_role(SECRET, &token, Role::Admin, ISSUED + 1),
            Err(TokenError::RoleMismatch)
        );
    }
}
