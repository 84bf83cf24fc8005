use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::{ready, Ready};
use std::str::FromStr;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::token::{self, VerifiedToken};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Vendor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Vendor => "vendor",
            Role::Admin => "admin",
        })
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "vendor" => Ok(Role::Vendor),
            "admin" => Ok(Role::Admin),
            _ => Err(()),
        }
    }
}

/// Pull the bearer credential out of a request.
///
/// Accepted sources, in order: `Authorization: Bearer`, `x-auth-token`
/// header, `token` cookie.
pub fn credential_from_request(req: &HttpRequest) -> Option<String> {
    if let Some(value) = req.headers().get("Authorization") {
        if let Ok(value) = value.to_str() {
            if let Some(bearer) = value.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(value) = req.headers().get("x-auth-token") {
        if let Ok(value) = value.to_str() {
            return Some(value.trim().to_string());
        }
    }
    req.cookie("token").map(|c| c.value().to_string())
}

fn config_of(req: &HttpRequest) -> Result<&AppConfig, Error> {
    req.app_data::<actix_web::web::Data<AppConfig>>()
        .map(|d| d.get_ref())
        .ok_or_else(|| ApiError::Internal.into())
}

fn extract(req: &HttpRequest) -> Result<VerifiedToken, Error> {
    let cfg = config_of(req)?;
    let credential = credential_from_request(req).ok_or(ApiError::Unauthorized)?;
    token::verify(&cfg.token_secret, &credential, Utc::now().timestamp_millis()).map_err(|e| {
        // Uniform 401 outward; the reason only goes to the log.
        tracing::debug!(reason = %e, "rejected credential");
        metrics::counter!("velo_auth_failures_total", 1);
        ApiError::Unauthorized.into()
    })
}

/// Extractor yielding verified token claims for any authenticated subject.
pub struct Auth(pub VerifiedToken);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        ready(extract(req).map(Auth))
    }
}

/// Extractor for vendor-only routes. Uses the role-scoped verification, so a
/// token carrying any other role never reaches the handler.
pub struct VendorAuth(pub VerifiedToken);

impl FromRequest for VendorAuth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let res: Result<VerifiedToken, Error> = (|| {
            let cfg = config_of(req)?;
            let credential = credential_from_request(req).ok_or(ApiError::Unauthorized)?;
            token::verify_role(
                &cfg.token_secret,
                &credential,
                Role::Vendor,
                Utc::now().timestamp_millis(),
            )
            .map_err(|e| match e {
                // Wrong role on a valid token is an authorization failure.
                token::TokenError::RoleMismatch => ApiError::Forbidden.into(),
                _ => {
                    tracing::debug!(reason = %e, "rejected credential");
                    metrics::counter!("velo_auth_failures_total", 1);
                    ApiError::Unauthorized.into()
                }
            })
        })();
        ready(res.map(VendorAuth))
    }
}

/// Argon2id hash for storage at registration time.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
    let salt = SaltString::generate(&mut OsRng);
    argon2::Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!(error = %e, "password hashing failed");
            ApiError::Internal
        })
}

/// Check a login attempt against the stored hash. Unparseable hashes count
/// as a failed verification, not an error.
pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::password_hash::{PasswordHash, PasswordVerifier};
    PasswordHash::new(hash)
        .map(|parsed| {
            argon2::Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !matches!($auth.0.role, $role) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}
