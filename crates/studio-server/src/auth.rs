//! Handshake credential verification.
//!
//! The bearer credential is an HS256 JWT issued by the external auth
//! service. It is checked once, before the `WebSocket` upgrade; there is no
//! later re-authentication point for the life of the connection.

use std::collections::HashMap;

use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use studio_core::UserId;
use studio_settings::AuthSettings;
use thiserror::Error;

/// Subprotocol marker that precedes a token in `Sec-WebSocket-Protocol`.
pub const BEARER_PROTOCOL: &str = "bearer";

/// Reasons a handshake is refused.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("authentication required")]
    MissingCredential,
    /// The credential failed signature, expiry, or claim checks.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// The credential is valid but its role may not hold a session.
    #[error("role '{0}' is not permitted to open a session")]
    InsufficientRole(String),
}

impl AuthError {
    /// Stable error code sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "MISSING_CREDENTIAL",
            Self::InvalidCredential(_) => "INVALID_CREDENTIAL",
            Self::InsufficientRole(_) => "INSUFFICIENT_ROLE",
        }
    }

    /// HTTP status returned from the upgrade endpoint.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingCredential | Self::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientRole(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Verification detail stays in the server log.
        let message = match &self {
            Self::MissingCredential => "Authentication required",
            Self::InvalidCredential(_) => "Invalid credential",
            Self::InsufficientRole(_) => "Insufficient role",
        };
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": message }
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Identity extracted from a verified credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Opaque user identifier.
    pub user_id: UserId,
    /// Role claimed by the credential.
    pub role: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    role: String,
}

/// Verifies handshake credentials against the shared signing secret.
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    privileged_role: String,
}

impl TokenVerifier {
    /// Create a verifier for HS256 tokens signed with `secret`.
    pub fn new(secret: &str, privileged_role: impl Into<String>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            privileged_role: privileged_role.into(),
        }
    }

    /// Build a verifier from the `auth` settings section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let mut verifier = Self::new(&settings.jwt_secret, settings.privileged_role.clone())
            .with_leeway(settings.leeway_secs);
        if let Some(issuer) = &settings.issuer {
            verifier = verifier.with_issuer(issuer);
        }
        verifier
    }

    /// Tolerate `leeway_secs` of clock skew on `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }

    /// Require the `iss` claim to equal `issuer`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    /// The single role allowed to hold a session.
    pub fn privileged_role(&self) -> &str {
        &self.privileged_role
    }

    /// Verify a presented credential.
    pub fn verify(&self, credential: Option<&str>) -> Result<Identity, AuthError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingCredential)?;

        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::InvalidCredential(e.to_string()))?
            .claims;

        let user_id = claims
            .user_id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AuthError::InvalidCredential("token carries no user id".into()))?;

        if !claims.role.eq_ignore_ascii_case(&self.privileged_role) {
            return Err(AuthError::InsufficientRole(claims.role));
        }

        Ok(Identity {
            user_id: UserId::from(user_id),
            role: claims.role,
        })
    }
}

/// Find the bearer credential in a handshake request.
///
/// Checked in order: the `token` query parameter, an `Authorization: Bearer`
/// header, then a `Sec-WebSocket-Protocol` list of the form `bearer, <token>`.
pub fn extract_credential(query: &HashMap<String, String>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.get("token").filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }

    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Some(token.to_owned());
    }

    protocol_credential(headers)
}

/// Token carried in `Sec-WebSocket-Protocol`, if any.
pub fn protocol_credential(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())?;
    let mut parts = value.split(',').map(str::trim);
    while let Some(part) = parts.next() {
        if part.eq_ignore_ascii_case(BEARER_PROTOCOL) {
            return parts.next().filter(|t| !t.is_empty()).map(str::to_owned);
        }
    }
    None
}
