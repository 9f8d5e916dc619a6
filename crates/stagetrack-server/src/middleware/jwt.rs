//! Bearer-token authentication.
//!
//! Tokens are HS256 JWTs carrying the user id, email and role, valid for
//! 24 hours. The `Authorization` header is accepted both as
//! `Bearer <token>` and as a bare `<token>`.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use stagetrack_core::domain::user::{Role, User};
use stagetrack_core::error::{Result, TrackError};

use crate::error::AppError;

const TOKEN_TTL_HOURS: i64 = 24;

/// Claims carried by every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct JwtConfig {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtConfig {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Issue a token for `user`, expiring 24 hours from now.
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| TrackError::Internal(anyhow::anyhow!("token encoding: {e}")))
    }

    /// Validate a token and return its claims. Expiry is enforced.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| TrackError::Unauthenticated(format!("invalid token: {e}")))
    }
}

/// Extract the token from an `Authorization` header value.
fn token_from_header(header: &str) -> Result<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Ok(token),
        (Some(token), None, None) => Ok(token),
        _ => Err(TrackError::Unauthenticated(
            "invalid authorization header format".into(),
        )),
    }
}

/// Require a valid bearer token; the verified [`Claims`] are inserted
/// into the request extensions for handlers and the authz guard.
pub async fn jwt_auth(
    Extension(config): Extension<JwtConfig>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| TrackError::Unauthenticated("authorization header required".into()))?;

    let claims = config.verify(token_from_header(header)?)?;
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
