use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{errors::ErrorKind, decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use taskline_proto::UserId;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential supplied")]
    MissingCredential,
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    #[error("credential expired")]
    Expired,
}

/// Resolves a bearer credential into a stable user identity. The gateway
/// never issues credentials; token minting belongs to the auth service.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError>;
}

pub type SharedVerifier = Arc<dyn AuthVerifier>;

/// HS256 JWT verifier sharing a secret with the credential issuer.
pub struct JwtVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<UserId, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }
        let data = decode::<Claims>(credential, &self.decoding, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidCredential(err.to_string()),
            },
        )?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidCredential("empty subject".to_string()));
        }
        Ok(UserId::new(data.claims.sub))
    }
}

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
