//! Supabase access-token authentication. The token's `sub` is the tenant id on every table.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiError;

pub const AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// HS256 key shared with Supabase.
#[derive(Clone)]
pub struct JwtKeys(Arc<DecodingKey>);

impl JwtKeys {
    pub fn new(secret: &str) -> Self { Self(Arc::new(DecodingKey::from_secret(secret.as_bytes()))) }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[AUDIENCE]);
        Ok(decode::<Claims>(token, &self.0, &validation)?.claims)
    }
}

/// Authenticated seller. Usage in handlers: `async fn handler(user: AuthUser) -> ...`
#[derive(Debug, Clone, Copy)]
pub struct AuthUser { pub id: Uuid }

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    JwtKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts.headers.get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;
        let claims = JwtKeys::from_ref(state).verify(token).map_err(|e| {
            tracing::debug!(error = %e, "rejected access token");
            ApiError::Unauthorized
        })?;
        Ok(AuthUser { id: claims.sub })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) const SECRET: &str = "test-secret";

    pub(crate) fn token_for(user_id: Uuid, audience: &str) -> String {
        let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp();
        let claims = serde_json::json!({ "sub": user_id, "exp": exp, "aud": audience, "role": "authenticated" });
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn test_verify_accepts_supabase_token() {
        let user = Uuid::new_v4();
        let claims = JwtKeys::new(SECRET).verify(&token_for(user, AUDIENCE)).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.role.as_deref(), Some("authenticated"));
    }

    #[test]
    fn test_verify_rejects_wrong_audience_and_secret() {
        let token = token_for(Uuid::new_v4(), "anon");
        assert!(JwtKeys::new(SECRET).verify(&token).is_err());
        let token = token_for(Uuid::new_v4(), AUDIENCE);
        assert!(JwtKeys::new("other").verify(&token).is_err());
    }
}
