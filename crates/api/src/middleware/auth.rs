//! Bearer-token authentication middleware.
//!
//! Validates Supabase-issued HS256 JWTs from the `Authorization` header and
//! injects the authenticated user into request extensions. The token's
//! subject is the user id.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::models::ApiError;
use services::{ErrorCode, ServiceError};

const OP: &str = "Auth";

#[derive(Clone)]
pub struct AuthState {
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl AuthState {
    pub fn from_config(cfg: &config::AuthConfig) -> Self {
        Self {
            jwt_secret: cfg.jwt_secret.clone(),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }
}

/// Added to request extensions after successful authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    app_metadata: serde_json::Map<String, serde_json::Value>,
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(secret) = auth.jwt_secret.as_deref() else {
        return Err(ServiceError::new(
            ErrorCode::Internal,
            OP,
            "SUPABASE_JWT_SECRET is not set",
        )
        .into());
    };

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let token = header.strip_prefix("Bearer ").map(str::trim).unwrap_or("");
    if token.is_empty() {
        return Err(
            ServiceError::new(ErrorCode::Unauthorized, OP, "missing bearer token").into(),
        );
    }

    let mut validation = Validation::new(Algorithm::HS256);
    match &auth.audience {
        Some(audience) => validation.set_audience(&[audience.as_str()]),
        None => validation.validate_aud = false,
    }
    if let Some(issuer) = &auth.issuer {
        validation.set_issuer(&[issuer.as_str()]);
    }

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        ApiError(ServiceError::with_source(
            ErrorCode::Unauthorized,
            OP,
            "invalid token",
            e,
        ))
    })?;

    let user_id = token_data.claims.sub;
    if user_id.is_empty() {
        return Err(ServiceError::new(ErrorCode::Unauthorized, OP, "missing subject").into());
    }

    let role = token_data
        .claims
        .app_metadata
        .get("role")
        .and_then(|value| value.as_str())
        .filter(|role| !role.is_empty())
        .unwrap_or("user")
        .to_string();

    request
        .extensions_mut()
        .insert(AuthenticatedUser { user_id, role });
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware::from_fn_with_state, routing::get, Extension, Router};
    use axum_test::TestServer;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    async fn whoami(Extension(user): Extension<AuthenticatedUser>) -> String {
        format!("{}:{}", user.user_id, user.role)
    }

    fn server(state: AuthState) -> TestServer {
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(from_fn_with_state(state, auth_middleware));
        TestServer::new(app).unwrap()
    }

    fn auth_state() -> AuthState {
        AuthState {
            jwt_secret: Some(SECRET.to_string()),
            issuer: None,
            audience: None,
        }
    }

    fn token(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn valid_token_passes_through_with_user() {
        let server = server(auth_state());
        let token = token(json!({ "sub": "user-1", "exp": future_exp() }));

        let response = server.get("/whoami").authorization_bearer(&token).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.text(), "user-1:user");
    }

    #[tokio::test]
    async fn role_is_read_from_app_metadata() {
        let server = server(auth_state());
        let token = token(json!({
            "sub": "user-1",
            "exp": future_exp(),
            "app_metadata": { "role": "admin" }
        }));

        let response = server.get("/whoami").authorization_bearer(&token).await;
        assert_eq!(response.text(), "user-1:admin");
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let server = server(auth_state());
        let response = server.get("/whoami").await;
        assert_eq!(response.status_code(), 401);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthorized() {
        let server = server(auth_state());
        let forged = encode(
            &Header::default(),
            &json!({ "sub": "user-1", "exp": future_exp() }),
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();

        let response = server.get("/whoami").authorization_bearer(&forged).await;
        assert_eq!(response.status_code(), 401);
    }

    #[tokio::test]
    async fn missing_secret_is_internal() {
        let server = server(AuthState {
            jwt_secret: None,
            issuer: None,
            audience: None,
        });
        let response = server.get("/whoami").await;
        assert_eq!(response.status_code(), 500);
    }

    #[tokio::test]
    async fn wrong_issuer_is_unauthorized() {
        let mut state = auth_state();
        state.issuer = Some("https://auth.example.com".to_string());
        let server = server(state);
        let token = token(json!({
            "sub": "user-1",
            "exp": future_exp(),
            "iss": "https://other.example.com"
        }));

        let response = server.get("/whoami").authorization_bearer(&token).await;
        assert_eq!(response.status_code(), 401);
    }
}
