use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use scolaris_core::agents::SchoolUser;
use scolaris_core::auth::{API_KEY_PREFIX, hash_token};
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
///
/// Two-phase resolution:
/// 1. Auth middleware (`InjectAuthLayer`) runs first, validates the key and injects into extensions
/// 2. Handler extractor reads from extensions (no DB hit), or falls back to full auth
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub key_id: Uuid,
    pub roles: Vec<String>,
    pub school_id: Option<Uuid>,
}

impl AuthenticatedUser {
    pub fn to_school_user(&self) -> SchoolUser {
        SchoolUser {
            id: self.user_id,
            roles: self.roles.clone(),
            school_id: self.school_id,
        }
    }
}

// --- Tower Layer/Service for auth injection ---

/// Tower Layer that injects `AuthenticatedUser` into request extensions.
/// Silently continues on auth failure (unauthenticated endpoints like health).
#[derive(Clone)]
pub struct InjectAuthLayer {
    pool: sqlx::PgPool,
}

impl InjectAuthLayer {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    pool: sqlx::PgPool,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let pool = self.pool.clone();

        // Extract token synchronously (headers are Send-safe, Body is not)
        let token = bearer_token(req.headers().get("authorization").and_then(|v| v.to_str().ok()));

        Box::pin(async move {
            if let Some(token) = token
                && token.starts_with(API_KEY_PREFIX)
                && let Ok(auth_user) = authenticate_api_key(&token, &pool).await
            {
                req.extensions_mut().insert(auth_user);
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

fn bearer_token(header: Option<&str>) -> Option<String> {
    header?.strip_prefix("Bearer ").map(|s| s.trim().to_owned())
}

// --- Extractor (used by handlers) ---

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Fast path: auth middleware already validated the key
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some(format!(
                    "Include 'Authorization: Bearer <token>' header with an API key ({API_KEY_PREFIX}...)."
                )),
            })?;

        let token = bearer_token(Some(header)).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use Bearer scheme".to_string(),
            docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
        })?;

        if !token.starts_with(API_KEY_PREFIX) {
            return Err(AppError::Unauthorized {
                message: "Invalid token format".to_string(),
                docs_hint: Some(format!("Token must start with '{API_KEY_PREFIX}'.")),
            });
        }
        authenticate_api_key(&token, &state.db).await
    }
}

async fn authenticate_api_key(
    token: &str,
    pool: &sqlx::PgPool,
) -> Result<AuthenticatedUser, AppError> {
    let token_hash = hash_token(token);

    let row = sqlx::query_as::<_, ApiKeyRow>(
        "SELECT ak.id, ak.user_id, ak.expires_at, u.school_id, \
                ARRAY(SELECT ur.role FROM user_roles ur \
                      WHERE ur.user_id = u.id ORDER BY ur.role) AS roles \
         FROM api_keys ak \
         JOIN users u ON u.id = ak.user_id \
         WHERE ak.key_hash = $1 \
           AND ak.is_revoked = FALSE \
           AND u.is_active = TRUE",
    )
    .bind(&token_hash)
    .fetch_optional(pool)
    .await
    .map_err(AppError::Database)?
    .ok_or_else(|| AppError::Unauthorized {
        message: "Invalid API key".to_string(),
        docs_hint: Some("Check that the API key is correct and has not been revoked.".to_string()),
    })?;

    if let Some(expires_at) = row.expires_at
        && Utc::now() > expires_at
    {
        return Err(AppError::Unauthorized {
            message: "API key has expired".to_string(),
            docs_hint: Some("Provision a new key with 'scolaris key generate'.".to_string()),
        });
    }

    // Fire-and-forget last_used_at update
    let pool_clone = pool.clone();
    let key_id = row.id;
    tokio::spawn(async move {
        let _ = sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(key_id)
            .execute(&pool_clone)
            .await;
    });

    Ok(AuthenticatedUser {
        user_id: row.user_id,
        key_id: row.id,
        roles: row.roles,
        school_id: row.school_id,
    })
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    user_id: Uuid,
    expires_at: Option<chrono::DateTime<Utc>>,
    school_id: Option<Uuid>,
    roles: Vec<String>,
}
