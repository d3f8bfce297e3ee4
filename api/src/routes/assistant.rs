use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use scolaris_core::error::ApiError;

use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::state::AppState;

const MAX_CONTENT_CHARS: usize = 4000;
const MAX_ROLE_CHARS: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/assistant/messages", post(send_message))
        .route("/v1/assistant/explain", post(enable_explain))
}

#[derive(Deserialize, ToSchema)]
pub struct AssistantMessageRequest {
    /// The user's message. Empty content returns the persona's welcome text.
    #[serde(default)]
    pub content: String,
    /// Role string or agent key to talk to, e.g. "enseignant" or "parent".
    /// Ignored unless the caller holds that role.
    #[serde(default)]
    pub requested_role: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct AssistantMessageResponse {
    pub reply: String,
    /// Shared by both audit trails for this request. Absent when nothing was audited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct ExplainModeResponse {
    pub armed: bool,
}

fn validate_message(req: &AssistantMessageRequest) -> Result<(), AppError> {
    if req.content.chars().count() > MAX_CONTENT_CHARS {
        return Err(AppError::Validation {
            message: format!("content must be at most {MAX_CONTENT_CHARS} characters"),
            field: Some("content".to_string()),
            docs_hint: Some("Split long questions into several messages.".to_string()),
        });
    }
    if let Some(role) = &req.requested_role
        && role.chars().count() > MAX_ROLE_CHARS
    {
        return Err(AppError::Validation {
            message: format!("requested_role must be at most {MAX_ROLE_CHARS} characters"),
            field: Some("requested_role".to_string()),
            docs_hint: Some(
                "Use a role such as 'admin', 'comptable', 'enseignant', 'eleve' or 'parent'."
                    .to_string(),
            ),
        });
    }
    Ok(())
}

/// Send a message to the caller's assistant persona
///
/// Resolves the persona from the caller's roles, retrieves tenant-scoped
/// documents, checks them against the persona's allow-list and returns the
/// composed, redacted context. Denials come back as a 200 with a templated
/// apology; the reason is only in the audit trail.
#[utoipa::path(
    post,
    path = "/v1/assistant/messages",
    request_body = AssistantMessageRequest,
    responses(
        (status = 200, description = "Assistant reply", body = AssistantMessageResponse),
        (status = 400, description = "Invalid request", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 429, description = "Too many requests from this address", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "assistant"
)]
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    Json(req): Json<AssistantMessageRequest>,
) -> Result<Json<AssistantMessageResponse>, AppError> {
    validate_message(&req)?;

    let user = auth.to_school_user();
    let outcome = state
        .gateway
        .respond_with_outcome(&user, &req.content, req.requested_role.as_deref())
        .await;

    tracing::debug!(
        user_id = %auth.user_id,
        key_id = %auth.key_id,
        status = ?outcome.status.map(|s| s.as_str()),
        "assistant message handled"
    );

    Ok(Json(AssistantMessageResponse {
        reply: outcome.text,
        correlation_id: outcome.correlation_id,
    }))
}

/// Arm explain mode for the caller's next reply
///
/// The next successful reply carries an explain block naming the sources
/// consulted and the rules applied; the mode then clears itself. Only
/// callers holding an administrator role may enable it.
#[utoipa::path(
    post,
    path = "/v1/assistant/explain",
    responses(
        (status = 200, description = "Explain mode armed", body = ExplainModeResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 403, description = "Caller is not an administrator", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "assistant"
)]
pub async fn enable_explain(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<ExplainModeResponse>, AppError> {
    let user = auth.to_school_user();
    state
        .gateway
        .enable_explain(&user)
        .await
        .map_err(|err| AppError::Forbidden {
            message: err.to_string(),
            docs_hint: Some("Explain mode requires an administrator role.".to_string()),
        })?;
    Ok(Json(ExplainModeResponse { armed: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str, role: Option<&str>) -> AssistantMessageRequest {
        AssistantMessageRequest {
            content: content.to_string(),
            requested_role: role.map(str::to_string),
        }
    }

    #[test]
    fn accepts_normal_messages() {
        assert!(validate_message(&request("Qui est absent ?", Some("enseignant"))).is_ok());
        assert!(validate_message(&request("", None)).is_ok());
    }

    #[test]
    fn rejects_oversized_content() {
        let long = "a".repeat(MAX_CONTENT_CHARS + 1);
        match validate_message(&request(&long, None)) {
            Err(AppError::Validation { field, .. }) => assert_eq!(field.as_deref(), Some("content")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_role() {
        let role = "r".repeat(MAX_ROLE_CHARS + 1);
        assert!(matches!(
            validate_message(&request("notes", Some(&role))),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn request_defaults_missing_fields() {
        let req: AssistantMessageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.content, "");
        assert!(req.requested_role.is_none());
    }
}
