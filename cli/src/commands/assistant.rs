use serde_json::json;

use crate::util::{api_request, exit_error, resolve_token};

/// Send one message to the caller's assistant persona.
pub async fn ask(api_url: &str, message: &str, role: Option<&str>, raw: bool) -> i32 {
    let token = token_or_exit();
    let mut body = json!({ "content": message });
    if let Some(role) = role {
        body["requested_role"] = json!(role);
    }
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/assistant/messages",
        Some(&token),
        Some(body),
        raw,
    )
    .await
}

/// Arm explain mode for the next reply (administrators only).
pub async fn explain(api_url: &str, raw: bool) -> i32 {
    let token = token_or_exit();
    api_request(
        api_url,
        reqwest::Method::POST,
        "/v1/assistant/explain",
        Some(&token),
        None,
        raw,
    )
    .await
}

fn token_or_exit() -> String {
    resolve_token().unwrap_or_else(|message| {
        exit_error(
            &message,
            Some("Provision a key with 'scolaris key generate' and export SCOLARIS_API_KEY."),
        )
    })
}
