use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
    std::process::exit(1);
}

/// Bearer token from `SCOLARIS_API_KEY`.
pub fn resolve_token() -> Result<String, String> {
    token_from(std::env::var("SCOLARIS_API_KEY").ok())
}

fn token_from(value: Option<String>) -> Result<String, String> {
    match value.map(|v| v.trim().to_string()) {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err("No API key found. Set SCOLARIS_API_KEY.".to_string()),
    }
}

/// Execute an API request, print the JSON response, exit with structured code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    token: Option<&str>,
    body: Option<serde_json::Value>,
    raw: bool,
) -> i32 {
    let base = api_url.trim_end_matches('/');
    let url = match reqwest::Url::parse(&format!("{base}{path}")) {
        Ok(u) => u,
        Err(e) => {
            let err = json!({
                "error": "cli_error",
                "message": format!("Invalid URL: {base}{path}: {e}")
            });
            eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            return 4;
        }
    };

    let mut req = client().request(method, url);
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = json!({
                "error": "connection_error",
                "message": format!("{e}"),
                "docs_hint": "Is the API server running? Check SCOLARIS_API_URL."
            });
            eprintln!("{}", serde_json::to_string_pretty(&err).unwrap_or_default());
            return 3;
        }
    };

    let exit_code = exit_code_for(resp.status().as_u16());
    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };

    let formatted = if raw {
        serde_json::to_string(&resp_body)
    } else {
        serde_json::to_string_pretty(&resp_body)
    }
    .unwrap_or_default();

    if exit_code == 0 {
        println!("{formatted}");
    } else {
        eprintln!("{formatted}");
    }
    exit_code
}

fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}
