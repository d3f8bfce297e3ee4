use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

const DEFAULT_ORIGINS: &str = "http://localhost:5173";

/// CORS for the school web front-end, from `SCOLARIS_CORS_ORIGINS`
/// (comma-separated). Only the assistant's verbs and headers are allowed.
pub fn build_cors_layer() -> CorsLayer {
    let raw =
        std::env::var("SCOLARIS_CORS_ORIGINS").unwrap_or_else(|_| DEFAULT_ORIGINS.to_string());

    CorsLayer::new()
        .allow_origin(parse_origins(&raw))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    let mut seen: Vec<String> = Vec::new();
    for origin in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let origin = origin.trim_end_matches('/');
        if !seen.iter().any(|o| o.eq_ignore_ascii_case(origin)) {
            seen.push(origin.to_string());
        }
    }
    seen.into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_dedupes_origins() {
        let origins = parse_origins(" https://ecole.example/ ,https://ECOLE.example,, http://localhost:5173");
        assert_eq!(
            origins,
            vec![
                HeaderValue::from_static("https://ecole.example"),
                HeaderValue::from_static("http://localhost:5173"),
            ]
        );
    }

    #[test]
    fn drops_unparseable_origins() {
        assert!(parse_origins("bad\norigin").is_empty());
    }
}
