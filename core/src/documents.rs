use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_QUERY_TOKENS: usize = 12;
const MIN_TOKEN_CHARS: usize = 2;

/// A candidate document returned by the tenant document index.
/// Produced per request, never persisted by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub doc_id: Uuid,
    pub text: String,
    pub document_type: Option<String>,
    pub source_table: Option<String>,
    pub source_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    FullText,
    Pattern,
    Recent,
}

impl RetrievalStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullText => "fulltext",
            Self::Pattern => "pattern",
            Self::Recent => "recent",
        }
    }
}

/// Exactly what was executed against the index. Audit/explain only, never
/// shown to the end user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDiagnostics {
    pub strategy: RetrievalStrategy,
    pub statement: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_query: Option<String>,
    pub limit: usize,
    pub row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentBatch {
    pub rows: Vec<RetrievedDocument>,
    pub diagnostics: Vec<QueryDiagnostics>,
}

impl DocumentBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append another stage's diagnostics and replace the rows.
    pub fn then(mut self, next: DocumentBatch) -> DocumentBatch {
        self.diagnostics.extend(next.diagnostics);
        DocumentBatch {
            rows: next.rows,
            diagnostics: self.diagnostics,
        }
    }
}

/// Normalize free text into search tokens: lowercase, letters/digits/
/// apostrophes only, short tokens dropped, token count capped.
pub fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .map(|token| token.trim_matches('\''))
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .take(MAX_QUERY_TOKENS)
        .map(str::to_string)
        .collect()
}

pub fn normalize_query(query: &str) -> String {
    query_tokens(query).join(" ")
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
pub fn like_pattern(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len() + 2);
    escaped.push('%');
    for c in token.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_query_drops_syntax_and_short_tokens() {
        assert_eq!(
            normalize_query("Notes de \"Martin\" a-t-il (maths) & OR -- ?"),
            "notes de martin il maths or"
        );
        assert_eq!(normalize_query("  !!! ' "), "");
    }

    #[test]
    fn normalize_query_caps_token_count() {
        let long = (0..40).map(|i| format!("mot{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(query_tokens(&long).len(), MAX_QUERY_TOKENS);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_a\\b"), "%50\\%\\_a\\\\b%");
    }

    #[test]
    fn then_keeps_all_diagnostics() {
        let diag = |strategy| QueryDiagnostics {
            strategy,
            statement: String::new(),
            normalized_query: None,
            limit: 5,
            row_count: 0,
            fallback_reason: None,
        };
        let first = DocumentBatch {
            rows: Vec::new(),
            diagnostics: vec![diag(RetrievalStrategy::FullText)],
        };
        let second = DocumentBatch {
            rows: Vec::new(),
            diagnostics: vec![diag(RetrievalStrategy::Recent)],
        };
        let merged = first.then(second);
        assert_eq!(merged.diagnostics.len(), 2);
        assert_eq!(merged.diagnostics[1].strategy, RetrievalStrategy::Recent);
    }
}
