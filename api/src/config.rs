use scolaris_core::messages::Locale;
use scolaris_core::prompt::ComposerLimits;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_RETRIEVAL_LIMIT: usize = 8;
const MAX_RETRIEVAL_LIMIT: usize = 50;
/// Text-search configuration of the generated `rag_documents.search_vector`
/// column. Queries must use the same one to stem alike.
pub const INDEX_FTS_CONFIG: &str = "french";
/// Smallest data-context budget that still fits one short item.
const MIN_CONTEXT_CHARS: usize = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    pub port: u16,
    pub locale: Locale,
    pub rag_enabled: bool,
    pub alerts_enabled: bool,
    pub retrieval_limit: usize,
    pub fts_config: String,
    pub counter_backend: CounterBackend,
    pub composer: ComposerLimits,
}

impl GatewayConfig {
    /// False when queries would stem differently from the stored index.
    pub fn fts_matches_index(&self) -> bool {
        self.fts_config == INDEX_FTS_CONFIG
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Invalid or missing values use defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ComposerLimits::default();
        let number = |key: &str, default: usize| -> usize {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            port: lookup("PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_PORT),
            locale: lookup("SCOLARIS_LOCALE")
                .and_then(|v| Locale::parse(&v))
                .unwrap_or_default(),
            rag_enabled: flag(lookup("SCOLARIS_RAG_ENABLED"), true),
            alerts_enabled: flag(lookup("SCOLARIS_ALERTS_ENABLED"), true),
            retrieval_limit: number("SCOLARIS_RAG_LIMIT", DEFAULT_RETRIEVAL_LIMIT)
                .clamp(1, MAX_RETRIEVAL_LIMIT),
            fts_config: lookup("SCOLARIS_FTS_CONFIG")
                .map(|v| v.trim().to_lowercase())
                .filter(|v| is_identifier(v))
                .unwrap_or_else(|| INDEX_FTS_CONFIG.to_string()),
            counter_backend: match lookup("SCOLARIS_COUNTER_BACKEND")
                .unwrap_or_default()
                .trim()
                .to_lowercase()
                .as_str()
            {
                "memory" => CounterBackend::Memory,
                _ => CounterBackend::Postgres,
            },
            composer: ComposerLimits {
                max_items: number("SCOLARIS_PROMPT_MAX_ITEMS", defaults.max_items),
                max_item_chars: number("SCOLARIS_PROMPT_MAX_ITEM_CHARS", defaults.max_item_chars),
                max_context_chars: context_budget(number(
                    "SCOLARIS_PROMPT_MAX_CONTEXT_CHARS",
                    defaults.max_context_chars,
                )),
                max_alerts: number("SCOLARIS_PROMPT_MAX_ALERTS", defaults.max_alerts),
                max_explain_sources: defaults.max_explain_sources,
            },
        }
    }
}

fn context_budget(requested: usize) -> usize {
    if requested < MIN_CONTEXT_CHARS {
        tracing::warn!(
            requested,
            effective = MIN_CONTEXT_CHARS,
            "SCOLARIS_PROMPT_MAX_CONTEXT_CHARS too small, raised"
        );
        return MIN_CONTEXT_CHARS;
    }
    requested
}

fn flag(value: Option<String>, default: bool) -> bool {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("true" | "1" | "yes" | "on") => true,
        Some("false" | "0" | "no" | "off") => false,
        _ => default,
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> GatewayConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.locale, Locale::Fr);
        assert!(cfg.rag_enabled);
        assert!(cfg.alerts_enabled);
        assert_eq!(cfg.retrieval_limit, 8);
        assert_eq!(cfg.fts_config, "french");
        assert!(cfg.fts_matches_index());
        assert_eq!(cfg.counter_backend, CounterBackend::Postgres);
        assert_eq!(cfg.composer, ComposerLimits::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("SCOLARIS_LOCALE", "en"),
            ("SCOLARIS_RAG_ENABLED", "false"),
            ("SCOLARIS_RAG_LIMIT", "12"),
            ("SCOLARIS_COUNTER_BACKEND", "Memory"),
            ("SCOLARIS_PROMPT_MAX_ITEMS", "3"),
        ]);
        assert_eq!(cfg.locale, Locale::En);
        assert!(!cfg.rag_enabled);
        assert_eq!(cfg.retrieval_limit, 12);
        assert_eq!(cfg.counter_backend, CounterBackend::Memory);
        assert_eq!(cfg.composer.max_items, 3);
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config(&[
            ("PORT", "http"),
            ("SCOLARIS_LOCALE", "klingon"),
            ("SCOLARIS_ALERTS_ENABLED", "maybe"),
            ("SCOLARIS_RAG_LIMIT", "500"),
            ("SCOLARIS_FTS_CONFIG", "french; DROP TABLE"),
        ]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.locale, Locale::Fr);
        assert!(cfg.alerts_enabled);
        assert_eq!(cfg.retrieval_limit, 50);
        assert_eq!(cfg.fts_config, "french");
        assert_eq!(config(&[("SCOLARIS_RAG_LIMIT", "0")]).retrieval_limit, 1);
    }

    #[test]
    fn other_fts_config_is_flagged_as_mismatched() {
        let cfg = config(&[("SCOLARIS_FTS_CONFIG", "English")]);
        assert_eq!(cfg.fts_config, "english");
        assert!(!cfg.fts_matches_index());
    }

    #[test]
    fn tiny_context_budget_is_raised_to_minimum() {
        let cfg = config(&[("SCOLARIS_PROMPT_MAX_CONTEXT_CHARS", "60")]);
        assert_eq!(cfg.composer.max_context_chars, 120);
        let cfg = config(&[("SCOLARIS_PROMPT_MAX_CONTEXT_CHARS", "900")]);
        assert_eq!(cfg.composer.max_context_chars, 900);
    }
}
