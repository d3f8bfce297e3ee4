//! Assembly of the final structured context handed to the generation step.
//!
//! Block order is fixed: system context, data context, limitations, alerts,
//! output format, question, explain trace. Every piece of user or document
//! text goes through [`redact`] before it is written.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agents::AgentProfile;
use crate::alerts::{Alert, render_alert};
use crate::documents::RetrievedDocument;
use crate::messages::Locale;
use crate::redact::redact;

const ELLIPSIS: char = '…';
const MIN_ITEM_CHARS: usize = 16;
const SOURCE_ID_CHARS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Decision,
    Actions,
    Summary,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Decision => "decision",
            Self::Actions => "actions",
            Self::Summary => "summary",
        }
    }

    pub fn from_alias(value: &str) -> Option<Self> {
        let normalized = value
            .trim()
            .to_lowercase()
            .replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalized.as_str() {
            "table" | "tableau" | "tabular" => Some(Self::Table),
            "decision" | "décision" => Some(Self::Decision),
            "actions" | "action plan" | "actionplan" | "plan d'action" | "plan" => {
                Some(Self::Actions)
            }
            "summary" | "short summary" | "résumé" | "resume" | "synthèse" | "synthese"
            | "bref" => Some(Self::Summary),
            _ => None,
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Self::Table => "Answer with a compact markdown table, one row per item.",
            Self::Decision => {
                "State the recommended decision first, then the two or three facts supporting it."
            }
            Self::Actions => "Answer with a numbered action plan of concrete next steps.",
            Self::Summary => "Answer with a short summary of at most five sentences.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatSource {
    ExplicitToken,
    Phrase,
    Keyword,
    RoleDefault,
}

impl FormatSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitToken => "explicit_token",
            Self::Phrase => "phrase",
            Self::Keyword => "keyword",
            Self::RoleDefault => "role_default",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatResolution {
    pub format: OutputFormat,
    pub source: FormatSource,
}

static FORMAT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bformat\s*[:=]\s*([\p{L}'_\-]+(?:[ \-][\p{L}]+)?)")
        .expect("valid format token regex")
});

static FORMAT_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:in|as|en|sous forme de)\s+|sous forme d')(?:an?\s+|the\s+|une?\s+|la\s+|le\s+)?(tableau|table|d[ée]cision|action[\s\-]?plan|plan d'action|actions|short summary|summary|r[ée]sum[ée]|synth[èe]se)\b",
    )
    .expect("valid format phrase regex")
});

/// Keyword tier, checked in this order.
static FORMAT_KEYWORDS: LazyLock<Vec<(OutputFormat, Regex)>> = LazyLock::new(|| {
    [
        (OutputFormat::Table, r"(?i)\b(?:tableau|table|tabular|compare[rz]?)\b"),
        (
            OutputFormat::Decision,
            r"(?i)\b(?:d[ée]cision|d[ée]cider|decide|trancher|choisir|choose)\b",
        ),
        (
            OutputFormat::Actions,
            r"(?i)(?:\bplan d'action|\baction plan\b|\bnext steps\b|\bprochaines [ée]tapes\b|\bque faire\b|\bwhat should\b)",
        ),
        (
            OutputFormat::Summary,
            r"(?i)(?:\br[ée]sum[ée]\b|\bsummar(?:y|ize|ise)\b|\bsynth[èe]se\b|\ben bref\b|\btl;dr)",
        ),
    ]
    .into_iter()
    .map(|(format, pattern)| (format, Regex::new(pattern).expect("valid format keyword regex")))
    .collect()
});

/// Explicit `format: X` > "in X" phrasing > keyword > persona default.
pub fn resolve_output_format(question: &str, default: OutputFormat) -> FormatResolution {
    if let Some(format) = FORMAT_TOKEN_RE
        .captures_iter(question)
        .find_map(|caps| {
            OutputFormat::from_alias(&caps[1]).or_else(|| {
                caps[1]
                    .split([' ', '-'])
                    .next()
                    .and_then(OutputFormat::from_alias)
            })
        })
    {
        return FormatResolution {
            format,
            source: FormatSource::ExplicitToken,
        };
    }

    if let Some(format) = FORMAT_PHRASE_RE
        .captures_iter(question)
        .find_map(|caps| OutputFormat::from_alias(&caps[1]))
    {
        return FormatResolution {
            format,
            source: FormatSource::Phrase,
        };
    }

    if let Some((format, _)) = FORMAT_KEYWORDS
        .iter()
        .find(|(_, pattern)| pattern.is_match(question))
    {
        return FormatResolution {
            format: *format,
            source: FormatSource::Keyword,
        };
    }

    FormatResolution {
        format: default,
        source: FormatSource::RoleDefault,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposerLimits {
    pub max_items: usize,
    pub max_item_chars: usize,
    pub max_context_chars: usize,
    pub max_alerts: usize,
    pub max_explain_sources: usize,
}

impl Default for ComposerLimits {
    fn default() -> Self {
        Self {
            max_items: 8,
            max_item_chars: 500,
            max_context_chars: 3000,
            max_alerts: 5,
            max_explain_sources: 10,
        }
    }
}

impl ComposerLimits {
    /// Raise item limits that are too small to render anything meaningful.
    /// The context budget is kept as given and never exceeded.
    pub fn normalized(self) -> Self {
        Self {
            max_items: self.max_items.max(1),
            max_item_chars: self.max_item_chars.max(MIN_ITEM_CHARS),
            max_context_chars: self.max_context_chars,
            max_alerts: self.max_alerts,
            max_explain_sources: self.max_explain_sources.max(1),
        }
    }
}

/// Rendered data-context block plus the bookkeeping the limitations note
/// and the explain trace need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContext {
    pub body: String,
    /// Candidates left after deduplication.
    pub total: usize,
    pub retained: usize,
    pub omitted: usize,
    pub shortened: usize,
    /// `table#id` for every retained item.
    pub sources: Vec<String>,
}

/// Everything one composition needs. Alerts are moved in and consumed.
#[derive(Debug, Clone)]
pub struct ComposeRequest<'a> {
    pub profile: &'a AgentProfile,
    pub documents: &'a [RetrievedDocument],
    pub question: &'a str,
    pub alerts: Vec<Alert>,
    /// Present only when explain mode is armed; extra rules to report.
    pub explain: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct PromptComposer {
    limits: ComposerLimits,
    locale: Locale,
}

impl PromptComposer {
    pub fn new(limits: ComposerLimits, locale: Locale) -> Self {
        Self {
            limits: limits.normalized(),
            locale,
        }
    }

    pub fn limits(&self) -> ComposerLimits {
        self.limits
    }

    pub fn compose(&self, request: ComposeRequest<'_>) -> String {
        let ComposeRequest {
            profile,
            documents,
            question,
            alerts,
            explain,
        } = request;

        let data = self.render_data_context(documents);
        let resolution = resolve_output_format(question, profile.default_format);
        let mut blocks = vec![
            self.system_block(profile),
            format!("[DATA CONTEXT]\n{}", data.body),
        ];

        if let Some(limitations) = limitations_block(&data) {
            blocks.push(limitations);
        }
        if let Some(alerts_block) = self.alerts_block(alerts) {
            blocks.push(alerts_block);
        }

        blocks.push(format!(
            "[OUTPUT FORMAT]\nOutput format: {}\n{}",
            resolution.format.as_str(),
            resolution.format.instruction()
        ));

        let question = question.trim();
        let question = if question.is_empty() {
            "(no question provided)".to_string()
        } else {
            redact(question)
        };
        blocks.push(format!("[QUESTION]\n{question}"));

        if let Some(extra_rules) = explain {
            blocks.push(self.explain_block(profile, &data, resolution, extra_rules));
        }

        blocks.join("\n\n")
    }

    fn system_block(&self, profile: &AgentProfile) -> String {
        let language = match self.locale {
            Locale::Fr => "French",
            Locale::En => "English",
        };
        let mut out = format!(
            "[SYSTEM CONTEXT]\nYou are {}, the {} assistant of a school management platform.",
            profile.name, profile.role
        );
        for (title, items) in [
            ("Access rules", &profile.access_rules),
            ("Tasks", &profile.tasks),
            ("Style", &profile.style),
        ] {
            out.push_str(&format!("\n{title}:"));
            for item in items {
                out.push_str(&format!("\n- {item}"));
            }
        }
        out.push_str(&format!(
            "\nUse only the data context below. Never infer data outside these rules. Reply in {language}."
        ));
        out
    }

    pub fn render_data_context(&self, documents: &[RetrievedDocument]) -> DataContext {
        let limits = self.limits;
        let unique = dedupe(documents);
        let total = unique.len();

        let mut lines: Vec<String> = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut shortened_flags: Vec<bool> = Vec::new();
        let mut used = 0usize;

        for doc in unique.iter().take(limits.max_items) {
            let (text, shortened) = clip(&collapse(&redact(&doc.text)), limits.max_item_chars);
            let line = format!(
                "- [{}] {}",
                doc.document_type.as_deref().unwrap_or("document"),
                text
            );
            let cost = line.chars().count() + usize::from(!lines.is_empty());
            if used + cost > limits.max_context_chars {
                break;
            }
            used += cost;
            lines.push(line);
            sources.push(source_ref(doc));
            shortened_flags.push(shortened);
        }

        // Make room for the omission line if anything was left out.
        loop {
            let omitted = total - lines.len();
            if omitted == 0 {
                break;
            }
            let note = format!("({omitted} more items omitted)");
            let cost = note.chars().count() + usize::from(!lines.is_empty());
            if used + cost <= limits.max_context_chars {
                lines.push(note);
                break;
            }
            if lines.is_empty() {
                lines.push(clip(&note, limits.max_context_chars).0);
                break;
            }
            if let Some(removed) = lines.pop() {
                used -= removed.chars().count() + usize::from(!lines.is_empty());
                sources.pop();
                shortened_flags.pop();
            }
        }

        let retained = sources.len();
        let body = if total == 0 {
            "(no authorized documents)".to_string()
        } else {
            lines.join("\n")
        };

        DataContext {
            body,
            total,
            retained,
            omitted: total - retained,
            shortened: shortened_flags.iter().filter(|flag| **flag).count(),
            sources,
        }
    }

    fn alerts_block(&self, alerts: Vec<Alert>) -> Option<String> {
        if alerts.is_empty() {
            return None;
        }
        let total = alerts.len();
        let mut out = String::from("[ALERTS]");
        for alert in alerts.iter().take(self.limits.max_alerts) {
            out.push_str("\n- ");
            out.push_str(&redact(&render_alert(alert)));
        }
        let omitted = total.saturating_sub(self.limits.max_alerts);
        if omitted > 0 {
            out.push_str(&format!("\n({omitted} more alerts omitted)"));
        }
        Some(out)
    }

    fn explain_block(
        &self,
        profile: &AgentProfile,
        data: &DataContext,
        resolution: FormatResolution,
        extra_rules: Vec<String>,
    ) -> String {
        let cap = self.limits.max_explain_sources;
        let mut sources = data
            .sources
            .iter()
            .take(cap)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if sources.is_empty() {
            sources = "none".to_string();
        }
        if data.sources.len() > cap {
            sources.push_str(&format!(" (+{} more)", data.sources.len() - cap));
        }

        let mut rules = vec![
            format!("allow_list:{}", profile.key),
            "redaction:email,phone".to_string(),
            format!(
                "caps:items={},item_chars={},context_chars={}",
                self.limits.max_items, self.limits.max_item_chars, self.limits.max_context_chars
            ),
            format!(
                "format:{}({})",
                resolution.format.as_str(),
                resolution.source.as_str()
            ),
        ];
        rules.extend(extra_rules);

        format!("[EXPLAIN]\nSources: {sources}\nRules: {}", rules.join("; "))
    }
}

fn limitations_block(data: &DataContext) -> Option<String> {
    let mut notes = Vec::new();
    if data.total == 0 {
        notes.push(
            "No authorized documents matched this request; say so instead of guessing.".to_string(),
        );
    }
    if data.omitted > 0 {
        notes.push(format!(
            "{} of {} documents were left out because of context limits; the answer may be incomplete.",
            data.omitted, data.total
        ));
    }
    if data.shortened > 0 {
        notes.push(format!(
            "{} documents were shortened to fit the context.",
            data.shortened
        ));
    }
    if notes.is_empty() {
        None
    } else {
        Some(format!("[LIMITATIONS]\n- {}", notes.join("\n- ")))
    }
}

/// Drop repeated documents by id and by identical (normalized) text.
fn dedupe(documents: &[RetrievedDocument]) -> Vec<&RetrievedDocument> {
    let mut seen_ids = HashSet::new();
    let mut seen_texts = HashSet::new();
    documents
        .iter()
        .filter(|doc| {
            let fresh_id = seen_ids.insert(doc.doc_id);
            let fresh_text = seen_texts.insert(collapse(&doc.text).to_lowercase());
            fresh_id && fresh_text
        })
        .collect()
}

/// `table#<last 8 hex digits of the id>`. Short enough that no id reads
/// as a phone number.
fn source_ref(doc: &RetrievedDocument) -> String {
    let id = doc.source_id.unwrap_or(doc.doc_id).simple().to_string();
    format!(
        "{}#{}",
        doc.source_table.as_deref().unwrap_or("unknown"),
        &id[id.len() - SOURCE_ID_CHARS..]
    )
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut `text` to at most `max_chars` characters, ellipsis included.
fn clip(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    let mut clipped: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    clipped.push(ELLIPSIS);
    (clipped, true)
}
