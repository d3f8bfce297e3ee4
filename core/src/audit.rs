//! Audit record types for the two trails: the assistant-specific RAG trail
//! and the generic application-wide trail. Both share a correlation id.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agents::AgentKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagStatus {
    Ok,
    NoAgent,
    NoAccess,
    RateLimited,
    NoData,
    UnexpectedDocument,
}

impl RagStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NoAgent => "no_agent",
            Self::NoAccess => "no_access",
            Self::RateLimited => "rate_limited",
            Self::NoData => "no_data",
            Self::UnexpectedDocument => "unexpected_document",
        }
    }
}

impl std::fmt::Display for RagStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the RAG trail, written once per terminal gateway branch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagAuditRecord {
    pub correlation_id: Uuid,
    pub school_id: Option<Uuid>,
    pub user_id: Uuid,
    pub role: Option<String>,
    pub agent_key: Option<AgentKey>,
    pub agent_name: Option<String>,
    pub status: RagStatus,
    pub document_ids: Vec<Uuid>,
    pub documents_count: usize,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    /// Security violation reason. Internal only.
    pub violation: Option<String>,
    pub tenant_source: Option<String>,
    pub question_chars: usize,
    pub query_diagnostics: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Typed column value, independent of the database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditValue {
    Uuid(Option<Uuid>),
    Text(Option<String>),
    Int(i64),
    Bool(bool),
    Json(Option<Value>),
    Timestamp(DateTime<Utc>),
}

impl RagAuditRecord {
    /// Full column set. Structured fields are JSON-encoded.
    pub fn columns(&self) -> Vec<(&'static str, AuditValue)> {
        vec![
            ("correlation_id", AuditValue::Uuid(Some(self.correlation_id))),
            ("school_id", AuditValue::Uuid(self.school_id)),
            ("user_id", AuditValue::Uuid(Some(self.user_id))),
            ("role", AuditValue::Text(self.role.clone())),
            (
                "agent_key",
                AuditValue::Text(self.agent_key.map(|key| key.as_str().to_string())),
            ),
            ("agent_name", AuditValue::Text(self.agent_name.clone())),
            ("status", AuditValue::Text(Some(self.status.as_str().to_string()))),
            (
                "document_ids",
                AuditValue::Json(Some(serde_json::json!(self.document_ids))),
            ),
            ("documents_count", AuditValue::Int(self.documents_count as i64)),
            ("flagged", AuditValue::Bool(self.flagged)),
            ("flag_reason", AuditValue::Text(self.flag_reason.clone())),
            ("violation", AuditValue::Text(self.violation.clone())),
            ("tenant_source", AuditValue::Text(self.tenant_source.clone())),
            ("question_chars", AuditValue::Int(self.question_chars as i64)),
            ("query_diagnostics", AuditValue::Json(self.query_diagnostics.clone())),
            ("created_at", AuditValue::Timestamp(self.created_at)),
        ]
    }
}

/// Keep only the columns the target store actually has, preserving order.
pub fn retain_columns(
    columns: Vec<(&'static str, AuditValue)>,
    available: &HashSet<String>,
) -> Vec<(&'static str, AuditValue)> {
    columns
        .into_iter()
        .filter(|(name, _)| available.contains(*name))
        .collect()
}

/// Entity-agnostic audit entry shared by the whole application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub correlation_id: Option<Uuid>,
    /// `None` for unauthenticated contexts; such entries are not written.
    pub actor_user_id: Option<Uuid>,
    pub school_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: &str, entity_type: &str) -> Self {
        Self {
            correlation_id: None,
            actor_user_id: None,
            school_id: None,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: None,
            before: None,
            after: None,
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    /// Attach before/after snapshots of a mutated entity.
    pub fn with_change(mut self, before: Value, after: Value) -> Self {
        self.before = Some(before);
        self.after = Some(after);
        self
    }
}
