use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use scolaris_core::agents::{AgentDirectory, AgentKey, AgentProfile, SchoolUser};
use scolaris_core::audit::{AuditEntry, RagAuditRecord, RagStatus};
use scolaris_core::documents::DocumentBatch;
use scolaris_core::messages;
use scolaris_core::prompt::{ComposeRequest, PromptComposer};
use scolaris_core::security::SecurityValidator;
use serde_json::json;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::abuse::{AbuseTracker, DenialOutcome};
use super::alerts::AlertEngine;
use super::audit::AuditLogger;
use super::documents::{DocumentRepository, ScopedContext, retrieve_with_fallback};
use super::rate_limiter::RateLimiter;
use super::tenant::{TenantResolver, TenantSource};

pub const RATE_LIMIT_EXCEEDED: &str = "rate_limit_exceeded";
pub const RETRIEVAL_FAILED: &str = "retrieval_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("explain mode is restricted to the admin assistant")]
pub struct ExplainNotAllowed;

#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
    /// When false, the assistant answers in isolated mode without data access.
    pub rag_enabled: bool,
    pub alerts_enabled: bool,
    pub retrieval_limit: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            rag_enabled: true,
            alerts_enabled: true,
            retrieval_limit: 8,
        }
    }
}

/// Collaborators the gateway is assembled from.
pub struct GatewayParts {
    pub directory: AgentDirectory,
    pub tenants: TenantResolver,
    pub rate_limiter: RateLimiter,
    pub abuse: AbuseTracker,
    pub documents: Arc<dyn DocumentRepository>,
    pub validator: SecurityValidator,
    pub alerts: AlertEngine,
    pub composer: PromptComposer,
    pub audit: AuditLogger,
    pub settings: GatewaySettings,
}

/// Result of one `respond` call. `status` and `correlation_id` are absent
/// for greetings and isolated-mode replies, which are not audited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagOutcome {
    pub text: String,
    pub status: Option<RagStatus>,
    pub correlation_id: Option<Uuid>,
}

pub struct RagGateway {
    directory: AgentDirectory,
    tenants: TenantResolver,
    rate_limiter: RateLimiter,
    abuse: AbuseTracker,
    documents: Arc<dyn DocumentRepository>,
    validator: SecurityValidator,
    alerts: AlertEngine,
    composer: PromptComposer,
    audit: AuditLogger,
    settings: GatewaySettings,
    /// Users with explain mode armed for their next successful composition.
    explain: Mutex<HashSet<Uuid>>,
}

/// Per-request facts accumulated as the state machine advances.
struct Trail<'a> {
    correlation_id: Uuid,
    user: &'a SchoolUser,
    profile: Option<&'a AgentProfile>,
    question_chars: usize,
    tenant: Option<(Uuid, TenantSource)>,
}

impl Trail<'_> {
    fn record(&self, status: RagStatus) -> RagAuditRecord {
        RagAuditRecord {
            correlation_id: self.correlation_id,
            school_id: self.tenant.map(|(school_id, _)| school_id),
            user_id: self.user.id,
            role: (!self.user.roles.is_empty()).then(|| self.user.roles.join(",")),
            agent_key: self.profile.map(|profile| profile.key),
            agent_name: self.profile.map(|profile| profile.name.clone()),
            status,
            document_ids: Vec::new(),
            documents_count: 0,
            flagged: false,
            flag_reason: None,
            violation: None,
            tenant_source: self.tenant.map(|(_, source)| source.as_str().to_string()),
            question_chars: self.question_chars,
            query_diagnostics: None,
            created_at: Utc::now(),
        }
    }
}

fn with_denial(mut record: RagAuditRecord, denial: &DenialOutcome) -> RagAuditRecord {
    record.flagged = denial.flagged;
    record.flag_reason = denial.reason.map(str::to_string);
    record
}

fn with_batch(mut record: RagAuditRecord, batch: &DocumentBatch) -> RagAuditRecord {
    record.document_ids = batch.rows.iter().map(|doc| doc.doc_id).collect();
    record.documents_count = batch.rows.len();
    record.query_diagnostics = serde_json::to_value(&batch.diagnostics).ok();
    record
}

impl RagGateway {
    pub fn new(parts: GatewayParts) -> Self {
        Self {
            directory: parts.directory,
            tenants: parts.tenants,
            rate_limiter: parts.rate_limiter,
            abuse: parts.abuse,
            documents: parts.documents,
            validator: parts.validator,
            alerts: parts.alerts,
            composer: parts.composer,
            audit: parts.audit,
            settings: parts.settings,
            explain: Mutex::new(HashSet::new()),
        }
    }

    pub fn directory(&self) -> &AgentDirectory {
        &self.directory
    }

    pub async fn respond(
        &self,
        user: &SchoolUser,
        content: &str,
        requested_role: Option<&str>,
    ) -> String {
        self.respond_with_outcome(user, content, requested_role)
            .await
            .text
    }

    pub async fn respond_with_outcome(
        &self,
        user: &SchoolUser,
        content: &str,
        requested_role: Option<&str>,
    ) -> RagOutcome {
        let locale = self.directory.locale();
        let question = content.trim();
        let mut trail = Trail {
            correlation_id: Uuid::now_v7(),
            user,
            profile: None,
            question_chars: question.chars().count(),
            tenant: None,
        };

        let Some(profile) = self.directory.resolve_profile(user, requested_role) else {
            return self
                .terminal(&trail, trail.record(RagStatus::NoAgent), messages::no_agent(locale))
                .await;
        };
        trail.profile = Some(profile);

        if question.is_empty() || !self.settings.rag_enabled {
            return RagOutcome {
                text: self.directory.build_reply(profile, question),
                status: None,
                correlation_id: None,
            };
        }

        let apology = || messages::no_authorized_data(profile, locale);

        let Some((school_id, source)) = self.tenants.resolve_school_id(user).await else {
            let denial = self.abuse.record_denied(user.id).await;
            let record = with_denial(trail.record(RagStatus::NoAccess), &denial);
            return self.terminal(&trail, record, apology()).await;
        };
        trail.tenant = Some((school_id, source));

        let rate = self
            .rate_limiter
            .check(profile.key.as_str(), user.id)
            .await;
        if !rate.allowed {
            let mut record = trail.record(RagStatus::RateLimited);
            record.flagged = true;
            record.flag_reason = Some(RATE_LIMIT_EXCEEDED.to_string());
            return self
                .terminal(&trail, record, messages::rate_limited(profile, locale))
                .await;
        }

        let scope = ScopedContext {
            user_id: user.id,
            school_id,
            role: profile.key,
        };
        let batch = match retrieve_with_fallback(
            self.documents.as_ref(),
            &scope,
            question,
            self.settings.retrieval_limit,
        )
        .await
        {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    correlation_id = %trail.correlation_id,
                    "document retrieval failed"
                );
                let mut record = trail.record(RagStatus::NoData);
                record.flag_reason = Some(RETRIEVAL_FAILED.to_string());
                return self.terminal(&trail, record, apology()).await;
            }
        };

        if batch.is_empty() {
            let denial = self.abuse.record_denied(user.id).await;
            let record = with_batch(with_denial(trail.record(RagStatus::NoData), &denial), &batch);
            return self.terminal(&trail, record, apology()).await;
        }

        if let Err(violation) = self
            .validator
            .assert_documents_allowed(profile.key, &batch.rows)
        {
            let denial = self.abuse.record_denied(user.id).await;
            let mut record = with_batch(
                with_denial(trail.record(RagStatus::UnexpectedDocument), &denial),
                &batch,
            );
            record.violation = Some(violation.reason());
            return self.terminal(&trail, record, apology()).await;
        }

        let alerts = if self.settings.alerts_enabled {
            match self
                .alerts
                .generate(user.id, school_id, profile.key, Utc::now())
                .await
            {
                Ok(alerts) => alerts,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        correlation_id = %trail.correlation_id,
                        "alert generation failed; continuing without alerts"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let explain = self.take_explain(user.id).await.then(|| {
            let strategies: Vec<&str> = batch
                .diagnostics
                .iter()
                .map(|diag| diag.strategy.as_str())
                .collect();
            vec![
                format!("tenant:{}", source.as_str()),
                format!("retrieval:{}", strategies.join(">")),
            ]
        });

        let text = self.composer.compose(ComposeRequest {
            profile,
            documents: &batch.rows,
            question,
            alerts,
            explain,
        });
        let record = with_batch(trail.record(RagStatus::Ok), &batch);
        self.terminal(&trail, record, text).await
    }

    /// Arm explain mode for the user's next successful composition.
    pub async fn enable_explain(&self, user: &SchoolUser) -> Result<(), ExplainNotAllowed> {
        if !self
            .directory
            .available_keys(user)
            .contains(&AgentKey::Admin)
        {
            tracing::warn!(user_id = %user.id, "explain mode refused");
            return Err(ExplainNotAllowed);
        }

        let was_armed = !self.explain.lock().await.insert(user.id);
        let mut entry = AuditEntry::new("assistant.explain.enable", "assistant_explain_mode")
            .with_change(json!({"armed": was_armed}), json!({"armed": true}));
        entry.actor_user_id = Some(user.id);
        entry.school_id = user.school_id;
        entry.entity_id = Some(user.id.to_string());
        self.audit.log_activity(&entry).await;
        tracing::info!(user_id = %user.id, "explain mode armed");
        Ok(())
    }

    async fn take_explain(&self, user_id: Uuid) -> bool {
        self.explain.lock().await.remove(&user_id)
    }

    async fn terminal(&self, trail: &Trail<'_>, record: RagAuditRecord, text: String) -> RagOutcome {
        tracing::info!(
            correlation_id = %record.correlation_id,
            user_id = %record.user_id,
            status = %record.status,
            agent_key = ?record.agent_key.map(AgentKey::as_str),
            documents_count = record.documents_count,
            flagged = record.flagged,
            "assistant request finished"
        );

        let mut entry = AuditEntry::new("assistant.respond", "rag_request");
        entry.correlation_id = Some(trail.correlation_id);
        entry.actor_user_id = Some(trail.user.id);
        entry.school_id = record.school_id;
        entry.entity_id = Some(trail.correlation_id.to_string());
        entry.metadata = json!({
            "status": record.status.as_str(),
            "agent_key": record.agent_key.map(AgentKey::as_str),
            "documents_count": record.documents_count,
            "flagged": record.flagged,
        });
        self.audit.log_request(&record, &entry).await;

        RagOutcome {
            text,
            status: Some(record.status),
            correlation_id: Some(trail.correlation_id),
        }
    }
}
