use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use scolaris_core::audit::{AuditEntry, AuditValue, RagAuditRecord, retain_columns};
use sqlx::PgPool;
use tokio::sync::OnceCell;

const RAG_AUDIT_TABLE: &str = "rag_audit_logs";

#[async_trait]
pub trait RagAuditSink: Send + Sync {
    async fn write(&self, record: &RagAuditRecord) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait ActivityAuditSink: Send + Sync {
    async fn write(&self, entry: &AuditEntry) -> Result<(), sqlx::Error>;
}

/// Dual-trail audit logger. Every write is best-effort: failures are logged
/// and never reach the caller.
#[derive(Clone)]
pub struct AuditLogger {
    rag: Arc<dyn RagAuditSink>,
    activity: Arc<dyn ActivityAuditSink>,
}

impl AuditLogger {
    pub fn new(rag: Arc<dyn RagAuditSink>, activity: Arc<dyn ActivityAuditSink>) -> Self {
        Self { rag, activity }
    }

    /// Write both trails for one gateway outcome. The generic entry is
    /// dropped when it has no authenticated actor.
    pub async fn log_request(&self, record: &RagAuditRecord, entry: &AuditEntry) {
        let (rag, activity) = tokio::join!(self.rag.write(record), self.write_activity(entry));
        if let Err(err) = rag {
            tracing::warn!(
                error = %err,
                correlation_id = %record.correlation_id,
                "failed to write rag audit record"
            );
        }
        if let Err(err) = activity {
            tracing::warn!(
                error = %err,
                correlation_id = %record.correlation_id,
                "failed to write audit entry"
            );
        }
    }

    /// Write a generic entry only, e.g. for a settings mutation.
    pub async fn log_activity(&self, entry: &AuditEntry) {
        if let Err(err) = self.write_activity(entry).await {
            tracing::warn!(error = %err, action = %entry.action, "failed to write audit entry");
        }
    }

    async fn write_activity(&self, entry: &AuditEntry) -> Result<(), sqlx::Error> {
        if entry.actor_user_id.is_none() {
            tracing::debug!(action = %entry.action, "skipping audit entry without actor");
            return Ok(());
        }
        self.activity.write(entry).await
    }
}

/// Writes `rag_audit_logs` rows using whichever columns the table has.
pub struct PgRagAuditSink {
    pool: PgPool,
    /// `None` once introspection found no table.
    columns: OnceCell<Option<HashSet<String>>>,
}

impl PgRagAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            columns: OnceCell::new(),
        }
    }

    async fn available_columns(&self) -> Result<Option<&HashSet<String>>, sqlx::Error> {
        let columns = self
            .columns
            .get_or_try_init(|| async {
                let names = sqlx::query_scalar::<_, String>(
                    "SELECT column_name::text FROM information_schema.columns \
                     WHERE table_schema = current_schema() AND table_name = $1",
                )
                .bind(RAG_AUDIT_TABLE)
                .fetch_all(&self.pool)
                .await?;
                if names.is_empty() {
                    tracing::info!(table = RAG_AUDIT_TABLE, "rag audit table missing; trail disabled");
                    Ok::<_, sqlx::Error>(None)
                } else {
                    Ok(Some(names.into_iter().collect()))
                }
            })
            .await?;
        Ok(columns.as_ref())
    }
}

/// `INSERT INTO table (a, b) VALUES ($1, $2)` for the given column names.
pub fn insert_statement(table: &str, names: &[&str]) -> String {
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

#[async_trait]
impl RagAuditSink for PgRagAuditSink {
    async fn write(&self, record: &RagAuditRecord) -> Result<(), sqlx::Error> {
        let Some(available) = self.available_columns().await? else {
            return Ok(());
        };
        let values = retain_columns(record.columns(), available);
        if values.is_empty() {
            return Ok(());
        }

        let names: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
        let sql = insert_statement(RAG_AUDIT_TABLE, &names);
        let mut query = sqlx::query(&sql);
        for (_, value) in values {
            query = match value {
                AuditValue::Uuid(v) => query.bind(v),
                AuditValue::Text(v) => query.bind(v),
                AuditValue::Int(v) => query.bind(v),
                AuditValue::Bool(v) => query.bind(v),
                AuditValue::Json(v) => query.bind(v),
                AuditValue::Timestamp(v) => query.bind(v),
            };
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}

/// The application-wide `audit_logs` trail.
pub struct PgActivityAuditSink {
    pool: PgPool,
}

impl PgActivityAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityAuditSink for PgActivityAuditSink {
    async fn write(&self, entry: &AuditEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO audit_logs \
             (id, correlation_id, actor_user_id, school_id, action, entity_type, entity_id, \
              before, after, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(uuid::Uuid::now_v7())
        .bind(entry.correlation_id)
        .bind(entry.actor_user_id)
        .bind(entry.school_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
