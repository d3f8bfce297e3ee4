//! Tenant document index access.
//!
//! Every read happens inside a [`DocumentReader`], a transactional scope
//! that carries the caller's `(user, school, role)` as transaction-local
//! settings for row-level policies. The scope ends with the transaction:
//! `finish` rolls it back explicitly, and dropping a reader on an error
//! path rolls it back as well, so the settings never outlive the request
//! on a pooled connection.

use async_trait::async_trait;
use scolaris_core::agents::AgentKey;
use scolaris_core::documents::{
    DocumentBatch, QueryDiagnostics, RetrievalStrategy, RetrievedDocument, like_pattern,
    normalize_query, query_tokens,
};
use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Caller identity propagated into the retrieval transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopedContext {
    pub user_id: Uuid,
    pub school_id: Uuid,
    pub role: AgentKey,
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn begin_scoped(
        &self,
        ctx: &ScopedContext,
    ) -> Result<Box<dyn DocumentReader>, sqlx::Error>;
}

#[async_trait]
pub trait DocumentReader: Send {
    async fn search_with_audit(
        &mut self,
        query: &str,
        limit: usize,
    ) -> Result<DocumentBatch, sqlx::Error>;

    async fn recent_with_audit(&mut self, limit: usize) -> Result<DocumentBatch, sqlx::Error>;

    /// Close the scope.
    async fn finish(self: Box<Self>) -> Result<(), sqlx::Error>;
}

/// Search, then fall back to recent documents when the search is empty.
pub async fn retrieve_with_fallback(
    repository: &dyn DocumentRepository,
    ctx: &ScopedContext,
    query: &str,
    limit: usize,
) -> Result<DocumentBatch, sqlx::Error> {
    let mut reader = repository.begin_scoped(ctx).await?;
    let batch = search_then_recent(&mut reader, query, limit).await?;
    reader.finish().await?;
    Ok(batch)
}

async fn search_then_recent(
    reader: &mut Box<dyn DocumentReader>,
    query: &str,
    limit: usize,
) -> Result<DocumentBatch, sqlx::Error> {
    let searched = reader.search_with_audit(query, limit).await?;
    if !searched.is_empty() {
        return Ok(searched);
    }
    let recent = reader.recent_with_audit(limit).await?;
    Ok(searched.then(recent))
}

const FULL_TEXT_SQL: &str = "SELECT d.id, d.text, d.document_type, d.source_table, d.source_id, \
            ts_rank_cd(d.search_vector, q)::real AS rank \
     FROM rag_documents d, websearch_to_tsquery($1::regconfig, $2) AS q \
     WHERE d.school_id = $3 AND d.search_vector @@ q \
     ORDER BY rank DESC, d.updated_at DESC \
     LIMIT $4";

const PATTERN_SQL: &str = "SELECT d.id, d.text, d.document_type, d.source_table, d.source_id, \
            NULL::real AS rank \
     FROM rag_documents d \
     WHERE d.school_id = $1 AND d.text ILIKE ANY($2) \
     ORDER BY d.updated_at DESC \
     LIMIT $3";

const RECENT_SQL: &str = "SELECT d.id, d.text, d.document_type, d.source_table, d.source_id, \
            NULL::real AS rank \
     FROM rag_documents d \
     WHERE d.school_id = $1 \
     ORDER BY d.updated_at DESC \
     LIMIT $2";

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    text: String,
    document_type: Option<String>,
    source_table: Option<String>,
    source_id: Option<Uuid>,
    rank: Option<f32>,
}

impl From<DocumentRow> for RetrievedDocument {
    fn from(row: DocumentRow) -> Self {
        Self {
            doc_id: row.id,
            text: row.text,
            document_type: row.document_type,
            source_table: row.source_table,
            source_id: row.source_id,
            rank: row.rank,
        }
    }
}

pub struct PgDocumentRepository {
    pool: PgPool,
    fts_config: String,
    full_text: OnceCell<bool>,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool, fts_config: String) -> Self {
        Self {
            pool,
            fts_config,
            full_text: OnceCell::new(),
        }
    }

    /// Whether the index has a `search_vector` column. Checked once.
    async fn full_text_available(&self) -> bool {
        let checked = self
            .full_text
            .get_or_try_init(|| async {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM information_schema.columns \
                     WHERE table_schema = current_schema() \
                       AND table_name = 'rag_documents' \
                       AND column_name = 'search_vector')",
                )
                .fetch_one(&self.pool)
                .await
            })
            .await;
        match checked {
            Ok(available) => *available,
            Err(err) => {
                tracing::warn!(error = %err, "full-text capability check failed");
                false
            }
        }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn begin_scoped(
        &self,
        ctx: &ScopedContext,
    ) -> Result<Box<dyn DocumentReader>, sqlx::Error> {
        let full_text = self.full_text_available().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "SELECT set_config('app.current_user_id', $1, true), \
                    set_config('app.current_school_id', $2, true), \
                    set_config('app.current_role', $3, true)",
        )
        .bind(ctx.user_id.to_string())
        .bind(ctx.school_id.to_string())
        .bind(ctx.role.as_str())
        .execute(&mut *tx)
        .await?;

        Ok(Box::new(PgDocumentReader {
            tx,
            school_id: ctx.school_id,
            fts_config: self.fts_config.clone(),
            full_text_ready: full_text,
        }))
    }
}

pub struct PgDocumentReader {
    tx: Transaction<'static, Postgres>,
    school_id: Uuid,
    fts_config: String,
    full_text_ready: bool,
}

/// The two search tiers a backend offers to [`tiered_search`].
#[async_trait]
pub trait SearchTiers: Send {
    fn full_text_ready(&self) -> bool;

    async fn full_text(
        &mut self,
        normalized: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, sqlx::Error>;

    async fn pattern(
        &mut self,
        tokens: &[String],
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, sqlx::Error>;
}

/// Ranked full text when available, pattern search otherwise or when the
/// full-text tier fails. The diagnostics record which tier ran and why.
pub async fn tiered_search<T: SearchTiers + ?Sized>(
    tiers: &mut T,
    query: &str,
    limit: usize,
) -> Result<DocumentBatch, sqlx::Error> {
    let tokens = query_tokens(query);
    let normalized = normalize_query(query);
    if tokens.is_empty() {
        return Ok(DocumentBatch {
            rows: Vec::new(),
            diagnostics: vec![QueryDiagnostics {
                strategy: RetrievalStrategy::Pattern,
                statement: String::new(),
                normalized_query: None,
                limit,
                row_count: 0,
                fallback_reason: Some("empty_query".to_string()),
            }],
        });
    }

    let fallback_reason = if tiers.full_text_ready() {
        match tiers.full_text(&normalized, limit).await {
            Ok(rows) => {
                let diagnostics = vec![QueryDiagnostics {
                    strategy: RetrievalStrategy::FullText,
                    statement: FULL_TEXT_SQL.to_string(),
                    normalized_query: Some(normalized),
                    limit,
                    row_count: rows.len(),
                    fallback_reason: None,
                }];
                return Ok(DocumentBatch { rows, diagnostics });
            }
            Err(err) => {
                tracing::warn!(error = %err, "full-text search failed; using pattern search");
                "fulltext_error"
            }
        }
    } else {
        "fulltext_unavailable"
    };

    let rows = tiers.pattern(&tokens, limit).await?;
    let diagnostics = vec![QueryDiagnostics {
        strategy: RetrievalStrategy::Pattern,
        statement: PATTERN_SQL.to_string(),
        normalized_query: Some(normalized),
        limit,
        row_count: rows.len(),
        fallback_reason: Some(fallback_reason.to_string()),
    }];
    Ok(DocumentBatch { rows, diagnostics })
}

#[async_trait]
impl SearchTiers for PgDocumentReader {
    fn full_text_ready(&self) -> bool {
        self.full_text_ready
    }

    /// Runs in a savepoint so a bad query leaves the transaction usable.
    async fn full_text(
        &mut self,
        normalized: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, sqlx::Error> {
        let mut savepoint = (&mut self.tx).begin().await?;
        let result = sqlx::query_as::<_, DocumentRow>(FULL_TEXT_SQL)
            .bind(&self.fts_config)
            .bind(normalized)
            .bind(self.school_id)
            .bind(limit as i64)
            .fetch_all(&mut *savepoint)
            .await;
        match result {
            Ok(rows) => {
                savepoint.commit().await?;
                Ok(rows.into_iter().map(RetrievedDocument::from).collect())
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(err)
            }
        }
    }

    async fn pattern(
        &mut self,
        tokens: &[String],
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, sqlx::Error> {
        let patterns: Vec<String> = tokens.iter().map(|token| like_pattern(token)).collect();
        let rows = sqlx::query_as::<_, DocumentRow>(PATTERN_SQL)
            .bind(self.school_id)
            .bind(&patterns)
            .bind(limit as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.into_iter().map(RetrievedDocument::from).collect())
    }
}

#[async_trait]
impl DocumentReader for PgDocumentReader {
    async fn search_with_audit(
        &mut self,
        query: &str,
        limit: usize,
    ) -> Result<DocumentBatch, sqlx::Error> {
        tiered_search(self, query, limit).await
    }

    async fn recent_with_audit(&mut self, limit: usize) -> Result<DocumentBatch, sqlx::Error> {
        let rows = sqlx::query_as::<_, DocumentRow>(RECENT_SQL)
            .bind(self.school_id)
            .bind(limit as i64)
            .fetch_all(&mut *self.tx)
            .await?;
        let rows: Vec<RetrievedDocument> = rows.into_iter().map(RetrievedDocument::from).collect();
        Ok(DocumentBatch {
            diagnostics: vec![QueryDiagnostics {
                strategy: RetrievalStrategy::Recent,
                statement: RECENT_SQL.to_string(),
                normalized_query: None,
                limit,
                row_count: rows.len(),
                fallback_reason: Some("search_empty".to_string()),
            }],
            rows,
        })
    }

    async fn finish(self: Box<Self>) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}
