//! In-memory fakes for every store the gateway talks to.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use scolaris_core::audit::{AuditEntry, RagAuditRecord};
use scolaris_core::documents::{
    DocumentBatch, QueryDiagnostics, RetrievalStrategy, RetrievedDocument,
};
use uuid::Uuid;

use super::alerts::{AlertQueries, AudienceScope, Collected, LabeledAmount, LabeledCount};
use super::audit::{ActivityAuditSink, RagAuditSink};
use super::cache::CounterStore;
use super::documents::{DocumentReader, DocumentRepository, ScopedContext};
use super::tenant::TenantLookup;

fn outage() -> sqlx::Error {
    sqlx::Error::PoolTimedOut
}

pub fn document(document_type: &str, source_table: &str) -> RetrievedDocument {
    RetrievedDocument {
        doc_id: Uuid::now_v7(),
        text: format!("{document_type} depuis {source_table}"),
        document_type: Some(document_type.to_string()),
        source_table: Some(source_table.to_string()),
        source_id: Some(Uuid::now_v7()),
        rank: None,
    }
}

pub struct FailingCounterStore;

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn incr(&self, _key: &str, _ttl: Duration) -> Result<i64, sqlx::Error> {
        Err(outage())
    }
}

#[derive(Default)]
pub struct FakeTenants {
    pub staff: Option<Uuid>,
    pub student: Option<Uuid>,
    pub guardian: Option<Uuid>,
    pub sole: Option<Uuid>,
    pub fail_staff: bool,
    pub calls: AtomicUsize,
}

impl FakeTenants {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self, value: Option<Uuid>) -> Result<Option<Uuid>, sqlx::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }
}

#[async_trait]
impl TenantLookup for FakeTenants {
    async fn staff_school(&self, _user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        if self.fail_staff {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Err(outage());
        }
        self.hit(self.staff)
    }

    async fn student_school(&self, _user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        self.hit(self.student)
    }

    async fn guardian_school(&self, _user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        self.hit(self.guardian)
    }

    async fn sole_school(&self) -> Result<Option<Uuid>, sqlx::Error> {
        self.hit(self.sole)
    }
}

/// Document index fake. Tracks open scopes so tests can check teardown.
#[derive(Default)]
pub struct FakeDocuments {
    pub search: Vec<RetrievedDocument>,
    pub recent: Vec<RetrievedDocument>,
    pub fail: bool,
    pub(crate) active: Arc<AtomicUsize>,
    pub(crate) begun: AtomicUsize,
    pub(crate) contexts: Mutex<Vec<ScopedContext>>,
}

impl FakeDocuments {
    pub fn with_search(search: Vec<RetrievedDocument>) -> Self {
        Self {
            search,
            ..Default::default()
        }
    }

    pub fn with_recent(recent: Vec<RetrievedDocument>) -> Self {
        Self {
            recent,
            ..Default::default()
        }
    }

    pub fn active_scopes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn begun(&self) -> usize {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<ScopedContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentRepository for FakeDocuments {
    async fn begin_scoped(
        &self,
        ctx: &ScopedContext,
    ) -> Result<Box<dyn DocumentReader>, sqlx::Error> {
        self.begun.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(*ctx);
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeReader {
            search: self.search.clone(),
            recent: self.recent.clone(),
            fail: self.fail,
            active: self.active.clone(),
        }))
    }
}

struct FakeReader {
    search: Vec<RetrievedDocument>,
    recent: Vec<RetrievedDocument>,
    fail: bool,
    active: Arc<AtomicUsize>,
}

impl Drop for FakeReader {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn batch(
    rows: Vec<RetrievedDocument>,
    strategy: RetrievalStrategy,
    normalized_query: Option<String>,
    limit: usize,
) -> DocumentBatch {
    let rows: Vec<RetrievedDocument> = rows.into_iter().take(limit).collect();
    DocumentBatch {
        diagnostics: vec![QueryDiagnostics {
            strategy,
            statement: format!("fake {}", strategy.as_str()),
            normalized_query,
            limit,
            row_count: rows.len(),
            fallback_reason: None,
        }],
        rows,
    }
}

#[async_trait]
impl DocumentReader for FakeReader {
    async fn search_with_audit(
        &mut self,
        query: &str,
        limit: usize,
    ) -> Result<DocumentBatch, sqlx::Error> {
        if self.fail {
            return Err(outage());
        }
        Ok(batch(
            self.search.clone(),
            RetrievalStrategy::FullText,
            Some(scolaris_core::documents::normalize_query(query)),
            limit,
        ))
    }

    async fn recent_with_audit(&mut self, limit: usize) -> Result<DocumentBatch, sqlx::Error> {
        Ok(batch(self.recent.clone(), RetrievalStrategy::Recent, None, limit))
    }

    async fn finish(self: Box<Self>) -> Result<(), sqlx::Error> {
        Ok(())
    }
}

pub struct FakeAlertQueries {
    pub absences_total: i64,
    pub absence_counts: Vec<LabeledCount>,
    pub overdue: Vec<LabeledAmount>,
    pub low_averages: Vec<LabeledAmount>,
    pub collected: Collected,
    pub fail: bool,
    pub(crate) scopes: Mutex<Vec<AudienceScope>>,
}

impl Default for FakeAlertQueries {
    fn default() -> Self {
        Self {
            absences_total: 0,
            absence_counts: Vec::new(),
            overdue: Vec::new(),
            low_averages: Vec::new(),
            collected: Collected {
                total: 0.0,
                payments: 0,
            },
            fail: false,
            scopes: Mutex::new(Vec::new()),
        }
    }
}

impl FakeAlertQueries {
    pub fn scopes(&self) -> Vec<AudienceScope> {
        self.scopes.lock().unwrap().clone()
    }

    fn seen(&self, scope: AudienceScope) -> Result<(), sqlx::Error> {
        self.scopes.lock().unwrap().push(scope);
        if self.fail { Err(outage()) } else { Ok(()) }
    }
}

#[async_trait]
impl AlertQueries for FakeAlertQueries {
    async fn absences_total(
        &self,
        _school_id: Uuid,
        scope: AudienceScope,
        _since: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        self.seen(scope)?;
        Ok(self.absences_total)
    }

    async fn absence_counts(
        &self,
        _school_id: Uuid,
        scope: AudienceScope,
        _since: NaiveDate,
        _min: i64,
    ) -> Result<Vec<LabeledCount>, sqlx::Error> {
        self.seen(scope)?;
        Ok(self.absence_counts.clone())
    }

    async fn overdue_payments(
        &self,
        _school_id: Uuid,
        scope: AudienceScope,
        _today: NaiveDate,
    ) -> Result<Vec<LabeledAmount>, sqlx::Error> {
        self.seen(scope)?;
        Ok(self.overdue.clone())
    }

    async fn low_averages(
        &self,
        _school_id: Uuid,
        scope: AudienceScope,
        _threshold: f64,
    ) -> Result<Vec<LabeledAmount>, sqlx::Error> {
        self.seen(scope)?;
        Ok(self.low_averages.clone())
    }

    async fn collected_since(
        &self,
        _school_id: Uuid,
        _since: DateTime<Utc>,
    ) -> Result<Collected, sqlx::Error> {
        self.seen(AudienceScope::School)?;
        Ok(self.collected)
    }
}

/// Captures both audit trails.
#[derive(Default)]
pub struct RecordingAudit {
    records: Mutex<Vec<RagAuditRecord>>,
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn records(&self) -> Vec<RagAuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RagAuditSink for RecordingAudit {
    async fn write(&self, record: &RagAuditRecord) -> Result<(), sqlx::Error> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl ActivityAuditSink for RecordingAudit {
    async fn write(&self, entry: &AuditEntry) -> Result<(), sqlx::Error> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

pub struct FailingAuditSinks;

#[async_trait]
impl RagAuditSink for FailingAuditSinks {
    async fn write(&self, _record: &RagAuditRecord) -> Result<(), sqlx::Error> {
        Err(outage())
    }
}

#[async_trait]
impl ActivityAuditSink for FailingAuditSinks {
    async fn write(&self, _entry: &AuditEntry) -> Result<(), sqlx::Error> {
        Err(outage())
    }
}
