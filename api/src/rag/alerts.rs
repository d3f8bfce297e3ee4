use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use scolaris_core::agents::AgentKey;
use scolaris_core::alerts::{Alert, AlertSeverity, SAMPLE_SIZE, capped_sample, rules};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

const ABSENCE_WINDOW_DAYS: i64 = 7;
const CASHFLOW_WINDOW_DAYS: i64 = 30;
const LOW_AVERAGE_THRESHOLD: f64 = 10.0;
const SCHOOL_ABSENCE_THRESHOLD: i64 = 20;
const STUDENT_ABSENCE_THRESHOLD: i64 = 3;

/// Which students an aggregate covers, relative to the requesting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceScope {
    School,
    TaughtBy(Uuid),
    Student(Uuid),
    GuardianOf(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledAmount {
    pub label: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collected {
    pub total: f64,
    pub payments: i64,
}

/// Aggregate queries the alert builders run. Results are ordered worst
/// first so a capped sample keeps the most relevant names.
#[async_trait]
pub trait AlertQueries: Send + Sync {
    async fn absences_total(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        since: NaiveDate,
    ) -> Result<i64, sqlx::Error>;

    /// Students with at least `min` absences since `since`.
    async fn absence_counts(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        since: NaiveDate,
        min: i64,
    ) -> Result<Vec<LabeledCount>, sqlx::Error>;

    /// Payments past due and not fully paid; `amount` is what remains due.
    async fn overdue_payments(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        today: NaiveDate,
    ) -> Result<Vec<LabeledAmount>, sqlx::Error>;

    /// Averages on a /20 scale below `threshold`: per student, or per
    /// subject for [`AudienceScope::Student`].
    async fn low_averages(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        threshold: f64,
    ) -> Result<Vec<LabeledAmount>, sqlx::Error>;

    async fn collected_since(
        &self,
        school_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Collected, sqlx::Error>;
}

pub struct AlertEngine {
    queries: Arc<dyn AlertQueries>,
}

impl AlertEngine {
    pub fn new(queries: Arc<dyn AlertQueries>) -> Self {
        Self { queries }
    }

    pub async fn generate(
        &self,
        user_id: Uuid,
        school_id: Uuid,
        key: AgentKey,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let today = now.date_naive();
        let absence_since = today - Duration::days(ABSENCE_WINDOW_DAYS);
        match key {
            AgentKey::Admin => self.admin(school_id, absence_since, today).await,
            AgentKey::Accountant => self.accountant(school_id, today, now).await,
            AgentKey::Teacher => self.teacher(school_id, user_id, absence_since).await,
            AgentKey::Student => self.student(school_id, user_id, absence_since).await,
            AgentKey::Parent => self.parent(school_id, user_id, absence_since, today).await,
        }
    }

    async fn admin(
        &self,
        school_id: Uuid,
        since: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let mut alerts = Vec::new();
        let total = self
            .queries
            .absences_total(school_id, AudienceScope::School, since)
            .await?;
        if total >= SCHOOL_ABSENCE_THRESHOLD {
            alerts.push(Alert::new(
                rules::ADMIN_ABSENCE_SPIKE,
                AlertSeverity::Warning,
                json!({
                    "count": total,
                    "window_days": ABSENCE_WINDOW_DAYS,
                    "threshold": SCHOOL_ABSENCE_THRESHOLD,
                }),
            ));
        }
        alerts.extend(
            self.overdue(rules::ADMIN_OVERDUE_PAYMENTS, school_id, AudienceScope::School, today)
                .await?,
        );
        alerts.extend(
            self.low_averages(rules::ADMIN_LOW_AVERAGES, school_id, AudienceScope::School)
                .await?,
        );
        Ok(alerts)
    }

    async fn accountant(
        &self,
        school_id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let mut alerts = self
            .overdue(
                rules::ACCOUNTANT_OVERDUE_PAYMENTS,
                school_id,
                AudienceScope::School,
                today,
            )
            .await?
            .into_iter()
            .collect::<Vec<_>>();
        let collected = self
            .queries
            .collected_since(school_id, now - Duration::days(CASHFLOW_WINDOW_DAYS))
            .await?;
        alerts.push(Alert::new(
            rules::ACCOUNTANT_CASHFLOW_30D,
            AlertSeverity::Info,
            json!({
                "collected": collected.total,
                "payments": collected.payments,
                "window_days": CASHFLOW_WINDOW_DAYS,
            }),
        ));
        Ok(alerts)
    }

    async fn teacher(
        &self,
        school_id: Uuid,
        user_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let scope = AudienceScope::TaughtBy(user_id);
        let mut alerts: Vec<Alert> = self
            .low_averages(rules::TEACHER_LOW_AVERAGES, school_id, scope)
            .await?
            .into_iter()
            .collect();
        alerts.extend(
            self.repeated_absences(rules::TEACHER_ABSENCE_SPIKE, school_id, scope, since)
                .await?,
        );
        Ok(alerts)
    }

    async fn student(
        &self,
        school_id: Uuid,
        user_id: Uuid,
        since: NaiveDate,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let scope = AudienceScope::Student(user_id);
        let mut alerts: Vec<Alert> = self
            .low_averages(rules::STUDENT_LOW_AVERAGES, school_id, scope)
            .await?
            .into_iter()
            .collect();
        let absences = self.queries.absences_total(school_id, scope, since).await?;
        if absences > 0 {
            alerts.push(Alert::new(
                rules::STUDENT_ABSENCES,
                AlertSeverity::Info,
                json!({"count": absences, "window_days": ABSENCE_WINDOW_DAYS}),
            ));
        }
        Ok(alerts)
    }

    async fn parent(
        &self,
        school_id: Uuid,
        user_id: Uuid,
        since: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<Alert>, sqlx::Error> {
        let scope = AudienceScope::GuardianOf(user_id);
        let mut alerts: Vec<Alert> = self
            .repeated_absences(rules::PARENT_ABSENCES, school_id, scope, since)
            .await?
            .into_iter()
            .collect();
        alerts.extend(
            self.low_averages(rules::PARENT_LOW_AVERAGES, school_id, scope)
                .await?,
        );
        alerts.extend(
            self.overdue(rules::PARENT_OVERDUE_PAYMENTS, school_id, scope, today)
                .await?,
        );
        Ok(alerts)
    }

    async fn overdue(
        &self,
        rule: &str,
        school_id: Uuid,
        scope: AudienceScope,
        today: NaiveDate,
    ) -> Result<Option<Alert>, sqlx::Error> {
        let rows = self.queries.overdue_payments(school_id, scope, today).await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let total_due: f64 = rows.iter().map(|row| row.amount).sum();
        let (count, sample) = capped_sample(rows.into_iter().map(|row| row.label), SAMPLE_SIZE);
        Ok(Some(Alert::new(
            rule,
            AlertSeverity::Warning,
            json!({"count": count, "total_due": total_due, "sample": sample}),
        )))
    }

    async fn low_averages(
        &self,
        rule: &str,
        school_id: Uuid,
        scope: AudienceScope,
    ) -> Result<Option<Alert>, sqlx::Error> {
        let rows = self
            .queries
            .low_averages(school_id, scope, LOW_AVERAGE_THRESHOLD)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let (count, sample) = capped_sample(rows.into_iter().map(|row| row.label), SAMPLE_SIZE);
        Ok(Some(Alert::new(
            rule,
            AlertSeverity::Warning,
            json!({"count": count, "threshold": LOW_AVERAGE_THRESHOLD, "sample": sample}),
        )))
    }

    async fn repeated_absences(
        &self,
        rule: &str,
        school_id: Uuid,
        scope: AudienceScope,
        since: NaiveDate,
    ) -> Result<Option<Alert>, sqlx::Error> {
        let rows = self
            .queries
            .absence_counts(school_id, scope, since, STUDENT_ABSENCE_THRESHOLD)
            .await?;
        if rows.is_empty() {
            return Ok(None);
        }
        let (count, sample) = capped_sample(rows.into_iter().map(|row| row.label), SAMPLE_SIZE);
        Ok(Some(Alert::new(
            rule,
            AlertSeverity::Warning,
            json!({
                "count": count,
                "threshold": STUDENT_ABSENCE_THRESHOLD,
                "window_days": ABSENCE_WINDOW_DAYS,
                "sample": sample,
            }),
        )))
    }
}

pub struct PgAlertQueries {
    pool: PgPool,
}

impl PgAlertQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Student filter for a scope. `$1` is the school id, `$2` the requesting
/// user id (NULL for [`AudienceScope::School`]).
fn scope_filter(scope: AudienceScope) -> (&'static str, Option<Uuid>) {
    match scope {
        AudienceScope::School => ("s.school_id = $1 AND $2::uuid IS NULL", None),
        AudienceScope::TaughtBy(user_id) => (
            "s.school_id = $1 AND s.class_id IN ( \
                 SELECT ct.class_id FROM class_teachers ct \
                 JOIN staff_members sm ON sm.id = ct.staff_member_id \
                 WHERE sm.user_id = $2::uuid)",
            Some(user_id),
        ),
        AudienceScope::Student(user_id) => {
            ("s.school_id = $1 AND s.user_id = $2::uuid", Some(user_id))
        }
        AudienceScope::GuardianOf(user_id) => (
            "s.school_id = $1 AND s.id IN ( \
                 SELECT gs.student_id FROM guardian_students gs \
                 JOIN guardians g ON g.id = gs.guardian_id \
                 WHERE g.user_id = $2::uuid)",
            Some(user_id),
        ),
    }
}

#[derive(sqlx::FromRow)]
struct CountRow {
    label: String,
    count: i64,
}

#[derive(sqlx::FromRow)]
struct AmountRow {
    label: String,
    amount: f64,
}

#[async_trait]
impl AlertQueries for PgAlertQueries {
    async fn absences_total(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        since: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        let (filter, user_id) = scope_filter(scope);
        let sql = format!(
            "SELECT COUNT(*) FROM absences a JOIN students s ON s.id = a.student_id \
             WHERE {filter} AND a.absent_on >= $3"
        );
        sqlx::query_scalar::<_, i64>(&sql)
            .bind(school_id)
            .bind(user_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await
    }

    async fn absence_counts(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        since: NaiveDate,
        min: i64,
    ) -> Result<Vec<LabeledCount>, sqlx::Error> {
        let (filter, user_id) = scope_filter(scope);
        let sql = format!(
            "SELECT s.first_name || ' ' || s.last_name AS label, COUNT(*) AS count \
             FROM absences a JOIN students s ON s.id = a.student_id \
             WHERE {filter} AND a.absent_on >= $3 \
             GROUP BY s.id, s.first_name, s.last_name \
             HAVING COUNT(*) >= $4 \
             ORDER BY count DESC, label"
        );
        let rows = sqlx::query_as::<_, CountRow>(&sql)
            .bind(school_id)
            .bind(user_id)
            .bind(since)
            .bind(min)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| LabeledCount {
                label: row.label,
                count: row.count,
            })
            .collect())
    }

    async fn overdue_payments(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        today: NaiveDate,
    ) -> Result<Vec<LabeledAmount>, sqlx::Error> {
        let (filter, user_id) = scope_filter(scope);
        let sql = format!(
            "SELECT s.first_name || ' ' || s.last_name AS label, \
                    (p.amount_due - p.amount_paid)::float8 AS amount \
             FROM payments p JOIN students s ON s.id = p.student_id \
             WHERE {filter} AND p.due_date < $3 AND p.amount_paid < p.amount_due \
             ORDER BY amount DESC, p.due_date"
        );
        let rows = sqlx::query_as::<_, AmountRow>(&sql)
            .bind(school_id)
            .bind(user_id)
            .bind(today)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(labeled_amount).collect())
    }

    async fn low_averages(
        &self,
        school_id: Uuid,
        scope: AudienceScope,
        threshold: f64,
    ) -> Result<Vec<LabeledAmount>, sqlx::Error> {
        let (filter, user_id) = scope_filter(scope);
        let (label, group) = match scope {
            AudienceScope::Student(_) => ("g.subject", "g.subject"),
            _ => (
                "s.first_name || ' ' || s.last_name",
                "s.id, s.first_name, s.last_name",
            ),
        };
        let sql = format!(
            "SELECT {label} AS label, \
                    AVG(g.score * 20.0 / NULLIF(g.max_score, 0))::float8 AS amount \
             FROM grades g JOIN students s ON s.id = g.student_id \
             WHERE {filter} \
             GROUP BY {group} \
             HAVING AVG(g.score * 20.0 / NULLIF(g.max_score, 0)) < $3 \
             ORDER BY amount ASC, label"
        );
        let rows = sqlx::query_as::<_, AmountRow>(&sql)
            .bind(school_id)
            .bind(user_id)
            .bind(threshold)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(labeled_amount).collect())
    }

    async fn collected_since(
        &self,
        school_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Collected, sqlx::Error> {
        let (total, payments) = sqlx::query_as::<_, (f64, i64)>(
            "SELECT COALESCE(SUM(amount_paid), 0)::float8, COUNT(*) \
             FROM payments WHERE school_id = $1 AND paid_at >= $2",
        )
        .bind(school_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(Collected { total, payments })
    }
}

fn labeled_amount(row: AmountRow) -> LabeledAmount {
    LabeledAmount {
        label: row.label,
        amount: row.amount,
    }
}
