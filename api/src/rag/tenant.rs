use std::sync::Arc;

use async_trait::async_trait;
use scolaris_core::agents::SchoolUser;
use sqlx::PgPool;
use uuid::Uuid;

/// Which relation produced the tenant id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    User,
    Staff,
    Student,
    Guardian,
    SoleSchool,
}

impl TenantSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Staff => "staff",
            Self::Student => "student",
            Self::Guardian => "guardian",
            Self::SoleSchool => "sole_school",
        }
    }
}

/// Tenant-membership relations of the user/role provider.
#[async_trait]
pub trait TenantLookup: Send + Sync {
    async fn staff_school(&self, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;
    async fn student_school(&self, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;
    async fn guardian_school(&self, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error>;
    /// The tenant id if exactly one school exists.
    async fn sole_school(&self) -> Result<Option<Uuid>, sqlx::Error>;
}

pub struct TenantResolver {
    lookup: Arc<dyn TenantLookup>,
}

impl TenantResolver {
    pub fn new(lookup: Arc<dyn TenantLookup>) -> Self {
        Self { lookup }
    }

    /// First hit wins. A failing path is logged and skipped.
    pub async fn resolve_school_id(&self, user: &SchoolUser) -> Option<(Uuid, TenantSource)> {
        if let Some(school_id) = user.school_id {
            return Some((school_id, TenantSource::User));
        }

        let chain = [
            TenantSource::Staff,
            TenantSource::Student,
            TenantSource::Guardian,
            TenantSource::SoleSchool,
        ];
        for source in chain {
            let found = match source {
                TenantSource::Staff => self.lookup.staff_school(user.id).await,
                TenantSource::Student => self.lookup.student_school(user.id).await,
                TenantSource::Guardian => self.lookup.guardian_school(user.id).await,
                TenantSource::SoleSchool => self.lookup.sole_school().await,
                TenantSource::User => Ok(None),
            };
            match found {
                Ok(Some(school_id)) => return Some((school_id, source)),
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    error = %err,
                    user_id = %user.id,
                    source = source.as_str(),
                    "tenant lookup failed; trying next relation"
                ),
            }
        }
        None
    }
}

pub struct PgTenantLookup {
    pool: PgPool,
}

impl PgTenantLookup {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn first_school(&self, sql: &str, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[async_trait]
impl TenantLookup for PgTenantLookup {
    async fn staff_school(&self, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        self.first_school(
            "SELECT school_id FROM staff_members WHERE user_id = $1 ORDER BY created_at LIMIT 1",
            user_id,
        )
        .await
    }

    async fn student_school(&self, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        self.first_school(
            "SELECT school_id FROM students WHERE user_id = $1 ORDER BY created_at LIMIT 1",
            user_id,
        )
        .await
    }

    async fn guardian_school(&self, user_id: Uuid) -> Result<Option<Uuid>, sqlx::Error> {
        self.first_school(
            "SELECT school_id FROM guardians WHERE user_id = $1 ORDER BY created_at LIMIT 1",
            user_id,
        )
        .await
    }

    async fn sole_school(&self) -> Result<Option<Uuid>, sqlx::Error> {
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM schools ORDER BY id LIMIT 2")
            .fetch_all(&self.pool)
            .await?;
        Ok(match ids.as_slice() {
            [only] => Some(*only),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::testing::FakeTenants;

    fn user(school_id: Option<Uuid>) -> SchoolUser {
        SchoolUser {
            id: Uuid::now_v7(),
            roles: vec!["teacher".to_string()],
            school_id,
        }
    }

    #[tokio::test]
    async fn user_school_wins_without_lookups() {
        let tenants = Arc::new(FakeTenants::default());
        let resolver = TenantResolver::new(tenants.clone());
        let school = Uuid::now_v7();
        assert_eq!(
            resolver.resolve_school_id(&user(Some(school))).await,
            Some((school, TenantSource::User))
        );
        assert_eq!(tenants.calls(), 0);
    }

    #[tokio::test]
    async fn chain_follows_declared_order() {
        let staff = Uuid::now_v7();
        let guardian = Uuid::now_v7();
        let tenants = Arc::new(FakeTenants {
            staff: None,
            student: None,
            guardian: Some(guardian),
            sole: Some(staff),
            ..Default::default()
        });
        let resolver = TenantResolver::new(tenants);
        assert_eq!(
            resolver.resolve_school_id(&user(None)).await,
            Some((guardian, TenantSource::Guardian))
        );
    }

    #[tokio::test]
    async fn failing_path_falls_through() {
        let sole = Uuid::now_v7();
        let tenants = Arc::new(FakeTenants {
            fail_staff: true,
            sole: Some(sole),
            ..Default::default()
        });
        let resolver = TenantResolver::new(tenants.clone());
        assert_eq!(
            resolver.resolve_school_id(&user(None)).await,
            Some((sole, TenantSource::SoleSchool))
        );
        assert_eq!(tenants.calls(), 4);
    }

    #[tokio::test]
    async fn nothing_found_is_none() {
        let resolver = TenantResolver::new(Arc::new(FakeTenants::default()));
        assert_eq!(resolver.resolve_school_id(&user(None)).await, None);
    }
}
