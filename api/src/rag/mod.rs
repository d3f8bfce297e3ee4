//! Role-aware retrieval gateway and the stores behind it.

pub mod abuse;
pub mod alerts;
pub mod audit;
pub mod cache;
pub mod documents;
pub mod gateway;
pub mod rate_limiter;
pub mod tenant;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use scolaris_core::agents::AgentDirectory;
use scolaris_core::prompt::PromptComposer;
use scolaris_core::security::SecurityValidator;
use sqlx::PgPool;

use crate::config::{CounterBackend, GatewayConfig};
use cache::{CounterStore, MemoryCounterStore, PgCounterStore};
use gateway::{GatewayParts, GatewaySettings, RagGateway};

/// Assemble the gateway against Postgres.
pub fn build_gateway(pool: PgPool, config: &GatewayConfig) -> RagGateway {
    let counters: Arc<dyn CounterStore> = match config.counter_backend {
        CounterBackend::Postgres => Arc::new(PgCounterStore::new(pool.clone())),
        CounterBackend::Memory => Arc::new(MemoryCounterStore::new()),
    };

    RagGateway::new(GatewayParts {
        directory: AgentDirectory::new(config.locale),
        tenants: tenant::TenantResolver::new(Arc::new(tenant::PgTenantLookup::new(pool.clone()))),
        rate_limiter: rate_limiter::RateLimiter::new(counters.clone()),
        abuse: abuse::AbuseTracker::new(counters),
        documents: Arc::new(documents::PgDocumentRepository::new(
            pool.clone(),
            config.fts_config.clone(),
        )),
        validator: SecurityValidator::default(),
        alerts: alerts::AlertEngine::new(Arc::new(alerts::PgAlertQueries::new(pool.clone()))),
        composer: PromptComposer::new(config.composer, config.locale),
        audit: audit::AuditLogger::new(
            Arc::new(audit::PgRagAuditSink::new(pool.clone())),
            Arc::new(audit::PgActivityAuditSink::new(pool)),
        ),
        settings: GatewaySettings {
            rag_enabled: config.rag_enabled,
            alerts_enabled: config.alerts_enabled,
            retrieval_limit: config.retrieval_limit,
        },
    })
}
