use std::sync::Arc;

use sqlx::PgPool;

use crate::rag::gateway::RagGateway;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub gateway: Arc<RagGateway>,
}
