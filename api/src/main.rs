use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod middleware;
mod rag;
mod routes;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scolaris Assistant API",
        version = "0.1.0",
        description = "Role-aware assistant for school staff, students and families. Replies only draw on data the caller's role may see."
    ),
    paths(
        routes::health::health_check,
        routes::assistant::send_message,
        routes::assistant::enable_explain,
    ),
    components(schemas(
        HealthResponse,
        scolaris_core::error::ApiError,
        routes::assistant::AssistantMessageRequest,
        routes::assistant::AssistantMessageResponse,
        routes::assistant::ExplainModeResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scolaris_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::GatewayConfig::from_env();
    tracing::info!(
        locale = config.locale.as_str(),
        rag_enabled = config.rag_enabled,
        alerts_enabled = config.alerts_enabled,
        retrieval_limit = config.retrieval_limit,
        counter_backend = ?config.counter_backend,
        "gateway configuration loaded"
    );
    if !config.fts_matches_index() {
        tracing::warn!(
            fts_config = %config.fts_config,
            index_config = config::INDEX_FTS_CONFIG,
            "SCOLARIS_FTS_CONFIG differs from the search_vector column; full-text matches will be poor"
        );
    }

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = state::AppState {
        db: pool.clone(),
        gateway: Arc::new(rag::build_gateway(pool, &config)),
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::assistant::router().layer(middleware::rate_limit::assistant_layer()))
        .layer(auth::InjectAuthLayer::new(app_state.db.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Scolaris API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
