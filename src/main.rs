use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use insight_engine::config::Config;
use insight_engine::{AppState, db, handlers, models};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::system::health,
        handlers::system::list_queries,
        handlers::insights::run_insights,
    ),
    components(
        schemas(
            models::ChatStreamRequest,
            models::HealthResponse,
            models::InsightsRunResponse,
            models::DashboardSpec,
            models::DataPayload,
            models::RoutingDecision,
        )
    ),
    tags(
        (name = "System", description = "Health and catalog introspection"),
        (name = "Insights", description = "Non-streaming pipeline runs"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Local .env files are a development convenience; absence is fine.
    let _ = dotenvy::dotenv();

    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("panorama.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Panorama starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created successfully");

    if config.memory.persist {
        db::ensure_memory_schema(&pool).await?;
        tracing::info!("Chat memory schema ready");
    }

    let app_state = AppState::build(&config, pool)?;
    tracing::info!(
        "Engine wired: {} catalog queries, cache TTL {}s, LLM selection {}, LLM narrative {}",
        app_state.catalog.len(),
        config.engine.cache_ttl_seconds,
        config.engine.use_llm_for_query_selection,
        config.engine.use_llm_for_narrative
    );

    let app_state_arc = Arc::new(app_state);

    let api_routes = Router::new()
        .route("/v1/chat/stream", post(handlers::chat::chat_stream))
        .route("/api/insights/run", post(handlers::insights::run_insights))
        .route("/api/health", get(handlers::system::health))
        .route("/api/queries", get(handlers::system::list_queries))
        .with_state(Arc::clone(&app_state_arc));

    let app = Router::new()
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);
    tracing::info!("Panorama is ready to serve requests");

    axum::serve(listener, app).await?;

    Ok(())
}
