use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use trendline::storage::disk::load_store;
use trendline::{MemoryEventStore, QuerySpec, TrendResult, TrendsConfig, TrendsEngine, TrendsError};

type AppState = Arc<TrendsEngine>;

#[derive(Debug, Deserialize)]
struct TrendsRequest {
    query: QuerySpec,
    #[serde(default)]
    now: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting trendline server");

    let config = TrendsConfig::from_env();
    info!("Bind address: {}", config.bind_address);
    info!("Breakdown limit: {} ({:?})", config.breakdown_limit, config.breakdown_overflow);

    let store = match &config.events_file {
        Some(path) => load_store(path).await?,
        None => {
            info!("EVENTS_FILE not set, serving an empty event store");
            MemoryEventStore::new()
        }
    };
    info!("Event store holds {} events", store.len());

    let bind_address = config.bind_address.clone();
    let app = router(Arc::new(TrendsEngine::new(Arc::new(store), config)));

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("Server listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/trends", post(run_trends))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

async fn run_trends(
    State(engine): State<AppState>,
    Json(payload): Json<TrendsRequest>,
) -> Result<Json<Vec<TrendResult>>, (StatusCode, Json<ErrorResponse>)> {
    let now = payload.now.unwrap_or_else(Utc::now);
    match engine.run(&payload.query, now).await {
        Ok(results) => Ok(Json(results)),
        Err(e) => Err(error_response(e)),
    }
}

fn error_response(e: TrendsError) -> (StatusCode, Json<ErrorResponse>) {
    let status = if e.is_validation() {
        StatusCode::BAD_REQUEST
    } else {
        error!("Trends query failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}
