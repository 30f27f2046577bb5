mod config;
mod constants;
mod content_filter;
mod domain;
mod logging;
mod media;
mod routes;
mod segments;
mod services;
mod uploads;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use config::Config;
use content_filter::Classifier;

const REMOTE_FETCH_TIMEOUT_SECS: u64 = 60;

pub struct AppState {
    pub db: PgPool,
    pub classifier: Arc<dyn Classifier>,
    pub http: reqwest::Client,
    pub config: Config,
}

async fn health() -> &'static str {
    "ok"
}

/// Full application router with CORS and the upload body limit applied
pub fn build_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(routes::build_routes())
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    logging::init();

    let config = Config::from_env();
    log::info!(
        "[startup] filter={:?} model={} interval={}s threshold={}",
        config.content_filter,
        config.model_repo,
        config.sample_interval_secs,
        config.nsfw_threshold
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    // Weights may need downloading, keep that off the async workers
    let classifier = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || content_filter::from_config(&config))
            .await
            .expect("Classifier loader panicked")
            .expect("Failed to load classifier")
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(REMOTE_FETCH_TIMEOUT_SECS))
        .build()
        .expect("Failed to build HTTP client");

    let port = config.port;
    let state = Arc::new(AppState {
        db: pool,
        classifier,
        http,
        config,
    });

    let app = build_app(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", addr, e));

    log::info!("Listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server failed");
}
