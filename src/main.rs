use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod abtest;
mod cache;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod schedule;
mod visitor;

use cache::PageCache;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: config::AppConfig,
    /// In-memory slug → page-id cache for the public render fast path.
    pub pages: PageCache,
}

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent — env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "biolink=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting biolink on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    // Open SQLite connection pool
    // CREATE the file if it doesn't exist yet
    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            config
                .database_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .foreign_keys(true),
        )
        .await?;

    // Run embedded migrations (files in migrations/)
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    // Build shared state
    let pages = PageCache::new();
    db::warm_cache(&db, &pages).await?;

    let bind_addr = format!("{}:{}", config.host, config.port);

    let state = Arc::new(AppState { db, config, pages });

    // ── Router ─────────────────────────────────────────────────────────────
    let api_router = Router::new()
        .route("/pages", post(handlers::links::create_page))
        .route("/pages/:id/links", get(handlers::links::list_links))
        .route("/pages/:id/analytics", get(handlers::links::page_analytics))
        .route("/links", post(handlers::links::create_link))
        .route("/links/:id/update", post(handlers::links::update_link))
        .route("/links/:id/schedule", post(handlers::links::set_schedule))
        .route("/links/:id/delete", post(handlers::links::delete_link))
        .route("/ab-test/start", post(handlers::abtest::start_test))
        .route("/ab-test/end", post(handlers::abtest::end_test))
        .route("/ab-test/:link_id", get(handlers::abtest::test_status))
        .route("/clicks", post(handlers::page::record_click));

    let app = Router::new()
        // Health check — returns 200 OK with no auth required
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        // Builder / tracking API
        .nest("/api", api_router)
        // Public bio-link pages
        .route("/p/:slug", get(handlers::page::view_page))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
