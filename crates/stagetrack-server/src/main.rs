//! stagetrack server entry point.
//!
//! Reads config from env vars (see [`stagetrack_server::config`]):
//!   STAGETRACK_DATABASE_URL — Postgres DSN (absent: in-memory stores)
//!   STAGETRACK_JWT_SECRET   — token signing key (absent: dev placeholder)
//!   STAGETRACK_BIND_ADDR    — listen address (default: 0.0.0.0:8080)
//!   STAGETRACK_STAGES_PATH  — stage graph document (default: stages.yaml)

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

use stagetrack_core::engine::MetricEngine;
use stagetrack_core::graph::StageGraph;
use stagetrack_core::ports::{ClientStore, MetricStore, UserStore};
use stagetrack_core::scheduler::MetricScheduler;
use stagetrack_core::sink::MetricSink;
use stagetrack_core::store::{
    MemoryClientStore, MemoryMetricCache, MemoryMetricStore, MemoryUserStore,
};
use stagetrack_core::transition::TransitionService;
use stagetrack_core::users::UserService;
use stagetrack_postgres::{ensure_schema, PgStores};

use stagetrack_server::config::Config;
use stagetrack_server::middleware::jwt::JwtConfig;
use stagetrack_server::router::build_router;
use stagetrack_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stagetrack_server=debug".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env();

    // Stage graph: load failure is logged and non-fatal.
    let graph = Arc::new(StageGraph::load(&config.stages_path));

    // Stores: Postgres when a DSN is configured, in-memory otherwise.
    let (clients, metrics, users): (
        Arc<dyn ClientStore>,
        Arc<dyn MetricStore>,
        Arc<dyn UserStore>,
    ) = match &config.database_url {
        Some(dsn) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
            ensure_schema(&pool).await?;
            info!("connected to database");
            let stores = PgStores::new(pool);
            (
                Arc::new(stores.clients),
                Arc::new(stores.metrics),
                Arc::new(stores.users),
            )
        }
        None => {
            info!("no database configured, using in-memory stores");
            (
                Arc::new(MemoryClientStore::new()),
                Arc::new(MemoryMetricStore::new()),
                Arc::new(MemoryUserStore::new()),
            )
        }
    };

    let sink = Arc::new(MetricSink::new()?);
    let engine = Arc::new(
        MetricEngine::new(clients.clone(), metrics, graph.clone(), sink.clone())
            .with_cache(MemoryMetricCache::shared()),
    );
    let transitions = Arc::new(TransitionService::new(clients, graph, engine.clone()));
    let user_service = Arc::new(UserService::new(users));

    let scheduler = MetricScheduler::start(engine.clone());

    let state = AppState {
        transitions,
        users: user_service,
        engine,
        sink,
        jwt: JwtConfig::from_secret(config.jwt_secret.as_bytes()),
    };
    let mut app = build_router(state)
        .layer(tower_http::timeout::TimeoutLayer::new(config.request_timeout));
    if !config.base_path.is_empty() {
        app = axum::Router::new().nest(&config.base_path, app);
    }

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "stagetrack listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    scheduler.shutdown().await;
    Ok(())
}
