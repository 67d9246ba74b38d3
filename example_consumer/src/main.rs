//! Example consumer: serves the built-in nodes API, a cached filter lookup, WebDAV PUT and the
//! common routes.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! With `DATABASE_URL` set the PostgreSQL repository is used, otherwise an in-memory one.

use async_trait::async_trait;
use axum::extract::DefaultBodyLimit;
use resource_sdk::store::{NewNode, TYPE_FOLDER};
use resource_sdk::{
    app_routes, ensure_database_exists, ensure_repository_tables, register_lookup_api, register_nodes_api, ApiError,
    AppState, CachedLookup, MemoryRepository, PgRepository, Repository, ResourceRegistry, Settings, UpstreamSource,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Stand-in issue tracker: every filter answers a fixed run of records.
struct DemoTracker;

#[async_trait]
impl UpstreamSource for DemoTracker {
    async fn fetch(&self, filter_id: &str) -> Result<Vec<Value>, ApiError> {
        tracing::info!(filter_id, "fetching filter from tracker");
        Ok((1..=25)
            .map(|n| json!({ "key": format!("DEMO-{}", n), "filter": filter_id, "summary": format!("Check-in {}", n) }))
            .collect())
    }
}

async fn repository(settings: &Settings) -> Result<Arc<dyn Repository>, Box<dyn std::error::Error>> {
    let Some(database_url) = settings.database_url.as_deref() else {
        let repo = MemoryRepository::new();
        let mut tx = repo.begin(false, "admin").await?;
        tx.create_node(NewNode {
            name: "Shared".into(),
            node_type: TYPE_FOLDER.into(),
            ..Default::default()
        })
        .await?;
        tx.commit().await?;
        tracing::info!("Using in-memory repository");
        return Ok(Arc::new(repo));
    };
    ensure_database_exists(database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;
    ensure_repository_tables(&pool, &settings.schema).await?;
    Ok(Arc::new(PgRepository::new(pool, settings.schema.clone())))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("resource_sdk=info,example_consumer=info")),
        )
        .init();

    let settings = Settings::from_env()?;
    let repository = repository(&settings).await?;

    let mut registry = ResourceRegistry::new();
    register_nodes_api(&mut registry)?;
    let lookup = CachedLookup::new(Arc::new(DemoTracker), settings.upstream_cache_ttl);
    register_lookup_api(&mut registry, Arc::new(lookup))?;
    let state = AppState::new(repository, registry.build(), settings.retry).with_webdav_context(&settings.webdav_context);

    let app = app_routes(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));
    let listener = TcpListener::bind(settings.bind_addr).await?;
    tracing::info!("Example consumer listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
