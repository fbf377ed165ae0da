use std::sync::Arc;

use anyhow::Context;
use student_records::app::{build_router, AppState};
use student_records::config::AppConfig;
use student_records::session::RedisSessionStore;
use student_records::store::postgres::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = AppConfig::from_env()?;

    let store = PostgresStore::connect(&config).await?;
    store.migrate().await?;
    let sessions = RedisSessionStore::connect(&config.redis_url)
        .await
        .context("connect to redis")?;
    let state = AppState::new(Arc::new(store), Arc::new(sessions), &config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    log::info!(
        "Starting student records HTTP server on http://{}",
        config.bind_addr
    );
    axum::serve(listener, app).await?;
    Ok(())
}
