mod api;
mod middleware;

use std::sync::Arc;

use sawt_db::{ChangeHub, PgCardStore};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::RateLimitState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = sawt_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    tracing::info!(env = %config.env, bind_addr = %config.bind_addr, "starting sawt-server");

    let pool_config = sawt_db::PoolConfig::from_app_config(&config);
    let pool = sawt_db::connect_pool(&config.database_url, pool_config).await?;
    sawt_db::run_migrations(&pool).await?;

    let changes = ChangeHub::default();
    let listener_task = changes.listen(pool.clone()).await?;

    let state = AppState {
        store: Arc::new(PgCardStore::new(pool)),
        changes: Arc::new(changes),
        page_size: config.page_size,
    };
    let app = build_app(state, RateLimitState::from_app_config(&config));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    listener_task.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
