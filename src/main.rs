use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use photo_checkout as app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = app::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    if cfg.is_development() || cfg.database_url.starts_with("sqlite:") {
        app::db::create_schema(&db_pool).await.map_err(|e| {
            error!("Failed creating schema: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Compose shared app state
    let state = Arc::new(app::AppState::from_config(cfg.clone(), db)?);

    // Background sweepers
    app::services::tokens::spawn_blacklist_sweeper(
        state.tokens.clone(),
        cfg.tokens.cleanup_interval(),
    );
    app::services::checkout::spawn_pending_order_sweeper(
        state.checkout.clone(),
        Duration::from_secs(cfg.checkout.pending_sweep_interval_secs),
    );

    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    info!(%addr, environment = %cfg.environment, "photo-checkout listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
