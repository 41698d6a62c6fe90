mod bootstrap;
mod dispatch;
mod health;
pub mod approvals;

use std::sync::Arc;

use anyhow::Result;
use fileway_core::config::{AppConfig, LoadOptions};
use fileway_db::repositories::SqlNotificationRepository;

fn init_logging(config: &AppConfig) {
    use fileway_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    if app.config.notifications.enabled {
        dispatch::DispatchWorker::new(
            Arc::new(SqlNotificationRepository::new(app.db_pool.clone())),
            Arc::new(dispatch::LogSender),
            app.config.notifications.clone(),
        )
        .spawn();
        tracing::info!(
            event_name = "system.server.dispatch_started",
            interval_secs = app.config.notifications.dispatch_interval_secs,
            "notification dispatch worker started"
        );
    }

    let router = approvals::router(app.db_pool.clone());
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        "fileway-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "fileway-server stopping");

    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
