use memehub_feed::{
    config::Config,
    errors::AppError,
    notices::NoticeVariant,
    routes::create_router,
    startup::build_services,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize tracing (logging)
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "memehub_feed=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = Config::load()?;

    // --- Backend + Stores ---
    let services = build_services(&config).await.map_err(|e| {
        tracing::error!("Failed to build services: {:#}", e);
        AppError::InitError(format!("{:#}", e))
    })?;

    // Notices have no screen to land on here, so they go to the log.
    let mut notices = services.state.notices.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => match notice.variant {
                    NoticeVariant::Destructive => {
                        tracing::warn!(title = %notice.title, "{}", notice.description)
                    }
                    NoticeVariant::Default => tracing::info!(title = %notice.title, "{}", notice.description),
                },
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let app = create_router(Arc::clone(&services.state));

    // --- Server Startup ---
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(|e| AppError::InitError(format!("Failed to bind {}: {}", config.bind_address, e)))?;
    tracing::info!("Gateway listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::InternalServerError(format!("Server error: {}", e)))?;

    services.state.shutdown();
    if let Some(refresher) = services.refresher {
        refresher.abort();
    }
    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
