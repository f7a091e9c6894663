use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::config::Config;
use courier_api::handlers;
use courier_api::push::Pusher;
use courier_api::service::DeliveryService;
use courier_broker::{Broker, RedisBroker};
use courier_db::Database;
use courier_presence::{PresenceStore, TokenManager};
use courier_types::events::{EXCHANGE, LOGIN_QUEUE, MESSAGE_QUEUE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=debug,courier_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Store and broker are required collaborators; failing to reach either
    // at startup aborts the process rather than running degraded.
    let db = Arc::new(Database::open(&config.db_path)?);
    let store = Arc::new(PresenceStore::new(db));
    let tokens = TokenManager::new(
        config.token_secret.clone(),
        config.token_ttl_minutes,
        store.clone(),
    );

    let broker = Arc::new(RedisBroker::connect(&config.broker_url).await?);
    broker
        .declare_topology(EXCHANGE, &[MESSAGE_QUEUE, LOGIN_QUEUE])
        .await?;

    let pusher = Pusher::new(Duration::from_secs(config.push_timeout_secs))?;
    let service = Arc::new(DeliveryService::new(store, tokens, broker, pusher));

    let app = handlers::router(service)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Courier server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
