mod worker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use courier_api::config::Config;
use courier_api::push::Pusher;
use courier_api::service::DeliveryService;
use courier_broker::{Broker, QueueHandler, RedisBroker};
use courier_db::Database;
use courier_presence::{PresenceStore, TokenManager};
use courier_types::events::{EXCHANGE, LOGIN_QUEUE, MESSAGE_QUEUE};

use worker::{LoginEventHandler, MessageEventHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_relay=debug,courier_api=debug,courier_broker=info".into()),
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

    let broker = Arc::new(
        RedisBroker::connect(&config.broker_url)
            .await?
            .with_concurrency(config.relay_concurrency),
    );
    broker
        .declare_topology(EXCHANGE, &[MESSAGE_QUEUE, LOGIN_QUEUE])
        .await?;

    let pusher = Pusher::new(Duration::from_secs(config.push_timeout_secs))?;
    let service = Arc::new(DeliveryService::new(store, tokens, broker.clone(), pusher));

    let mut handlers: HashMap<String, Arc<dyn QueueHandler>> = HashMap::new();
    handlers.insert(
        MESSAGE_QUEUE.to_string(),
        Arc::new(MessageEventHandler::new(service.clone())),
    );
    handlers.insert(
        LOGIN_QUEUE.to_string(),
        Arc::new(LoginEventHandler::new(service)),
    );

    info!("Relay worker consuming from {} and {}", MESSAGE_QUEUE, LOGIN_QUEUE);

    // Only returns on connection loss; exiting non-zero hands restart duty
    // to the external supervisor.
    broker.consume_many(handlers).await?;
    Ok(())
}
