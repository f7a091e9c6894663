use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Broker, BrokerError, QueueHandler};

const READ_BLOCK_MS: usize = 5_000;
const READ_BATCH: usize = 16;

/// Broker backend over Redis Streams.
///
/// Each declared queue maps to a stream keyed `{exchange}.{queue}` with one
/// consumer group named after the exchange. Entries survive a broker restart
/// subject to the server's persistence configuration, XACK after handler
/// completion gives at-least-once delivery, and XLEN backs depth checks.
pub struct RedisBroker {
    client: redis::Client,
    publish_conn: Mutex<MultiplexedConnection>,
    /// queue name -> stream key, populated by declare_topology.
    streams: RwLock<HashMap<String, String>>,
    group: RwLock<String>,
    concurrency: usize,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url).map_err(BrokerError::Connect)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(BrokerError::Connect)?;

        info!("Broker connection established");
        Ok(Self {
            client,
            publish_conn: Mutex::new(conn),
            streams: RwLock::new(HashMap::new()),
            group: RwLock::new(String::new()),
            concurrency: 32,
        })
    }

    /// Caps the number of handler tasks in flight at once on the consume
    /// side.
    pub fn with_concurrency(mut self, permits: usize) -> Self {
        self.concurrency = permits.max(1);
        self
    }

    fn stream_for(&self, queue: &str) -> Result<String, BrokerError> {
        self.streams
            .read()
            .unwrap()
            .get(queue)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))
    }

    async fn reconnect(&self) -> Result<MultiplexedConnection, BrokerError> {
        info!("Reconnecting to broker");
        let fresh = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(BrokerError::Connect)?;
        *self.publish_conn.lock().await = fresh.clone();
        Ok(fresh)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn declare_topology(&self, exchange: &str, queues: &[&str]) -> Result<(), BrokerError> {
        let mut conn = self.publish_conn.lock().await.clone();

        for queue in queues {
            let stream = format!("{}.{}", exchange, queue);

            // MKSTREAM creates the stream with the group; an existing group
            // answers BUSYGROUP, which keeps the call idempotent.
            let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(exchange)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match created {
                Ok(()) => info!(stream = %stream, group = exchange, "queue declared"),
                Err(e) if e.code() == Some("BUSYGROUP") => {
                    debug!(stream = %stream, "queue already declared")
                }
                Err(e) => return Err(BrokerError::Topology(e)),
            }

            self.streams
                .write()
                .unwrap()
                .insert(queue.to_string(), stream);
        }

        *self.group.write().unwrap() = exchange.to_string();
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let stream = self.stream_for(queue)?;
        let mut conn = self.publish_conn.lock().await.clone();

        let sent: Result<String, redis::RedisError> =
            conn.xadd(&stream, "*", &[("body", body)]).await;

        match sent {
            Ok(_) => Ok(()),
            Err(e) if e.is_connection_dropped() || e.is_io_error() => {
                warn!(queue, "publish hit a dead connection, retrying once");
                let mut fresh = self.reconnect().await?;
                let retried: Result<String, redis::RedisError> =
                    fresh.xadd(&stream, "*", &[("body", body)]).await;
                retried.map(|_| ()).map_err(|source| BrokerError::Publish {
                    queue: queue.to_string(),
                    source,
                })
            }
            Err(source) => Err(BrokerError::Publish {
                queue: queue.to_string(),
                source,
            }),
        }
    }

    async fn consume_many(
        &self,
        handlers: HashMap<String, Arc<dyn QueueHandler>>,
    ) -> Result<(), BrokerError> {
        let group = self.group.read().unwrap().clone();
        let consumer = format!("{}-{}", group, Uuid::new_v4());

        // stream key -> handler, in a stable order for XREADGROUP.
        let mut routes: Vec<(String, Arc<dyn QueueHandler>)> = Vec::new();
        for (queue, handler) in handlers {
            routes.push((self.stream_for(&queue)?, handler));
        }
        let keys: Vec<String> = routes.iter().map(|(k, _)| k.clone()).collect();
        let by_stream: HashMap<String, Arc<dyn QueueHandler>> = routes.into_iter().collect();

        // Separate connections so XACKs from handler tasks are not queued
        // behind the blocking read.
        let mut read_conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(BrokerError::Connect)?;
        let ack_conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(BrokerError::Connect)?;

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let ids: Vec<&str> = keys.iter().map(|_| ">").collect();
        info!(consumer = %consumer, queues = keys.len(), "consume loop started");

        loop {
            let opts = StreamReadOptions::default()
                .group(&group, &consumer)
                .block(READ_BLOCK_MS)
                .count(READ_BATCH);

            let reply: StreamReadReply = read_conn
                .xread_options(&keys, &ids, &opts)
                .await
                .map_err(BrokerError::ConnectionLost)?;

            for stream_key in reply.keys {
                let Some(handler) = by_stream.get(&stream_key.key) else {
                    continue;
                };

                for entry in stream_key.ids {
                    let body: Vec<u8> = match entry
                        .map
                        .get("body")
                        .and_then(|v| redis::from_redis_value(v).ok())
                    {
                        Some(body) => body,
                        None => {
                            // Unreadable entry: ack it away rather than
                            // redeliver it forever.
                            error!(stream = %stream_key.key, id = %entry.id, "dropping entry without a readable body");
                            let mut conn = ack_conn.clone();
                            let _: Result<i64, _> =
                                conn.xack(&stream_key.key, &group, &[&entry.id]).await;
                            continue;
                        }
                    };

                    let permit = permits
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("consume semaphore closed");
                    let handler = handler.clone();
                    let mut conn = ack_conn.clone();
                    let stream = stream_key.key.clone();
                    let id = entry.id.clone();
                    let group = group.clone();

                    // Handler work runs concurrently with the read loop; the
                    // entry is acked only after the handler succeeds.
                    tokio::spawn(async move {
                        let _permit = permit;
                        match handler.handle(&body).await {
                            Ok(()) => {
                                let acked: Result<i64, redis::RedisError> =
                                    conn.xack(&stream, &group, &[&id]).await;
                                if let Err(e) = acked {
                                    warn!(stream = %stream, id = %id, "ack failed, entry will be redelivered: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!(stream = %stream, id = %id, "handler failed, entry left pending: {}", e);
                            }
                        }
                    });
                }
            }
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError> {
        let stream = self.stream_for(queue)?;
        let mut conn = self.publish_conn.lock().await.clone();
        let len: u64 = conn
            .xlen(&stream)
            .await
            .map_err(BrokerError::ConnectionLost)?;
        Ok(len)
    }
}
