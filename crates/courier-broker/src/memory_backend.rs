use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::{Broker, BrokerError, QueueHandler};

const IDLE_POLL: Duration = Duration::from_millis(20);

/// In-memory broker backend with the same at-least-once contract as the
/// Redis one. Process-lifetime only; intended for tests and local runs
/// without a broker.
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the oldest entry off a queue. Test helper; the production path
    /// goes through `consume_many`.
    pub fn take(&self, queue: &str) -> Option<Vec<u8>> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(|q| q.pop_front())
    }

    fn pop(&self, queue: &str) -> Option<Vec<u8>> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(queue)
            .and_then(|q| q.pop_front())
    }

    fn requeue(&self, queue: &str, body: Vec<u8>) {
        if let Some(q) = self.queues.lock().unwrap().get_mut(queue) {
            q.push_back(body);
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_topology(&self, _exchange: &str, queues: &[&str]) -> Result<(), BrokerError> {
        let mut map = self.queues.lock().unwrap();
        for queue in queues {
            map.entry(queue.to_string()).or_default();
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<(), BrokerError> {
        let mut map = self.queues.lock().unwrap();
        match map.get_mut(queue) {
            Some(q) => {
                q.push_back(body.to_vec());
                Ok(())
            }
            None => Err(BrokerError::UnknownQueue(queue.to_string())),
        }
    }

    async fn consume_many(
        &self,
        handlers: HashMap<String, Arc<dyn QueueHandler>>,
    ) -> Result<(), BrokerError> {
        for queue in handlers.keys() {
            if !self.queues.lock().unwrap().contains_key(queue) {
                return Err(BrokerError::UnknownQueue(queue.clone()));
            }
        }

        loop {
            let mut idle = true;

            for (queue, handler) in &handlers {
                while let Some(body) = self.pop(queue) {
                    if let Err(e) = handler.handle(&body).await {
                        // Requeued and retried on a later pass; the idle
                        // sleep below paces a persistently failing handler.
                        warn!(queue = %queue, "handler failed, entry left pending: {}", e);
                        self.requeue(queue, body);
                        break;
                    }
                    idle = false;
                }
            }

            if idle {
                tokio::time::sleep(IDLE_POLL).await;
            }
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64, BrokerError> {
        let map = self.queues.lock().unwrap();
        match map.get(queue) {
            Some(q) => Ok(q.len() as u64),
            None => Err(BrokerError::UnknownQueue(queue.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct Collect {
        seen: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl QueueHandler for Collect {
        async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(body.to_vec());
            Ok(())
        }
    }

    struct FailOnce {
        failed: Arc<StdMutex<bool>>,
        seen: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl QueueHandler for FailOnce {
        async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
            let mut failed = self.failed.lock().unwrap();
            if !*failed {
                *failed = true;
                anyhow::bail!("transient");
            }
            self.seen.lock().unwrap().push(body.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_requires_declared_queue() {
        let broker = MemoryBroker::new();
        assert!(matches!(
            broker.publish("nowhere", b"x").await,
            Err(BrokerError::UnknownQueue(_))
        ));

        broker.declare_topology("ex", &["q"]).await.unwrap();
        broker.publish("q", b"x").await.unwrap();
        assert_eq!(broker.queue_depth("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn declare_topology_is_idempotent() {
        let broker = MemoryBroker::new();
        broker.declare_topology("ex", &["q"]).await.unwrap();
        broker.publish("q", b"kept").await.unwrap();
        broker.declare_topology("ex", &["q"]).await.unwrap();
        assert_eq!(broker.queue_depth("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn consume_dispatches_per_queue() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_topology("ex", &["a", "b"]).await.unwrap();
        broker.publish("a", b"1").await.unwrap();
        broker.publish("b", b"2").await.unwrap();

        let seen_a = Arc::new(StdMutex::new(Vec::new()));
        let seen_b = Arc::new(StdMutex::new(Vec::new()));
        let mut handlers: HashMap<String, Arc<dyn QueueHandler>> = HashMap::new();
        handlers.insert("a".into(), Arc::new(Collect { seen: seen_a.clone() }));
        handlers.insert("b".into(), Arc::new(Collect { seen: seen_b.clone() }));

        let consumer = broker.clone();
        let loop_task = tokio::spawn(async move { consumer.consume_many(handlers).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        loop_task.abort();

        assert_eq!(seen_a.lock().unwrap().as_slice(), &[b"1".to_vec()]);
        assert_eq!(seen_b.lock().unwrap().as_slice(), &[b"2".to_vec()]);
        assert_eq!(broker.queue_depth("a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_handler_leaves_entry_pending() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare_topology("ex", &["q"]).await.unwrap();
        broker.publish("q", b"retry-me").await.unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let mut handlers: HashMap<String, Arc<dyn QueueHandler>> = HashMap::new();
        handlers.insert(
            "q".into(),
            Arc::new(FailOnce {
                failed: Arc::new(StdMutex::new(false)),
                seen: seen.clone(),
            }),
        );

        let consumer = broker.clone();
        let loop_task = tokio::spawn(async move { consumer.consume_many(handlers).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        loop_task.abort();

        // Redelivered after the transient failure.
        assert_eq!(seen.lock().unwrap().as_slice(), &[b"retry-me".to_vec()]);
    }
}
