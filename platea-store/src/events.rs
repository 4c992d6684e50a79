use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{debug, error};

use platea_domain::{LockEvent, LockEventKind};

/// Kafka bridge for downstream consumers (availability projections,
/// audit). Strictly best-effort: the change feed, not Kafka, is what
/// keeps connected clients correct.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                debug!(
                    topic,
                    key,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    "published lock event"
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }

    /// Routes a lock event to its topic, keyed by function so one
    /// performance's mutations stay ordered per partition.
    pub async fn publish_lock_event(&self, event: &LockEvent) {
        let topic = match event.kind {
            LockEventKind::Insert | LockEventKind::Update => "locks.acquired",
            LockEventKind::Delete => "locks.released",
        };
        let key = event.function_id().to_string();
        match serde_json::to_string(event) {
            Ok(payload) => {
                let _ = self.publish(topic, &key, &payload).await;
            }
            Err(e) => error!("Failed to serialize lock event: {}", e),
        }
    }
}
