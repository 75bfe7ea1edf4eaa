//! Thin wrapper over the shared idempotent producer for the broker leg of
//! `Trigger`.

use async_trait::async_trait;
use common_kafka::producer::{send_keyed_json, KafkaContext, KafkaProduceError};
use rdkafka::producer::FutureProducer;

use crate::message::{random_partitioning_key, TriggerMessage};

/// Broker leg of [`crate::triggerer::Triggerer`], abstracted so the
/// handler-resolution/bucket-lookup logic can be tested without a live
/// broker connection. `send` is fire-and-forget: it returns once the
/// record is enqueued, not once the broker has acknowledged it.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn send(&self, topic: &str, task: &TriggerMessage) -> Result<(), KafkaProduceError>;
}

/// One shared idempotent producer per process.
pub struct TriggerProducer {
    producer: FutureProducer<KafkaContext>,
}

impl TriggerProducer {
    pub fn new(producer: FutureProducer<KafkaContext>) -> Self {
        Self { producer }
    }

    /// Enqueues `task` for `topic` keyed by a fresh random value each call,
    /// so the broker client's sticky-batch partitioner spreads triggers
    /// across every partition instead of piling them onto one. Delivery
    /// acknowledgement is handled out of band by [`send_keyed_json`].
    fn produce(&self, topic: &str, task: &TriggerMessage) -> Result<(), KafkaProduceError> {
        let key = random_partitioning_key();
        send_keyed_json(&self.producer, topic, &key, task)
    }
}

#[async_trait]
impl TriggerSink for TriggerProducer {
    async fn send(&self, topic: &str, task: &TriggerMessage) -> Result<(), KafkaProduceError> {
        self.produce(topic, task)
    }
}

#[cfg(test)]
mod tests {
    // TriggerProducer::send requires a live FutureProducer, which in turn
    // requires a broker connection; the partition-key entropy it relies on
    // is covered directly by message::tests, and the serialize/produce path
    // by common_kafka::producer's own tests.
}
