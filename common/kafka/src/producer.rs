use health::HealthHandle;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use serde::Serialize;
use serde_json::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

/// Reports the producer's internal rdkafka thread as live whenever
/// librdkafka emits client statistics, keeping a `HealthHandle` current
/// without a dedicated polling task.
pub struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        self.liveness.report_healthy_blocking();
    }
}

#[derive(Error, Debug)]
pub enum KafkaClientError {
    #[error("failed to create or connect kafka client: {0}")]
    Connect(#[from] KafkaError),
}

/// Single idempotent producer for the whole process. Every `Trigger` call
/// and every bucket's rebalance/admin path that needs to produce uses this
/// same handle.
pub async fn create_idempotent_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaClientError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("statistics.interval.ms", "10000")
        .set("acks", "all")
        .set("enable.idempotence", "true")
        .set(
            "max.in.flight.requests.per.connection",
            config.producer_max_in_flight.to_string(),
        )
        .set("max.block.ms", config.producer_max_block_ms.to_string())
        .set(
            "request.timeout.ms",
            config.producer_request_timeout_ms.to_string(),
        )
        .set(
            "delivery.timeout.ms",
            config.producer_delivery_timeout_ms.to_string(),
        )
        .set("linger.ms", config.producer_linger_ms.to_string())
        .set(
            "reconnect.backoff.ms",
            config.producer_reconnect_backoff_ms.to_string(),
        )
        .set(
            "reconnect.backoff.max.ms",
            config.producer_reconnect_backoff_max_ms.to_string(),
        );

    if config.tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }

    debug!("rdkafka producer configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(KafkaContext { liveness })?;

    match producer
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(2))
    {
        Ok(metadata) => info!(
            "connected to kafka brokers, found {} topics",
            metadata.topics().len()
        ),
        Err(error) => {
            error!("failed to fetch metadata from kafka brokers: {:?}", error);
            return Err(error.into());
        }
    }

    Ok(producer)
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] SerdeError),
    #[error("failed to produce to kafka: {0}")]
    Produce(KafkaError),
    #[error("produce was canceled, likely a delivery timeout")]
    Canceled,
}

/// Serialize `payload` to JSON and enqueue it for `topic` with the given
/// key, fire-and-forget from the caller's perspective: this returns as soon
/// as librdkafka has accepted the record into its local queue, without
/// waiting for the broker to acknowledge delivery. The key is never `None`
/// on the trigger path: callers pass a random key to defeat the producer's
/// sticky-batch partitioner, or a stable key where ordering is required.
///
/// Delivery is confirmed out of band: a spawned task awaits the returned
/// record's delivery future and logs the outcome (debug on success, error
/// on failure) once the broker responds. A lost trigger isn't lost work —
/// the task's durability lives in the external store, which re-triggers it
/// on its own schedule.
pub fn send_keyed_json<T, C>(
    producer: &FutureProducer<C>,
    topic: &str,
    key: &str,
    payload: &T,
) -> Result<(), KafkaProduceError>
where
    T: Serialize,
    C: rdkafka::ClientContext,
{
    let serialized = serde_json::to_vec(payload)?;
    let record = FutureRecord::to(topic).key(key).payload(&serialized);

    let delivery = producer
        .send_result(record)
        .map_err(|(error, _record)| KafkaProduceError::Produce(error))?;

    let topic = topic.to_string();
    tokio::spawn(async move {
        match delivery.await {
            Ok(Ok((partition, offset))) => {
                debug!(topic, partition, offset, "trigger message delivered");
            }
            Ok(Err((error, _message))) => {
                error!(topic, "{}", KafkaProduceError::Produce(error));
            }
            Err(_canceled) => {
                error!(topic, "{}", KafkaProduceError::Canceled);
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kafka_client_error_wraps_kafka_error() {
        let err: KafkaClientError = KafkaError::Canceled.into();
        assert!(matches!(err, KafkaClientError::Connect(_)));
    }
}
