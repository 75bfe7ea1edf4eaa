use std::time::{Duration, SystemTime, UNIX_EPOCH};

use health::HealthHandle;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, error};

use crate::config::KafkaConfig;
use crate::producer::KafkaClientError;

/// Installed on every bucket's consumer. Reports liveness from librdkafka's
/// own statistics callback (so a wedged poll loop still looks alive only as
/// long as librdkafka itself is making progress), and implements the
/// time-based seek for `auto_reset_offset_to_duration`.
pub struct BucketConsumerContext {
    liveness: HealthHandle,
    auto_reset_offset_to_duration: Option<Duration>,
}

impl rdkafka::ClientContext for BucketConsumerContext {
    fn stats(&self, _: rdkafka::Statistics) {
        self.liveness.report_healthy_blocking();
    }
}

impl ConsumerContext for BucketConsumerContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        let Rebalance::Assign(assigned) = rebalance else {
            return;
        };
        let Some(duration) = self.auto_reset_offset_to_duration else {
            return;
        };
        if let Err(err) = seek_newly_assigned_to_duration_ago(base_consumer, assigned, duration) {
            error!("failed to seek newly assigned partitions to time-based offset: {err}");
        }
    }
}

/// For each partition in `assigned`, resolve the offset at `now - duration`
/// via `offsets_for_times` and seek there; partitions with no such offset
/// (retention shorter than `duration`, or an empty topic) fall back to the
/// earliest available offset.
fn seek_newly_assigned_to_duration_ago(
    consumer: &BaseConsumer<BucketConsumerContext>,
    assigned: &TopicPartitionList,
    duration: Duration,
) -> KafkaResult<()> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    let target_ms = now_ms - duration.as_millis() as i64;

    let mut lookup = TopicPartitionList::new();
    for elem in assigned.elements() {
        lookup.add_partition_offset(elem.topic(), elem.partition(), Offset::Offset(target_ms))?;
    }

    let resolved = consumer.offsets_for_times(lookup, Duration::from_secs(10))?;
    for elem in resolved.elements() {
        let offset = match elem.offset() {
            Offset::Offset(offset) => Offset::Offset(offset),
            _ => Offset::Beginning,
        };
        consumer.seek(elem.topic(), elem.partition(), offset, Duration::from_secs(5))?;
        debug!(
            topic = elem.topic(),
            partition = elem.partition(),
            "seeked newly assigned partition to time-based offset"
        );
    }
    Ok(())
}

/// Options specific to one bucket's consumer, as distinct from the
/// process-wide [`KafkaConfig`].
pub struct BucketConsumerOptions {
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_reset_offset_to_duration: Option<Duration>,
    /// Partitions the bucket's trigger topic should have; ensured via an
    /// idempotent admin call before the consumer subscribes.
    pub partition_count: i32,
    /// Upper bound on how many unacknowledged records the bucket keeps in
    /// flight locally, applied as librdkafka's local-queue threshold.
    pub fetch_batch_size: usize,
}

/// Idempotently ensures `topic` exists with at least `partition_count`
/// partitions. `TopicAlreadyExists` (the common case on every run after the
/// first) is swallowed; any other admin error is surfaced so the caller can
/// retry via the bucket's usual create-consumer backoff.
fn ensure_topic_partitions(
    config: &KafkaConfig,
    topic: &str,
    partition_count: i32,
) -> Result<(), KafkaClientError> {
    let mut admin_config = ClientConfig::new();
    admin_config.set("bootstrap.servers", &config.bootstrap_servers);
    if config.tls {
        admin_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }
    let admin_client: AdminClient<DefaultClientContext> = admin_config.create()?;

    // -1 defers to the broker's own `default.replication.factor`; this call
    // only needs to guarantee partition count, not pin replication.
    let new_topic = NewTopic::new(topic, partition_count, TopicReplication::Fixed(-1));
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));

    let results = futures::executor::block_on(admin_client.create_topics(&[new_topic], &opts))
        .map_err(KafkaClientError::Connect)?;

    for result in results {
        match result {
            Ok(created) => debug!(topic = %created, "ensured trigger topic exists"),
            Err((topic, err)) if matches!(err, rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists) => {
                debug!(topic = %topic, "trigger topic already exists, leaving partition count as-is");
            }
            Err((topic, err)) => {
                error!(topic = %topic, "failed to ensure trigger topic partition count: {err}");
            }
        }
    }
    Ok(())
}

/// Opens a consumer for one bucket: cooperative-sticky assignment with a
/// fall back to range, auto-commit disabled (the offset-tracker-driven
/// commit policy owns that), and either the configured `auto.offset.reset`
/// or a time-based rebalance seek. On first use, ensures every subscribed
/// topic has the bucket's configured partition count before subscribing.
pub fn create_bucket_consumer(
    config: &KafkaConfig,
    options: BucketConsumerOptions,
    liveness: HealthHandle,
) -> Result<StreamConsumer<BucketConsumerContext>, KafkaClientError> {
    for topic in &options.topics {
        ensure_topic_partitions(config, topic, options.partition_count)?;
    }

    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.bootstrap_servers)
        .set("statistics.interval.ms", "10000")
        .set("group.id", &options.group_id)
        .set("enable.auto.commit", "false")
        .set(
            "partition.assignment.strategy",
            "cooperative-sticky,range",
        )
        .set("queued.min.messages", options.fetch_batch_size.to_string())
        .set_log_level(RDKafkaLogLevel::Info);

    if options.auto_reset_offset_to_duration.is_none() {
        client_config.set("auto.offset.reset", &config.auto_offset_reset);
    }

    if config.tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }

    let context = BucketConsumerContext {
        liveness,
        auto_reset_offset_to_duration: options.auto_reset_offset_to_duration,
    };

    let consumer: StreamConsumer<BucketConsumerContext> =
        client_config.create_with_context(context)?;

    let topics: Vec<&str> = options.topics.iter().map(String::as_str).collect();
    consumer.subscribe(&topics).map_err(KafkaClientError::Connect)?;

    Ok(consumer)
}

/// Build a `TopicPartitionList` suitable for
/// `Consumer::commit(_, CommitMode::Async)` from a drained commit map keyed
/// by `(topic, partition)`, where each stored offset is already the next
/// offset to read. A bucket subscribed to a base topic plus data-center
/// aliases commits entries spanning all of them in one call.
pub fn commit_list(offsets: impl IntoIterator<Item = ((String, i32), i64)>) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), offset) in offsets {
        // add_partition_offset only fails on an invalid topic string, which
        // can't happen here since `topic` was already used to subscribe.
        let _ = tpl.add_partition_offset(&topic, partition, Offset::Offset(offset));
    }
    tpl
}

/// True when `err` indicates a transient rebalance/reassignment condition
/// that should be logged at debug and not surfaced as an operator-facing
/// error.
pub fn is_retriable_commit_error(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            rdkafka::types::RDKafkaErrorCode::RebalanceInProgress
                | rdkafka::types::RDKafkaErrorCode::UnknownMemberId
                | rdkafka::types::RDKafkaErrorCode::IllegalGeneration
                | rdkafka::types::RDKafkaErrorCode::NotCoordinator
                | rdkafka::types::RDKafkaErrorCode::CoordinatorLoadInProgress
        )
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_list_builds_one_entry_per_partition() {
        let tpl = commit_list([
            (("my-topic".to_string(), 0), 13),
            (("my-topic".to_string(), 1), 42),
        ]);
        let elements = tpl.elements();
        assert_eq!(elements.len(), 2);
        assert!(elements
            .iter()
            .any(|e| e.partition() == 0 && e.offset() == Offset::Offset(13)));
        assert!(elements
            .iter()
            .any(|e| e.partition() == 1 && e.offset() == Offset::Offset(42)));
    }

    #[test]
    fn commit_list_spans_multiple_topics() {
        let tpl = commit_list([
            (("base".to_string(), 0), 13),
            (("dc1.base".to_string(), 0), 42),
        ]);
        let elements = tpl.elements();
        assert_eq!(elements.len(), 2);
        assert!(elements
            .iter()
            .any(|e| e.topic() == "base" && e.offset() == Offset::Offset(13)));
        assert!(elements
            .iter()
            .any(|e| e.topic() == "dc1.base" && e.offset() == Offset::Offset(42)));
    }
}
