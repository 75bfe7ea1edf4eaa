use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("no handler registered for task type {0}")]
    HandlerMissing(String),
    #[error("handler for task type {task_type} resolved to an unconfigured bucket {bucket_id}")]
    BucketUnconfigured { task_type: String, bucket_id: String },
    #[error("failed to mark task as errored: {0}")]
    StatusChangeFailed(String),
    #[error("failed to produce trigger message: {0}")]
    Produce(#[from] common_kafka::KafkaProduceError),
}

#[derive(Error, Debug)]
pub enum PollLoopError {
    #[error("failed to deserialize polled record: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("kafka client error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("bucket {0} is not configured")]
    UnknownBucket(String),
    #[error("kafka client error: {0}")]
    Kafka(#[from] common_kafka::KafkaClientError),
}
