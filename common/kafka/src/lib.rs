pub mod config;
pub mod consumer;
pub mod producer;

pub use config::KafkaConfig;
pub use consumer::{create_bucket_consumer, BucketConsumerContext, BucketConsumerOptions};
pub use producer::{create_idempotent_producer, KafkaClientError, KafkaContext, KafkaProduceError};
