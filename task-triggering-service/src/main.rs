use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use common_kafka::consumer::{create_bucket_consumer, BucketConsumerOptions};
use common_metrics::{serve, setup_metrics_routes};
use envconfig::Envconfig;
use health::HealthRegistry;
use lifecycle::ShutdownHandle;
use task_triggering::bucket::ConsumerBucket;
use task_triggering::config::BucketConfig;
use task_triggering::error::LifecycleError;
use task_triggering::lifecycle::LifecycleController;
use task_triggering::processing::{ProcessingResponse, ProcessingService, TaskTriggering};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod config;

use config::Config;

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().unwrap()),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

pub async fn index() -> &'static str {
    "task triggering service"
}

/// Stand-in for the downstream processing engine, which is owned by the
/// host application and wired in separately. A real deployment supplies
/// its own [`ProcessingService`] to [`LifecycleController`]; this one
/// always reports `OK` so the broker path runs exactly as it would once a
/// real engine is attached.
struct NoopProcessingService;

#[async_trait]
impl ProcessingService for NoopProcessingService {
    async fn add_task_for_processing(&self, triggering: TaskTriggering) -> ProcessingResponse {
        info!(
            bucket = %triggering.bucket_id,
            task_id = triggering.task.id,
            "no processing engine attached, accepting and dropping trigger"
        );
        ProcessingResponse::Ok
    }
}

#[tokio::main]
pub async fn main() -> Result<(), anyhow::Error> {
    setup_tracing();
    info!("starting task triggering service");

    let config = Config::init_from_env()?;
    let bucket_ids = config.bucket_ids();
    info!(buckets = ?bucket_ids, "configuration loaded");

    let liveness = HealthRegistry::new("liveness");
    let readiness = HealthRegistry::new("readiness");

    let bind = format!("{}:{}", config.bind_host, config.bind_port);
    let liveness_for_routes = liveness.clone();
    let readiness_for_routes = readiness.clone();
    let health_router = Router::new()
        .route("/", get(index))
        .route("/_liveness", get(move || ready(liveness_for_routes.get_status())))
        .route("/_readiness", get(move || ready(readiness_for_routes.get_status())));
    let health_router = setup_metrics_routes(health_router);

    tokio::spawn(async move {
        serve(health_router, &bind)
            .await
            .expect("failed to start health server");
    });

    let shutdown = ShutdownHandle::new();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
        info!("shutdown signal received");
        shutdown_for_signal.shut_down();
    });

    let generic_medium_delay = Duration::from_millis(config.generic_medium_delay_ms);
    let mut controller = LifecycleController::new(
        Arc::new(NoopProcessingService),
        generic_medium_delay,
        generic_medium_delay,
    );

    for bucket_id in &bucket_ids {
        let mut bucket_config = BucketConfig::new(bucket_id.clone());
        bucket_config.fetch_batch_size = config.fetch_batch_size;
        let bucket_liveness = liveness
            .register(format!("bucket-{bucket_id}"), generic_medium_delay * 3)
            .await;

        let kafka_config = config.kafka.clone();
        let topic = kafka_config.trigger_topic(Some(bucket_id));
        let mut topics = vec![topic.clone()];
        topics.extend(kafka_config.trigger_topic_aliases(Some(bucket_id)));
        let group_id = kafka_config.consumer_group_id(bucket_config.trigger_same_task_in_all_nodes);
        let factory_bucket_id = bucket_id.clone();
        let factory_topic = topic.clone();
        let factory_topics = topics.clone();
        let factory_liveness = bucket_liveness.clone();
        let factory_bucket_config = bucket_config.clone();
        let factory = Arc::new(move || -> Result<ConsumerBucket, LifecycleError> {
            let consumer = create_bucket_consumer(
                &kafka_config,
                BucketConsumerOptions {
                    group_id: group_id.clone(),
                    topics: factory_topics.clone(),
                    auto_reset_offset_to_duration: factory_bucket_config.auto_reset_offset_to_duration,
                    partition_count: factory_bucket_config.partition_count,
                    fetch_batch_size: factory_bucket_config.fetch_batch_size,
                },
                factory_liveness.clone(),
            )?;
            Ok(ConsumerBucket::new(
                factory_bucket_id.clone(),
                factory_topic.clone(),
                consumer,
                factory_bucket_config.fetch_batch_size,
                generic_medium_delay,
            ))
        });

        controller.register_bucket(bucket_config.clone(), bucket_liveness, factory);
        readiness.register(format!("bucket-{bucket_id}"), generic_medium_delay * 3).await;
    }

    controller.application_started().await;
    info!("task triggering service ready");

    shutdown.cancelled().await;
    info!("preparing for shutdown");
    controller.prepare_for_shutdown().await;

    info!("task triggering service shut down");
    Ok(())
}
