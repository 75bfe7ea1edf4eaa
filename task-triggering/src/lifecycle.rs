//! Per-bucket start/stop state machine and crash-recovery loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use health::HealthHandle;
use lifecycle::ShutdownHandle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bucket::ConsumerBucket;
use crate::config::BucketConfig;
use crate::error::LifecycleError;
use crate::processing::ProcessingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Stopped,
    Started,
    StopInProgress,
}

/// Builds a fresh [`ConsumerBucket`] for one bucket id. Invoked once at
/// `StartTasksProcessing` and again every time the worker's poll loop
/// returns with an error, so a rebalance-killed or broker-dropped consumer
/// gets replaced rather than leaving the bucket silently stopped.
pub type BucketFactory = dyn Fn() -> Result<ConsumerBucket, LifecycleError> + Send + Sync;

struct RunningWorker {
    shutdown: ShutdownHandle,
    handle: JoinHandle<()>,
}

struct BucketRuntime {
    factory: Arc<BucketFactory>,
    config: BucketConfig,
    liveness: HealthHandle,
    state: Mutex<BucketState>,
    worker: Mutex<Option<RunningWorker>>,
}

/// Owns every configured bucket's start/stop lifecycle. One instance per
/// process; the host binary calls [`Self::application_started`] once at
/// boot and [`Self::prepare_for_shutdown`] once on the way down.
pub struct LifecycleController {
    buckets: HashMap<String, BucketRuntime>,
    processing: Arc<dyn ProcessingService>,
    generic_medium_delay: Duration,
    backpressure_wait_cap: Duration,
}

impl LifecycleController {
    pub fn new(
        processing: Arc<dyn ProcessingService>,
        generic_medium_delay: Duration,
        backpressure_wait_cap: Duration,
    ) -> Self {
        Self {
            buckets: HashMap::new(),
            processing,
            generic_medium_delay,
            backpressure_wait_cap,
        }
    }

    pub fn register_bucket(
        &mut self,
        config: BucketConfig,
        liveness: HealthHandle,
        factory: Arc<BucketFactory>,
    ) {
        self.buckets.insert(
            config.bucket_id.clone(),
            BucketRuntime {
                factory,
                config,
                liveness,
                state: Mutex::new(BucketState::Stopped),
                worker: Mutex::new(None),
            },
        );
    }

    /// Starts every bucket configured with `auto_start_processing`.
    pub async fn application_started(&self) {
        let auto_start: Vec<String> = self
            .buckets
            .iter()
            .filter(|(_, runtime)| runtime.config.auto_start_processing)
            .map(|(id, _)| id.clone())
            .collect();
        for bucket_id in auto_start {
            if let Err(err) = self.start_tasks_processing(&bucket_id).await {
                error!(bucket = %bucket_id, "failed to auto-start bucket: {err}");
            }
        }
    }

    pub async fn start_tasks_processing(&self, bucket_id: &str) -> Result<(), LifecycleError> {
        let runtime = self
            .buckets
            .get(bucket_id)
            .ok_or_else(|| LifecycleError::UnknownBucket(bucket_id.to_string()))?;

        {
            let mut state = runtime.state.lock().expect("lifecycle mutex poisoned");
            if *state != BucketState::Stopped {
                return Ok(());
            }
            *state = BucketState::Started;
        }

        let shutdown = ShutdownHandle::new();
        let handle = tokio::spawn(worker_loop(
            bucket_id.to_string(),
            runtime.factory.clone(),
            self.processing.clone(),
            runtime.liveness.clone(),
            shutdown.clone(),
            self.generic_medium_delay,
            self.backpressure_wait_cap,
        ));

        *runtime.worker.lock().expect("lifecycle mutex poisoned") = Some(RunningWorker { shutdown, handle });
        info!(bucket = %bucket_id, "started tasks processing");
        crate::metrics::record_polling_buckets(self.count_started());
        Ok(())
    }

    /// Signals the bucket's worker to stop and waits for its in-flight
    /// commit to finish; the returned future resolves once stopped.
    pub async fn stop_tasks_processing(&self, bucket_id: &str) -> Result<(), LifecycleError> {
        let runtime = self
            .buckets
            .get(bucket_id)
            .ok_or_else(|| LifecycleError::UnknownBucket(bucket_id.to_string()))?;

        let worker = {
            let mut state = runtime.state.lock().expect("lifecycle mutex poisoned");
            if *state != BucketState::Started {
                return Ok(());
            }
            *state = BucketState::StopInProgress;
            runtime.worker.lock().expect("lifecycle mutex poisoned").take()
        };

        if let Some(worker) = worker {
            worker.shutdown.shut_down();
            if let Err(err) = worker.handle.await {
                warn!(bucket = %bucket_id, "worker task panicked while stopping: {err}");
            }
        }

        *runtime.state.lock().expect("lifecycle mutex poisoned") = BucketState::Stopped;
        info!(bucket = %bucket_id, "stopped tasks processing");
        crate::metrics::record_polling_buckets(self.count_started());
        Ok(())
    }

    pub fn get_tasks_processing_state(&self, bucket_id: &str) -> Option<BucketState> {
        self.buckets
            .get(bucket_id)
            .map(|runtime| *runtime.state.lock().expect("lifecycle mutex poisoned"))
    }

    fn count_started(&self) -> usize {
        self.buckets
            .values()
            .filter(|runtime| *runtime.state.lock().expect("lifecycle mutex poisoned") == BucketState::Started)
            .count()
    }

    /// Stops every started bucket.
    pub async fn prepare_for_shutdown(&self) {
        let bucket_ids: Vec<String> = self.buckets.keys().cloned().collect();
        for bucket_id in bucket_ids {
            if let Err(err) = self.stop_tasks_processing(&bucket_id).await {
                warn!(bucket = %bucket_id, "failed to stop during shutdown: {err}");
            }
        }
    }

    /// True once every bucket has actually reached `Stopped`: the host
    /// process's final barrier before exiting.
    pub fn can_shutdown(&self) -> bool {
        self.buckets.values().all(|runtime| {
            *runtime.state.lock().expect("lifecycle mutex poisoned") == BucketState::Stopped
        })
    }
}

/// Runs a bucket's poll loop to completion, then — unless shutdown was
/// requested — rebuilds the consumer and runs it again after
/// `generic_medium_delay`, so a dropped broker connection or an
/// irrecoverable consumer error doesn't permanently stop the bucket.
async fn worker_loop(
    bucket_id: String,
    factory: Arc<BucketFactory>,
    processing: Arc<dyn ProcessingService>,
    liveness: HealthHandle,
    shutdown: ShutdownHandle,
    generic_medium_delay: Duration,
    backpressure_wait_cap: Duration,
) {
    loop {
        if shutdown.is_shutting_down() {
            return;
        }

        let bucket = match factory() {
            Ok(bucket) => Arc::new(bucket),
            Err(err) => {
                error!(bucket = %bucket_id, "failed to create consumer, retrying: {err}");
                tokio::time::sleep(generic_medium_delay).await;
                continue;
            }
        };

        if let Err(err) = crate::poll_loop::run(
            bucket,
            processing.clone(),
            liveness.clone(),
            shutdown.clone(),
            backpressure_wait_cap,
        )
        .await
        {
            error!(bucket = %bucket_id, "poll loop exited with an error: {err}");
        }

        if shutdown.is_shutting_down() {
            return;
        }
        tokio::time::sleep(generic_medium_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{ProcessingResponse, TaskTriggering};
    use async_trait::async_trait;

    struct NeverCalledProcessing;

    #[async_trait]
    impl ProcessingService for NeverCalledProcessing {
        async fn add_task_for_processing(&self, _triggering: TaskTriggering) -> ProcessingResponse {
            ProcessingResponse::Ok
        }
    }

    /// A bucket that never registers a factory can't be started; this is
    /// exercised via `get_tasks_processing_state` / `start_tasks_processing`
    /// returning `UnknownBucket`, which doesn't require spawning any worker.
    #[tokio::test]
    async fn unknown_bucket_operations_return_an_error() {
        let controller = LifecycleController::new(
            Arc::new(NeverCalledProcessing),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );

        assert!(controller.get_tasks_processing_state("ghost").is_none());
        let err = controller.start_tasks_processing("ghost").await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownBucket(_)));
    }

    #[tokio::test]
    async fn controller_with_no_buckets_can_always_shut_down() {
        let controller = LifecycleController::new(
            Arc::new(NeverCalledProcessing),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        assert!(controller.can_shutdown());
        controller.prepare_for_shutdown().await;
        assert!(controller.can_shutdown());
    }
}
