//! The per-bucket poll loop: poll a batch, hand each record to the
//! processing service, back off when it says `FULL`, commit on a timer.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use health::HealthHandle;
use lifecycle::ShutdownHandle;
use rdkafka::message::Message;
use tracing::{debug, warn};

use crate::bucket::ConsumerBucket;
use crate::error::PollLoopError;
use crate::message::TriggerMessage;
use crate::processing::{ProcessingResponse, ProcessingService, TaskTriggering};

/// Runs until `shutdown` fires: a tight poll/dispatch/backpressure/commit
/// cycle. `tokio::select!` against the cancellation token gives the same
/// responsiveness a blocking consumer gets from an explicit wake-up call.
pub async fn run(
    bucket: Arc<ConsumerBucket>,
    processing: Arc<dyn ProcessingService>,
    liveness: HealthHandle,
    shutdown: ShutdownHandle,
    backpressure_wait_cap: Duration,
) -> Result<(), PollLoopError> {
    let mut stream = bucket.consumer.stream();

    loop {
        if shutdown.is_shutting_down() {
            break;
        }

        let record = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        let Some(record) = record else {
            // The stream ended, which only happens if the consumer itself
            // was dropped; nothing left to poll.
            break;
        };
        let message = record?;
        liveness.report_healthy().await;

        let topic = message.topic().to_string();
        let partition = message.partition();
        let offset = message.offset();
        let Some(payload) = message.payload() else {
            warn!(bucket = %bucket.bucket_id, topic, partition, offset, "skipping trigger record with no payload");
            continue;
        };

        let task: TriggerMessage = serde_json::from_slice(payload)?;

        bucket.offsets.register_polled(topic.clone(), partition, offset);
        bucket.increment_unprocessed(1);

        dispatch_with_backpressure(
            &bucket.backpressure,
            processing.as_ref(),
            TaskTriggering {
                task,
                bucket_id: bucket.bucket_id.clone(),
                topic,
                partition,
                offset,
            },
            backpressure_wait_cap,
            &shutdown,
        )
        .await;
        bucket.decrement_unprocessed();

        bucket.report_metrics();
        if let Err(err) = bucket.maybe_commit().await {
            warn!(bucket = %bucket.bucket_id, "commit attempt failed: {err}");
        }
    }

    debug!(bucket = %bucket.bucket_id, "poll loop exiting, flushing final commit");
    if let Err(err) = bucket.commit_now_blocking() {
        warn!(bucket = %bucket.bucket_id, "final commit on shutdown failed: {err}");
    }
    Ok(())
}

/// Retries `AddTaskForProcessing` until it stops returning `FULL`, waiting
/// on the bucket's [`crate::processing::BackpressureSignal`] between
/// attempts instead of busy-polling. Bounded by
/// `backpressure_wait_cap` per attempt so a stalled processing service
/// still lets the loop notice shutdown and re-check liveness.
async fn dispatch_with_backpressure(
    backpressure: &crate::processing::BackpressureSignal,
    processing: &dyn ProcessingService,
    triggering: TaskTriggering,
    backpressure_wait_cap: Duration,
    shutdown: &ShutdownHandle,
) {
    loop {
        let version_before = backpressure.version();
        let response = processing.add_task_for_processing(triggering.clone()).await;

        match response {
            ProcessingResponse::Full => {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    _ = backpressure.wait_for_change(version_before, backpressure_wait_cap) => {}
                }
            }
            ProcessingResponse::Ok | ProcessingResponse::Other(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{TaskRef, TaskStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeProcessingService {
        responses: Mutex<Vec<ProcessingResponse>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProcessingService for FakeProcessingService {
        async fn add_task_for_processing(&self, _triggering: TaskTriggering) -> ProcessingResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                responses[0].clone()
            }
        }
    }

    fn triggering() -> TaskTriggering {
        TaskTriggering {
            task: TaskRef {
                id: 1,
                version: 0,
                task_type: "x".into(),
                priority: 0,
                status: TaskStatus::Submitted,
            },
            bucket_id: "default".into(),
            topic: "default-topic".into(),
            partition: 0,
            offset: 0,
        }
    }

    #[tokio::test]
    async fn dispatch_returns_immediately_on_ok() {
        let backpressure = crate::processing::BackpressureSignal::new();
        let processing = FakeProcessingService {
            responses: Mutex::new(vec![ProcessingResponse::Ok]),
            calls: AtomicUsize::new(0),
        };
        let shutdown = ShutdownHandle::new();

        dispatch_with_backpressure(
            &backpressure,
            &processing,
            triggering(),
            Duration::from_millis(50),
            &shutdown,
        )
        .await;

        assert_eq!(processing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_retries_after_full_until_ok() {
        let backpressure = crate::processing::BackpressureSignal::new();
        let processing = FakeProcessingService {
            responses: Mutex::new(vec![ProcessingResponse::Full, ProcessingResponse::Ok]),
            calls: AtomicUsize::new(0),
        };
        let shutdown = ShutdownHandle::new();

        dispatch_with_backpressure(
            &backpressure,
            &processing,
            triggering(),
            Duration::from_millis(30),
            &shutdown,
        )
        .await;

        assert_eq!(processing.calls.load(Ordering::SeqCst), 2);
    }
}
