//! Per-bucket consumer runtime state.
//!
//! A [`ConsumerBucket`] owns the one [`StreamConsumer`] for its partitions,
//! the [`OffsetTracker`] that decides what's safe to commit, and the commit
//! cadence: stage as completions arrive, flush on a timer rather than on
//! every single completion.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common_kafka::consumer::{commit_list, is_retriable_commit_error, BucketConsumerContext};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::offset_tracker::OffsetTracker;
use crate::processing::BackpressureSignal;

/// Runtime handle for one configured bucket. `trigger_in_same_process`
/// buckets that never touch the broker still get one of these for the
/// `StartTasksProcessing`/`StopTasksProcessing` bookkeeping in
/// [`crate::lifecycle`], just with `consumer` unused by the poll loop.
pub struct ConsumerBucket {
    pub bucket_id: String,
    pub topic: String,
    pub consumer: StreamConsumer<BucketConsumerContext>,
    pub offsets: Arc<OffsetTracker>,
    pub backpressure: Arc<BackpressureSignal>,
    pub fetch_batch_size: usize,
    last_commit: AsyncMutex<Instant>,
    commit_interval: Duration,
    /// Gauge value for the `unprocessedFetchedRecords` metric; updated by
    /// the poll loop as it hands records to the processing service.
    unprocessed_fetched_records: AtomicI64,
    /// Last cumulative `already_committed_occurrences` value reported to
    /// the counter, so each report only emits the delta since the last one.
    last_reported_already_committed: AtomicU64,
}

impl ConsumerBucket {
    pub fn new(
        bucket_id: impl Into<String>,
        topic: impl Into<String>,
        consumer: StreamConsumer<BucketConsumerContext>,
        fetch_batch_size: usize,
        commit_interval: Duration,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            topic: topic.into(),
            consumer,
            offsets: Arc::new(OffsetTracker::new()),
            backpressure: Arc::new(BackpressureSignal::new()),
            fetch_batch_size,
            last_commit: AsyncMutex::new(Instant::now()),
            commit_interval,
            unprocessed_fetched_records: AtomicI64::new(0),
            last_reported_already_committed: AtomicU64::new(0),
        }
    }

    pub fn increment_unprocessed(&self, delta: i64) {
        self.unprocessed_fetched_records.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn decrement_unprocessed(&self) {
        self.unprocessed_fetched_records.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn unprocessed_fetched_records(&self) -> i64 {
        self.unprocessed_fetched_records.load(Ordering::Relaxed)
    }

    /// Publishes every per-bucket gauge and the already-committed-offset
    /// occurrence counter, reporting only the delta since the last call so
    /// repeated calls don't double-count.
    pub fn report_metrics(&self) {
        crate::metrics::record_bucket_gauges(self);

        let total = self.offsets.already_committed_occurrences();
        let previous = self.last_reported_already_committed.swap(total, Ordering::Relaxed);
        let delta = total.saturating_sub(previous);
        if delta > 0 {
            crate::metrics::record_already_committed_occurrences(&self.bucket_id, delta);
        }
    }

    /// Commits whatever is staged if `commit_interval` has elapsed since the
    /// last commit. A no-op when nothing is staged.
    pub async fn maybe_commit(&self) -> Result<usize, KafkaError> {
        let mut last_commit = self.last_commit.lock().await;
        if last_commit.elapsed() < self.commit_interval {
            return Ok(0);
        }

        let staged = self.offsets.drain_commitable();
        if staged.is_empty() {
            *last_commit = Instant::now();
            return Ok(0);
        }

        let count = staged.len();
        let tpl = commit_list(staged);
        match self.consumer.commit(&tpl, rdkafka::consumer::CommitMode::Async) {
            Ok(()) => {
                *last_commit = Instant::now();
                debug!(bucket = %self.bucket_id, offsets = count, "committed offsets");
                crate::metrics::record_commit(&self.bucket_id, count);
                Ok(count)
            }
            Err(err) if is_retriable_commit_error(&err) => {
                debug!(bucket = %self.bucket_id, "commit skipped, rebalance in progress: {err}");
                crate::metrics::record_commit_failed(&self.bucket_id);
                Ok(0)
            }
            Err(err) => {
                warn!(bucket = %self.bucket_id, "failed to commit offsets: {err}");
                crate::metrics::record_commit_failed(&self.bucket_id);
                Err(err)
            }
        }
    }

    /// Synchronous, blocking final commit for bucket shutdown: flush
    /// whatever is staged and wait for the broker to acknowledge it before
    /// the consumer is torn down, regardless of the commit cadence.
    pub fn commit_now_blocking(&self) -> Result<usize, KafkaError> {
        let staged = self.offsets.drain_commitable();
        if staged.is_empty() {
            return Ok(0);
        }
        let count = staged.len();
        let tpl = commit_list(staged);
        self.consumer.commit(&tpl, rdkafka::consumer::CommitMode::Sync)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    // ConsumerBucket::new requires a live StreamConsumer, which in turn
    // requires a broker connection; its logic is exercised indirectly via
    // OffsetTracker's own unit tests and the poll loop's tests, which use a
    // fake in place of the Kafka-backed half of a bucket.
}
