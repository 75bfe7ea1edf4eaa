//! Collaboration surface with the external task-processing service that
//! actually runs tasks. This module defines the boundary, not an
//! implementation of it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::message::TaskRef;
use crate::offset_tracker::{MessageOffset, OffsetTracker, PartitionId};

/// What the poll loop hands the processing service for each polled record.
#[derive(Debug, Clone)]
pub struct TaskTriggering {
    pub task: TaskRef,
    pub bucket_id: String,
    /// The topic the record was actually polled from — the bucket's base
    /// trigger topic or one of its data-center aliases. Threaded through so
    /// completion can release the right `(topic, partition)` entry in the
    /// offset tracker.
    pub topic: String,
    pub partition: PartitionId,
    pub offset: MessageOffset,
}

/// Only `OK` and `FULL` carry distinct meaning here; every other response
/// is handled identically to `OK` on the retry loop (fall through) but
/// identically to a fast-path miss on the same-process path (fall through
/// to the broker). `Other` preserves "anything but FULL" without the core
/// needing to enumerate every possible external status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingResponse {
    Ok,
    Full,
    Other(String),
}

impl ProcessingResponse {
    pub fn is_full(&self) -> bool {
        matches!(self, ProcessingResponse::Full)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProcessingResponse::Ok)
    }
}

#[async_trait]
pub trait ProcessingService: Send + Sync {
    async fn add_task_for_processing(&self, triggering: TaskTriggering) -> ProcessingResponse;
}

/// Per-bucket backpressure channel. The processing service
/// calls [`Self::notify_slot_freed`] whenever it frees a slot; the poll
/// loop calls [`Self::wait_for_change`] to convert that edge-triggered
/// event into a bounded, level-triggered wait with no busy-spin.
#[derive(Default)]
pub struct BackpressureSignal {
    version: AtomicU64,
    notify: Notify,
}

impl BackpressureSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Called by the processing service when a slot frees.
    pub fn notify_slot_freed(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_waiters();
    }

    /// Waits until the version differs from `from_version`, up to
    /// `timeout`. Returns immediately if it already differs.
    pub async fn wait_for_change(&self, from_version: u64, timeout: Duration) {
        if self.version() != from_version {
            return;
        }
        let notified = self.notify.notified();
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }
}

/// Invoked by the processing service when a task finishes.
/// `same_process_trigger` is true only for tasks handed off via the
/// same-process fast path; those never touch the offset tracker, since no
/// broker offset was ever polled for them.
pub trait CompletionListener: Send + Sync {
    fn on_task_completed(
        &self,
        bucket_id: &str,
        topic: &str,
        partition: PartitionId,
        offset: MessageOffset,
        same_process_trigger: bool,
    );
}

/// The concrete [`CompletionListener`] `task-triggering` registers with
/// the processing service: routes every non-fast-path completion to the
/// owning bucket's [`OffsetTracker`].
#[derive(Default)]
pub struct OffsetTrackingCompletionListener {
    trackers: RwLock<HashMap<String, Arc<OffsetTracker>>>,
}

impl OffsetTrackingCompletionListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_bucket(&self, bucket_id: impl Into<String>, tracker: Arc<OffsetTracker>) {
        self.trackers
            .write()
            .expect("completion listener mutex poisoned")
            .insert(bucket_id.into(), tracker);
    }

    pub fn unregister_bucket(&self, bucket_id: &str) {
        self.trackers
            .write()
            .expect("completion listener mutex poisoned")
            .remove(bucket_id);
    }
}

impl CompletionListener for OffsetTrackingCompletionListener {
    fn on_task_completed(
        &self,
        bucket_id: &str,
        topic: &str,
        partition: PartitionId,
        offset: MessageOffset,
        same_process_trigger: bool,
    ) {
        if same_process_trigger {
            return;
        }
        let trackers = self.trackers.read().expect("completion listener mutex poisoned");
        if let Some(tracker) = trackers.get(bucket_id) {
            tracker.release_completed(topic, partition, offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// The fast path must never touch the offset tracker.
    #[test]
    fn same_process_completion_does_not_touch_offset_tracker() {
        let listener = OffsetTrackingCompletionListener::new();
        let tracker = Arc::new(OffsetTracker::new());
        tracker.register_polled("t", 0, 5);
        listener.register_bucket("default", tracker.clone());

        listener.on_task_completed("default", "t", 0, 5, true);

        assert!(tracker.drain_commitable().is_empty());
        assert_eq!(tracker.outstanding_count(), 1);
    }

    #[test]
    fn broker_path_completion_releases_into_offset_tracker() {
        let listener = OffsetTrackingCompletionListener::new();
        let tracker = Arc::new(OffsetTracker::new());
        tracker.register_polled("t", 0, 5);
        listener.register_bucket("default", tracker.clone());

        listener.on_task_completed("default", "t", 0, 5, false);

        assert_eq!(tracker.drain_commitable().get(&("t".to_string(), 0)), Some(&6));
    }

    #[tokio::test]
    async fn wait_for_change_returns_immediately_if_version_already_moved() {
        let signal = BackpressureSignal::new();
        signal.notify_slot_freed();
        let start = Instant::now();
        signal.wait_for_change(0, Duration::from_secs(5)).await;
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn wait_for_change_wakes_up_on_notify() {
        let signal = Arc::new(BackpressureSignal::new());
        let waiter = signal.clone();
        let start = Instant::now();
        let task = tokio::spawn(async move {
            waiter.wait_for_change(0, Duration::from_secs(5)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.notify_slot_freed();
        task.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_for_change_times_out_without_notify() {
        let signal = BackpressureSignal::new();
        let start = Instant::now();
        signal.wait_for_change(0, Duration::from_millis(30)).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
