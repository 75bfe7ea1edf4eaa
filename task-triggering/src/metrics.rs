//! Metric names and recording helpers.

use crate::bucket::ConsumerBucket;

pub const POLLING_BUCKETS: &str = "task_triggering_polling_buckets";
pub const OFFSETS_COMMITTED: &str = "task_triggering_offsets_committed_total";
pub const OFFSETS_OUTSTANDING: &str = "task_triggering_offsets_outstanding";
pub const OFFSETS_TO_BE_COMMITTED: &str = "task_triggering_offsets_to_be_committed";
pub const OFFSETS_COMPLETED: &str = "task_triggering_offsets_completed";
pub const UNPROCESSED_FETCHED_RECORDS: &str = "task_triggering_unprocessed_fetched_records";
pub const TRIGGERS_RECEIVED: &str = "task_triggering_triggers_received_total";
pub const COMMITS_FAILED: &str = "task_triggering_commits_failed_total";
pub const ALREADY_COMMITTED_OCCURRENCES: &str = "task_triggering_already_committed_occurrences_total";
pub const TASKS_MARKED_ERROR: &str = "task_triggering_tasks_marked_error_total";
pub const STATUS_CHANGE_FAILED: &str = "task_triggering_status_change_failed_total";

/// Publishes the per-bucket gauges; called once per poll-loop iteration or
/// on the commit-cadence timer, whichever a call site finds convenient.
pub fn record_bucket_gauges(bucket: &ConsumerBucket) {
    let labels = [("bucket", bucket.bucket_id.clone())];
    metrics::gauge!(OFFSETS_OUTSTANDING, &labels).set(bucket.offsets.outstanding_count() as f64);
    metrics::gauge!(OFFSETS_TO_BE_COMMITTED, &labels).set(bucket.offsets.staged_commit_count() as f64);
    metrics::gauge!(OFFSETS_COMPLETED, &labels).set(bucket.offsets.completed_not_yet_staged_count() as f64);
    metrics::gauge!(UNPROCESSED_FETCHED_RECORDS, &labels).set(bucket.unprocessed_fetched_records() as f64);
}

pub fn record_commit(bucket_id: &str, committed: usize) {
    let labels = [("bucket", bucket_id.to_string())];
    metrics::counter!(OFFSETS_COMMITTED, &labels).increment(committed as u64);
}

pub fn record_commit_failed(bucket_id: &str) {
    let labels = [("bucket", bucket_id.to_string())];
    metrics::counter!(COMMITS_FAILED, &labels).increment(1);
}

pub fn record_trigger_received(task_type: &str) {
    let labels = [("task_type", task_type.to_string())];
    metrics::counter!(TRIGGERS_RECEIVED, &labels).increment(1);
}

pub fn record_task_marked_error(task_type: &str) {
    let labels = [("task_type", task_type.to_string())];
    metrics::counter!(TASKS_MARKED_ERROR, &labels).increment(1);
}

pub fn record_status_change_failed(task_type: &str) {
    let labels = [("task_type", task_type.to_string())];
    metrics::counter!(STATUS_CHANGE_FAILED, &labels).increment(1);
}

pub fn record_already_committed_occurrences(bucket_id: &str, occurrences: u64) {
    let labels = [("bucket", bucket_id.to_string())];
    metrics::counter!(ALREADY_COMMITTED_OCCURRENCES, &labels).increment(occurrences);
}

pub fn record_polling_buckets(count: usize) {
    metrics::gauge!(POLLING_BUCKETS).set(count as f64);
}
