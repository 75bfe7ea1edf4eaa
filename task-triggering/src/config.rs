//! Configuration surface. Bucket configuration *loading* is an external
//! collaborator; this module only defines the shape the host process
//! hands us.

use std::time::Duration;

/// One entry per configured bucket.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub bucket_id: String,
    pub partition_count: i32,
    pub fetch_batch_size: usize,
    pub trigger_in_same_process: bool,
    pub trigger_same_task_in_all_nodes: bool,
    pub auto_reset_offset_to_duration: Option<Duration>,
    pub auto_start_processing: bool,
}

impl BucketConfig {
    pub fn new(bucket_id: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            partition_count: 1,
            fetch_batch_size: 256,
            trigger_in_same_process: false,
            trigger_same_task_in_all_nodes: false,
            auto_reset_offset_to_duration: None,
            auto_start_processing: true,
        }
    }
}

/// Tunables shared across every bucket: the poll timeout, backpressure
/// wait cap, and worker-restart backoff all share this one knob.
#[derive(Debug, Clone, Copy)]
pub struct TriggeringConfig {
    pub generic_medium_delay: Duration,
}

impl Default for TriggeringConfig {
    fn default() -> Self {
        Self {
            generic_medium_delay: Duration::from_secs(5),
        }
    }
}
