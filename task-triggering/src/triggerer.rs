//! Public entry point: `Trigger(task)`.
//!
//! Callers must not invoke [`Triggerer::trigger`] from inside an active
//! database transaction — the core has no way to enforce that itself, since
//! the transaction lives entirely in the external task store.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use common_kafka::config::KafkaConfig;
use tracing::warn;

use crate::config::BucketConfig;
use crate::error::TriggerError;
use crate::message::{TaskRef, TaskStatus};
use crate::processing::{ProcessingService, TaskTriggering};
use crate::trigger_producer::TriggerSink;

/// Sentinel partition/offset used for fast-path (`trigger_in_same_process`)
/// triggers, which were never polled from any topic.
pub const SAME_PROCESS_PARTITION: i32 = -1;
pub const SAME_PROCESS_OFFSET: i64 = -1;

/// Resolves a task's `type` to the bucket whose handler owns it. Owned by
/// the host application; this core only consumes the resolution.
pub trait TaskTypeHandlerRegistry: Send + Sync {
    fn bucket_for_task_type(&self, task_type: &str) -> Option<String>;
}

/// The task store's status-change surface, used only for the "no handler"
/// and "unconfigured bucket" failure paths.
#[async_trait]
pub trait TaskDao: Send + Sync {
    async fn set_status(
        &self,
        task_id: i64,
        status: TaskStatus,
    ) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

pub struct Triggerer {
    handlers: Arc<dyn TaskTypeHandlerRegistry>,
    task_dao: Arc<dyn TaskDao>,
    processing: Arc<dyn ProcessingService>,
    sink: Arc<dyn TriggerSink>,
    buckets: HashMap<String, BucketConfig>,
    kafka_config: KafkaConfig,
}

impl Triggerer {
    pub fn new(
        handlers: Arc<dyn TaskTypeHandlerRegistry>,
        task_dao: Arc<dyn TaskDao>,
        processing: Arc<dyn ProcessingService>,
        sink: Arc<dyn TriggerSink>,
        buckets: HashMap<String, BucketConfig>,
        kafka_config: KafkaConfig,
    ) -> Self {
        Self {
            handlers,
            task_dao,
            processing,
            sink,
            buckets,
            kafka_config,
        }
    }

    /// 1. resolve the bucket from the task's type, marking the task errored
    ///    and failing if either step is unresolvable;
    /// 2. if the bucket triggers in-process, try the fast path first;
    /// 3. otherwise (or if the fast path didn't accept it), produce to the
    ///    bucket's broker topic.
    pub async fn trigger(&self, task: TaskRef) -> Result<(), TriggerError> {
        crate::metrics::record_trigger_received(&task.task_type);

        let Some(bucket_id) = self.handlers.bucket_for_task_type(&task.task_type) else {
            self.mark_errored(&task).await?;
            return Err(TriggerError::HandlerMissing(task.task_type));
        };

        let Some(bucket_cfg) = self.buckets.get(&bucket_id) else {
            self.mark_errored(&task).await?;
            return Err(TriggerError::BucketUnconfigured {
                task_type: task.task_type,
                bucket_id,
            });
        };

        if bucket_cfg.trigger_in_same_process {
            let triggering = TaskTriggering {
                task: task.clone(),
                bucket_id: bucket_id.clone(),
                topic: String::new(),
                partition: SAME_PROCESS_PARTITION,
                offset: SAME_PROCESS_OFFSET,
            };
            if self.processing.add_task_for_processing(triggering).await.is_ok() {
                return Ok(());
            }
        }

        let topic = self.kafka_config.trigger_topic(Some(&bucket_id));
        self.sink.send(&topic, &task).await?;
        Ok(())
    }

    async fn mark_errored(&self, task: &TaskRef) -> Result<(), TriggerError> {
        if let Err(err) = self.task_dao.set_status(task.id, TaskStatus::Error).await {
            warn!(task_id = task.id, "failed to mark task errored: {err}");
            crate::metrics::record_status_change_failed(&task.task_type);
            return Err(TriggerError::StatusChangeFailed(err.to_string()));
        }
        crate::metrics::record_task_marked_error(&task.task_type);
        Ok(())
    }
}
