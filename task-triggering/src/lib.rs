pub mod bucket;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod offset_tracker;
pub mod poll_loop;
pub mod processing;
pub mod trigger_producer;
pub mod triggerer;

pub use bucket::ConsumerBucket;
pub use config::{BucketConfig, TriggeringConfig};
pub use error::{LifecycleError, PollLoopError, TriggerError};
pub use lifecycle::{BucketState, LifecycleController};
pub use message::{TaskRef, TaskStatus, TriggerMessage};
pub use offset_tracker::OffsetTracker;
pub use processing::{
    BackpressureSignal, CompletionListener, OffsetTrackingCompletionListener, ProcessingResponse,
    ProcessingService, TaskTriggering,
};
pub use trigger_producer::{TriggerProducer, TriggerSink};
pub use triggerer::{TaskDao, TaskTypeHandlerRegistry, Triggerer};
