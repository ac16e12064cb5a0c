//! contentforge: Job orchestration core for long-running content
//! generation.
//!
//! This library coordinates generation work for a content pipeline: a
//! priority [`queue`](crate::queue) over a durable [`store`](crate::store),
//! a [`pipeline`](crate::pipeline) controller that advances subject
//! records through their stage lifecycle, a [`quality`](crate::quality)
//! gate that scores drafts and steers regeneration, and a token-bucket
//! [`limiter`](crate::limiter) protecting the upstream generation
//! service. It owns no transport; embedders wire in their own catalog,
//! generator, and notification fan-out through the traits at each seam.

pub mod artifact;
pub mod bus;
pub mod executor;
pub mod generator;
pub mod limiter;
pub mod pipeline;
pub mod quality;
pub mod queue;
pub mod store;

// Re-export the types an embedder touches first
pub use artifact::{Artifact, Section};
pub use bus::{BroadcastBus, Event, NotificationBus, NullBus};
pub use executor::{ArtifactSink, ExecutionError, GenerationExecutor, JobExecutor};
pub use generator::{GenerationError, GenerationParams, Generator};
pub use limiter::{AcquireError, RateLimiter, RateLimiterConfig};
pub use pipeline::{
    ControllerConfig, PipelineController, PipelineError, PipelineHistory, RecordStatus, StageHook,
    SubjectAccessor, SubjectSnapshot,
};
pub use quality::{QualityGate, QualityGateConfig, RegenerationHints, ValidationResult};
pub use queue::{Job, JobOutcome, JobQueue, JobStatus, QueueConfig, QueueError};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore, StoreError};
