//! Pipeline controller.
//!
//! The controller sits between a catalog of subject records and the job
//! queue. It advances each record through its stage lifecycle:
//!
//! 1. **Admission**: selected records are handed to the queue, either
//!    by an explicit trigger or by the background sweep.
//! 2. **Generation**: the queue executes the job; the record sits in
//!    the generating stage.
//! 3. **Outcome**: a terminal job outcome moves the record forward to
//!    generated, back to selected for another try, or into failed once
//!    the subject's failure budget is spent.
//!
//! The queue owns job state; the controller owns stage transitions and
//! never touches job rows directly.

pub mod config;
pub mod controller;
pub mod metrics;
pub mod record;

pub use config::{ControllerConfig, ControllerConfigError};
pub use controller::{
    NoopHook, PipelineController, PipelineError, PipelineHistory, PipelineStatus, StageHook,
};
pub use metrics::PipelineMetrics;
pub use record::{CatalogError, RecordStatus, SubjectAccessor, SubjectSnapshot};
