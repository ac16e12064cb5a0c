//! Priority job queue.
//!
//! Jobs are durable rows in a [`JobStore`](crate::store::JobStore);
//! the queue layers admission, concurrency control, execution, and
//! retry on top. Ordering is priority descending with FIFO within a
//! priority band, enforced by the store's claim operation rather than
//! by any in-memory structure, so a restart resumes exactly where the
//! store says things stand.

mod events;
mod job;
#[allow(clippy::module_inception)]
mod queue;

pub use events::{outcome_channel, JobOutcome, OutcomeReceiver, OutcomeSender};
pub use job::{Job, JobStatus, CANCELLED_MESSAGE, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
pub use queue::{JobQueue, QueueConfig, QueueError, QueueStats};
