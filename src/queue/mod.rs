//! Job queue layer
//!
//! Each job wraps one workflow run. Jobs are stored by a [`QueueBackend`]
//! (in memory, or SQLite through [`crate::storage`]), produced through a
//! [`JobQueue`] and consumed by a [`WorkerPool`].

pub mod backend;
pub mod clock;
pub mod job;
pub mod memory;
pub mod options;
pub mod producer;
pub mod retention;
pub mod schedule;
pub mod worker;

pub use backend::{QueueBackend, QueueError};
pub use clock::QueueClock;
pub use job::{JobHandle, JobPayload, JobRecord, JobState, JobSummary, NewJob, QueueCounts};
pub use memory::MemoryQueue;
pub use options::{Backoff, JobOptions, Repeat, Retention};
pub use producer::{JobQueue, MANUAL_JOB_NAME};
pub use schedule::{next_occurrence, normalize_pattern};
pub use worker::{JobOutcome, JobProcessor, WorkerPool, WorkerStats};
