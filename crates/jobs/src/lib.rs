//! Batch job orchestration.
//!
//! [`JobController`] owns every batch job for its lifetime: it validates
//! submissions, fixes each job's execution target (catalog server or local
//! work loop), polls progress through one uniform contract regardless of
//! where the job runs, and exposes pause/resume/cancel as requests checked
//! against the target's declared capabilities.

pub mod controller;
pub mod poll;
pub mod target;

pub use controller::{JobController, JobError};
pub use poll::PollConfig;
pub use target::{
    BatchBackend, ExecutionTarget, LocalTarget, LocalWorkItem, PollReport, RemoteTarget,
    TargetError,
};
