//! # sf-http
//!
//! The asynchronous job wrapper around the discovery pipeline: a job
//! registry, an executor with per-job temporary workspaces, tar.gz result
//! archiving, callback notification, and a small HTTP service binary.

pub mod archiver;
pub mod executor;
pub mod job;
pub mod notifier;

pub use archiver::archive_dir;
pub use executor::{Collaborators, ExecutorSettings, JobExecutor};
pub use job::{Job, JobRegistry, JobRequest, JobState};
pub use notifier::{CallbackPayload, Notifier};
