//! Discovery-job records and the shared in-memory registry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sf_types::PipelineConfig;
use uuid::Uuid;

/// A discovery request: a pipeline configuration plus an optional callback
/// endpoint notified when the job finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub configuration: PipelineConfig,
    #[serde(default)]
    pub callback_endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One discovery job's externally visible record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub archive_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::Pending,
            archive_path: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Concurrent job registry shared between the service and the executors.
/// Jobs share no other state.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Job {
        let job = Job::new();
        self.jobs.insert(job.id, job.clone());
        job
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn mark_running(&self, id: Uuid) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.state = JobState::Running;
        }
    }

    pub fn mark_completed(&self, id: Uuid, archive_path: PathBuf) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.state = JobState::Completed;
            entry.archive_path = Some(archive_path);
            entry.finished_at = Some(Utc::now());
        }
    }

    pub fn mark_failed(&self, id: Uuid, error: String) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.state = JobState::Failed;
            entry.error = Some(error);
            entry.finished_at = Some(Utc::now());
        }
    }
}
