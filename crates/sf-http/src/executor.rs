//! Job executor: wraps one full pipeline run as an isolated unit of work
//! with a temporary workspace, archival of results, and asynchronous
//! completion notification.

use std::path::PathBuf;
use std::sync::Arc;

use sf_engine::{
    CalendarDiscovery, ExternalSimulator, Pipeline, Simulator, SplitMinerCli, StructureMiner,
    WeeklyCalendarDiscovery,
};
use sf_types::{internal_error, PipelineConfig, SfResult};
use uuid::Uuid;

use crate::archiver::archive_dir;
use crate::job::{JobRegistry, JobRequest};
use crate::notifier::{CallbackPayload, Notifier};

/// Where the executor finds its external tools and stores archives.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub miner_jar: PathBuf,
    pub simulator_command: PathBuf,
    pub archive_dir: PathBuf,
}

/// The collaborator set a job runs against; swappable for tests.
#[derive(Clone)]
pub struct Collaborators {
    pub miner: Arc<dyn StructureMiner>,
    pub calendar_discovery: Arc<dyn CalendarDiscovery>,
    pub simulator: Arc<dyn Simulator>,
}

impl Collaborators {
    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            miner: Arc::new(SplitMinerCli::new(settings.miner_jar.clone())),
            calendar_discovery: Arc::new(WeeklyCalendarDiscovery),
            simulator: Arc::new(ExternalSimulator::new(settings.simulator_command.clone())),
        }
    }
}

/// Runs discovery jobs. Each job owns its own temporary workspace, removed
/// on every exit path once the archive is written (or the job failed).
pub struct JobExecutor {
    settings: ExecutorSettings,
    collaborators: Collaborators,
    registry: Arc<JobRegistry>,
    notifier: Notifier,
}

impl JobExecutor {
    pub fn new(settings: ExecutorSettings, registry: Arc<JobRegistry>) -> Self {
        let collaborators = Collaborators::from_settings(&settings);
        Self {
            settings,
            collaborators,
            registry,
            notifier: Notifier::new(),
        }
    }

    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Run one job to completion, update the registry, and issue the
    /// optional callback. Never returns an error: job failures are
    /// recorded and notified, not propagated.
    pub async fn execute(&self, job_id: Uuid, request: JobRequest) {
        tracing::info!("Starting discovery job {job_id}");
        self.registry.mark_running(job_id);

        match self.run_pipeline(job_id, request.configuration).await {
            Ok(archive_path) => {
                tracing::info!("Job {job_id} completed: {}", archive_path.display());
                self.registry
                    .mark_completed(job_id, archive_path.clone());
                if let Some(endpoint) = &request.callback_endpoint {
                    let payload = CallbackPayload::completed(
                        job_id,
                        archive_path.display().to_string(),
                    );
                    self.notifier.notify(endpoint, &payload).await;
                }
            }
            Err(error) => {
                tracing::error!("Job {job_id} failed: {error}");
                self.registry.mark_failed(job_id, error.to_string());
                if let Some(endpoint) = &request.callback_endpoint {
                    let payload = CallbackPayload::failed(job_id, error.to_string());
                    self.notifier.notify(endpoint, &payload).await;
                }
            }
        }
    }

    /// The blocking part of a job: read and split the log, run the
    /// pipeline in a uniquely named temporary workspace, archive the
    /// results. The workspace is removed when this function returns,
    /// on success and on failure alike.
    async fn run_pipeline(&self, job_id: Uuid, config: PipelineConfig) -> SfResult<PathBuf> {
        let settings = self.settings.clone();
        let collaborators = self.collaborators.clone();

        tokio::task::spawn_blocking(move || -> SfResult<PathBuf> {
            let workspace = tempfile::Builder::new()
                .prefix(&format!("sf-job-{job_id}-"))
                .tempdir()?;
            let output_dir = workspace.path().join("results");
            std::fs::create_dir_all(&output_dir)?;

            let log = sf_log::read_csv(&config.common.log_path, &config.common.columns)?;
            let (training, test) = match &config.common.test_log_path {
                Some(test_path) => {
                    let test = sf_log::read_csv(test_path, &config.common.columns)?;
                    (log, Some(test))
                }
                None => sf_log::split_training_test(&log, config.common.training_fraction)?,
            };

            let mut pipeline = Pipeline::new(
                config,
                training,
                test,
                collaborators.miner,
                collaborators.calendar_discovery,
                collaborators.simulator,
                output_dir.clone(),
            )?;
            pipeline.run()?;

            std::fs::create_dir_all(&settings.archive_dir)?;
            let archive_path = settings.archive_dir.join(format!("{job_id}.tar.gz"));
            archive_dir(&output_dir, &archive_path)?;
            Ok(archive_path)
        })
        .await
        .map_err(|e| internal_error!("job task panicked: {e}"))?
    }
}
