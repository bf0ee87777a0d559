//! Callback notification issued after a job finishes.

use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::job::JobState;

/// Payload posted to the caller's callback endpoint: the archive location
/// on success, the error description on failure.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackPayload {
    pub job_id: Uuid,
    pub state: JobState,
    pub archive_path: Option<String>,
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn completed(job_id: Uuid, archive_path: String) -> Self {
        Self {
            job_id,
            state: JobState::Completed,
            archive_path: Some(archive_path),
            error: None,
        }
    }

    pub fn failed(job_id: Uuid, error: String) -> Self {
        Self {
            job_id,
            state: JobState::Failed,
            archive_path: None,
            error: Some(error),
        }
    }
}

/// Posts completion callbacks. Delivery failures are logged and dropped;
/// a dead callback endpoint must not fail the job that already finished.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    client: Client,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notify(&self, endpoint: &str, payload: &CallbackPayload) {
        match self.client.post(endpoint).json(payload).send().await {
            Ok(response) => {
                tracing::debug!(
                    "Callback for job {} delivered to {endpoint}: {}",
                    payload.job_id,
                    response.status()
                );
            }
            Err(error) => {
                tracing::warn!(
                    "Callback for job {} to {endpoint} failed: {error}",
                    payload.job_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_payload_carries_archive_location() {
        let id = Uuid::new_v4();
        let payload = CallbackPayload::completed(id, "/archives/job.tar.gz".to_string());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["state"], "completed");
        assert_eq!(json["archive_path"], "/archives/job.tar.gz");
        assert!(json["error"].is_null());
    }

    #[test]
    fn failed_payload_carries_error() {
        let payload = CallbackPayload::failed(Uuid::new_v4(), "no viable trial".to_string());
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["error"], "no viable trial");
        assert!(json["archive_path"].is_null());
    }
}
