//! Trial tracking: the append-only evaluation history of one stage.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_types::{ArtifactSet, PipelineError, StageKind};
use uuid::Uuid;

use crate::search::Assignment;

/// How a trial's simulation repetitions went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialOutcome {
    /// All repetitions produced a distance.
    Success,
    /// A strict subset of repetitions failed; the loss is the mean of the
    /// survivors.
    Degraded { failed_runs: usize },
    /// Artifact materialization failed, or too few repetitions survived.
    Failed,
}

/// One evaluated parameter assignment. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub stage: StageKind,
    /// Arrival order within the stage; assigned by the store on record.
    /// Used for tie-breaks and reproducibility, not for correctness.
    pub sequence_no: usize,
    pub parameters: Assignment,
    /// Mean distance across surviving repetitions; `+inf` for failed trials,
    /// which makes them comparable but never winning.
    pub loss: f64,
    pub outcome: TrialOutcome,
    /// Per-run values of every computed metric, keyed by metric name.
    pub metrics: HashMap<String, Vec<f64>>,
    pub artifacts: ArtifactSet,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Trial {
    pub fn new(
        stage: StageKind,
        parameters: Assignment,
        loss: f64,
        outcome: TrialOutcome,
        metrics: HashMap<String, Vec<f64>>,
        artifacts: ArtifactSet,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            stage,
            sequence_no: 0,
            parameters,
            loss,
            outcome,
            metrics,
            artifacts,
            error,
            recorded_at: Utc::now(),
        }
    }

    /// A failed evaluation: infinite loss, no artifacts.
    pub fn failed(stage: StageKind, parameters: Assignment, error: String) -> Self {
        Self::new(
            stage,
            parameters,
            f64::INFINITY,
            TrialOutcome::Failed,
            HashMap::new(),
            ArtifactSet::default(),
            Some(error),
        )
    }

    pub fn is_viable(&self) -> bool {
        self.loss.is_finite()
    }
}

/// Append-only history of the evaluations within one stage.
///
/// `record` is the only mutator; recorded trials are never revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialStore {
    stage: StageKind,
    trials: Vec<Trial>,
}

impl TrialStore {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            trials: Vec::new(),
        }
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn failed_count(&self) -> usize {
        self.trials.iter().filter(|t| !t.is_viable()).count()
    }

    pub fn viable_count(&self) -> usize {
        self.trials.iter().filter(|t| t.is_viable()).count()
    }

    /// Append a trial, stamping its arrival order.
    pub fn record(&mut self, mut trial: Trial) -> &Trial {
        trial.stage = self.stage;
        trial.sequence_no = self.trials.len();
        self.trials.push(trial);
        // Just pushed, so the store cannot be empty here.
        self.trials.last().expect("store is non-empty after push")
    }

    /// The trial with the minimum finite loss, ties broken by lowest
    /// sequence number (earliest recorded wins).
    pub fn best(&self) -> Result<&Trial, PipelineError> {
        self.trials
            .iter()
            .filter(|t| t.is_viable())
            .min_by(|a, b| {
                a.loss
                    .partial_cmp(&b.loss)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.sequence_no.cmp(&b.sequence_no))
            })
            .ok_or(PipelineError::NoViableTrial {
                stage: self.stage,
                failed: self.failed_count(),
                total: self.len(),
            })
    }

    /// Best loss after each recorded trial; monotone non-increasing.
    pub fn best_losses(&self) -> Vec<f64> {
        let mut best = f64::INFINITY;
        self.trials
            .iter()
            .map(|t| {
                if t.loss < best {
                    best = t.loss;
                }
                best
            })
            .collect()
    }

    /// Freeze the store into the stage's result.
    pub fn into_stage_result(self) -> Result<StageResult, PipelineError> {
        let best = self.best()?.clone();
        Ok(StageResult {
            stage: self.stage,
            best,
            trials: self.trials,
        })
    }
}

/// The frozen outcome of one stage: the winning trial plus the full
/// ordered history, retained for audit and reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub best: Trial,
    pub trials: Vec<Trial>,
}

impl StageResult {
    pub fn failed_count(&self) -> usize {
        self.trials.iter().filter(|t| !t.is_viable()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;

    fn trial_with_loss(loss: f64) -> Trial {
        let mut parameters = Assignment::new();
        parameters.insert("epsilon".to_string(), ParameterValue::Float(0.5));
        Trial::new(
            StageKind::ControlFlow,
            parameters,
            loss,
            if loss.is_finite() {
                TrialOutcome::Success
            } else {
                TrialOutcome::Failed
            },
            HashMap::new(),
            ArtifactSet::default(),
            None,
        )
    }

    #[test]
    fn record_stamps_arrival_order() {
        let mut store = TrialStore::new(StageKind::ControlFlow);
        for loss in [0.5, 0.3, 0.4] {
            store.record(trial_with_loss(loss));
        }
        let orders: Vec<_> = store.trials().iter().map(|t| t.sequence_no).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn best_is_minimum_finite_loss() {
        let mut store = TrialStore::new(StageKind::ControlFlow);
        store.record(trial_with_loss(0.5));
        store.record(trial_with_loss(f64::INFINITY));
        store.record(trial_with_loss(0.2));
        store.record(trial_with_loss(0.9));
        assert_eq!(store.best().unwrap().loss, 0.2);
    }

    #[test]
    fn ties_break_by_lowest_sequence_no() {
        let mut store = TrialStore::new(StageKind::Calendars);
        store.record(trial_with_loss(0.4));
        store.record(trial_with_loss(0.4));
        store.record(trial_with_loss(0.4));
        let best = store.best().unwrap();
        assert_eq!(best.sequence_no, 0);
        // Re-running best() on the same history returns the same trial.
        assert_eq!(store.best().unwrap().id, best.id);
    }

    #[test]
    fn empty_store_has_no_viable_trial() {
        let store = TrialStore::new(StageKind::ExtraneousDelays);
        match store.best() {
            Err(PipelineError::NoViableTrial { stage, failed, total }) => {
                assert_eq!(stage, StageKind::ExtraneousDelays);
                assert_eq!(failed, 0);
                assert_eq!(total, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn all_failed_store_reports_tally() {
        let mut store = TrialStore::new(StageKind::Calendars);
        for _ in 0..3 {
            store.record(Trial::failed(
                StageKind::Calendars,
                Assignment::new(),
                "simulation failed".to_string(),
            ));
        }
        match store.best() {
            Err(PipelineError::NoViableTrial { failed, total, .. }) => {
                assert_eq!(failed, 3);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn best_losses_monotone_non_increasing() {
        let mut store = TrialStore::new(StageKind::ControlFlow);
        for loss in [0.9, 0.4, f64::INFINITY, 0.6, 0.2, 0.3] {
            store.record(trial_with_loss(loss));
        }
        let series = store.best_losses();
        assert_eq!(series, vec![0.9, 0.4, 0.4, 0.4, 0.2, 0.2]);
        for window in series.windows(2) {
            assert!(window[1] <= window[0]);
        }
    }

    #[test]
    fn stage_result_keeps_full_history() {
        let mut store = TrialStore::new(StageKind::ControlFlow);
        store.record(trial_with_loss(0.5));
        store.record(trial_with_loss(0.1));
        let result = store.into_stage_result().unwrap();
        assert_eq!(result.trials.len(), 2);
        assert_eq!(result.best.loss, 0.1);
        assert_eq!(result.failed_count(), 0);
    }

    #[test]
    fn failed_trial_has_infinite_loss_and_error() {
        let trial = Trial::failed(
            StageKind::ControlFlow,
            Assignment::new(),
            "miner produced no model".to_string(),
        );
        assert!(trial.loss.is_infinite());
        assert!(!trial.is_viable());
        assert_eq!(trial.outcome, TrialOutcome::Failed);
        assert!(trial.error.as_deref().unwrap().contains("no model"));
    }
}
