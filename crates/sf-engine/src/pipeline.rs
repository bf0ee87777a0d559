//! The discovery pipeline orchestrator.
//!
//! Three search stages run in fixed order; each stage's winning artifact is
//! frozen and injected into the next stage's evaluator as immutable
//! context. A stage whose trials all fail terminates the pipeline with no
//! bundle.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sf_optimizer::{build_strategy, SearchStrategy as _, StageResult, Trial, TrialStore};
use sf_types::{
    internal_error, CalendarSet, EventLog, ExtraneousDelays, Metric, PipelineConfig, ProcessModel,
    SfError, SfResult, StageKind,
};

use crate::calendar::{always_available, CalendarDiscovery};
use crate::evaluator::{
    CalendarEvaluator, ControlFlowEvaluator, DelayEvaluator, EvaluationSettings, StageEvaluator,
};
use crate::metrics::distance;
use crate::miner::StructureMiner;
use crate::simulator::Simulator;

/// Orchestrator state machine. `Failed` is terminal and reachable from any
/// stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Structure,
    Calendars,
    Delays,
    Done,
    Failed,
}

/// The final artifact set of a successful run, together with the full
/// trial histories of all three stages for audit and reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBundle {
    pub process_name: String,
    pub model: ProcessModel,
    pub calendars: CalendarSet,
    pub delays: ExtraneousDelays,
    pub stage_results: Vec<StageResult>,
    /// Final non-optimizing evaluation against the held-out partition,
    /// keyed by metric name. Absent when no test partition exists.
    pub test_evaluation: Option<HashMap<String, f64>>,
    pub created_at: DateTime<Utc>,
}

/// Per-stage evaluation budget: max evaluations, an optional wall-clock
/// cap, and optional early stopping, whichever is exhausted first.
#[derive(Debug, Clone, Copy)]
struct StageBudget {
    max_evaluations: usize,
    early_stop_rounds: Option<usize>,
    max_runtime_secs: Option<u64>,
}

/// One pipeline run over one training partition. Independent runs share no
/// state.
pub struct Pipeline {
    config: PipelineConfig,
    training: Arc<EventLog>,
    test: Option<Arc<EventLog>>,
    miner: Arc<dyn StructureMiner>,
    calendar_discovery: Arc<dyn CalendarDiscovery>,
    simulator: Arc<dyn Simulator>,
    output_dir: PathBuf,
    state: PipelineState,
    base_seed: u64,
}

impl Pipeline {
    /// Validate the configuration and prepare the workspace. Configuration
    /// errors surface here, before any trial runs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipelineConfig,
        training: EventLog,
        test: Option<EventLog>,
        miner: Arc<dyn StructureMiner>,
        calendar_discovery: Arc<dyn CalendarDiscovery>,
        simulator: Arc<dyn Simulator>,
        output_dir: PathBuf,
    ) -> SfResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(output_dir.join("models"))?;
        let base_seed = config.common.seed.unwrap_or_else(rand::random);
        Ok(Self {
            config,
            training: Arc::new(training),
            test: test.map(Arc::new),
            miner,
            calendar_discovery,
            simulator,
            output_dir,
            state: PipelineState::Structure,
            base_seed,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the three stages to completion and emit the bundle.
    pub fn run(&mut self) -> SfResult<PipelineBundle> {
        let started = Instant::now();
        match self.run_stages() {
            Ok(bundle) => {
                self.state = PipelineState::Done;
                tracing::info!(
                    "Pipeline for '{}' completed in {:.1}s",
                    bundle.process_name,
                    started.elapsed().as_secs_f64()
                );
                Ok(bundle)
            }
            Err(error) => {
                self.state = PipelineState::Failed;
                tracing::error!("Pipeline failed: {error}");
                Err(error)
            }
        }
    }

    fn run_stages(&mut self) -> SfResult<PipelineBundle> {
        let training_csv = self.output_dir.join("training_log.csv");
        sf_log::write_csv(&self.training, &training_csv, &self.config.common.columns)?;
        let simulation_cases = self
            .config
            .common
            .simulation_cases
            .unwrap_or_else(|| self.training.case_count());

        self.state = PipelineState::Structure;
        let control_flow = &self.config.control_flow;
        let evaluator = ControlFlowEvaluator::new(
            control_flow.clone(),
            EvaluationSettings::new(
                &self.config.common,
                control_flow.optimization_metric,
                simulation_cases,
            ),
            self.training.clone(),
            training_csv,
            self.output_dir.join("models"),
            self.miner.clone(),
            self.simulator.clone(),
            always_available(&self.training),
        );
        let structure_result = self.run_stage(
            &evaluator,
            StageBudget {
                max_evaluations: control_flow.max_evaluations,
                early_stop_rounds: control_flow.early_stop_rounds,
                max_runtime_secs: control_flow.max_runtime_secs,
            },
        )?;
        // Freeze the winner; later stages receive it as read-only context.
        let model = structure_result
            .best
            .artifacts
            .model
            .clone()
            .ok_or_else(|| internal_error!("control-flow winner carries no model artifact"))?;

        self.state = PipelineState::Calendars;
        let calendars_config = &self.config.calendars;
        let evaluator = CalendarEvaluator::new(
            calendars_config.clone(),
            EvaluationSettings::new(
                &self.config.common,
                calendars_config.optimization_metric,
                simulation_cases,
            ),
            self.training.clone(),
            model.clone(),
            self.calendar_discovery.clone(),
            self.simulator.clone(),
        );
        let calendar_result = self.run_stage(
            &evaluator,
            StageBudget {
                max_evaluations: calendars_config.max_evaluations,
                early_stop_rounds: calendars_config.early_stop_rounds,
                max_runtime_secs: calendars_config.max_runtime_secs,
            },
        )?;
        let calendars = calendar_result
            .best
            .artifacts
            .calendars
            .clone()
            .ok_or_else(|| internal_error!("calendar winner carries no calendar artifact"))?;

        self.state = PipelineState::Delays;
        let delay_config = &self.config.extraneous_delays;
        let evaluator = DelayEvaluator::new(
            delay_config.clone(),
            EvaluationSettings::new(
                &self.config.common,
                delay_config.optimization_metric,
                simulation_cases,
            ),
            self.training.clone(),
            model.clone(),
            calendars.clone(),
            self.simulator.clone(),
        );
        let delay_result = self.run_stage(
            &evaluator,
            StageBudget {
                max_evaluations: delay_config.max_evaluations,
                early_stop_rounds: delay_config.early_stop_rounds,
                max_runtime_secs: delay_config.max_runtime_secs,
            },
        )?;
        let delays = delay_result
            .best
            .artifacts
            .delays
            .clone()
            .ok_or_else(|| internal_error!("delay winner carries no delay artifact"))?;

        let test_evaluation = self.evaluate_holdout(&model, &calendars, &delays);

        let bundle = PipelineBundle {
            process_name: self.training.process_name.clone(),
            model,
            calendars,
            delays,
            stage_results: vec![structure_result, calendar_result, delay_result],
            test_evaluation,
            created_at: Utc::now(),
        };
        self.persist(&bundle)?;

        for result in &bundle.stage_results {
            tracing::info!(
                "Stage {}: best loss {:.6} with parameters {:?} ({} of {} trials failed)",
                result.stage,
                result.best.loss,
                result.best.parameters,
                result.failed_count(),
                result.trials.len()
            );
        }
        Ok(bundle)
    }

    fn stage_seed(&self, stage: StageKind) -> u64 {
        let index = match stage {
            StageKind::ControlFlow => 0u64,
            StageKind::Calendars => 1,
            StageKind::ExtraneousDelays => 2,
        };
        self.base_seed.wrapping_add(index.wrapping_mul(0x9E37_79B9))
    }

    /// One stage's search loop: propose, evaluate, record, until the
    /// budget is exhausted or early stopping fires. Evaluation failures
    /// are contained inside the evaluator; only an all-failed history
    /// escalates, as `NoViableTrial`.
    fn run_stage(
        &self,
        evaluator: &dyn StageEvaluator,
        budget: StageBudget,
    ) -> SfResult<StageResult> {
        let stage = evaluator.stage();
        let space = evaluator.search_space();
        space.validate()?;

        let seed = self.stage_seed(stage);
        let mut strategy = build_strategy(
            self.config.common.search_algorithm,
            space.clone(),
            seed,
            self.config.common.warmup_trials,
        );
        let mut store = TrialStore::new(stage);
        tracing::info!(
            "Stage {stage}: {} strategy over {} searched dimensions, budget {}",
            strategy.name(),
            space.searched_dimensions(),
            budget.max_evaluations
        );

        let started = Instant::now();
        let mut best_loss = f64::INFINITY;
        let mut rounds_without_improvement = 0usize;
        for iteration in 0..budget.max_evaluations {
            if let Some(cap) = budget.max_runtime_secs {
                if started.elapsed() >= Duration::from_secs(cap) {
                    tracing::info!(
                        "Stage {stage}: wall-clock budget exhausted after {iteration} trials"
                    );
                    break;
                }
            }

            let assignment = strategy.propose();
            debug_assert!(
                space.contains(&assignment),
                "proposal outside the declared domain: {assignment:?}"
            );
            let trial_seed = seed.wrapping_add(1 + iteration as u64 * 1009);
            let evaluation = evaluator.evaluate(&assignment, trial_seed);
            strategy.report(&assignment, evaluation.loss);
            let trial = store.record(Trial::new(
                stage,
                assignment,
                evaluation.loss,
                evaluation.outcome,
                evaluation.metrics,
                evaluation.artifacts,
                evaluation.error,
            ));
            tracing::info!(
                "Stage {stage} trial {}: loss {:.6} ({:?})",
                trial.sequence_no,
                trial.loss,
                trial.outcome
            );

            if trial.loss < best_loss {
                best_loss = trial.loss;
                rounds_without_improvement = 0;
            } else {
                rounds_without_improvement += 1;
                if let Some(limit) = budget.early_stop_rounds {
                    if rounds_without_improvement >= limit {
                        tracing::info!(
                            "Stage {stage}: no improvement in {limit} consecutive trials, stopping early"
                        );
                        break;
                    }
                }
            }
        }

        store.into_stage_result().map_err(SfError::from)
    }

    /// Final non-optimizing evaluation of the calibrated model against the
    /// held-out partition. Failure here degrades to a missing report, not a
    /// failed pipeline.
    fn evaluate_holdout(
        &self,
        model: &ProcessModel,
        calendars: &CalendarSet,
        delays: &ExtraneousDelays,
    ) -> Option<HashMap<String, f64>> {
        let test = self.test.as_ref()?;
        let mut metrics: Vec<Metric> = self.config.common.evaluation_metrics.clone();
        if metrics.is_empty() {
            metrics = vec![
                self.config.control_flow.optimization_metric,
                self.config.calendars.optimization_metric,
                self.config.extraneous_delays.optimization_metric,
            ];
        }
        metrics.dedup();

        let synthetic = match self.simulator.simulate(
            model,
            calendars,
            Some(delays),
            test.case_count(),
            self.base_seed.wrapping_add(0xFEED),
        ) {
            Ok(synthetic) => synthetic,
            Err(error) => {
                tracing::warn!("Held-out evaluation failed: {error}");
                return None;
            }
        };

        Some(
            metrics
                .into_iter()
                .map(|metric| {
                    (
                        metric.as_str().to_string(),
                        distance(metric, test, &synthetic),
                    )
                })
                .collect(),
        )
    }

    /// Persist the trial histories and the bundle into the output
    /// directory; the job wrapper archives that directory afterwards.
    fn persist(&self, bundle: &PipelineBundle) -> SfResult<()> {
        for result in &bundle.stage_results {
            let path = self.output_dir.join(format!("{}_trials.json", result.stage));
            serde_json::to_writer_pretty(File::create(path)?, result)?;
        }
        let bundle_path = self.output_dir.join("bundle.json");
        serde_json::to_writer_pretty(File::create(&bundle_path)?, bundle)?;
        tracing::debug!("Wrote bundle to {}", bundle_path.display());
        Ok(())
    }
}
