//! Stage evaluators: map one parameter assignment to stage artifacts and a
//! scalar loss by simulating the candidate and scoring the synthetic log
//! against the training log.
//!
//! Failures inside a single evaluation are always contained here: a trial
//! that cannot materialize its artifacts or whose repetitions all fail is
//! returned as a failed outcome with infinite loss, never as an error.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rayon::prelude::*;
use sf_optimizer::{Assignment, ParameterValue, SearchSpace, TrialOutcome};
use sf_types::{
    ArtifactSet, CalendarConfig, CalendarDiscoveryType, CalendarSet, CommonConfig,
    ControlFlowConfig, DelayConfig, DelayDistribution, EventLog, ExtraneousDelays,
    GatewayProbabilitiesMethod, Metric, MiningAlgorithm, NumericDomain, ProcessModel, StageKind,
};

use crate::calendar::{CalendarDiscovery, CalendarParams};
use crate::metrics::distance;
use crate::miner::{MiningParams, StructureMiner};
use crate::simulator::Simulator;

/// Evaluation knobs shared by all three stages.
#[derive(Debug, Clone)]
pub struct EvaluationSettings {
    pub repetitions: usize,
    pub min_successful_repetitions: usize,
    /// The single metric the search optimizes.
    pub objective: Metric,
    /// Metrics computed for reporting only.
    pub reporting_metrics: Vec<Metric>,
    pub simulation_cases: usize,
}

impl EvaluationSettings {
    pub fn new(common: &CommonConfig, objective: Metric, simulation_cases: usize) -> Self {
        Self {
            repetitions: common.repetitions,
            min_successful_repetitions: common.min_successful_repetitions,
            objective,
            reporting_metrics: common
                .evaluation_metrics
                .iter()
                .copied()
                .filter(|m| *m != objective)
                .collect(),
            simulation_cases,
        }
    }
}

/// What one evaluation produced.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub loss: f64,
    pub outcome: TrialOutcome,
    /// Per-run values of every computed metric, keyed by metric name.
    pub metrics: HashMap<String, Vec<f64>>,
    pub artifacts: ArtifactSet,
    pub error: Option<String>,
}

impl EvaluationOutcome {
    fn failed(error: String) -> Self {
        tracing::warn!("Trial failed: {error}");
        Self {
            loss: f64::INFINITY,
            outcome: TrialOutcome::Failed,
            metrics: HashMap::new(),
            artifacts: ArtifactSet::default(),
            error: Some(error),
        }
    }
}

/// One stage's evaluator. The search space is built by the evaluator
/// itself so that every parameter it reads is guaranteed to be declared.
pub trait StageEvaluator: Send + Sync {
    fn stage(&self) -> StageKind;
    fn search_space(&self) -> SearchSpace;
    fn evaluate(&self, assignment: &Assignment, trial_seed: u64) -> EvaluationOutcome;
}

// ---------------------------------------------------------------------------
// Repetition aggregation
// ---------------------------------------------------------------------------

type RunResult = Result<HashMap<Metric, f64>, String>;

/// Aggregate the per-repetition metric values of one trial.
///
/// The loss is the arithmetic mean of the objective across surviving runs.
/// Fewer survivors than `min_successful` is a full failure; a strict
/// subset of failures degrades the trial to the survivors' mean.
fn aggregate_runs(
    runs: Vec<RunResult>,
    objective: Metric,
    min_successful: usize,
) -> (f64, TrialOutcome, HashMap<String, Vec<f64>>, Option<String>) {
    let total = runs.len();
    let mut survivors: Vec<HashMap<Metric, f64>> = Vec::new();
    let mut first_error: Option<String> = None;
    for run in runs {
        match run {
            Ok(values) => survivors.push(values),
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
    }

    let failed_runs = total - survivors.len();
    if survivors.len() < min_successful.max(1) {
        return (
            f64::INFINITY,
            TrialOutcome::Failed,
            HashMap::new(),
            Some(first_error.unwrap_or_else(|| "no repetitions ran".to_string())),
        );
    }

    let loss = survivors
        .iter()
        .map(|values| values.get(&objective).copied().unwrap_or(f64::INFINITY))
        .sum::<f64>()
        / survivors.len() as f64;

    let mut metrics: HashMap<String, Vec<f64>> = HashMap::new();
    for values in &survivors {
        for (metric, value) in values {
            metrics
                .entry(metric.as_str().to_string())
                .or_default()
                .push(*value);
        }
    }

    let outcome = if failed_runs > 0 {
        TrialOutcome::Degraded { failed_runs }
    } else {
        TrialOutcome::Success
    };
    (loss, outcome, metrics, first_error)
}

/// Run the simulator `repetitions` times and score each synthetic log
/// against the training log. Repetitions are independent and evaluated in
/// parallel; aggregation is a pure reduction over their metric values.
fn simulate_and_score(
    simulator: &dyn Simulator,
    training: &EventLog,
    model: &ProcessModel,
    calendars: &CalendarSet,
    delays: Option<&ExtraneousDelays>,
    settings: &EvaluationSettings,
    trial_seed: u64,
) -> (f64, TrialOutcome, HashMap<String, Vec<f64>>, Option<String>) {
    let runs: Vec<RunResult> = (0..settings.repetitions)
        .into_par_iter()
        .map(|repetition| {
            let seed = trial_seed.wrapping_add(repetition as u64);
            simulator
                .simulate(model, calendars, delays, settings.simulation_cases, seed)
                .map(|synthetic| {
                    let mut values = HashMap::new();
                    values.insert(
                        settings.objective,
                        distance(settings.objective, training, &synthetic),
                    );
                    for metric in &settings.reporting_metrics {
                        values.insert(*metric, distance(*metric, training, &synthetic));
                    }
                    values
                })
                .map_err(|e| e.to_string())
        })
        .collect();
    aggregate_runs(runs, settings.objective, settings.min_successful_repetitions)
}

// ---------------------------------------------------------------------------
// Assignment access and space-building helpers
// ---------------------------------------------------------------------------

fn require_f64(assignment: &Assignment, name: &str) -> Result<f64, String> {
    assignment
        .get(name)
        .and_then(ParameterValue::as_f64)
        .ok_or_else(|| format!("missing or non-numeric parameter '{name}'"))
}

fn require_bool(assignment: &Assignment, name: &str) -> Result<bool, String> {
    assignment
        .get(name)
        .and_then(ParameterValue::as_bool)
        .ok_or_else(|| format!("missing or non-boolean parameter '{name}'"))
}

fn require_i64(assignment: &Assignment, name: &str) -> Result<i64, String> {
    assignment
        .get(name)
        .and_then(ParameterValue::as_i64)
        .ok_or_else(|| format!("missing or non-integer parameter '{name}'"))
}

fn require_variant<T>(assignment: &Assignment, name: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = assignment
        .get(name)
        .and_then(ParameterValue::as_str)
        .ok_or_else(|| format!("missing parameter '{name}'"))?;
    raw.parse().map_err(|e: T::Err| e.to_string())
}

fn numeric_dimension(space: SearchSpace, name: &str, domain: &NumericDomain) -> SearchSpace {
    match domain {
        NumericDomain::Fixed(value) => space.add_fixed(name, ParameterValue::Float(*value)),
        NumericDomain::Range([low, high]) => space.add_continuous(name, *low, *high),
    }
}

fn bool_dimension(space: SearchSpace, name: &str, options: &[bool]) -> SearchSpace {
    if options.contains(&true) && options.contains(&false) {
        space.add_boolean(name)
    } else {
        space.add_fixed(name, ParameterValue::Bool(options[0]))
    }
}

fn choice_dimension(space: SearchSpace, name: &str, mut choices: Vec<ParameterValue>) -> SearchSpace {
    if choices.len() == 1 {
        space.add_fixed(name, choices.remove(0))
    } else {
        space.add_categorical(name, choices)
    }
}

// ---------------------------------------------------------------------------
// Stage 1: control-flow structure
// ---------------------------------------------------------------------------

pub struct ControlFlowEvaluator {
    config: ControlFlowConfig,
    settings: EvaluationSettings,
    training: Arc<EventLog>,
    /// Training partition written once as the miner's input file.
    training_csv: PathBuf,
    models_dir: PathBuf,
    miner: Arc<dyn StructureMiner>,
    simulator: Arc<dyn Simulator>,
    /// Candidate structures are simulated against full availability;
    /// calendars are searched only after the structure is frozen.
    baseline_calendars: CalendarSet,
}

impl ControlFlowEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ControlFlowConfig,
        settings: EvaluationSettings,
        training: Arc<EventLog>,
        training_csv: PathBuf,
        models_dir: PathBuf,
        miner: Arc<dyn StructureMiner>,
        simulator: Arc<dyn Simulator>,
        baseline_calendars: CalendarSet,
    ) -> Self {
        Self {
            config,
            settings,
            training,
            training_csv,
            models_dir,
            miner,
            simulator,
            baseline_calendars,
        }
    }
}

impl StageEvaluator for ControlFlowEvaluator {
    fn stage(&self) -> StageKind {
        StageKind::ControlFlow
    }

    fn search_space(&self) -> SearchSpace {
        let mut space = SearchSpace::new().add_fixed(
            "mining_algorithm",
            ParameterValue::Text(self.config.mining_algorithm.as_str().to_string()),
        );
        space = numeric_dimension(space, "epsilon", &self.config.epsilon);
        space = numeric_dimension(space, "eta", &self.config.eta);
        space = numeric_dimension(space, "concurrency", &self.config.concurrency);
        space = choice_dimension(
            space,
            "gateway_probabilities",
            self.config
                .gateway_probabilities
                .iter()
                .map(|m| ParameterValue::Text(m.as_str().to_string()))
                .collect(),
        );
        space = bool_dimension(space, "replace_or_joins", &self.config.replace_or_joins);
        bool_dimension(
            space,
            "prioritize_parallelism",
            &self.config.prioritize_parallelism,
        )
    }

    fn evaluate(&self, assignment: &Assignment, trial_seed: u64) -> EvaluationOutcome {
        let params = match (|| -> Result<MiningParams, String> {
            Ok(MiningParams {
                algorithm: require_variant::<MiningAlgorithm>(assignment, "mining_algorithm")?,
                epsilon: require_f64(assignment, "epsilon")?,
                eta: require_f64(assignment, "eta")?,
                concurrency: require_f64(assignment, "concurrency")?,
                gateway_probabilities: require_variant::<GatewayProbabilitiesMethod>(
                    assignment,
                    "gateway_probabilities",
                )?,
                replace_or_joins: require_bool(assignment, "replace_or_joins")?,
                prioritize_parallelism: require_bool(assignment, "prioritize_parallelism")?,
            })
        })() {
            Ok(params) => params,
            Err(error) => return EvaluationOutcome::failed(error),
        };

        let model_path = self.models_dir.join(format!("model_{trial_seed:016x}.bpmn"));
        let model = match self.miner.mine(&self.training_csv, &params, &model_path) {
            Ok(model) => model,
            Err(error) => return EvaluationOutcome::failed(error.to_string()),
        };

        let (loss, outcome, metrics, error) = simulate_and_score(
            self.simulator.as_ref(),
            &self.training,
            &model,
            &self.baseline_calendars,
            None,
            &self.settings,
            trial_seed,
        );
        EvaluationOutcome {
            loss,
            outcome,
            metrics,
            artifacts: ArtifactSet::with_model(model),
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 2: calendars
// ---------------------------------------------------------------------------

pub struct CalendarEvaluator {
    config: CalendarConfig,
    settings: EvaluationSettings,
    training: Arc<EventLog>,
    /// The immutable winner of the control-flow stage.
    frozen_model: ProcessModel,
    discovery: Arc<dyn CalendarDiscovery>,
    simulator: Arc<dyn Simulator>,
}

impl CalendarEvaluator {
    pub fn new(
        config: CalendarConfig,
        settings: EvaluationSettings,
        training: Arc<EventLog>,
        frozen_model: ProcessModel,
        discovery: Arc<dyn CalendarDiscovery>,
        simulator: Arc<dyn Simulator>,
    ) -> Self {
        Self {
            config,
            settings,
            training,
            frozen_model,
            discovery,
            simulator,
        }
    }
}

impl StageEvaluator for CalendarEvaluator {
    fn stage(&self) -> StageKind {
        StageKind::Calendars
    }

    fn search_space(&self) -> SearchSpace {
        let mut space = choice_dimension(
            SearchSpace::new(),
            "discovery_type",
            self.config
                .discovery_types
                .iter()
                .map(|t| ParameterValue::Text(t.as_str().to_string()))
                .collect(),
        );
        space = choice_dimension(
            space,
            "granularity",
            self.config
                .granularity
                .iter()
                .map(|g| ParameterValue::Int(*g as i64))
                .collect(),
        );
        space = numeric_dimension(space, "confidence", &self.config.confidence);
        space = numeric_dimension(space, "support", &self.config.support);
        numeric_dimension(space, "participation", &self.config.participation)
    }

    fn evaluate(&self, assignment: &Assignment, trial_seed: u64) -> EvaluationOutcome {
        let params = match (|| -> Result<CalendarParams, String> {
            Ok(CalendarParams {
                discovery_type: require_variant::<CalendarDiscoveryType>(
                    assignment,
                    "discovery_type",
                )?,
                granularity_minutes: require_i64(assignment, "granularity")? as u32,
                confidence: require_f64(assignment, "confidence")?,
                support: require_f64(assignment, "support")?,
                participation: require_f64(assignment, "participation")?,
            })
        })() {
            Ok(params) => params,
            Err(error) => return EvaluationOutcome::failed(error),
        };

        let calendars = match self
            .discovery
            .discover(&self.training, &self.frozen_model, &params)
        {
            Ok(calendars) => calendars,
            Err(error) => return EvaluationOutcome::failed(error.to_string()),
        };

        let (loss, outcome, metrics, error) = simulate_and_score(
            self.simulator.as_ref(),
            &self.training,
            &self.frozen_model,
            &calendars,
            None,
            &self.settings,
            trial_seed,
        );
        EvaluationOutcome {
            loss,
            outcome,
            metrics,
            artifacts: ArtifactSet::with_calendars(calendars),
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage 3: extraneous delays
// ---------------------------------------------------------------------------

pub struct DelayEvaluator {
    config: DelayConfig,
    settings: EvaluationSettings,
    training: Arc<EventLog>,
    frozen_model: ProcessModel,
    frozen_calendars: CalendarSet,
    simulator: Arc<dyn Simulator>,
}

impl DelayEvaluator {
    pub fn new(
        config: DelayConfig,
        settings: EvaluationSettings,
        training: Arc<EventLog>,
        frozen_model: ProcessModel,
        frozen_calendars: CalendarSet,
        simulator: Arc<dyn Simulator>,
    ) -> Self {
        Self {
            config,
            settings,
            training,
            frozen_model,
            frozen_calendars,
            simulator,
        }
    }
}

impl StageEvaluator for DelayEvaluator {
    fn stage(&self) -> StageKind {
        StageKind::ExtraneousDelays
    }

    fn search_space(&self) -> SearchSpace {
        numeric_dimension(SearchSpace::new(), "delay_scale", &self.config.delay_scale)
    }

    fn evaluate(&self, assignment: &Assignment, trial_seed: u64) -> EvaluationOutcome {
        let scale = match require_f64(assignment, "delay_scale") {
            Ok(scale) => scale,
            Err(error) => return EvaluationOutcome::failed(error),
        };

        let delays = estimate_extraneous_delays(&self.training, scale);
        let (loss, outcome, metrics, error) = simulate_and_score(
            self.simulator.as_ref(),
            &self.training,
            &self.frozen_model,
            &self.frozen_calendars,
            Some(&delays),
            &self.settings,
            trial_seed,
        );
        EvaluationOutcome {
            loss,
            outcome,
            metrics,
            artifacts: ArtifactSet::with_delays(delays),
            error,
        }
    }
}

/// Per-activity waiting time between the end of the previous activity and
/// the start of the next one within a case, scaled by the searched factor.
pub fn estimate_extraneous_delays(log: &EventLog, scale: f64) -> ExtraneousDelays {
    let mut gaps: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (_, events) in log.traces() {
        for pair in events.windows(2) {
            let gap = (pair[1].start_time - pair[0].end_time).num_milliseconds() as f64 / 1000.0;
            if gap > 0.0 {
                gaps.entry(pair[1].activity.clone()).or_default().push(gap);
            }
        }
    }

    let activities = gaps
        .into_iter()
        .map(|(activity, values)| {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
            (
                activity,
                DelayDistribution {
                    mean_secs: mean * scale,
                    std_secs: variance.sqrt() * scale,
                },
            )
        })
        .collect();

    ExtraneousDelays { scale, activities }
}
