//! Configuration model for a discovery pipeline run.
//!
//! Enumerated choices are closed variant types with a validated
//! string-to-variant parse at the configuration boundary and a canonical
//! string render for persistence.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigurationError, SfResult};

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $canonical:literal $(| $alias:literal)*),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Canonical string used in configuration files and persisted output.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $canonical),+
                }
            }
        }

        impl FromStr for $name {
            type Err = ConfigurationError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.to_lowercase().as_str() {
                    $($canonical $(| $alias)* => Ok(Self::$variant),)+
                    _ => Err(ConfigurationError::UnknownVariant {
                        kind: $kind,
                        value: value.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ConfigurationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(StageKind, "stage", {
    ControlFlow => "control_flow",
    Calendars => "calendars",
    ExtraneousDelays => "extraneous_delays",
});

string_enum!(MiningAlgorithm, "mining algorithm", {
    SplitMinerV1 => "sm1" | "split_miner_v1" | "split-miner-1" | "splitminer1",
    SplitMinerV2 => "sm2" | "split_miner_v2" | "split-miner-2" | "splitminer2",
});

string_enum!(GatewayProbabilitiesMethod, "gateway probabilities method", {
    Discovery => "discovery",
    Equiprobable => "equiprobable",
    Random => "random",
});

string_enum!(CalendarDiscoveryType, "calendar discovery type", {
    Undifferentiated => "undifferentiated",
    PerResourcePool => "per_resource_pool" | "pool" | "differentiated_by_pool",
    PerResource => "per_resource" | "differentiated" | "differentiated_by_resource",
});

string_enum!(Metric, "metric", {
    ControlFlowLogDistance => "dl" | "control_flow_log_distance" | "cfld",
    AbsoluteHourlyEmd => "absolute_hourly_emd" | "hour_emd",
    AbsoluteDailyEmd => "absolute_daily_emd" | "day_emd",
    CircadianEmd => "circadian_emd" | "cal_emd",
    CycleTimeEmd => "cycle_time_emd" | "cycle_time",
});

string_enum!(SearchAlgorithm, "search algorithm", {
    Tpe => "tpe" | "bayesian",
    Random => "random",
});

impl Default for SearchAlgorithm {
    fn default() -> Self {
        Self::Tpe
    }
}

/// A user-supplied numeric parameter: a single literal collapses to a fixed,
/// non-searched dimension; a `[low, high]` pair becomes a continuous
/// dimension sampled uniformly by the search driver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericDomain {
    Fixed(f64),
    Range([f64; 2]),
}

impl NumericDomain {
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    pub fn validate(&self, parameter: &str) -> Result<(), ConfigurationError> {
        match self {
            Self::Fixed(value) => {
                if !value.is_finite() {
                    return Err(ConfigurationError::NonFiniteBound {
                        parameter: parameter.to_string(),
                    });
                }
            }
            Self::Range([low, high]) => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(ConfigurationError::NonFiniteBound {
                        parameter: parameter.to_string(),
                    });
                }
                if low > high {
                    return Err(ConfigurationError::InvalidRange {
                        parameter: parameter.to_string(),
                        low: *low,
                        high: *high,
                    });
                }
            }
        }
        Ok(())
    }
}

/// CSV column names of the input event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub case: String,
    pub activity: String,
    pub resource: String,
    pub start_time: String,
    pub end_time: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            case: "case_id".to_string(),
            activity: "activity".to_string(),
            resource: "resource".to_string(),
            start_time: "start_time".to_string(),
            end_time: "end_time".to_string(),
        }
    }
}

fn default_repetitions() -> usize {
    1
}

fn default_min_successful() -> usize {
    1
}

fn default_training_fraction() -> f64 {
    0.8
}

fn default_warmup_trials() -> usize {
    3
}

fn default_max_evaluations() -> usize {
    10
}

/// Settings shared by all three optimization stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonConfig {
    pub log_path: PathBuf,
    #[serde(default)]
    pub test_log_path: Option<PathBuf>,
    #[serde(default)]
    pub columns: ColumnMapping,
    /// Simulation repetitions per trial; the loss is the mean distance
    /// across repetitions.
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    /// A trial with fewer surviving repetitions than this counts as a full
    /// failure instead of a degraded result.
    #[serde(default = "default_min_successful")]
    pub min_successful_repetitions: usize,
    /// Metrics computed for reporting only; they never influence the search.
    #[serde(default)]
    pub evaluation_metrics: Vec<Metric>,
    #[serde(default = "default_training_fraction")]
    pub training_fraction: f64,
    /// Cases per simulation run; defaults to the training partition size.
    #[serde(default)]
    pub simulation_cases: Option<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub search_algorithm: SearchAlgorithm,
    /// Unconditioned random samples before the model-based search kicks in.
    #[serde(default = "default_warmup_trials")]
    pub warmup_trials: usize,
}

/// Control-flow discovery stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowConfig {
    pub optimization_metric: Metric,
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    #[serde(default)]
    pub early_stop_rounds: Option<usize>,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    pub mining_algorithm: MiningAlgorithm,
    pub epsilon: NumericDomain,
    pub eta: NumericDomain,
    #[serde(default = "ControlFlowConfig::default_concurrency")]
    pub concurrency: NumericDomain,
    pub gateway_probabilities: Vec<GatewayProbabilitiesMethod>,
    pub replace_or_joins: Vec<bool>,
    pub prioritize_parallelism: Vec<bool>,
}

impl ControlFlowConfig {
    fn default_concurrency() -> NumericDomain {
        NumericDomain::Fixed(0.0)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.epsilon.validate("epsilon")?;
        self.eta.validate("eta")?;
        self.concurrency.validate("concurrency")?;
        for (name, empty) in [
            ("gateway_probabilities", self.gateway_probabilities.is_empty()),
            ("replace_or_joins", self.replace_or_joins.is_empty()),
            ("prioritize_parallelism", self.prioritize_parallelism.is_empty()),
        ] {
            if empty {
                return Err(ConfigurationError::EmptyChoices {
                    parameter: name.to_string(),
                });
            }
        }
        validate_budget(StageKind::ControlFlow, self.max_evaluations)
    }
}

impl Default for ControlFlowConfig {
    fn default() -> Self {
        Self {
            optimization_metric: Metric::ControlFlowLogDistance,
            max_evaluations: default_max_evaluations(),
            early_stop_rounds: None,
            max_runtime_secs: None,
            mining_algorithm: MiningAlgorithm::SplitMinerV1,
            epsilon: NumericDomain::Range([0.0, 1.0]),
            eta: NumericDomain::Range([0.0, 1.0]),
            concurrency: Self::default_concurrency(),
            gateway_probabilities: vec![GatewayProbabilitiesMethod::Discovery],
            replace_or_joins: vec![true, false],
            prioritize_parallelism: vec![true, false],
        }
    }
}

/// Calendar discovery stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarConfig {
    pub optimization_metric: Metric,
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    #[serde(default)]
    pub early_stop_rounds: Option<usize>,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    pub discovery_types: Vec<CalendarDiscoveryType>,
    /// Calendar slot sizes in minutes; must divide a day evenly.
    pub granularity: Vec<u32>,
    pub confidence: NumericDomain,
    pub support: NumericDomain,
    pub participation: NumericDomain,
}

impl CalendarConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.discovery_types.is_empty() {
            return Err(ConfigurationError::EmptyChoices {
                parameter: "discovery_types".to_string(),
            });
        }
        if self.granularity.is_empty() {
            return Err(ConfigurationError::EmptyChoices {
                parameter: "granularity".to_string(),
            });
        }
        for minutes in &self.granularity {
            if *minutes == 0 || 24 * 60 % minutes != 0 {
                return Err(ConfigurationError::Invalid {
                    message: format!("granularity {minutes} does not divide a day evenly"),
                });
            }
        }
        self.confidence.validate("confidence")?;
        self.support.validate("support")?;
        self.participation.validate("participation")?;
        validate_budget(StageKind::Calendars, self.max_evaluations)
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            optimization_metric: Metric::AbsoluteHourlyEmd,
            max_evaluations: default_max_evaluations(),
            early_stop_rounds: None,
            max_runtime_secs: None,
            discovery_types: vec![CalendarDiscoveryType::Undifferentiated],
            granularity: vec![15, 30, 60],
            confidence: NumericDomain::Range([0.5, 0.85]),
            support: NumericDomain::Range([0.01, 0.3]),
            participation: NumericDomain::Fixed(0.4),
        }
    }
}

/// Extraneous-delay calibration stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayConfig {
    pub optimization_metric: Metric,
    #[serde(default = "default_max_evaluations")]
    pub max_evaluations: usize,
    #[serde(default)]
    pub early_stop_rounds: Option<usize>,
    #[serde(default)]
    pub max_runtime_secs: Option<u64>,
    /// Fraction of the observed inter-activity idle time attributed to
    /// extraneous waiting.
    pub delay_scale: NumericDomain,
}

impl DelayConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.delay_scale.validate("delay_scale")?;
        validate_budget(StageKind::ExtraneousDelays, self.max_evaluations)
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            optimization_metric: Metric::CycleTimeEmd,
            max_evaluations: default_max_evaluations(),
            early_stop_rounds: None,
            max_runtime_secs: None,
            delay_scale: NumericDomain::Range([0.0, 1.0]),
        }
    }
}

fn validate_budget(stage: StageKind, max_evaluations: usize) -> Result<(), ConfigurationError> {
    if max_evaluations == 0 {
        return Err(ConfigurationError::Invalid {
            message: format!("stage {stage} has a zero evaluation budget"),
        });
    }
    Ok(())
}

/// Full configuration of one discovery pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub common: CommonConfig,
    #[serde(default)]
    pub control_flow: ControlFlowConfig,
    #[serde(default)]
    pub calendars: CalendarConfig,
    #[serde(default)]
    pub extraneous_delays: DelayConfig,
}

impl PipelineConfig {
    pub fn from_json_str(raw: &str) -> SfResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> SfResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Surface configuration problems before any evaluation starts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let common = &self.common;
        if common.repetitions == 0 {
            return Err(ConfigurationError::Invalid {
                message: "repetitions must be at least 1".to_string(),
            });
        }
        if common.min_successful_repetitions == 0
            || common.min_successful_repetitions > common.repetitions
        {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "min_successful_repetitions must be in 1..={}",
                    common.repetitions
                ),
            });
        }
        if !(common.training_fraction > 0.0 && common.training_fraction <= 1.0) {
            return Err(ConfigurationError::Invalid {
                message: "training_fraction must be in (0, 1]".to_string(),
            });
        }
        self.control_flow.validate()?;
        self.calendars.validate()?;
        self.extraneous_delays.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_round_trip() {
        for metric in [
            Metric::ControlFlowLogDistance,
            Metric::AbsoluteHourlyEmd,
            Metric::AbsoluteDailyEmd,
            Metric::CircadianEmd,
            Metric::CycleTimeEmd,
        ] {
            let parsed: Metric = metric.as_str().parse().unwrap();
            assert_eq!(parsed, metric);
        }
    }

    #[test]
    fn metric_aliases() {
        assert_eq!("dl".parse::<Metric>().unwrap(), Metric::ControlFlowLogDistance);
        assert_eq!("hour_emd".parse::<Metric>().unwrap(), Metric::AbsoluteHourlyEmd);
        assert_eq!(
            "DIFFERENTIATED".parse::<CalendarDiscoveryType>().unwrap(),
            CalendarDiscoveryType::PerResource
        );
        assert_eq!(
            "sm2".parse::<MiningAlgorithm>().unwrap(),
            MiningAlgorithm::SplitMinerV2
        );
    }

    #[test]
    fn unknown_variant_is_configuration_error() {
        let error = "earth_mover_3000".parse::<Metric>().unwrap_err();
        match error {
            ConfigurationError::UnknownVariant { kind, value } => {
                assert_eq!(kind, "metric");
                assert_eq!(value, "earth_mover_3000");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn numeric_domain_untagged_parse() {
        let fixed: NumericDomain = serde_json::from_str("0.4").unwrap();
        assert_eq!(fixed, NumericDomain::Fixed(0.4));
        assert!(fixed.is_fixed());

        let range: NumericDomain = serde_json::from_str("[0.0, 1.0]").unwrap();
        assert_eq!(range, NumericDomain::Range([0.0, 1.0]));
        assert!(!range.is_fixed());
    }

    #[test]
    fn inverted_range_rejected() {
        let domain = NumericDomain::Range([0.9, 0.1]);
        match domain.validate("epsilon").unwrap_err() {
            ConfigurationError::InvalidRange { parameter, .. } => {
                assert_eq!(parameter, "epsilon");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn full_config_parses_with_defaults() {
        let raw = r#"{
            "common": {
                "log_path": "logs/insurance_claims.csv",
                "repetitions": 3,
                "min_successful_repetitions": 2,
                "evaluation_metrics": ["dl", "absolute_hourly_emd", "cycle_time_emd"]
            },
            "control_flow": {
                "optimization_metric": "dl",
                "max_evaluations": 20,
                "mining_algorithm": "sm1",
                "epsilon": [0.0, 1.0],
                "eta": [0.0, 1.0],
                "gateway_probabilities": ["discovery", "equiprobable"],
                "replace_or_joins": [true, false],
                "prioritize_parallelism": [true, false]
            },
            "calendars": {
                "optimization_metric": "absolute_hourly_emd",
                "max_evaluations": 20,
                "discovery_types": ["undifferentiated", "per_resource"],
                "granularity": [15, 60],
                "confidence": [0.5, 0.85],
                "support": [0.01, 0.3],
                "participation": 0.4
            }
        }"#;

        let config = PipelineConfig::from_json_str(raw).unwrap();
        assert_eq!(config.common.repetitions, 3);
        assert_eq!(config.common.search_algorithm, SearchAlgorithm::Tpe);
        assert_eq!(config.control_flow.concurrency, NumericDomain::Fixed(0.0));
        assert_eq!(config.calendars.granularity, vec![15, 60]);
        // Omitted stage falls back to its defaults.
        assert_eq!(
            config.extraneous_delays.optimization_metric,
            Metric::CycleTimeEmd
        );
        assert_eq!(config.common.columns, ColumnMapping::default());
    }

    #[test]
    fn validation_rejects_empty_choice_list() {
        let mut config = ControlFlowConfig::default();
        config.gateway_probabilities.clear();
        match config.validate().unwrap_err() {
            ConfigurationError::EmptyChoices { parameter } => {
                assert_eq!(parameter, "gateway_probabilities");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn validation_rejects_bad_repetition_threshold() {
        let raw = r#"{
            "common": {
                "log_path": "log.csv",
                "repetitions": 2,
                "min_successful_repetitions": 3
            }
        }"#;
        assert!(PipelineConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn granularity_must_divide_day() {
        let mut config = CalendarConfig::default();
        config.granularity = vec![7];
        assert!(config.validate().is_err());
    }

    #[test]
    fn canonical_render_for_persistence() {
        let rendered = serde_json::to_string(&Metric::AbsoluteHourlyEmd).unwrap();
        assert_eq!(rendered, "\"absolute_hourly_emd\"");
        let rendered = serde_json::to_string(&StageKind::ExtraneousDelays).unwrap();
        assert_eq!(rendered, "\"extraneous_delays\"");
    }
}
