//! Discrete-event simulator collaborator.
//!
//! The simulator is a black box: it takes the mined model, the calendars,
//! the delay parameters, a case count, and a seed, and returns a synthetic
//! log. It must be callable repeatedly with independent randomness.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use sf_log::read_csv;
use sf_types::{
    CalendarSet, CollaboratorError, ColumnMapping, EventLog, ExtraneousDelays,
    GatewayProbabilitiesMethod, ProcessModel, SfResult,
};

pub trait Simulator: Send + Sync {
    fn simulate(
        &self,
        model: &ProcessModel,
        calendars: &CalendarSet,
        delays: Option<&ExtraneousDelays>,
        cases: usize,
        seed: u64,
    ) -> SfResult<EventLog>;
}

/// The scenario file handed to the external simulator process.
#[derive(Debug, Serialize)]
pub(crate) struct Scenario<'a> {
    pub model_path: &'a Path,
    pub gateway_probabilities: GatewayProbabilitiesMethod,
    pub calendars: &'a CalendarSet,
    pub delays: Option<&'a ExtraneousDelays>,
    pub cases: usize,
    pub seed: u64,
}

/// A simulator invoked as an external command.
///
/// The command receives `--scenario <json> --output <csv>` and is expected
/// to write the synthetic log as CSV with the configured column names.
pub struct ExternalSimulator {
    command: PathBuf,
    columns: ColumnMapping,
}

impl ExternalSimulator {
    pub fn new(command: PathBuf) -> Self {
        Self {
            command,
            columns: ColumnMapping::default(),
        }
    }

    pub fn with_columns(mut self, columns: ColumnMapping) -> Self {
        self.columns = columns;
        self
    }
}

impl Simulator for ExternalSimulator {
    fn simulate(
        &self,
        model: &ProcessModel,
        calendars: &CalendarSet,
        delays: Option<&ExtraneousDelays>,
        cases: usize,
        seed: u64,
    ) -> SfResult<EventLog> {
        let tool = self.command.display().to_string();
        let workspace = tempfile::tempdir()?;
        let scenario_path = workspace.path().join("scenario.json");
        let output_path = workspace.path().join("simulated_log.csv");

        let scenario = Scenario {
            model_path: &model.path,
            gateway_probabilities: model.gateway_probabilities,
            calendars,
            delays,
            cases,
            seed,
        };
        serde_json::to_writer_pretty(File::create(&scenario_path)?, &scenario)?;

        tracing::debug!("Running simulator {tool} with {cases} cases, seed {seed}");
        let status = Command::new(&self.command)
            .arg("--scenario")
            .arg(&scenario_path)
            .arg("--output")
            .arg(&output_path)
            .status()
            .map_err(|e| CollaboratorError::LaunchFailed {
                tool: tool.clone(),
                message: e.to_string(),
            })?;

        if !status.success() {
            return Err(CollaboratorError::ToolFailed {
                tool,
                status: status.to_string(),
            }
            .into());
        }
        if !output_path.exists() {
            return Err(CollaboratorError::MissingOutput {
                tool,
                path: output_path,
            }
            .into());
        }

        read_csv(&output_path, &self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sf_types::{CalendarDiscoveryType, ResourceCalendar, TimeInterval};

    fn fixture() -> (ProcessModel, CalendarSet) {
        let model = ProcessModel::new(
            PathBuf::from("/tmp/model.bpmn"),
            GatewayProbabilitiesMethod::Equiprobable,
        );
        let calendars = CalendarSet {
            discovery_type: CalendarDiscoveryType::Undifferentiated,
            arrival: ResourceCalendar::new("case_arrival", vec![], TimeInterval::full_week()),
            resources: vec![],
        };
        (model, calendars)
    }

    #[test]
    fn scenario_serializes_seed_and_gateway_method() {
        let (model, calendars) = fixture();
        let scenario = Scenario {
            model_path: &model.path,
            gateway_probabilities: model.gateway_probabilities,
            calendars: &calendars,
            delays: None,
            cases: 50,
            seed: 1234,
        };
        let json = serde_json::to_value(&scenario).unwrap();
        assert_eq!(json["seed"], 1234);
        assert_eq!(json["cases"], 50);
        assert_eq!(json["gateway_probabilities"], "equiprobable");
        assert!(json["delays"].is_null());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_a_contained_collaborator_error() {
        let (model, calendars) = fixture();
        let simulator = ExternalSimulator::new(PathBuf::from("/bin/false"));
        let result = simulator.simulate(&model, &calendars, None, 10, 1);
        match result {
            Err(sf_types::SfError::Collaborator(CollaboratorError::ToolFailed { .. })) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
