//! Structure-mining collaborator: external process-model discovery tools
//! invoked as subprocesses.

use std::path::{Path, PathBuf};
use std::process::Command;

use sf_types::{
    CollaboratorError, GatewayProbabilitiesMethod, MiningAlgorithm, ProcessModel, SfResult,
};

/// Parameters of one mining invocation, assembled from a trial's
/// parameter assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningParams {
    pub algorithm: MiningAlgorithm,
    pub epsilon: f64,
    pub eta: f64,
    /// Concurrency threshold, only consumed by Split Miner v2.
    pub concurrency: f64,
    pub gateway_probabilities: GatewayProbabilitiesMethod,
    pub replace_or_joins: bool,
    pub prioritize_parallelism: bool,
}

/// Discovers a process model from an event log.
///
/// Postcondition: the output model file exists on success; a missing file
/// is a [`CollaboratorError`], which the evaluator contains as a failed
/// trial.
pub trait StructureMiner: Send + Sync {
    fn mine(
        &self,
        log_path: &Path,
        params: &MiningParams,
        output_model_path: &Path,
    ) -> SfResult<ProcessModel>;
}

/// Split Miner invoked as an external `java -jar` tool.
pub struct SplitMinerCli {
    jar_path: PathBuf,
    java_bin: String,
}

impl SplitMinerCli {
    pub fn new(jar_path: PathBuf) -> Self {
        Self {
            jar_path,
            java_bin: "java".to_string(),
        }
    }

    pub fn with_java_bin(mut self, java_bin: impl Into<String>) -> Self {
        self.java_bin = java_bin.into();
        self
    }
}

/// Tool arguments for one mining run, after the JVM flags.
fn mining_args(log_path: &Path, params: &MiningParams, output_model_path: &Path) -> Vec<String> {
    let mut args = vec![
        "--logPath".to_string(),
        log_path.display().to_string(),
        "--outputPath".to_string(),
        output_model_path.display().to_string(),
    ];
    match params.algorithm {
        MiningAlgorithm::SplitMinerV1 => {
            args.extend([
                "--eta".to_string(),
                params.eta.to_string(),
                "--epsilon".to_string(),
                params.epsilon.to_string(),
            ]);
            // Boolean flags are added only when set.
            if params.prioritize_parallelism {
                args.push("--parallelismFirst".to_string());
            }
            if params.replace_or_joins {
                args.push("--replaceIORs".to_string());
            }
        }
        MiningAlgorithm::SplitMinerV2 => {
            args.extend([
                "--epsilon".to_string(),
                params.epsilon.to_string(),
                "--concurrency".to_string(),
                params.concurrency.to_string(),
                "--splitminer2".to_string(),
            ]);
        }
    }
    args
}

impl StructureMiner for SplitMinerCli {
    fn mine(
        &self,
        log_path: &Path,
        params: &MiningParams,
        output_model_path: &Path,
    ) -> SfResult<ProcessModel> {
        let tool = format!("split-miner ({})", params.algorithm);
        let args = mining_args(log_path, params, output_model_path);

        let mut command = Command::new(&self.java_bin);
        command
            .args(["-Xmx2G", "-Xms1024M", "-Djava.awt.headless=true", "-jar"])
            .arg(&self.jar_path)
            .args(&args);

        tracing::info!("Running {tool} with arguments: {args:?}");
        let status = command.status().map_err(|e| CollaboratorError::LaunchFailed {
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
        if !output_model_path.exists() {
            return Err(CollaboratorError::MissingOutput {
                tool,
                path: output_model_path.to_path_buf(),
            }
            .into());
        }

        Ok(ProcessModel::new(
            output_model_path.to_path_buf(),
            params.gateway_probabilities,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(algorithm: MiningAlgorithm) -> MiningParams {
        MiningParams {
            algorithm,
            epsilon: 0.3,
            eta: 0.7,
            concurrency: 0.5,
            gateway_probabilities: GatewayProbabilitiesMethod::Discovery,
            replace_or_joins: true,
            prioritize_parallelism: false,
        }
    }

    #[test]
    fn v1_args_carry_eta_epsilon_and_set_flags_only() {
        let args = mining_args(
            Path::new("/tmp/log.csv"),
            &params(MiningAlgorithm::SplitMinerV1),
            Path::new("/tmp/model.bpmn"),
        );
        assert!(args.contains(&"--eta".to_string()));
        assert!(args.contains(&"0.7".to_string()));
        assert!(args.contains(&"--replaceIORs".to_string()));
        assert!(!args.contains(&"--parallelismFirst".to_string()));
        assert!(!args.contains(&"--splitminer2".to_string()));
    }

    #[test]
    fn v2_args_carry_concurrency_and_variant_flag() {
        let args = mining_args(
            Path::new("/tmp/log.csv"),
            &params(MiningAlgorithm::SplitMinerV2),
            Path::new("/tmp/model.bpmn"),
        );
        assert!(args.contains(&"--concurrency".to_string()));
        assert!(args.contains(&"--splitminer2".to_string()));
        assert!(!args.contains(&"--eta".to_string()));
    }

    #[test]
    fn launch_failure_is_a_collaborator_error() {
        let miner = SplitMinerCli::new(PathBuf::from("/nonexistent/miner.jar"))
            .with_java_bin("/nonexistent/java-bin");
        let result = miner.mine(
            Path::new("/tmp/log.csv"),
            &params(MiningAlgorithm::SplitMinerV1),
            Path::new("/tmp/model.bpmn"),
        );
        match result {
            Err(sf_types::SfError::Collaborator(CollaboratorError::LaunchFailed { .. })) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
