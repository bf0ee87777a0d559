//! # sf-engine
//!
//! The SimForge discovery pipeline: collaborator adapters for structure
//! mining, calendar discovery, and simulation; distance metrics; the three
//! stage evaluators; and the orchestrator that freezes each stage's winner
//! into the next stage's context.

pub mod calendar;
pub mod evaluator;
pub mod metrics;
pub mod miner;
pub mod pipeline;
pub mod simulator;

pub use calendar::{always_available, CalendarDiscovery, CalendarParams, WeeklyCalendarDiscovery};
pub use evaluator::{
    estimate_extraneous_delays, CalendarEvaluator, ControlFlowEvaluator, DelayEvaluator,
    EvaluationOutcome, EvaluationSettings, StageEvaluator,
};
pub use metrics::distance;
pub use miner::{MiningParams, SplitMinerCli, StructureMiner};
pub use pipeline::{Pipeline, PipelineBundle, PipelineState};
pub use simulator::{ExternalSimulator, Simulator};
