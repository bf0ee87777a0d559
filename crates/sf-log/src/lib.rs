//! # sf-log
//!
//! Event-log ingestion for SimForge: CSV reading with configurable column
//! mapping, validated timezone-aware timestamps, CSV writing for miner
//! input, and the deterministic training/test split.

pub mod reader;
pub mod split;
pub mod writer;

pub use reader::read_csv;
pub use split::split_training_test;
pub use writer::write_csv;
