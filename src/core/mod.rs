//! Core migration logic: plan ingestion, coverage gate, generation, planning, execution.

pub mod codegen;
pub mod coverage;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod plan;
pub mod planner;
pub mod resolver;
pub mod types;
