//! Context management for pipeline execution.
//!
//! A [`PipelineContext`] is owned by the orchestrator for one run and handed to
//! each stage by shared reference.

mod pipeline;

pub use pipeline::PipelineContext;
