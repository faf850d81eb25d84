//! # Ledgerflow
//!
//! A resilient engine for an unattended weekly personal-finance job.
//!
//! The job pulls recent transactions, categorizes them, compares spend to a
//! budget, writes a narrative report, emails it, and moves any surplus to
//! savings. Underneath the six stages sits the part that keeps the job
//! running against flaky third-party APIs:
//!
//! - **Retry**: exponential backoff with jitter for retriable failures
//! - **Circuit breaking**: per-service fail-fast after sustained failures
//! - **Token caching**: one authentication per service per validity window
//! - **Sequential orchestration**: continue, skip or abort after each stage
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ledgerflow::prelude::*;
//!
//! let services = WorkflowServices::try_build(|kind| wrap(kind))?;
//! let stages = weekly_pipeline(&services, &config.workflow);
//! let ctx = StageOrchestrator::new("weekly").run(&stages).await;
//! println!("{}", RunReport::from_context(&ctx).to_json()?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod services;
pub mod stages;
pub mod testing;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{LedgerflowConfig, ServiceEndpoint, WorkflowConfig};
    pub use crate::context::PipelineContext;
    pub use crate::core::{RunStatus, StageStatus};
    pub use crate::errors::{CallError, ConfigError, ErrorKind, LedgerflowError, ServiceError};
    pub use crate::pipeline::{RunReport, StageOrchestrator};
    pub use crate::resilience::{
        AuthTokenCache, BreakerConfig, CircuitBreakerRegistry, ResilientService, RetryConfig,
        RetryPolicy,
    };
    pub use crate::services::{ServiceClient, ServiceKind, Token};
    pub use crate::stages::{ErrorDetail, FnStage, Stage, StageResult};
    pub use crate::workflow::{weekly_pipeline, WorkflowServices};
}
