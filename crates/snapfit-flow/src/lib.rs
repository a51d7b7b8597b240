//! snapfit-flow — backend-facing half of the pipeline.
//!
//! Job submission API, readiness orchestration, and environment
//! configuration.

pub mod config;
pub mod job;
pub mod readiness;

pub use config::FlowConfig;
pub use job::{JobApi, JobApiError, JobRecord, JobStatus};
pub use readiness::{Orchestrator, Readiness, ReadyJob, Stage};
