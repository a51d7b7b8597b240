//! Job submission API surface.
//!
//! The orchestrator never talks to a concrete backend; it drives a [`JobApi`]
//! implementation. The trait is object-safe so the same readiness loop runs
//! against a real HTTP client or an in-memory stub.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobApiError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

/// A created processing job as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a verification call.
///
/// `Pending` means the backend accepted the job but has not confirmed the
/// upload yet; readiness holds at the plateau until it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Verified,
    Pending,
}

/// Backend operations the readiness orchestrator depends on.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit the capture payload and create a processing job.
    async fn create_job(&self, payload: &[u8]) -> Result<JobRecord, JobApiError>;

    /// Verify that the payload for `job_id` landed intact.
    async fn verify(&self, job_id: &str) -> Result<JobStatus, JobApiError>;
}
