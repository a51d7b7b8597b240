//! Readiness orchestration for a submitted capture.
//!
//! Progress accrues on a timer while the backend round trips run
//! concurrently. The state machine is deterministic and synchronous; the
//! async driver feeds it ticks and backend events. Two rules it enforces:
//! create and verify each happen at most once, and the `Ready` transition
//! fires exactly once, only after progress reaches 100 with the upload
//! verified.

use crate::config::FlowConfig;
use crate::job::{JobApi, JobStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Where a job stands on its way to `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No job id yet; the create call is in flight.
    AwaitingJob,
    /// Job exists; the verification call is in flight.
    AwaitingVerify,
    /// Verified (or degraded); progress is climbing to 100.
    Polling,
    /// Terminal. Fires exactly once.
    Ready,
}

/// Result handed back when the orchestrator completes.
#[derive(Debug, Clone)]
pub struct ReadyJob {
    pub job_id: String,
    /// True when a backend call failed and the flow continued on the
    /// degraded path (local job id or forced verification).
    pub degraded: bool,
}

/// Deterministic readiness state. All transitions are synchronous so tests
/// drive it without a runtime.
#[derive(Debug)]
pub struct Readiness {
    plateau: f32,
    progress: f32,
    verified: bool,
    degraded: bool,
    job_id: Option<String>,
    create_recorded: bool,
    verify_recorded: bool,
    stage: Stage,
    history: Vec<Stage>,
}

impl Readiness {
    pub fn new(plateau: f32) -> Self {
        Self {
            plateau,
            progress: 0.0,
            verified: false,
            degraded: false,
            job_id: None,
            create_recorded: false,
            verify_recorded: false,
            stage: Stage::AwaitingJob,
            history: vec![Stage::AwaitingJob],
        }
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Stages visited so far, in order, starting with `AwaitingJob`.
    pub fn stage_history(&self) -> &[Stage] {
        &self.history
    }

    fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.history.push(stage);
    }

    /// Record the backend job id. Later create outcomes are ignored.
    pub fn record_job(&mut self, id: impl Into<String>) {
        if self.create_recorded {
            return;
        }
        self.create_recorded = true;
        self.job_id = Some(id.into());
        if self.stage == Stage::AwaitingJob {
            self.set_stage(Stage::AwaitingVerify);
        }
    }

    /// Create failed: mint a local fallback id and keep going.
    pub fn record_create_failure(&mut self) {
        if self.create_recorded {
            return;
        }
        let fallback = format!("local-{}", Uuid::new_v4());
        tracing::warn!(job_id = %fallback, "job creation failed, continuing with local id");
        self.degraded = true;
        self.record_job(fallback);
    }

    /// Record the verification outcome. Later outcomes are ignored.
    pub fn record_verified(&mut self, status: JobStatus) {
        if self.verify_recorded {
            return;
        }
        self.verify_recorded = true;
        self.verified = status == JobStatus::Verified;
        if self.verified && self.stage == Stage::AwaitingVerify {
            self.set_stage(Stage::Polling);
        }
    }

    /// Verification failed: treat the upload as verified so the flow is not
    /// stranded at the plateau.
    pub fn record_verify_failure(&mut self) {
        if self.verify_recorded {
            return;
        }
        tracing::warn!("verification failed, continuing as verified");
        self.degraded = true;
        self.record_verified(JobStatus::Verified);
    }

    /// One progress tick. Unverified progress holds at the plateau; verified
    /// progress crossing 100 clamps to 100 and fires `Ready` exactly once.
    /// Returns true on the tick that fired it.
    pub fn advance(&mut self, increment: f32) -> bool {
        if self.stage == Stage::Ready {
            return false;
        }
        self.progress += increment.max(0.0);
        if !self.verified {
            self.progress = self.progress.min(self.plateau);
            return false;
        }
        if self.progress >= 100.0 {
            self.progress = 100.0;
            self.set_stage(Stage::Ready);
            return true;
        }
        false
    }
}

enum BackendEvent {
    Created(Result<String, crate::job::JobApiError>),
    Verified(Result<JobStatus, crate::job::JobApiError>),
}

/// Drives a [`Readiness`] against a [`JobApi`] until `Ready`.
pub struct Orchestrator {
    api: Arc<dyn JobApi>,
    config: FlowConfig,
}

impl Orchestrator {
    pub fn new(api: Arc<dyn JobApi>, config: FlowConfig) -> Self {
        Self { api, config }
    }

    /// Submit `payload` and run the readiness loop to completion.
    ///
    /// Never returns an error: every backend failure degrades the flow
    /// instead of aborting it. Completion requires a verification outcome,
    /// so a backend that answers `Pending` holds the loop at the plateau.
    pub async fn run(&self, payload: Vec<u8>) -> ReadyJob {
        let (tx, mut rx) = mpsc::channel::<BackendEvent>(2);
        let api = self.api.clone();
        tokio::spawn(async move {
            let created = api.create_job(&payload).await.map(|job| job.id);
            let id = match &created {
                Ok(id) => id.clone(),
                // Verification target mirrors the fallback the state
                // machine will mint; the call is expected to degrade too.
                Err(_) => String::new(),
            };
            let create_failed = created.is_err();
            if tx.send(BackendEvent::Created(created)).await.is_err() {
                return;
            }
            let verified = if create_failed {
                Ok(JobStatus::Verified)
            } else {
                api.verify(&id).await
            };
            let _ = tx.send(BackendEvent::Verified(verified)).await;
        });

        let mut state = Readiness::new(self.config.plateau);
        let mut interval = tokio::time::interval(self.config.tick_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let increment = rand::random::<f32>() * self.config.max_increment;
                    if state.advance(increment) {
                        break;
                    }
                }
                Some(event) = rx.recv() => match event {
                    BackendEvent::Created(Ok(id)) => {
                        tracing::info!(job_id = %id, "job created");
                        state.record_job(id);
                    }
                    BackendEvent::Created(Err(e)) => {
                        tracing::warn!(error = %e, "create_job failed");
                        state.record_create_failure();
                    }
                    BackendEvent::Verified(Ok(status)) => {
                        tracing::debug!(?status, "verification answered");
                        state.record_verified(status);
                    }
                    BackendEvent::Verified(Err(e)) => {
                        tracing::warn!(error = %e, "verification failed");
                        state.record_verify_failure();
                    }
                },
            }
        }

        let job_id = state
            .job_id()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));
        ReadyJob {
            job_id,
            degraded: state.is_degraded(),
        }
    }
}
