//! Job identity and lifecycle
//!
//! A job walks `Created -> Staged -> Probed -> Planned -> Encoding(pass 1) ->
//! Encoding(pass 2) -> Completed`. `Failed` is reachable from every
//! non-terminal state. Anything else is rejected.

use crate::encode::{EncodeError, Pass};
use crate::probe::{MediaProfile, ProbeError};
use crate::rate_plan::{EncodePlan, RatePlanError};
use crate::workspace::WorkspaceError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Opaque job identifier, unique per submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Job state representing the current stage in the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Created,
    /// Input bytes written to the workspace
    Staged,
    /// Media profile read from the staged input
    Probed,
    /// Encode plan computed
    Planned,
    /// An encoder pass is running
    Encoding(Pass),
    Completed,
    Failed(String),
}

impl JobState {
    /// Convert state to string for metrics
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Created => "created",
            JobState::Staged => "staged",
            JobState::Probed => "probed",
            JobState::Planned => "planned",
            JobState::Encoding(Pass::Analysis) => "encoding_pass_1",
            JobState::Encoding(Pass::Final) => "encoding_pass_2",
            JobState::Completed => "completed",
            JobState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed(_))
    }

    pub fn can_transition_to(&self, next: &JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Created, Staged)
            | (Staged, Probed)
            | (Probed, Planned)
            | (Planned, Encoding(Pass::Analysis))
            | (Encoding(Pass::Analysis), Encoding(Pass::Final))
            | (Encoding(Pass::Final), Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse error category, used for status mapping and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// The caller sent something that cannot be compressed
    InputValidation,
    Probe,
    Encode,
    Workspace,
    Cancelled,
    /// Lifecycle bug; never caused by input
    Internal,
}

/// Error type for job execution operations
#[derive(Debug, Error)]
pub enum JobError {
    /// Request rejected before or during planning
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Metadata extraction failed
    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// Target size cannot be turned into a usable bitrate
    #[error("Cannot plan encode: {0}")]
    Plan(#[from] RatePlanError),

    /// An encoder pass failed
    #[error(transparent)]
    Encode(EncodeError),

    /// Workspace I/O failed
    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// The caller went away before the job finished
    #[error("Job was cancelled")]
    Cancelled,

    #[error("Illegal job transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },
}

impl From<EncodeError> for JobError {
    fn from(err: EncodeError) -> Self {
        if err.is_cancelled() {
            JobError::Cancelled
        } else {
            JobError::Encode(err)
        }
    }
}

impl JobError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            JobError::InputValidation(_) | JobError::Plan(_) => JobErrorKind::InputValidation,
            JobError::Probe(e) if e.is_input_fault() => JobErrorKind::InputValidation,
            JobError::Probe(_) => JobErrorKind::Probe,
            JobError::Encode(_) => JobErrorKind::Encode,
            JobError::Workspace(_) => JobErrorKind::Workspace,
            JobError::Cancelled => JobErrorKind::Cancelled,
            JobError::IllegalTransition { .. } => JobErrorKind::Internal,
        }
    }
}

/// One compression request moving through the pipeline
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    state: JobState,
    input: Option<PathBuf>,
    profile: Option<MediaProfile>,
    plan: Option<EncodePlan>,
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            state: JobState::Created,
            input: None,
            profile: None,
            plan: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn input(&self) -> Option<&PathBuf> {
        self.input.as_ref()
    }

    pub fn profile(&self) -> Option<&MediaProfile> {
        self.profile.as_ref()
    }

    pub fn plan(&self) -> Option<&EncodePlan> {
        self.plan.as_ref()
    }

    fn transition(&mut self, next: JobState) -> Result<(), JobError> {
        if !self.state.can_transition_to(&next) {
            return Err(JobError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(job_id = %self.id, from = %self.state, to = %next, "Job transition");
        self.state = next;
        Ok(())
    }

    pub fn staged(&mut self, input: PathBuf) -> Result<(), JobError> {
        self.transition(JobState::Staged)?;
        self.input = Some(input);
        Ok(())
    }

    pub fn probed(&mut self, profile: MediaProfile) -> Result<(), JobError> {
        if self.input.is_none() {
            return Err(self.missing("staged input", JobState::Probed));
        }
        self.transition(JobState::Probed)?;
        self.profile = Some(profile);
        Ok(())
    }

    pub fn planned(&mut self, plan: EncodePlan) -> Result<(), JobError> {
        if self.profile.is_none() {
            return Err(self.missing("media profile", JobState::Planned));
        }
        self.transition(JobState::Planned)?;
        self.plan = Some(plan);
        Ok(())
    }

    pub fn encoding(&mut self, pass: Pass) -> Result<(), JobError> {
        if self.plan.is_none() {
            return Err(self.missing("encode plan", JobState::Encoding(pass)));
        }
        self.transition(JobState::Encoding(pass))
    }

    pub fn completed(&mut self) -> Result<(), JobError> {
        self.transition(JobState::Completed)
    }

    /// Mark the job failed; a job that already finished keeps its state
    pub fn failed(&mut self, reason: impl Into<String>) {
        let next = JobState::Failed(reason.into());
        if self.state.can_transition_to(&next) {
            self.state = next;
        }
    }

    fn missing(&self, what: &str, to: JobState) -> JobError {
        JobError::IllegalTransition {
            from: format!("{} (no {})", self.state, what),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::sample_profile;

    fn sample_plan() -> EncodePlan {
        EncodePlan {
            target_bitrate_bps: 1_000_000,
            max_bitrate_bps: 1_500_000,
            buffer_size_bits: 2_000_000,
            preserve_aspect_ratio: true,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new(JobId::new());
        assert_eq!(job.state(), &JobState::Created);

        job.staged(PathBuf::from("/w/input.mp4")).unwrap();
        job.probed(sample_profile()).unwrap();
        job.planned(sample_plan()).unwrap();
        job.encoding(Pass::Analysis).unwrap();
        assert_eq!(job.state().as_str(), "encoding_pass_1");
        job.encoding(Pass::Final).unwrap();
        job.completed().unwrap();

        assert_eq!(job.state(), &JobState::Completed);
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_skipping_ahead_is_rejected() {
        let mut job = Job::new(JobId::new());
        assert!(matches!(
            job.completed(),
            Err(JobError::IllegalTransition { .. })
        ));

        job.staged(PathBuf::from("/w/input.mp4")).unwrap();
        assert!(job.encoding(Pass::Analysis).is_err());
        assert_eq!(job.state(), &JobState::Staged);
    }

    #[test]
    fn test_pass_two_requires_pass_one() {
        let mut job = Job::new(JobId::new());
        job.staged(PathBuf::from("/w/input.mp4")).unwrap();
        job.probed(sample_profile()).unwrap();
        job.planned(sample_plan()).unwrap();

        assert!(job.encoding(Pass::Final).is_err());
    }

    #[test]
    fn test_failed_from_any_non_terminal_state() {
        let mut job = Job::new(JobId::new());
        job.staged(PathBuf::from("/w/input.mp4")).unwrap();
        job.failed("probe exploded");
        assert_eq!(job.state(), &JobState::Failed("probe exploded".to_string()));

        // terminal states stay put
        job.failed("again");
        assert_eq!(job.state(), &JobState::Failed("probe exploded".to_string()));
        assert!(!JobState::Completed.can_transition_to(&JobState::Failed(String::new())));
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = JobId::new();
        let b = JobId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            JobError::InputValidation("empty".into()).kind(),
            JobErrorKind::InputValidation
        );
        assert_eq!(
            JobError::Probe(ProbeError::NoVideoStream).kind(),
            JobErrorKind::InputValidation
        );
        assert_eq!(
            JobError::Probe(ProbeError::FfprobeFailed("boom".into())).kind(),
            JobErrorKind::Probe
        );
        assert_eq!(
            JobError::Plan(RatePlanError::InvalidDuration(0.0)).kind(),
            JobErrorKind::InputValidation
        );
        assert_eq!(JobError::Cancelled.kind(), JobErrorKind::Cancelled);
    }

    #[test]
    fn test_cancelled_encode_becomes_cancelled_job() {
        let err: JobError = EncodeError {
            pass: Pass::Final,
            failure: crate::encode::EngineFailure::Cancelled,
        }
        .into();
        assert!(matches!(err, JobError::Cancelled));

        let err: JobError = EncodeError {
            pass: Pass::Analysis,
            failure: crate::encode::EngineFailure::Exited {
                code: 1,
                stderr: String::new(),
            },
        }
        .into();
        assert_eq!(err.kind(), JobErrorKind::Encode);
    }
}
