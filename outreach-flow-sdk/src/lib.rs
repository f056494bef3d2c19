//! Shared domain types for the outreach flow engine
//!
//! This crate defines the data model moved between the orchestration engine
//! and its collaborators: prospect paths, flows, the path state machine, the
//! gate kinds for human approvals, the error taxonomy, and the traits the
//! engine consumes (`FlowStore` for persistence, `StageOperations` for the
//! slow external work performed between status writes).
//!
//! The engine itself lives in the `outreach-flow` crate.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Row id of a persisted flow
pub type FlowId = i64;
/// Row id of a persisted path
pub type PathId = i64;
/// Row id of a persisted business prospect
pub type BusinessId = i64;

/// Result alias for engine-facing operations
pub type FlowResult<T> = Result<T, FlowError>;

// ---------------------------------------------------------------------------
// Path state machine
// ---------------------------------------------------------------------------

/// Status of a single prospect path within a flow.
///
/// The status is the single source of truth for where a path is in the
/// outreach process. It only ever advances along the transitions encoded in
/// [`automatic_step`] and the two approval gates in [`GateKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStatus {
    /// Ready but not started
    Pending,
    /// Actively exploring the prospect
    ExplorationInProgress,
    /// Report is generated, pending review
    AwaitingReportApproval,
    /// Report reviewed and accepted
    ReportApproved,
    /// Drafting outreach
    OutreachGenerationInProgress,
    /// Outreach draft pending review
    AwaitingOutreachApproval,
    /// Outreach approved and ready to send
    OutreachApproved,
    /// Outreach sent successfully
    Sent,
    /// Entire process completed
    Done,
    /// General failure state, kept for manual recovery
    Failed,
    /// Reserved for a future manual-hold feature; nothing sets this today
    Paused,
}

impl PathStatus {
    /// String form used for persistence, identical to the serde names.
    pub fn as_str(&self) -> &'static str {
        match self {
            PathStatus::Pending => "Pending",
            PathStatus::ExplorationInProgress => "ExplorationInProgress",
            PathStatus::AwaitingReportApproval => "AwaitingReportApproval",
            PathStatus::ReportApproved => "ReportApproved",
            PathStatus::OutreachGenerationInProgress => "OutreachGenerationInProgress",
            PathStatus::AwaitingOutreachApproval => "AwaitingOutreachApproval",
            PathStatus::OutreachApproved => "OutreachApproved",
            PathStatus::Sent => "Sent",
            PathStatus::Done => "Done",
            PathStatus::Failed => "Failed",
            PathStatus::Paused => "Paused",
        }
    }

    /// Inverse of [`PathStatus::as_str`].
    pub fn parse(s: &str) -> Option<PathStatus> {
        Some(match s {
            "Pending" => PathStatus::Pending,
            "ExplorationInProgress" => PathStatus::ExplorationInProgress,
            "AwaitingReportApproval" => PathStatus::AwaitingReportApproval,
            "ReportApproved" => PathStatus::ReportApproved,
            "OutreachGenerationInProgress" => PathStatus::OutreachGenerationInProgress,
            "AwaitingOutreachApproval" => PathStatus::AwaitingOutreachApproval,
            "OutreachApproved" => PathStatus::OutreachApproved,
            "Sent" => PathStatus::Sent,
            "Done" => PathStatus::Done,
            "Failed" => PathStatus::Failed,
            "Paused" => PathStatus::Paused,
            _ => return None,
        })
    }

    /// Terminal states are never enqueued and never advance.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PathStatus::Done | PathStatus::Failed)
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External work performed during one automatic transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Explore,
    DraftOutreach,
    Send,
}

/// One row of the automatic transition table.
///
/// Processing a path at `from` first persists `working`, then runs `stage`,
/// then persists `completed`. A crash mid-stage therefore leaves the path at
/// an observable `working` status instead of silently losing the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutomaticStep {
    pub working: PathStatus,
    pub stage: Stage,
    pub completed: PathStatus,
}

/// The automatic transition table of the path state machine.
///
/// Returns `None` for gated, in-progress, reserved and terminal states: an
/// automatic tick on those is a no-op and the task ends without re-enqueue.
/// Both the executor's processing loop and the approval validity check are
/// derived from this single table.
pub fn automatic_step(status: PathStatus) -> Option<AutomaticStep> {
    match status {
        PathStatus::Pending => Some(AutomaticStep {
            working: PathStatus::ExplorationInProgress,
            stage: Stage::Explore,
            completed: PathStatus::AwaitingReportApproval,
        }),
        PathStatus::ReportApproved => Some(AutomaticStep {
            working: PathStatus::OutreachGenerationInProgress,
            stage: Stage::DraftOutreach,
            completed: PathStatus::AwaitingOutreachApproval,
        }),
        PathStatus::OutreachApproved => Some(AutomaticStep {
            working: PathStatus::Sent,
            stage: Stage::Send,
            completed: PathStatus::Done,
        }),
        _ => None,
    }
}

/// The two mandatory human-approval gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Report,
    Outreach,
}

impl GateKind {
    /// Status a path must hold for this gate's approval to be valid.
    pub fn expected_status(&self) -> PathStatus {
        match self {
            GateKind::Report => PathStatus::AwaitingReportApproval,
            GateKind::Outreach => PathStatus::AwaitingOutreachApproval,
        }
    }

    /// Status the path moves to once this gate is approved.
    pub fn approved_status(&self) -> PathStatus {
        match self {
            GateKind::Report => PathStatus::ReportApproved,
            GateKind::Outreach => PathStatus::OutreachApproved,
        }
    }
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateKind::Report => f.write_str("report"),
            GateKind::Outreach => f.write_str("outreach"),
        }
    }
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// Flow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    InProgress,
    Paused,
    Done,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::InProgress => "InProgress",
            FlowStatus::Paused => "Paused",
            FlowStatus::Done => "Done",
        }
    }

    pub fn parse(s: &str) -> Option<FlowStatus> {
        Some(match s {
            "InProgress" => FlowStatus::InProgress,
            "Paused" => FlowStatus::Paused,
            "Done" => FlowStatus::Done,
            _ => return None,
        })
    }
}

/// Prospect reaction recorded after an outreach was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    NoResponse,
    Interested,
    NotInterested,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::NoResponse => "no_response",
            ResponseStatus::Interested => "interested",
            ResponseStatus::NotInterested => "not_interested",
        }
    }

    pub fn parse(s: &str) -> Option<ResponseStatus> {
        Some(match s {
            "no_response" => ResponseStatus::NoResponse,
            "interested" => ResponseStatus::Interested,
            "not_interested" => ResponseStatus::NotInterested,
            _ => return None,
        })
    }
}

/// A named batch of paths sharing filters and an outreach template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub status: FlowStatus,
    /// Prospect selection criteria, owned by the import collaborator
    pub filters: Value,
    pub outreach_template: String,
    pub created_at: DateTime<Local>,
}

/// A business prospect, referenced by paths by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub website: Option<String>,
    pub category: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
}

/// The per-prospect workflow instance: one business's progress through the
/// outreach stages of one flow.
///
/// Content artifacts (`report`, `outreach_draft`) and their approval flags
/// are written only by the executor while processing this path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Path {
    pub id: PathId,
    pub business_id: BusinessId,
    pub flow_id: FlowId,
    pub status: PathStatus,
    pub report: Option<String>,
    pub report_approved: bool,
    pub outreach_draft: Option<String>,
    pub outreach_approved: bool,
    pub last_contacted_at: Option<DateTime<Local>>,
    pub response_status: Option<ResponseStatus>,
}

impl Path {
    /// A freshly created path starts at `Pending` with empty artifacts.
    pub fn new(id: PathId, business_id: BusinessId, flow_id: FlowId) -> Self {
        Self {
            id,
            business_id,
            flow_id,
            status: PathStatus::Pending,
            report: None,
            report_approved: false,
            outreach_draft: None,
            outreach_approved: false,
            last_contacted_at: None,
            response_status: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a stage collaborator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StageError(pub String);

impl StageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Typed errors surfaced by the engine's public operations.
///
/// `InvalidState` is an expected outcome under concurrent UI use (two
/// reviewers racing on the same gate), not an exceptional one; callers should
/// re-fetch path status after any failed approval.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("flow {0} not found")]
    FlowNotFound(FlowId),

    #[error("path {0} not found")]
    PathNotFound(PathId),

    #[error("path {path} is not awaiting {gate} approval (status: {status})")]
    InvalidState {
        path: PathId,
        gate: GateKind,
        status: PathStatus,
    },

    #[error("flow executor not loaded; call load() first")]
    NotLoaded,

    #[error("stage {stage:?} failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Persistence collaborator consumed by the engine.
///
/// Implementations map these calls onto whatever store they own; the engine
/// treats any error as a `PersistenceFailure` for the current attempt and
/// never retries on its own.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn find_flow(&self, id: FlowId) -> anyhow::Result<Option<Flow>>;
    async fn find_paths_by_flow(&self, flow_id: FlowId) -> anyhow::Result<Vec<Path>>;
    async fn find_path_by_id(&self, id: PathId) -> anyhow::Result<Option<Path>>;
    async fn save_path(&self, path: &Path) -> anyhow::Result<()>;
    async fn create_flow(
        &self,
        name: &str,
        filters: Value,
        outreach_template: &str,
    ) -> anyhow::Result<Flow>;
    async fn save_flow(&self, flow: &Flow) -> anyhow::Result<()>;
    async fn list_flows_by_status(&self, status: FlowStatus) -> anyhow::Result<Vec<Flow>>;
}

/// Slow external work performed while processing one automatic transition:
/// prospect exploration, outreach drafting, sending.
///
/// Implementations may take arbitrarily long or fail; the engine isolates
/// failures to the one path being processed.
#[async_trait]
pub trait StageOperations: Send + Sync {
    /// Explore/profile the prospect and produce the report text.
    async fn explore(&self, path: &Path) -> Result<String, StageError>;
    /// Draft the outreach message for an approved report.
    async fn draft_outreach(&self, path: &Path) -> Result<String, StageError>;
    /// Send the approved outreach; returns a receipt id.
    async fn send(&self, path: &Path) -> Result<String, StageError>;
}
