//! Type definitions for the delegation subsystem.
//!
//! These types form the shared vocabulary between the orchestrator, the
//! session registry, the job store, and the CLI. All persisted types derive
//! [`serde::Serialize`] so job records survive process restarts.

use serde::{Deserialize, Serialize};

use crate::host::SessionHandle;

/// Classifies a role for the delegation guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    /// Coordinates other roles; may not delegate to another orchestrator.
    Orchestrator,
    /// Performs work directly.
    Specialist,
}

/// A named agent role known to the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub kind: RoleKind,
    #[serde(default)]
    pub description: String,
    /// Model override for sessions delegated to this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Lifecycle status of a persisted delegation job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

/// Persisted record of one delegation, addressable by job id.
///
/// Rewritten wholesale on every status change. `result` holds the final or
/// partial transcript text, truncated to the configured ceiling.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub role: String,
    pub task_summary: String,
    pub handle: SessionHandle,
    /// Delegation depth of the session (parent depth + 1). Persisted so a
    /// restarted process can rebuild the registry's depth associations.
    pub depth: usize,
    /// RFC 3339 timestamps.
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A delegation request as issued by a caller.
#[derive(Clone, Debug, Default)]
pub struct DelegateRequest {
    /// Target role. May be omitted when `continue_session` names a session
    /// whose role can be recovered, or when the call is abort-only.
    pub role: Option<String>,
    /// Task text dispatched to the session.
    pub task: Option<String>,
    /// Async mode: return a job id immediately instead of waiting.
    pub background: bool,
    pub model: Option<String>,
    /// Reuse an existing session instead of creating one.
    pub continue_session: Option<SessionHandle>,
    /// Abort this session first (standalone or combined with a fresh
    /// delegation).
    pub abort_session: Option<SessionHandle>,
}

/// Identity of the caller issuing a delegation, used by the self-delegation
/// and depth guards.
#[derive(Clone, Debug, Default)]
pub struct CallerContext {
    pub role: Option<String>,
    pub session: Option<SessionHandle>,
}

/// What a `delegate` call produced.
#[derive(Clone, Debug)]
pub enum DelegateOutcome {
    /// Sync mode: the session completed and its result text was harvested.
    Completed {
        handle: SessionHandle,
        job_id: String,
        result: String,
    },
    /// Async mode, or a sync wait that degraded on timeout. The job record
    /// stays `running` until harvested.
    Background {
        handle: SessionHandle,
        job_id: String,
        /// True when a sync wait hit its ceiling and degraded.
        timed_out: bool,
    },
    /// Abort-only call, or a sync wait cancelled by the caller. Any
    /// partial transcript was persisted against the job record; the handle
    /// remains valid for a later `continue_session`.
    Aborted {
        handle: SessionHandle,
        job_id: Option<String>,
        partial: Option<String>,
    },
}
