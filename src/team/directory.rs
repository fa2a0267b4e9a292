//! Team directory: the roster of active teammates and their status machine.
//!
//! Mutation is single-writer-per-call: read the full team state, mutate the
//! relevant record(s) in memory, write once. Statuses are driven exclusively
//! by orchestrator-observed events, never by the teammate itself.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::host::SessionHandle;

/// Lifecycle status of a teammate.
///
/// Transitions are one-directional (`spawning -> working -> terminal`)
/// except `working -> working`, which reassigns the current task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeammateStatus {
    Spawning,
    Working,
    Completed,
    Failed,
    Aborted,
}

impl TeammateStatus {
    fn stage(self) -> u8 {
        match self {
            TeammateStatus::Spawning => 0,
            TeammateStatus::Working => 1,
            TeammateStatus::Completed | TeammateStatus::Failed | TeammateStatus::Aborted => 2,
        }
    }

    /// Whether the status machine permits moving to `next`.
    pub fn can_transition_to(self, next: TeammateStatus) -> bool {
        if self == TeammateStatus::Working && next == TeammateStatus::Working {
            return true;
        }
        next.stage() > self.stage()
    }

    pub fn is_terminal(self) -> bool {
        self.stage() == 2
    }
}

/// One tracked role participating in the team effort.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Teammate {
    pub name: String,
    pub role: String,
    pub status: TeammateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionHandle>,
    pub created_at: String,
    pub updated_at: String,
}

/// In-memory snapshot of the whole team.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TeamState {
    pub teammates: BTreeMap<String, Teammate>,
}

impl TeamState {
    /// Look up a teammate, creating it on first reference in `spawning`.
    pub fn ensure(&mut self, name: &str, role: &str) -> &mut Teammate {
        self.teammates.entry(name.to_string()).or_insert_with(|| {
            let now = chrono::Utc::now().to_rfc3339();
            Teammate {
                name: name.to_string(),
                role: role.to_string(),
                status: TeammateStatus::Spawning,
                task: None,
                job_id: None,
                session: None,
                created_at: now.clone(),
                updated_at: now,
            }
        })
    }

    /// Advance a teammate's status, enforcing the one-directional machine.
    /// An invalid transition is logged and ignored -- observers polling
    /// mid-flight must never see a status move backward.
    pub fn set_status(&mut self, name: &str, status: TeammateStatus) {
        let Some(teammate) = self.teammates.get_mut(name) else {
            return;
        };
        if !teammate.status.can_transition_to(status) {
            tracing::warn!(
                teammate = name,
                from = ?teammate.status,
                to = ?status,
                "Ignoring invalid teammate status transition"
            );
            return;
        }
        teammate.status = status;
        teammate.updated_at = chrono::Utc::now().to_rfc3339();
    }

    /// Reset a terminal teammate back to `spawning` for a fresh delegation.
    /// A re-spawned role is a new lifecycle, not a backward transition.
    pub fn respawn(&mut self, name: &str, role: &str) -> &mut Teammate {
        if self
            .teammates
            .get(name)
            .is_some_and(|t| t.status.is_terminal())
        {
            self.teammates.remove(name);
        }
        self.ensure(name, role)
    }
}

/// File-backed store for the team directory.
pub struct TeamStore {
    path: PathBuf,
}

impl TeamStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("team.json"),
        }
    }

    /// Load the directory. Missing or unreadable state yields an empty team
    /// (the directory is bookkeeping; it must never block delegation).
    pub fn load(&self) -> TeamState {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Corrupt team directory, starting empty");
                    TeamState::default()
                }
            },
            Err(_) => TeamState::default(),
        }
    }

    /// Persist the whole team state in one write.
    pub fn save(&self, state: &TeamState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            PersistenceError::Encode {
                what: "team directory".to_string(),
                message: e.to_string(),
            }
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| PersistenceError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}
