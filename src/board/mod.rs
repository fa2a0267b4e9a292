//! Shared task board: a dependency graph of discrete work items.
//!
//! Independent of the phase ledger. Items block each other via `blocked_by`
//! id sets; completing an item sweeps its id out of every other item's set,
//! and each pending item whose set drains to empty produces exactly one
//! mailbox notification to the coordinating role. The whole board is
//! persisted in one write per logical operation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::orchestration::roles::RoleRegistry;
use crate::team::MailboxStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One discrete work item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoardItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Ids of items that must complete before this one may be assigned.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blocked_by: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// In-memory snapshot of the board.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Board {
    pub items: BTreeMap<String, BoardItem>,
}

impl Board {
    /// Add a new item. Assigning at creation is rejected while blockers
    /// exist.
    pub fn create(
        &mut self,
        title: &str,
        description: Option<&str>,
        blocked_by: BTreeSet<String>,
        assignee: Option<&str>,
    ) -> Result<String, String> {
        if assignee.is_some() && !blocked_by.is_empty() {
            return Err("a blocked item cannot be assigned".to_string());
        }
        for blocker in &blocked_by {
            if !self.items.contains_key(blocker) {
                return Err(format!("unknown blocking item: {blocker}"));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.items.insert(
            id.clone(),
            BoardItem {
                id: id.clone(),
                title: title.to_string(),
                description: description.unwrap_or_default().to_string(),
                status: ItemStatus::Pending,
                assignee: assignee.map(str::to_string),
                blocked_by,
                result: None,
                created_at: now.clone(),
                updated_at: now,
            },
        );
        Ok(id)
    }

    /// Update status and/or assignee. Assignment to a blocked item is
    /// rejected.
    pub fn update(
        &mut self,
        id: &str,
        status: Option<ItemStatus>,
        assignee: Option<&str>,
    ) -> Result<(), String> {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| format!("unknown item: {id}"))?;

        if assignee.is_some() && !item.blocked_by.is_empty() {
            return Err(format!(
                "item {id} is blocked by {} item(s) and cannot be assigned",
                item.blocked_by.len()
            ));
        }

        if let Some(status) = status {
            item.status = status;
        }
        if let Some(assignee) = assignee {
            item.assignee = Some(assignee.to_string());
        }
        item.updated_at = chrono::Utc::now().to_rfc3339();
        Ok(())
    }

    /// Complete an item and sweep it out of every `blocked_by` set.
    ///
    /// Returns the ids of items that became unblocked (empty `blocked_by`)
    /// while still pending -- each of those owes the coordinator exactly
    /// one notification.
    pub fn complete(&mut self, id: &str, result: Option<&str>) -> Result<Vec<String>, String> {
        let item = self
            .items
            .get_mut(id)
            .ok_or_else(|| format!("unknown item: {id}"))?;
        item.status = ItemStatus::Completed;
        item.result = result.map(str::to_string);
        item.updated_at = chrono::Utc::now().to_rfc3339();

        let mut unblocked = Vec::new();
        for other in self.items.values_mut() {
            if other.blocked_by.remove(id)
                && other.blocked_by.is_empty()
                && other.status == ItemStatus::Pending
            {
                unblocked.push(other.id.clone());
            }
        }
        Ok(unblocked)
    }
}

/// File-backed store for the board, wired to the mailbox for unblock
/// notifications.
pub struct BoardStore {
    path: PathBuf,
}

impl BoardStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("board.json"),
        }
    }

    pub fn load(&self) -> Board {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt task board, starting empty");
                Board::default()
            }),
            Err(_) => Board::default(),
        }
    }

    pub fn save(&self, board: &Board) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(board).map_err(|e| PersistenceError::Encode {
            what: "task board".to_string(),
            message: e.to_string(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| PersistenceError::Io {
                path: self.path.clone(),
                source: e,
            })
    }

    /// Complete an item, persist the board once, and notify the coordinator
    /// about every newly unblocked pending item.
    ///
    /// Notification failures are bookkeeping: logged, never propagated.
    pub fn complete_item(
        &self,
        id: &str,
        result: Option<&str>,
        mailbox: &MailboxStore,
        roles: &RoleRegistry,
        coordinator: &str,
    ) -> Result<Vec<String>, PersistenceError> {
        let mut board = self.load();
        let unblocked = board
            .complete(id, result)
            .map_err(PersistenceError::NotFound)?;
        self.save(&board)?;

        for unblocked_id in &unblocked {
            let title = board
                .items
                .get(unblocked_id)
                .map(|i| i.title.clone())
                .unwrap_or_default();
            if let Err(e) = mailbox.send(
                roles,
                "board",
                coordinator,
                &format!("Task '{title}' ({unblocked_id}) is no longer blocked"),
            ) {
                tracing::debug!(item = %unblocked_id, error = %e, "Unblock notification failed");
            }
        }
        Ok(unblocked)
    }
}
