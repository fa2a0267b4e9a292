//! Per-role mailboxes for asynchronous directives and completion notices.
//!
//! Each recipient has an append-only JSON log at
//! `{state_dir}/mailbox/{role}.json`, rewritten wholesale on change (same
//! batch discipline as the ledger: multiple events can fire for one logical
//! action, so every operation is read-whole -> mutate -> write-whole).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DelegationError, PersistenceError};
use crate::orchestration::roles::RoleRegistry;

/// One mailbox message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: String,
    pub content: String,
    /// RFC 3339 timestamp.
    pub at: String,
    pub read: bool,
}

/// Per-recipient message counts for status displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxSummary {
    pub total: usize,
    pub unread: usize,
}

pub struct MailboxStore {
    dir: PathBuf,
}

impl MailboxStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("mailbox"),
        }
    }

    fn path_for(&self, recipient: &str) -> PathBuf {
        self.dir.join(format!("{recipient}.json"))
    }

    fn load(&self, recipient: &str) -> Vec<Message> {
        match std::fs::read_to_string(self.path_for(recipient)) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(recipient, error = %e, "Corrupt mailbox, starting empty");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    fn store(&self, recipient: &str, messages: &[Message]) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let json = serde_json::to_string_pretty(messages).map_err(|e| {
            PersistenceError::Encode {
                what: format!("mailbox {recipient}"),
                message: e.to_string(),
            }
        })?;
        let path = self.path_for(recipient);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| PersistenceError::Io { path, source: e })
    }

    /// Append a message to the recipient's log. The recipient must be a
    /// known role.
    pub fn send(
        &self,
        roles: &RoleRegistry,
        from: &str,
        to: &str,
        content: &str,
    ) -> Result<(), DelegationError> {
        if !roles.is_known(to) {
            return Err(DelegationError::RoleNotFound {
                role: to.to_string(),
            });
        }

        let mut messages = self.load(to);
        messages.push(Message {
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            at: chrono::Utc::now().to_rfc3339(),
            read: false,
        });
        self.store(to, &messages)?;
        tracing::debug!(from, to, "Mailbox message sent");
        Ok(())
    }

    /// Return all unread messages for a recipient and mark them read, in
    /// one read-modify-write pass.
    pub fn receive_unread(&self, recipient: &str) -> Result<Vec<Message>, PersistenceError> {
        let mut messages = self.load(recipient);
        let unread: Vec<Message> = messages.iter().filter(|m| !m.read).cloned().collect();
        if unread.is_empty() {
            return Ok(unread);
        }
        for message in &mut messages {
            message.read = true;
        }
        self.store(recipient, &messages)?;
        Ok(unread)
    }

    /// Total/unread counts per recipient with a mailbox on disk.
    pub fn list_summary(&self) -> BTreeMap<String, MailboxSummary> {
        let mut summary = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return summary;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(recipient) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let messages = self.load(recipient);
            summary.insert(
                recipient.to_string(),
                MailboxSummary {
                    total: messages.len(),
                    unread: messages.iter().filter(|m| !m.read).count(),
                },
            );
        }
        summary
    }
}
