//! Feature records and phase-transition history entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::phase::Phase;

/// A named unit of work tracked through the PDCA phases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feature {
    /// Unique key within the ledger.
    pub name: String,
    /// Current phase.
    pub phase: Phase,
    /// Numeric mirror of `phase` -- re-derived on every load, persisted for
    /// consumers that only read the JSON.
    pub phase_rank: u8,
    /// Requirement match rate, 0-100.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_rate: Option<u8>,
    /// Number of check/act iterations performed so far.
    pub iterations: u32,
    /// Document kind ("plan", "design", ...) -> workspace-relative path.
    pub documents: BTreeMap<String, String>,
    /// Evaluation score per phase name, 0-100.
    pub evaluations: BTreeMap<String, u8>,
    /// RFC 3339 creation timestamp.
    pub started_at: String,
    /// RFC 3339 timestamp of the last mutation.
    pub updated_at: String,
    /// Present once the feature has been archived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveInfo>,
}

impl Feature {
    /// Create a fresh feature in the research phase.
    pub fn new(name: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.to_string(),
            phase: Phase::Research,
            phase_rank: Phase::Research.rank(),
            match_rate: None,
            iterations: 0,
            documents: BTreeMap::new(),
            evaluations: BTreeMap::new(),
            started_at: now.clone(),
            updated_at: now,
            archive: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// Archive metadata recorded when a feature leaves the active set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// RFC 3339 timestamp of the archive action.
    pub archived_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Who proposed a phase transition.
///
/// Automated signals (file-convention detection) are subject to the
/// regression guard; manual transitions may move backward, and may jump
/// forward multiple ranks only with `force`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionSource {
    Automated,
    Manual { force: bool },
}

/// One entry in the ledger's capped transition history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub feature: String,
    pub from: Phase,
    pub to: Phase,
    /// "automated" or "manual".
    pub source: String,
    /// RFC 3339 timestamp.
    pub at: String,
}
