//! The phase ledger: canonical in-memory snapshot plus its file store.
//!
//! Callers follow a batch discipline: one `load()`, any number of `apply_*`
//! mutations on the snapshot, one `save()`. Each `save()` rewrites the whole
//! snapshot in a single atomic step (temp file + rename) -- partial field
//! writes are how concurrent hook firings lose updates.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::feature::{ArchiveInfo, Feature, PhaseTransition, TransitionSource};
use super::normalize::{normalize, LedgerFile};
use super::phase::{DocKind, Phase};
use crate::error::PersistenceError;

/// Canonical in-memory ledger snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct Ledger {
    pub version: u32,
    pub features: BTreeMap<String, Feature>,
    /// Ordered, duplicate-free list of features currently being worked.
    pub active: Vec<String>,
    /// Optional pointer into `active`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    /// Capped transition log, newest last.
    pub history: VecDeque<PhaseTransition>,
    /// Opaque metadata from other ledger producers, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_meta: Option<serde_json::Value>,
}

impl Ledger {
    pub const CURRENT_VERSION: u32 = 2;

    pub fn empty() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            features: BTreeMap::new(),
            active: Vec::new(),
            primary: None,
            history: VecDeque::new(),
            session_meta: None,
            pipeline_meta: None,
        }
    }

    /// Look up a feature, creating it (and activating it) on first reference.
    pub fn ensure_feature(&mut self, name: &str) -> &mut Feature {
        if !self.active.iter().any(|n| n == name) {
            self.active.push(name.to_string());
        }
        self.features
            .entry(name.to_string())
            .or_insert_with(|| Feature::new(name))
    }

    /// Resolve a feature name from an explicit argument or ambient context:
    /// the primary pointer, or the sole active feature.
    pub fn resolve_feature_name(&self, explicit: Option<&str>) -> Option<String> {
        if let Some(name) = explicit {
            if !name.trim().is_empty() {
                return Some(name.trim().to_string());
            }
        }
        if let Some(primary) = &self.primary {
            return Some(primary.clone());
        }
        if self.active.len() == 1 {
            return Some(self.active[0].clone());
        }
        None
    }

    /// Apply a phase transition proposed by `source`.
    ///
    /// Returns the resolved feature name, or `None` when no feature name
    /// could be resolved from context. The guard rules:
    /// - Automated signals may never reduce the rank; a regression proposal
    ///   leaves the feature untouched (any accompanying document is recorded
    ///   separately via [`Ledger::apply_document`]).
    /// - Manual transitions may move backward freely (archive/reopen), and
    ///   may jump forward more than one rank only when `force` is set.
    pub fn apply_phase_transition(
        &mut self,
        feature: Option<&str>,
        phase: Phase,
        source: TransitionSource,
    ) -> Option<String> {
        let name = self.resolve_feature_name(feature)?;
        let record = self.ensure_feature(&name);
        let current = record.phase;

        let allowed = match source {
            TransitionSource::Automated => phase.rank() >= current.rank(),
            TransitionSource::Manual { force } => {
                phase.rank() <= current.rank() || force || phase.rank() - current.rank() <= 1
            }
        };

        if !allowed {
            tracing::warn!(
                feature = %name,
                from = %current,
                to = %phase,
                ?source,
                "Rejected phase transition"
            );
            return Some(name);
        }

        if phase != current {
            record.phase = phase;
            record.phase_rank = phase.rank();
            record.touch();
            self.push_history(PhaseTransition {
                feature: name.clone(),
                from: current,
                to: phase,
                source: match source {
                    TransitionSource::Automated => "automated".to_string(),
                    TransitionSource::Manual { .. } => "manual".to_string(),
                },
                at: chrono::Utc::now().to_rfc3339(),
            });
            tracing::info!(feature = %name, from = %current, to = %phase, "Phase transition");
        }

        Some(name)
    }

    /// Record a document path for a feature. Returns the resolved name.
    pub fn apply_document(
        &mut self,
        feature: Option<&str>,
        kind: DocKind,
        path: &str,
    ) -> Option<String> {
        let name = self.resolve_feature_name(feature)?;
        let record = self.ensure_feature(&name);
        record
            .documents
            .insert(kind.as_str().to_string(), path.to_string());
        record.touch();
        Some(name)
    }

    /// Update match-rate and/or iteration metrics. Returns the resolved name.
    pub fn apply_metrics(
        &mut self,
        feature: Option<&str>,
        match_rate: Option<u8>,
        iterations: Option<u32>,
    ) -> Option<String> {
        let name = self.resolve_feature_name(feature)?;
        let record = self.ensure_feature(&name);
        if let Some(rate) = match_rate {
            record.match_rate = Some(rate.min(100));
        }
        if let Some(count) = iterations {
            record.iterations = count;
        }
        record.touch();
        Some(name)
    }

    /// Record an evaluator's verdict for a phase.
    ///
    /// Evaluation is advisory: an unparseable or missing score is treated as
    /// a pass (100) so that a broken evaluator can never block the workflow.
    pub fn record_evaluation(&mut self, feature: Option<&str>, phase: Phase, raw: Option<&str>) {
        let Some(name) = self.resolve_feature_name(feature) else {
            return;
        };
        let score = raw.and_then(parse_evaluation_score).unwrap_or_else(|| {
            tracing::debug!(feature = %name, phase = %phase, "Evaluator result missing or unparseable, treating as pass");
            100
        });
        let record = self.ensure_feature(&name);
        record
            .evaluations
            .insert(phase.as_str().to_string(), score.min(100));
        record.touch();
    }

    /// Archive a feature: phase moves to `archived`, the feature leaves the
    /// active list, and the primary pointer is cleared if it pointed here.
    pub fn archive_feature(&mut self, name: &str, reason: Option<&str>) {
        let record = self.ensure_feature(name);
        let from = record.phase;
        record.phase = Phase::Archived;
        record.phase_rank = Phase::Archived.rank();
        record.archive = Some(ArchiveInfo {
            archived_at: chrono::Utc::now().to_rfc3339(),
            reason: reason.map(str::to_string),
        });
        record.touch();

        self.active.retain(|n| n != name);
        if self.primary.as_deref() == Some(name) {
            self.primary = None;
        }
        if from != Phase::Archived {
            self.push_history(PhaseTransition {
                feature: name.to_string(),
                from,
                to: Phase::Archived,
                source: "manual".to_string(),
                at: chrono::Utc::now().to_rfc3339(),
            });
        }
    }

    /// Delete oldest-archived features until at most `max_features` remain.
    /// Only archived features are ever deleted.
    pub fn evict_archived(&mut self, max_features: usize) {
        while self.features.len() > max_features {
            let oldest = self
                .features
                .values()
                .filter_map(|f| f.archive.as_ref().map(|a| (a.archived_at.clone(), f.name.clone())))
                .min();
            match oldest {
                Some((_, name)) => {
                    tracing::debug!(feature = %name, "Evicting archived feature");
                    self.features.remove(&name);
                }
                None => break,
            }
        }
    }

    /// Point the primary marker at an active feature.
    /// Returns false (and changes nothing) if the feature is not active.
    pub fn set_primary(&mut self, name: &str) -> bool {
        if self.active.iter().any(|n| n == name) {
            self.primary = Some(name.to_string());
            true
        } else {
            false
        }
    }

    fn push_history(&mut self, entry: PhaseTransition) {
        self.history.push_back(entry);
        // Store-level cap is applied on load; this inline cap keeps a
        // long-running process bounded between saves.
        while self.history.len() > 1000 {
            self.history.pop_front();
        }
    }
}

fn parse_evaluation_score(raw: &str) -> Option<u8> {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u8>() {
        return Some(n);
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    match &value {
        serde_json::Value::Number(n) => n.as_u64().map(|n| n.min(100) as u8),
        serde_json::Value::Object(map) => map
            .get("score")
            .and_then(|s| s.as_u64())
            .map(|n| n.min(100) as u8),
        _ => None,
    }
}

/// File-backed store for the ledger: one JSON snapshot per project.
pub struct LedgerStore {
    path: PathBuf,
    history_cap: usize,
    max_features: usize,
}

impl LedgerStore {
    pub fn new(state_dir: &Path, history_cap: usize, max_features: usize) -> Self {
        Self {
            path: state_dir.join("ledger.json"),
            history_cap,
            max_features,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and normalize the on-disk snapshot. A missing file yields an
    /// empty ledger; a corrupt file is a hard error (silent loss of phase
    /// state breaks resumability).
    pub fn load(&self) -> Result<Ledger, PersistenceError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Ledger::empty());
            }
            Err(e) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let file: LedgerFile =
            serde_json::from_str(&raw).map_err(|e| PersistenceError::Decode {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        Ok(normalize(file, self.history_cap))
    }

    /// Persist the whole snapshot in one atomic write (temp file + rename).
    ///
    /// Applies the archived-feature eviction bound before writing. Failures
    /// here are escalated loudly by logging at error level and propagating.
    pub fn save(&self, ledger: &mut Ledger) -> Result<(), PersistenceError> {
        ledger.evict_archived(self.max_features);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let json =
            serde_json::to_string_pretty(ledger).map_err(|e| PersistenceError::Encode {
                what: "ledger".to_string(),
                message: e.to_string(),
            })?;

        let tmp = self.path.with_extension("json.tmp");
        let write_result = std::fs::write(&tmp, json.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &self.path));

        if let Err(e) = write_result {
            tracing::error!(path = %self.path.display(), error = %e, "Ledger write failed; phase state NOT saved");
            return Err(PersistenceError::Io {
                path: self.path.clone(),
                source: e,
            });
        }
        Ok(())
    }
}
