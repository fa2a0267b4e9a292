//! On-disk ledger decoding.
//!
//! Two generations of producers have written ledger files: the v1 shape
//! uses camelCase field names (`activeFeatures`, `currentPhase`, ...), the
//! v2 shape uses the snake_case names the [`super::store::Ledger`] struct
//! serializes. Decoding accepts both via serde aliases and always upgrades
//! to the canonical in-memory shape before any business logic runs.
//! Normalizing an already-canonical ledger is a no-op (idempotent).

use std::collections::BTreeMap;
use std::collections::VecDeque;

use serde::Deserialize;

use super::feature::{ArchiveInfo, Feature, PhaseTransition};
use super::phase::Phase;
use super::store::Ledger;

/// Raw on-disk ledger shape. Every field is optional; normalization fills
/// derived defaults.
#[derive(Debug, Default, Deserialize)]
pub struct LedgerFile {
    pub version: Option<u32>,
    pub features: Option<BTreeMap<String, FeatureFile>>,
    #[serde(alias = "activeFeatures")]
    pub active: Option<Vec<String>>,
    #[serde(alias = "primaryFeature")]
    pub primary: Option<String>,
    #[serde(alias = "phaseHistory")]
    pub history: Option<Vec<serde_json::Value>>,
    #[serde(alias = "sessionMetadata")]
    pub session_meta: Option<serde_json::Value>,
    #[serde(alias = "pipelineMetadata")]
    pub pipeline_meta: Option<serde_json::Value>,
}

/// Raw on-disk feature shape (v1 aliases included).
#[derive(Debug, Default, Deserialize)]
pub struct FeatureFile {
    pub name: Option<String>,
    #[serde(alias = "currentPhase")]
    pub phase: Option<Phase>,
    #[serde(alias = "matchRate")]
    pub match_rate: Option<u8>,
    #[serde(alias = "iterationCount")]
    pub iterations: Option<u32>,
    #[serde(alias = "docs")]
    pub documents: Option<BTreeMap<String, String>>,
    #[serde(alias = "evaluationScores")]
    pub evaluations: Option<BTreeMap<String, u8>>,
    #[serde(alias = "startedAt")]
    pub started_at: Option<String>,
    #[serde(alias = "lastUpdated")]
    pub updated_at: Option<String>,
    #[serde(alias = "archiveInfo")]
    pub archive: Option<ArchiveInfo>,
    // v1 persisted a phaseRank field; the rank is always re-derived from
    // the phase, so the stored value is intentionally discarded here.
}

/// History entries are decoded leniently: entries that do not match either
/// generation's shape are skipped rather than failing the whole load.
#[derive(Debug, Deserialize)]
struct TransitionFile {
    feature: String,
    from: Phase,
    to: Phase,
    source: Option<String>,
    #[serde(alias = "timestamp")]
    at: Option<String>,
}

/// Upgrade a raw file to the canonical in-memory ledger.
///
/// - Feature names are taken from the map key (an inner `name` field, if
///   present, is overridden).
/// - `phase_rank` is re-derived from the phase.
/// - The active list is de-duplicated preserving first occurrence; names
///   without a feature record get a fresh research-phase record (features
///   are created lazily on first reference).
/// - The primary pointer is cleared unless it is a member of the active list.
/// - History is truncated to `history_cap`, keeping the newest entries.
pub fn normalize(file: LedgerFile, history_cap: usize) -> Ledger {
    let mut features: BTreeMap<String, Feature> = BTreeMap::new();
    for (key, raw) in file.features.unwrap_or_default() {
        features.insert(key.clone(), normalize_feature(&key, raw));
    }

    let mut active: Vec<String> = Vec::new();
    for name in file.active.unwrap_or_default() {
        if !active.contains(&name) {
            features
                .entry(name.clone())
                .or_insert_with(|| Feature::new(&name));
            active.push(name);
        }
    }

    let primary = file.primary.filter(|p| active.contains(p));

    let mut history: VecDeque<PhaseTransition> = file
        .history
        .unwrap_or_default()
        .into_iter()
        .filter_map(|entry| {
            serde_json::from_value::<TransitionFile>(entry).ok().map(|t| PhaseTransition {
                feature: t.feature,
                from: t.from,
                to: t.to,
                source: t.source.unwrap_or_else(|| "manual".to_string()),
                at: t.at.unwrap_or_default(),
            })
        })
        .collect();
    while history.len() > history_cap {
        history.pop_front();
    }

    Ledger {
        version: Ledger::CURRENT_VERSION,
        features,
        active,
        primary,
        history,
        session_meta: file.session_meta,
        pipeline_meta: file.pipeline_meta,
    }
}

fn normalize_feature(key: &str, raw: FeatureFile) -> Feature {
    let phase = raw.phase.unwrap_or(Phase::Research);
    let now = chrono::Utc::now().to_rfc3339();
    Feature {
        name: key.to_string(),
        phase,
        phase_rank: phase.rank(),
        match_rate: raw.match_rate.map(|r| r.min(100)),
        iterations: raw.iterations.unwrap_or(0),
        documents: raw.documents.unwrap_or_default(),
        evaluations: raw
            .evaluations
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.min(100)))
            .collect(),
        started_at: raw.started_at.unwrap_or_else(|| now.clone()),
        updated_at: raw.updated_at.unwrap_or(now),
        archive: raw.archive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(json: &str) -> Ledger {
        let file: LedgerFile = serde_json::from_str(json).expect("decode");
        normalize(file, 100)
    }

    #[test]
    fn v1_camel_case_fields_upgrade() {
        let ledger = decode(
            r#"{
                "version": 1,
                "features": {
                    "login": {
                        "currentPhase": "design",
                        "matchRate": 85,
                        "iterationCount": 2,
                        "docs": {"plan": "docs/plans/login.md"},
                        "startedAt": "2026-01-01T00:00:00Z",
                        "lastUpdated": "2026-01-02T00:00:00Z"
                    }
                },
                "activeFeatures": ["login"],
                "primaryFeature": "login"
            }"#,
        );

        let feature = &ledger.features["login"];
        assert_eq!(feature.phase, Phase::Design);
        assert_eq!(feature.phase_rank, Phase::Design.rank());
        assert_eq!(feature.match_rate, Some(85));
        assert_eq!(feature.iterations, 2);
        assert_eq!(
            feature.documents.get("plan").map(String::as_str),
            Some("docs/plans/login.md")
        );
        assert_eq!(ledger.primary.as_deref(), Some("login"));
        assert_eq!(ledger.version, Ledger::CURRENT_VERSION);
    }

    #[test]
    fn rank_is_rederived_not_trusted() {
        // A v1 file claiming a bogus phaseRank: the rank comes from the phase.
        let ledger = decode(
            r#"{"features": {"x": {"phase": "plan", "phaseRank": 9}}}"#,
        );
        assert_eq!(ledger.features["x"].phase_rank, Phase::Plan.rank());
    }

    #[test]
    fn active_list_deduplicates_preserving_order() {
        let ledger = decode(r#"{"activeFeatures": ["a", "b", "a", "c", "b"]}"#);
        assert_eq!(ledger.active, vec!["a", "b", "c"]);
    }

    #[test]
    fn active_names_without_records_get_lazy_features() {
        let ledger = decode(r#"{"active": ["ghost"]}"#);
        let feature = &ledger.features["ghost"];
        assert_eq!(feature.phase, Phase::Research);
        assert_eq!(feature.name, "ghost");
    }

    #[test]
    fn primary_outside_active_is_cleared() {
        let ledger = decode(r#"{"active": ["a"], "primary": "b"}"#);
        assert!(ledger.primary.is_none());
    }

    #[test]
    fn corrupt_history_entries_are_skipped() {
        let ledger = decode(
            r#"{"history": [
                {"feature": "a", "from": "plan", "to": "design"},
                {"not": "a transition"},
                {"feature": "a", "from": "design", "to": "do", "source": "automated", "at": "2026-01-03T00:00:00Z"}
            ]}"#,
        );
        assert_eq!(ledger.history.len(), 2);
        assert_eq!(ledger.history[1].to, Phase::Do);
    }

    #[test]
    fn history_truncates_to_cap_keeping_newest() {
        let entries: Vec<String> = (0..10)
            .map(|i| {
                format!(
                    r#"{{"feature": "f{i}", "from": "plan", "to": "design"}}"#
                )
            })
            .collect();
        let json = format!(r#"{{"history": [{}]}}"#, entries.join(","));
        let file: LedgerFile = serde_json::from_str(&json).expect("decode");
        let ledger = normalize(file, 4);

        assert_eq!(ledger.history.len(), 4);
        assert_eq!(ledger.history[0].feature, "f6");
        assert_eq!(ledger.history[3].feature, "f9");
    }

    #[test]
    fn normalization_is_idempotent() {
        let once = decode(
            r#"{
                "features": {"login": {"currentPhase": "do", "matchRate": 70}},
                "activeFeatures": ["login", "login"],
                "primaryFeature": "login"
            }"#,
        );

        let serialized = serde_json::to_string(&once).expect("encode");
        let twice = decode(&serialized);

        assert_eq!(
            serde_json::to_value(&once).unwrap(),
            serde_json::to_value(&twice).unwrap()
        );
    }

    #[test]
    fn metadata_blobs_pass_through_verbatim() {
        let ledger = decode(
            r#"{"sessionMetadata": {"producer": "other-tool", "n": 3}, "pipelineMetadata": [1, 2]}"#,
        );
        assert_eq!(
            ledger.session_meta,
            Some(serde_json::json!({"producer": "other-tool", "n": 3}))
        );
        assert_eq!(ledger.pipeline_meta, Some(serde_json::json!([1, 2])));
    }
}
