//! Phase and document-kind vocabulary for the ledger.
//!
//! Phases follow the PDCA cycle order; the numeric rank mirrors the
//! declaration order and is what the monotonic-progress guard compares.

use serde::{Deserialize, Serialize};

/// One stage of the PDCA cycle.
///
/// Declaration order IS the rank order -- `rank()` relies on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Research,
    Plan,
    Design,
    Do,
    Check,
    Act,
    Completed,
    Archived,
}

impl Phase {
    /// Numeric rank used for the monotonic-progress comparison (research = 0).
    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Plan => "plan",
            Phase::Design => "design",
            Phase::Do => "do",
            Phase::Check => "check",
            Phase::Act => "act",
            Phase::Completed => "completed",
            Phase::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Phase> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Some(Phase::Research),
            "plan" => Some(Phase::Plan),
            "design" => Some(Phase::Design),
            "do" => Some(Phase::Do),
            "check" => Some(Phase::Check),
            "act" => Some(Phase::Act),
            "completed" => Some(Phase::Completed),
            "archived" => Some(Phase::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of tracked document attached to a feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Research,
    Plan,
    Design,
    Analysis,
    Report,
}

impl DocKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocKind::Research => "research",
            DocKind::Plan => "plan",
            DocKind::Design => "design",
            DocKind::Analysis => "analysis",
            DocKind::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<DocKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "research" => Some(DocKind::Research),
            "plan" => Some(DocKind::Plan),
            "design" => Some(DocKind::Design),
            "analysis" => Some(DocKind::Analysis),
            "report" => Some(DocKind::Report),
            _ => None,
        }
    }

    /// The phase a document of this kind signals work on.
    pub fn phase(self) -> Phase {
        match self {
            DocKind::Research => Phase::Research,
            DocKind::Plan => Phase::Plan,
            DocKind::Design => Phase::Design,
            DocKind::Analysis => Phase::Check,
            DocKind::Report => Phase::Act,
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match a written document path against the folder conventions and infer
/// the document kind (and therefore the phase it signals).
///
/// Recognized conventions, anywhere in the path:
/// `research/`, `plan/` or `plans/`, `design/` or `designs/`,
/// `analysis/`, `report/` or `reports/` -- each followed by a markdown file.
///
/// This is the secondary, best-effort detection signal; explicit
/// `record_phase` calls are the primary one.
pub fn doc_kind_from_path(path: &str) -> Option<DocKind> {
    // Detection fires at most once per file-write event.
    let re = regex::Regex::new(
        r"(?:^|/)(research|plans?|designs?|analysis|reports?)/[^/]+\.md$",
    )
    .ok()?;

    let caps = re.captures(path)?;
    match caps.get(1)?.as_str() {
        "research" => Some(DocKind::Research),
        "plan" | "plans" => Some(DocKind::Plan),
        "design" | "designs" => Some(DocKind::Design),
        "analysis" => Some(DocKind::Analysis),
        "report" | "reports" => Some(DocKind::Report),
        _ => None,
    }
}
