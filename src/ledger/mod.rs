//! Persistent phase ledger: features, PDCA phases, and document tracking.

pub mod feature;
pub mod normalize;
pub mod phase;
pub mod store;

pub use feature::{ArchiveInfo, Feature, PhaseTransition, TransitionSource};
pub use phase::{doc_kind_from_path, DocKind, Phase};
pub use store::{Ledger, LedgerStore};
