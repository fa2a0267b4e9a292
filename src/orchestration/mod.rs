//! Delegation orchestrator, session registry, job records, and roles.

pub mod delegate;
pub mod jobs;
pub mod registry;
pub mod roles;
pub mod types;

pub use delegate::{DelegationTuning, Orchestrator};
pub use jobs::JobStore;
pub use registry::SessionRegistry;
pub use roles::RoleRegistry;
pub use types::{
    CallerContext, DelegateOutcome, DelegateRequest, JobRecord, JobStatus, RoleKind, RoleSpec,
};
