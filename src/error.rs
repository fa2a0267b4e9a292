use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid role definition '{role}': {message}")]
    InvalidRole { role: String, message: String },
}

/// Errors related to persisted state (ledger, team directory, mailbox,
/// task board, job records).
///
/// Ledger write failures are escalated loudly by callers; everything else
/// is bookkeeping and must never abort the primary operation.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("Failed to encode {what}: {message}")]
    Encode { what: String, message: String },

    #[error("Unknown record: {0}")]
    NotFound(String),
}

/// Errors from the session host platform.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Host not reachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("Host rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Unknown session handle: {0}")]
    UnknownSession(String),

    #[error("Malformed host response: {0}")]
    BadResponse(String),
}

/// Errors related to delegation and the orchestrator.
///
/// Two non-errors by design: a sync-mode timeout degrades to a background
/// job record rather than failing the call, and a caller-driven abort is an
/// `Aborted` outcome, not an error.
#[derive(Debug, thiserror::Error)]
pub enum DelegationError {
    #[error("Unknown role '{role}'")]
    RoleNotFound { role: String },

    #[error("Delegation depth {depth} is at the maximum ({max})")]
    DepthExceeded { depth: usize, max: usize },

    #[error("Role '{role}' may not delegate to itself")]
    SelfDelegation { role: String },

    #[error("Orchestrator role '{from}' may not delegate to orchestrator role '{to}'")]
    OrchestratorChain { from: String, to: String },

    #[error("Failed to create session: {0}")]
    SessionCreateFailed(String),

    #[error("Failed to dispatch prompt to session {handle}: {message}")]
    DispatchFailed { handle: String, message: String },

    #[error("Nothing to do: no role/task and no abort target")]
    EmptyRequest,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
