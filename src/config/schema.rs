use serde::Deserialize;
use std::path::PathBuf;

/// The TOML file structure for foreman.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub delegation: Option<DelegationFileConfig>,
    pub ledger: Option<LedgerFileConfig>,
    pub host: Option<HostFileConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub workspace: Option<String>,
    pub model: Option<String>,
    /// Role that receives task-board unblock notifications.
    pub coordinator_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DelegationFileConfig {
    pub max_depth: Option<usize>,
    pub sync_wait_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    /// Re-check delays (milliseconds) applied when a session reports idle
    /// without a terminal finish marker.
    pub idle_recheck_delays_ms: Option<Vec<u64>>,
    pub result_truncate_chars: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerFileConfig {
    pub history_cap: Option<usize>,
    pub max_features: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HostFileConfig {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workspace: PathBuf,
    pub model: String,
    pub coordinator_role: String,
    pub max_depth: usize,
    pub sync_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub idle_recheck_delays_ms: Vec<u64>,
    pub result_truncate_chars: usize,
    pub history_cap: usize,
    pub max_features: usize,
    pub host_base_url: String,
    pub host_request_timeout_secs: u64,
}

impl AppConfig {
    /// Directory holding all persisted engine state for this workspace.
    pub fn state_dir(&self) -> PathBuf {
        self.workspace.join(".foreman")
    }
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub workspace: Option<PathBuf>,
    pub model: Option<String>,
    pub coordinator_role: Option<String>,
    pub max_depth: Option<usize>,
    pub sync_wait_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    pub idle_recheck_delays_ms: Option<Vec<u64>>,
    pub result_truncate_chars: Option<usize>,
    pub history_cap: Option<usize>,
    pub max_features: Option<usize>,
    pub host_base_url: Option<String>,
    pub host_request_timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Flatten the sectioned TOML structure into a mergeable partial.
    pub fn to_partial(self) -> PartialConfig {
        let general = self.general.unwrap_or(GeneralConfig {
            workspace: None,
            model: None,
            coordinator_role: None,
        });
        let delegation = self.delegation.unwrap_or(DelegationFileConfig {
            max_depth: None,
            sync_wait_secs: None,
            poll_interval_secs: None,
            idle_recheck_delays_ms: None,
            result_truncate_chars: None,
        });
        let ledger = self.ledger.unwrap_or(LedgerFileConfig {
            history_cap: None,
            max_features: None,
        });
        let host = self.host.unwrap_or(HostFileConfig {
            base_url: None,
            request_timeout_secs: None,
        });

        PartialConfig {
            workspace: general.workspace.map(PathBuf::from),
            model: general.model,
            coordinator_role: general.coordinator_role,
            max_depth: delegation.max_depth,
            sync_wait_secs: delegation.sync_wait_secs,
            poll_interval_secs: delegation.poll_interval_secs,
            idle_recheck_delays_ms: delegation.idle_recheck_delays_ms,
            result_truncate_chars: delegation.result_truncate_chars,
            history_cap: ledger.history_cap,
            max_features: ledger.max_features,
            host_base_url: host.base_url,
            host_request_timeout_secs: host.request_timeout_secs,
        }
    }
}
