use super::schema::{AppConfig, PartialConfig};
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For idle_recheck_delays_ms: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            workspace: self.workspace.or(fallback.workspace),
            model: self.model.or(fallback.model),
            coordinator_role: self.coordinator_role.or(fallback.coordinator_role),
            max_depth: self.max_depth.or(fallback.max_depth),
            sync_wait_secs: self.sync_wait_secs.or(fallback.sync_wait_secs),
            poll_interval_secs: self.poll_interval_secs.or(fallback.poll_interval_secs),
            idle_recheck_delays_ms: self
                .idle_recheck_delays_ms
                .or(fallback.idle_recheck_delays_ms),
            result_truncate_chars: self
                .result_truncate_chars
                .or(fallback.result_truncate_chars),
            history_cap: self.history_cap.or(fallback.history_cap),
            max_features: self.max_features.or(fallback.max_features),
            host_base_url: self.host_base_url.or(fallback.host_base_url),
            host_request_timeout_secs: self
                .host_request_timeout_secs
                .or(fallback.host_request_timeout_secs),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        AppConfig {
            workspace: self.workspace.unwrap_or_else(|| PathBuf::from(".")),
            model: self.model.unwrap_or_default(),
            coordinator_role: self
                .coordinator_role
                .unwrap_or_else(|| "coordinator".to_string()),
            max_depth: self.max_depth.unwrap_or(3),
            sync_wait_secs: self.sync_wait_secs.unwrap_or(1800),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(10),
            idle_recheck_delays_ms: self
                .idle_recheck_delays_ms
                .unwrap_or_else(|| vec![2000, 3000, 5000]),
            result_truncate_chars: self.result_truncate_chars.unwrap_or(20_000),
            history_cap: self.history_cap.unwrap_or(100),
            max_features: self.max_features.unwrap_or(50),
            host_base_url: self
                .host_base_url
                .unwrap_or_else(|| "http://localhost:7070".to_string()),
            host_request_timeout_secs: self.host_request_timeout_secs.unwrap_or(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_fallback_prefers_self() {
        let high = PartialConfig {
            max_depth: Some(5),
            ..Default::default()
        };
        let low = PartialConfig {
            max_depth: Some(2),
            sync_wait_secs: Some(60),
            ..Default::default()
        };

        let merged = high.with_fallback(low);
        assert_eq!(merged.max_depth, Some(5));
        assert_eq!(merged.sync_wait_secs, Some(60));
    }

    #[test]
    fn recheck_delays_replace_not_append() {
        let high = PartialConfig {
            idle_recheck_delays_ms: Some(vec![100]),
            ..Default::default()
        };
        let low = PartialConfig {
            idle_recheck_delays_ms: Some(vec![2000, 3000, 5000]),
            ..Default::default()
        };

        let merged = high.with_fallback(low);
        assert_eq!(merged.idle_recheck_delays_ms, Some(vec![100]));
    }

    #[test]
    fn finalize_fills_defaults() {
        let config = PartialConfig::default().finalize();
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.sync_wait_secs, 1800);
        assert_eq!(config.idle_recheck_delays_ms, vec![2000, 3000, 5000]);
        assert_eq!(config.coordinator_role, "coordinator");
        assert_eq!(config.max_features, 50);
    }

    #[test]
    fn state_dir_is_under_workspace() {
        let config = PartialConfig {
            workspace: Some(PathBuf::from("/tmp/project")),
            ..Default::default()
        }
        .finalize();
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/project/.foreman"));
    }
}
