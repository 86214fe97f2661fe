//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::assigner::AssignerKind;
use crate::error::SchedError;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Assignment policy: "utilization" (or empty) or "spread"
    #[serde(default)]
    pub assigner: String,

    /// Delay before the first assignment pass, letting workers connect
    #[serde(rename = "init-wait-ms", default = "default_init_wait_ms")]
    pub init_wait_ms: u64,

    /// Forced re-evaluation interval
    #[serde(rename = "resched-interval-ms", default = "default_resched_interval_ms")]
    pub resched_interval_ms: u64,

    /// Soft limit on selector evaluation for one request
    #[serde(rename = "selector-timeout-ms", default = "default_selector_timeout_ms")]
    pub selector_timeout_ms: u64,

    /// Open windows allowed per worker
    #[serde(rename = "max-windows", default = "default_max_windows")]
    pub max_windows: usize,

    /// How long a worker's task type list is trusted
    #[serde(rename = "tasks-cache-ttl-ms", default = "default_tasks_cache_ttl_ms")]
    pub tasks_cache_ttl_ms: u64,

    /// Worker session check interval
    #[serde(rename = "heartbeat-interval-ms", default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long close waits for one worker's cleanup
    #[serde(rename = "cleanup-timeout-ms", default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: u64,

    /// Scheduler mailbox size
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_init_wait_ms() -> u64 {
    30_000
}

fn default_resched_interval_ms() -> u64 {
    120_000
}

fn default_selector_timeout_ms() -> u64 {
    5_000
}

fn default_max_windows() -> usize {
    2
}

fn default_tasks_cache_ttl_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_cleanup_timeout_ms() -> u64 {
    10_000
}

fn default_channel_buffer() -> usize {
    100
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        debug!("SchedulerConfig::default: called");
        Self {
            assigner: String::new(),
            init_wait_ms: default_init_wait_ms(),
            resched_interval_ms: default_resched_interval_ms(),
            selector_timeout_ms: default_selector_timeout_ms(),
            max_windows: default_max_windows(),
            tasks_cache_ttl_ms: default_tasks_cache_ttl_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            cleanup_timeout_ms: default_cleanup_timeout_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl SchedulerConfig {
    /// Parsed assignment policy
    pub fn assigner_kind(&self) -> Result<AssignerKind, SchedError> {
        self.assigner.parse()
    }

    pub fn init_wait(&self) -> Duration {
        Duration::from_millis(self.init_wait_ms)
    }

    pub fn resched_interval(&self) -> Duration {
        Duration::from_millis(self.resched_interval_ms.max(1))
    }

    pub fn selector_timeout(&self) -> Duration {
        Duration::from_millis(self.selector_timeout_ms)
    }

    pub fn tasks_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.tasks_cache_ttl_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn cleanup_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_timeout_ms)
    }

    /// Max windows, never below one
    pub fn window_limit(&self) -> usize {
        self.max_windows.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.init_wait(), Duration::from_secs(30));
        assert_eq!(config.resched_interval(), Duration::from_secs(120));
        assert_eq!(config.selector_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_windows, 2);
        assert_eq!(config.assigner_kind().unwrap(), AssignerKind::Utilization);
    }

    #[test]
    fn test_deserialize_partial() {
        let yaml = r#"
assigner: spread
init-wait-ms: 10
max-windows: 4
"#;
        let config: SchedulerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.assigner_kind().unwrap(), AssignerKind::Spread);
        assert_eq!(config.init_wait_ms, 10);
        assert_eq!(config.max_windows, 4);
        assert_eq!(config.selector_timeout_ms, 5_000);
    }

    #[test]
    fn test_unknown_assigner_rejected() {
        let config = SchedulerConfig {
            assigner: "round-robin".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.assigner_kind(), Err(SchedError::UnknownAssigner(name)) if name == "round-robin"));
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let config = SchedulerConfig {
            max_windows: 0,
            resched_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.window_limit(), 1);
        assert!(config.resched_interval() > Duration::ZERO);
    }
}
