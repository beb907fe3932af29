//! SFU Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::selection::SelectionStrategy;

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// STUN/TURN URLs offered to every transport
    pub ice_servers: Vec<String>,
    /// How viewers are matched to publishers
    pub selection: SelectionStrategy,
    /// Seconds between keyframe requests sent to publishers (0 = never)
    pub keyframe_interval_secs: u64,
    /// Seconds between liveness diagnostic sweeps (0 = disabled)
    pub liveness_interval_secs: u64,
    /// Session retention
    pub retention: RetentionConfig,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            selection: SelectionStrategy::FirstMatch,
            keyframe_interval_secs: 3,
            liveness_interval_secs: 10,
            retention: RetentionConfig::default(),
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub const fn keyframe_interval(&self) -> Option<Duration> {
        if self.keyframe_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.keyframe_interval_secs))
        }
    }

    #[must_use]
    pub const fn liveness_interval(&self) -> Option<Duration> {
        if self.liveness_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.liveness_interval_secs))
        }
    }
}

/// When terminal and abandoned sessions are evicted from the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between sweeps (0 = disabled)
    pub sweep_interval_secs: u64,
    /// Failed/Closed sessions idle this long are evicted
    pub terminal_ttl_secs: u64,
    /// Sessions still New idle this long are evicted
    pub idle_ttl_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            terminal_ttl_secs: 300,
            idle_ttl_secs: 600,
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub const fn terminal_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_ttl_secs)
    }

    #[must_use]
    pub const fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}
