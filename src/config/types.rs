use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{SCAN_PERIOD, TARGET_NAME};

/**
 * Scans shorter than this (milliseconds) rarely see an advertisement at all.
 */
pub const MIN_SCAN_PERIOD: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    // only a peripheral advertising exactly this name is synchronised
    pub target_name: String,
    pub scan_period_ms: u64,
    pub disconnect_on_failure: bool,
    pub disconnect_after_sync: bool,
}

impl Config {
    pub fn sanitize(&mut self) {
        self.scan_period_ms = self.scan_period_ms.max(MIN_SCAN_PERIOD);

        let trimmed = self.target_name.trim();
        if trimmed.is_empty() {
            self.target_name = TARGET_NAME.to_string();
        } else if trimmed.len() != self.target_name.len() {
            self.target_name = trimmed.to_string();
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target_name: TARGET_NAME.to_string(),
            scan_period_ms: SCAN_PERIOD,
            disconnect_on_failure: true,
            disconnect_after_sync: true,
        }
    }
}

/// Values given on the command line, applied over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub target_name: Option<String>,
    pub scan_period: Option<Duration>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(target_name) = &self.target_name {
            config.target_name = target_name.clone();
        }
        if let Some(scan_period) = self.scan_period {
            config.scan_period_ms = u64::try_from(scan_period.as_millis()).unwrap_or(u64::MAX);
        }
        config.sanitize();
    }
}
