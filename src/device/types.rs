use futures::channel::mpsc::Sender;
use tokio::time::Duration;

use crate::config::types::Config;
use crate::device::constants::UNKNOWN_NAME;
use crate::device::sync::{SyncOutcome, SyncPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice<Id> {
    pub id: Id,
    pub name: Option<String>,
}

impl<Id> DiscoveredDevice<Id> {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }

    pub fn is_target(&self, target_name: &str) -> bool {
        self.name.as_deref() == Some(target_name)
    }
}

/// The part of the config the device service needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub target_name: String,
    pub scan_period: Duration,
    pub policy: SyncPolicy,
}

impl From<&Config> for DeviceConfig {
    fn from(config: &Config) -> Self {
        DeviceConfig {
            target_name: config.target_name.clone(),
            scan_period: Duration::from_millis(config.scan_period_ms),
            policy: SyncPolicy {
                disconnect_on_failure: config.disconnect_on_failure,
                disconnect_after_sync: config.disconnect_after_sync,
            },
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig::from(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Initial,
    Unavailable, // no manager or adapter; bluetooth is missing or switched off
    NoPermission,
    Idle,
    Scanning,
    Syncing { name: String },
}

#[derive(Debug, Clone)]
pub enum DeviceCommand {
    Configure(DeviceConfig),
    StartScan,
    StopScan,
    Select(usize),
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Ready(Sender<DeviceCommand>),
    StateChange(DeviceState),
    Discovered { index: usize, name: String },
    Renamed { index: usize, name: String },
    SyncFinished { name: String, outcome: SyncOutcome },
}
