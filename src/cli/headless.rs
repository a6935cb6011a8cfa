use futures::channel::mpsc::{channel, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;

use crate::cli::args::Mode;
use crate::config::io::ConfigIO;
use crate::config::types::ConfigOverrides;
use crate::device::constants::UNKNOWN_NAME;
use crate::device::service::device_service;
use crate::device::types::{DeviceCommand, DeviceConfig, DeviceEvent, DeviceState};
use crate::error::AppRunError;
use crate::gui::list::ItemList;

async fn send(commands: &mut Option<Sender<DeviceCommand>>, command: DeviceCommand) {
    if let Some(sender) = commands {
        if let Err(err) = sender.send(command).await {
            warn!("Device service stopped listening for commands: {}", err);
        }
    }
}

/// What `scan` prints for a list update. A device is printed once, as soon as its name is known.
fn scan_line(event: &DeviceEvent) -> Option<&str> {
    match event {
        DeviceEvent::Discovered { name, .. } if name != UNKNOWN_NAME => Some(name),
        // only sent when a device reports its first name
        DeviceEvent::Renamed { name, .. } => Some(name),
        _ => None,
    }
}

/// Drives the device service without a window: one scan session, and in `Mode::Sync` one
/// sync attempt with the first device carrying the target name.
pub async fn run_headless(mode: Mode, config: DeviceConfig) -> Result<(), AppRunError> {
    let cancel = CancellationToken::new();
    let (event_sender, mut events) = channel::<DeviceEvent>(64);
    let service = spawn(device_service(cancel.clone(), config.clone(), event_sender));

    let mut commands: Option<Sender<DeviceCommand>> = None;
    let mut names: ItemList<String> = ItemList::new();
    let mut scan_started = false;
    let mut selected = false;

    let result = loop {
        let Some(event) = events.next().await else {
            break Err(AppRunError::BluetoothUnavailable);
        };

        if mode == Mode::Scan {
            if let Some(line) = scan_line(&event) {
                println!("{}", line);
            }
        }

        match event {
            DeviceEvent::Ready(sender) => {
                commands = Some(sender);
                send(&mut commands, DeviceCommand::StartScan).await;
            },
            DeviceEvent::StateChange(DeviceState::Unavailable) => break Err(AppRunError::BluetoothUnavailable),
            DeviceEvent::StateChange(DeviceState::NoPermission) => break Err(AppRunError::NoPermission),
            DeviceEvent::StateChange(DeviceState::Scanning) => {
                scan_started = true;
                info!("Scanning for {:?}...", config.scan_period);
            },
            DeviceEvent::StateChange(DeviceState::Idle) if scan_started => {
                // the scan session ended without a sync running
                if mode == Mode::Sync {
                    break Err(AppRunError::TargetNotFound { name: config.target_name.clone() });
                }
                break Ok(());
            },
            DeviceEvent::StateChange(state) => debug!("Device state {:?}", state),
            DeviceEvent::Discovered { index, name } | DeviceEvent::Renamed { index, name } => {
                let change = if index < names.len() {
                    names.update(index, name.clone())
                } else {
                    names.push(name.clone())
                };
                debug!("Device list {:?}", change);

                if mode == Mode::Sync && !selected && name == config.target_name {
                    selected = true;
                    // select first: stopping the scan while nothing syncs would report Idle
                    send(&mut commands, DeviceCommand::Select(index)).await;
                    send(&mut commands, DeviceCommand::StopScan).await;
                }
            },
            DeviceEvent::SyncFinished { name, outcome } => {
                if outcome.is_success() {
                    println!("{}: {}", name, outcome);
                    break Ok(());
                }
                break Err(AppRunError::SyncFailed { name, outcome });
            },
        }
    };

    cancel.cancel();
    drop(events);
    if let Err(err) = service.await {
        warn!("Device service failed: {:?}", err);
    }

    result
}

pub async fn run_headless_with_config(mode: Mode, config_io: ConfigIO, overrides: ConfigOverrides) -> Result<(), AppRunError> {
    let (mut config, error_message) = config_io.load().await;
    if let Some(error_message) = error_message {
        warn!("{}", error_message);
    }
    overrides.apply(&mut config);

    run_headless(mode, DeviceConfig::from(&config)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printed(events: &[DeviceEvent]) -> Vec<&str> {
        events.iter().filter_map(scan_line).collect()
    }

    #[test]
    fn named_devices_are_printed_once() {
        let events = [
            DeviceEvent::Discovered { index: 0, name: "Other".to_string() },
            DeviceEvent::Discovered { index: 1, name: "CWatch".to_string() },
        ];
        assert_eq!(printed(&events), vec!["Other", "CWatch"]);
    }

    #[test]
    fn late_name_replaces_the_unknown_line() {
        let events = [
            DeviceEvent::Discovered { index: 0, name: UNKNOWN_NAME.to_string() },
            DeviceEvent::Renamed { index: 0, name: "CWatch".to_string() },
        ];
        assert_eq!(printed(&events), vec!["CWatch"]);
    }

    #[test]
    fn state_changes_print_nothing() {
        let events = [DeviceEvent::StateChange(DeviceState::Scanning)];
        assert!(printed(&events).is_empty());
    }
}
