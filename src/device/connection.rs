use std::collections::{HashMap, VecDeque};
use std::future::Future;
use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use log::{debug, info, warn};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::{CONNECT_DEADLINE, DISCONNECT_DEADLINE, DISCOVER_DEADLINE, WRITE_DEADLINE};
use crate::device::payload::WallClock;
use crate::device::sync::{GattCharacteristic, SyncAction, SyncInput, SyncOutcome, SyncPolicy, SyncSession, WriteMode, WriteStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub connect: Duration,
    pub discover: Duration,
    pub write: Duration,
    pub disconnect: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Deadlines {
            connect: Duration::from_millis(CONNECT_DEADLINE),
            discover: Duration::from_millis(DISCOVER_DEADLINE),
            write: Duration::from_millis(WRITE_DEADLINE),
            disconnect: Duration::from_millis(DISCONNECT_DEADLINE),
        }
    }
}

enum Bounded<T> {
    Completed(Result<T, btleplug::Error>),
    TimedOut,
    LinkLost,
}

async fn bounded<T, F>(deadline: Duration, link_lost: &CancellationToken, fut: F) -> Bounded<T>
where
    F: Future<Output = Result<T, btleplug::Error>>,
{
    tokio::select! {
        _ = link_lost.cancelled() => Bounded::LinkLost,
        _ = sleep(deadline) => Bounded::TimedOut,
        result = fut => Bounded::Completed(result),
    }
}

/// Maps a failed btleplug write onto the statuses the sync session distinguishes.
pub fn classify_write_error(err: &btleplug::Error) -> WriteStatus {
    if let btleplug::Error::PermissionDenied = err {
        return WriteStatus::WriteNotPermitted;
    }

    let message = err.to_string();
    // backends only report ATT errors as text, e.g. "org.bluez.Error.InvalidValueLength"
    let normalized = message.to_lowercase().replace([' ', '_', '-'], "");

    if normalized.contains("invalidvaluelength") || normalized.contains("invalidattributevaluelength") {
        WriteStatus::InvalidAttributeLength
    } else if normalized.contains("notpermitted") {
        WriteStatus::WriteNotPermitted
    } else {
        WriteStatus::Failure(message)
    }
}

async fn connect(peripheral: &Peripheral, deadlines: &Deadlines, link_lost: &CancellationToken) -> SyncInput {
    info!("Connecting to peripheral...");

    match bounded(deadlines.connect, link_lost, peripheral.connect()).await {
        Bounded::Completed(Ok(())) => SyncInput::Connected,
        Bounded::Completed(Err(err)) => SyncInput::ConnectFailed(err.to_string()),
        Bounded::TimedOut => SyncInput::ConnectTimedOut,
        Bounded::LinkLost => SyncInput::Disconnected,
    }
}

async fn discover(
    peripheral: &Peripheral,
    found: &mut HashMap<(Uuid, Uuid), Characteristic>,
    deadlines: &Deadlines,
    link_lost: &CancellationToken,
) -> SyncInput {
    info!("Connected; Discovering services...");

    match bounded(deadlines.discover, link_lost, peripheral.discover_services()).await {
        Bounded::Completed(Ok(())) => {},
        Bounded::Completed(Err(err)) => return SyncInput::DiscoveryFailed(err.to_string()),
        Bounded::TimedOut => return SyncInput::DiscoveryFailed("discovering services took too long".to_string()),
        Bounded::LinkLost => return SyncInput::Disconnected,
    }

    found.clear();
    let mut characteristics = Vec::new();

    for service in peripheral.services() {
        for characteristic in &service.characteristics {
            debug!("Found characteristic {:?} {:?} {:?}", service.uuid, characteristic.uuid, characteristic.properties);

            characteristics.push(GattCharacteristic {
                service: service.uuid,
                uuid: characteristic.uuid,
                properties: characteristic.properties,
            });
            found.insert((service.uuid, characteristic.uuid), characteristic.clone());
        }
    }

    SyncInput::ServicesDiscovered(characteristics)
}

async fn write(
    peripheral: &Peripheral,
    found: &HashMap<(Uuid, Uuid), Characteristic>,
    target: &GattCharacteristic,
    payload: &[u8],
    mode: WriteMode,
    deadlines: &Deadlines,
    link_lost: &CancellationToken,
) -> SyncInput {
    let status = match found.get(&(target.service, target.uuid)) {
        None => WriteStatus::Failure("characteristic is no longer available".to_string()),
        Some(characteristic) => {
            info!("Writing {:02X?} to characteristic {} ({:?})", payload, target.uuid, mode);

            match bounded(deadlines.write, link_lost, peripheral.write(characteristic, payload, mode.into())).await {
                Bounded::Completed(Ok(())) => WriteStatus::Success,
                Bounded::Completed(Err(err)) => classify_write_error(&err),
                Bounded::TimedOut => WriteStatus::Failure("write took too long".to_string()),
                Bounded::LinkLost => return SyncInput::Disconnected,
            }
        },
    };

    SyncInput::WriteCompleted { characteristic: target.uuid, status }
}

pub async fn disconnect(peripheral: &Peripheral, deadline: Duration) {
    info!("Disconnecting from peripheral");

    tokio::select! {
        _ = sleep(deadline) => {
            warn!("Disconnecting from peripheral took too long");
        }
        result = peripheral.disconnect() => {
            if let Err(err) = result {
                warn!("Failed to disconnect from peripheral: {:?}", err);
            }
        }
    };
}

/// Runs one sync attempt against `peripheral` until the session reaches a terminal state.
///
/// `link_lost` is cancelled by the owner when the peripheral drops the connection
/// (or the application is closing); any pending platform call is abandoned then.
pub async fn sync_peripheral<C: WallClock>(
    peripheral: &Peripheral,
    policy: SyncPolicy,
    clock: C,
    deadlines: Deadlines,
    link_lost: CancellationToken,
) -> SyncOutcome {
    let mut session = SyncSession::new(policy, clock);
    let mut found: HashMap<(Uuid, Uuid), Characteristic> = HashMap::new();
    let mut pending: VecDeque<SyncAction> = session.begin().into();
    let mut outcome = None;

    while let Some(action) = pending.pop_front() {
        let input = match action {
            SyncAction::Connect => connect(peripheral, &deadlines, &link_lost).await,
            SyncAction::DiscoverServices => discover(peripheral, &mut found, &deadlines, &link_lost).await,
            SyncAction::Write { characteristic, payload, mode } => {
                write(peripheral, &found, &characteristic, &payload, mode, &deadlines, &link_lost).await
            },
            SyncAction::Disconnect => {
                disconnect(peripheral, deadlines.disconnect).await;
                continue;
            },
            SyncAction::Finish(result) => {
                outcome = Some(result);
                continue;
            },
        };

        pending.extend(session.handle(input));
    }

    outcome.unwrap_or(SyncOutcome::Disconnected)
}
