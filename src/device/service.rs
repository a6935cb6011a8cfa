use std::convert::Infallible;
use std::hash::Hash;
use std::pin::Pin;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::future::pending;
use futures::{SinkExt, Stream, StreamExt};
use iced::subscription::{self, Subscription};
use log::{debug, error, info, warn};
use tokio::spawn;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::connection::{disconnect, sync_peripheral, Deadlines};
use crate::device::payload::LocalClock;
use crate::device::scanner::{Discovery, Scanner};
use crate::device::sync::SyncOutcome;
use crate::device::types::{DeviceCommand, DeviceConfig, DeviceEvent, DeviceState};
use crate::error::DeviceError;

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// The peripheral a running sync talks to, and the token that aborts it.
#[derive(Debug)]
struct SyncLink<Id> {
    id: Id,
    name: String,
    link_lost: CancellationToken,
}

impl<Id: PartialEq> SyncLink<Id> {
    /// Aborts the sync if `id` is its peripheral. Returns true if it did.
    fn on_disconnected(&self, id: &Id) -> bool {
        if self.id != *id {
            return false;
        }

        self.link_lost.cancel();
        true
    }
}

struct ActiveSync {
    link: SyncLink<PeripheralId>,
    peripheral: Peripheral,
    handle: JoinHandle<SyncOutcome>,
}

#[derive(Debug, PartialEq, Eq)]
enum Selection<Id> {
    Start { id: Id, name: String },
    NotTarget,
    /// Another sync is still running; only one connection to a watch exists at a time.
    Busy { name: String },
}

fn choose_selection<Id: Clone + Eq + Hash>(
    scanner: &Scanner<Id>,
    target_name: &str,
    index: usize,
    active: Option<&SyncLink<Id>>,
) -> Selection<Id> {
    let Some(device) = scanner.target_at(index, target_name) else {
        return Selection::NotTarget;
    };

    if let Some(active) = active {
        return Selection::Busy { name: active.name.clone() };
    }

    Selection::Start { id: device.id.clone(), name: device.display_name().to_string() }
}

enum Wake {
    Cancelled,
    Command(DeviceCommand),
    Central(Option<CentralEvent>),
    ScanTimeout,
    SyncDone(Result<SyncOutcome, JoinError>),
}

struct DeviceService {
    config: DeviceConfig,
    deadlines: Deadlines,
    events: Sender<DeviceEvent>,
    // kept alive for as long as its adapter is in use
    manager: Option<Manager>,
    adapter: Option<Adapter>,
    central_events: Option<CentralEvents>,
    scanner: Scanner<PeripheralId>,
    active_sync: Option<ActiveSync>,
    fault: Option<DeviceState>,
    published_state: Option<DeviceState>,
}

async fn next_central_event(central_events: &mut Option<CentralEvents>) -> Option<CentralEvent> {
    match central_events {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

async fn join_sync(active_sync: &mut Option<ActiveSync>) -> Result<SyncOutcome, JoinError> {
    match active_sync {
        Some(active) => (&mut active.handle).await,
        None => pending().await,
    }
}

fn fault_state(err: &DeviceError) -> DeviceState {
    match err {
        DeviceError::Btle { source: btleplug::Error::PermissionDenied } => DeviceState::NoPermission,
        _ => DeviceState::Unavailable,
    }
}

impl DeviceService {
    fn new(config: DeviceConfig, events: Sender<DeviceEvent>) -> Self {
        let scanner = Scanner::new(config.scan_period);

        DeviceService {
            config,
            deadlines: Deadlines::default(),
            events,
            manager: None,
            adapter: None,
            central_events: None,
            scanner,
            active_sync: None,
            fault: None,
            published_state: None,
        }
    }

    async fn emit(&mut self, event: DeviceEvent) {
        if let Err(err) = self.events.send(event).await {
            debug!("Nobody is listening for device events: {}", err);
        }
    }

    fn current_state(&self) -> DeviceState {
        if let Some(active) = &self.active_sync {
            return DeviceState::Syncing { name: active.link.name.clone() };
        }

        if self.scanner.is_scanning() {
            return DeviceState::Scanning;
        }

        match &self.fault {
            Some(fault) => fault.clone(),
            None => DeviceState::Idle,
        }
    }

    async fn publish_state(&mut self) {
        let state = self.current_state();

        if self.published_state.as_ref() != Some(&state) {
            debug!("Device state {:?}", state);
            self.published_state = Some(state.clone());
            self.emit(DeviceEvent::StateChange(state)).await;
        }
    }

    async fn ensure_adapter(&mut self) -> Result<Adapter, DeviceError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
        self.central_events = Some(adapter.events().await?);
        self.manager = Some(manager);
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn forget_adapter(&mut self) {
        self.central_events = None;
        self.adapter = None;
        self.manager = None;
    }

    async fn init(&mut self) {
        match self.ensure_adapter().await {
            Ok(_) => self.fault = None,
            Err(err) => {
                warn!("Bluetooth is not available: {}", err);
                self.fault = Some(fault_state(&err));
            },
        }
    }

    async fn start_scan(&mut self) {
        let adapter = match self.ensure_adapter().await {
            Ok(adapter) => adapter,
            Err(err) => {
                warn!("Scanning failed {:?}", err);
                self.fault = Some(fault_state(&err));
                return;
            },
        };

        if !self.scanner.start(Instant::now()) {
            debug!("Already scanning");
            return;
        }

        info!("Scanning for {:?}...", self.scanner.period());
        if let Err(err) = adapter.start_scan(ScanFilter::default()).await {
            let err = DeviceError::from(err);
            warn!("Scanning failed {:?}", err);
            self.scanner.stop();
            self.fault = Some(fault_state(&err));
            if self.fault == Some(DeviceState::Unavailable) {
                // the adapter might have gone away, look it up again next time
                self.forget_adapter();
            }
            return;
        }

        self.fault = None;
    }

    async fn stop_discovery(&mut self) {
        if let Some(adapter) = &self.adapter {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Failed to stop scanning: {:?}", err);
            }
        }
        info!("Scan stopped");
    }

    async fn stop_scan(&mut self) {
        if self.scanner.stop() {
            self.stop_discovery().await;
        }
    }

    async fn local_name(&mut self, id: &PeripheralId) -> Option<String> {
        let adapter = self.adapter.as_ref()?;

        let peripheral = match adapter.peripheral(id).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                debug!("Could not look up peripheral {:?}: {:?}", id, err);
                return None;
            },
        };

        match peripheral.properties().await {
            Ok(Some(properties)) => properties.local_name,
            Ok(None) => None,
            Err(err) => {
                debug!("Could not query peripheral for properties: {:?}", err);
                None
            },
        }
    }

    async fn on_peripheral_seen(&mut self, id: PeripheralId) {
        if !self.scanner.is_scanning() {
            return;
        }

        // updates for devices that already have a name can not change the list
        let named = self.scanner.position(&id)
            .and_then(|index| self.scanner.device(index))
            .map_or(false, |device| device.name.is_some());
        if named {
            return;
        }

        let name = self.local_name(&id).await;
        match self.scanner.on_discovered(id, name) {
            Discovery::New { index } => {
                let name = self.scanner.device(index).map(|device| device.display_name().to_string()).unwrap_or_default();
                info!("Discovered {} at position {}", name, index);
                self.emit(DeviceEvent::Discovered { index, name }).await;
            },
            Discovery::Renamed { index } => {
                let name = self.scanner.device(index).map(|device| device.display_name().to_string()).unwrap_or_default();
                debug!("Peripheral at position {} is named {}", index, name);
                self.emit(DeviceEvent::Renamed { index, name }).await;
            },
            Discovery::Known | Discovery::Ignored => {},
        }
    }

    async fn on_central_event(&mut self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                self.on_peripheral_seen(id).await;
            },
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(active) = &self.active_sync {
                    if active.link.on_disconnected(&id) {
                        info!("{} disconnected", active.link.name);
                    }
                }
            },
            _ => {},
        }
    }

    async fn select(&mut self, index: usize, cancel: &CancellationToken) {
        let active = self.active_sync.as_ref().map(|active| &active.link);
        let (id, name) = match choose_selection(&self.scanner, &self.config.target_name, index, active) {
            Selection::Start { id, name } => (id, name),
            Selection::NotTarget => {
                debug!("Ignoring selection of position {}, only {} is synchronised", index, self.config.target_name);
                return;
            },
            Selection::Busy { name } => {
                info!("Ignoring selection, still synchronising {}", name);
                return;
            },
        };

        let Some(adapter) = self.adapter.clone() else {
            warn!("No adapter to connect with");
            let outcome = SyncOutcome::ConnectFailed("no Bluetooth adapter".to_string());
            self.emit(DeviceEvent::SyncFinished { name, outcome }).await;
            return;
        };

        let peripheral = match adapter.peripheral(&id).await {
            Ok(peripheral) => peripheral,
            Err(err) => {
                warn!("Could not look up peripheral {:?}: {:?}", id, err);
                let outcome = SyncOutcome::ConnectFailed(err.to_string());
                self.emit(DeviceEvent::SyncFinished { name, outcome }).await;
                return;
            },
        };

        info!("Synchronising the time of {}", name);
        let link_lost = cancel.child_token();
        let policy = self.config.policy;
        let deadlines = self.deadlines;

        let handle = {
            let peripheral = peripheral.clone();
            let link_lost = link_lost.clone();
            spawn(async move {
                sync_peripheral(&peripheral, policy, LocalClock, deadlines, link_lost).await
            })
        };

        self.active_sync = Some(ActiveSync { link: SyncLink { id, name, link_lost }, peripheral, handle });
    }

    async fn on_command(&mut self, command: DeviceCommand, cancel: &CancellationToken) {
        match command {
            DeviceCommand::Configure(config) => {
                debug!("Configured {:?}", config);
                self.scanner.set_period(config.scan_period);
                self.config = config;
            },
            DeviceCommand::StartScan => self.start_scan().await,
            DeviceCommand::StopScan => self.stop_scan().await,
            DeviceCommand::Select(index) => self.select(index, cancel).await,
        }
    }

    async fn on_sync_done(&mut self, result: Result<SyncOutcome, JoinError>) {
        let Some(active) = self.active_sync.take() else {
            return;
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("Sync task of {} failed: {:?}", active.link.name, err);
                SyncOutcome::Disconnected
            },
        };

        if outcome.is_success() {
            info!("{}: {}", active.link.name, outcome);
        } else {
            error!("{}: {}", active.link.name, outcome);
        }

        self.emit(DeviceEvent::SyncFinished { name: active.link.name, outcome }).await;
    }

    async fn shutdown(&mut self) {
        info!("Device service stopping");
        self.stop_scan().await;

        if let Some(active) = self.active_sync.take() {
            info!("Waiting for the sync of {} to stop", active.link.name);
            active.link.link_lost.cancel();
            if let Err(err) = active.handle.await {
                warn!("Sync task failed: {:?}", err);
            }
            disconnect(&active.peripheral, self.deadlines.disconnect).await;
        }
    }

    async fn run(&mut self, cancel: CancellationToken, mut commands: Receiver<DeviceCommand>) {
        self.init().await;
        self.publish_state().await;

        loop {
            let deadline = self.scanner.deadline();
            let syncing = self.active_sync.is_some();

            let wake = tokio::select! {
                _ = cancel.cancelled() => Wake::Cancelled,
                command = commands.next() => match command {
                    Some(command) => Wake::Command(command),
                    // the front end is gone
                    None => Wake::Cancelled,
                },
                event = next_central_event(&mut self.central_events) => Wake::Central(event),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Wake::ScanTimeout,
                result = join_sync(&mut self.active_sync), if syncing => Wake::SyncDone(result),
            };

            match wake {
                Wake::Cancelled => break,
                Wake::Command(command) => self.on_command(command, &cancel).await,
                Wake::Central(Some(event)) => self.on_central_event(event).await,
                Wake::Central(None) => {
                    warn!("Adapter event stream ended");
                    self.stop_scan().await;
                    self.forget_adapter();
                    self.fault = Some(DeviceState::Unavailable);
                },
                Wake::ScanTimeout => {
                    if self.scanner.poll_timeout(Instant::now()) {
                        self.stop_discovery().await;
                    }
                },
                Wake::SyncDone(result) => self.on_sync_done(result).await,
            }

            self.publish_state().await;
        }

        self.shutdown().await;
    }
}

/// Runs the device service until `cancel` is cancelled or every command sender is dropped.
///
/// The first event sent is always [`DeviceEvent::Ready`], carrying the sender for commands.
pub async fn device_service(cancel: CancellationToken, config: DeviceConfig, events: Sender<DeviceEvent>) {
    let (command_sender, commands) = channel::<DeviceCommand>(16);
    let mut service = DeviceService::new(config, events);

    service.emit(DeviceEvent::Ready(command_sender)).await;
    service.run(cancel, commands).await;
}

pub fn device_subscription(cancel: CancellationToken, config: DeviceConfig) -> Subscription<DeviceEvent> {
    struct Connect;

    subscription::channel(
        std::any::TypeId::of::<Connect>(),
        64,
        move |subscription_sender| {
            async move {
                device_service(cancel, config, subscription_sender).await;

                // note: subscription::channel expects the future to never resolve (Infallible)
                pending::<Infallible>().await
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, Instant};

    fn scanner_with(names: &[Option<&str>]) -> Scanner<u32> {
        let mut scanner = Scanner::new(Duration::from_secs(10));
        scanner.start(Instant::now());
        for (id, name) in names.iter().enumerate() {
            scanner.on_discovered(id as u32, name.map(str::to_string));
        }
        scanner
    }

    fn link(id: u32, name: &str) -> SyncLink<u32> {
        SyncLink { id, name: name.to_string(), link_lost: CancellationToken::new() }
    }

    #[test]
    fn permission_denied_is_a_permission_notice() {
        let err = DeviceError::from(btleplug::Error::PermissionDenied);
        assert_eq!(fault_state(&err), DeviceState::NoPermission);
    }

    #[test]
    fn other_faults_mean_bluetooth_is_unavailable() {
        assert_eq!(fault_state(&DeviceError::NoAdapter), DeviceState::Unavailable);

        let err = DeviceError::from(btleplug::Error::Other("adapter powered off".into()));
        assert_eq!(fault_state(&err), DeviceState::Unavailable);
    }

    #[test]
    fn selecting_the_target_starts_a_sync() {
        let scanner = scanner_with(&[Some("Other"), Some("CWatch")]);

        assert_eq!(
            choose_selection(&scanner, "CWatch", 1, None),
            Selection::Start { id: 1, name: "CWatch".to_string() },
        );
    }

    #[test]
    fn selecting_anything_else_is_ignored() {
        let scanner = scanner_with(&[Some("Other"), None, Some("CWatch")]);

        assert_eq!(choose_selection(&scanner, "CWatch", 0, None), Selection::NotTarget);
        assert_eq!(choose_selection(&scanner, "CWatch", 1, None), Selection::NotTarget);
        assert_eq!(choose_selection(&scanner, "CWatch", 3, None), Selection::NotTarget);
    }

    #[test]
    fn selection_while_syncing_is_ignored() {
        let scanner = scanner_with(&[Some("CWatch"), Some("CWatch")]);
        let active = link(0, "CWatch");

        assert_eq!(
            choose_selection(&scanner, "CWatch", 1, Some(&active)),
            Selection::Busy { name: "CWatch".to_string() },
        );
        assert!(!active.link_lost.is_cancelled());
    }

    #[test]
    fn disconnect_of_the_syncing_peripheral_aborts_it() {
        let active = link(4, "CWatch");

        assert!(!active.on_disconnected(&5));
        assert!(!active.link_lost.is_cancelled());

        assert!(active.on_disconnected(&4));
        assert!(active.link_lost.is_cancelled());
    }

    #[test]
    fn disconnect_reaches_the_running_call() {
        let app_cancel = CancellationToken::new();
        let active = SyncLink { id: 4, name: "CWatch".to_string(), link_lost: app_cancel.child_token() };

        active.on_disconnected(&4);
        assert!(active.link_lost.is_cancelled());
        // only this sync is aborted, not the service
        assert!(!app_cancel.is_cancelled());
    }
}
