use std::fmt;
use btleplug::api::{CharPropFlags, WriteType};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::device::constants::{DAY_DATE_TIME_CHARACTERISTIC, DAY_OF_WEEK_CHARACTERISTIC, RAW_TIME_SERVICE};
use crate::device::payload::{TimePayload, WallClock};

/// What to do with the connection once a sync attempt has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub disconnect_on_failure: bool,
    pub disconnect_after_sync: bool,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            disconnect_on_failure: true,
            disconnect_after_sync: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharPropFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Acknowledged,
    Unacknowledged,
}

impl From<WriteMode> for WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::Unacknowledged => WriteType::WithoutResponse,
        }
    }
}

/// Prefer acknowledged writes; `None` if the characteristic can not be written at all.
pub fn select_write_mode(properties: CharPropFlags) -> Option<WriteMode> {
    if properties.contains(CharPropFlags::WRITE) {
        Some(WriteMode::Acknowledged)
    } else if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        Some(WriteMode::Unacknowledged)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Connecting,
    DiscoveringServices,
    WritingDateTime,
    WritingDayOfWeek,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Success,
    InvalidAttributeLength,
    WriteNotPermitted,
    Failure(String),
}

impl fmt::Display for WriteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteStatus::Success => write!(f, "success"),
            WriteStatus::InvalidAttributeLength => write!(f, "write exceeded the attribute length"),
            WriteStatus::WriteNotPermitted => write!(f, "write not permitted"),
            WriteStatus::Failure(reason) => write!(f, "{}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncInput {
    Connected,
    ConnectFailed(String),
    /// The connect request outlived its deadline; the platform may still complete it.
    ConnectTimedOut,
    ServicesDiscovered(Vec<GattCharacteristic>),
    DiscoveryFailed(String),
    WriteCompleted { characteristic: Uuid, status: WriteStatus },
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Connect,
    DiscoverServices,
    Write { characteristic: GattCharacteristic, payload: Vec<u8>, mode: WriteMode },
    Disconnect,
    Finish(SyncOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    ConnectFailed(String),
    DiscoveryFailed(String),
    MissingCharacteristic(Uuid),
    Unwritable(Uuid),
    WriteFailed { characteristic: Uuid, status: WriteStatus },
    Disconnected,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Synced => write!(f, "Time synchronised"),
            SyncOutcome::ConnectFailed(reason) => write!(f, "Connecting failed: {}", reason),
            SyncOutcome::DiscoveryFailed(reason) => write!(f, "Discovering services failed: {}", reason),
            SyncOutcome::MissingCharacteristic(uuid) => write!(f, "The watch has no characteristic {}", uuid),
            SyncOutcome::Unwritable(uuid) => write!(f, "Characteristic {} can not be written", uuid),
            SyncOutcome::WriteFailed { characteristic, status } => {
                write!(f, "Writing {} failed: {}", characteristic, status)
            },
            SyncOutcome::Disconnected => write!(f, "The watch disconnected"),
        }
    }
}

/// One connection attempt to the watch, from connecting until a terminal state.
///
/// The session never performs I/O. It answers every [`SyncInput`] with the
/// actions the driver must take next. A write is only ever requested after the
/// previous one completed, so at most one write is in flight.
#[derive(Debug)]
pub struct SyncSession<C> {
    state: SyncState,
    policy: SyncPolicy,
    clock: C,
    characteristics: Vec<GattCharacteristic>,
}

impl<C: WallClock> SyncSession<C> {
    pub fn new(policy: SyncPolicy, clock: C) -> Self {
        SyncSession {
            state: SyncState::Idle,
            policy,
            clock,
            characteristics: Vec::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn begin(&mut self) -> Vec<SyncAction> {
        if self.state != SyncState::Idle {
            return vec![];
        }

        self.state = SyncState::Connecting;
        vec![SyncAction::Connect]
    }

    pub fn handle(&mut self, input: SyncInput) -> Vec<SyncAction> {
        match (self.state, input) {
            (SyncState::Idle, input) => {
                debug!("Ignoring {:?} while idle", input);
                vec![]
            },
            (_, SyncInput::Disconnected) => {
                warn!("Peripheral disconnected during {:?}", self.state);
                self.finish(false, SyncOutcome::Disconnected)
            },
            (SyncState::Connecting, SyncInput::Connected) => {
                self.state = SyncState::DiscoveringServices;
                vec![SyncAction::DiscoverServices]
            },
            (SyncState::Connecting, SyncInput::ConnectFailed(reason)) => {
                warn!("Connecting to peripheral failed: {}", reason);
                // nothing to disconnect, the handle is simply released
                self.finish(false, SyncOutcome::ConnectFailed(reason))
            },
            (SyncState::Connecting, SyncInput::ConnectTimedOut) => {
                warn!("Connecting to peripheral took too long");
                // an abandoned connect request can still succeed, so tear it down like any other failure
                self.fail(SyncOutcome::ConnectFailed("connecting took too long".to_string()))
            },
            (SyncState::DiscoveringServices, SyncInput::ServicesDiscovered(characteristics)) => {
                self.characteristics = characteristics;

                let payload = TimePayload::capture(&self.clock.now());
                match self.write(DAY_DATE_TIME_CHARACTERISTIC, payload.date_time_bytes().to_vec()) {
                    Ok(action) => {
                        self.state = SyncState::WritingDateTime;
                        vec![action]
                    },
                    Err(outcome) => self.fail(outcome),
                }
            },
            (SyncState::DiscoveringServices, SyncInput::DiscoveryFailed(reason)) => {
                self.fail(SyncOutcome::DiscoveryFailed(reason))
            },
            (SyncState::WritingDateTime, SyncInput::WriteCompleted { characteristic, status })
                if characteristic == DAY_DATE_TIME_CHARACTERISTIC =>
            {
                if status != WriteStatus::Success {
                    log_write_failure(characteristic, &status);
                    return self.fail(SyncOutcome::WriteFailed { characteristic, status });
                }

                info!("Wrote to characteristic {}", characteristic);
                // read the clock again, the date/time write may have crossed midnight
                let payload = TimePayload::capture(&self.clock.now());
                match self.write(DAY_OF_WEEK_CHARACTERISTIC, payload.day_of_week_bytes().to_vec()) {
                    Ok(action) => {
                        self.state = SyncState::WritingDayOfWeek;
                        vec![action]
                    },
                    Err(outcome) => self.fail(outcome),
                }
            },
            (SyncState::WritingDayOfWeek, SyncInput::WriteCompleted { characteristic, status })
                if characteristic == DAY_OF_WEEK_CHARACTERISTIC =>
            {
                if status != WriteStatus::Success {
                    log_write_failure(characteristic, &status);
                    return self.fail(SyncOutcome::WriteFailed { characteristic, status });
                }

                info!("Wrote to characteristic {}", characteristic);
                let disconnect = self.policy.disconnect_after_sync;
                self.finish(disconnect, SyncOutcome::Synced)
            },
            (state, input) => {
                debug!("Ignoring {:?} during {:?}", input, state);
                vec![]
            },
        }
    }

    fn write(&self, uuid: Uuid, payload: Vec<u8>) -> Result<SyncAction, SyncOutcome> {
        let characteristic = self.characteristics
            .iter()
            .find(|characteristic| characteristic.service == RAW_TIME_SERVICE && characteristic.uuid == uuid)
            .ok_or(SyncOutcome::MissingCharacteristic(uuid))?;

        let mode = select_write_mode(characteristic.properties)
            .ok_or(SyncOutcome::Unwritable(uuid))?;

        Ok(SyncAction::Write {
            characteristic: characteristic.clone(),
            payload,
            mode,
        })
    }

    fn fail(&mut self, outcome: SyncOutcome) -> Vec<SyncAction> {
        let disconnect = self.policy.disconnect_on_failure;
        self.finish(disconnect, outcome)
    }

    fn finish(&mut self, disconnect: bool, outcome: SyncOutcome) -> Vec<SyncAction> {
        self.state = SyncState::Idle;
        self.characteristics.clear();

        let mut actions = Vec::with_capacity(2);
        if disconnect {
            actions.push(SyncAction::Disconnect);
        }
        actions.push(SyncAction::Finish(outcome));
        actions
    }
}

fn log_write_failure(characteristic: Uuid, status: &WriteStatus) {
    match status {
        WriteStatus::InvalidAttributeLength => warn!("Write to {} exceeded connection ATT MTU", characteristic),
        WriteStatus::WriteNotPermitted => warn!("Write not permitted for {}", characteristic),
        _ => warn!("Characteristic write failed for {}: {}", characteristic, status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    struct FixedClock(NaiveDateTime);

    impl WallClock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn clock() -> FixedClock {
        // a Wednesday
        FixedClock(NaiveDate::from_ymd_opt(2024, 7, 3).unwrap().and_hms_opt(8, 30, 0).unwrap())
    }

    fn characteristic(uuid: Uuid, properties: CharPropFlags) -> GattCharacteristic {
        GattCharacteristic { service: RAW_TIME_SERVICE, uuid, properties }
    }

    fn time_service() -> Vec<GattCharacteristic> {
        vec![
            characteristic(DAY_DATE_TIME_CHARACTERISTIC, CharPropFlags::READ | CharPropFlags::WRITE),
            characteristic(DAY_OF_WEEK_CHARACTERISTIC, CharPropFlags::WRITE_WITHOUT_RESPONSE),
        ]
    }

    fn written(status: WriteStatus, characteristic: Uuid) -> SyncInput {
        SyncInput::WriteCompleted { characteristic, status }
    }

    fn until_date_time_write(policy: SyncPolicy) -> SyncSession<FixedClock> {
        let mut session = SyncSession::new(policy, clock());
        assert_eq!(session.begin(), vec![SyncAction::Connect]);
        assert_eq!(session.handle(SyncInput::Connected), vec![SyncAction::DiscoverServices]);
        let actions = session.handle(SyncInput::ServicesDiscovered(time_service()));
        assert_eq!(actions.len(), 1);
        assert_eq!(session.state(), SyncState::WritingDateTime);
        session
    }

    #[test]
    fn write_mode_prefers_acknowledged() {
        assert_eq!(select_write_mode(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE), Some(WriteMode::Acknowledged));
        assert_eq!(select_write_mode(CharPropFlags::WRITE_WITHOUT_RESPONSE), Some(WriteMode::Unacknowledged));
        assert_eq!(select_write_mode(CharPropFlags::READ | CharPropFlags::NOTIFY), None);
    }

    #[test]
    fn full_sequence() {
        let mut session = SyncSession::new(SyncPolicy::default(), clock());
        session.begin();
        session.handle(SyncInput::Connected);

        let actions = session.handle(SyncInput::ServicesDiscovered(time_service()));
        assert_eq!(actions, vec![SyncAction::Write {
            characteristic: time_service()[0].clone(),
            payload: vec![6, 3, 0, 0, 0x07, 0xE8, 8, 30, 0],
            mode: WriteMode::Acknowledged,
        }]);

        let actions = session.handle(written(WriteStatus::Success, DAY_DATE_TIME_CHARACTERISTIC));
        assert_eq!(actions, vec![SyncAction::Write {
            characteristic: time_service()[1].clone(),
            payload: vec![3],
            mode: WriteMode::Unacknowledged,
        }]);
        assert_eq!(session.state(), SyncState::WritingDayOfWeek);

        let actions = session.handle(written(WriteStatus::Success, DAY_OF_WEEK_CHARACTERISTIC));
        assert_eq!(actions, vec![SyncAction::Disconnect, SyncAction::Finish(SyncOutcome::Synced)]);
        assert_eq!(session.state(), SyncState::Idle);
    }

    #[test]
    fn rejected_date_time_write_stops_the_sequence() {
        for status in [WriteStatus::InvalidAttributeLength, WriteStatus::WriteNotPermitted, WriteStatus::Failure("busy".to_string())] {
            let mut session = until_date_time_write(SyncPolicy::default());
            let actions = session.handle(written(status.clone(), DAY_DATE_TIME_CHARACTERISTIC));

            assert_eq!(actions, vec![
                SyncAction::Disconnect,
                SyncAction::Finish(SyncOutcome::WriteFailed { characteristic: DAY_DATE_TIME_CHARACTERISTIC, status }),
            ]);
            assert_eq!(session.state(), SyncState::Idle);
        }
    }

    #[test]
    fn keep_open_policy_leaves_the_connection_alone() {
        let policy = SyncPolicy { disconnect_on_failure: false, disconnect_after_sync: false };
        let mut session = until_date_time_write(policy);

        let actions = session.handle(written(WriteStatus::WriteNotPermitted, DAY_DATE_TIME_CHARACTERISTIC));
        assert!(!actions.contains(&SyncAction::Disconnect));

        let mut session = until_date_time_write(policy);
        session.handle(written(WriteStatus::Success, DAY_DATE_TIME_CHARACTERISTIC));
        let actions = session.handle(written(WriteStatus::Success, DAY_OF_WEEK_CHARACTERISTIC));
        assert_eq!(actions, vec![SyncAction::Finish(SyncOutcome::Synced)]);
    }

    #[test]
    fn rejected_day_of_week_write_is_terminal() {
        let mut session = until_date_time_write(SyncPolicy::default());
        session.handle(written(WriteStatus::Success, DAY_DATE_TIME_CHARACTERISTIC));

        let actions = session.handle(written(WriteStatus::WriteNotPermitted, DAY_OF_WEEK_CHARACTERISTIC));
        assert_eq!(actions.last(), Some(&SyncAction::Finish(SyncOutcome::WriteFailed {
            characteristic: DAY_OF_WEEK_CHARACTERISTIC,
            status: WriteStatus::WriteNotPermitted,
        })));
        assert_eq!(session.state(), SyncState::Idle);
    }

    #[test]
    fn completion_for_another_characteristic_is_ignored() {
        let mut session = until_date_time_write(SyncPolicy::default());

        assert!(session.handle(written(WriteStatus::Success, DAY_OF_WEEK_CHARACTERISTIC)).is_empty());
        assert_eq!(session.state(), SyncState::WritingDateTime);
    }

    #[test]
    fn connect_failure_releases_without_disconnect() {
        let mut session = SyncSession::new(SyncPolicy::default(), clock());
        session.begin();

        let actions = session.handle(SyncInput::ConnectFailed("timeout".to_string()));
        assert_eq!(actions, vec![SyncAction::Finish(SyncOutcome::ConnectFailed("timeout".to_string()))]);
        assert_eq!(session.state(), SyncState::Idle);
    }

    #[test]
    fn connect_timeout_disconnects_the_pending_connection() {
        let mut session = SyncSession::new(SyncPolicy::default(), clock());
        session.begin();

        let actions = session.handle(SyncInput::ConnectTimedOut);
        assert_eq!(actions, vec![
            SyncAction::Disconnect,
            SyncAction::Finish(SyncOutcome::ConnectFailed("connecting took too long".to_string())),
        ]);
        assert_eq!(session.state(), SyncState::Idle);
    }

    #[test]
    fn connect_timeout_honours_the_keep_open_policy() {
        let policy = SyncPolicy { disconnect_on_failure: false, ..SyncPolicy::default() };
        let mut session = SyncSession::new(policy, clock());
        session.begin();

        let actions = session.handle(SyncInput::ConnectTimedOut);
        assert_eq!(actions, vec![
            SyncAction::Finish(SyncOutcome::ConnectFailed("connecting took too long".to_string())),
        ]);
    }

    #[test]
    fn missing_service_fails_before_writing() {
        let mut session = SyncSession::new(SyncPolicy::default(), clock());
        session.begin();
        session.handle(SyncInput::Connected);

        let other = GattCharacteristic {
            service: Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb),
            uuid: DAY_DATE_TIME_CHARACTERISTIC,
            properties: CharPropFlags::WRITE,
        };
        let actions = session.handle(SyncInput::ServicesDiscovered(vec![other]));
        assert_eq!(actions, vec![
            SyncAction::Disconnect,
            SyncAction::Finish(SyncOutcome::MissingCharacteristic(DAY_DATE_TIME_CHARACTERISTIC)),
        ]);
    }

    #[test]
    fn unwritable_characteristic_fails() {
        let mut session = SyncSession::new(SyncPolicy::default(), clock());
        session.begin();
        session.handle(SyncInput::Connected);

        let actions = session.handle(SyncInput::ServicesDiscovered(vec![
            characteristic(DAY_DATE_TIME_CHARACTERISTIC, CharPropFlags::READ),
        ]));
        assert_eq!(actions.last(), Some(&SyncAction::Finish(SyncOutcome::Unwritable(DAY_DATE_TIME_CHARACTERISTIC))));
    }

    #[test]
    fn missing_day_of_week_characteristic_fails_after_date_time() {
        let mut session = SyncSession::new(SyncPolicy::default(), clock());
        session.begin();
        session.handle(SyncInput::Connected);
        session.handle(SyncInput::ServicesDiscovered(vec![time_service()[0].clone()]));

        let actions = session.handle(written(WriteStatus::Success, DAY_DATE_TIME_CHARACTERISTIC));
        assert_eq!(actions.last(), Some(&SyncAction::Finish(SyncOutcome::MissingCharacteristic(DAY_OF_WEEK_CHARACTERISTIC))));
    }

    #[test]
    fn peripheral_disconnect_is_terminal_from_any_state() {
        let mut session = until_date_time_write(SyncPolicy::default());
        assert_eq!(session.handle(SyncInput::Disconnected), vec![SyncAction::Finish(SyncOutcome::Disconnected)]);
        assert_eq!(session.state(), SyncState::Idle);

        // late events after the terminal state are ignored
        assert!(session.handle(written(WriteStatus::Success, DAY_DATE_TIME_CHARACTERISTIC)).is_empty());
        assert!(session.handle(SyncInput::Disconnected).is_empty());
    }

    #[test]
    fn begin_is_ignored_while_a_sync_runs() {
        let mut session = until_date_time_write(SyncPolicy::default());
        assert!(session.begin().is_empty());
    }
}
