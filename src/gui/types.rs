use iced::{Event};

use crate::config::types::Config;
use crate::device::types::{DeviceEvent};

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    ConfigLoadComplete((Config, Option<String>)), // config and an optional error message
    NoticeConfirmed,
    DeviceEvent(DeviceEvent),
    ScanPressed,
    StopPressed,
    DeviceSelected(usize),
    CommandSent(bool), // false if the device service is gone
}
