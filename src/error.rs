use std::io;
use thiserror::Error;
use msgbox::IconType;
use std::fmt::Display;
use std::str::Utf8Error;
use btleplug;
use iced;
use serde_json;

use crate::device::sync::SyncOutcome;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Config file handle is unusable after a panic")]
    Poisoned,

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (iced): {source}")]
    Iced { #[from] source: iced::Error },

    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to start the async runtime: {source}")]
    Runtime { #[from] source: io::Error },

    #[error("Bluetooth is not available")]
    BluetoothUnavailable,

    #[error("Not allowed to access Bluetooth")]
    NoPermission,

    #[error("No device named {name} was found")]
    TargetNotFound { name: String },

    #[error("Synchronising {name} failed: {outcome}")]
    SyncFailed { name: String, outcome: SyncOutcome },
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,
}

pub fn error_msgbox<T: Display>(message: &'static str, error: &T) {
    let message = format!("{}: {}", message, error);
    eprintln!("{}", &message);
    if let Err(err) = msgbox::create(concat!("CWatch Sync ", env!("CARGO_PKG_VERSION")), &message, IconType::Error) {
        eprintln!("Failed to create msgbox: {:?}", err);
    }
}
