use std::env::{current_exe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::{ProjectDirs};
use log::{error, info, warn};
use tokio::fs::{File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

// creates a path to cwatch-sync.json in the same directory as the executable
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\cwatch-sync.exe => F:\cwatch-sync.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to cwatch-sync.json in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("org", "cwatch", "cwatch-sync").map(|dirs| {
        dirs.config_dir().join("cwatch-sync.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) if attr.is_file() => return Ok(path),
            Ok(_) => {},
            Err(err) => {
                info!("Could not read metadata of: {}; Using local path instead. ({})", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    // holding the guard keeps other instances (and their bluetooth connections) out
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        info!("Using config file {}", path.to_string_lossy());
        Self::open_sync(path)
    }

    pub fn open_sync(path: PathBuf) -> Result<Self, ConfigError> {
        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().map_err(|_| ConfigError::Poisoned)?;

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().map_err(|_| ConfigError::Poisoned)?;
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    /// Returns `None` if the file is empty, which is the case on first start.
    pub async fn read(&self) -> Result<Option<Config>, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let content = str::from_utf8(&content)?;

        let mut config: Config = serde_json::from_str(content)?;
        config.sanitize();
        Ok(Some(config))
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Reads the config, writing the defaults on first start.
    ///
    /// Never fails: problems are logged and returned as a message for the user next to the
    /// defaults.
    pub async fn load(&self) -> (Config, Option<String>) {
        match self.read().await {
            Ok(Some(config)) => (config, None),
            Ok(None) => {
                // this is probably the first start of the app
                info!("Config file is empty, using defaults");
                let config = Config::default();

                match self.save(&config).await {
                    Ok(()) => (config, None),
                    Err(err) => {
                        error!("Failed to save config: {:?}", &err);
                        (config, Some(format!("Failed to save config: {}", &err)))
                    },
                }
            },
            Err(err) => {
                error!("Failed to load config: {:?}", &err);
                (Config::default(), Some(format!("Failed to load config: {}", &err)))
            },
        }
    }
}
