use std::time::Duration;
use clap::{Parser, Subcommand};

use crate::config::types::ConfigOverrides;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Mode {
    /// Open the window (default)
    Gui,
    /// Print the names of nearby Bluetooth LE devices
    Scan,
    /// Find the watch and set its clock
    Sync,
}

#[derive(Debug, Parser)]
#[command(name = "cwatch-sync", version, about = "Sets the clock of a CWatch over Bluetooth LE")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Mode>,

    /// Advertised name of the watch
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// How long a scan runs, for example "10s" or "1m"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub scan_period: Option<Duration>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Args {
    pub fn mode(&self) -> Mode {
        self.command.unwrap_or(Mode::Gui)
    }

    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            target_name: self.target.clone(),
            scan_period: self.scan_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gui_is_the_default() {
        let args = Args::try_parse_from(["cwatch-sync"]).unwrap();
        assert_eq!(args.mode(), Mode::Gui);
        assert_eq!(args.overrides(), ConfigOverrides::default());
    }

    #[test]
    fn sync_with_overrides() {
        let args = Args::try_parse_from(["cwatch-sync", "sync", "--target", "MyWatch", "--scan-period", "1m 30s", "-v"]).unwrap();

        assert_eq!(args.mode(), Mode::Sync);
        assert!(args.verbose);
        assert_eq!(args.overrides(), ConfigOverrides {
            target_name: Some("MyWatch".to_string()),
            scan_period: Some(Duration::from_secs(90)),
        });
    }

    #[test]
    fn invalid_duration_is_rejected() {
        assert!(Args::try_parse_from(["cwatch-sync", "scan", "--scan-period", "soon"]).is_err());
    }
}
