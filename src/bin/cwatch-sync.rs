use std::process::ExitCode;
use clap::Parser;
use log::{info, LevelFilter};
use msgbox::IconType;
use cwatch_sync::{init_logging, run};
use cwatch_sync::cli::args::{Args, Mode};
use cwatch_sync::error::{error_msgbox, AppRunError, ConfigError};

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info });
    info!(concat!("CWatch Sync ", env!("CARGO_PKG_VERSION")));

    let gui = args.mode() == Mode::Gui;

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            let message = "This application has already been started";
            if gui {
                if let Err(err) = msgbox::create(concat!("CWatch Sync ", env!("CARGO_PKG_VERSION")), message, IconType::Error) {
                    eprintln!("Failed to create msgbox: {:?}", err);
                }
            } else {
                eprintln!("{}", message);
            }
            ExitCode::FAILURE
        },
        Err(err) => {
            if gui {
                error_msgbox("Unexpected error", &err);
            } else {
                eprintln!("{}", err);
            }
            ExitCode::FAILURE
        },
        Ok(_) => ExitCode::SUCCESS,
    }
}
