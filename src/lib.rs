use std::env;
use tokio::runtime::Runtime;
use crate::cli::args::{Args, Mode};
use crate::cli::headless::run_headless_with_config;
use crate::config::io::ConfigIO;
use crate::gui::application::run_application;
use crate::error::AppRunError;

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod gui;

pub fn init_logging(level: log::LevelFilter) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(args: Args) -> Result<(), AppRunError> {
    // one instance at a time, so that at most one connection to the watch exists
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let overrides = args.overrides();

    match args.mode() {
        Mode::Gui => run_application(config_io, overrides)?,
        mode => {
            let runtime = Runtime::new()?;
            runtime.block_on(run_headless_with_config(mode, config_io, overrides))?;
        },
    }

    Ok(())
}
