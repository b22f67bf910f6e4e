use std::{fs, time::SystemTime};

pub use log::LevelFilter;
use parking_lot::Once;
use thiserror::Error;

const LOG_PATH: &str = "veneer.log";

/// Plugin-wide logger: stdout plus one fresh log file per game launch,
/// built on "fern".
pub struct GlobalLogger;

static LOGGER_INITIALIZED: Once = Once::new();

#[derive(Debug, Error)]
pub enum GlobalLoggerError {
    #[error("Could not replace previous log file: {0}")]
    LogFileError(#[from] std::io::Error),

    #[error("A logger was already installed: {0}")]
    SetLoggerError(#[from] log::SetLoggerError),
}

impl GlobalLogger {
    /// Installs the logger. Idempotent: only the first call does any
    /// work, later calls return Ok without touching the log file.
    pub fn init() -> Result<(), GlobalLoggerError> {
        let mut result = Ok(());

        LOGGER_INITIALIZED.call_once(|| {
            result = Self::setup(LOG_PATH, LevelFilter::Debug);
        });

        result
    }

    fn setup(log_path: &str, level_filter: LevelFilter) -> Result<(), GlobalLoggerError> {
        if fs::exists(log_path)? {
            fs::remove_file(log_path)?;
        }

        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {:<5} [{}] {}",
                    humantime::format_rfc3339_seconds(SystemTime::now()),
                    record.level(),
                    record.target(),
                    message
                ))
            })
            .level(level_filter)
            .chain(std::io::stdout())
            .chain(fern::log_file(log_path)?)
            .apply()?;

        Ok(())
    }
}
