use crate::error::{BridgeError, Result};
use log::{LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOG_FILE: &str = "bridge.log";

#[derive(Debug)]
struct FileLogger {
    log_file: PathBuf,
    level: LevelFilter,
}

static LOGGER: OnceCell<FileLogger> = OnceCell::new();

impl log::Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let log_entry = format_entry(record);
            if let Ok(mut file) = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
            {
                let _ = file.write_all(log_entry.as_bytes());
            }
        }
    }

    fn flush(&self) {}
}

fn format_entry(record: &Record) -> String {
    format!(
        "{} {:<5} {} - {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.target(),
        record.args()
    )
}

/// Parses the `log_level` setting, defaulting to `Debug` on anything unknown.
pub fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Debug)
}

/// Installs the process-wide file logger under `log_dir`.
pub fn init(log_dir: &Path, level: LevelFilter) -> Result<()> {
    create_dir_all(log_dir)?;

    LOGGER
        .set(FileLogger {
            log_file: log_dir.join(LOG_FILE),
            level,
        })
        .map_err(|_| BridgeError::Logger("logger already initialised".to_string()))?;

    match LOGGER.get() {
        Some(logger) => {
            log::set_logger(logger)?;
            log::set_max_level(level);
            Ok(())
        }
        None => Err(BridgeError::Logger("logger cell empty".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_level_falls_back_to_debug() {
        assert_eq!(parse_level("warn"), LevelFilter::Warn);
        assert_eq!(parse_level("loud"), LevelFilter::Debug);
    }

    #[test]
    fn second_init_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let _ = init(dir.path(), LevelFilter::Info);
        assert!(init(dir.path(), LevelFilter::Info).is_err());
    }
}
