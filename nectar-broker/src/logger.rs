use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

use colored::*;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use time::{format_description::FormatItem, OffsetDateTime};

use crate::config::BrokerConfig;

const TIMESTAMP_FORMAT_UTC: &[FormatItem] = time::macros::format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "logs/broker.log";

pub struct BrokerLogger {
    write_file: bool,
    write_console: bool,
}

impl log::Log for BrokerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let timestamp = OffsetDateTime::now_utc()
                .format(TIMESTAMP_FORMAT_UTC)
                .expect("Logger could not format the UTC time. It is likely that your system does not support UTC.");

            let colorized_level_string = match record.level() {
                Level::Error => format!("{:<5}", record.level()).red().to_string(),
                Level::Warn => format!("{:<5}", record.level()).yellow().to_string(),
                Level::Info => format!("{:<5}", record.level()).cyan().to_string(),
                Level::Debug => format!("{:<5}", record.level()).purple().to_string(),
                Level::Trace => format!("{:<5}", record.level()).normal().to_string(),
            };

            if self.write_console {
                println!("{colorized_level_string} - {} - {timestamp};", record.args());
            }

            if self.write_file {
                self.log_file(record, &timestamp);
            }
        }
    }

    fn flush(&self) {}
}

impl BrokerLogger {
    pub fn new(config: &BrokerConfig) -> Self {
        return Self {
            write_file: config.should_log_file(),
            write_console: config.should_log_console(),
        };
    }

    pub fn init(self, level: LevelFilter) -> Result<(), SetLoggerError> {
        if self.write_file {
            init_log_fs();
        }

        log::set_max_level(level);
        return log::set_boxed_logger(Box::new(self));
    }

    fn log_file(&self, record: &Record, timestamp: &str) {
        let log_string = format!("{};{};{}\n", record.level(), record.args(), timestamp);

        match OpenOptions::new().append(true).create(true).open(LOG_FILE) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(log_string.as_bytes()) {
                    eprintln!("Could not append to {LOG_FILE}: {err}");
                }
            }
            Err(err) => {
                eprintln!("Could not open {LOG_FILE}: {err}");
            }
        }
    }
}

fn init_log_fs() {
    let path = Path::new(LOG_DIR);

    match fs::exists(path) {
        Ok(true) => {}
        Ok(false) => {
            if let Err(err) = fs::create_dir(path) {
                eprintln!("Could not create the {LOG_DIR} directory: {err}");
            }
        }
        Err(err) => {
            eprintln!("Could not check for the {LOG_DIR} directory: {err}");
        }
    }
}
