use core::net::Ipv4Addr;

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::LevelFilter;
use nectar_core::qos::QosLevel;
use serde::Deserialize;

pub const CONFIG_ENV_VAR: &str = "NECTAR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

const DEFAULT_CONFIG: &str = r#"[connection]
ip = "127.0.0.1"
port = 8080

[logger]
console = true
file = false
level = "Info"

[broker]
max_qos = 2
"#;

#[derive(Deserialize)]
pub struct BrokerConfig {
    connection: Connection,
    logger: Logger,
    broker: Broker,
}

impl BrokerConfig {
    /// Resolves the config path from the environment (falling back to
    /// ./config.toml), creating the file with defaults when it is absent.
    pub fn config_path() -> PathBuf {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => return PathBuf::from(path),
            Err(_) => return PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    pub fn addr(&self) -> String {
        return self.connection.ip.to_string() + ":" + &self.connection.port.to_string();
    }

    pub fn should_log_file(&self) -> bool {
        return self.logger.file;
    }

    pub fn should_log_console(&self) -> bool {
        return self.logger.console;
    }

    pub fn max_qos(&self) -> QosLevel {
        match self.broker.max_qos {
            0 => return QosLevel::AtMostOnce,
            1 => return QosLevel::AtLeastOnce,
            _ => return QosLevel::ExactlyOnce,
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        return LevelFilter::from_str(&self.logger.level).unwrap_or_else(|_| {
            panic!(
                "Invalid log level provided: {}. Accepted levels are: Off, Error, Warn, Info, Debug, Trace",
                self.logger.level
            )
        });
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        return toml::from_str(DEFAULT_CONFIG).expect("Default configuration must parse");
    }
}

impl TryFrom<&Path> for BrokerConfig {
    type Error = toml::de::Error;

    fn try_from(value: &Path) -> Result<Self, toml::de::Error> {
        if !value.exists() {
            if let Err(err) = fs::write(value, DEFAULT_CONFIG) {
                log::warn!(
                    "Could not create a default config file at {}: {err}. Continuing with defaults.",
                    value.display()
                );
                return Ok(Self::default());
            }
            log::info!("Initialized a new config file at {}.", value.display());
        }

        let buf = match fs::read_to_string(value) {
            Ok(buf) => buf,
            Err(err) => {
                log::warn!("Could not read config file {}: {err}", value.display());
                String::from(DEFAULT_CONFIG)
            }
        };

        let config: BrokerConfig = toml::from_str(&buf)?;

        if config.connection.port == 8883 {
            log::warn!(
                "Listening in plaintext on port 8883. This port is conventionally reserved for TLS MQTT."
            );
        }

        return Ok(config);
    }
}

#[derive(Deserialize)]
struct Connection {
    ip: Ipv4Addr,
    port: u16,
}

#[derive(Deserialize)]
struct Logger {
    console: bool,
    file: bool,
    level: String,
}

#[derive(Deserialize)]
struct Broker {
    max_qos: u8,
}
