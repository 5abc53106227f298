mod auth;
mod broker;
mod config;
mod connection;
mod logger;
mod routing;
mod store;

use std::{process, sync::Arc};

use broker::MqttBroker;
use config::BrokerConfig;
use logger::BrokerLogger;

#[tokio::main]
async fn main() {
    let config_path = BrokerConfig::config_path();

    let config = match BrokerConfig::try_from(config_path.as_path()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "Could not load the configuration from {}: {err}",
                config_path.display()
            );
            process::exit(1);
        }
    };

    if config.should_log_console() || config.should_log_file() {
        if let Err(err) = BrokerLogger::new(&config).init(config.log_level()) {
            eprintln!("Could not install the logger: {err}");
        }
    }

    let broker = Arc::new(MqttBroker::new(config));

    if let Err(err) = broker.listen().await {
        log::error!("Fatal: {err}");
        process::exit(1);
    }
}
