pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::cli::LocalStorage;
pub use config::entries::ConfigEntries;
pub use config::toml_config::BridgeConfig;
pub use core::{
    client::{ClientOptions, SuezClient},
    coordinator::SuezCoordinator,
    home_assistant::{HomeAssistantClient, LogPublisher},
    integration::Integration,
};
pub use utils::error::{Result, TsmeError};
