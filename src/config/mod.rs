pub mod cli;
pub mod entries;
pub mod flow;
pub mod toml_config;

#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
pub enum Command {
    /// Fetch and print the latest readings
    Show,
    /// List the known providers
    Providers,
    /// Check the credentials against the portal
    Check,
}

impl Command {
    pub fn needs_credentials(&self) -> bool {
        !matches!(self, Command::Providers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(ValueEnum))]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "toutsurmoneau")]
#[command(about = "Read water consumption from the Tout sur mon eau portal")]
pub struct CliConfig {
    #[arg(short = 'u', long, env = "TSME_USERNAME", help = "Portal username (e-mail)")]
    pub username: Option<String>,

    #[arg(short = 'p', long, env = "TSME_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(short = 'c', long, env = "TSME_COUNTER_ID", help = "Counter id, discovered when omitted")]
    pub counter_id: Option<String>,

    #[arg(short = 'P', long, env = "TSME_PROVIDER", help = "Provider name")]
    pub provider: Option<String>,

    #[arg(long, env = "TSME_BASE_URL", hide = true)]
    pub base_url: Option<String>,

    #[arg(long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help = "Verbosity level")]
    pub verbose: u8,

    #[arg(value_enum, default_value = "show")]
    pub command: Command,
}

#[cfg(feature = "cli")]
impl crate::utils::validation::Validate for CliConfig {
    fn validate(&self) -> crate::utils::error::Result<()> {
        use crate::utils::validation;
        if let Some(provider) = &self.provider {
            crate::core::client::provider_url(provider)?;
        }
        if let Some(counter_id) = &self.counter_id {
            validation::validate_counter_id("counter_id", counter_id)?;
        }
        if let Some(base_url) = &self.base_url {
            validation::validate_url("base_url", base_url)?;
        }
        if let Some(timeout) = self.timeout {
            validation::validate_range("timeout", timeout, 1, 600)?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use crate::utils::validation::Validate;

    #[test]
    fn test_defaults_to_show() {
        let config = CliConfig::try_parse_from(["toutsurmoneau", "-u", "me", "-p", "pw"]).unwrap();
        assert_eq!(config.command, Command::Show);
        assert_eq!(config.format, OutputFormat::Text);
        assert_eq!(config.verbose, 0);
    }

    #[test]
    fn test_parse_all_flags() {
        let config = CliConfig::try_parse_from([
            "toutsurmoneau",
            "-u",
            "me@example.org",
            "-c",
            "123456",
            "-P",
            "Eau Olivet",
            "-vvv",
            "check",
        ])
        .unwrap();
        assert_eq!(config.command, Command::Check);
        assert_eq!(config.verbose, 3);
        assert_eq!(config.provider.as_deref(), Some("Eau Olivet"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_providers_needs_no_credentials() {
        assert!(!Command::Providers.needs_credentials());
        assert!(Command::Check.needs_credentials());
        let config = CliConfig::try_parse_from(["toutsurmoneau", "-P", "Veolia", "providers"]).unwrap();
        assert!(config.validate().is_err());
    }
}
