use crate::core::client::{provider_url, ClientOptions};
use crate::core::coordinator::POLL_DELAY_HOURS;
use crate::domain::model::{CONF_COUNTER_ID, CONF_PASSWORD, CONF_PROVIDER, CONF_USERNAME};
use crate::utils::error::{Result, TsmeError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub account: Option<AccountConfig>,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    pub home_assistant: Option<HomeAssistantConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Account imported through the config flow on first start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub counter_id: String,
    pub username: String,
    pub password: String,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_hours: POLL_DELAY_HOURS,
        }
    }
}

fn default_interval_hours() -> u64 {
    POLL_DELAY_HOURS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeAssistantConfig {
    pub url: String,
    pub token: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_entries_path")]
    pub entries_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            entries_path: default_entries_path(),
        }
    }
}

fn default_entries_path() -> String {
    "./toutsurmoneau-entries.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BridgeConfig {
    /// Loads the configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(TsmeError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| TsmeError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables stay as written.
    fn substitute_env_vars(content: &str) -> String {
        use regex::Regex;
        use std::sync::OnceLock;
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .to_string()
    }

    pub fn validate_config(&self) -> Result<()> {
        if let Some(account) = &self.account {
            validation::validate_counter_id("account.counter_id", &account.counter_id)?;
            validation::validate_non_empty_string("account.username", &account.username)?;
            validation::validate_non_empty_string("account.password", &account.password)?;
            if let Some(provider) = &account.provider {
                provider_url(provider)?;
            }
        }

        if let Some(base_url) = &self.portal.base_url {
            validation::validate_url("portal.base_url", base_url)?;
        }
        if let Some(timeout) = self.portal.timeout_seconds {
            validation::validate_range("portal.timeout_seconds", timeout, 1, 600)?;
        }

        validation::validate_range("polling.interval_hours", self.polling.interval_hours, 1, 168)?;

        if let Some(ha) = &self.home_assistant {
            validation::validate_url("home_assistant.url", &ha.url)?;
            validation::validate_non_empty_string("home_assistant.token", &ha.token)?;
            if ha.token.contains("${") {
                return Err(TsmeError::InvalidConfigValueError {
                    field: "home_assistant.token".to_string(),
                    value: ha.token.clone(),
                    reason: "environment variable is not set".to_string(),
                });
            }
        }

        validation::validate_path("storage.entries_path", &self.storage.entries_path)?;

        let levels = ["error", "warn", "info", "debug", "trace"];
        if !levels.contains(&self.logging.level.as_str()) {
            return Err(TsmeError::InvalidConfigValueError {
                field: "logging.level".to_string(),
                value: self.logging.level.clone(),
                reason: format!("Valid levels: {}", levels.join(", ")),
            });
        }

        Ok(())
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            base_url: self.portal.base_url.clone(),
            timeout: self.portal.timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_hours * 3600)
    }

    /// The `[account]` section as config flow input.
    pub fn account_input(&self) -> Option<BTreeMap<String, String>> {
        self.account.as_ref().map(|account| {
            let mut input = BTreeMap::from([
                (CONF_COUNTER_ID.to_string(), account.counter_id.clone()),
                (CONF_USERNAME.to_string(), account.username.clone()),
                (CONF_PASSWORD.to_string(), account.password.clone()),
            ]);
            if let Some(provider) = &account.provider {
                input.insert(CONF_PROVIDER.to_string(), provider.clone());
            }
            input
        })
    }
}

impl Validate for BridgeConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
