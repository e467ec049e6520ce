use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DOMAIN: &str = "toutsurmoneau";

pub const CONF_COUNTER_ID: &str = "counter_id";
pub const CONF_USERNAME: &str = "username";
pub const CONF_PASSWORD: &str = "password";
pub const CONF_PROVIDER: &str = "provider";

/// A water volume pair as the portal reports it, in cubic metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub delta: f64,
    pub total: f64,
}

/// Everything one successful update reads from the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionSnapshot {
    pub counter_id: String,
    pub last_known: f64,
    pub last: Consumption,
    pub this_month: IndexMap<String, Consumption>,
    pub prev_month: IndexMap<String, Consumption>,
    pub history: IndexMap<String, Consumption>,
    pub this_year_overall: f64,
    pub last_year_overall: f64,
    pub highest_monthly: f64,
    pub uptodate: bool,
    pub attribution: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStateClass {
    Total,
}

impl SensorStateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorStateClass::Total => "total",
        }
    }
}

/// One coordinator slot, handed to the sensor at the same index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorData {
    pub name: String,
    pub value: Option<f64>,
    pub counter_id: String,
    pub valid: bool,
    pub state_class: Option<SensorStateClass>,
    pub attribution: Option<String>,
}

/// State payload accepted by the Home Assistant states API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    #[serde(skip)]
    pub entity_id: String,
    pub state: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Effective configuration of one account: entry data overlaid by options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryConfig {
    pub counter_id: Option<String>,
    pub username: String,
    pub password: String,
    pub provider: Option<String>,
}

impl EntryConfig {
    pub fn from_map(values: &BTreeMap<String, String>) -> crate::utils::error::Result<Self> {
        let get = |key: &str| {
            values
                .get(key)
                .cloned()
                .ok_or_else(|| crate::utils::error::TsmeError::MissingConfigError {
                    field: key.to_string(),
                })
        };
        Ok(Self {
            counter_id: values
                .get(CONF_COUNTER_ID)
                .filter(|v| !v.is_empty())
                .cloned(),
            username: get(CONF_USERNAME)?,
            password: get(CONF_PASSWORD)?,
            provider: values.get(CONF_PROVIDER).filter(|v| !v.is_empty()).cloned(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub domain: String,
    pub title: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn new(title: &str, unique_id: Option<String>, data: BTreeMap<String, String>) -> Self {
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            domain: DOMAIN.to_string(),
            title: title.to_string(),
            unique_id,
            data,
            options: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Data with options layered on top, options winning.
    pub fn merged(&self) -> BTreeMap<String, String> {
        let mut merged = self.data.clone();
        merged.extend(self.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn entry_config(&self) -> crate::utils::error::Result<EntryConfig> {
        EntryConfig::from_map(&self.merged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> BTreeMap<String, String> {
        BTreeMap::from([
            (CONF_COUNTER_ID.to_string(), "123456".to_string()),
            (CONF_USERNAME.to_string(), "me@example.org".to_string()),
            (CONF_PASSWORD.to_string(), "secret".to_string()),
        ])
    }

    #[test]
    fn test_options_override_data() {
        let mut entry = ConfigEntry::new("toutsurmoneau", Some(DOMAIN.to_string()), data());
        entry
            .options
            .insert(CONF_PASSWORD.to_string(), "rotated".to_string());
        entry
            .options
            .insert(CONF_PROVIDER.to_string(), "Eau Olivet".to_string());

        let config = entry.entry_config().unwrap();
        assert_eq!(config.password, "rotated");
        assert_eq!(config.provider.as_deref(), Some("Eau Olivet"));
        assert_eq!(config.counter_id.as_deref(), Some("123456"));
        assert_eq!(entry.domain, DOMAIN);
    }

    #[test]
    fn test_missing_username_is_rejected() {
        let mut values = data();
        values.remove(CONF_USERNAME);
        assert!(EntryConfig::from_map(&values).is_err());
    }

    #[test]
    fn test_state_class_wire_name() {
        assert_eq!(SensorStateClass::Total.as_str(), "total");
        assert_eq!(
            serde_json::to_value(SensorStateClass::Total).unwrap(),
            serde_json::json!("total")
        );
    }

    #[test]
    fn test_empty_counter_id_means_discovery() {
        let mut values = data();
        values.insert(CONF_COUNTER_ID.to_string(), String::new());
        assert_eq!(EntryConfig::from_map(&values).unwrap().counter_id, None);
    }
}
