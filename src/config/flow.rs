//! Config and options flows: the form an account is set up with.

use crate::config::entries::ConfigEntries;
use crate::core::client::{providers, ClientOptions, SuezClient};
use crate::domain::model::{
    ConfigEntry, EntryConfig, CONF_COUNTER_ID, CONF_PASSWORD, CONF_PROVIDER, CONF_USERNAME, DOMAIN,
};
use crate::domain::ports::{Storage, WaterPortal};
use crate::utils::error::{Result, TsmeError};
use crate::utils::validation::{validate_counter_id, validate_non_empty_string};
use std::collections::BTreeMap;

pub type FormInput = BTreeMap<String, String>;

pub const ENTRY_TITLE: &str = "toutsurmoneau";
pub const DEFAULT_USERNAME: &str = "user@example.org";

pub const ERROR_INVALID_AUTH: &str = "invalid_auth";
pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ABORT_SINGLE_INSTANCE: &str = "single_instance_allowed";
pub const ERROR_REQUIRED: &str = "required";
pub const ERROR_INVALID: &str = "invalid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaField {
    pub key: &'static str,
    pub required: bool,
    pub default: Option<String>,
    pub choices: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowResult {
    ShowForm {
        step_id: &'static str,
        schema: Vec<SchemaField>,
        errors: BTreeMap<String, String>,
    },
    CreateEntry {
        title: String,
        data: BTreeMap<String, String>,
    },
    Abort {
        reason: &'static str,
    },
}

/// Builds the form schema; defaults come from `defaults` when present.
pub fn schema(defaults: Option<&BTreeMap<String, String>>) -> Vec<SchemaField> {
    let default = |key: &str, fallback: &str| {
        Some(
            defaults
                .and_then(|d| d.get(key))
                .cloned()
                .unwrap_or_else(|| fallback.to_string()),
        )
    };
    vec![
        SchemaField {
            key: CONF_COUNTER_ID,
            required: true,
            default: default(CONF_COUNTER_ID, ""),
            choices: None,
        },
        SchemaField {
            key: CONF_USERNAME,
            required: true,
            default: default(CONF_USERNAME, DEFAULT_USERNAME),
            choices: None,
        },
        SchemaField {
            key: CONF_PASSWORD,
            required: true,
            default: default(CONF_PASSWORD, ""),
            choices: None,
        },
        SchemaField {
            key: CONF_PROVIDER,
            required: false,
            default: defaults.and_then(|d| d.get(CONF_PROVIDER)).cloned(),
            choices: Some(providers().into_iter().map(String::from).collect()),
        },
    ]
}

/// Applies defaults and checks every field of `info` against `schema`.
pub fn validate_input(schema: &[SchemaField], info: &FormInput) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    for field in schema {
        let value = info
            .get(field.key)
            .filter(|v| !v.is_empty())
            .or(field.default.as_ref())
            .filter(|v| !v.is_empty())
            .cloned();
        let Some(value) = value else {
            if field.required {
                return Err(TsmeError::MissingConfigError {
                    field: field.key.to_string(),
                });
            }
            continue;
        };
        if let Some(choices) = &field.choices {
            if !choices.contains(&value) {
                return Err(TsmeError::InvalidConfigValueError {
                    field: field.key.to_string(),
                    value,
                    reason: format!("expected one of: {}", choices.join(", ")),
                });
            }
        }
        data.insert(field.key.to_string(), value);
    }

    validate_counter_id(CONF_COUNTER_ID, &data[CONF_COUNTER_ID])?;
    validate_non_empty_string(CONF_USERNAME, &data[CONF_USERNAME])?;
    validate_non_empty_string(CONF_PASSWORD, &data[CONF_PASSWORD])?;
    Ok(data)
}

/// Turns a validation error into the form again, the offending field flagged.
fn show_field_error(
    step_id: &'static str,
    schema: Vec<SchemaField>,
    error: TsmeError,
) -> Result<FlowResult> {
    let (field, code) = match &error {
        TsmeError::MissingConfigError { field } => (field.clone(), ERROR_REQUIRED),
        TsmeError::InvalidConfigValueError { field, .. }
        | TsmeError::ConfigValidationError { field, .. } => (field.clone(), ERROR_INVALID),
        _ => return Err(error),
    };
    tracing::debug!("{}: {}", step_id, error);
    Ok(FlowResult::ShowForm {
        step_id,
        schema,
        errors: BTreeMap::from([(field, code.to_string())]),
    })
}

fn show_form(step_id: &'static str, schema: Vec<SchemaField>, error: Option<&str>) -> FlowResult {
    let mut errors = BTreeMap::new();
    if let Some(error) = error {
        errors.insert("base".to_string(), error.to_string());
    }
    FlowResult::ShowForm {
        step_id,
        schema,
        errors,
    }
}

/// First-time setup of the single account.
pub struct SuezConfigFlow {
    options: ClientOptions,
    unique_id: Option<String>,
}

impl SuezConfigFlow {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            unique_id: None,
        }
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.unique_id.as_deref()
    }

    pub async fn step_user<S: Storage>(
        &mut self,
        entries: &ConfigEntries<S>,
        info: Option<FormInput>,
    ) -> Result<FlowResult> {
        tracing::debug!("configflow::step_user: has input = {}", info.is_some());
        if !entries.entries().is_empty() {
            tracing::error!("configflow::step_user: already configured");
            return Ok(FlowResult::Abort {
                reason: ABORT_SINGLE_INSTANCE,
            });
        }
        self.unique_id = Some(DOMAIN.to_string());
        self.step_configure(info).await
    }

    pub async fn step_configure(&mut self, info: Option<FormInput>) -> Result<FlowResult> {
        let Some(info) = info else {
            tracing::debug!("configflow::configure entered");
            return Ok(show_form("configure", schema(None), None));
        };

        let data = match validate_input(&schema(None), &info) {
            Ok(data) => data,
            Err(e) => return show_field_error("configure", schema(Some(&info)), e),
        };
        let client = SuezClient::from_entry(&EntryConfig::from_map(&data)?, &self.options)?;
        match client.check_credentials().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!("configflow::configure: credentials rejected");
                return Ok(show_form("configure", schema(Some(&data)), Some(ERROR_INVALID_AUTH)));
            }
            Err(e) if e.is_portal_error() => {
                tracing::warn!("configflow::configure: cannot reach portal: {}", e);
                return Ok(show_form("configure", schema(Some(&data)), Some(ERROR_CANNOT_CONNECT)));
            }
            Err(e) => return Err(e),
        }

        tracing::debug!("configflow::configure creates the entry");
        Ok(FlowResult::CreateEntry {
            title: ENTRY_TITLE.to_string(),
            data,
        })
    }

    /// Turns a finished flow into the entry to store.
    pub fn into_entry(self, result: &FlowResult) -> Option<ConfigEntry> {
        match result {
            FlowResult::CreateEntry { title, data } => {
                Some(ConfigEntry::new(title, self.unique_id, data.clone()))
            }
            _ => None,
        }
    }
}

/// Later changes to an existing entry, stored as options.
pub struct SuezOptionsFlow {
    defaults: BTreeMap<String, String>,
}

impl SuezOptionsFlow {
    pub fn new(entry: &ConfigEntry) -> Self {
        tracing::debug!("optionsflow: entry {} options {:?}", entry.entry_id, entry.options.keys());
        Self {
            defaults: entry.merged(),
        }
    }

    pub fn step_init(&self, info: Option<FormInput>) -> Result<FlowResult> {
        let Some(info) = info else {
            return Ok(show_form("init", schema(Some(&self.defaults)), None));
        };
        let data = match validate_input(&schema(Some(&self.defaults)), &info) {
            Ok(data) => data,
            Err(e) => {
                let mut typed = self.defaults.clone();
                typed.extend(info);
                return show_field_error("init", schema(Some(&typed)), e);
            }
        };
        Ok(FlowResult::CreateEntry {
            title: ENTRY_TITLE.to_string(),
            data,
        })
    }
}
