use crate::core::client::DEFAULT_TIMEOUT;
use crate::domain::model::EntityState;
use crate::domain::ports::StatePublisher;
use crate::utils::error::{Result, TsmeError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Writes sensor states through the Home Assistant REST API.
pub struct HomeAssistantClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HomeAssistantClient {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn state_url(&self, entity_id: &str) -> String {
        format!("{}/api/states/{}", self.base_url, entity_id)
    }
}

#[async_trait]
impl StatePublisher for HomeAssistantClient {
    async fn publish(&self, state: &EntityState) -> Result<()> {
        let url = self.state_url(&state.entity_id);
        tracing::debug!("Posting {} = {} to {}", state.entity_id, state.state, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(state)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TsmeError::PublishError {
                entity_id: state.entity_id.clone(),
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Published {} = {}", state.entity_id, state.state);
        Ok(())
    }
}

/// Dry-run sink: states only go to the log.
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

#[async_trait]
impl StatePublisher for LogPublisher {
    async fn publish(&self, state: &EntityState) -> Result<()> {
        tracing::info!(
            "[dry-run] {} = {} {}",
            state.entity_id,
            state.state,
            serde_json::Value::Object(state.attributes.clone())
        );
        Ok(())
    }
}
