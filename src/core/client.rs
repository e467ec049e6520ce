use crate::core::{parse, token};
use crate::domain::model::{ConsumptionSnapshot, EntryConfig};
use crate::domain::ports::WaterPortal;
use crate::utils::error::{Result, TsmeError};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, TimeDelta, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{redirect, Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const API_ENDPOINT_LOGIN: &str = "/mon-compte-en-ligne/je-me-connecte";
pub const API_ENDPOINT_CONSUMPTION: &str = "/mon-compte-en-ligne/historique-de-consommation-tr";
pub const API_ENDPOINT_DATA: &str = "/mon-compte-en-ligne/statJData";
pub const API_ENDPOINT_HISTORY: &str = "/mon-compte-en-ligne/statMData";

pub const SESSION_COOKIE: &str = "eZSESSID";
pub const DEFAULT_PROVIDER: &str = "toutsurmoneau";
/// Request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Readings below this are treated as "no consumption reported yet".
pub const EPSILON: f64 = 0.000001;
const LAST_KNOWN_THRESHOLD: f64 = 0.0001;
const LAST_KNOWN_MAX_DAYS: u32 = 60;

const PROVIDERS: [(&str, &str); 2] = [
    ("toutsurmoneau", "https://www.toutsurmoneau.fr"),
    ("Eau Olivet", "https://www.eau-olivet.fr"),
];

/// Names of the known providers, in display order.
pub fn providers() -> Vec<&'static str> {
    PROVIDERS.iter().map(|(name, _)| *name).collect()
}

pub fn provider_url(name: &str) -> Result<&'static str> {
    PROVIDERS
        .iter()
        .find(|(provider, _)| *provider == name)
        .map(|(_, url)| *url)
        .ok_or_else(|| TsmeError::UnknownProviderError {
            name: name.to_string(),
        })
}

/// Connection settings shared by every client the process creates.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Replaces the provider's URL, e.g. for a staging portal.
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
}

/// Client view of one account on a provider portal.
#[derive(Debug, Clone)]
pub struct SuezClient {
    username: String,
    password: String,
    counter_id: Option<String>,
    provider: String,
    base_url: String,
    timeout: Duration,
}

/// Cookie jar and HTTP clients living for one update or credential check.
struct PortalSession {
    jar: Arc<Jar>,
    client: Client,
    login_client: Client,
}

impl SuezClient {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        counter_id: Option<String>,
        provider: Option<String>,
        options: &ClientOptions,
    ) -> Result<Self> {
        let provider = provider.unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let base_url = match &options.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => provider_url(&provider)?.to_string(),
        };
        Ok(Self {
            username: username.into(),
            password: password.into(),
            counter_id,
            provider,
            base_url,
            timeout: options.timeout.unwrap_or(DEFAULT_TIMEOUT),
        })
    }

    pub fn from_entry(config: &EntryConfig, options: &ClientOptions) -> Result<Self> {
        Self::new(
            config.username.clone(),
            config.password.clone(),
            config.counter_id.clone(),
            config.provider.clone(),
            options,
        )
    }

    pub fn counter_id(&self) -> Option<&str> {
        self.counter_id.as_deref()
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn attribution(&self) -> String {
        format!("Data provided by {} ({})", self.provider, self.url(""))
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn session(&self) -> Result<PortalSession> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(self.timeout)
            .build()?;
        let login_client = Client::builder()
            .cookie_provider(jar.clone())
            .redirect(redirect::Policy::none())
            .timeout(self.timeout)
            .build()?;
        Ok(PortalSession {
            jar,
            client,
            login_client,
        })
    }

    async fn fetch_url(&self, session: &PortalSession, url_tail: &str, endpoint: &str) -> Result<Response> {
        let mut url = self.url(endpoint);
        if !url_tail.is_empty() {
            url = format!("{}/{}", url, url_tail);
        }
        tracing::info!("Fetching {}", url);
        let response = session.client.get(&url).send().await?;
        tracing::debug!("GET {} -> {}", url, response.status());
        Ok(response)
    }

    async fn fetch_login_form(&self, session: &PortalSession) -> Result<Vec<(&'static str, String)>> {
        let content = self
            .fetch_url(session, "", API_ENDPOINT_LOGIN)
            .await?
            .text()
            .await?;
        let token = token::extract_token(&content).ok_or(TsmeError::TokenError)?;
        tracing::debug!("Found token = {}", token);

        Ok(vec![
            ("_username", self.username.clone()),
            ("_password", self.password.clone()),
            ("_csrf_token", token),
            ("signin[username]", self.username.clone()),
            ("signin[password]", String::new()),
            ("tsme_user_login[_username]", self.username.clone()),
            ("tsme_user_login[_password]", self.password.clone()),
        ])
    }

    async fn submit_login(&self, session: &PortalSession) -> Result<Response> {
        let form = self.fetch_login_form(session).await?;
        let response = session
            .login_client
            .post(self.url(API_ENDPOINT_LOGIN))
            .form(&form)
            .send()
            .await
            .map_err(TsmeError::LoginFormError)?;
        tracing::debug!("Login form answered {}", response.status());
        Ok(response)
    }

    fn has_session_cookie(&self, session: &PortalSession) -> Result<bool> {
        let base = Url::parse(&self.url("/"))
            .map_err(|e| TsmeError::config(format!("invalid portal URL: {}", e)))?;
        let cookies = session
            .jar
            .cookies(&base)
            .and_then(|header| header.to_str().map(str::to_string).ok())
            .unwrap_or_default();
        tracing::debug!("cookies={}", cookies);
        Ok(cookies
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .any(|(name, _)| name == SESSION_COOKIE))
    }

    async fn login(&self, session: &PortalSession) -> Result<()> {
        self.submit_login(session).await?;
        if !self.has_session_cookie(session)? {
            return Err(TsmeError::LoginError);
        }
        Ok(())
    }

    async fn fetch_data_url(&self, session: &PortalSession, url_tail: &str, endpoint: &str) -> Result<Value> {
        let json: Value = self.fetch_url(session, url_tail, endpoint).await?.json().await?;
        tracing::debug!("Loaded {}", json);
        parse::check_portal_error(&json)?;
        Ok(json)
    }

    async fn fetch_month(&self, session: &PortalSession, date: NaiveDate, counter_id: &str) -> Result<Value> {
        let tail = format!("{}/{}/{}", date.year(), date.month(), counter_id);
        self.fetch_data_url(session, &tail, API_ENDPOINT_DATA).await
    }

    async fn discover_counter_id(&self, session: &PortalSession) -> Result<String> {
        let content = self
            .fetch_url(session, "", API_ENDPOINT_CONSUMPTION)
            .await?
            .text()
            .await?;
        let counter_id = token::extract_counter_id(&content).ok_or(TsmeError::CounterNotFoundError)?;
        tracing::info!("Discovered counter id {}", counter_id);
        Ok(counter_id)
    }

    /// Walks back from `today` to the most recent day with a cumulative total.
    async fn fetch_last_known(&self, session: &PortalSession, today: NaiveDate, counter_id: &str) -> Result<f64> {
        let mut day = today;
        let mut loaded: Option<((i32, u32), Value)> = None;
        let mut last_known_good: Option<f64> = None;
        let mut count = 0;

        while last_known_good.map_or(true, |v| v < LAST_KNOWN_THRESHOLD) && count < LAST_KNOWN_MAX_DAYS {
            let key = (day.year(), day.month());
            if loaded.as_ref().map(|(k, _)| *k) != Some(key) {
                let month = self.fetch_month(session, day, counter_id).await?;
                loaded = Some((key, month));
            }
            if let Some((_, month)) = &loaded {
                if let Some(total) = parse::day_total(month, day.day())? {
                    last_known_good = Some(total);
                }
            }
            day -= TimeDelta::days(1);
            count += 1;
        }

        Ok(last_known_good.unwrap_or(0.0))
    }

    /// Downloads and parses every statistic as seen on `today` (Paris time).
    pub async fn update_at(&self, today: NaiveDate) -> Result<ConsumptionSnapshot> {
        let session = self.session()?;
        self.login(&session).await?;

        let counter_id = match &self.counter_id {
            Some(id) => id.clone(),
            None => self.discover_counter_id(&session).await?,
        };

        let last_known = match self.fetch_last_known(&session, today, &counter_id).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!("Last known reading unavailable: {}", e);
                0.0
            }
        };

        let yesterday = today - TimeDelta::days(1);
        let first_this_month = today.with_day(1).unwrap_or(today);
        let prev_month = first_this_month - TimeDelta::days(1);

        let today_json = match self.fetch_month(&session, today, &counter_id).await {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Fetching today's data: {}", e);
                Value::Object(Default::default())
            }
        };
        let yesterday_json = if yesterday.month() != today.month() {
            self.fetch_month(&session, yesterday, &counter_id).await?
        } else {
            today_json.clone()
        };
        let prev_month_json = self.fetch_month(&session, prev_month, &counter_id).await?;
        let history_json = self
            .fetch_data_url(&session, &counter_id, API_ENDPOINT_HISTORY)
            .await?;

        let last = parse::day_consumption(&yesterday_json, yesterday.day())
            .map_err(|_| TsmeError::unexpected("Cannot read yesterday data"))?;
        let this_month = parse::daily_map(&today_json)
            .map_err(|_| TsmeError::unexpected("Cannot read this month data"))?;
        let prev_month = parse::daily_map(&prev_month_json)
            .map_err(|_| TsmeError::unexpected("Cannot read previous month data"))?;
        let history = parse::history(&history_json)?;

        Ok(ConsumptionSnapshot {
            counter_id,
            last_known,
            last,
            this_month,
            prev_month,
            history: history.months,
            this_year_overall: history.this_year_overall,
            last_year_overall: history.last_year_overall,
            highest_monthly: history.highest_monthly,
            uptodate: last.delta > EPSILON,
            attribution: self.attribution(),
        })
    }
}

/// Today's date where the portal publishes its data.
pub fn portal_today() -> NaiveDate {
    Utc::now().with_timezone(&chrono_tz::Europe::Paris).date_naive()
}

#[async_trait]
impl WaterPortal for SuezClient {
    async fn update(&self) -> Result<ConsumptionSnapshot> {
        self.update_at(portal_today()).await
    }

    async fn check_credentials(&self) -> Result<bool> {
        let session = self.session()?;
        let response = self.submit_login(&session).await?;
        let accepted = response.cookies().any(|c| c.name() == SESSION_COOKIE);
        tracing::debug!("Login accepted: {}", accepted);
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_providers_order() {
        assert_eq!(providers(), vec!["toutsurmoneau", "Eau Olivet"]);
        assert_eq!(provider_url("Eau Olivet").unwrap(), "https://www.eau-olivet.fr");
        assert!(matches!(
            provider_url("Veolia"),
            Err(TsmeError::UnknownProviderError { .. })
        ));
    }

    #[test]
    fn test_default_provider_and_attribution() {
        let client = SuezClient::new("me", "pw", None, None, &ClientOptions::default()).unwrap();
        assert_eq!(client.provider(), "toutsurmoneau");
        assert_eq!(
            client.attribution(),
            "Data provided by toutsurmoneau (https://www.toutsurmoneau.fr)"
        );
    }

    #[test]
    fn test_base_url_override() {
        let options = ClientOptions {
            base_url: Some("http://127.0.0.1:8080/".to_string()),
            timeout: None,
        };
        let client =
            SuezClient::new("me", "pw", Some("42".to_string()), None, &options).unwrap();
        assert_eq!(client.url(API_ENDPOINT_LOGIN), "http://127.0.0.1:8080/mon-compte-en-ligne/je-me-connecte");
        assert_eq!(client.counter_id(), Some("42"));
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_configured_timeout_wins() {
        let options = ClientOptions {
            base_url: None,
            timeout: Some(Duration::from_secs(5)),
        };
        let client = SuezClient::new("me", "pw", None, None, &options).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(5));
        let client = SuezClient::new("me", "pw", None, None, &ClientOptions::default()).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_unknown_provider_without_override_fails() {
        let result = SuezClient::new("me", "pw", None, Some("Nowhere".into()), &ClientOptions::default());
        assert!(result.is_err());
    }
}
