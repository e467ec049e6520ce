use anyhow::Result;
use httpmock::prelude::*;
use httpmock::Mock;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use toutsurmoneau::config::entries::EntryEvent;
use toutsurmoneau::core::client::{API_ENDPOINT_DATA, API_ENDPOINT_HISTORY, API_ENDPOINT_LOGIN};
use toutsurmoneau::domain::model::ConfigEntry;
use toutsurmoneau::{ClientOptions, ConfigEntries, HomeAssistantClient, Integration, LocalStorage};

const COUNTER: &str = "123456";
const TOKEN: &str = "ha-secret";
const LOGIN_PAGE: &str = r#"<script>var app = JSON.parse("{\u0022csrfToken\u0022\u003A\u0022tok123\u0022,\u0022locale\u0022\u003A\u0022fr\u0022}");</script>"#;

/// A portal answering for any date: every day of every month consumed 0.25 m³.
fn mock_portal(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path(API_ENDPOINT_LOGIN);
        then.status(200).body(LOGIN_PAGE);
    });
    server.mock(|when, then| {
        when.method(POST).path(API_ENDPOINT_LOGIN);
        then.status(302)
            .header("Location", "/mon-compte-en-ligne/tableau-de-bord")
            .header("Set-Cookie", "eZSESSID=abc123; Path=/");
    });
    let rows: Vec<Value> = (1..=31)
        .map(|d| json!([format!("{:02}", d), 0.25, 800.0 + d as f64]))
        .collect();
    server.mock(|when, then| {
        when.method(GET).path_matches(
            Regex::new(&format!(r"^{}/\d{{4}}/\d{{1,2}}/{}$", API_ENDPOINT_DATA, COUNTER)).unwrap(),
        );
        then.status(200).json_body(Value::Array(rows));
    });
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("{}/{}", API_ENDPOINT_HISTORY, COUNTER));
        then.status(200)
            .json_body(json!([[0, 12.5, 400.0, "Janvier 2024"], 23.5, 130.0, 14.2]));
    });
}

fn mock_state<'a>(server: &'a MockServer, key: &str, state: &str) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path(format!("/api/states/sensor.suez_{}_{}", COUNTER, key))
            .header("Authorization", format!("Bearer {}", TOKEN))
            .json_body_partial(json!({ "state": state }).to_string());
        then.status(200).json_body(json!({ "state": state }));
    })
}

fn account() -> BTreeMap<String, String> {
    [
        ("counter_id", COUNTER),
        ("username", "me@example.org"),
        ("password", "secret"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn options_for(portal: &MockServer) -> ClientOptions {
    ClientOptions {
        base_url: Some(portal.base_url()),
        timeout: Some(std::time::Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn test_setup_publishes_every_sensor() -> Result<()> {
    let portal = MockServer::start();
    mock_portal(&portal);
    let ha = MockServer::start();
    let states = vec![
        mock_state(&ha, "yesterday_delta", "0.25"),
        mock_state(&ha, "last_year_delta", "130"),
        mock_state(&ha, "this_year_delta", "23.5"),
        mock_state(&ha, "highest_monthly_delta", "14.2"),
    ];
    let total = ha.mock(|when, then| {
        when.method(POST)
            .path(format!("/api/states/sensor.suez_{}_yesterday_total", COUNTER))
            .json_body_partial(
                json!({
                    "attributes": {
                        "unit_of_measurement": "m³",
                        "device_class": "water",
                        "state_class": "total",
                        "icon": "mdi:water-pump"
                    }
                })
                .to_string(),
            );
        then.status(201);
    });

    let publisher = HomeAssistantClient::new(&ha.base_url(), TOKEN, None)?;
    let mut integration = Integration::new(Arc::new(publisher), options_for(&portal));
    let entry = ConfigEntry::new("toutsurmoneau", Some("toutsurmoneau".into()), account());

    assert!(integration.setup_entry(&entry).await?);
    for state in &states {
        state.assert();
    }
    total.assert();

    assert!(integration.unload_entry(&entry.entry_id).await);
    Ok(())
}

#[tokio::test]
async fn test_rejected_login_publishes_unknown_states() -> Result<()> {
    let portal = MockServer::start();
    portal.mock(|when, then| {
        when.method(GET).path(API_ENDPOINT_LOGIN);
        then.status(200).body(LOGIN_PAGE);
    });
    portal.mock(|when, then| {
        when.method(POST).path(API_ENDPOINT_LOGIN);
        then.status(200).body("<html>Identifiants incorrects</html>");
    });
    let ha = MockServer::start();
    let unknown = ha.mock(|when, then| {
        when.method(POST)
            .path_matches(Regex::new(r"^/api/states/sensor\.suez_123456_").unwrap())
            .json_body_partial(r#"{"state": "unknown"}"#);
        then.status(200);
    });

    let publisher = HomeAssistantClient::new(&ha.base_url(), TOKEN, None)?;
    let mut integration = Integration::new(Arc::new(publisher), options_for(&portal));
    let entry = ConfigEntry::new("toutsurmoneau", None, account());

    // the entry still loads; sensors wait for the next poll
    assert!(integration.setup_entry(&entry).await?);
    unknown.assert_hits(5);
    integration.shutdown().await;
    assert!(!integration.is_loaded(&entry.entry_id));
    Ok(())
}

#[tokio::test]
async fn test_options_update_reloads_entry() -> Result<()> {
    let portal = MockServer::start();
    mock_portal(&portal);
    let ha = MockServer::start();
    let any_state = ha.mock(|when, then| {
        when.method(POST).path_contains("/api/states/");
        then.status(200);
    });

    let dir = TempDir::new()?;
    let storage = LocalStorage::new(dir.path().to_string_lossy().to_string());
    let mut store = ConfigEntries::load(storage, "entries.json").await?;
    let mut events = store.subscribe();

    let publisher = HomeAssistantClient::new(&ha.base_url(), TOKEN, None)?;
    let mut integration = Integration::new(Arc::new(publisher), options_for(&portal));

    store
        .add(ConfigEntry::new("toutsurmoneau", Some("toutsurmoneau".into()), account()))
        .await?;
    let event = events.recv().await?;
    let entry_id = match &event {
        EntryEvent::Added(id) => id.clone(),
        other => panic!("unexpected event {:?}", other),
    };
    assert!(integration.handle_entry_event(&event, &store).await?);
    any_state.assert_hits(5);

    let mut options = BTreeMap::new();
    options.insert("username".to_string(), "other@example.org".to_string());
    store.update_options(&entry_id, options).await?;
    let event = events.recv().await?;
    assert_eq!(event, EntryEvent::OptionsUpdated(entry_id.clone()));
    assert!(integration.handle_entry_event(&event, &store).await?);
    assert_eq!(
        integration.loaded_config(&entry_id).unwrap().username,
        "other@example.org"
    );
    any_state.assert_hits(10);

    // the store survives a restart
    let reopened = ConfigEntries::load(
        LocalStorage::new(dir.path().to_string_lossy().to_string()),
        "entries.json",
    )
    .await?;
    assert_eq!(reopened.entries().len(), 1);
    assert_eq!(reopened.entries()[0].options["username"], "other@example.org");

    store.remove(&entry_id).await?;
    let event = events.recv().await?;
    assert_eq!(event, EntryEvent::Removed(entry_id.clone()));
    assert!(integration.handle_entry_event(&event, &store).await?);
    assert!(integration.loaded_config(&entry_id).is_none());
    Ok(())
}
