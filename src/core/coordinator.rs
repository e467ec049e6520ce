use crate::core::sensor::{SensorDescription, SENSOR_DESCRIPTIONS};
use crate::domain::model::{ConsumptionSnapshot, SensorData};
use crate::domain::ports::WaterPortal;
use std::time::Duration;

pub const POLL_DELAY_HOURS: u64 = 4;

/// Central place updating every sensor of one account.
///
/// The portal only publishes yesterday's figures, so polling more often than
/// every few hours gains nothing. A failed poll keeps the previous snapshot
/// and marks the data invalid, which leaves the sensors untouched.
pub struct SuezCoordinator {
    portal: Box<dyn WaterPortal>,
    counter_id: String,
    update_interval: Duration,
    snapshot: Option<ConsumptionSnapshot>,
    data: Vec<SensorData>,
    last_update_success: bool,
}

impl SuezCoordinator {
    pub fn new(portal: Box<dyn WaterPortal>, counter_id: impl Into<String>) -> Self {
        Self {
            portal,
            counter_id: counter_id.into(),
            update_interval: Duration::from_secs(POLL_DELAY_HOURS * 3600),
            snapshot: None,
            data: Vec::new(),
            last_update_success: false,
        }
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    pub fn counter_id(&self) -> &str {
        &self.counter_id
    }

    pub fn data(&self) -> &[SensorData] {
        &self.data
    }

    pub fn snapshot(&self) -> Option<&ConsumptionSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success
    }

    fn value_for(&self, desc: &SensorDescription) -> Option<f64> {
        tracing::debug!("Reading {:?} for {}", desc.field, desc.key);
        let value = self.snapshot.as_ref().map(|s| desc.field.read(s));
        if value.is_none() {
            tracing::debug!("No snapshot yet for {}; returning None", desc.key);
        }
        value
    }

    /// Polls the portal and rebuilds the sensor data. Never fails.
    pub async fn refresh(&mut self) -> &[SensorData] {
        tracing::debug!("Refreshing {}", self.counter_id);
        let mut valid = false;
        match self.portal.update().await {
            Ok(snapshot) => {
                valid = snapshot.uptodate;
                if !valid {
                    tracing::info!("Portal has no consumption for yesterday yet");
                }
                // the portal may have resolved the counter id itself
                self.counter_id = snapshot.counter_id.clone();
                self.snapshot = Some(snapshot);
                self.last_update_success = true;
            }
            Err(e) => {
                tracing::error!("When updating, exception happened: {}", e);
                self.last_update_success = false;
            }
        }

        let attribution = self.snapshot.as_ref().map(|s| s.attribution.clone());
        self.data = SENSOR_DESCRIPTIONS
            .iter()
            .map(|desc| SensorData {
                name: desc.key.to_string(),
                value: self.value_for(desc),
                counter_id: self.counter_id.clone(),
                valid,
                state_class: desc.state_class,
                attribution: attribution.clone(),
            })
            .collect();
        &self.data
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::model::{Consumption, SensorStateClass};
    use crate::utils::error::{Result, TsmeError};
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub(crate) fn snapshot(delta: f64) -> ConsumptionSnapshot {
        ConsumptionSnapshot {
            counter_id: "123456".to_string(),
            last_known: 812.5,
            last: Consumption {
                delta,
                total: 812.5,
            },
            this_month: IndexMap::new(),
            prev_month: IndexMap::new(),
            history: IndexMap::new(),
            this_year_overall: 23.5,
            last_year_overall: 130.0,
            highest_monthly: 14.2,
            uptodate: delta > crate::core::client::EPSILON,
            attribution: "Data provided by toutsurmoneau (https://www.toutsurmoneau.fr)".into(),
        }
    }

    /// Replays scripted update results.
    pub(crate) struct ScriptedPortal {
        results: Mutex<VecDeque<Result<ConsumptionSnapshot>>>,
    }

    impl ScriptedPortal {
        pub(crate) fn new(results: Vec<Result<ConsumptionSnapshot>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
            }
        }
    }

    #[async_trait]
    impl WaterPortal for ScriptedPortal {
        async fn update(&self) -> Result<ConsumptionSnapshot> {
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TsmeError::unexpected("script exhausted")))
        }

        async fn check_credentials(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_refresh_maps_snapshot_to_sensors() {
        let portal = ScriptedPortal::new(vec![Ok(snapshot(0.35))]);
        let mut coordinator = SuezCoordinator::new(Box::new(portal), "123456");

        let data = coordinator.refresh().await.to_vec();
        let names: Vec<_> = data.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "yesterday_delta",
                "yesterday_total",
                "last_year_delta",
                "this_year_delta",
                "highest_monthly_delta"
            ]
        );
        let values: Vec<_> = data.iter().map(|d| d.value).collect();
        assert_eq!(
            values,
            vec![Some(0.35), Some(812.5), Some(130.0), Some(23.5), Some(14.2)]
        );
        assert!(data.iter().all(|d| d.valid));
        assert_eq!(data[1].state_class, Some(SensorStateClass::Total));
        assert_eq!(data[0].state_class, None);
        assert!(coordinator.last_update_success());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_values_but_invalid() {
        let portal = ScriptedPortal::new(vec![
            Ok(snapshot(0.35)),
            Err(TsmeError::LoginError),
        ]);
        let mut coordinator = SuezCoordinator::new(Box::new(portal), "123456");
        coordinator.refresh().await;

        let data = coordinator.refresh().await;
        assert!(data.iter().all(|d| !d.valid));
        assert_eq!(data[0].value, Some(0.35));
        assert!(!coordinator.last_update_success());
    }

    #[tokio::test]
    async fn test_first_refresh_failure_yields_empty_values() {
        let portal = ScriptedPortal::new(vec![Err(TsmeError::TokenError)]);
        let mut coordinator = SuezCoordinator::new(Box::new(portal), "123456");
        let data = coordinator.refresh().await;
        assert_eq!(data.len(), 5);
        assert!(data.iter().all(|d| d.value.is_none() && !d.valid));
        assert!(data.iter().all(|d| d.attribution.is_none()));
    }

    #[tokio::test]
    async fn test_zero_consumption_is_not_uptodate() {
        let portal = ScriptedPortal::new(vec![Ok(snapshot(0.0))]);
        let mut coordinator = SuezCoordinator::new(Box::new(portal), "123456");
        let data = coordinator.refresh().await;
        assert!(data.iter().all(|d| !d.valid));
        assert!(coordinator.snapshot().is_some());
        assert_eq!(
            coordinator.update_interval(),
            Duration::from_secs(4 * 3600)
        );
    }
}
