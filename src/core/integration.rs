use crate::config::entries::{ConfigEntries, EntryEvent};
use crate::core::client::{ClientOptions, SuezClient};
use crate::core::coordinator::{SuezCoordinator, POLL_DELAY_HOURS};
use crate::core::sensor::SuezSensor;
use crate::domain::model::{ConfigEntry, EntryConfig};
use crate::domain::ports::{StatePublisher, Storage};
use crate::utils::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct LoadedEntry {
    config: EntryConfig,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Loaded config entries, each polled by its own task.
pub struct Integration<H: StatePublisher + 'static> {
    publisher: Arc<H>,
    client_options: ClientOptions,
    update_interval: Duration,
    loaded: HashMap<String, LoadedEntry>,
}

impl<H: StatePublisher + 'static> Integration<H> {
    pub fn new(publisher: Arc<H>, client_options: ClientOptions) -> Self {
        Self {
            publisher,
            client_options,
            update_interval: Duration::from_secs(POLL_DELAY_HOURS * 3600),
            loaded: HashMap::new(),
        }
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn is_loaded(&self, entry_id: &str) -> bool {
        self.loaded.contains_key(entry_id)
    }

    pub fn loaded_config(&self, entry_id: &str) -> Option<&EntryConfig> {
        self.loaded.get(entry_id).map(|l| &l.config)
    }

    /// Sets up the sensors of `entry` and starts polling.
    pub async fn setup_entry(&mut self, entry: &ConfigEntry) -> Result<bool> {
        let config = entry.entry_config()?;
        tracing::info!("setup entry {}: setting up suez sensors", entry.entry_id);
        tracing::debug!(
            "setup entry {}: counter {:?}, provider {:?}",
            entry.entry_id,
            config.counter_id,
            config.provider
        );

        let client = SuezClient::from_entry(&config, &self.client_options)?;
        let counter_id = config.counter_id.clone().unwrap_or_default();
        let mut coordinator = SuezCoordinator::new(Box::new(client), counter_id)
            .with_update_interval(self.update_interval);

        let data = coordinator.refresh().await.to_vec();
        let sensors: Vec<SuezSensor> = data
            .iter()
            .enumerate()
            .map(|(idx, entry)| SuezSensor::new(idx, entry))
            .collect();
        for sensor in &sensors {
            publish(self.publisher.as_ref(), sensor).await;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poll_entry(
            coordinator,
            sensors,
            self.publisher.clone(),
            shutdown_rx,
        ));

        if let Some(previous) = self.loaded.insert(
            entry.entry_id.clone(),
            LoadedEntry {
                config,
                shutdown,
                task,
            },
        ) {
            stop(previous).await;
        }
        Ok(true)
    }

    /// Stops polling `entry_id`. Returns whether it was loaded.
    pub async fn unload_entry(&mut self, entry_id: &str) -> bool {
        match self.loaded.remove(entry_id) {
            Some(loaded) => {
                tracing::info!("unload entry: removing {}", entry_id);
                stop(loaded).await;
                true
            }
            None => false,
        }
    }

    /// Sets `entry` up again. The running entry is only replaced once the
    /// new setup succeeded.
    pub async fn reload_entry(&mut self, entry: &ConfigEntry) -> Result<bool> {
        tracing::debug!("reloading entry {}", entry.entry_id);
        let result = self.setup_entry(entry).await;
        if let Err(e) = &result {
            if self.is_loaded(&entry.entry_id) {
                tracing::warn!(
                    "reload of {} failed, keeping the running entry: {}",
                    entry.entry_id,
                    e
                );
            }
        }
        result
    }

    /// Update listener for the config entries store.
    pub async fn handle_entry_event<S: Storage>(
        &mut self,
        event: &EntryEvent,
        entries: &ConfigEntries<S>,
    ) -> Result<bool> {
        tracing::debug!("entry event {:?}", event);
        match event {
            EntryEvent::Added(entry_id) | EntryEvent::OptionsUpdated(entry_id) => {
                match entries.get(entry_id) {
                    Some(entry) => self.reload_entry(entry).await,
                    None => Ok(false),
                }
            }
            EntryEvent::Removed(entry_id) => Ok(self.unload_entry(entry_id).await),
        }
    }

    pub async fn shutdown(&mut self) {
        let ids: Vec<String> = self.loaded.keys().cloned().collect();
        for entry_id in ids {
            self.unload_entry(&entry_id).await;
        }
    }
}

async fn stop(loaded: LoadedEntry) {
    let _ = loaded.shutdown.send(true);
    if let Err(e) = loaded.task.await {
        tracing::warn!("polling task ended abnormally: {}", e);
    }
}

async fn publish<H: StatePublisher + ?Sized>(publisher: &H, sensor: &SuezSensor) {
    if let Err(e) = publisher.publish(&sensor.to_state()).await {
        tracing::error!("Cannot publish {}: {}", sensor.entity_id(), e);
        tracing::debug!("{}", e.recovery_suggestion());
    }
}

async fn poll_entry<H: StatePublisher + 'static>(
    mut coordinator: SuezCoordinator,
    mut sensors: Vec<SuezSensor>,
    publisher: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = coordinator.update_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let data = coordinator.refresh().await.to_vec();
                for sensor in sensors.iter_mut() {
                    if sensor.handle_coordinator_update(&data) {
                        publish(publisher.as_ref(), sensor).await;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!("polling of {} stopped", coordinator.counter_id());
                    break;
                }
            }
        }
    }
}
