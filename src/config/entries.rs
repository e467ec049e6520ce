use crate::domain::model::ConfigEntry;
use crate::domain::ports::Storage;
use crate::utils::error::{Result, TsmeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryEvent {
    Added(String),
    /// Data or options changed.
    OptionsUpdated(String),
    Removed(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: Vec<ConfigEntry>,
}

/// Persistent config entries backed by one JSON file.
pub struct ConfigEntries<S: Storage> {
    storage: S,
    path: String,
    entries: Vec<ConfigEntry>,
    events: broadcast::Sender<EntryEvent>,
}

impl<S: Storage> ConfigEntries<S> {
    pub fn new(storage: S, path: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            storage,
            path: path.into(),
            entries: Vec::new(),
            events,
        }
    }

    /// Loads the store; a missing file means no entries yet.
    pub async fn load(storage: S, path: impl Into<String>) -> Result<Self> {
        let mut store = Self::new(storage, path);
        store.reload().await?;
        Ok(store)
    }

    /// Re-reads the file and notifies listeners of every entry that changed.
    pub async fn reload(&mut self) -> Result<()> {
        let previous = match self.storage.read_file(&self.path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes)?;
                if file.version != STORE_VERSION {
                    return Err(TsmeError::config(format!(
                        "unsupported entries file version {}",
                        file.version
                    )));
                }
                tracing::debug!("Loaded {} config entries from {}", file.entries.len(), self.path);
                std::mem::replace(&mut self.entries, file.entries)
            }
            Err(TsmeError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No entries file at {}, starting empty", self.path);
                std::mem::take(&mut self.entries)
            }
            Err(e) => return Err(e),
        };
        self.notify_changes(&previous);
        Ok(())
    }

    fn notify_changes(&self, previous: &[ConfigEntry]) {
        for old in previous {
            if self.get(&old.entry_id).is_none() {
                self.notify(EntryEvent::Removed(old.entry_id.clone()));
            }
        }
        for entry in &self.entries {
            match previous.iter().find(|old| old.entry_id == entry.entry_id) {
                None => self.notify(EntryEvent::Added(entry.entry_id.clone())),
                Some(old) if old.merged() != entry.merged() => {
                    self.notify(EntryEvent::OptionsUpdated(entry.entry_id.clone()))
                }
                Some(_) => {}
            }
        }
    }

    async fn save(&self) -> Result<()> {
        let file = StoreFile {
            version: STORE_VERSION,
            entries: self.entries.clone(),
        };
        let data = serde_json::to_vec_pretty(&file)?;
        self.storage.write_file(&self.path, &data).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntryEvent> {
        self.events.subscribe()
    }

    fn notify(&self, event: EntryEvent) {
        // no receivers is fine
        let _ = self.events.send(event);
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    pub fn get(&self, entry_id: &str) -> Option<&ConfigEntry> {
        self.entries.iter().find(|e| e.entry_id == entry_id)
    }

    pub fn has_unique_id(&self, unique_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.unique_id.as_deref() == Some(unique_id))
    }

    pub async fn add(&mut self, entry: ConfigEntry) -> Result<()> {
        let entry_id = entry.entry_id.clone();
        tracing::info!("Adding config entry {} ({})", entry_id, entry.title);
        self.entries.push(entry);
        self.save().await?;
        self.notify(EntryEvent::Added(entry_id));
        Ok(())
    }

    pub async fn update_options(
        &mut self,
        entry_id: &str,
        options: BTreeMap<String, String>,
    ) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.entry_id == entry_id)
            .ok_or_else(|| TsmeError::EntryNotFoundError {
                entry_id: entry_id.to_string(),
            })?;
        entry.options = options;
        self.save().await?;
        tracing::debug!("Options updated for {}", entry_id);
        self.notify(EntryEvent::OptionsUpdated(entry_id.to_string()));
        Ok(())
    }

    pub async fn remove(&mut self, entry_id: &str) -> Result<ConfigEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.entry_id == entry_id)
            .ok_or_else(|| TsmeError::EntryNotFoundError {
                entry_id: entry_id.to_string(),
            })?;
        let entry = self.entries.remove(idx);
        self.save().await?;
        self.notify(EntryEvent::Removed(entry_id.to_string()));
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::model::{CONF_COUNTER_ID, CONF_PASSWORD, CONF_USERNAME, DOMAIN};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub(crate) struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                TsmeError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    pub(crate) fn entry() -> ConfigEntry {
        ConfigEntry::new(
            DOMAIN,
            Some(DOMAIN.to_string()),
            BTreeMap::from([
                (CONF_COUNTER_ID.to_string(), "123456".to_string()),
                (CONF_USERNAME.to_string(), "me@example.org".to_string()),
                (CONF_PASSWORD.to_string(), "secret".to_string()),
            ]),
        )
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let store = ConfigEntries::load(MockStorage::default(), "entries.json")
            .await
            .unwrap();
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn test_add_persists_and_reloads() {
        let storage = MockStorage::default();
        let mut store = ConfigEntries::load(storage.clone(), "entries.json")
            .await
            .unwrap();
        let entry = entry();
        let entry_id = entry.entry_id.clone();
        store.add(entry).await.unwrap();

        assert!(storage.get_file("entries.json").await.is_some());
        let reloaded = ConfigEntries::load(storage, "entries.json").await.unwrap();
        assert_eq!(reloaded.entries().len(), 1);
        assert!(reloaded.has_unique_id(DOMAIN));
        assert_eq!(
            reloaded.get(&entry_id).unwrap().data[CONF_COUNTER_ID],
            "123456"
        );
    }

    #[tokio::test]
    async fn test_update_options_notifies_listeners() {
        let mut store = ConfigEntries::new(MockStorage::default(), "entries.json");
        let entry = entry();
        let entry_id = entry.entry_id.clone();
        store.add(entry).await.unwrap();

        let mut events = store.subscribe();
        let options = BTreeMap::from([(CONF_PASSWORD.to_string(), "new".to_string())]);
        store.update_options(&entry_id, options).await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            EntryEvent::OptionsUpdated(entry_id.clone())
        );
        assert_eq!(
            store.get(&entry_id).unwrap().entry_config().unwrap().password,
            "new"
        );
    }

    #[tokio::test]
    async fn test_reload_reports_changes_made_elsewhere() {
        let storage = MockStorage::default();
        let mut writer = ConfigEntries::new(storage.clone(), "entries.json");
        let entry = entry();
        let entry_id = entry.entry_id.clone();
        writer.add(entry).await.unwrap();

        let mut store = ConfigEntries::load(storage, "entries.json").await.unwrap();
        let mut events = store.subscribe();

        store.reload().await.unwrap();
        assert!(events.try_recv().is_err());

        let options = BTreeMap::from([(CONF_PASSWORD.to_string(), "new".to_string())]);
        writer.update_options(&entry_id, options).await.unwrap();
        store.reload().await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            EntryEvent::OptionsUpdated(entry_id.clone())
        );
        assert_eq!(store.get(&entry_id).unwrap().options[CONF_PASSWORD], "new");

        writer.remove(&entry_id).await.unwrap();
        store.reload().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), EntryEvent::Removed(entry_id));
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entry_is_an_error() {
        let mut store = ConfigEntries::new(MockStorage::default(), "entries.json");
        assert!(matches!(
            store.remove("nope").await,
            Err(TsmeError::EntryNotFoundError { .. })
        ));
        assert!(store
            .update_options("nope", BTreeMap::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_wrong_version_is_rejected() {
        let storage = MockStorage::default();
        storage
            .write_file("entries.json", br#"{"version": 9, "entries": []}"#)
            .await
            .unwrap();
        assert!(ConfigEntries::load(storage, "entries.json").await.is_err());
    }
}
