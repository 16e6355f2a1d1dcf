//! File-based record store — lightweight persistence.
//! Birthdays and weddings saved as JSON files — human-readable, hand-editable.
//!
//! Layout, one file per record kind:
//! ```text
//! birthdays.json: { "<chat_id>": { "<label>": { "day": 1, "month": 1, "year": null } } }
//! weddings.json:  { "<chat_id>": { "<label>": { "day": 9, "month": 6, "year": 2014 } } }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use festa_core::config::FestaConfig;
use festa_core::error::{FestaError, Result};
use festa_core::traits::RecordStore;
use festa_core::types::{DateRecord, Destination, NamedRecord, RecordKind};
use tokio::sync::Mutex;

type Collection = BTreeMap<String, BTreeMap<String, DateRecord>>;

/// JSON-file record store.
pub struct JsonRecordStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl JsonRecordStore {
    /// Create a record store at the given directory.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Default store path (~/.festa).
    pub fn default_path() -> PathBuf {
        FestaConfig::home_dir()
    }

    fn file(&self, kind: RecordKind) -> PathBuf {
        match kind {
            RecordKind::Birthday => self.path.join("birthdays.json"),
            RecordKind::Wedding => self.path.join("weddings.json"),
        }
    }

    fn read(&self, kind: RecordKind) -> Result<Collection> {
        let file = self.file(kind);
        if !file.exists() {
            return Ok(Collection::new());
        }
        let json = std::fs::read_to_string(&file)?;
        if json.trim().is_empty() {
            return Ok(Collection::new());
        }
        serde_json::from_str(&json)
            .map_err(|e| FestaError::Storage(format!("Failed to parse {}: {e}", file.display())))
    }

    fn write(&self, kind: RecordKind, collection: &Collection) -> Result<()> {
        let file = self.file(kind);
        let tmp = file.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(collection)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &file)?;
        tracing::debug!("💾 Saved {} chats to {}", collection.len(), file.display());
        Ok(())
    }

    /// All records of a kind for a chat, ordered by label.
    pub async fn records(
        &self,
        destination: Destination,
        kind: RecordKind,
    ) -> Result<Vec<NamedRecord>> {
        let collection = self.read(kind)?;
        Ok(collection
            .get(&destination.to_string())
            .map(|records| {
                records
                    .iter()
                    .map(|(label, date)| NamedRecord::new(label.clone(), *date))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Insert or overwrite a record. Returns `true` when a record with the
    /// same label was replaced.
    pub async fn upsert(
        &self,
        destination: Destination,
        kind: RecordKind,
        record: NamedRecord,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut collection = self.read(kind)?;
        let replaced = collection
            .entry(destination.to_string())
            .or_default()
            .insert(record.label.clone(), record.date)
            .is_some();
        self.write(kind, &collection)?;
        tracing::info!("📅 {destination}: saved {kind} '{}' ({})", record.label, record.date);
        Ok(replaced)
    }

    /// Remove a record by label. Returns `true` if it existed.
    pub async fn remove(
        &self,
        destination: Destination,
        kind: RecordKind,
        label: &str,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut collection = self.read(kind)?;
        let key = destination.to_string();
        let removed = match collection.get_mut(&key) {
            Some(records) => records.remove(label).is_some(),
            None => false,
        };
        if removed {
            if collection.get(&key).is_some_and(|r| r.is_empty()) {
                collection.remove(&key);
            }
            self.write(kind, &collection)?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn load_records(
        &self,
        destination: Destination,
        kind: RecordKind,
    ) -> Result<Vec<NamedRecord>> {
        self.records(destination, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(label: &str, day: u32, month: u32, year: Option<i32>) -> NamedRecord {
        NamedRecord::new(label, DateRecord::new(day, month, year).unwrap())
    }

    #[tokio::test]
    async fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();
        assert!(store.records(Destination(1), RecordKind::Birthday).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_last_write_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();
        let chat = Destination(-42);

        assert!(!store.upsert(chat, RecordKind::Birthday, rec("Ann", 1, 1, None)).await.unwrap());
        let ann = rec("Ann", 2, 2, Some(1990));
        assert!(store.upsert(chat, RecordKind::Birthday, ann).await.unwrap());
        store.upsert(chat, RecordKind::Wedding, rec("Pair", 9, 6, Some(2014))).await.unwrap();

        let birthdays = store.load_records(chat, RecordKind::Birthday).await.unwrap();
        assert_eq!(birthdays, vec![rec("Ann", 2, 2, Some(1990))]);
        let weddings = store.load_records(chat, RecordKind::Wedding).await.unwrap();
        assert_eq!(weddings.len(), 1);
        assert!(store.records(Destination(7), RecordKind::Birthday).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();
        let chat = Destination(5);
        store.upsert(chat, RecordKind::Birthday, rec("Ann", 1, 1, None)).await.unwrap();
        assert!(store.remove(chat, RecordKind::Birthday, "Ann").await.unwrap());
        assert!(!store.remove(chat, RecordKind::Birthday, "Ann").await.unwrap());
        assert!(store.records(chat, RecordKind::Birthday).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_existing_file_format() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("birthdays.json"),
            r#"{"-100": {
                "Ivan": {"day": 15, "month": 3, "year": 1990},
                "Olga": {"day": 1, "month": 12, "year": null}
            }}"#,
        )
        .unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();
        let records = store.records(Destination(-100), RecordKind::Birthday).await.unwrap();
        assert_eq!(records, vec![rec("Ivan", 15, 3, Some(1990)), rec("Olga", 1, 12, None)]);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("weddings.json"), "{not json").unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.records(Destination(1), RecordKind::Wedding).await,
            Err(FestaError::Storage(_))
        ));
    }
}
