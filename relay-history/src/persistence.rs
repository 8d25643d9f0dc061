//! Durable storage for named histories.
//!
//! Layout of the file backend:
//! - `{dir}/{slug}-{hash}.json` - one record per named history
//!
//! The slug keeps file names readable; the hash keeps names that differ only
//! by case or punctuation in separate files.

use crate::types::HistoryRecord;
use async_trait::async_trait;
use relay_common::{Error, Result, ResultExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Flat key-value storage keyed by history name.
#[async_trait]
pub trait HistoryPersistence: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Read every stored record. Unreadable records are skipped.
    async fn read_all(&self) -> Result<HashMap<String, HistoryRecord>>;

    /// Create or overwrite the record stored under `name`.
    async fn write(&self, name: &str, record: &HistoryRecord) -> Result<()>;

    /// Delete the record stored under `name`. Missing records are not an error.
    async fn remove(&self, name: &str) -> Result<()>;
}

/// One JSON file per named history.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path used for a history name.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(file_name_for(name))
    }

    async fn read_record(path: &Path) -> Result<HistoryRecord> {
        let content = tokio::fs::read_to_string(path).await?;
        let record: HistoryRecord = serde_json::from_str(&content)?;
        // Reject records whose turns break the system-turn rule.
        record.to_conversation()?;
        Ok(record)
    }
}

/// Build a file name for a history name.
fn file_name_for(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .take(48)
        .collect();
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{slug}-{}.json", &digest[..12])
}

#[async_trait]
impl HistoryPersistence for JsonFileStore {
    fn name(&self) -> &str {
        "json-files"
    }

    async fn read_all(&self) -> Result<HashMap<String, HistoryRecord>> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context(format!("creating history directory {}", self.dir.display()))?;

        let mut records: HashMap<String, HistoryRecord> = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .context(format!("listing history directory {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let record = match Self::read_record(&path).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable history record");
                    continue;
                }
            };

            match records.get(&record.name) {
                Some(existing) if existing.updated_at >= record.updated_at => {
                    tracing::warn!(name = %record.name, path = %path.display(), "Skipping stale duplicate history record");
                }
                _ => {
                    records.insert(record.name.clone(), record);
                }
            }
        }

        tracing::debug!(count = records.len(), dir = %self.dir.display(), "Loaded named histories");
        Ok(records)
    }

    async fn write(&self, name: &str, record: &HistoryRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.record_path(name);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;

        tokio::fs::write(&tmp, content)
            .await
            .context(format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .context(format!("replacing {}", path.display()))?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.record_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e).with_context(format!("removing history `{name}`"))),
        }
    }
}

/// Process-local storage, for tests and disk-less runs.
#[derive(Default)]
pub struct MemoryPersistence {
    records: RwLock<HashMap<String, HistoryRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored record.
    pub async fn get(&self, name: &str) -> Option<HistoryRecord> {
        self.records.read().await.get(name).cloned()
    }
}

#[async_trait]
impl HistoryPersistence for MemoryPersistence {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read_all(&self) -> Result<HashMap<String, HistoryRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn write(&self, name: &str, record: &HistoryRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(name.to_string(), record.clone());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.records.write().await.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Conversation, Turn};

    fn record(name: &str, owner: Option<&str>) -> HistoryRecord {
        let conv = Conversation::from_turns(vec![Turn::system("prompt")]).unwrap();
        HistoryRecord::new(name, owner.map(String::from), &conv)
    }

    #[test]
    fn file_names_separate_case_variants() {
        assert_ne!(file_name_for("Proj"), file_name_for("proj"));
        assert!(file_name_for("my notes/2024").starts_with("my_notes_2024-"));
        assert!(file_name_for("x").ends_with(".json"));
    }

    #[tokio::test]
    async fn write_then_read_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("histories"));

        store.write("proj", &record("proj", Some("u1"))).await.unwrap();
        store.write("Proj", &record("Proj", None)).await.unwrap();

        let records = store.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records["proj"].owner.as_deref(), Some("u1"));
        assert!(records["Proj"].owner.is_none());
    }

    #[tokio::test]
    async fn malformed_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.write("good", &record("good", None)).await.unwrap();

        tokio::fs::write(dir.path().join("broken.json"), "{oops").await.unwrap();
        tokio::fs::write(
            dir.path().join("late-system.json"),
            r#"{"name":"bad","created_at":"2024-01-01T00:00:00Z","updated_at":"2024-01-01T00:00:00Z",
               "turns":[{"role":"user","content":"a"},{"role":"system","content":"b"}]}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let records = store.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records.contains_key("good"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.write("proj", &record("proj", None)).await.unwrap();

        store.remove("proj").await.unwrap();
        store.remove("proj").await.unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_persistence_round_trip() {
        let store = MemoryPersistence::new();
        store.write("proj", &record("proj", None)).await.unwrap();
        assert!(store.get("proj").await.is_some());
        store.remove("proj").await.unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
    }
}
