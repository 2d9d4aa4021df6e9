use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::QueryKey;

/// One successful entry in a dehydrated cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DehydratedEntry {
    pub key: QueryKey,
    pub data: Value,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// Serializable snapshot of a cache's successful entries, for handing
/// state from one cache instance to another (a server-rendered pass to a
/// client instance, or one process shutdown to the next startup).
///
/// The shape is implementation-defined, not a committed external contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub entries: Vec<DehydratedEntry>,
}

impl CacheSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the snapshot as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write snapshot file: {}", path.display()))?;
        Ok(())
    }

    /// Read a snapshot back; `Ok(None)` if no file exists.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot file: {}", path.display()))?;
        let snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse snapshot file: {}", path.display()))?;
        Ok(Some(snapshot))
    }
}

/// Pre-mutation data for every key an optimistic update touches.
///
/// Captured synchronously, before the optimistic write is applied; a
/// rollback restores exactly these values. `None` records that a key had
/// no data before the mutation.
#[derive(Debug, Clone, Default)]
pub struct MutationSnapshot {
    previous: HashMap<QueryKey, Option<Value>>,
}

impl MutationSnapshot {
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }

    pub fn len(&self) -> usize {
        self.previous.len()
    }

    /// The data a key held when the snapshot was captured.
    pub fn previous_data(&self, key: &QueryKey) -> Option<&Option<Value>> {
        self.previous.get(key)
    }

    pub(crate) fn record(&mut self, key: QueryKey, previous: Option<Value>) {
        self.previous.insert(key, previous);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&QueryKey, &Option<Value>)> {
        self.previous.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_file_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("snapshot.json");

        let snapshot = CacheSnapshot {
            entries: vec![DehydratedEntry {
                key: QueryKey::Event { event_id: 9 },
                data: json!({"title": "Realm meetup"}),
                updated_at: Utc::now(),
            }],
        };
        snapshot.save_to(&path).expect("save");

        let loaded = CacheSnapshot::load_from(&path)
            .expect("load")
            .expect("present");
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].key, QueryKey::Event { event_id: 9 });
        assert_eq!(loaded.entries[0].data, json!({"title": "Realm meetup"}));
    }

    #[test]
    fn test_load_missing_snapshot_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = CacheSnapshot::load_from(&dir.path().join("absent.json")).expect("load");
        assert!(missing.is_none());
    }

    #[test]
    fn test_mutation_snapshot_records_absent_keys() {
        let mut snapshot = MutationSnapshot::default();
        let key = QueryKey::Poll { poll_id: 3 };
        snapshot.record(key.clone(), None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.previous_data(&key), Some(&None));
    }
}
