//! Work ledger — last successfully reviewed revision per item.
//!
//! Persists a JSON document at `<home>/.patrol/ledger.json`:
//! `{ "synced_at": …, "items": { "owner/name#N": "<head sha>" } }`.
//! Writes use the atomic `.tmp` + rename pattern. An entry advances only
//! after a review for that exact revision has been durably stored; a
//! missing or corrupt ledger file loads as empty (full re-review), never
//! as a fatal error.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::{ItemKey, RepoSlug};

/// In-memory ledger state.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub synced_at: DateTime<Utc>,
    items: HashMap<ItemKey, String>,
}

/// On-disk payload.
#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    synced_at: DateTime<Utc>,
    items: HashMap<String, String>,
}

/// Accepts both the structured envelope and the legacy flat
/// `{ "owner/name#N": "sha" }` map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LedgerCompat {
    Structured(LedgerFile),
    Legacy(HashMap<String, String>),
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            synced_at: Utc::now(),
            items: HashMap::new(),
        }
    }
}

impl Ledger {
    /// Last reviewed revision for `key`, if any.
    pub fn get(&self, key: &ItemKey) -> Option<&str> {
        self.items.get(key).map(String::as_str)
    }

    /// Record `revision` as the last successfully reviewed head of `key`.
    pub fn set(&mut self, key: ItemKey, revision: impl Into<String>) {
        self.items.insert(key, revision.into());
    }

    /// Remove the entry for `key`. Returns whether one existed.
    pub fn delete(&mut self, key: &ItemKey) -> bool {
        self.items.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All tracked identities, sorted for deterministic iteration.
    pub fn keys(&self) -> Vec<ItemKey> {
        let mut keys: Vec<ItemKey> = self.items.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// The distinct repositories with at least one tracked item.
    pub fn repos(&self) -> BTreeSet<RepoSlug> {
        self.items.keys().map(|k| k.repo.clone()).collect()
    }

    /// Persist a full snapshot atomically, stamping `synced_at`.
    pub fn persist_at(&mut self, home: &Path) -> Result<(), StoreError> {
        self.synced_at = Utc::now();
        let path = paths::ledger_path(home);
        let Some(dir) = path.parent() else {
            return Err(io_err(&path, std::io::Error::other("invalid ledger path")));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let file = LedgerFile {
            synced_at: self.synced_at,
            items: self
                .items
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }
}

/// Load the ledger from `<home>/.patrol/ledger.json`.
///
/// Missing file, unreadable file, or malformed JSON all yield an empty
/// ledger. Entries whose key does not parse as `owner/name#number` are
/// skipped (hand-edited files).
pub fn load_at(home: &Path) -> Ledger {
    let path = paths::ledger_path(home);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Ledger::default();
    };
    let (synced_at, raw) = match serde_json::from_str::<LedgerCompat>(&contents) {
        Ok(LedgerCompat::Structured(file)) => (file.synced_at, file.items),
        Ok(LedgerCompat::Legacy(items)) => (Utc::now(), items),
        Err(_) => return Ledger::default(),
    };
    let items = raw
        .into_iter()
        .filter_map(|(k, v)| ItemKey::parse(&k).ok().map(|key| (key, v)))
        .collect();
    Ledger { synced_at, items }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> ItemKey {
        ItemKey::parse(s).unwrap()
    }

    #[test]
    fn empty_ledger_when_file_missing() {
        let home = TempDir::new().unwrap();
        assert!(load_at(home.path()).is_empty());
    }

    #[test]
    fn empty_ledger_when_file_corrupt() {
        let home = TempDir::new().unwrap();
        let path = paths::ledger_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "][").unwrap();
        assert!(load_at(home.path()).is_empty());
    }

    #[test]
    fn roundtrip_persist_load() {
        let home = TempDir::new().unwrap();
        let mut ledger = Ledger::default();
        ledger.set(key("acme/widgets#42"), "abc1234");
        ledger.set(key("acme/gadgets#7"), "def5678");
        ledger.persist_at(home.path()).unwrap();

        let loaded = load_at(home.path());
        assert_eq!(loaded.get(&key("acme/widgets#42")), Some("abc1234"));
        assert_eq!(loaded.get(&key("acme/gadgets#7")), Some("def5678"));
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn tmp_file_cleaned_up_after_persist() {
        let home = TempDir::new().unwrap();
        Ledger::default().persist_at(home.path()).unwrap();
        let tmp = paths::ledger_path(home.path()).with_extension("json.tmp");
        assert!(!tmp.exists(), "tmp file should be renamed away");
    }

    #[test]
    fn delete_removes_entry_and_reports() {
        let mut ledger = Ledger::default();
        ledger.set(key("acme/widgets#42"), "abc1234");
        assert!(ledger.delete(&key("acme/widgets#42")));
        assert!(!ledger.delete(&key("acme/widgets#42")));
        assert!(ledger.is_empty());
    }

    #[test]
    fn repos_lists_distinct_repositories() {
        let mut ledger = Ledger::default();
        ledger.set(key("acme/widgets#1"), "a");
        ledger.set(key("acme/widgets#2"), "b");
        ledger.set(key("acme/gadgets#1"), "c");
        let repos = ledger.repos();
        assert_eq!(repos.len(), 2);
    }

    #[test]
    fn legacy_flat_map_still_loads() {
        let home = TempDir::new().unwrap();
        let path = paths::ledger_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"acme/widgets#42":"abc1234"}"#).unwrap();

        let loaded = load_at(home.path());
        assert_eq!(loaded.get(&key("acme/widgets#42")), Some("abc1234"));
    }

    #[test]
    fn unparseable_keys_are_skipped() {
        let home = TempDir::new().unwrap();
        let path = paths::ledger_path(home.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            r#"{"acme/widgets#42":"abc1234","not-a-key":"beef"}"#,
        )
        .unwrap();

        let loaded = load_at(home.path());
        assert_eq!(loaded.len(), 1);
    }
}
