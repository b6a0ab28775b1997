use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};

/// Durable string key-value storage scoped to this client.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Key-value store persisted as one pretty-printed JSON object.
///
/// Reads always go to disk so several handles on the same file observe each
/// other's writes. Writes merge the single key into whatever is on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, apply: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("state store lock poisoned"))?;
        // A corrupt file is replaced rather than blocking every later write.
        let mut on_disk = read_json_object(&self.path).ok().flatten().unwrap_or_default();
        apply(&mut on_disk);
        write_json_object(&self.path, &on_disk)
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let Some(payload) = read_json_object(&self.path)? else {
            return Ok(None);
        };
        match payload.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(other) => bail!("state key '{key}' holds a non-string value: {other}"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|payload| {
            payload.insert(key.to_string(), Value::String(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|payload| {
            payload.remove(key);
        })
    }
}

fn read_json_object(path: &Path) -> Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("failed reading {}", path.display())),
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("state file {} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(object) => Ok(Some(object)),
        _ => bail!("state file {} is not a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonFileStore, KvStore, MemoryStore};

    #[test]
    fn file_store_round_trips_and_survives_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("missing")?, None);

        store.set("arena_friend_code", "arena")?;
        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("arena_friend_code")?.as_deref(), Some("arena"));

        reopened.remove("arena_friend_code")?;
        assert_eq!(store.get("arena_friend_code")?, None);
        Ok(())
    }

    #[test]
    fn file_store_merges_writes_from_separate_handles() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        let first = JsonFileStore::new(&path);
        let second = JsonFileStore::new(&path);

        first.set("a", "1")?;
        second.set("b", "2")?;
        first.set("c", "3")?;

        let reloaded = JsonFileStore::new(&path);
        assert_eq!(reloaded.get("a")?.as_deref(), Some("1"));
        assert_eq!(reloaded.get("b")?.as_deref(), Some("2"));
        assert_eq!(reloaded.get("c")?.as_deref(), Some("3"));
        Ok(())
    }

    #[test]
    fn corrupt_file_errors_on_read_and_is_replaced_on_write() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state.json");
        std::fs::write(&path, "{not json")?;
        let store = JsonFileStore::new(&path);
        assert!(store.get("a").is_err());

        store.set("a", "1")?;
        assert_eq!(store.get("a")?.as_deref(), Some("1"));
        Ok(())
    }

    #[test]
    fn memory_store_behaves_like_a_map() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set("k", "v")?;
        assert_eq!(store.get("k")?.as_deref(), Some("v"));
        store.remove("k")?;
        assert_eq!(store.get("k")?, None);
        Ok(())
    }
}
