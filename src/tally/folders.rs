use crate::tally::*;

use serde::{Deserialize, Serialize};

/// Named lists of contest keys, stored as one JSON object.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FolderStore {
    folders: BTreeMap<String, Vec<String>>,
}

impl FolderStore {
    /// A file that does not exist yet is an empty store.
    pub fn read(path: &Path) -> BTallyResult<FolderStore> {
        if !path.exists() {
            debug!("FolderStore::read: {} does not exist", path.display());
            return Ok(FolderStore::default());
        }
        let text = read_text(path)?;
        let store: FolderStore = serde_json::from_str(&text).context(ParsingJsonSnafu {
            path: path.display().to_string(),
        })?;
        info!("FolderStore::read: {} folders", store.folders.len());
        Ok(store)
    }

    pub fn write(&self, path: &Path) -> BTallyResult<()> {
        let contents = serde_json::to_string_pretty(self).context(SerializingJsonSnafu {})?;
        write_text(path, &contents)
    }

    /// False when the folder already exists.
    pub fn add(&mut self, name: &str) -> bool {
        if self.folders.contains_key(name) {
            return false;
        }
        self.folders.insert(name.to_string(), Vec::new());
        true
    }

    /// Appends the keys that the folder does not hold yet. Returns how many
    /// were added.
    pub fn assign(&mut self, name: &str, keys: &[String]) -> usize {
        let entry = self.folders.entry(name.to_string()).or_default();
        let mut added = 0;
        for key in keys.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
            if !entry.iter().any(|k| k == key) {
                entry.push(key.to_string());
                added += 1;
            }
        }
        added
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.folders.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.folders.get(name).map(|v| v.as_slice())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.folders.keys().map(|k| k.as_str())
    }
}
