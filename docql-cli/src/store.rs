//! Document files and the on-disk collection directory

use anyhow::{Context, Result};
use docql_core::{Collection, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parse documents from text holding a JSON array or a sequence of JSON
/// values (one per line, or simply concatenated).
pub fn parse_documents(content: &str) -> Result<Vec<Value>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let parsed: serde_json::Value =
            serde_json::from_str(trimmed).context("Failed to parse JSON array")?;
        return Ok(Value::from(parsed).into_array());
    }
    serde_json::Deserializer::from_str(content)
        .into_iter::<serde_json::Value>()
        .enumerate()
        .map(|(i, doc)| {
            doc.map(Value::from)
                .with_context(|| format!("Failed to parse document {}", i + 1))
        })
        .collect()
}

/// Read documents from a file, or from stdin when the path is `-`
pub fn read_documents(path: &Path) -> Result<Vec<Value>> {
    let content = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    };
    parse_documents(&content)
}

/// Collections backed by `<dir>/<name>.json`, loaded on first use
#[derive(Clone)]
pub struct CollectionStore {
    dir: PathBuf,
    loaded: Arc<Mutex<HashMap<String, Collection>>>,
}

impl CollectionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Look up a collection. A name without a file yields an empty
    /// collection; an unreadable file resolves to nothing.
    pub fn get(&self, name: &str) -> Option<Collection> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            warn!(collection = %name, "Rejected collection name");
            return None;
        }
        let mut loaded = self.loaded.lock();
        if let Some(collection) = loaded.get(name) {
            return Some(collection.clone());
        }
        let path = self.path_for(name);
        let docs = if path.exists() {
            match read_documents(&path) {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(collection = %name, "Failed to load collection: {:#}", e);
                    return None;
                }
            }
        } else {
            Vec::new()
        };
        debug!(collection = %name, documents = docs.len(), "Loaded collection");
        let collection: Collection = Arc::new(RwLock::new(docs));
        loaded.insert(name.to_string(), collection.clone());
        Some(collection)
    }

    /// Resolver handed to the engine options
    pub fn resolver(&self) -> docql_core::options::CollectionResolver {
        let store = self.clone();
        Arc::new(move |name: &str| store.get(name))
    }

    /// Write every collection touched during the run back to disk
    pub fn save(&self) -> Result<()> {
        let loaded = self.loaded.lock();
        for (name, collection) in loaded.iter() {
            let path = self.path_for(name);
            let docs = collection.read();
            let content = serde_json::to_string_pretty(&*docs)
                .with_context(|| format!("Failed to encode collection: {}", name))?;
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write collection file: {}", path.display()))?;
            info!(collection = %name, documents = docs.len(), "Saved collection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_documents() {
        let docs = parse_documents("[{\"a\": 1}, {\"a\": 2}]").unwrap();
        assert_eq!(docs.len(), 2);

        let docs = parse_documents("{\"a\": 1}\n{\"a\": 2}\n\n{\"a\": 3}\n").unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[2].get("a"), Some(&Value::from(3)));

        assert!(parse_documents("").unwrap().is_empty());
        assert!(parse_documents("{\"a\": ").is_err());
    }

    #[test]
    fn test_store_loads_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.json"), "[{\"name\": \"ann\"}]").unwrap();

        let store = CollectionStore::new(dir.path());
        let users = store.get("users").unwrap();
        assert_eq!(users.read().len(), 1);
        assert!(Arc::ptr_eq(&users, &store.get("users").unwrap()));

        let fresh = store.get("archive").unwrap();
        assert!(fresh.read().is_empty());
        fresh.write().push(Value::from(serde_json::json!({"x": 1})));
        store.save().unwrap();

        let saved = read_documents(&dir.path().join("archive.json")).unwrap();
        assert_eq!(saved, vec![Value::from(serde_json::json!({"x": 1}))]);
        assert!(store.get("../etc").is_none());
    }
}
