//! Per-sample artifact stores.
//!
//! Prompts and model responses are written once per sample. A key that is
//! already present counts as finished work, which is what lets an
//! interrupted batch resume without redoing (or re-billing) samples.

use crate::trace::SampleId;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Addresses one artifact: a sample within a difficulty split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub difficulty: String,
    pub sample: SampleId,
}

impl ArtifactKey {
    pub fn new(difficulty: impl Into<String>, sample: SampleId) -> Self {
        Self {
            difficulty: difficulty.into(),
            sample,
        }
    }
}

pub trait ArtifactStore {
    fn contains(&self, key: &ArtifactKey) -> bool;
    fn write(&mut self, key: &ArtifactKey, contents: &str) -> io::Result<()>;
}

/// `<root>/<difficulty>/<sample>.txt`
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &ArtifactKey) -> PathBuf {
        self.root
            .join(&key.difficulty)
            .join(format!("{}.txt", key.sample))
    }
}

impl ArtifactStore for DirStore {
    fn contains(&self, key: &ArtifactKey) -> bool {
        self.path(key).is_file()
    }

    fn write(&mut self, key: &ArtifactKey, contents: &str) -> io::Result<()> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&path, contents)
    }
}

/// Write through a sibling temp file so a crash never leaves a partial
/// artifact that would later be mistaken for a finished one.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: BTreeMap<ArtifactKey, String>,
}

impl MemoryStore {
    pub fn get(&self, key: &ArtifactKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl ArtifactStore for MemoryStore {
    fn contains(&self, key: &ArtifactKey) -> bool {
        self.entries.contains_key(key)
    }

    fn write(&mut self, key: &ArtifactKey, contents: &str) -> io::Result<()> {
        self.entries.insert(key.clone(), contents.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_store_paths_keep_dotted_ids() {
        let store = DirStore::new("/results/loop/model");
        let key = ArtifactKey::new("easy", SampleId::new("ClassEval_2@Stack.pop"));
        assert_eq!(
            store.path(&key),
            PathBuf::from("/results/loop/model/easy/ClassEval_2@Stack.pop.txt")
        );
    }

    #[test]
    fn test_dir_store_write_then_contains() {
        let dir = TempDir::new().unwrap();
        let mut store = DirStore::new(dir.path());
        let key = ArtifactKey::new("difficult", SampleId::new("HumanEval_1"));

        assert!(!store.contains(&key));
        store.write(&key, "answer").unwrap();
        assert!(store.contains(&key));
        assert_eq!(fs::read_to_string(store.path(&key)).unwrap(), "answer");
        assert!(!dir.path().join("difficult/HumanEval_1.txt.tmp").exists());
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::default();
        let key = ArtifactKey::new("easy", SampleId::new("sample_1"));
        store.write(&key, "Error").unwrap();
        assert!(store.contains(&key));
        assert_eq!(store.get(&key), Some("Error"));
        assert_eq!(store.get(&ArtifactKey::new("hard", SampleId::new("sample_1"))), None);
    }
}
