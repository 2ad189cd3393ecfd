//! Discovery of per-sample files laid out as `<root>/<difficulty>/<id>.<ext>`.

use crate::trace::SampleId;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One sample file found under a difficulty split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub difficulty: String,
    pub id: SampleId,
    pub path: PathBuf,
}

fn sorted_children(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to list {}", dir.display()))
}

/// Difficulty split directories under `root`, sorted by name.
pub fn difficulties(root: &Path) -> Result<Vec<String>> {
    Ok(sorted_children(root)?
        .into_iter()
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect())
}

/// Every `<id>.<extension>` file in the requested splits (all splits when
/// `only` is empty), split by split, in file-name order.
pub fn scan(root: &Path, extension: &str, only: &[String]) -> Result<Vec<Entry>> {
    let splits = if only.is_empty() {
        difficulties(root)?
    } else {
        only.to_vec()
    };
    let suffix = format!(".{extension}");

    let mut entries = Vec::new();
    for difficulty in splits {
        let dir = root.join(&difficulty);
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "Input directory not found; skipping");
            continue;
        }
        for child in sorted_children(&dir)? {
            if !child.file_type().is_file() {
                continue;
            }
            let Some(id) = child
                .file_name()
                .to_str()
                .and_then(|name| name.strip_suffix(&suffix))
            else {
                continue;
            };
            entries.push(Entry {
                difficulty: difficulty.clone(),
                id: SampleId::new(id),
                path: child.path().to_path_buf(),
            });
        }
    }
    Ok(entries)
}
