//! Shared plumbing for one-file-per-record directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::atomic::read_json;
use crate::error::StoreError;

/// Sorted `*.json` paths in `dir` (file-name order). Missing dir => empty.
pub fn record_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read dir entry in {}", dir.display()))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load every record in `dir` in file-name order, skipping corrupt files.
pub fn list_records<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for path in record_paths(dir)? {
        match read_json(&path) {
            Ok(record) => records.push(record),
            Err(err) => warn!(path = %path.display(), err = format!("{err:#}"), "skipping corrupt record"),
        }
    }
    Ok(records)
}

/// Load `<dir>/<id>.json`, mapping absence to [`StoreError::NotFound`].
pub fn load_record<T: DeserializeOwned>(dir: &Path, kind: &'static str, id: &str) -> Result<T> {
    let path = dir.join(format!("{id}.json"));
    if !path.is_file() {
        return Err(StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
        .into());
    }
    read_json(&path)
}
