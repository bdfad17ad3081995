//! Crash-safe whole-file writes (temp file + rename) and JSON record helpers.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

const TMP_SUFFIX: &str = ".tmp";

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replace `path` with `contents` atomically.
///
/// Readers see either the old file or the new one, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = tmp_path_for(path);
    write_synced(&tmp_path, contents)?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Publish `contents` at `path` only if nothing exists there yet.
///
/// The file appears complete or not at all. Returns `false` when `path` is
/// already taken.
pub fn create_exclusive(path: &Path, contents: &[u8]) -> Result<bool> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    // Creators racing for the same path must not share a staging file.
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".{}-{seq}{TMP_SUFFIX}", std::process::id()));
    let tmp_path = path.with_file_name(name);
    write_synced(&tmp_path, contents)?;

    let linked = fs::hard_link(&tmp_path, path);
    if let Err(err) = fs::remove_file(&tmp_path) {
        warn!(path = %tmp_path.display(), err = %err, "failed to remove temp file");
    }
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err).with_context(|| format!("publish {}", path.display())),
    }
}

/// Serialize `value` as JSON and publish it with [`create_exclusive`].
pub fn create_json<T: Serialize>(path: &Path, value: &T) -> Result<bool> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    create_exclusive(path, buf.as_bytes())
}

fn write_synced(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("create temp file {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write temp file {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync temp file {}", path.display()))
}

/// Pretty-print `value` as JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

/// Read and deserialize one JSON record.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Delete leftover `*.tmp` files in `dir` from interrupted writes.
///
/// Returns how many were removed. A missing directory counts as clean.
pub fn remove_stale_tmp(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read dir entry in {}", dir.display()))?
            .path();
        let is_tmp = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(TMP_SUFFIX));
        if !is_tmp {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale temp file");
                removed += 1;
            }
            Err(err) => warn!(path = %path.display(), err = %err, "failed to remove temp file"),
        }
    }
    Ok(removed)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}
