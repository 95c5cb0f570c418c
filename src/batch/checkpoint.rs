//! Per-step checkpoint files indexed by `manifest.json`.
//!
//! The manifest is the only source of truth for which checkpoints exist and
//! in what order; the directory is never scanned.

use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint<T> {
    pub step: String,
    pub timestamp: DateTime<Utc>,
    pub results_count: usize,
    pub results: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// File name relative to the checkpoint directory.
    pub file: String,
    pub timestamp: DateTime<Utc>,
    pub results_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub version: u32,
    /// Step name to checkpoint history, oldest first.
    #[serde(default)]
    pub steps: BTreeMap<String, Vec<CheckpointRecord>>,
}

impl Default for CheckpointManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            steps: BTreeMap::new(),
        }
    }
}

/// A checkpoint together with its manifest entry.
#[derive(Debug, Clone)]
pub struct StoredCheckpoint<T> {
    pub record: CheckpointRecord,
    pub checkpoint: Checkpoint<T>,
}

pub struct CheckpointStore {
    dir: PathBuf,
    /// Serializes manifest read-modify-write cycles within this process.
    manifest_lock: Mutex<()>,
    seq: AtomicU64,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, content).map_err(io_error(&temp_path))?;

    if let Err(rename_error) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_error(path)(rename_error));
    }
    Ok(())
}

/// Keeps `[A-Za-z0-9_-]` and replaces everything else with `_`.
fn sanitize_step(step: &str) -> Result<String, CheckpointError> {
    let trimmed = step.trim();
    if trimmed.is_empty() {
        return Err(CheckpointError::InvalidStep(step.to_string()));
    }
    Ok(trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect())
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            manifest_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.manifest_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the manifest; a missing manifest is an empty one.
    pub fn manifest(&self) -> Result<CheckpointManifest, CheckpointError> {
        let path = self.manifest_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(CheckpointManifest::default());
            }
            Err(err) => return Err(io_error(&path)(err)),
        };
        serde_json::from_slice(&bytes).map_err(|err| CheckpointError::Malformed {
            path: path.display().to_string(),
            message: err.to_string(),
        })
    }

    fn write_manifest(&self, manifest: &CheckpointManifest) -> Result<(), CheckpointError> {
        let path = self.manifest_path();
        let json = serde_json::to_vec_pretty(manifest).map_err(|err| CheckpointError::Malformed {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        write_atomic(&path, &json)
    }

    fn next_file_name(&self, step: &str, timestamp: DateTime<Utc>) -> String {
        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let name = format!(
                "{step}_{}_{seq:04}.json",
                timestamp.format("%Y%m%dT%H%M%S%.3fZ")
            );
            if !self.dir.join(&name).exists() {
                return name;
            }
        }
    }

    /// Writes a checkpoint of `results` for `step` and appends it to the manifest.
    pub fn save<T: Serialize>(
        &self,
        step: &str,
        results: &[T],
    ) -> Result<CheckpointRecord, CheckpointError> {
        let sanitized = sanitize_step(step)?;
        let timestamp = Utc::now();

        let checkpoint = Checkpoint {
            step: step.to_string(),
            timestamp,
            results_count: results.len(),
            results: results.iter().collect::<Vec<&T>>(),
        };

        let _guard = self.lock();
        let file = self.next_file_name(&sanitized, timestamp);
        let path = self.dir.join(&file);
        let json = serde_json::to_vec_pretty(&checkpoint).map_err(|err| CheckpointError::Malformed {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        write_atomic(&path, &json)?;

        let record = CheckpointRecord {
            file,
            timestamp,
            results_count: results.len(),
        };
        let mut manifest = self.manifest()?;
        manifest
            .steps
            .entry(step.to_string())
            .or_default()
            .push(record.clone());
        self.write_manifest(&manifest)?;

        tracing::info!(
            step,
            file = record.file.as_str(),
            results = record.results_count,
            "checkpoint saved"
        );
        Ok(record)
    }

    /// Newest readable checkpoint for `step`. Entries whose file has gone
    /// missing are skipped with a warning.
    pub fn load_latest<T: DeserializeOwned>(
        &self,
        step: &str,
    ) -> Result<Option<StoredCheckpoint<T>>, CheckpointError> {
        sanitize_step(step)?;
        let manifest = self.manifest()?;
        let Some(history) = manifest.steps.get(step) else {
            return Ok(None);
        };

        for record in history.iter().rev() {
            let path = self.dir.join(&record.file);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(
                        step,
                        file = record.file.as_str(),
                        "checkpoint listed in manifest is missing; skipping"
                    );
                    continue;
                }
                Err(err) => return Err(io_error(&path)(err)),
            };
            let checkpoint: Checkpoint<T> =
                serde_json::from_slice(&bytes).map_err(|err| CheckpointError::Malformed {
                    path: path.display().to_string(),
                    message: err.to_string(),
                })?;
            return Ok(Some(StoredCheckpoint {
                record: record.clone(),
                checkpoint,
            }));
        }
        Ok(None)
    }

    /// Manifest entries for `step`, oldest first.
    pub fn history(&self, step: &str) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        Ok(self.manifest()?.steps.remove(step).unwrap_or_default())
    }

    /// Deletes all but the `keep` most recent checkpoints of `step`.
    /// Returns how many were removed.
    pub fn prune(&self, step: &str, keep: usize) -> Result<usize, CheckpointError> {
        let _guard = self.lock();
        let mut manifest = self.manifest()?;
        let removed = self.prune_locked(&mut manifest, step, keep);
        if removed > 0 {
            self.write_manifest(&manifest)?;
        }
        Ok(removed)
    }

    pub fn prune_all(&self, keep: usize) -> Result<usize, CheckpointError> {
        let _guard = self.lock();
        let mut manifest = self.manifest()?;
        let steps: Vec<String> = manifest.steps.keys().cloned().collect();
        let removed: usize = steps
            .iter()
            .map(|step| self.prune_locked(&mut manifest, step, keep))
            .sum();
        if removed > 0 {
            self.write_manifest(&manifest)?;
        }
        Ok(removed)
    }

    fn prune_locked(&self, manifest: &mut CheckpointManifest, step: &str, keep: usize) -> usize {
        let Some(history) = manifest.steps.get_mut(step) else {
            return 0;
        };
        if history.len() <= keep {
            return 0;
        }
        let excess = history.len() - keep;
        let removed: Vec<CheckpointRecord> = history.drain(..excess).collect();
        if history.is_empty() {
            manifest.steps.remove(step);
        }

        for record in &removed {
            let path = self.dir.join(&record.file);
            if let Err(err) = fs::remove_file(&path)
                && err.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!(
                    step,
                    file = record.file.as_str(),
                    error = %err,
                    "failed to delete pruned checkpoint"
                );
            }
        }
        tracing::info!(step, removed = removed.len(), kept = keep, "checkpoints pruned");
        removed.len()
    }
}
