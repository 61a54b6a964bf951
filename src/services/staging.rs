// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable staging of raw webhook payloads and the processing failure log.
//!
//! A payload is on disk (fsynced, atomically renamed) before the sender gets
//! an acknowledgement. Payloads are keyed by the SHA-256 of their bytes so a
//! redelivered export is recognized and not staged twice.

use crate::error::StagingError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const FILE_PREFIX: &str = "HealthAutoExport-webhook-";
const FILE_SUFFIX: &str = ".json";

/// Write `bytes` to `path` so that readers see either the old file or the
/// complete new one: temp file, fsync, rename, fsync of the directory.
pub async fn durable_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    sync_parent(path).await
}

/// Flush the directory entry created by a rename.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tokio::fs::File::open(parent).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Hex SHA-256 of a payload.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Staged file name for a payload received at `received_at`.
pub fn staged_file_name(received_at: DateTime<Utc>, checksum: &str) -> String {
    format!(
        "{}{}-{}{}",
        FILE_PREFIX,
        received_at.format("%Y%m%d-%H%M%S%.3f"),
        checksum,
        FILE_SUFFIX
    )
}

/// Recover the checksum from a staged file name.
fn checksum_from_name(name: &str) -> Option<&str> {
    let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    let (_, sum) = stem.rsplit_once('-')?;
    (sum.len() == 64 && sum.bytes().all(|b| b.is_ascii_hexdigit())).then_some(sum)
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedPayload {
    pub path: PathBuf,
    pub checksum: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Staged(StagedPayload),
    /// Same bytes were staged before; nothing written.
    Duplicate { path: PathBuf },
}

pub struct Stager {
    dir: PathBuf,
    /// checksum -> staged file
    index: DashMap<String, PathBuf>,
}

impl Stager {
    /// Open (creating if needed) a staging directory and index what's there.
    pub async fn open(dir: &Path) -> Result<Self, StagingError> {
        tokio::fs::create_dir_all(dir).await?;

        let index = DashMap::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(sum) = checksum_from_name(name) {
                index.insert(sum.to_string(), entry.path());
            }
        }
        tracing::info!(dir = %dir.display(), staged = index.len(), "Staging area ready");

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Stage a payload unless identical bytes are already staged.
    pub async fn stage(
        &self,
        bytes: &[u8],
        received_at: DateTime<Utc>,
    ) -> Result<StageOutcome, StagingError> {
        let sum = checksum(bytes);
        let path = self.dir.join(staged_file_name(received_at, &sum));

        // Claim the checksum first so concurrent identical deliveries stage once.
        match self.index.entry(sum.clone()) {
            Entry::Occupied(e) => {
                return Ok(StageOutcome::Duplicate {
                    path: e.get().clone(),
                })
            }
            Entry::Vacant(e) => {
                e.insert(path.clone());
            }
        }

        if let Err(e) = durable_write(&path, bytes).await {
            self.index.remove(&sum);
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Payload staged");
        Ok(StageOutcome::Staged(StagedPayload {
            path,
            checksum: sum,
            received_at,
        }))
    }

    /// All staged files, oldest first.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.index.iter().map(|e| e.value().clone()).collect();
        // Names start with the arrival timestamp.
        files.sort();
        files
    }
}

/// One line of the failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub staged_file: PathBuf,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only JSONL log of staged payloads whose processing failed.
pub struct FailureLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, staged_file: &Path, error: &str) -> std::io::Result<()> {
        let record = FailureRecord {
            staged_file: staged_file.to_path_buf(),
            error: error.to_string(),
            recorded_at: Utc::now(),
        };
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_all().await?;

        tracing::warn!(
            staged_file = %staged_file.display(),
            error,
            "Recorded processing failure for replay"
        );
        Ok(())
    }

    /// Read all records. Unreadable lines are skipped.
    pub async fn read_all(&self) -> std::io::Result<Vec<FailureRecord>> {
        let _guard = self.lock.lock().await;
        self.read_unlocked().await
    }

    async fn read_unlocked(&self) -> std::io::Result<Vec<FailureRecord>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed failure log line");
                    None
                }
            })
            .collect())
    }

    /// Drop every record for the given staged files.
    pub async fn resolve(&self, staged_files: &[PathBuf]) -> std::io::Result<usize> {
        let _guard = self.lock.lock().await;
        let records = self.read_unlocked().await?;
        let before = records.len();
        let remaining: Vec<_> = records
            .into_iter()
            .filter(|r| !staged_files.contains(&r.staged_file))
            .collect();

        let mut out = Vec::new();
        for r in &remaining {
            serde_json::to_writer(&mut out, r)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            out.push(b'\n');
        }
        durable_write(&self.path, &out).await?;
        Ok(before - remaining.len())
    }
}
