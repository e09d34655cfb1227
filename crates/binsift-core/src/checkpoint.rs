//! Checkpoint store
//!
//! Persists the last observed log position per source so a later run can
//! resume where it stopped. Files are JSON, keyed by a small fingerprint
//! of the source identity, written atomically via temp file + rename.
//! Saving is always explicit; the pipeline never autosaves.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

/// Saved stream position plus context about the last event seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub log_file: String,
    pub position: u32,
    pub saved_at: DateTime<Utc>,
    pub action: String,
    pub database: String,
    pub table: String,
}

/// What kind of source an identity refers to; part of the storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Stream,
}

impl SourceKind {
    fn prefix(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Stream => "stream",
        }
    }
}

/// Directory-backed checkpoint store.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Per-user default: `$HOME/.binsift/checkpoints`.
    pub fn default_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".binsift")
            .join("checkpoints")
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn file_path(&self, kind: SourceKind, identity: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{:08x}.json", kind.prefix(), fingerprint(identity)))
    }

    pub async fn load(&self, kind: SourceKind, identity: &str) -> Result<Option<Position>> {
        let path = self.file_path(kind, identity);
        let data = match fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::checkpoint(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let position: Position = serde_json::from_str(&data)
            .map_err(|e| Error::checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e)))?;
        Ok(Some(position))
    }

    pub async fn save(&self, kind: SourceKind, identity: &str, position: &Position) -> Result<()> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::checkpoint(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let path = self.file_path(kind, identity);
        let content = serde_json::to_string_pretty(position)?;

        // Temp file + rename keeps the checkpoint readable even if the
        // process dies mid-write.
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, &content)
            .await
            .map_err(|e| Error::checkpoint(format!("failed to write {}: {}", temp.display(), e)))?;
        fs::rename(&temp, &path)
            .await
            .map_err(|e| Error::checkpoint(format!("failed to rename {}: {}", path.display(), e)))?;

        debug!(
            path = %path.display(),
            log_file = %position.log_file,
            position = position.position,
            "checkpoint saved"
        );
        Ok(())
    }

    pub async fn clear(&self, kind: SourceKind, identity: &str) -> Result<()> {
        let path = self.file_path(kind, identity);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::checkpoint(format!(
                "failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

/// FNV-1a, 32-bit: small, stable fingerprint for filenames.
fn fingerprint(identity: &str) -> u32 {
    const OFFSET: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET;
    for b in identity.as_bytes() {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
