//! Audit copies of raw harvests on disk.
//!
//! Layout: `{archive_dir}/{district}/{task_id}-{hash[0..8]}.json`, where the
//! hash is over the serialized harvest. Identical captures of a task share
//! a file; a changed page gets a new one.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::models::RawHarvest;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid raw harvest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize harvest: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a harvest is stored, given its serialized bytes.
pub fn archive_path(dir: &Path, harvest: &RawHarvest, bytes: &[u8]) -> PathBuf {
    let hash = hex::encode(Sha256::digest(bytes));
    let district = harvest
        .task_id
        .as_str()
        .split('_')
        .next()
        .filter(|d| !d.is_empty())
        .unwrap_or("unknown");
    dir.join(district)
        .join(format!("{}-{}.json", harvest.task_id, &hash[..8]))
}

#[derive(Debug, Clone)]
pub struct RawArchive {
    dir: PathBuf,
}

impl RawArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The archive for `config`, or `None` when raw copies are off.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .archive
            .keep_raw
            .then(|| Self::new(config.archive_dir()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn store(&self, harvest: &RawHarvest) -> Result<PathBuf, ArchiveError> {
        let bytes = serde_json::to_vec_pretty(harvest)?;
        let path = archive_path(&self.dir, harvest, &bytes);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ArchiveError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
        debug!("Archived raw harvest {} to {}", harvest.task_id, path.display());
        Ok(path)
    }
}

/// Read a raw harvest written by [`RawArchive::store`].
pub fn load(path: &Path) -> Result<RawHarvest, ArchiveError> {
    let content = std::fs::read_to_string(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ArchiveError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SelectedLocation, TaskId};
    use tempfile::TempDir;

    fn harvest(text: &str) -> RawHarvest {
        let mut harvest = RawHarvest::new(TaskId::from_raw("02_07_001"), SelectedLocation::default());
        harvest.page_text = Some(text.to_string());
        harvest
    }

    #[tokio::test]
    async fn stores_and_loads() {
        let tmp = TempDir::new().unwrap();
        let archive = RawArchive::new(tmp.path());
        let original = harvest("UPIN: GJ/123");

        let path = archive.store(&original).await.unwrap();
        assert!(path.starts_with(tmp.path().join("02")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("02_07_001-"), "{}", name);

        assert_eq!(load(&path).unwrap(), original);
    }

    #[tokio::test]
    async fn changed_capture_gets_new_file() {
        let tmp = TempDir::new().unwrap();
        let archive = RawArchive::new(tmp.path());
        let first = harvest("one");
        let mut changed = first.clone();
        changed.page_text = Some("two".to_string());

        let a = archive.store(&first).await.unwrap();
        let again = archive.store(&first).await.unwrap();
        let b = archive.store(&changed).await.unwrap();
        assert_eq!(a, again);
        assert_ne!(a, b);
    }

    #[test]
    fn disabled_by_default() {
        assert!(RawArchive::from_config(&Config::default()).is_none());
    }

    #[test]
    fn load_reports_bad_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("raw.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path), Err(ArchiveError::Parse { .. })));
    }
}
