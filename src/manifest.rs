//! On-disk manifest store.
//!
//! One `manifest.json` per page output directory, mapping the page to its
//! built script and optional stylesheet. The build orchestrator is the only
//! writer; every write goes to a temporary file in the same directory and is
//! renamed into place, so readers see either the old or the new manifest in
//! full.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::MANIFEST_FILE;

/// Manifest store failures.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Reading or writing the manifest failed.
    #[error("manifest I/O for page '{page}' at {}: {source}", path.display())]
    Io {
        /// Page identity.
        page: String,
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The manifest exists but is not valid JSON of the expected shape.
    #[error("malformed manifest for page '{page}': {source}")]
    Malformed {
        /// Page identity.
        page: String,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Build artifacts of one page, relative to the page's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Client script.
    pub js: String,
    /// Stylesheet, when the bundle produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

impl ManifestEntry {
    /// Serialized form written to disk. Stable for identical entries.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Read/write access to the per-page manifests under a build output root.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dist_dir: PathBuf,
}

impl ManifestStore {
    /// Store rooted at the build output directory.
    pub fn new(dist_dir: impl Into<PathBuf>) -> Self {
        Self {
            dist_dir: dist_dir.into(),
        }
    }

    /// Build output root.
    pub fn dist_dir(&self) -> &Path {
        &self.dist_dir
    }

    /// Output directory of one page.
    pub fn page_dir(&self, identity: &str) -> PathBuf {
        identity
            .split('/')
            .fold(self.dist_dir.clone(), |dir, part| dir.join(part))
    }

    /// Manifest path of one page.
    pub fn manifest_path(&self, identity: &str) -> PathBuf {
        self.page_dir(identity).join(MANIFEST_FILE)
    }

    /// Loads a page's manifest; `Ok(None)` when the page has not been built.
    pub fn load(&self, identity: &str) -> Result<Option<ManifestEntry>, ManifestError> {
        let path = self.manifest_path(identity);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ManifestError::Io {
                    page: identity.to_string(),
                    path,
                    source,
                })
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| ManifestError::Malformed {
                page: identity.to_string(),
                source,
            })
    }

    /// Atomically replaces a page's manifest.
    pub fn write(&self, identity: &str, entry: &ManifestEntry) -> Result<(), ManifestError> {
        let path = self.manifest_path(identity);
        let bytes = entry.to_bytes().map_err(|source| ManifestError::Malformed {
            page: identity.to_string(),
            source,
        })?;
        write_atomic(&path, &bytes).map_err(|source| ManifestError::Io {
            page: identity.to_string(),
            path,
            source,
        })
    }

    /// Removes a page's manifest so a failed build leaves no stale entry.
    pub fn remove(&self, identity: &str) -> Result<(), ManifestError> {
        let path = self.manifest_path(identity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ManifestError::Io {
                page: identity.to_string(),
                path,
                source,
            }),
        }
    }
}

/// Writes `bytes` to `path` via a sibling temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
