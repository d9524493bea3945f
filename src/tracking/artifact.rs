//! Artifact bundles
//!
//! Groups files and directories produced by a run under one name, with a
//! size and SHA-256 per file, so a run record says exactly what it left
//! behind.

use crate::error::{IoResultExt, Result, SkyTrackError};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Default bundle name
pub const DEFAULT_ARTIFACT_NAME: &str = "bundle";

/// Default bundle type
pub const DEFAULT_ARTIFACT_TYPE: &str = "experiment";

/// One file of a bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactFile {
    /// Path as found on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Hex SHA-256 of the contents
    pub sha256: String,
}

/// Named set of files
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    /// Bundle name
    pub name: String,
    /// Bundle type
    #[serde(rename = "type")]
    pub kind: String,
    /// Files in the order they were added
    pub files: Vec<ArtifactFile>,
}

impl Artifact {
    /// Create an empty bundle
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            files: Vec::new(),
        }
    }

    /// Bundle every given path
    pub fn collect<I, P>(name: impl Into<String>, kind: impl Into<String>, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut artifact = Self::new(name, kind);
        for path in paths {
            artifact.add_path(path.as_ref())?;
        }
        Ok(artifact)
    }

    /// Add a file, or every file under a directory in name order
    ///
    /// Paths that do not exist are skipped. Returns the number of files
    /// added.
    pub fn add_path(&mut self, path: &Path) -> Result<usize> {
        if path.is_file() {
            self.files.push(describe(path)?);
            return Ok(1);
        }
        if !path.is_dir() {
            debug!("Skipping missing artifact path {}", path.display());
            return Ok(0);
        }

        let mut added = 0;
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| SkyTrackError::io(path, e.into()))?;
            if entry.file_type().is_file() {
                self.files.push(describe(entry.path())?);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Total size of all files
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

fn describe(path: &Path) -> Result<ArtifactFile> {
    let file = File::open(path).with_path(path)?;
    let size = file.metadata().with_path(path)?.len();
    let mut hasher = Sha256::new();
    std::io::copy(&mut BufReader::new(file), &mut hasher).with_path(path)?;
    Ok(ArtifactFile {
        path: path.to_path_buf(),
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}
