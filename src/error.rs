//! Error types for SkyTrack
//!
//! This module defines all error types used throughout the orchestrator,
//! split by how the control loop treats them: configuration and state-store
//! errors are fatal, submission and status-query errors are transient.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for SkyTrack operations
#[derive(Error, Debug)]
pub enum SkyTrackError {
    /// Malformed configuration or unknown sweep mode
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The control plane rejected or failed to accept a launch/execute call
    #[error("Submission to cluster '{cluster}' failed: {message}")]
    SubmissionError { cluster: String, message: String },

    /// A status query could not be answered
    #[error("Status query for '{submission_id}' failed: {message}")]
    StatusQueryError {
        submission_id: String,
        message: String,
    },

    /// The remote job itself reported failure
    #[error("Job '{slug}' failed: {message}")]
    JobFailed { slug: String, message: String },

    /// The job state file is unreadable or corrupt
    #[error("State store error at '{path}': {message}")]
    StateStore { path: PathBuf, message: String },

    /// I/O error during file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error outside of the state store
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SkyTrackError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a submission error
    pub fn submission(cluster: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubmissionError {
            cluster: cluster.into(),
            message: message.into(),
        }
    }

    /// Create a status query error
    pub fn status_query(submission_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StatusQueryError {
            submission_id: submission_id.into(),
            message: message.into(),
        }
    }

    /// Create a remote job failure
    pub fn job_failed(slug: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JobFailed {
            slug: slug.into(),
            message: message.into(),
        }
    }

    /// Create a state store error
    pub fn state_store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateStore {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error is transient (the loop logs it and keeps going)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SubmissionError { .. } | Self::StatusQueryError { .. } | Self::JobFailed { .. }
        )
    }

    /// Check if this error must abort the sweep
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_) | Self::StateStore { .. } | Self::Io { .. }
        )
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Io { path, .. } | Self::StateStore { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// Result type alias for SkyTrack operations
pub type Result<T> = std::result::Result<T, SkyTrackError>;

impl From<std::io::Error> for SkyTrackError {
    fn from(err: std::io::Error) -> Self {
        SkyTrackError::Io {
            path: PathBuf::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for SkyTrackError {
    fn from(err: serde_json::Error) -> Self {
        SkyTrackError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for SkyTrackError {
    fn from(err: serde_yaml::Error) -> Self {
        SkyTrackError::Serialization(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| SkyTrackError::io(path, e))
    }
}
