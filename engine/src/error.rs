//! Error types for the backup engine.
//!
//! `BackupError` covers everything that can go wrong while a run walks and
//! copies source trees. Only `Access` is recovered inside the walk (the item is
//! skipped and counted); every other variant aborts the run and is attached to
//! the `BackupResult` as its cause.
//!
//! `ConfigError` covers loading, saving and validating a configuration file.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::JobState;

/// Errors raised while running a backup.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A source or target file could not be opened (permission denied, or the
    /// source vanished).
    ///
    /// The walker downgrades this to a per-file skip.
    #[error("Access error on {}: {source}", path.display())]
    Access { path: PathBuf, source: io::Error },

    /// The digest of the freshly written target differs from the source.
    #[error(
        "Backup verify failed for {}: source {source_digest} != target {target_digest}",
        path.display()
    )]
    VerifyMismatch {
        path: PathBuf,
        source_digest: String,
        target_digest: String,
    },

    /// No free disambiguated path could be found for a source root.
    #[error(
        "Too many source root directories with same name: {name} (under {})",
        parent.display()
    )]
    AllocationExhausted { name: String, parent: PathBuf },

    /// A target directory could not be created.
    #[error("Failed to create target directory {}: {source}", path.display())]
    TargetCreation { path: PathBuf, source: io::Error },

    /// A source directory could not be listed for a reason other than access denial.
    #[error("Failed to enumerate directory {}: {source}", path.display())]
    Enumeration { path: PathBuf, source: io::Error },

    /// Any other unexpected I/O failure, including read, write and flush
    /// errors in the middle of a copy.
    #[error("I/O error on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// `run_backup` was called on a job that already ran.
    #[error("Backup job must be idle to run; current state: {state:?}")]
    JobNotIdle { state: JobState },
}

impl BackupError {
    /// True for the one error class the walker recovers from locally.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Access { .. })
    }
}

/// Errors raised while loading, saving or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config file {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The target path is missing or blank.
    #[error("No target specified")]
    MissingTarget,

    /// The configuration lists no source directories.
    #[error("No sources specified")]
    NoSources,

    #[error("Unknown verify algorithm '{0}'; expected md5, sha256 or blake3")]
    UnknownAlgorithm(String),
}
