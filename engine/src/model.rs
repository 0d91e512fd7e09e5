//! Core data model for backup runs.
//!
//! This module defines the main data structures:
//! - BackupJob: one configured backup, consumed by exactly one run
//! - BackupResult: counters, timing and outcome of that run
//! - JobState: the run state machine

use std::path::PathBuf;

use chrono::{DateTime, Duration, Local};
use uuid::Uuid;

use crate::config::Configuration;
use crate::error::BackupError;

/// A configured backup waiting to be run.
///
/// The configuration is owned by the job and never mutated once the job
/// exists; the run only advances `state`.
#[derive(Debug)]
pub struct BackupJob {
    /// Unique identifier for this job, repeated in the result and log file
    pub id: Uuid,

    /// Configuration for the run
    pub config: Configuration,

    /// Current run state
    pub state: JobState,

    /// When the job was created
    pub created_at: DateTime<Local>,
}

/// The state of a backup run.
///
/// A run moves strictly forward:
/// `Idle -> Starting -> Running -> (Succeeded | Failed) -> Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Created, not yet started
    Idle,
    /// Creating the target root and opening the log file
    Starting,
    /// Walking source trees
    Running,
    /// Every source was walked without a fatal error
    Succeeded,
    /// A fatal error aborted the walk
    Failed,
    /// End time recorded and log file closed
    Finished,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Idle => "Idle",
            JobState::Starting => "Starting",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
            JobState::Finished => "Finished",
        };
        f.write_str(name)
    }
}

/// A source root and the target directory allocated for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Outcome of a single backup run.
///
/// Counters only ever increase while the run is in progress. When a fatal
/// error aborts the run, everything counted before the abort is kept.
#[derive(Debug)]
pub struct BackupResult {
    /// Id of the job that produced this result
    pub run_id: Uuid,

    /// True if no fatal error escaped the walk
    pub success: bool,

    /// When the run started
    pub start_time: DateTime<Local>,

    /// When the run finished (equal to `start_time` until then)
    pub end_time: DateTime<Local>,

    /// Total bytes streamed into target files
    pub bytes_copied: u64,

    /// Files copied (and verified, if enabled)
    pub files_copied: u64,

    /// Subdirectories whose subtree was walked completely
    pub directories_copied: u64,

    /// Files that could not be copied
    pub files_skipped: u64,

    /// Directories that could not be enumerated
    pub directories_skipped: u64,

    /// Root directory the sources were backed up into
    pub target_root: PathBuf,

    /// Source roots walked so far, with their allocated target paths
    pub roots: Vec<SourceRoot>,

    /// Path of the log file, if one was created
    pub log_file_path: Option<PathBuf>,

    /// Error that caused the run to fail
    pub error: Option<BackupError>,
}

impl BackupResult {
    pub(crate) fn new(run_id: Uuid, target_root: PathBuf) -> Self {
        let now = Local::now();
        BackupResult {
            run_id,
            success: false,
            start_time: now,
            end_time: now,
            bytes_copied: 0,
            files_copied: 0,
            directories_copied: 0,
            files_skipped: 0,
            directories_skipped: 0,
            target_root,
            roots: Vec::new(),
            log_file_path: None,
            error: None,
        }
    }

    /// Time taken by the run.
    pub fn elapsed(&self) -> Duration {
        self.end_time - self.start_time
    }

    pub(crate) fn record_file_copied(&mut self, bytes: u64) {
        self.files_copied += 1;
        self.bytes_copied += bytes;
    }

    pub(crate) fn record_file_skipped(&mut self) {
        self.files_skipped += 1;
    }

    pub(crate) fn record_directory_copied(&mut self) {
        self.directories_copied += 1;
    }

    pub(crate) fn record_directory_skipped(&mut self) {
        self.directories_skipped += 1;
    }
}
