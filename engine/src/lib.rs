//! # snapback Engine - Local Backup Library
//!
//! Copies one or more source directory trees into a fresh, timestamped folder
//! under a backup target, optionally verifying every copy by digest.
//!
//! ## Overview
//!
//! The engine is headless; the CLI (and any other front end) drives it through
//! a configuration and an event sink. It features:
//! - Per-source and global exclusions for file types and directories
//! - Never overwriting an earlier backup root (numbered disambiguation)
//! - Per-file skip on access errors, abort on anything else
//! - Optional MD5/SHA-256/BLAKE3 verification of the written copy
//! - A plain-text log of the run under the target root
//!
//! ## Basic Usage
//!
//! ```no_run
//! use snapback_engine::{create_backup, run_backup, Configuration, NullEvents};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Configuration::load("snapback.toml".as_ref())?;
//! let config = config.with_timestamped_target("myhost", chrono::Local::now());
//!
//! let mut job = create_backup(config)?;
//! let result = run_backup(&mut job, &NullEvents)?;
//!
//! println!(
//!     "{}: {} files, {} bytes",
//!     if result.success { "ok" } else { "failed" },
//!     result.files_copied,
//!     result.bytes_copied
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **config**: Configuration file model, loading and discovery
//! - **model**: Job and result types
//! - **error**: Error types
//! - **filter**: Exclusion lists
//! - **fs_ops**: Listing, target path allocation and the file copier
//! - **job**: Job orchestration (create, run)
//! - **events**: Event sink trait and run log
//! - **checksums**: Digest computation

pub mod checksums;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod fs_ops;
pub mod job;
pub mod model;

// Re-export main types and functions
pub use checksums::{digest_file, ChecksumAlgorithm, ChecksumValue};
pub use config::{Configuration, Options, Source, Target};
pub use error::{BackupError, ConfigError};
pub use events::{BackupEvents, NullEvents};
pub use filter::{ExcludeList, Exclusions};
pub use fs_ops::{allocate_target_path, Copier, CopyFile, CopyOutcome};
pub use job::{create_backup, run_backup, run_backup_with, LOG_FILE_NAME};
pub use model::{BackupJob, BackupResult, JobState, SourceRoot};
