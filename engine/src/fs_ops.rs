//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Listing one directory level, split into files and subdirectories
//! - Allocating a collision-free target directory for a source root
//! - Copying a file through a reusable buffer, with optional verification

use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::checksums::{create_hasher, digest_file, ChecksumAlgorithm, ChecksumValue};
use crate::error::BackupError;

/// Upper bound (exclusive) for the numeric disambiguator of a source root.
pub const MAX_DISAMBIGUATOR: u32 = 100_000;

/// Size of the copy buffer owned by each `Copier`.
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Entries directly inside one directory.
#[derive(Debug, Default)]
pub struct DirListing {
    /// Full paths of non-directory entries
    pub files: Vec<PathBuf>,
    /// Full paths of subdirectories
    pub dirs: Vec<PathBuf>,
}

/// List the entries directly inside `path`.
///
/// Symbolic links are classified by what they point to. A link whose target
/// cannot be resolved is listed as a file; copying it will fail later.
///
/// # Errors
/// Returns the I/O error if the directory or any of its entries cannot be read.
pub fn list_dir(path: &Path) -> io::Result<DirListing> {
    let mut listing = DirListing::default();

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let entry_path = entry.path();
        let file_type = entry.file_type()?;

        let is_dir = if file_type.is_symlink() {
            fs::metadata(&entry_path).map(|m| m.is_dir()).unwrap_or(false)
        } else {
            file_type.is_dir()
        };

        if is_dir {
            listing.dirs.push(entry_path);
        } else {
            listing.files.push(entry_path);
        }
    }

    Ok(listing)
}

/// Create `path` and any missing parents. Succeeds if it already exists.
pub fn ensure_dir(path: &Path) -> Result<(), BackupError> {
    fs::create_dir_all(path).map_err(|source| BackupError::TargetCreation {
        path: path.to_path_buf(),
        source,
    })
}

/// Name under which a source root is placed in the target.
///
/// Uses the last path component. A filesystem root has none, so it is
/// canonicalized first and falls back to `root`.
pub fn source_root_name(source: &Path) -> OsString {
    if let Some(name) = source.file_name() {
        return name.to_os_string();
    }
    fs::canonicalize(source)
        .ok()
        .and_then(|p| p.file_name().map(OsStr::to_os_string))
        .unwrap_or_else(|| OsString::from("root"))
}

/// Find a free target path for a source root called `name` under `parent`.
///
/// Tries `parent/name`, then `parent/name/1`, `parent/name/2`, ... and returns
/// the first one that does not exist.
///
/// # Errors
/// `AllocationExhausted` if every disambiguator below `MAX_DISAMBIGUATOR` is
/// taken; `Io` if a candidate cannot be probed.
pub fn allocate_target_path(name: &OsStr, parent: &Path) -> Result<PathBuf, BackupError> {
    allocate_target_path_within(name, parent, MAX_DISAMBIGUATOR)
}

pub(crate) fn allocate_target_path_within(
    name: &OsStr,
    parent: &Path,
    bound: u32,
) -> Result<PathBuf, BackupError> {
    let base = parent.join(name);

    for i in 0..bound {
        let candidate = if i == 0 {
            base.clone()
        } else {
            base.join(i.to_string())
        };

        match fs::symlink_metadata(&candidate) {
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            Err(e) => {
                return Err(BackupError::Io {
                    path: candidate,
                    source: e,
                })
            }
        }
    }

    Err(BackupError::AllocationExhausted {
        name: name.to_string_lossy().into_owned(),
        parent: parent.to_path_buf(),
    })
}

/// Result of copying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Bytes streamed from source to target
    pub bytes: u64,
    /// Digest of the source bytes as they were read (verify only)
    pub source_digest: Option<ChecksumValue>,
    /// Digest of the target, re-read from disk after the copy (verify only)
    pub target_digest: Option<ChecksumValue>,
}

impl CopyOutcome {
    /// True unless both digests are present and differ.
    pub fn digests_match(&self) -> bool {
        match (&self.source_digest, &self.target_digest) {
            (Some(source), Some(target)) => source.hex() == target.hex(),
            _ => true,
        }
    }
}

/// Copies one file for the walker.
///
/// Errors returned as `BackupError::Access` are treated as per-file skips; any
/// other error aborts the run. Digest comparison is left to the caller.
pub trait CopyFile {
    fn copy(&mut self, source: &Path, target: &Path) -> Result<CopyOutcome, BackupError>;
}

/// Streaming file copier with optional verification.
///
/// Owns the scratch buffer, so one copier serves a whole run and must not be
/// shared between concurrent copies.
pub struct Copier {
    buffer: Vec<u8>,
    verify: Option<ChecksumAlgorithm>,
}

impl Copier {
    /// `verify` selects the digest used to check each copy, or `None` to skip
    /// verification.
    pub fn new(verify: Option<ChecksumAlgorithm>) -> Self {
        Self::with_buffer_size(verify, COPY_BUFFER_SIZE)
    }

    pub fn with_buffer_size(verify: Option<ChecksumAlgorithm>, size: usize) -> Self {
        Copier {
            buffer: vec![0u8; size.max(1)],
            verify,
        }
    }
}

/// Failure to open a file. Only access denial, or a source that no longer
/// exists, is skippable.
fn open_error(path: &Path, allow_missing: bool) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| match source.kind() {
        io::ErrorKind::PermissionDenied => BackupError::Access {
            path: path.to_path_buf(),
            source,
        },
        io::ErrorKind::NotFound if allow_missing => BackupError::Access {
            path: path.to_path_buf(),
            source,
        },
        _ => io_error(path)(source),
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl CopyFile for Copier {
    /// Copy `source` over `target` (created or truncated).
    ///
    /// When verifying, the source digest is accumulated while streaming and
    /// the target is then re-read from disk and digested on its own. The
    /// source modification time is carried over on a best-effort basis.
    ///
    /// Open failures from access denial (or a vanished source) are `Access`.
    /// Errors once streaming has started are `Io`: the target may be partial.
    fn copy(&mut self, source: &Path, target: &Path) -> Result<CopyOutcome, BackupError> {
        let mut src_file = File::open(source).map_err(open_error(source, true))?;
        let src_mtime = src_file.metadata().and_then(|m| m.modified()).ok();
        let mut dst_file = File::create(target).map_err(open_error(target, false))?;

        let mut hasher = self.verify.map(create_hasher);
        let mut bytes = 0u64;

        loop {
            let n = match src_file.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(source)(e)),
            };
            let chunk = &self.buffer[..n];
            dst_file.write_all(chunk).map_err(io_error(target))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(chunk);
            }
            bytes += n as u64;
        }

        dst_file.flush().map_err(io_error(target))?;
        drop(dst_file);
        drop(src_file);

        if let Some(mtime) = src_mtime {
            let _ = filetime::set_file_mtime(target, filetime::FileTime::from_system_time(mtime));
        }

        let source_digest = hasher.map(|h| h.finalize());
        let target_digest = match self.verify {
            Some(algorithm) => {
                let (digest, _) =
                    digest_file(target, algorithm, &mut self.buffer).map_err(io_error(target))?;
                Some(digest)
            }
            None => None,
        };

        Ok(CopyOutcome {
            bytes,
            source_digest,
            target_digest,
        })
    }
}
