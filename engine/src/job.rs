//! Backup orchestration.
//!
//! This module provides the job lifecycle:
//! - Creating a job from a validated configuration
//! - Running it: creating the target root, opening the log, walking every
//!   source root and accumulating the result
//!
//! A run walks each source tree depth-first with an explicit stack. Files in a
//! directory are copied before its subdirectories are entered. Access errors
//! skip the affected file or directory; anything else aborts the run with the
//! counters gathered so far.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Configuration;
use crate::error::{BackupError, ConfigError};
use crate::events::{BackupEvents, LogFile, RunEvents};
use crate::filter::Exclusions;
use crate::fs_ops::{self, CopyFile, Copier};
use crate::model::{BackupJob, BackupResult, JobState, SourceRoot};

/// Name of the log file written under the target root.
pub const LOG_FILE_NAME: &str = "backup.log";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Create a new backup job.
///
/// # Errors
/// Returns `ConfigError` if the configuration has no target or no sources.
pub fn create_backup(config: Configuration) -> Result<BackupJob, ConfigError> {
    config.validate()?;

    Ok(BackupJob {
        id: Uuid::new_v4(),
        config,
        state: JobState::Idle,
        created_at: Local::now(),
    })
}

/// Run a job with the standard copier.
///
/// Verification follows `Options::verify` using `Options::verify_algorithm`.
///
/// # Errors
/// Returns `BackupError::JobNotIdle` if the job has already run. Failures
/// during the run are reported in the returned `BackupResult`, not as `Err`.
pub fn run_backup(
    job: &mut BackupJob,
    events: &dyn BackupEvents,
) -> Result<BackupResult, BackupError> {
    let options = &job.config.options;
    let mut copier = Copier::new(options.verify.then_some(options.verify_algorithm));
    run_backup_with(job, events, &mut copier)
}

/// Run a job, copying files through `copier`.
///
/// Transitions the job `Idle -> Starting -> Running -> Succeeded|Failed ->
/// Finished`. The result always carries start/end times and every counter
/// accumulated before a fatal error.
pub fn run_backup_with(
    job: &mut BackupJob,
    events: &dyn BackupEvents,
    copier: &mut dyn CopyFile,
) -> Result<BackupResult, BackupError> {
    run_with_allocation_bound(job, events, copier, fs_ops::MAX_DISAMBIGUATOR)
}

/// `run_backup_with`, trying at most `allocation_bound` candidate target paths
/// per source root.
pub(crate) fn run_with_allocation_bound(
    job: &mut BackupJob,
    events: &dyn BackupEvents,
    copier: &mut dyn CopyFile,
    allocation_bound: u32,
) -> Result<BackupResult, BackupError> {
    if job.state != JobState::Idle {
        return Err(BackupError::JobNotIdle { state: job.state });
    }

    let span = tracing::info_span!("backup", run_id = %job.id);
    let _guard = span.enter();

    let config = &job.config;
    let target_root = config.target.path.clone();
    let mut result = BackupResult::new(job.id, target_root.clone());
    let mut run_events = RunEvents::new(events);

    job.state = JobState::Starting;
    debug!(state = %job.state, target = %target_root.display(), "run state changed");

    if let Err(e) = fs_ops::ensure_dir(&target_root) {
        job.state = JobState::Failed;
        return Ok(finish(job, result, run_events, Some(e)));
    }

    if config.options.create_log_file {
        let log_path = target_root.join(LOG_FILE_NAME);
        match LogFile::create(&log_path) {
            Ok(log) => {
                run_events.attach_log(log);
                result.log_file_path = Some(log_path);
            }
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "log file not created");
                run_events.error(&format!(
                    "Failed to create log file {}: {}",
                    log_path.display(),
                    e
                ));
            }
        }
    }
    run_events.log_line(&format!(
        "Starting at {} (run {})",
        timestamp(result.start_time),
        job.id
    ));

    job.state = JobState::Running;
    debug!(state = %job.state, sources = config.source.len(), "run state changed");

    let outcome = {
        let mut walker = Walker {
            copier,
            events: &mut run_events,
            result: &mut result,
            allocation_bound,
        };
        walker.walk_sources(config)
    };

    match outcome {
        Ok(()) => {
            job.state = JobState::Succeeded;
            Ok(finish(job, result, run_events, None))
        }
        Err(e) => {
            job.state = JobState::Failed;
            Ok(finish(job, result, run_events, Some(e)))
        }
    }
}

/// Record the outcome, write the closing log lines and move to `Finished`.
fn finish(
    job: &mut BackupJob,
    mut result: BackupResult,
    mut events: RunEvents<'_>,
    error: Option<BackupError>,
) -> BackupResult {
    result.end_time = Local::now();

    match error {
        None => {
            result.success = true;
            info!(
                files = result.files_copied,
                bytes = result.bytes_copied,
                files_skipped = result.files_skipped,
                dirs_skipped = result.directories_skipped,
                "backup succeeded"
            );
        }
        Some(e) => {
            tracing::error!(error = %e, files = result.files_copied, "backup failed");
            events.fatal(&e.to_string(), &timestamp(result.end_time));
            result.success = false;
            result.error = Some(e);
        }
    }

    events.log_line(&format!("Finished at {}", timestamp(result.end_time)));
    events.close_log();

    job.state = JobState::Finished;
    debug!(state = %job.state, "run state changed");
    result
}

enum Visit {
    /// Copy the files of `source` into `target`, then queue its subdirectories
    Enter {
        source: PathBuf,
        target: PathBuf,
        is_root: bool,
    },
    /// Every subdirectory of a non-root directory has been walked
    Leave,
}

/// Walk state for one run. Borrows the run's copier, events and result.
struct Walker<'r, 'e> {
    copier: &'r mut dyn CopyFile,
    events: &'r mut RunEvents<'e>,
    result: &'r mut BackupResult,
    allocation_bound: u32,
}

impl Walker<'_, '_> {
    fn walk_sources(&mut self, config: &Configuration) -> Result<(), BackupError> {
        for source in &config.source {
            let exclusions = Exclusions::for_source(source, &config.options);
            let name = fs_ops::source_root_name(&source.path);
            let target = fs_ops::allocate_target_path_within(
                &name,
                &config.target.path,
                self.allocation_bound,
            )?;

            info!(source = %source.path.display(), target = %target.display(), "backing up source root");
            self.events.information(&format!(
                "Backing up {} to {}",
                source.path.display(),
                target.display()
            ));
            self.result.roots.push(SourceRoot {
                source: source.path.clone(),
                target: target.clone(),
            });

            self.walk_tree(&source.path, &target, &exclusions)?;
        }
        Ok(())
    }

    fn walk_tree(
        &mut self,
        source_root: &Path,
        target_root: &Path,
        exclusions: &Exclusions,
    ) -> Result<(), BackupError> {
        let mut stack = vec![Visit::Enter {
            source: source_root.to_path_buf(),
            target: target_root.to_path_buf(),
            is_root: true,
        }];

        while let Some(visit) = stack.pop() {
            let (source, target, is_root) = match visit {
                Visit::Leave => {
                    self.result.record_directory_copied();
                    continue;
                }
                Visit::Enter {
                    source,
                    target,
                    is_root,
                } => (source, target, is_root),
            };

            fs_ops::ensure_dir(&target)?;

            let listing = match fs_ops::list_dir(&source) {
                Ok(listing) => listing,
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    self.result.record_directory_skipped();
                    warn!(dir = %source.display(), error = %e, "directory skipped");
                    self.events.error(&format!(
                        "Failed to enumerate {}: {}. Directory skipped.",
                        source.display(),
                        e
                    ));
                    continue;
                }
                Err(e) => {
                    return Err(BackupError::Enumeration {
                        path: source,
                        source: e,
                    })
                }
            };

            for file in &listing.files {
                let Some(name) = file.file_name() else {
                    continue;
                };
                if exclusions.excludes_file(name) {
                    debug!(file = %file.display(), "excluded by file type");
                    continue;
                }
                self.copy_one(file, &target.join(name))?;
            }

            if !is_root {
                stack.push(Visit::Leave);
            }

            let mut subdirs = Vec::with_capacity(listing.dirs.len());
            for dir in listing.dirs {
                if exclusions.excludes_dir(&dir) {
                    debug!(dir = %dir.display(), "excluded by directory filter");
                    continue;
                }
                let Some(name) = dir.file_name() else {
                    continue;
                };
                let dir_target = target.join(name);
                subdirs.push(Visit::Enter {
                    source: dir,
                    target: dir_target,
                    is_root: false,
                });
            }
            // Reversed so the first listed subdirectory is walked first.
            stack.extend(subdirs.into_iter().rev());
        }

        Ok(())
    }

    fn copy_one(&mut self, source: &Path, target: &Path) -> Result<(), BackupError> {
        let outcome = match self.copier.copy(source, target) {
            Ok(outcome) => outcome,
            Err(e) if e.is_skippable() => {
                self.result.record_file_skipped();
                warn!(file = %source.display(), error = %e, "file skipped");
                self.events.error(&format!("{}: File skipped", e));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if !outcome.digests_match() {
            let hex = |digest: &Option<crate::checksums::ChecksumValue>| {
                digest.as_ref().map(|d| d.hex().to_string()).unwrap_or_default()
            };
            return Err(BackupError::VerifyMismatch {
                path: source.to_path_buf(),
                source_digest: hex(&outcome.source_digest),
                target_digest: hex(&outcome.target_digest),
            });
        }

        self.result.record_file_copied(outcome.bytes);
        debug!(file = %source.display(), bytes = outcome.bytes, "file copied");

        let mut message = format!(
            "{} => {}, {} bytes",
            source.display(),
            target.display(),
            outcome.bytes
        );
        if let Some(digest) = &outcome.source_digest {
            message.push_str(", ");
            message.push_str(&digest.to_string_with_algo());
        }
        self.events.information(&message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{digest_file, ChecksumAlgorithm};
    use crate::config::{Options, Source, Target};
    use crate::events::NullEvents;
    use crate::fs_ops::CopyOutcome;
    use std::fs;
    use std::sync::Mutex;

    // Test helper: records every event in order
    #[derive(Default)]
    struct RecordingEvents {
        calls: Mutex<Vec<(bool, String)>>,
    }

    impl RecordingEvents {
        fn errors(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(is_error, _)| *is_error)
                .map(|(_, m)| m.clone())
                .collect()
        }

        fn information(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(is_error, _)| !*is_error)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl BackupEvents for RecordingEvents {
        fn on_information(&self, message: &str) {
            self.calls.lock().unwrap().push((false, message.to_string()));
        }

        fn on_error(&self, message: &str) {
            self.calls.lock().unwrap().push((true, message.to_string()));
        }
    }

    fn config_for(sources: &[&Path], target: &Path) -> Configuration {
        Configuration {
            target: Target {
                path: target.to_path_buf(),
            },
            source: sources
                .iter()
                .map(|p| Source {
                    path: p.to_path_buf(),
                    ..Source::default()
                })
                .collect(),
            options: Options::default(),
        }
    }

    fn run(config: Configuration, events: &dyn BackupEvents) -> BackupResult {
        let mut job = create_backup(config).expect("Failed to create job");
        let result = run_backup(&mut job, events).expect("Failed to run job");
        assert_eq!(job.state, JobState::Finished);
        result
    }

    fn write_file(path: &Path, content: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent");
        }
        fs::write(path, content).expect("Failed to write file");
    }

    /// Deny all access to `path`. Returns false (and restores access) when the
    /// current user bypasses permission bits, e.g. root.
    #[cfg(unix)]
    fn deny_access(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o000)).expect("chmod");
        let denied = if path.is_dir() {
            fs::read_dir(path).is_err()
        } else {
            fs::File::open(path).is_err()
        };
        if !denied {
            restore_access(path);
        }
        denied
    }

    #[cfg(unix)]
    fn restore_access(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let mode = if path.is_dir() { 0o755 } else { 0o644 };
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("chmod");
    }

    #[test]
    fn test_create_backup_validates_config() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = config_for(&[], temp_dir.path());
        assert!(matches!(create_backup(config), Err(ConfigError::NoSources)));

        let config = config_for(&[temp_dir.path()], Path::new(""));
        assert!(matches!(create_backup(config), Err(ConfigError::MissingTarget)));

        let job = create_backup(config_for(&[temp_dir.path()], temp_dir.path()))
            .expect("Valid config should create a job");
        assert_eq!(job.state, JobState::Idle);
    }

    #[test]
    fn test_run_copies_tree() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("Source");
        write_file(&src.join("top.txt"), b"top");
        write_file(&src.join("a").join("one.txt"), b"one");
        write_file(&src.join("a").join("b").join("two.txt"), b"two!");
        fs::create_dir_all(src.join("empty")).expect("mkdir");
        let dst = temp_dir.path().join("Target");

        let result = run(config_for(&[&src], &dst), &NullEvents);

        assert!(result.success, "run failed: {:?}", result.error);
        assert!(result.error.is_none());
        assert_eq!(result.files_copied, 3);
        assert_eq!(result.bytes_copied, 10);
        assert_eq!(result.directories_copied, 3);
        assert_eq!(result.files_skipped, 0);
        assert_eq!(result.directories_skipped, 0);
        assert!(result.end_time >= result.start_time);

        let root = dst.join("Source");
        assert_eq!(result.roots, vec![SourceRoot { source: src.clone(), target: root.clone() }]);
        assert_eq!(fs::read(root.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(root.join("a").join("one.txt")).unwrap(), b"one");
        assert_eq!(fs::read(root.join("a").join("b").join("two.txt")).unwrap(), b"two!");
        assert!(root.join("empty").is_dir());
        assert!(result.log_file_path.is_none());
    }

    #[test]
    fn test_excluded_file_type_is_not_copied() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"0123456789");
        write_file(&src.join("b.obj"), b"01234");
        let dst = temp_dir.path().join("dst");

        let mut config = config_for(&[&src], &dst);
        config.source[0].exclude_file_types = ".obj".to_string();
        let result = run(config, &NullEvents);

        assert!(result.success);
        assert_eq!(result.files_copied, 1);
        assert_eq!(result.bytes_copied, 10);
        let root = dst.join("src");
        assert_eq!(fs::read(root.join("a.txt")).unwrap().len(), 10);
        assert!(!root.join("b.obj").exists());
    }

    #[test]
    fn test_global_exclusions_ignore_case() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("keep.rs"), b"keep");
        write_file(&src.join("drop.TMP"), b"drop");
        write_file(&src.join("Build").join("out.rs"), b"out");
        write_file(&src.join("Build").join("deeper").join("x.rs"), b"x");
        write_file(&src.join("docs").join("readme.md"), b"readme");
        let dst = temp_dir.path().join("dst");

        let mut config = config_for(&[&src], &dst);
        config.options.global_exclude_file_types = ".tmp".to_string();
        config.options.global_exclude_dirs = "build".to_string();
        let result = run(config, &NullEvents);

        assert!(result.success);
        let root = dst.join("src");
        assert!(root.join("keep.rs").exists());
        assert!(!root.join("drop.TMP").exists());
        assert!(!root.join("Build").exists());
        assert!(root.join("docs").join("readme.md").exists());
        assert_eq!(result.files_copied, 2);
        assert_eq!(result.directories_copied, 1);
    }

    #[test]
    fn test_same_named_sources_get_disambiguated() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let first = temp_dir.path().join("alice").join("Documents");
        let second = temp_dir.path().join("bob").join("Documents");
        write_file(&first.join("a.txt"), b"alice");
        write_file(&second.join("b.txt"), b"bob");
        let dst = temp_dir.path().join("dst");

        let result = run(config_for(&[&first, &second], &dst), &NullEvents);

        assert!(result.success);
        let documents = dst.join("Documents");
        assert_eq!(result.roots[0].target, documents);
        assert_eq!(result.roots[1].target, documents.join("1"));
        assert_eq!(fs::read(documents.join("a.txt")).unwrap(), b"alice");
        assert_eq!(fs::read(documents.join("1").join("b.txt")).unwrap(), b"bob");
    }

    #[test]
    fn test_second_run_never_overwrites_first() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"first");
        let dst = temp_dir.path().join("dst");

        let first = run(config_for(&[&src], &dst), &NullEvents);
        write_file(&src.join("a.txt"), b"second");
        let second = run(config_for(&[&src], &dst), &NullEvents);

        assert!(first.success && second.success);
        assert_ne!(first.roots[0].target, second.roots[0].target);
        assert_eq!(fs::read(first.roots[0].target.join("a.txt")).unwrap(), b"first");
        assert_eq!(fs::read(second.roots[0].target.join("a.txt")).unwrap(), b"second");
        assert_ne!(first.run_id, second.run_id);
    }

    #[test]
    fn test_verified_run_reports_digests() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("hello.txt"), b"hello");
        let dst = temp_dir.path().join("dst");

        let mut config = config_for(&[&src], &dst);
        config.options.verify = true;
        let events = RecordingEvents::default();
        let result = run(config, &events);

        assert!(result.success);
        assert_eq!(result.files_copied, 1);
        let info = events.information();
        assert!(
            info.iter().any(|m| m.ends_with("5 bytes, md5:5d41402abc4b2a76b9719d911017c592")),
            "missing digest in {:?}",
            info
        );
        assert!(events.errors().is_empty());
    }

    // Copies correctly, but corrupts the target of the n-th file on disk
    // before it is re-read for verification.
    struct CorruptingCopier {
        inner: Copier,
        calls: usize,
        corrupt_on: usize,
    }

    impl CopyFile for CorruptingCopier {
        fn copy(&mut self, source: &Path, target: &Path) -> Result<CopyOutcome, BackupError> {
            self.calls += 1;
            let mut outcome = self.inner.copy(source, target)?;
            if self.calls == self.corrupt_on {
                let mut data = fs::read(target).expect("read target");
                data[0] ^= 0xff;
                fs::write(target, &data).expect("corrupt target");
                let mut buffer = [0u8; 256];
                let (digest, _) =
                    digest_file(target, ChecksumAlgorithm::Md5, &mut buffer).expect("digest");
                outcome.target_digest = Some(digest);
            }
            Ok(outcome)
        }
    }

    #[test]
    fn test_verify_mismatch_aborts_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        for i in 0..5 {
            write_file(&src.join(format!("file{}.dat", i)), b"payload");
        }
        let dst = temp_dir.path().join("dst");

        let mut config = config_for(&[&src], &dst);
        config.options.verify = true;
        config.options.create_log_file = true;
        let mut job = create_backup(config).expect("Failed to create job");
        let mut copier = CorruptingCopier {
            inner: Copier::new(Some(ChecksumAlgorithm::Md5)),
            calls: 0,
            corrupt_on: 3,
        };
        let events = RecordingEvents::default();

        let result = run_backup_with(&mut job, &events, &mut copier).expect("run");

        assert!(!result.success);
        assert!(matches!(result.error, Some(BackupError::VerifyMismatch { .. })));
        assert_eq!(result.files_copied, 2);
        assert_eq!(result.bytes_copied, 14);
        assert_eq!(copier.calls, 3, "run must stop at the mismatch");
        assert_eq!(job.state, JobState::Finished);

        let errors = events.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Backup verify failed"));

        let log = fs::read_to_string(result.log_file_path.as_ref().expect("log path"))
            .expect("read log");
        assert!(log.contains(" : Error: Backup verify failed"));
        assert!(log.lines().last().unwrap().starts_with("Finished at "));
    }

    #[test]
    fn test_log_file_records_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"abc");
        let dst = temp_dir.path().join("dst");

        let mut config = config_for(&[&src], &dst);
        config.options.create_log_file = true;
        let result = run(config, &NullEvents);

        assert!(result.success);
        let log_path = result.log_file_path.clone().expect("log path");
        assert_eq!(log_path, dst.join(LOG_FILE_NAME));

        let log = fs::read_to_string(&log_path).expect("read log");
        let lines: Vec<_> = log.lines().collect();
        assert!(lines[0].starts_with("Starting at "));
        assert!(lines[0].contains(&result.run_id.to_string()));
        assert!(lines.iter().any(|l| l.starts_with("Backing up ")));
        assert!(lines.iter().any(|l| l.ends_with("a.txt, 3 bytes")));
        assert!(lines.last().unwrap().starts_with("Finished at "));
    }

    #[test]
    fn test_job_cannot_run_twice() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("mkdir");
        let dst = temp_dir.path().join("dst");

        let mut job = create_backup(config_for(&[&src], &dst)).expect("create");
        run_backup(&mut job, &NullEvents).expect("First run should succeed");

        let err = run_backup(&mut job, &NullEvents).expect_err("Second run should fail");
        assert!(matches!(err, BackupError::JobNotIdle { state: JobState::Finished }));
    }

    #[test]
    fn test_unusable_target_fails_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"a");
        let blocker = temp_dir.path().join("blocker");
        write_file(&blocker, b"not a directory");

        let events = RecordingEvents::default();
        let result = run(config_for(&[&src], &blocker.join("dst")), &events);

        assert!(!result.success);
        assert!(matches!(result.error, Some(BackupError::TargetCreation { .. })));
        assert_eq!(result.files_copied, 0);
        let errors = events.errors();
        assert_eq!(errors.len(), 1, "the cause is reported once: {:?}", errors);
        assert!(errors[0].starts_with("Failed to create target directory"));
    }

    #[test]
    fn test_missing_source_root_fails_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let good = temp_dir.path().join("good");
        write_file(&good.join("a.txt"), b"a");
        let missing = temp_dir.path().join("missing");
        let dst = temp_dir.path().join("dst");

        let result = run(config_for(&[&good, &missing], &dst), &NullEvents);

        assert!(!result.success);
        assert!(matches!(result.error, Some(BackupError::Enumeration { .. })));
        assert_eq!(result.files_copied, 1, "progress before the abort is kept");
    }

    #[test]
    fn test_deep_tree() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let mut dir = src.clone();
        for level in 0..40 {
            dir = dir.join(format!("level{}", level));
        }
        write_file(&dir.join("deep.txt"), b"bottom");
        let dst = temp_dir.path().join("dst");

        let result = run(config_for(&[&src], &dst), &NullEvents);

        assert!(result.success, "run failed: {:?}", result.error);
        assert_eq!(result.directories_copied, 40);
        let relative = dir.strip_prefix(&src).unwrap();
        assert_eq!(fs::read(dst.join("src").join(relative).join("deep.txt")).unwrap(), b"bottom");
    }

    #[test]
    fn test_zero_length_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        for i in 0..3 {
            write_file(&src.join(format!("empty{}.dat", i)), b"");
        }
        let dst = temp_dir.path().join("dst");

        let mut config = config_for(&[&src], &dst);
        config.options.verify = true;
        let result = run(config, &NullEvents);

        assert!(result.success);
        assert_eq!(result.files_copied, 3);
        assert_eq!(result.bytes_copied, 0);
        assert!(dst.join("src").join("empty0.dat").is_file());
    }

    #[test]
    fn test_exhausted_allocation_aborts_run() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let first = temp_dir.path().join("alice").join("Documents");
        let second = temp_dir.path().join("bob").join("Documents");
        write_file(&first.join("a.txt"), b"alice");
        write_file(&second.join("b.txt"), b"bob");
        let dst = temp_dir.path().join("dst");

        let mut job = create_backup(config_for(&[&first, &second], &dst)).expect("create");
        let mut copier = Copier::new(None);
        let events = RecordingEvents::default();

        // One candidate per root: the second "Documents" finds no free path.
        let result = run_with_allocation_bound(&mut job, &events, &mut copier, 1).expect("run");

        assert!(!result.success);
        assert!(matches!(result.error, Some(BackupError::AllocationExhausted { .. })));
        assert_eq!(result.files_copied, 1, "the first root is kept");
        assert_eq!(result.roots.len(), 1);
        assert_eq!(fs::read(dst.join("Documents").join("a.txt")).unwrap(), b"alice");
        assert_eq!(events.errors().len(), 1);
        assert_eq!(job.state, JobState::Finished);
    }

    // Copies every file onto a device that is always full.
    #[cfg(target_os = "linux")]
    struct FullDiskCopier {
        inner: Copier,
    }

    #[cfg(target_os = "linux")]
    impl CopyFile for FullDiskCopier {
        fn copy(&mut self, source: &Path, _target: &Path) -> Result<CopyOutcome, BackupError> {
            self.inner.copy(source, Path::new("/dev/full"))
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_aborts_run() {
        if !Path::new("/dev/full").exists() {
            return;
        }
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        for i in 0..3 {
            write_file(&src.join(format!("file{}.dat", i)), b"payload");
        }
        let dst = temp_dir.path().join("dst");

        let mut job = create_backup(config_for(&[&src], &dst)).expect("create");
        let mut copier = FullDiskCopier {
            inner: Copier::new(None),
        };
        let result = run_backup_with(&mut job, &NullEvents, &mut copier).expect("run");

        assert!(!result.success);
        assert!(
            matches!(result.error, Some(BackupError::Io { .. })),
            "unexpected cause: {:?}",
            result.error
        );
        assert_eq!(result.files_copied, 0);
        assert_eq!(result.files_skipped, 0, "a failed write is not a skip");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_skipped() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"a");
        std::os::unix::fs::symlink(temp_dir.path().join("gone"), src.join("broken"))
            .expect("symlink");
        let dst = temp_dir.path().join("dst");

        let events = RecordingEvents::default();
        let result = run(config_for(&[&src], &dst), &events);

        assert!(result.success, "run failed: {:?}", result.error);
        assert_eq!(result.files_copied, 1);
        assert_eq!(result.files_skipped, 1);
        assert_eq!(events.errors().len(), 1);
        assert!(events.errors()[0].ends_with("File skipped"));
    }

    #[cfg(unix)]
    #[test]
    fn test_inaccessible_directory_is_skipped() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"a");
        write_file(&src.join("locked").join("secret.txt"), b"secret");
        write_file(&src.join("open").join("b.txt"), b"b");
        let dst = temp_dir.path().join("dst");

        let locked = src.join("locked");
        if !deny_access(&locked) {
            return;
        }

        let events = RecordingEvents::default();
        let result = run(config_for(&[&src], &dst), &events);
        restore_access(&locked);

        assert!(result.success, "run failed: {:?}", result.error);
        assert_eq!(result.directories_skipped, 1);
        assert_eq!(result.directories_copied, 1);
        assert_eq!(result.files_copied, 2);
        assert_eq!(events.errors().len(), 1);
        assert!(events.errors()[0].contains("Directory skipped"));
        assert!(dst.join("src").join("open").join("b.txt").exists());
        assert!(!dst.join("src").join("locked").join("secret.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_skipped() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write_file(&src.join("a.txt"), b"a");
        write_file(&src.join("b.txt"), b"b");
        let dst = temp_dir.path().join("dst");

        let locked = src.join("b.txt");
        if !deny_access(&locked) {
            return;
        }

        let events = RecordingEvents::default();
        let result = run(config_for(&[&src], &dst), &events);
        restore_access(&locked);

        assert!(result.success);
        assert_eq!(result.files_copied, 1);
        assert_eq!(result.files_skipped, 1);
        assert_eq!(events.errors().len(), 1);
        assert!(events.errors()[0].ends_with("File skipped"));
    }
}
