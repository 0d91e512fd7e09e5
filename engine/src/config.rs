//! Backup configuration.
//!
//! The configuration is a TOML document with one `[Target]` table, any number
//! of `[[Source]]` tables and an `[Options]` table. Keys are PascalCase:
//!
//! ```toml
//! [Target]
//! Path = "/mnt/backup"
//!
//! [[Source]]
//! Path = "/home/me/Documents"
//! ExcludeFileTypes = ".obj;.tmp"
//! ExcludeDirs = "bin;obj"
//!
//! [Options]
//! Verify = true
//! CreateLogFile = true
//! GlobalExcludeDirs = "AppData"
//! ```
//!
//! Locating the file is kept free of process state: `candidate_config_paths`
//! takes an environment lookup and a working directory and returns the ordered
//! list of places to look.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::checksums::ChecksumAlgorithm;
use crate::error::ConfigError;

/// File names tried in each candidate directory, in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["snapback.toml", ".snapback.toml"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    #[serde(default)]
    pub target: Target,

    #[serde(default)]
    pub source: Vec<Source>,

    #[serde(default)]
    pub options: Options,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Target {
    #[serde(default)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Source {
    pub path: PathBuf,

    /// `;`-delimited file name suffixes to skip, e.g. `.obj;.tmp`
    #[serde(default)]
    pub exclude_file_types: String,

    /// `;`-delimited path fragments; matching subdirectories are not walked
    #[serde(default)]
    pub exclude_dirs: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Options {
    #[serde(default)]
    pub verify: bool,

    #[serde(default)]
    pub create_log_file: bool,

    #[serde(default)]
    pub global_exclude_file_types: String,

    #[serde(default)]
    pub global_exclude_dirs: String,

    #[serde(default)]
    pub verify_algorithm: ChecksumAlgorithm,
}

impl Configuration {
    /// Parse a configuration from TOML text.
    ///
    /// `origin` is only used to label errors.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml_string()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Template written by `create-config`: backs up `home`, skipping build
    /// output and application data, with verification and logging on.
    pub fn example(home: &Path) -> Self {
        Configuration {
            target: Target {
                path: PathBuf::from("/path/to/backup/root"),
            },
            source: vec![Source {
                path: home.to_path_buf(),
                exclude_file_types: String::new(),
                exclude_dirs: String::new(),
            }],
            options: Options {
                verify: true,
                create_log_file: true,
                global_exclude_file_types: ".obj;".to_string(),
                global_exclude_dirs: "AppData;obj;bin".to_string(),
                verify_algorithm: ChecksumAlgorithm::Md5,
            },
        }
    }

    /// Check that there is something to back up and somewhere to put it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.path.as_os_str().is_empty()
            || self.target.path.to_string_lossy().trim().is_empty()
        {
            return Err(ConfigError::MissingTarget);
        }
        if self.source.is_empty() {
            return Err(ConfigError::NoSources);
        }
        Ok(())
    }

    /// Return a copy whose target is a fresh timestamped directory under the
    /// configured one.
    pub fn with_timestamped_target(mut self, host: &str, now: DateTime<Local>) -> Self {
        self.target.path = timestamped_target(&self.target.path, host, now);
        self
    }
}

/// `<root>/<host>_<YYYYMMDDHHMMSS>`
pub fn timestamped_target(root: &Path, host: &str, now: DateTime<Local>) -> PathBuf {
    root.join(format!("{}_{}", host, now.format("%Y%m%d%H%M%S")))
}

/// Name of this machine from the environment, for target naming.
pub fn host_name<F>(env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| env(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Ordered list of paths where a configuration file may live.
///
/// Directories are tried in order (home, per-user config dir, working
/// directory), each with every name in `CONFIG_FILE_NAMES`.
pub fn candidate_config_paths<F>(env: F, cwd: &Path) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from);

    let home = non_empty("HOME").or_else(|| non_empty("USERPROFILE"));
    let config_home = non_empty("XDG_CONFIG_HOME").or_else(|| home.as_ref().map(|h| h.join(".config")));

    let mut dirs = Vec::new();
    if let Some(home) = home {
        dirs.push(home);
    }
    if let Some(config_home) = config_home {
        dirs.push(config_home.join("snapback"));
    }
    dirs.push(cwd.to_path_buf());

    let mut candidates = Vec::new();
    for dir in dirs {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
    }
    candidates
}

/// First candidate that exists as a file.
pub fn find_config(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// Where `create-config` writes: the existing config if there is one,
/// otherwise the first candidate.
pub fn default_config_path(candidates: &[PathBuf]) -> Option<PathBuf> {
    find_config(candidates).or_else(|| candidates.first().cloned())
}
