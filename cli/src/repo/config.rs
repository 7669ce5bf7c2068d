//! Configuration of the `repo` helper.
//!
//! Layers, lowest priority first: built-in defaults, `devkit.toml` in the
//! repository root (optional), `-c key=value` overrides.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use devkit_common::CliConfigOverrides;
use devkit_common::OverrideError;
use devkit_common::merge_maps;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

pub const CONFIG_FILE: &str = "devkit.toml";

/// A commit every full clone of this repository contains. The leaked
/// credential scan walks the whole history, so it refuses to run on a
/// shallow clone that lacks it.
pub const PINNED_FIRST_COMMIT: &str = "1712e58cb568cc877c1115ff57e82ed05ee97d66";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Override(#[from] OverrideError),

    #[error("invalid repo configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Commit that must be present before scanning for leaked credentials.
    /// `null` disables the shallow-history guard.
    pub first_commit: Option<String>,

    /// Tools (by executable name) that are not run.
    pub skip: Vec<String>,

    /// Interval of the `IN PROGRESS` line for long-running steps; zero
    /// disables it.
    pub ping_secs: f64,

    /// How often `git ls-files` is tried before giving up.
    pub git_tries: u32,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            first_commit: Some(PINNED_FIRST_COMMIT.to_string()),
            skip: Vec::new(),
            ping_secs: 60.0,
            git_tries: 3,
        }
    }
}

impl RepoConfig {
    fn defaults() -> Value {
        json!({
            "first_commit": PINNED_FIRST_COMMIT,
            "skip": [],
            "ping_secs": 60.0,
            "git_tries": 3,
        })
    }

    pub fn load(repo_root: &Path, overrides: &CliConfigOverrides) -> Result<Self, ConfigError> {
        let mut merged = Self::defaults();
        if let (Value::Object(into), Some(from_file)) = (&mut merged, read_file(repo_root)?) {
            merge_maps(&from_file, into);
        }
        overrides.apply_on_value(&mut merged)?;
        Ok(serde_json::from_value(merged)?)
    }

    pub fn ping(&self) -> Duration {
        Duration::try_from_secs_f64(self.ping_secs).unwrap_or(Duration::ZERO)
    }

    pub fn skips(&self, tool: &str) -> bool {
        self.skip.iter().any(|skipped| skipped == tool)
    }
}

fn read_file(repo_root: &Path) -> Result<Option<serde_json::Map<String, Value>>, ConfigError> {
    let path = repo_root.join(CONFIG_FILE);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(ConfigError::Read { path, source }),
    };
    let table: toml::Table =
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })?;
    match serde_json::to_value(table)? {
        Value::Object(map) => Ok(Some(map)),
        _ => Ok(None),
    }
}
