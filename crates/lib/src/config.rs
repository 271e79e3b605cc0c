//! Engine configuration.
//!
//! Defaults are usable as-is. A JSON file can replace them, and `FNBUILD_*`
//! environment variables override either.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::check::CheckKind;
use crate::consts::{ARTIFACTS_DIR, DEFAULT_STATE_DIR, INSTALLS_DIR};

pub const ENV_STATE_DIR: &str = "FNBUILD_STATE_DIR";
pub const ENV_NODE: &str = "FNBUILD_NODE";
pub const ENV_SUPPORT_DIR: &str = "FNBUILD_SUPPORT_DIR";
pub const ENV_CHECKS: &str = "FNBUILD_CHECKS";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid value for {var}: {value:?} ({reason})")]
  InvalidEnv {
    var: &'static str,
    value: String,
    reason: String,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
  /// State directory, relative to the application root unless absolute.
  pub state_dir: PathBuf,

  /// Node.js executable used for the esbuild driver and local invocation.
  pub node: String,

  /// Directory holding the local invocation shims for each runtime.
  /// Defaults to `<state_dir>/support`.
  pub support_dir: Option<PathBuf>,

  /// Side checks the watch loop runs after each build.
  pub checks: BTreeSet<CheckKind>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      state_dir: PathBuf::from(DEFAULT_STATE_DIR),
      node: "node".to_string(),
      support_dir: None,
      checks: [CheckKind::Type, CheckKind::Lint].into_iter().collect(),
    }
  }
}

impl EngineConfig {
  /// Defaults with environment overrides applied.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::default().with_env_overrides()
  }

  /// Load a JSON config file, then apply environment overrides.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    config.with_env_overrides()
  }

  pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
      self.state_dir = PathBuf::from(dir);
    }
    if let Ok(node) = std::env::var(ENV_NODE) {
      self.node = node;
    }
    if let Ok(dir) = std::env::var(ENV_SUPPORT_DIR) {
      self.support_dir = Some(PathBuf::from(dir));
    }
    if let Ok(value) = std::env::var(ENV_CHECKS) {
      self.checks = parse_checks(&value)?;
    }
    Ok(self)
  }

  /// `<root>/<state_dir>/artifacts`.
  pub fn artifacts_dir(&self, root: &Path) -> PathBuf {
    root.join(&self.state_dir).join(ARTIFACTS_DIR)
  }

  /// The artifact directory for one function. Deterministic in `root` and `id`.
  pub fn artifact_dir(&self, root: &Path, id: &str) -> PathBuf {
    self.artifacts_dir(root).join(id)
  }

  /// `<root>/<state_dir>/installs`. Never cleared by a bundle.
  pub fn installs_dir(&self, root: &Path) -> PathBuf {
    root.join(&self.state_dir).join(INSTALLS_DIR)
  }

  pub fn support_dir(&self, root: &Path) -> PathBuf {
    match &self.support_dir {
      Some(dir) => root.join(dir),
      None => root.join(&self.state_dir).join("support"),
    }
  }
}

fn parse_checks(value: &str) -> Result<BTreeSet<CheckKind>, ConfigError> {
  value
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(|name| {
      name.parse::<CheckKind>().map_err(|reason| ConfigError::InvalidEnv {
        var: ENV_CHECKS,
        value: value.to_string(),
        reason,
      })
    })
    .collect()
}
