//! The application description file and engine configuration.
//!
//! `fnbuild.json` lists the functions of one application:
//!
//! ```json
//! { "root": ".", "functions": [{ "id": "api", "runtime": "nodejs18.x", "srcPath": "svc", "handler": "index.handler" }] }
//! ```
//!
//! `root` and each function's `root` resolve against the file's directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use fnbuild_lib::config::EngineConfig;
use fnbuild_lib::runtime::BuildOptions;

#[derive(Debug, Deserialize)]
struct AppFile {
  #[serde(default)]
  root: Option<PathBuf>,
  functions: Vec<BuildOptions>,
}

#[derive(Debug)]
pub struct App {
  pub root: PathBuf,
  pub functions: Vec<BuildOptions>,
}

impl App {
  pub fn load(path: &Path) -> Result<Self> {
    let content =
      std::fs::read_to_string(path).with_context(|| format!("Failed to read app file {}", path.display()))?;
    let file: AppFile =
      serde_json::from_str(&content).with_context(|| format!("Failed to parse app file {}", path.display()))?;

    let base = path
      .parent()
      .filter(|dir| !dir.as_os_str().is_empty())
      .unwrap_or(Path::new("."));
    let base = dunce::canonicalize(base).with_context(|| format!("Failed to resolve {}", base.display()))?;
    let root = match file.root {
      Some(root) => base.join(root),
      None => base,
    };

    let mut seen = HashSet::new();
    let mut functions = Vec::with_capacity(file.functions.len());
    for mut function in file.functions {
      if !seen.insert(function.id.clone()) {
        bail!("Duplicate function id '{}' in {}", function.id, path.display());
      }
      function.root = if function.root.as_os_str().is_empty() {
        root.clone()
      } else {
        root.join(&function.root)
      };
      functions.push(function);
    }

    debug!(root = ?root, functions = functions.len(), "loaded app file");
    Ok(Self { root, functions })
  }

  /// Functions named by `ids`, or every function when `ids` is empty.
  pub fn select(&self, ids: &[String]) -> Result<Vec<&BuildOptions>> {
    if let Some(missing) = ids.iter().find(|id| !self.functions.iter().any(|f| &f.id == *id)) {
      bail!("No function with id '{}'", missing);
    }
    Ok(
      self
        .functions
        .iter()
        .filter(|f| ids.is_empty() || ids.contains(&f.id))
        .collect(),
    )
  }
}

/// Engine configuration from `path` if given, otherwise defaults. Environment
/// overrides apply either way.
pub fn engine_config(path: Option<&Path>) -> Result<EngineConfig> {
  let config = match path {
    Some(path) => EngineConfig::load(path)?,
    None => EngineConfig::from_env()?,
  };
  Ok(config)
}
