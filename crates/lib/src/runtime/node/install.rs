//! Installing unbundled `node_modules` into a script artifact.
//!
//! A finished install is copied into the installs store under the state
//! directory, keyed by the source directory and the sorted module list. A
//! later bundle sharing both gets a copy from the store instead of another
//! package manager run. Entries never expire: a long-lived process will keep
//! serving an install made before the lock file changed. An entry whose
//! store directory has disappeared is dropped and installed again.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::process::{self, CommandSpec};
use crate::util::fs::{copy_dir, find_up, recreate_dir};
use crate::util::hash::{Hashable, ObjectHash};

/// Resolved versions written into the artifact manifest, kept beside the store entry.
const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Store subdirectory holding the copied lock file.
const LOCK_DIR: &str = "lock";

#[derive(Serialize)]
struct InstallKey<'a> {
  src_path: &'a Path,
  modules: Vec<&'a str>,
}

impl Hashable for InstallKey<'_> {}

/// Store directories holding a completed install, by install key.
#[derive(Default)]
pub struct InstallCache {
  installed: Mutex<HashMap<ObjectHash, PathBuf>>,
}

impl InstallCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(src_path: &Path, modules: &[String]) -> Result<ObjectHash, BuildError> {
    let mut sorted: Vec<&str> = modules.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    Ok(
      InstallKey {
        src_path,
        modules: sorted,
      }
      .compute_hash()?,
    )
  }

  /// The store directory for `key`, if it still holds a `node_modules`.
  fn lookup(&self, key: &ObjectHash) -> Option<PathBuf> {
    let mut installed = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
    let directory = installed.get(key)?;
    if directory.join("node_modules").is_dir() {
      return Some(directory.clone());
    }
    warn!(key = %key, directory = ?directory, "cached install is gone, reinstalling");
    installed.remove(key);
    None
  }

  /// Remember that `directory` holds the install for `(src_path, modules)`.
  pub fn record(&self, src_path: &Path, modules: &[String], directory: &Path) -> Result<(), BuildError> {
    let key = Self::key(src_path, modules)?;
    let mut installed = self.installed.lock().unwrap_or_else(PoisonError::into_inner);
    installed.insert(key, directory.to_path_buf());
    Ok(())
  }
}

/// Which package manager owns the lock file nearest to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleManager {
  pub installer: &'static str,
  pub lock_file: PathBuf,
}

/// Find `package-lock.json` (npm) or, failing that, `yarn.lock` (yarn) in
/// `src_path` or above.
pub fn module_manager(src_path: &Path) -> Result<ModuleManager, BuildError> {
  if let Some(lock_file) = find_up(src_path, "package-lock.json") {
    return Ok(ModuleManager {
      installer: "npm",
      lock_file,
    });
  }
  if let Some(lock_file) = find_up(src_path, "yarn.lock") {
    return Ok(ModuleManager {
      installer: "yarn",
      lock_file,
    });
  }
  Err(BuildError::MissingLockFile {
    path: src_path.to_path_buf(),
  })
}

/// Resolve a version for each module.
///
/// The function's own `package.json` is consulted first, with
/// `dependencies`, `devDependencies` and `peerDependencies` merged in that
/// order so later sections win. A module only present transitively falls
/// back to the version in its installed `package.json`.
pub fn extract_dependencies(
  package_json: &Path,
  modules: &[String],
) -> Result<BTreeMap<String, String>, BuildError> {
  let manifest: Value = serde_json::from_str(&std::fs::read_to_string(package_json)?)?;
  let src_path = package_json.parent().unwrap_or(Path::new("."));

  let mut declared: HashMap<&str, &str> = HashMap::new();
  for section in ["dependencies", "devDependencies", "peerDependencies"] {
    if let Some(deps) = manifest.get(section).and_then(Value::as_object) {
      for (name, version) in deps {
        if let Some(version) = version.as_str() {
          declared.insert(name, version);
        }
      }
    }
  }

  let mut dependencies = BTreeMap::new();
  for module in modules {
    let version = match declared.get(module.as_str()) {
      Some(version) => version.to_string(),
      None => installed_version(src_path, module).ok_or_else(|| BuildError::UnresolvedDependency {
        module: module.clone(),
      })?,
    };
    dependencies.insert(module.clone(), version);
  }
  Ok(dependencies)
}

fn installed_version(src_path: &Path, module: &str) -> Option<String> {
  let manifest = find_up(src_path, &format!("node_modules/{}/package.json", module))?;
  let content = std::fs::read_to_string(manifest).ok()?;
  let value: Value = serde_json::from_str(&content).ok()?;
  value.get("version")?.as_str().map(str::to_string)
}

/// Install `modules` into `target/node_modules`.
///
/// # Arguments
///
/// * `cache` - Completed installs for this process
/// * `store` - Directory that keeps finished installs across bundles
/// * `src_path` - The function's source directory; must hold a `package.json`
/// * `target` - The artifact directory, already holding the module-type
///   `package.json`
/// * `modules` - Dependency names to install
pub fn install_node_modules(
  cache: &InstallCache,
  store: &Path,
  src_path: &Path,
  target: &Path,
  modules: &[String],
) -> Result<(), BuildError> {
  if modules.is_empty() {
    return Ok(());
  }

  let key = InstallCache::key(src_path, modules)?;
  if let Some(existing) = cache.lookup(&key) {
    info!(from = ?existing, "reusing installed node_modules");
    return restore(&existing, target);
  }

  let package_json = src_path.join("package.json");
  if !package_json.exists() {
    return Err(BuildError::MissingManifest {
      name: "package.json".to_string(),
      path: src_path.to_path_buf(),
    });
  }

  let dependencies = extract_dependencies(&package_json, modules)?;
  let manager = module_manager(src_path)?;
  debug!(installer = manager.installer, lock_file = ?manager.lock_file, "resolved module manager");

  write_dependencies(target, &dependencies)?;
  let lock_name = manager.lock_file.file_name().map(PathBuf::from);
  if let Some(name) = &lock_name {
    std::fs::copy(&manager.lock_file, target.join(name))?;
  }

  let spec = CommandSpec::new(manager.installer).arg("install");
  process::run_checked_sync(&spec, target).map_err(|e| match e {
    BuildError::Toolchain { output, .. } => BuildError::Install { message: output },
    other => BuildError::Install {
      message: other.to_string(),
    },
  })?;

  let installed = target.join("node_modules");
  if installed.is_dir() {
    let entry = store.join(key.to_string());
    recreate_dir(&entry)?;
    copy_dir(&installed, &entry.join("node_modules"), &[])?;
    std::fs::write(entry.join(DEPENDENCIES_FILE), serde_json::to_string_pretty(&dependencies)?)?;
    if let Some(name) = &lock_name {
      std::fs::create_dir_all(entry.join(LOCK_DIR))?;
      std::fs::copy(&manager.lock_file, entry.join(LOCK_DIR).join(name))?;
    }
    cache.record(src_path, modules, &entry)?;
  }
  Ok(())
}

/// Merge `dependencies` into the artifact's `package.json`.
fn write_dependencies(target: &Path, dependencies: &BTreeMap<String, String>) -> Result<(), BuildError> {
  let output_manifest = target.join("package.json");
  let mut manifest = match std::fs::read_to_string(&output_manifest) {
    Ok(content) => serde_json::from_str::<Map<String, Value>>(&content)?,
    Err(_) => Map::new(),
  };
  manifest.insert("dependencies".to_string(), serde_json::to_value(dependencies)?);
  std::fs::write(&output_manifest, serde_json::to_string_pretty(&manifest)?)?;
  Ok(())
}

/// Lay a stored install over `target` the way a fresh install would leave it.
fn restore(entry: &Path, target: &Path) -> Result<(), BuildError> {
  let content = std::fs::read_to_string(entry.join(DEPENDENCIES_FILE))?;
  let dependencies: BTreeMap<String, String> = serde_json::from_str(&content)?;
  write_dependencies(target, &dependencies)?;
  let lock = entry.join(LOCK_DIR);
  if lock.is_dir() {
    copy_dir(&lock, target, &[])?;
  }
  copy_dir(&entry.join("node_modules"), &target.join("node_modules"), &[])?;
  Ok(())
}
